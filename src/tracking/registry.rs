//! Logical marker names mapped to backend handles.
//!
//! Entries are never edited in place. After a backend re-initialization the
//! whole set is re-associated with [`MarkerRegistry::reassociate`].

use std::collections::HashMap;

use tracing::debug;

use crate::backend::{MarkerHandle, MarkerSpec, TrackerBackend};
use crate::error::{Result, TrackingError};

/// One registered marker.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredMarker {
    pub name: String,
    pub spec: MarkerSpec,
    pub handle: MarkerHandle,
}

#[derive(Debug, Default)]
pub struct MarkerRegistry {
    /// Registration order.
    entries: Vec<RegisteredMarker>,
    index: HashMap<String, usize>,
}

impl MarkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `spec` with `backend` and store it under `name`.
    ///
    /// A duplicate name is rejected before the backend is touched.
    pub fn register<B: TrackerBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        name: impl Into<String>,
        spec: MarkerSpec,
    ) -> Result<MarkerHandle> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(TrackingError::DuplicateRegistration(name));
        }

        let handle = backend.associate_marker(&spec)?;
        debug!(marker = %name, %handle, "registered marker");
        self.index.insert(name.clone(), self.entries.len());
        self.entries.push(RegisteredMarker {
            name,
            spec,
            handle: handle.clone(),
        });
        Ok(handle)
    }

    pub fn resolve(&self, name: &str) -> Result<&MarkerHandle> {
        self.get(name)
            .map(|entry| &entry.handle)
            .ok_or_else(|| TrackingError::UnknownMarker(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredMarker> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Rebuild every handle against a freshly configured backend.
    ///
    /// On failure the registry keeps its old (stale) handles; queries with
    /// them keep failing until a reassociation succeeds.
    pub fn reassociate<B: TrackerBackend + ?Sized>(&mut self, backend: &mut B) -> Result<()> {
        let handles = self
            .entries
            .iter()
            .map(|entry| backend.associate_marker(&entry.spec))
            .collect::<Result<Vec<_>>>()?;

        for (entry, handle) in self.entries.iter_mut().zip(handles) {
            entry.handle = handle;
        }
        debug!(markers = self.entries.len(), "re-associated markers");
        Ok(())
    }

    /// Forget every marker.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredMarker> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::AlvarBackend;
    use crate::config::{AlvarConfig, BackendConfig};
    use crate::io::ReplayLibrary;

    fn configured() -> AlvarBackend<ReplayLibrary> {
        let mut backend = AlvarBackend::new(ReplayLibrary::new());
        backend
            .configure(BackendConfig::Alvar(AlvarConfig::default()))
            .unwrap();
        backend
    }

    #[test]
    fn test_register_and_resolve() {
        let mut backend = configured();
        let mut registry = MarkerRegistry::new();

        let handle = registry.register(&mut backend, "ground", MarkerSpec::Id(7)).unwrap();
        assert_eq!(registry.resolve("ground").unwrap(), &handle);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_name_fails() {
        let mut backend = configured();
        let mut registry = MarkerRegistry::new();

        registry.register(&mut backend, "ground", MarkerSpec::Id(7)).unwrap();
        let err = registry
            .register(&mut backend, "ground", MarkerSpec::Id(8))
            .unwrap_err();
        assert!(matches!(err, TrackingError::DuplicateRegistration(name) if name == "ground"));
        assert_eq!(registry.resolve("ground").unwrap().target, crate::backend::HandleTarget::Id(7));
    }

    #[test]
    fn test_unknown_name_fails() {
        let registry = MarkerRegistry::new();
        assert!(matches!(
            registry.resolve("nowhere"),
            Err(TrackingError::UnknownMarker(name)) if name == "nowhere"
        ));
    }

    #[test]
    fn test_association_failure_is_not_stored() {
        let mut backend = configured();
        let mut registry = MarkerRegistry::new();

        let err = registry
            .register(&mut backend, "poster", MarkerSpec::Feature("poster".into()))
            .unwrap_err();
        assert!(matches!(err, TrackingError::AssociationError(_)));
        assert!(!registry.contains("poster"));
    }

    #[test]
    fn test_reassociate_refreshes_handles() {
        let mut backend = configured();
        let mut registry = MarkerRegistry::new();
        let old = registry.register(&mut backend, "ground", MarkerSpec::Id(7)).unwrap();

        let resized = BackendConfig::Alvar(AlvarConfig::default()).with_dimensions(320, 240);
        backend.configure(resized).unwrap();
        registry.reassociate(&mut backend).unwrap();

        let new = registry.resolve("ground").unwrap();
        assert_eq!(new.target, old.target);
        assert!(new.generation > old.generation);
    }
}
