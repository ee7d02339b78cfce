//! Double exponential smoothing (DESP) of marker pose streams.
//!
//! Each of the 16 matrix components is filtered independently:
//!
//! ```text
//! S1 = α·raw + (1-α)·S1
//! S2 = α·S1  + (1-α)·S2
//! b1 = α/(1-α) · (S1 - S2)
//! b0 = 2·S1 - S2 - b1
//! out = b0 + b1
//! ```
//!
//! Tracking both level and trend keeps the lag lower than single
//! exponential smoothing at O(1) memory per entity.

use std::collections::{HashMap, VecDeque};

use nalgebra::Matrix4;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, TrackingError};
use crate::geometry::Pose;

pub const DEFAULT_ALPHA: f64 = 0.5;
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct SmootherConfig {
    /// Smoothing factor, strictly between 0 and 1.
    pub alpha: f64,
    /// Number of raw samples kept per entity.
    pub history_capacity: usize,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl SmootherConfig {
    pub fn validate(&self) -> Result<()> {
        // `!(a > 0 && a < 1)` also rejects NaN.
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(TrackingError::invalid_argument(format!(
                "smoothing alpha must be in (0, 1), got {}",
                self.alpha
            )));
        }
        if self.history_capacity == 0 {
            return Err(TrackingError::invalid_argument(
                "smoother history capacity must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Filter state of one tracked entity.
///
/// The accumulators drive the output; the history is kept for diagnostics
/// and for alternative filters.
#[derive(Debug, Clone)]
pub struct SmootherState {
    s1: Matrix4<f64>,
    s2: Matrix4<f64>,
    history: VecDeque<Pose>,
    capacity: usize,
    filtered: Pose,
}

impl SmootherState {
    fn new(raw: &Pose, capacity: usize) -> Self {
        let mut history = VecDeque::with_capacity(capacity);
        history.push_back(*raw);
        Self {
            s1: raw.matrix,
            s2: raw.matrix,
            history,
            capacity,
            filtered: *raw,
        }
    }

    fn update(&mut self, alpha: f64, raw: &Pose) -> Pose {
        if self.history.back().is_some_and(|last| last.bit_eq(raw)) {
            return self.filtered;
        }

        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(*raw);

        let beta = 1.0 - alpha;
        self.s1 = raw.matrix * alpha + self.s1 * beta;
        self.s2 = self.s1 * alpha + self.s2 * beta;

        let b1 = (self.s1 - self.s2) * (alpha / beta);
        let b0 = self.s1 * 2.0 - self.s2 - b1;
        self.filtered = Pose::from_matrix(b0 + b1);
        self.filtered
    }

    /// Raw samples, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &Pose> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Most recent filtered output.
    pub fn filtered(&self) -> Pose {
        self.filtered
    }
}

/// DESP filter over any number of named entities.
#[derive(Debug, Clone)]
pub struct Smoother {
    config: SmootherConfig,
    states: HashMap<String, SmootherState>,
}

impl Smoother {
    pub fn new(alpha: f64) -> Result<Self> {
        Self::with_config(SmootherConfig {
            alpha,
            ..SmootherConfig::default()
        })
    }

    pub fn with_config(config: SmootherConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            states: HashMap::new(),
        })
    }

    pub fn config(&self) -> &SmootherConfig {
        &self.config
    }

    /// Feed one raw pose for `entity_id` and return the filtered pose.
    ///
    /// The first sample of an entity is returned unchanged. A sample that is
    /// bit-identical to the previous one is not fed again; the current
    /// filtered value is returned instead.
    pub fn filter(&mut self, entity_id: &str, raw: &Pose) -> Pose {
        match self.states.get_mut(entity_id) {
            Some(state) => state.update(self.config.alpha, raw),
            None => {
                debug!(entity = entity_id, "creating smoother state");
                self.states.insert(
                    entity_id.to_string(),
                    SmootherState::new(raw, self.config.history_capacity),
                );
                *raw
            }
        }
    }

    pub fn state(&self, entity_id: &str) -> Option<&SmootherState> {
        self.states.get(entity_id)
    }

    /// Drop an entity's state; its next sample starts a fresh filter.
    pub fn reset(&mut self, entity_id: &str) -> bool {
        self.states.remove(entity_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Matrix3, Vector3};

    fn at(x: f64) -> Pose {
        Pose::from_parts(&Matrix3::identity(), &Vector3::new(x, 2.0, -50.0))
    }

    #[test]
    fn test_rejects_degenerate_alpha() {
        assert!(matches!(Smoother::new(0.0), Err(TrackingError::InvalidArgument(_))));
        assert!(matches!(Smoother::new(1.0), Err(TrackingError::InvalidArgument(_))));
        assert!(Smoother::new(f64::NAN).is_err());
        assert!(Smoother::new(-0.2).is_err());
        assert!(Smoother::new(0.3).is_ok());
    }

    #[test]
    fn test_rejects_zero_history() {
        let config = SmootherConfig {
            alpha: 0.5,
            history_capacity: 0,
        };
        assert!(Smoother::with_config(config).is_err());
    }

    #[test]
    fn test_first_sample_passes_through() {
        let mut smoother = Smoother::new(0.4).unwrap();
        let pose = at(10.0);
        assert_eq!(smoother.filter("ground", &pose), pose);
        assert_eq!(smoother.state("ground").unwrap().history_len(), 1);
    }

    #[test]
    fn test_constant_input_is_fixed_point() {
        let mut smoother = Smoother::new(0.4).unwrap();
        let pose = at(10.0);
        for _ in 0..20 {
            assert_relative_eq!(smoother.filter("ground", &pose).matrix, pose.matrix);
        }
    }

    #[test]
    fn test_step_converges_to_new_level() {
        let mut smoother = Smoother::new(0.5).unwrap();
        smoother.filter("ground", &at(0.0));

        // Alternate by one ulp-scale nudge so samples are never bit-identical.
        let mut out = Pose::identity();
        for i in 0..60 {
            let target = if i % 2 == 0 { at(10.0) } else { at(10.0 + 1e-12) };
            out = smoother.filter("ground", &target);
        }
        assert_relative_eq!(out.translation().x, 10.0, epsilon = 1e-6);
    }

    #[test]
    fn test_single_step_matches_formula() {
        let alpha = 0.5;
        let mut smoother = Smoother::new(alpha).unwrap();
        smoother.filter("m", &at(0.0));
        let out = smoother.filter("m", &at(10.0));

        // S1 = 5, S2 = 2.5, b1 = 2.5, b0 = 5, out = 7.5
        assert_relative_eq!(out.translation().x, 7.5, epsilon = 1e-12);
        assert_relative_eq!(out.translation().y, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_duplicate_sample_skips_update() {
        let mut smoother = Smoother::new(0.5).unwrap();
        smoother.filter("m", &at(0.0));
        let first = smoother.filter("m", &at(10.0));
        let again = smoother.filter("m", &at(10.0));

        assert_eq!(first, again);
        assert_eq!(smoother.state("m").unwrap().history_len(), 2);
    }

    #[test]
    fn test_history_is_bounded() {
        let config = SmootherConfig {
            alpha: 0.5,
            history_capacity: 3,
        };
        let mut smoother = Smoother::with_config(config).unwrap();
        for i in 0..8 {
            smoother.filter("m", &at(i as f64));
        }
        let state = smoother.state("m").unwrap();
        let xs: Vec<f64> = state.history().map(|p| p.translation().x).collect();
        assert_eq!(xs, vec![5.0, 6.0, 7.0]);
    }

    #[test]
    fn test_entities_are_independent() {
        let mut smoother = Smoother::new(0.5).unwrap();
        smoother.filter("a", &at(0.0));
        smoother.filter("a", &at(10.0));
        assert_eq!(smoother.filter("b", &at(3.0)), at(3.0));

        assert!(smoother.reset("a"));
        assert!(!smoother.reset("a"));
        assert_eq!(smoother.filter("a", &at(42.0)), at(42.0));
    }
}
