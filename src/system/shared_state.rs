//! Latest-pose handoff between the tracking thread and its readers.
//!
//! `LatestPoses` is a double buffer: the single writer fills the back slot
//! and then flips the front index, so a reader always sees one complete
//! tick and never a mix of two.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::geometry::Pose;

/// Poses of one completed tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoseSnapshot {
    /// Number of ticks published so far, this one included.
    pub sequence: u64,
    pub timestamp_ns: u64,
    pub poses: HashMap<String, Pose>,
}

#[derive(Debug, Default)]
pub struct LatestPoses {
    slots: [RwLock<PoseSnapshot>; 2],
    front: AtomicUsize,
}

impl LatestPoses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a tick. Must only be called from one thread.
    pub fn publish(&self, timestamp_ns: u64, poses: HashMap<String, Pose>) {
        let front = self.front.load(Ordering::Acquire);
        let sequence = self.slots[front].read().sequence + 1;
        let back = 1 - front;
        {
            let mut slot = self.slots[back].write();
            slot.sequence = sequence;
            slot.timestamp_ns = timestamp_ns;
            slot.poses = poses;
        }
        self.front.store(back, Ordering::Release);
    }

    /// Copy of the most recent tick.
    pub fn snapshot(&self) -> PoseSnapshot {
        self.slots[self.front.load(Ordering::Acquire)].read().clone()
    }

    /// Latest pose of one marker; `None` if it was not found in the last tick.
    pub fn get(&self, name: &str) -> Option<Pose> {
        self.slots[self.front.load(Ordering::Acquire)]
            .read()
            .poses
            .get(name)
            .copied()
    }

    pub fn sequence(&self) -> u64 {
        self.slots[self.front.load(Ordering::Acquire)].read().sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn single(name: &str, x: f64) -> HashMap<String, Pose> {
        let mut pose = Pose::identity();
        pose.matrix[(3, 0)] = x;
        HashMap::from([(name.to_string(), pose)])
    }

    #[test]
    fn test_publish_flips_to_latest() {
        let latest = LatestPoses::new();
        assert_eq!(latest.sequence(), 0);
        assert!(latest.get("ground").is_none());

        latest.publish(10, single("ground", 1.0));
        latest.publish(20, single("ground", 2.0));

        let snapshot = latest.snapshot();
        assert_eq!(snapshot.sequence, 2);
        assert_eq!(snapshot.timestamp_ns, 20);
        assert_eq!(latest.get("ground").unwrap().translation().x, 2.0);
    }

    #[test]
    fn test_missing_marker_disappears() {
        let latest = LatestPoses::new();
        latest.publish(1, single("ground", 1.0));
        latest.publish(2, HashMap::new());
        assert!(latest.get("ground").is_none());
    }

    #[test]
    fn test_reader_sees_complete_ticks() {
        let latest = Arc::new(LatestPoses::new());
        let writer = {
            let latest = latest.clone();
            thread::spawn(move || {
                for i in 1..=500u64 {
                    let mut poses = single("a", i as f64);
                    poses.extend(single("b", i as f64));
                    latest.publish(i, poses);
                }
            })
        };

        for _ in 0..500 {
            let snapshot = latest.snapshot();
            if let (Some(a), Some(b)) = (snapshot.poses.get("a"), snapshot.poses.get("b")) {
                assert_eq!(a.translation().x, b.translation().x);
                assert_eq!(a.translation().x, snapshot.timestamp_ns as f64);
            }
        }
        writer.join().unwrap();
        assert_eq!(latest.sequence(), 500);
    }
}
