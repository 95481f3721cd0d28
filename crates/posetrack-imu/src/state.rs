use crate::types::Pose;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Health figures for the update loop.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DebugStats {
    /// Fraction of recent polls where the source had no sample.
    pub miss_rate: f64,
    /// Nominal loop rate (Hz).
    pub update_frequency: f64,
    /// Samples fused since the loop started.
    pub samples: u64,
}

impl fmt::Display for DebugStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Miss Rate: {:.2}", self.miss_rate)?;
        writeln!(f, "Update Frequency: {:.2}", self.update_frequency)?;
        write!(f, "Samples: {}", self.samples)
    }
}

/// Everything the update loop publishes, replaced as one value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Published {
    pub pose: Pose,
    pub stats: DebugStats,
}

/// Latest pose, shared between the update loop and its readers.
///
/// Backed by a `watch` channel: each publish swaps in a whole value, so a
/// reader never sees orientation from one tick and position from another.
#[derive(Clone)]
pub struct SharedPose {
    tx: Arc<watch::Sender<Published>>,
}

impl Default for SharedPose {
    fn default() -> Self {
        let (tx, _) = watch::channel(Published::default());
        Self { tx: Arc::new(tx) }
    }
}

impl SharedPose {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the published pose as one unit.
    pub fn publish(&self, pose: Pose) {
        self.tx.send_modify(|p| p.pose = pose);
    }

    /// Copy of the last published pose.
    pub fn snapshot(&self) -> Pose {
        self.tx.borrow().pose
    }

    pub fn update_stats(&self, stats: DebugStats) {
        self.tx.send_modify(|p| p.stats = stats);
    }

    pub fn stats(&self) -> DebugStats {
        self.tx.borrow().stats
    }

    /// Receiver that wakes on every publish.
    pub fn subscribe(&self) -> watch::Receiver<Published> {
        self.tx.subscribe()
    }
}
