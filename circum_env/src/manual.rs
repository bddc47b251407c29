//! Hand-driven clock for deterministic tests.

use crate::CircumContext;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Context whose clock only moves when told to.
///
/// Clones share the same clock, so a test can hand one clone to a tracker
/// and keep another to advance time between cycles.
#[derive(Debug, Clone, Default)]
pub struct ManualContext {
    /// Nanoseconds since creation
    elapsed_ns: Arc<AtomicU64>,
}

impl ManualContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn advance_time(&self, duration: Duration) {
        self.elapsed_ns.fetch_add(nanos(duration), Ordering::SeqCst);
    }

    pub fn set_time(&self, time: Duration) {
        self.elapsed_ns.store(nanos(time), Ordering::SeqCst);
    }
}

// Saturates after ~584 years of virtual time
fn nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

impl CircumContext for ManualContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns.load(Ordering::SeqCst))
    }
}
