//! Real clock.

use crate::CircumContext;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic clock anchored at construction.
#[derive(Debug, Clone, Copy)]
pub struct SystemContext {
    origin: Instant,
}

impl SystemContext {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Arc-wrapped, ready to hand to trackers and sensors.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for SystemContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CircumContext for SystemContext {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}
