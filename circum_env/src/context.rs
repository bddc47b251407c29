//! Core clock trait shared by the tracking engine and the network services.

use std::time::Duration;

/// The central interface for time.
///
/// Track creation, last-seen stamps, Kalman prediction intervals and
/// simulator steps are all read from this trait so that the same code runs
/// against the real clock in production and against a hand-driven clock in
/// tests.
///
/// # Implementations
///
/// - **Production**: [`SystemContext`](crate::SystemContext) - monotonic `Instant`
/// - **Tests**: [`ManualContext`](crate::ManualContext) - virtual time advanced explicitly
pub trait CircumContext: Send + Sync + 'static {
    /// Monotonic time elapsed since the context was created.
    fn now(&self) -> Duration;
}
