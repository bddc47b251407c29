//! The "TRACKING" Engine - Persistent Identity Layer
//!
//! Turns per-cycle position observations into tracked objects whose ids
//! survive from one cycle to the next:
//! 1. Association (pluggable strategy, see [`crate::circum_association`])
//! 2. Registration of observations nobody claimed
//! 3. Absorption of claimed observations (overwrite or predict+correct)
//! 4. Pruning of stale and flickering tracks

use crate::circum_association::AssociationStrategy;
use crate::circum_kalman::FilterError;
use circum_env::{CircumContext, Position, TrackReport};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Number of absorbed positions kept per track.
pub const HISTORY_CAPACITY: usize = 32;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the ObjectTracker
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// A track unseen for longer than this is deleted (default: 5s)
    pub deletion_threshold: Duration,

    /// Tracks older than the threshold are deleted once the unseen share of
    /// their lifetime exceeds this ratio (default: 0.6)
    pub max_unseen_ratio: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            deletion_threshold: Duration::from_secs(5),
            max_unseen_ratio: 0.6,
        }
    }
}

// ============================================================================
// OBSERVATION (Input)
// ============================================================================

/// A single world-frame position sample, consumed by one tracking cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub position: Vector3<f64>,
}

impl Observation {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            position: Vector3::new(x, y, z),
        }
    }
}

impl From<Position> for Observation {
    fn from(p: Position) -> Self {
        Self::new(p.x, p.y, p.z)
    }
}

// ============================================================================
// TRACKED OBJECT (Internal State)
// ============================================================================

/// One physical object followed across cycles.
///
/// `C` is the strategy's estimation context (nothing for nearest-neighbor,
/// a Kalman filter for the optimal-assignment strategy). The tracker owns
/// every `TrackedObject`; callers only ever see clones.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedObject<C> {
    /// Monotonic identity, never reused
    pub id: u64,

    /// Current position estimate
    pub position: Vector3<f64>,

    /// When the track was registered
    pub created: Duration,

    /// When the track last absorbed an observation
    pub last_seen: Duration,

    /// Per-strategy estimation state
    pub context: C,

    /// Most recent absorbed positions, oldest first
    pub history: VecDeque<Vector3<f64>>,
}

impl<C> TrackedObject<C> {
    fn new(id: u64, position: Vector3<f64>, context: C, now: Duration) -> Self {
        let mut history = VecDeque::with_capacity(HISTORY_CAPACITY);
        history.push_back(position);

        Self {
            id,
            position,
            created: now,
            last_seen: now,
            context,
            history,
        }
    }

    /// Stamp the track as seen at `now` and remember its position.
    fn mark_seen(&mut self, now: Duration) {
        self.last_seen = now;
        if self.history.len() >= HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(self.position);
    }

    /// Wire view of this track.
    pub fn report(&self) -> TrackReport {
        TrackReport {
            x: self.position.x,
            y: self.position.y,
            z: self.position.z,
            id: self.id,
        }
    }
}

// ============================================================================
// CYCLE REPORT
// ============================================================================

/// What one call to [`ObjectTracker::update`] did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Ids registered from unassociated observations
    pub created: Vec<u64>,

    /// Number of tracks that absorbed an observation
    pub associated: usize,

    /// Tracks whose absorb step failed this cycle
    pub failed: Vec<u64>,

    /// Ids removed by the pruning pass
    pub pruned: Vec<u64>,
}

// ============================================================================
// OBJECT TRACKER (The Engine)
// ============================================================================

/// The track registry.
///
/// Holds tracks in id order (which is also insertion order), allocates ids,
/// and runs the per-cycle association / absorb / prune pipeline with the
/// strategy chosen at construction.
///
/// `update` takes `&mut self`, so a caller sharing one tracker between
/// threads must wrap it in its own lock.
pub struct ObjectTracker<S: AssociationStrategy> {
    /// Active tracks, sorted by id
    tracks: Vec<TrackedObject<S::Context>>,

    /// Next id to hand out
    next_id: u64,

    config: TrackerConfig,

    strategy: S,

    /// Clock for creation / last-seen stamps
    context: Arc<dyn CircumContext>,
}

impl<S: AssociationStrategy> ObjectTracker<S> {
    /// Create an empty tracker.
    pub fn new(strategy: S, config: TrackerConfig, context: Arc<dyn CircumContext>) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 0,
            config,
            strategy,
            context,
        }
    }

    /// Run one tracking cycle over a full set of observations.
    pub fn update(&mut self, observations: &[Observation]) -> CycleReport {
        let now = self.context.now();
        let mut report = CycleReport::default();

        // Stage 1: Association
        let association = self.strategy.associate(observations, &mut self.tracks, now);

        // Stage 2: Registration
        for &obs_idx in &association.unassociated_observations {
            let id = self.register(&observations[obs_idx], now);
            report.created.push(id);
        }

        // Stage 3: Absorption
        for &(track_idx, obs_idx) in &association.pairs {
            let track = &mut self.tracks[track_idx];
            match self.strategy.absorb(track, &observations[obs_idx], now) {
                Ok(()) => {
                    track.mark_seen(now);
                    report.associated += 1;
                }
                Err(e) => {
                    warn!(track = track.id, "skipping update this cycle: {e}");
                    report.failed.push(track.id);
                }
            }
        }

        // Stage 4: Pruning
        report.pruned = self.prune(now);

        report
    }

    fn register(&mut self, observation: &Observation, now: Duration) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        let context = self.strategy.init_context(observation, now);
        let track = TrackedObject::new(id, observation.position, context, now);
        debug!(id, x = track.position.x, y = track.position.y, z = track.position.z, "registered new object");

        self.tracks.push(track);
        id
    }

    fn prune(&mut self, now: Duration) -> Vec<u64> {
        let threshold = self.config.deletion_threshold.as_secs_f64();
        let max_ratio = self.config.max_unseen_ratio;
        let mut pruned = Vec::new();

        self.tracks.retain(|track| {
            let since_seen = now.saturating_sub(track.last_seen).as_secs_f64();
            let since_created = now.saturating_sub(track.created).as_secs_f64();

            // Unseen for too long, or unseen for most of a long enough life
            let stale = since_seen > threshold;
            let flickering = since_created > threshold && since_seen / since_created > max_ratio;

            if stale || flickering {
                debug!(id = track.id, since_seen, since_created, "pruned object");
                pruned.push(track.id);
                false
            } else {
                true
            }
        });

        pruned
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    /// Copies of all tracks in id order.
    pub fn objects(&self) -> Vec<TrackedObject<S::Context>> {
        self.tracks.clone()
    }

    /// Copy of a single track.
    pub fn get(&self, id: u64) -> Option<TrackedObject<S::Context>> {
        self.tracks
            .binary_search_by_key(&id, |t| t.id)
            .ok()
            .map(|idx| self.tracks[idx].clone())
    }

    /// Wire view of all tracks in id order.
    pub fn reports(&self) -> Vec<TrackReport> {
        self.tracks.iter().map(TrackedObject::report).collect()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }
}

// ============================================================================
// OBJECT-SAFE ENGINE
// ============================================================================

/// Strategy-erased view of a tracker, for holders that pick the strategy at runtime.
pub trait TrackingEngine: Send {
    fn update(&mut self, observations: &[Observation]) -> CycleReport;

    fn reports(&self) -> Vec<TrackReport>;

    fn track_count(&self) -> usize;

    fn strategy_name(&self) -> &'static str;
}

impl<S> TrackingEngine for ObjectTracker<S>
where
    S: AssociationStrategy + Send,
    S::Context: Send,
{
    fn update(&mut self, observations: &[Observation]) -> CycleReport {
        ObjectTracker::update(self, observations)
    }

    fn reports(&self) -> Vec<TrackReport> {
        ObjectTracker::reports(self)
    }

    fn track_count(&self) -> usize {
        self.len()
    }

    fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Errors that can occur while a track absorbs an observation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrackingError {
    #[error("Estimation failed: {0}")]
    Filter(#[from] FilterError),
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circum_association::NearestNeighbor;
    use circum_env::ManualContext;

    fn tracker_with_clock(threshold_secs: u64) -> (ObjectTracker<NearestNeighbor>, ManualContext) {
        let clock = ManualContext::new();
        let config = TrackerConfig {
            deletion_threshold: Duration::from_secs(threshold_secs),
            ..Default::default()
        };
        let tracker = ObjectTracker::new(NearestNeighbor, config, Arc::new(clock.clone()));
        (tracker, clock)
    }

    #[test]
    fn test_tracker_creation() {
        let (tracker, _clock) = tracker_with_clock(5);
        assert!(tracker.is_empty());
        assert_eq!(tracker.config().deletion_threshold, Duration::from_secs(5));
    }

    #[test]
    fn test_tracked_object_creation() {
        let (mut tracker, clock) = tracker_with_clock(5);
        clock.set_time(Duration::from_secs(3));

        tracker.update(&[Observation::new(0.0, 1.0, 2.0)]);

        let track = tracker.get(0).unwrap();
        assert_eq!(track.position, Vector3::new(0.0, 1.0, 2.0));
        assert_eq!(track.created, Duration::from_secs(3));
        assert_eq!(track.last_seen, Duration::from_secs(3));
        assert_eq!(track.history.len(), 1);
    }

    #[test]
    fn test_update_assigns_sequential_ids() {
        let (mut tracker, _clock) = tracker_with_clock(5);
        let report = tracker.update(&[
            Observation::new(0.0, 1.0, 2.0),
            Observation::new(0.0, 1.0, 2.0),
            Observation::new(5.0, 1.0, 2.0),
        ]);

        assert_eq!(report.created, vec![0, 1, 2]);
        let ids: Vec<u64> = tracker.objects().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_ids_are_never_reused() {
        let (mut tracker, clock) = tracker_with_clock(5);
        tracker.update(&[Observation::new(0.0, 0.0, 0.0)]);

        clock.advance_time(Duration::from_secs(6));
        let report = tracker.update(&[]);
        assert_eq!(report.pruned, vec![0]);
        assert!(tracker.is_empty());

        let report = tracker.update(&[Observation::new(0.0, 0.0, 0.0)]);
        assert_eq!(report.created, vec![1]);
    }

    #[test]
    fn test_prune_too_old() {
        let (mut tracker, clock) = tracker_with_clock(5);
        tracker.update(&[Observation::new(0.0, 0.0, 0.0), Observation::new(50.0, 0.0, 0.0)]);

        // Only the first object keeps being seen
        for _ in 0..6 {
            clock.advance_time(Duration::from_secs(1));
            tracker.update(&[Observation::new(0.0, 0.0, 0.0)]);
        }

        let ids: Vec<u64> = tracker.objects().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![0]);
    }

    #[test]
    fn test_prune_too_invisible() {
        let (mut tracker, clock) = tracker_with_clock(5);
        tracker.update(&[Observation::new(0.0, 0.0, 0.0), Observation::new(100.0, 0.0, 0.0)]);

        // Track 0 last seen at 2.5s, track 1 last seen at 3s
        clock.set_time(Duration::from_millis(2500));
        tracker.update(&[Observation::new(0.0, 0.0, 0.0)]);
        clock.set_time(Duration::from_secs(3));
        tracker.update(&[Observation::new(100.0, 0.0, 0.0)]);

        // At 7s both were seen less than 5s ago, but track 0 went unseen for
        // 4.5 of its 7 seconds (> 60%) while track 1 only for 4 of 7.
        clock.set_time(Duration::from_secs(7));
        let report = tracker.update(&[]);

        assert_eq!(report.pruned, vec![0]);
        assert!(tracker.get(0).is_none());
        assert!(tracker.get(1).is_some());
    }

    #[test]
    fn test_young_tracks_survive_short_gaps() {
        let (mut tracker, clock) = tracker_with_clock(5);
        tracker.update(&[Observation::new(0.0, 0.0, 0.0)]);

        clock.advance_time(Duration::from_secs(4));
        let report = tracker.update(&[]);

        assert!(report.pruned.is_empty());
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_history_is_bounded() {
        let (mut tracker, clock) = tracker_with_clock(5);
        for i in 0..(HISTORY_CAPACITY + 10) {
            clock.advance_time(Duration::from_millis(10));
            tracker.update(&[Observation::new(i as f64 * 0.01, 0.0, 0.0)]);
        }

        let track = tracker.get(0).unwrap();
        assert_eq!(track.history.len(), HISTORY_CAPACITY);
        assert_eq!(track.history.back(), Some(&track.position));
    }

    #[test]
    fn test_reports_follow_id_order() {
        let (mut tracker, _clock) = tracker_with_clock(5);
        tracker.update(&[Observation::new(1.0, 2.0, 3.0), Observation::new(4.0, 5.0, 6.0)]);

        let reports = tracker.reports();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0], TrackReport { x: 1.0, y: 2.0, z: 3.0, id: 0 });
        assert_eq!(reports[1].id, 1);
    }

    #[test]
    fn test_objects_are_copies() {
        let (mut tracker, _clock) = tracker_with_clock(5);
        tracker.update(&[Observation::new(1.0, 1.0, 1.0)]);

        let mut copies = tracker.objects();
        copies[0].position = Vector3::new(9.0, 9.0, 9.0);

        assert_eq!(tracker.get(0).unwrap().position, Vector3::new(1.0, 1.0, 1.0));
    }

    #[test]
    fn test_observation_from_wire_position() {
        let obs = Observation::from(Position::new(1.0, 2.0, 3.0));
        assert_eq!(obs.position, Vector3::new(1.0, 2.0, 3.0));
    }
}
