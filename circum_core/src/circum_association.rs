//! Data association strategies.
//!
//! A strategy decides which new observation belongs to which existing track,
//! builds the estimation context of freshly registered tracks, and folds an
//! associated observation into its track. The registry is generic over the
//! strategy, so each one carries its own per-track context type.

use crate::assignment;
use crate::circum_kalman::{ConstantVelocityFilter, KalmanConfig};
use crate::circum_tracking::{
    Observation, ObjectTracker, TrackedObject, TrackerConfig, TrackingEngine, TrackingError,
};
use circum_env::CircumContext;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Result of one association pass.
///
/// All entries are indices into the slices handed to
/// [`AssociationStrategy::associate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Association {
    /// `(track_index, observation_index)` pairs
    pub pairs: Vec<(usize, usize)>,
    pub unassociated_observations: Vec<usize>,
    pub unassociated_tracks: Vec<usize>,
}

impl Association {
    /// Complete a set of accepted pairs with everything left over.
    pub fn from_pairs(pairs: Vec<(usize, usize)>, observation_count: usize, track_count: usize) -> Self {
        let mut observation_used = vec![false; observation_count];
        let mut track_used = vec![false; track_count];
        for &(track, obs) in &pairs {
            track_used[track] = true;
            observation_used[obs] = true;
        }

        Self {
            pairs,
            unassociated_observations: unused_indices(&observation_used),
            unassociated_tracks: unused_indices(&track_used),
        }
    }
}

fn unused_indices(used: &[bool]) -> Vec<usize> {
    used.iter()
        .enumerate()
        .filter(|(_, &u)| !u)
        .map(|(i, _)| i)
        .collect()
}

/// Pairwise Euclidean distances, tracks as rows and observations as columns.
pub fn distance_matrix<C>(tracks: &[TrackedObject<C>], observations: &[Observation]) -> DMatrix<f64> {
    DMatrix::from_fn(tracks.len(), observations.len(), |t, o| {
        (tracks[t].position - observations[o].position).norm()
    })
}

/// How a tracker matches observations to tracks and updates them.
pub trait AssociationStrategy {
    /// Per-track estimation state owned by each [`TrackedObject`].
    type Context: Clone + fmt::Debug;

    fn name(&self) -> &'static str;

    /// Build the context of a track registered from `observation`.
    fn init_context(&self, observation: &Observation, now: Duration) -> Self::Context;

    /// Match observations to tracks.
    ///
    /// May mutate tracks (the Kalman strategy advances every track to `now`
    /// before matching), but must not add or remove any.
    fn associate(
        &self,
        observations: &[Observation],
        tracks: &mut [TrackedObject<Self::Context>],
        now: Duration,
    ) -> Association;

    /// Fold an associated observation into its track.
    fn absorb(
        &self,
        track: &mut TrackedObject<Self::Context>,
        observation: &Observation,
        now: Duration,
    ) -> Result<(), TrackingError>;
}

// ============================================================================
// NEAREST NEIGHBOR
// ============================================================================

/// Greedy nearest-neighbor matching with position overwrite.
///
/// Tracks are served in order of their own closest observation; each one
/// takes its nearest observation that no earlier track claimed. There is no
/// gating, so any track can be matched while observations remain.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestNeighbor;

impl AssociationStrategy for NearestNeighbor {
    type Context = ();

    fn name(&self) -> &'static str {
        "nearest"
    }

    fn init_context(&self, _observation: &Observation, _now: Duration) {}

    fn associate(
        &self,
        observations: &[Observation],
        tracks: &mut [TrackedObject<()>],
        _now: Duration,
    ) -> Association {
        if tracks.is_empty() || observations.is_empty() {
            return Association::from_pairs(Vec::new(), observations.len(), tracks.len());
        }

        let distances = distance_matrix(tracks, observations);

        let mut order: Vec<(usize, f64)> = distances
            .row_iter()
            .enumerate()
            .map(|(t, row)| (t, row.min()))
            .collect();
        order.sort_by(|a, b| a.1.total_cmp(&b.1));

        let mut taken = vec![false; observations.len()];
        let mut pairs = Vec::new();

        for (track, _) in order {
            let best = (0..observations.len())
                .filter(|&o| !taken[o])
                .min_by(|&a, &b| distances[(track, a)].total_cmp(&distances[(track, b)]));

            match best {
                Some(obs) => {
                    taken[obs] = true;
                    pairs.push((track, obs));
                }
                None => break,
            }
        }

        pairs.sort_unstable();
        Association::from_pairs(pairs, observations.len(), tracks.len())
    }

    fn absorb(
        &self,
        track: &mut TrackedObject<()>,
        observation: &Observation,
        _now: Duration,
    ) -> Result<(), TrackingError> {
        track.position = observation.position;
        Ok(())
    }
}

// ============================================================================
// KALMAN (OPTIMAL ASSIGNMENT)
// ============================================================================

/// Predict-then-assign matching with a constant-velocity filter per track.
///
/// Every track is advanced to `now` before matching, so the cost matrix
/// compares observations with where each object is expected to be. Pairs at
/// or beyond `gating_threshold` are rejected after the global assignment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KalmanAssociation {
    pub filter: KalmanConfig,

    /// Largest accepted distance, exclusive (default: 10)
    pub gating_threshold: f64,
}

impl Default for KalmanAssociation {
    fn default() -> Self {
        Self {
            filter: KalmanConfig::default(),
            gating_threshold: 10.0,
        }
    }
}

impl KalmanAssociation {
    pub fn new(gating_threshold: f64) -> Self {
        Self {
            gating_threshold,
            ..Default::default()
        }
    }
}

impl AssociationStrategy for KalmanAssociation {
    type Context = ConstantVelocityFilter;

    fn name(&self) -> &'static str {
        "kalman"
    }

    fn init_context(&self, observation: &Observation, now: Duration) -> ConstantVelocityFilter {
        ConstantVelocityFilter::start(observation.position, now, &self.filter)
    }

    fn associate(
        &self,
        observations: &[Observation],
        tracks: &mut [TrackedObject<ConstantVelocityFilter>],
        now: Duration,
    ) -> Association {
        // Unmatched tracks keep the predicted position
        for track in tracks.iter_mut() {
            track.context.predict(now);
            track.position = track.context.position();
        }

        if tracks.is_empty() || observations.is_empty() {
            return Association::from_pairs(Vec::new(), observations.len(), tracks.len());
        }

        let distances = distance_matrix(tracks, observations);
        let pairs = assignment::solve(&distances)
            .into_iter()
            .filter(|&(t, o)| distances[(t, o)] < self.gating_threshold)
            .collect();

        Association::from_pairs(pairs, observations.len(), tracks.len())
    }

    fn absorb(
        &self,
        track: &mut TrackedObject<ConstantVelocityFilter>,
        observation: &Observation,
        now: Duration,
    ) -> Result<(), TrackingError> {
        track.context.update(&observation.position, now)?;
        track.position = track.context.position();
        Ok(())
    }
}

// ============================================================================
// RUNTIME SELECTION
// ============================================================================

/// Which strategy a service runs, chosen once at construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerKind {
    #[default]
    Kalman,
    Nearest,
}

impl TrackerKind {
    /// Build a tracker of this kind behind the object-safe engine interface.
    ///
    /// `gating_threshold` only applies to [`TrackerKind::Kalman`].
    pub fn build(
        self,
        config: TrackerConfig,
        gating_threshold: f64,
        context: Arc<dyn CircumContext>,
    ) -> Box<dyn TrackingEngine> {
        match self {
            TrackerKind::Kalman => Box::new(ObjectTracker::new(
                KalmanAssociation::new(gating_threshold),
                config,
                context,
            )),
            TrackerKind::Nearest => Box::new(ObjectTracker::new(NearestNeighbor, config, context)),
        }
    }
}

impl fmt::Display for TrackerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackerKind::Kalman => write!(f, "kalman"),
            TrackerKind::Nearest => write!(f, "nearest"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use circum_env::ManualContext;
    use nalgebra::Vector3;
    use std::collections::HashMap;

    fn square() -> Vec<Observation> {
        vec![
            Observation::new(0.0, 0.0, 0.0),
            Observation::new(1.0, 0.0, 0.0),
            Observation::new(0.0, 1.0, 0.0),
            Observation::new(1.0, 1.0, 0.0),
        ]
    }

    fn shifted_square() -> Vec<Observation> {
        vec![
            Observation::new(0.1, 0.0, 0.0),
            Observation::new(0.9, 0.0, 0.0),
            Observation::new(0.1, 1.0, 0.0),
            Observation::new(0.9, 1.0, 0.0),
        ]
    }

    fn crossing_midway() -> Vec<Observation> {
        vec![
            Observation::new(0.0, 0.3, 0.0),
            Observation::new(1.0, 0.3, 0.0),
            Observation::new(0.0, 0.7, 0.0),
            Observation::new(1.0, 0.7, 0.0),
        ]
    }

    fn crossing_end() -> Vec<Observation> {
        vec![
            Observation::new(0.0, 0.6, 0.0),
            Observation::new(1.0, 0.6, 0.0),
            Observation::new(0.0, 0.4, 0.0),
            Observation::new(1.0, 0.4, 0.0),
        ]
    }

    fn kalman_tracker() -> (ObjectTracker<KalmanAssociation>, ManualContext) {
        let clock = ManualContext::new();
        let tracker = ObjectTracker::new(
            KalmanAssociation::default(),
            TrackerConfig::default(),
            Arc::new(clock.clone()),
        );
        (tracker, clock)
    }

    fn nearest_tracker() -> (ObjectTracker<NearestNeighbor>, ManualContext) {
        let clock = ManualContext::new();
        let tracker = ObjectTracker::new(NearestNeighbor, TrackerConfig::default(), Arc::new(clock.clone()));
        (tracker, clock)
    }

    fn positions_by_id<C>(tracks: &[TrackedObject<C>]) -> HashMap<u64, Vector3<f64>> {
        tracks.iter().map(|t| (t.id, t.position)).collect()
    }

    /// Map each track id to the index of the observation it was created from.
    fn origin_index<C>(tracks: &[TrackedObject<C>], observations: &[Observation]) -> HashMap<u64, usize> {
        tracks
            .iter()
            .map(|t| {
                let index = observations
                    .iter()
                    .position(|o| o.position == t.position)
                    .unwrap();
                (t.id, index)
            })
            .collect()
    }

    // ========================================================================
    // ASSOCIATION RESULT
    // ========================================================================

    #[test]
    fn test_from_pairs_fills_leftovers() {
        let association = Association::from_pairs(vec![(0, 2), (2, 0)], 4, 3);

        assert_eq!(association.unassociated_observations, vec![1, 3]);
        assert_eq!(association.unassociated_tracks, vec![1]);
    }

    // ========================================================================
    // NEAREST NEIGHBOR
    // ========================================================================

    #[test]
    fn test_nearest_simple_update() {
        let (mut tracker, clock) = nearest_tracker();
        clock.set_time(Duration::from_secs(1));

        tracker.update(&square());

        let tracks = tracker.objects();
        assert_eq!(tracks.len(), 4);
        for obs in square() {
            assert!(tracks.iter().any(|t| t.position == obs.position));
        }
    }

    #[test]
    fn test_nearest_stable_association() {
        let (mut tracker, clock) = nearest_tracker();
        clock.set_time(Duration::from_secs(1));

        tracker.update(&square());
        let before = positions_by_id(&tracker.objects());
        tracker.update(&square());
        let after = positions_by_id(&tracker.objects());

        assert_eq!(before, after);
    }

    #[test]
    fn test_nearest_10_pct_delta() {
        let (mut tracker, clock) = nearest_tracker();
        clock.set_time(Duration::from_secs(1));

        tracker.update(&square());
        let before = positions_by_id(&tracker.objects());
        tracker.update(&shifted_square());
        let after = positions_by_id(&tracker.objects());

        assert_eq!(before.len(), after.len());
        for (id, pos) in &before {
            assert!((pos - after[id]).norm() < 0.2);
        }
    }

    #[test]
    fn test_nearest_permanence() {
        let (mut tracker, clock) = nearest_tracker();
        clock.set_time(Duration::from_secs(1));

        tracker.update(&square());
        let before = positions_by_id(&tracker.objects());
        tracker.update(&[]);
        let after = positions_by_id(&tracker.objects());

        assert_eq!(before, after);
    }

    #[test]
    fn test_nearest_takes_next_free_observation() {
        let mut tracks = vec![
            TrackedObject { id: 0, position: Vector3::new(0.0, 0.0, 0.0), created: Duration::ZERO, last_seen: Duration::ZERO, context: (), history: Default::default() },
            TrackedObject { id: 1, position: Vector3::new(0.4, 0.0, 0.0), created: Duration::ZERO, last_seen: Duration::ZERO, context: (), history: Default::default() },
        ];
        let observations = vec![Observation::new(0.5, 0.0, 0.0), Observation::new(-1.0, 0.0, 0.0)];

        let association = NearestNeighbor.associate(&observations, &mut tracks, Duration::ZERO);

        // Track 1 is closest to anything, so it claims obs 0 first
        assert_eq!(association.pairs, vec![(0, 1), (1, 0)]);
        assert!(association.unassociated_observations.is_empty());
    }

    #[test]
    fn test_nearest_swaps_on_crossover() {
        let (mut tracker, clock) = nearest_tracker();

        clock.set_time(Duration::from_secs(1));
        tracker.update(&square());
        let origin = origin_index(&tracker.objects(), &square());

        clock.set_time(Duration::from_secs(2));
        tracker.update(&crossing_midway());
        clock.set_time(Duration::from_secs(3));
        tracker.update(&crossing_end());

        // Without a motion model each object jumps to the closer of the two crossing paths
        let swapped = tracker
            .objects()
            .iter()
            .filter(|t| (crossing_end()[origin[&t.id]].position - t.position).norm() > 0.1)
            .count();
        assert_eq!(swapped, 4);
    }

    // ========================================================================
    // KALMAN
    // ========================================================================

    #[test]
    fn test_kalman_simple_update() {
        let (mut tracker, clock) = kalman_tracker();
        clock.set_time(Duration::from_secs(1));

        tracker.update(&square());

        let tracks = tracker.objects();
        assert_eq!(tracks.len(), 4);
        for obs in square() {
            assert!(tracks.iter().any(|t| t.position == obs.position));
        }
        assert!(tracks.iter().all(|t| t.context.velocity() == Vector3::zeros()));
    }

    #[test]
    fn test_kalman_stable_association() {
        let (mut tracker, clock) = kalman_tracker();

        clock.set_time(Duration::from_secs(1));
        tracker.update(&square());
        let before = positions_by_id(&tracker.objects());

        clock.set_time(Duration::from_secs(2));
        tracker.update(&square());
        let after = positions_by_id(&tracker.objects());

        assert_eq!(before, after);
    }

    #[test]
    fn test_kalman_10_pct_delta() {
        let (mut tracker, clock) = kalman_tracker();

        clock.set_time(Duration::from_secs(1));
        tracker.update(&square());
        let before = positions_by_id(&tracker.objects());

        clock.set_time(Duration::from_secs(2));
        tracker.update(&shifted_square());
        let after = positions_by_id(&tracker.objects());

        assert_eq!(before.len(), after.len());
        for (id, pos) in &before {
            assert!((pos - after[id]).norm() < 0.2);
        }
    }

    #[test]
    fn test_kalman_crossover_tricky() {
        let (mut tracker, clock) = kalman_tracker();

        clock.set_time(Duration::from_secs(1));
        tracker.update(&square());
        let start = tracker.objects();
        let origin = origin_index(&start, &square());

        clock.set_time(Duration::from_secs(2));
        tracker.update(&crossing_midway());
        clock.set_time(Duration::from_secs(3));
        tracker.update(&crossing_end());

        let end = tracker.objects();
        assert_eq!(start.len(), end.len());
        for track in &end {
            let expected = crossing_end()[origin[&track.id]].position;
            assert!(
                (expected - track.position).amax() < 0.001,
                "track {} at {:?}, expected {:?}",
                track.id,
                track.position,
                expected
            );
        }
    }

    #[test]
    fn test_kalman_predictive_tracking() {
        let (mut tracker, clock) = kalman_tracker();

        clock.set_time(Duration::from_secs(1));
        tracker.update(&square());
        let start = tracker.objects();
        let origin = origin_index(&start, &square());

        clock.set_time(Duration::from_secs(2));
        tracker.update(&crossing_midway());
        clock.set_time(Duration::from_secs(3));
        let report = tracker.update(&[]);

        // Nothing observed, so every track rests where the filter predicts it
        assert_eq!(report.associated, 0);
        let end = tracker.objects();
        assert_eq!(start.len(), end.len());
        for track in &end {
            let expected = crossing_end()[origin[&track.id]].position;
            assert!((expected - track.position).amax() < 0.001);
            assert_eq!(track.last_seen, Duration::from_secs(2));
        }
    }

    #[test]
    fn test_kalman_gating_rejects_far_observation() {
        let (mut tracker, clock) = kalman_tracker();

        clock.set_time(Duration::from_secs(1));
        tracker.update(&[Observation::new(0.0, 0.0, 0.0)]);

        clock.set_time(Duration::from_secs(2));
        let report = tracker.update(&[Observation::new(10.0, 0.0, 0.0)]);

        // Distance of exactly the threshold is not accepted
        assert_eq!(report.created, vec![1]);
        assert_eq!(report.associated, 0);
        assert_eq!(tracker.get(0).unwrap().position, Vector3::zeros());
        assert_eq!(tracker.get(1).unwrap().position, Vector3::new(10.0, 0.0, 0.0));
    }

    #[test]
    fn test_kalman_gating_accepts_near_observation() {
        let (mut tracker, clock) = kalman_tracker();

        clock.set_time(Duration::from_secs(1));
        tracker.update(&[Observation::new(0.0, 0.0, 0.0)]);

        clock.set_time(Duration::from_secs(2));
        let report = tracker.update(&[Observation::new(9.0, 0.0, 0.0)]);

        assert!(report.created.is_empty());
        assert_eq!(tracker.len(), 1);
        assert!(tracker.get(0).unwrap().position.x > 8.9);
    }

    #[test]
    fn test_kalman_more_observations_than_tracks() {
        let (mut tracker, clock) = kalman_tracker();

        clock.set_time(Duration::from_secs(1));
        tracker.update(&[Observation::new(1.0, 0.0, 0.0)]);

        clock.set_time(Duration::from_secs(2));
        let report = tracker.update(&[Observation::new(5.0, 5.0, 0.0), Observation::new(1.0, 0.1, 0.0)]);

        assert_eq!(report.associated, 1);
        assert_eq!(report.created, vec![1]);
        assert_eq!(tracker.get(1).unwrap().position, Vector3::new(5.0, 5.0, 0.0));
    }

    #[test]
    fn test_singular_update_fails_only_that_track() {
        // Zero measurement noise and zero initial position variance: a track
        // corrected at its own creation instant has a singular innovation.
        let clock = ManualContext::new();
        let strategy = KalmanAssociation {
            filter: KalmanConfig {
                measurement_noise: 0.0,
                initial_position_variance: 0.0,
                ..Default::default()
            },
            gating_threshold: 10.0,
        };
        let mut tracker = ObjectTracker::new(strategy, TrackerConfig::default(), Arc::new(clock.clone()));

        tracker.update(&[Observation::new(0.0, 0.0, 0.0)]);

        // Too far to gate with track 0, so track 1 is born at t=1
        clock.set_time(Duration::from_secs(1));
        let report = tracker.update(&[Observation::new(20.0, 0.0, 0.0)]);
        assert_eq!(report.created, vec![1]);

        // Same instant: track 0 has grown uncertain since t=0, track 1 has not
        let report = tracker.update(&[Observation::new(0.5, 0.0, 0.0), Observation::new(20.0, 0.0, 0.0)]);

        assert_eq!(report.failed, vec![1]);
        assert_eq!(report.associated, 1);
        assert!(report.created.is_empty());
        assert_eq!(tracker.len(), 2);

        let absorbed = tracker.get(0).unwrap();
        assert!((absorbed.position.x - 0.5).abs() < 1e-6);
        assert_eq!(absorbed.last_seen, Duration::from_secs(1));

        let failed = tracker.get(1).unwrap();
        assert_eq!(failed.position, Vector3::new(20.0, 0.0, 0.0));
    }

    // ========================================================================
    // ENGINE
    // ========================================================================

    #[test]
    fn test_tracker_kind_builds_engine() {
        let clock: Arc<dyn CircumContext> = Arc::new(ManualContext::new());

        let mut engine = TrackerKind::Nearest.build(TrackerConfig::default(), 10.0, clock.clone());
        assert_eq!(engine.strategy_name(), "nearest");
        engine.update(&square());
        assert_eq!(engine.track_count(), 4);

        let engine = TrackerKind::Kalman.build(TrackerConfig::default(), 10.0, clock);
        assert_eq!(engine.strategy_name(), "kalman");
        assert!(engine.reports().is_empty());
    }

    #[test]
    fn test_tracker_kind_serde() {
        assert_eq!(serde_json::to_string(&TrackerKind::Nearest).unwrap(), "\"nearest\"");
        assert_eq!(TrackerKind::Kalman.to_string(), "kalman");
    }
}
