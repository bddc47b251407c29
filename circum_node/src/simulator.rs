//! Synthetic sensor for demos and end-to-end tests.
//!
//! Between one and four point objects drift across a 10 m by 10 m floor at
//! constant speed and fixed height, bouncing off its walls. The simulation advances one step per elapsed
//! `step_interval` of the context clock, so it runs in real time under
//! [`SystemContext`](circum_env::SystemContext) and on demand under
//! [`ManualContext`](circum_env::ManualContext).

use circum_env::{CircumContext, EndpointSnapshot, Position, SensorSource};
use nalgebra::Vector3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Walls of the box objects bounce between, per axis.
pub const ARENA: (f64, f64) = (0.0, 10.0);

/// Objects spawn below this height and never leave it.
pub const MAX_HEIGHT: f64 = 3.0;

/// Largest speed an object is spawned with, in meters per step.
pub const MAX_SPEED: f64 = 2.0;

/// Configuration for a [`SimulatedSensor`].
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    /// Number of objects; 0 picks between 1 and 4 at random (default: 0)
    pub objects: usize,

    /// Simulated time per step (default: 500ms)
    pub step_interval: Duration,

    /// RNG seed; drawn at random and logged when unset
    pub seed: Option<u64>,

    /// Standard deviation of Gaussian noise on reported positions (default: 0)
    pub noise_std: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            objects: 0,
            step_interval: Duration::from_millis(500),
            seed: None,
            noise_std: 0.0,
        }
    }
}

/// A simulated point object.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Body {
    position: Vector3<f64>,
    velocity: Vector3<f64>,
}

impl Body {
    fn spawn(rng: &mut ChaCha8Rng) -> Self {
        let position = Vector3::new(
            rng.gen_range(ARENA.0..ARENA.1),
            rng.gen_range(ARENA.0..ARENA.1),
            rng.gen_range(0.0..MAX_HEIGHT),
        );

        // Horizontal heading only
        let heading = Vector3::new(rng.gen::<f64>(), rng.gen::<f64>(), 0.0);
        let speed = rng.gen_range(0.0..MAX_SPEED);
        let velocity = heading.try_normalize(f64::EPSILON).unwrap_or_else(Vector3::zeros) * speed;

        Self { position, velocity }
    }

    fn step(&mut self) {
        for axis in 0..3 {
            let p = self.position[axis];
            let v = self.velocity[axis];
            if (p > ARENA.1 && v > 0.0) || (p < ARENA.0 && v < 0.0) {
                self.velocity[axis] = -v;
            }
        }
        self.position += self.velocity;
    }
}

/// [`SensorSource`] backed by a seeded random simulation.
pub struct SimulatedSensor {
    bodies: Vec<Body>,
    rng: ChaCha8Rng,
    noise: Option<Normal<f64>>,
    step_interval: Duration,
    context: Arc<dyn CircumContext>,
    /// Clock reading the last published step corresponds to
    stepped_at: Option<Duration>,
    seed: u64,
}

impl SimulatedSensor {
    pub fn new(config: SimulatorConfig, context: Arc<dyn CircumContext>) -> Self {
        let seed = config.seed.unwrap_or_else(rand::random);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let count = match config.objects {
            0 => rng.gen_range(1..=4),
            n => n,
        };
        let bodies = (0..count).map(|_| Body::spawn(&mut rng)).collect();

        let noise = if config.noise_std > 0.0 {
            Normal::new(0.0, config.noise_std).ok()
        } else {
            None
        };

        info!(seed, objects = count, "simulator started");

        Self {
            bodies,
            rng,
            noise,
            step_interval: config.step_interval,
            context,
            stepped_at: None,
            seed,
        }
    }

    /// Seed the simulation was started from.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn object_count(&self) -> usize {
        self.bodies.len()
    }

    /// Advance every object by one step.
    pub fn step(&mut self) {
        for body in &mut self.bodies {
            body.step();
        }
    }

    /// True positions, without noise.
    pub fn positions(&self) -> Vec<Position> {
        self.bodies
            .iter()
            .map(|b| Position::new(b.position.x, b.position.y, b.position.z))
            .collect()
    }

    fn observe(&mut self) -> EndpointSnapshot {
        let mut objects = self.positions();
        if let Some(noise) = self.noise {
            for p in &mut objects {
                p.x += noise.sample(&mut self.rng);
                p.y += noise.sample(&mut self.rng);
                p.z += noise.sample(&mut self.rng);
            }
        }
        EndpointSnapshot::new(objects)
    }
}

impl SensorSource for SimulatedSensor {
    fn driver(&self) -> &str {
        "simulator"
    }

    /// Publishes the spawn state on the first poll, then only after at least
    /// one step has elapsed since the previous publication.
    fn poll(&mut self) -> Option<EndpointSnapshot> {
        let now = self.context.now();

        let Some(last) = self.stepped_at else {
            self.stepped_at = Some(now);
            return Some(self.observe());
        };

        let interval = self.step_interval.as_nanos().max(1);
        let steps = now.saturating_sub(last).as_nanos() / interval;
        if steps == 0 {
            return None;
        }

        for _ in 0..steps {
            self.step();
        }
        let advanced = self.step_interval.saturating_mul(u32::try_from(steps).unwrap_or(u32::MAX));
        self.stepped_at = Some(last + advanced);
        debug!(steps, "simulation advanced");

        Some(self.observe())
    }
}
