//! Random number generators.
//!
//! There is one process wide default generator, created lazily and reseeded
//! with [`manual_seed`]. Kernels that need randomness get a generator handed to
//! them explicitly, either the interpreter's or one passed as kernel state.

use crate::device::Device;
use crate::error::StrataError;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex, OnceLock};

/// Seeded random number generator bound to a device
#[derive(Debug)]
pub struct Generator {
    device: Device,
    state: Mutex<(u64, SmallRng)>,
}

impl Generator {
    /// New generator with given seed
    #[must_use]
    pub fn new(device: Device, seed: u64) -> Self {
        Self { device, state: Mutex::new((seed, SmallRng::seed_from_u64(seed))) }
    }

    /// Device this generator produces numbers for
    #[must_use]
    pub const fn device(&self) -> Device {
        self.device
    }

    /// Reset the generator to the beginning of the stream of seed
    pub fn set_current_seed(&self, seed: u64) {
        let mut state = self.lock();
        *state = (seed, SmallRng::seed_from_u64(seed));
    }

    /// Seed this generator was last seeded with
    #[must_use]
    pub fn current_seed(&self) -> u64 {
        self.lock().0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, (u64, SmallRng)> {
        // Poisoning only means another thread panicked mid sample, the rng state is still valid
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Uniformly distributed values in range low..high
    #[must_use]
    pub fn uniform(&self, n: usize, low: f64, high: f64) -> Vec<f64> {
        let mut state = self.lock();
        (0..n).map(|_| low + (high - low) * state.1.gen::<f64>()).collect()
    }

    /// Normally distributed values, Box-Muller transform
    #[must_use]
    pub fn normal(&self, n: usize, mean: f64, std: f64) -> Vec<f64> {
        let mut state = self.lock();
        let rng = &mut state.1;
        let mut res = Vec::with_capacity(n + 1);
        while res.len() < n {
            let u1: f64 = 1.0 - rng.gen::<f64>();
            let u2: f64 = rng.gen::<f64>();
            let r = (-2.0 * u1.ln()).sqrt();
            let theta = 2.0 * std::f64::consts::PI * u2;
            res.push(mean + std * r * theta.cos());
            res.push(mean + std * r * theta.sin());
        }
        res.truncate(n);
        res
    }
}

/// Create new generator on device, unseeded generators get a random seed
pub fn create_generator(device: &str, seed: Option<u64>) -> Result<Arc<Generator>, StrataError> {
    let device: Device = device.parse()?;
    let seed = seed.unwrap_or_else(rand::random);
    Ok(Arc::new(Generator::new(device, seed)))
}

const DEFAULT_SEED: u64 = 420_694_206_942_069;

static DEFAULT_GENERATOR: OnceLock<Arc<Generator>> = OnceLock::new();

/// Process wide default generator
pub fn default_generator() -> Arc<Generator> {
    DEFAULT_GENERATOR
        .get_or_init(|| Arc::new(Generator::new(Device::cpu(0), DEFAULT_SEED)))
        .clone()
}

/// Reseed the process wide default generator
pub fn manual_seed(seed: u64) -> Arc<Generator> {
    let generator = default_generator();
    generator.set_current_seed(seed);
    generator
}

/// Generates keep masks for dropout
#[derive(Debug, Clone)]
pub struct RandomMaskGenerator {
    generator: Arc<Generator>,
}

impl RandomMaskGenerator {
    /// Mask generator drawing from generator
    #[must_use]
    pub fn new(generator: Arc<Generator>) -> Self {
        Self { generator }
    }

    /// n mask values, each 1 with probability 1 - rate
    #[must_use]
    pub fn generate(&self, n: usize, rate: f32) -> Vec<i8> {
        self.generator.uniform(n, 0.0, 1.0).into_iter().map(|x| i8::from(x >= f64::from(rate))).collect()
    }
}
