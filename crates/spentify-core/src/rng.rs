//! Random number generator abstraction for determinism.
//!
//! Retry backoff is jittered. In production the jitter comes from the
//! thread-local RNG; tests inject a fixed sequence.

use rand::Rng;

/// Abstraction over random number generation.
pub trait DeterministicRng: Send {
    /// Generate a random `f64` in `[0.0, 1.0)`.
    fn next_f64(&mut self) -> f64;
}

/// Production RNG backed by `rand`'s thread-local generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRng;

impl DeterministicRng for SystemRng {
    fn next_f64(&mut self) -> f64 {
        rand::rng().random::<f64>()
    }
}
