//! Test RNG for retry jitter.

use spentify_core::rng::DeterministicRng;

/// Always returns 0.5, which makes jittered backoff equal its base delay.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockRng;

impl DeterministicRng for MockRng {
    fn next_f64(&mut self) -> f64 {
        0.5
    }
}
