use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::value::ValueKey;

/// Uniform `[0, 1)` samples memoized per input key.
///
/// The memo is never pruned; it lives as long as the sampler does.
#[derive(Debug, Clone)]
pub struct RandomSampler {
    samples: HashMap<ValueKey, f32>,
    rng: StdRng,
}

impl RandomSampler {
    pub fn from_entropy() -> Self {
        Self {
            samples: HashMap::new(),
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            samples: HashMap::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn sample(&mut self, key: ValueKey) -> f32 {
        let rng = &mut self.rng;
        *self.samples.entry(key).or_insert_with(|| rng.gen::<f32>())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Keeps the memo, replaces the generator.
    pub(crate) fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }
}
