//! # RandomNumberGenerator
//!
//! A thin wrapper over `StdRng` used by every randomized component of the
//! optimizer: poll directions, random dispatch ordering, Latin hypercube
//! sampling and variable subsets for space decomposition. Seeding it makes a
//! whole run reproducible.
//!
//! ## Example
//!
//! ```rust
//! use mads::rng::RandomNumberGenerator;
//!
//! let mut rng = RandomNumberGenerator::from_seed(7);
//! let direction = rng.unit_normal(3);
//! assert_eq!(direction.len(), 3);
//! ```

use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};

/// A wrapper around the `rand` crate's `StdRng`.
#[derive(Clone, Debug)]
pub struct RandomNumberGenerator {
    pub rng: StdRng,
}

impl RandomNumberGenerator {
    /// Creates a new `RandomNumberGenerator` instance seeded from the system entropy.
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Creates a new `RandomNumberGenerator` instance with a specific seed.
    ///
    /// # Arguments
    ///
    /// * `seed` - The seed to use for the random number generator.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Derives an independent generator, for sub-runs that need their own stream.
    pub fn fork(&mut self) -> Self {
        Self::from_seed(self.rng.gen())
    }

    /// Generates `num` uniform values in `[from, to)`.
    pub fn fetch_uniform(&mut self, from: f64, to: f64, num: usize) -> Vec<f64> {
        (0..num).map(|_| self.rng.gen_range(from..to)).collect()
    }

    /// A single uniform value in `[0, 1)`.
    pub fn unit(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    /// Draws `n` independent standard normal values.
    ///
    /// Normalized, such a vector is uniformly distributed on the unit sphere,
    /// which is how the random poll strategies pick their seed direction.
    pub fn unit_normal(&mut self, n: usize) -> Vec<f64> {
        (0..n)
            .map(|_| {
                let value: f64 = StandardNormal.sample(&mut self.rng);
                value
            })
            .collect()
    }

    /// A random permutation of `0..n`.
    pub fn permutation(&mut self, n: usize) -> Vec<usize> {
        let mut perm: Vec<usize> = (0..n).collect();
        perm.shuffle(&mut self.rng);
        perm
    }

    /// `k` distinct indices from `0..n`, sorted increasingly.
    pub fn subset(&mut self, n: usize, k: usize) -> Vec<usize> {
        let mut picked = rand::seq::index::sample(&mut self.rng, n, k.min(n)).into_vec();
        picked.sort_unstable();
        picked
    }
}

impl Default for RandomNumberGenerator {
    fn default() -> Self {
        Self::new()
    }
}
