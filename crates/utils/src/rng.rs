use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Random source shared by every pass in a pipeline run.
///
/// Two modes: `seeded` gives a reproducible stream for tests and
/// determinism checks, `unpredictable` draws the seed from the OS for
/// production hardening. All passes consume the same instance by mutable
/// reference, so output under a fixed seed depends only on pass order.
#[derive(Debug)]
pub struct ObfRng {
    rng: StdRng,
    seed: Option<u64>,
}

impl ObfRng {
    /// Deterministic stream for a fixed seed.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            seed: Some(seed),
        }
    }

    /// OS-entropy stream for production use.
    pub fn unpredictable() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
            seed: None,
        }
    }

    /// The seed this source was constructed with, if deterministic.
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn next_u32(&mut self) -> u32 {
        self.rng.random()
    }

    pub fn next_u64(&mut self) -> u64 {
        self.rng.random()
    }

    /// A uniform value masked to `bits` (1..=64).
    pub fn next_uint(&mut self, bits: u32) -> u64 {
        let raw: u64 = self.rng.random();
        if bits >= 64 {
            raw
        } else {
            raw & ((1u64 << bits) - 1)
        }
    }

    /// Uniform index in `[0, n)`. `n` must be non-zero.
    pub fn index(&mut self, n: usize) -> usize {
        self.rng.random_range(0..n)
    }

    /// Uniform value in `[lo, hi)`.
    pub fn range_u64(&mut self, lo: u64, hi: u64) -> u64 {
        self.rng.random_range(lo..hi)
    }

    pub fn coin(&mut self) -> bool {
        self.rng.random_bool(0.5)
    }

    /// Derive an independent seed for a collaborator (e.g. the oracle)
    /// while keeping the whole run a function of the original seed.
    pub fn fork_seed(&mut self) -> u64 {
        self.rng.random()
    }

    /// Access to the underlying rng for `rand` trait adaptors (shuffle).
    pub fn inner(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}
