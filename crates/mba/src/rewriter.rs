//! Coefficient cache in front of the oracle.
//!
//! Solving is expensive and, for a fixed seed, deterministic, so every
//! solved configuration is memoized for the lifetime of the rewriter.
//! `clear` exists for long-running hosts and tests that need isolation.

use std::collections::HashMap;

use veil_utils::errors::SolveError;

use crate::solver::{CoeffBounds, Oracle, PolyPair, Solution, SolveSpec};

/// Binary operations the linear-basis rewrite supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MbaOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
}

impl MbaOp {
    /// Target values of the operation on the four one-bit input
    /// combinations (0,0), (0,1), (1,0), (1,1).
    pub fn target(self) -> [i64; 4] {
        match self {
            Self::Add => [0, 1, 1, 2],
            Self::Sub => [0, -1, 1, 0],
            Self::And => [0, 0, 0, 1],
            Self::Or => [0, 1, 1, 1],
            Self::Xor => [0, 1, 1, 0],
        }
    }

    fn tag(self) -> u64 {
        match self {
            Self::Add => 1,
            Self::Sub => 2,
            Self::And => 3,
            Self::Or => 4,
            Self::Xor => 5,
        }
    }
}

/// Memoization key: one entry per operation/width (linear variant) or per
/// width (permutation variant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Linear(MbaOp, u32),
    Permutation(u32),
}

impl CacheKey {
    fn mix(self) -> u64 {
        let raw = match self {
            Self::Linear(op, bits) => (op.tag() << 8) | u64::from(bits),
            Self::Permutation(bits) => (0xFF << 8) | u64::from(bits),
        };
        raw.wrapping_mul(0x9E37_79B9_7F4A_7C15)
    }
}

/// Oracle-backed rewriter state shared across passes in a pipeline.
pub struct MbaRewriter {
    oracle: Box<dyn Oracle>,
    cache: HashMap<CacheKey, Solution>,
    bounds: CoeffBounds,
    seed: u64,
    oracle_calls: u64,
}

impl std::fmt::Debug for MbaRewriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MbaRewriter")
            .field("cached", &self.cache.len())
            .field("bounds", &self.bounds)
            .field("seed", &self.seed)
            .field("oracle_calls", &self.oracle_calls)
            .finish()
    }
}

impl MbaRewriter {
    pub fn new(oracle: Box<dyn Oracle>, seed: u64) -> Self {
        Self {
            oracle,
            cache: HashMap::new(),
            bounds: CoeffBounds::default(),
            seed,
            oracle_calls: 0,
        }
    }

    /// Default oracle, given seed.
    pub fn seeded(seed: u64) -> Self {
        Self::new(Box::new(crate::solver::LinearSystemOracle), seed)
    }

    pub fn with_bounds(mut self, bounds: CoeffBounds) -> Self {
        self.bounds = bounds;
        self
    }

    /// Linear-basis coefficients for `op` at `bits`; cache-first, one
    /// oracle invocation per distinct key per rewriter lifetime.
    pub fn linear_coeffs(&mut self, op: MbaOp, bits: u32) -> Result<[i64; 15], SolveError> {
        let key = CacheKey::Linear(op, bits);
        if let Some(Solution::Linear(c)) = self.cache.get(&key) {
            return Ok(*c);
        }
        let spec = SolveSpec::Linear { target: op.target() };
        self.oracle_calls += 1;
        let sol = self.oracle.solve(&spec, &self.bounds, self.request_seed(key))?;
        self.cache.insert(key, sol);
        match sol {
            Solution::Linear(c) => Ok(c),
            Solution::Permutation(_) => Err(SolveError::Unsatisfiable),
        }
    }

    /// Permutation-polynomial pair for `bits`; cache-first.
    pub fn permutation(&mut self, bits: u32) -> Result<PolyPair, SolveError> {
        let key = CacheKey::Permutation(bits);
        if let Some(Solution::Permutation(p)) = self.cache.get(&key) {
            return Ok(*p);
        }
        let spec = SolveSpec::Permutation { bits };
        self.oracle_calls += 1;
        let sol = self.oracle.solve(&spec, &self.bounds, self.request_seed(key))?;
        self.cache.insert(key, sol);
        match sol {
            Solution::Permutation(p) => Ok(p),
            Solution::Linear(_) => Err(SolveError::Unsatisfiable),
        }
    }

    /// Drop every cached solution.
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    /// Number of times the oracle has actually been consulted.
    pub fn oracle_calls(&self) -> u64 {
        self.oracle_calls
    }

    pub fn bounds(&self) -> CoeffBounds {
        self.bounds
    }

    /// Per-key seed so distinct requests explore independent spaces while
    /// the whole rewriter stays a function of its base seed.
    fn request_seed(&self, key: CacheKey) -> u64 {
        self.seed ^ key.mix()
    }
}
