//! Mixed boolean-arithmetic rewriting: the constraint-solving oracle
//! interface, a default bounded-search solver, and the process-lifetime
//! coefficient cache.

pub mod rewriter;
pub mod solver;

pub use rewriter::{CacheKey, MbaOp, MbaRewriter};
pub use solver::{CoeffBounds, LinearSystemOracle, Oracle, PolyPair, Solution, SolveSpec, TRUTH_TABLES};
