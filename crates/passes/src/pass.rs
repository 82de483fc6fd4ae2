//! The pass contract and the shared per-run context.

use serde::{Deserialize, Serialize};
use veil_ir::{Function, Module};
use veil_mba::MbaRewriter;
use veil_utils::errors::PassError;
use veil_utils::rng::ObfRng;

/// A transformation scoped to one function. `run` returns whether the
/// function was modified; `Unsupported` errors make the driver restore
/// the function from its snapshot and move on.
pub trait FunctionPass: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(&self, func: &mut Function, ctx: &mut PassContext<'_>) -> Result<bool, PassError>;
}

/// A transformation that needs whole-module visibility.
pub trait ModulePass: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(&self, module: &mut Module, ctx: &mut PassContext<'_>) -> Result<bool, PassError>;
}

/// Scope tag the pipeline dispatches on.
pub enum PassKind {
    Function(Box<dyn FunctionPass>),
    Module(Box<dyn ModulePass>),
}

impl PassKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Function(p) => p.name(),
            Self::Module(p) => p.name(),
        }
    }
}

impl std::fmt::Debug for PassKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scope = match self {
            Self::Function(_) => "function",
            Self::Module(_) => "module",
        };
        write!(f, "PassKind::{scope}({})", self.name())
    }
}

/// State shared by every pass in one pipeline run: the random source and
/// the MBA coefficient cache. Passing both by mutable reference keeps a
/// fixed-seed run deterministic as a whole.
#[derive(Debug)]
pub struct PassContext<'a> {
    pub rng: &'a mut ObfRng,
    pub mba: &'a mut MbaRewriter,
    pub config: &'a PassConfig,
}

/// Configuration for transform passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassConfig {
    /// Fraction of eligible branch sites each bogus-flow run instruments.
    pub bogus_ratio: f32,
    /// Symmetric magnitude limit for MBA linear coefficients.
    pub coeff_magnitude: i64,
    /// Oracle candidate budget before a rewrite is declared unsatisfiable.
    pub solver_attempts: u32,
    /// Widest operand (in bits) still wrapped through a permutation
    /// polynomial after MBA substitution.
    pub poly_width_cap: u32,
}

impl Default for PassConfig {
    fn default() -> Self {
        Self {
            bogus_ratio: 0.5,
            coeff_magnitude: 10,
            solver_attempts: 64,
            poly_width_cap: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_deserializes_with_defaults() {
        let cfg: PassConfig = serde_json::from_str(r#"{ "bogus_ratio": 1.0 }"#).unwrap();
        assert_eq!(cfg.bogus_ratio, 1.0);
        assert_eq!(cfg.solver_attempts, PassConfig::default().solver_attempts);
    }
}
