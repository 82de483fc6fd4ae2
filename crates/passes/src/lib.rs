//! Obfuscating transformation passes over the IR: the pass abstraction,
//! an explicit registry, the pipeline driver, and the three engines
//! (bogus control flow, flattening, MBA substitution).

pub mod bogus_flow;
pub mod flatten;
pub mod mba_substitution;
pub mod pass;
pub mod pipeline;
pub mod registry;

pub use bogus_flow::BogusFlow;
pub use flatten::Flatten;
pub use mba_substitution::MbaSubstitution;
pub use pass::{FunctionPass, ModulePass, PassConfig, PassContext, PassKind};
pub use pipeline::Pipeline;
pub use registry::PassRegistry;
