//! Pipeline driver: ordered passes, shared randomness, snapshot/restore.

use veil_ir::Module;
use veil_mba::{CoeffBounds, MbaRewriter};
use veil_utils::errors::PassError;
use veil_utils::rng::ObfRng;

use crate::pass::{PassConfig, PassContext, PassKind};

/// An ordered pass list bound to one random source and one MBA rewriter.
///
/// Function-scoped passes visit functions in declaration order, snapshot
/// each before running, and restore on `Unsupported` so a failed function
/// never escapes half-transformed. Re-running a pipeline compounds the
/// transformations with fresh randomness.
#[derive(Debug)]
pub struct Pipeline {
    passes: Vec<PassKind>,
    targets: Vec<String>,
    rng: ObfRng,
    mba: MbaRewriter,
    config: PassConfig,
    modified: bool,
}

impl Pipeline {
    pub fn new(config: PassConfig, mut rng: ObfRng) -> Self {
        let mba = MbaRewriter::seeded(rng.fork_seed()).with_bounds(CoeffBounds {
            magnitude: config.coeff_magnitude,
            attempts: config.solver_attempts,
        });
        Self {
            passes: Vec::new(),
            targets: Vec::new(),
            rng,
            mba,
            config,
            modified: false,
        }
    }

    /// Default configuration with a deterministic seed.
    pub fn seeded(seed: u64) -> Self {
        Self::new(PassConfig::default(), ObfRng::seeded(seed))
    }

    pub fn push(&mut self, pass: PassKind) {
        self.passes.push(pass);
    }

    /// Restrict function-scoped passes to the named function. No targets
    /// means every function is eligible.
    pub fn target(&mut self, name: impl Into<String>) {
        self.targets.push(name.into());
    }

    /// Whether any run of this pipeline has modified a module.
    pub fn modified(&self) -> bool {
        self.modified
    }

    pub fn run(&mut self, module: &mut Module) -> Result<bool, PassError> {
        if self.passes.is_empty() {
            if module.is_empty() {
                return Ok(false);
            }
            return Err(PassError::EmptyPipeline);
        }

        let mut any = false;
        for pass in &self.passes {
            let mut pass_changed = false;
            match pass {
                PassKind::Function(p) => {
                    for func in module.functions_mut() {
                        if !self.targets.is_empty() && !self.targets.iter().any(|t| *t == func.name)
                        {
                            continue;
                        }
                        let snapshot = func.clone();
                        let mut ctx = PassContext {
                            rng: &mut self.rng,
                            mba: &mut self.mba,
                            config: &self.config,
                        };
                        match p.run(func, &mut ctx) {
                            Ok(true) => {
                                func.verify()?;
                                tracing::debug!(pass = p.name(), function = %func.name, "modified");
                                pass_changed = true;
                            }
                            Ok(false) => {}
                            Err(PassError::Unsupported { function, reason }) => {
                                *func = snapshot;
                                tracing::warn!(
                                    pass = p.name(),
                                    function = %function,
                                    %reason,
                                    "function restored"
                                );
                            }
                            Err(e) => return Err(e),
                        }
                    }
                }
                PassKind::Module(p) => {
                    let snapshot = module.clone();
                    let mut ctx = PassContext {
                        rng: &mut self.rng,
                        mba: &mut self.mba,
                        config: &self.config,
                    };
                    match p.run(module, &mut ctx) {
                        Ok(true) => {
                            for func in module.functions() {
                                func.verify()?;
                            }
                            pass_changed = true;
                        }
                        Ok(false) => {}
                        Err(PassError::Unsupported { function, reason }) => {
                            *module = snapshot;
                            tracing::warn!(
                                pass = p.name(),
                                function = %function,
                                %reason,
                                "module restored"
                            );
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            tracing::info!("{:>16} {}", pass.name(), if pass_changed { "✓" } else { "×" });
            any |= pass_changed;
        }
        self.modified |= any;
        Ok(any)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pass::FunctionPass;
    use veil_ir::{FuncBuilder, Function, Width};

    struct Renamer;

    impl FunctionPass for Renamer {
        fn name(&self) -> &'static str {
            "renamer"
        }

        fn run(
            &self,
            func: &mut Function,
            _ctx: &mut PassContext<'_>,
        ) -> Result<bool, PassError> {
            func.name.push('!');
            Ok(true)
        }
    }

    struct Refuser;

    impl FunctionPass for Refuser {
        fn name(&self) -> &'static str {
            "refuser"
        }

        fn run(&self, func: &mut Function, _ctx: &mut PassContext<'_>) -> Result<bool, PassError> {
            func.name.push('?');
            Err(PassError::Unsupported {
                function: func.name.clone(),
                reason: "always".into(),
            })
        }
    }

    fn identity(name: &str) -> Function {
        let mut fb = FuncBuilder::new(name, &[Width::W32], Some(Width::W32));
        let x = fb.param(0);
        fb.ret(Some(x.into()));
        fb.finish().unwrap()
    }

    fn two_function_module() -> Module {
        let mut m = Module::new("m");
        m.push(identity("f"));
        m.push(identity("g"));
        m
    }

    #[test]
    fn empty_pipeline_over_nonempty_module_errors() {
        let mut p = Pipeline::seeded(42);
        let mut m = two_function_module();
        assert!(matches!(p.run(&mut m), Err(PassError::EmptyPipeline)));
        assert!(!p.modified());
    }

    #[test]
    fn empty_pipeline_over_empty_module_is_a_no_op() {
        let mut p = Pipeline::seeded(42);
        let mut m = Module::new("m");
        assert!(!p.run(&mut m).unwrap());
    }

    #[test]
    fn target_filter_limits_visits() {
        let mut p = Pipeline::seeded(42);
        p.push(PassKind::Function(Box::new(Renamer)));
        p.target("g");
        let mut m = two_function_module();
        assert!(p.run(&mut m).unwrap());
        assert!(m.get("f").is_some(), "untargeted function untouched");
        assert!(m.get("g!").is_some());
    }

    #[test]
    fn unsupported_restores_the_function_and_continues() {
        let mut p = Pipeline::seeded(42);
        p.push(PassKind::Function(Box::new(Refuser)));
        p.push(PassKind::Function(Box::new(Renamer)));
        let mut m = two_function_module();
        assert!(p.run(&mut m).unwrap(), "second pass still applies");
        // The refuser's partial rename was rolled back before the renamer ran.
        assert!(m.get("f!").is_some());
        assert!(m.get("g!").is_some());
        assert!(p.modified());
    }
}
