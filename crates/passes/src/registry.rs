//! Name-to-pass registry. Registration is explicit: nothing is discovered
//! implicitly, and names are unique.

use indexmap::IndexMap;
use veil_utils::errors::PassError;

use crate::bogus_flow::BogusFlow;
use crate::flatten::Flatten;
use crate::mba_substitution::MbaSubstitution;
use crate::pass::PassKind;

/// Constructs a fresh pass instance for one pipeline.
pub type PassFactory = fn() -> PassKind;

/// Insertion-ordered map from pass name to factory.
#[derive(Debug, Default)]
pub struct PassRegistry {
    factories: IndexMap<String, PassFactory>,
}

impl PassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the three built-in engines.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        let builtins: [(&str, PassFactory); 3] = [
            ("bogus-flow", || PassKind::Function(Box::new(BogusFlow))),
            ("flatten", || PassKind::Function(Box::new(Flatten))),
            ("mba-substitution", || {
                PassKind::Function(Box::new(MbaSubstitution))
            }),
        ];
        for (name, factory) in builtins {
            // Names are distinct literals, so registration cannot fail.
            let _ = reg.register(name, factory);
        }
        reg
    }

    pub fn register(&mut self, name: &str, factory: PassFactory) -> Result<(), PassError> {
        if self.factories.contains_key(name) {
            return Err(PassError::DuplicatePass(name.to_string()));
        }
        self.factories.insert(name.to_string(), factory);
        Ok(())
    }

    /// Instantiate the named pass.
    pub fn build(&self, name: &str) -> Result<PassKind, PassError> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| PassError::UnknownPass(name.to_string()))
    }

    /// Registered names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}
