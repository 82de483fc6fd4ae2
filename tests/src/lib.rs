//! Cross-crate integration tests: whole pipelines over executable sample
//! functions, checked by the reference interpreter.

#[cfg(test)]
mod fixtures;
#[cfg(test)]
mod passes;
