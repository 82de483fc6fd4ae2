//! Shared error taxonomy and the random source used by every pass.

pub mod errors;
pub mod rng;
