//! The IR host: a register-based function IR with basic blocks, block
//! parameters (phi-equivalents), stack slots, structural verification,
//! dominance queries, and a reference interpreter.
//!
//! Obfuscation passes read and mutate this graph through the types and
//! operations exposed here; the passes themselves live in `veil-passes`.

pub mod builder;
pub mod demote;
pub mod dom;
pub mod eval;
pub mod module;
mod verify;

pub use builder::FuncBuilder;
pub use dom::DomTree;
pub use module::{
    BasicBlock, BinOp, BlockId, Function, Inst, Module, Operand, Pred, SlotId, Terminator, ValueId,
    Width,
};
