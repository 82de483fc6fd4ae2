use thiserror::Error;

/// Error type for IR construction and structural validation.
#[derive(Debug, Error)]
pub enum IrError {
    /// A block is missing its terminator (e.g., left half-built).
    #[error("block `{0}` has no terminator")]
    MissingTerminator(String),
    /// A terminator names a block index outside the function.
    #[error("branch target #{0} does not exist")]
    UnknownBlock(usize),
    /// An operand references a value id outside the function's value table.
    #[error("operand references unknown value #{0}")]
    UnknownValue(usize),
    /// A load or store references a slot id outside the slot table.
    #[error("unknown stack slot #{0}")]
    UnknownSlot(usize),
    /// Branch argument count does not match the target block's parameters.
    #[error("branch to `{target}` passes {given} args, block takes {expected}")]
    ArityMismatch {
        target: String,
        given: usize,
        expected: usize,
    },
    /// Operand or slot width disagrees with the instruction width.
    #[error("width mismatch in `{0}`")]
    WidthMismatch(String),
    /// The function has no blocks at all.
    #[error("function `{0}` has no entry block")]
    NoEntryBlock(String),
}

/// Error type for the reference interpreter.
#[derive(Debug, Error)]
pub enum EvalError {
    /// Execution reached a trap terminator (corrupted dispatch state).
    #[error("execution trapped")]
    Trapped,
    #[error("division by zero")]
    DivideByZero,
    /// The step budget ran out; almost always a dispatch loop gone wrong.
    #[error("step limit of {0} exceeded")]
    StepLimit(u64),
    #[error("read of value #{0} before any definition")]
    UndefinedValue(usize),
    #[error("function takes {expected} arguments, got {given}")]
    ArgCount { expected: usize, given: usize },
    #[error("ir error: {0}")]
    Ir(#[from] IrError),
}

/// Error type for the constraint-solving oracle.
#[derive(Debug, Error)]
pub enum SolveError {
    /// No coefficient assignment exists within the configured bounds.
    #[error("no solution within coefficient bounds")]
    Unsatisfiable,
}

/// Error type for pass registration and pipeline execution.
#[derive(Debug, Error)]
pub enum PassError {
    #[error("pass `{0}` is already registered")]
    DuplicatePass(String),
    #[error("pass `{0}` not found in registry")]
    UnknownPass(String),
    #[error("pipeline has no passes but the module is non-empty")]
    EmptyPipeline,
    /// The function's control flow cannot be transformed by this pass; the
    /// pipeline restores the function and continues with the rest.
    #[error("function `{function}` unsupported: {reason}")]
    Unsupported { function: String, reason: String },
    #[error("ir error: {0}")]
    Ir(#[from] IrError),
}
