use thiserror::Error;

/// Errors raised while building or differentiating a graph on a [`Tape`](crate::Tape).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// The operands of an operation cannot be combined, e.g. they live on different tapes.
    #[error("Invalid operand: {0}")]
    InvalidOperand(String),

    /// A node refers to an operand that was not created before it.
    /// Terms only ever reference existing nodes, so this means the tape is corrupted.
    #[error("Cyclic graph detected: node a{node} refers to operand a{operand}")]
    CyclicGraphDetected { node: u32, operand: u32 },
}
