//! The error surface of the verifier.

use itertools::Itertools;

use crate::{
    cil::{InstructionIndex, OpCode},
    types::CliType,
    verify::{Expectation, StackType},
};

/// Why a verification step was rejected.
#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum ErrorKind {
    /// An opcode found fewer operands on the stack than it pops.
    #[error("stack underflow: {opcode} requires {required} operand(s), found {have}")]
    StackUnderflow {
        /// The rejected opcode.
        opcode: OpCode,
        /// How many operands the opcode pops.
        required: usize,
        /// How many values the stack held.
        have: usize,
    },
    /// An operand on the stack does not satisfy what the opcode expects.
    #[error("type mismatch for {opcode}: operand {position} expected {expected}, found {actual}")]
    TypeMismatch {
        /// The rejected opcode.
        opcode: OpCode,
        /// The pop position of the offending operand, counting from the top
        /// of the stack.
        position: usize,
        /// What the opcode expected at that position.
        expected: Expectation,
        /// What the stack held at that position.
        actual: StackType,
    },
    /// A try/catch/finally transition was attempted out of order.
    #[error("scope error: {reason}")]
    Scope {
        /// What went wrong, citing the offending frame.
        reason: String,
    },
    /// A label was misused: double-marked, unmarked at finalization, or its
    /// incoming stack shapes disagree.
    #[error("label `{label}`: {reason}")]
    Label {
        /// The name of the offending label.
        label: String,
        /// What went wrong.
        reason: String,
    },
    /// No constructor of the type matches the given parameter types.
    #[error("no constructor {owner}({}) is defined", .parameter_types.iter().join(", "))]
    NoSuchConstructor {
        /// The type whose constructor was looked up.
        owner: CliType,
        /// The parameter types of the failed lookup.
        parameter_types: Vec<CliType>,
    },
    /// No method of the type matches the given name and parameter types.
    #[error("no method {owner}::{name}({}) is defined", .parameter_types.iter().join(", "))]
    NoSuchMethod {
        /// The type whose method was looked up.
        owner: CliType,
        /// The name of the failed lookup.
        name: String,
        /// The parameter types of the failed lookup.
        parameter_types: Vec<CliType>,
    },
    /// The operation is invalid in the emitter's current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    /// A label or local token produced by a different emitter was used.
    #[error("the {token} token belongs to a different emitter")]
    Ownership {
        /// What kind of token was rejected.
        token: &'static str,
    },
}

/// A verification failure, carrying the program point and the abstract stack
/// at the moment of rejection.
///
/// A failure poisons the emitter that produced it: partial verification
/// results have no meaning, so every later operation on the same emitter is
/// rejected as well. Callers fix the offending call and build the method
/// again, or discard the emitter.
#[derive(Debug, PartialEq, Clone, thiserror::Error)]
#[error("{kind} (at {at}, stack: [{}])", .stack.iter().join(", "))]
pub struct VerificationError {
    /// Why the operation was rejected.
    pub kind: ErrorKind,
    /// The index the rejected instruction would have received.
    pub at: InstructionIndex,
    /// The abstract stack at the moment of rejection, bottom first.
    pub stack: Vec<StackType>,
}
