//! Instructions and their positions in the instruction log.

use std::fmt::Display;

use crate::cil::{OpCode, Operand};

/// Denotes a position in the instruction log.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
#[repr(transparent)]
pub struct InstructionIndex(u32);

impl InstructionIndex {
    /// Denotes the position of the first instruction.
    pub const ZERO: Self = Self(0);
}

impl Display for InstructionIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:05}", self.0)
    }
}

impl From<u32> for InstructionIndex {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<InstructionIndex> for u32 {
    fn from(value: InstructionIndex) -> Self {
        value.0
    }
}

/// A verified instruction in the log.
#[derive(Debug, PartialEq, Clone)]
pub struct Instruction {
    /// The opcode.
    pub opcode: OpCode,
    /// The operand, in symbolic form.
    pub operand: Operand,
}

impl Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.operand {
            Operand::None => self.opcode.fmt(f),
            operand => write!(f, "{} {operand}", self.opcode),
        }
    }
}

/// A renderable view of an emitter's instruction log.
#[derive(Debug, Clone, Copy)]
pub struct InstructionLog<'a>(pub(crate) &'a [Instruction]);

impl InstructionLog<'_> {
    /// The logged instructions, in emission order.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        self.0
    }
}

impl Display for InstructionLog<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut entries = self.0.iter().enumerate();
        if let Some((index, instruction)) = entries.next() {
            write!(f, "{}: {instruction}", InstructionIndex(index as u32))?;
        }
        for (index, instruction) in entries {
            writeln!(f)?;
            write!(f, "{}: {instruction}", InstructionIndex(index as u32))?;
        }
        Ok(())
    }
}
