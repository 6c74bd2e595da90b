//! CIL elements: opcodes, operands, instructions and member references.

mod buffer;
mod instruction;
mod opcode;
mod operand;
mod references;

pub use instruction::{Instruction, InstructionIndex, InstructionLog};
pub use opcode::OpCode;
pub use operand::{Constant, LabelId, Operand, TokenEntry};
pub use references::{CtorRef, FieldFlags, FieldRef, MethodFlags, MethodRef};

pub(crate) use buffer::{CodeStream, PatchSite};
