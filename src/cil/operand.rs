//! Instruction operands.

use std::fmt::Display;

use itertools::Itertools;

use crate::{
    cil::{CtorRef, FieldRef, MethodRef},
    types::{CliType, MethodSig},
};

/// Identifies a label within one emitter.
#[derive(
    Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Clone, Copy, derive_more::Display, derive_more::From,
)]
#[display("L{_0}")]
pub struct LabelId(pub(crate) u32);

/// The operand of an instruction, kept in symbolic form in the instruction
/// log. Byte encodings are produced when the instruction is appended.
#[derive(Debug, PartialEq, Clone)]
pub enum Operand {
    /// No operand.
    None,
    /// A 32-bit integer immediate.
    I32(i32),
    /// A 64-bit integer immediate.
    I64(i64),
    /// A 32-bit float immediate.
    F32(f32),
    /// A 64-bit float immediate.
    F64(f64),
    /// A string literal.
    Str(String),
    /// A type token.
    Type(CliType),
    /// A method token.
    Method(MethodRef),
    /// A constructor token.
    Ctor(CtorRef),
    /// A field token.
    Field(FieldRef),
    /// A standalone-signature token.
    Signature(MethodSig),
    /// A local-variable index.
    Local(u16),
    /// An argument index.
    Argument(u16),
    /// A branch target.
    Target(LabelId),
    /// A `switch` jump table.
    Switch(Vec<LabelId>),
}

impl Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => Ok(()),
            Self::I32(it) => it.fmt(f),
            Self::I64(it) => it.fmt(f),
            Self::F32(it) => it.fmt(f),
            Self::F64(it) => it.fmt(f),
            Self::Str(it) => write!(f, "{it:?}"),
            Self::Type(it) => it.fmt(f),
            Self::Method(it) => it.fmt(f),
            Self::Ctor(it) => it.fmt(f),
            Self::Field(it) => it.fmt(f),
            Self::Signature(it) => it.fmt(f),
            Self::Local(it) | Self::Argument(it) => it.fmt(f),
            Self::Target(it) => it.fmt(f),
            Self::Switch(it) => write!(f, "({})", it.iter().join(", ")),
        }
    }
}

/// A constant that can be loaded onto the evaluation stack.
#[derive(Debug, PartialEq, Clone, derive_more::From)]
pub enum Constant {
    /// A 32-bit integer.
    I32(i32),
    /// A 64-bit integer.
    I64(i64),
    /// A 32-bit float.
    F32(f32),
    /// A 64-bit float.
    F64(f64),
    /// A string literal.
    Str(String),
}

impl From<bool> for Constant {
    fn from(value: bool) -> Self {
        Self::I32(i32::from(value))
    }
}

impl From<&str> for Constant {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

/// An entry in the per-method metadata token table.
///
/// Operands that reference metadata are interned here; their encoded bytes
/// carry the 1-based table position, so the byte output is deterministic and
/// self-contained.
#[derive(Debug, PartialEq, Clone)]
pub enum TokenEntry {
    /// A type.
    Type(CliType),
    /// A method.
    Method(MethodRef),
    /// A constructor.
    Ctor(CtorRef),
    /// A field.
    Field(FieldRef),
    /// A string literal.
    String(String),
    /// A standalone signature.
    Signature(MethodSig),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PrimitiveType;

    #[test]
    fn operand_display() {
        assert_eq!(Operand::None.to_string(), "");
        assert_eq!(Operand::I32(-3).to_string(), "-3");
        assert_eq!(Operand::Str("hi".to_string()).to_string(), "\"hi\"");
        assert_eq!(
            Operand::Type(CliType::Primitive(PrimitiveType::Int32)).to_string(),
            "int32"
        );
        assert_eq!(Operand::Target(LabelId(4)).to_string(), "L4");
        assert_eq!(
            Operand::Switch(vec![LabelId(0), LabelId(2)]).to_string(),
            "(L0, L2)"
        );
    }

    #[test]
    fn constant_conversions() {
        assert_eq!(Constant::from(true), Constant::I32(1));
        assert_eq!(Constant::from(7i32), Constant::I32(7));
        assert_eq!(Constant::from("x"), Constant::Str("x".to_string()));
    }
}
