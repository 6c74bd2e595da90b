//! Arithmetic, logical, comparison and conversion opcodes.
//!
//! Binary numeric opcodes compute their result kind from the two operand
//! kinds per the CLI binary-numeric tables: `int32` and `native int` mix
//! (widening to `native int`), the float kinds mix (widening to `float64`),
//! everything else must match.

use crate::{
    cil::{OpCode, Operand},
    emit::MethodEmitter,
    error::{ErrorKind, VerificationError},
    host::CodeSink,
    types::{CliType, PrimitiveType},
    verify::{Expectation, StackType},
};

pub(crate) fn merge_numeric(lhs: &StackType, rhs: &StackType) -> Option<StackType> {
    use StackType::{Float32, Float64, Int32, Int64, NativeInt};
    match (lhs, rhs) {
        (Int32, Int32) => Some(Int32),
        (Int64, Int64) => Some(Int64),
        (NativeInt, NativeInt | Int32) | (Int32, NativeInt) => Some(NativeInt),
        (Float32, Float32) => Some(Float32),
        (Float64, Float64 | Float32) | (Float32, Float64) => Some(Float64),
        _ => None,
    }
}

fn merge_integer(lhs: &StackType, rhs: &StackType) -> Option<StackType> {
    merge_numeric(lhs, rhs).filter(StackType::is_integer)
}

fn numeric_expectation() -> Expectation {
    Expectation::AnyOf(vec![
        StackType::Int32,
        StackType::Int64,
        StackType::NativeInt,
        StackType::Float32,
        StackType::Float64,
    ])
}

fn integer_expectation() -> Expectation {
    Expectation::AnyOf(vec![
        StackType::Int32,
        StackType::Int64,
        StackType::NativeInt,
    ])
}

/// Checks whether two operand kinds may be compared with `ceq`/`beq`: both
/// numeric and mixable, both references, or identical managed pointers.
pub(crate) fn comparable(lhs: &StackType, rhs: &StackType) -> bool {
    let reflike =
        |it: &StackType| matches!(it, StackType::Reference(_) | StackType::NullLiteral);
    merge_numeric(lhs, rhs).is_some()
        || (reflike(lhs) && reflike(rhs))
        || matches!(
            (lhs, rhs),
            (StackType::ManagedPointer(l), StackType::ManagedPointer(r)) if l == r
        )
}

fn conversion_opcode(target: PrimitiveType) -> Option<OpCode> {
    match target {
        PrimitiveType::Bool => None,
        PrimitiveType::Char | PrimitiveType::UInt16 => Some(OpCode::ConvU2),
        PrimitiveType::Int8 => Some(OpCode::ConvI1),
        PrimitiveType::UInt8 => Some(OpCode::ConvU1),
        PrimitiveType::Int16 => Some(OpCode::ConvI2),
        PrimitiveType::Int32 => Some(OpCode::ConvI4),
        PrimitiveType::UInt32 => Some(OpCode::ConvU4),
        PrimitiveType::Int64 => Some(OpCode::ConvI8),
        PrimitiveType::UInt64 => Some(OpCode::ConvU8),
        PrimitiveType::Float32 => Some(OpCode::ConvR4),
        PrimitiveType::Float64 => Some(OpCode::ConvR8),
        PrimitiveType::NativeInt => Some(OpCode::ConvI),
        PrimitiveType::NativeUInt => Some(OpCode::ConvU),
    }
}

impl<S: CodeSink> MethodEmitter<S> {
    fn binary_numeric(&mut self, opcode: OpCode) -> Result<(), VerificationError> {
        self.run(|emitter| {
            let (rhs, lhs) = emitter.peek_two(opcode)?;
            let result = merge_numeric(&lhs, &rhs).ok_or_else(|| {
                operand_mismatch(opcode, &lhs, &rhs, numeric_expectation())
            })?;
            emitter
                .verifier
                .update_state(
                    &mut emitter.stream,
                    opcode,
                    Operand::None,
                    &[
                        Expectation::Assignable(rhs),
                        Expectation::Assignable(lhs),
                    ],
                    &[result],
                )
                .map(drop)
        })
    }

    fn binary_integer(&mut self, opcode: OpCode) -> Result<(), VerificationError> {
        self.run(|emitter| {
            let (rhs, lhs) = emitter.peek_two(opcode)?;
            let result = merge_integer(&lhs, &rhs).ok_or_else(|| {
                operand_mismatch(opcode, &lhs, &rhs, integer_expectation())
            })?;
            emitter
                .verifier
                .update_state(
                    &mut emitter.stream,
                    opcode,
                    Operand::None,
                    &[
                        Expectation::Assignable(rhs),
                        Expectation::Assignable(lhs),
                    ],
                    &[result],
                )
                .map(drop)
        })
    }

    fn shift(&mut self, opcode: OpCode) -> Result<(), VerificationError> {
        self.run(|emitter| {
            let (_, value) = emitter.peek_two(opcode)?;
            if !value.is_integer() {
                return Err(ErrorKind::TypeMismatch {
                    opcode,
                    position: 1,
                    expected: integer_expectation(),
                    actual: value,
                });
            }
            emitter
                .verifier
                .update_state(
                    &mut emitter.stream,
                    opcode,
                    Operand::None,
                    &[Expectation::index(), Expectation::Assignable(value.clone())],
                    &[value],
                )
                .map(drop)
        })
    }

    fn unary(&mut self, opcode: OpCode, integer_only: bool) -> Result<(), VerificationError> {
        self.run(|emitter| {
            let top = emitter.peek_one(opcode)?;
            let valid = if integer_only {
                top.is_integer()
            } else {
                top.is_numeric()
            };
            if !valid {
                return Err(ErrorKind::TypeMismatch {
                    opcode,
                    position: 0,
                    expected: if integer_only {
                        integer_expectation()
                    } else {
                        numeric_expectation()
                    },
                    actual: top,
                });
            }
            emitter
                .verifier
                .update_state(
                    &mut emitter.stream,
                    opcode,
                    Operand::None,
                    &[Expectation::Assignable(top.clone())],
                    &[top],
                )
                .map(drop)
        })
    }

    fn comparison(&mut self, opcode: OpCode, refs_allowed: bool) -> Result<(), VerificationError> {
        self.run(|emitter| {
            let (rhs, lhs) = emitter.peek_two(opcode)?;
            let valid = if refs_allowed {
                comparable(&lhs, &rhs)
            } else {
                merge_numeric(&lhs, &rhs).is_some()
            };
            if !valid {
                return Err(operand_mismatch(opcode, &lhs, &rhs, numeric_expectation()));
            }
            emitter
                .verifier
                .update_state(
                    &mut emitter.stream,
                    opcode,
                    Operand::None,
                    &[
                        Expectation::Assignable(rhs),
                        Expectation::Assignable(lhs),
                    ],
                    &[StackType::Int32],
                )
                .map(drop)
        })
    }

    /// Emits `add`.
    ///
    /// # Errors
    /// Rejects operands that are not numeric or cannot mix.
    pub fn add(&mut self) -> Result<(), VerificationError> {
        self.binary_numeric(OpCode::Add)
    }

    /// Emits `sub`.
    ///
    /// # Errors
    /// Rejects operands that are not numeric or cannot mix.
    pub fn subtract(&mut self) -> Result<(), VerificationError> {
        self.binary_numeric(OpCode::Sub)
    }

    /// Emits `mul`.
    ///
    /// # Errors
    /// Rejects operands that are not numeric or cannot mix.
    pub fn multiply(&mut self) -> Result<(), VerificationError> {
        self.binary_numeric(OpCode::Mul)
    }

    /// Emits `div`.
    ///
    /// # Errors
    /// Rejects operands that are not numeric or cannot mix.
    pub fn divide(&mut self) -> Result<(), VerificationError> {
        self.binary_numeric(OpCode::Div)
    }

    /// Emits `div.un`.
    ///
    /// # Errors
    /// Rejects operands that are not integers or cannot mix.
    pub fn divide_unsigned(&mut self) -> Result<(), VerificationError> {
        self.binary_integer(OpCode::DivUn)
    }

    /// Emits `rem`.
    ///
    /// # Errors
    /// Rejects operands that are not numeric or cannot mix.
    pub fn remainder(&mut self) -> Result<(), VerificationError> {
        self.binary_numeric(OpCode::Rem)
    }

    /// Emits `rem.un`.
    ///
    /// # Errors
    /// Rejects operands that are not integers or cannot mix.
    pub fn remainder_unsigned(&mut self) -> Result<(), VerificationError> {
        self.binary_integer(OpCode::RemUn)
    }

    /// Emits `and`.
    ///
    /// # Errors
    /// Rejects operands that are not integers or cannot mix.
    pub fn and(&mut self) -> Result<(), VerificationError> {
        self.binary_integer(OpCode::And)
    }

    /// Emits `or`.
    ///
    /// # Errors
    /// Rejects operands that are not integers or cannot mix.
    pub fn or(&mut self) -> Result<(), VerificationError> {
        self.binary_integer(OpCode::Or)
    }

    /// Emits `xor`.
    ///
    /// # Errors
    /// Rejects operands that are not integers or cannot mix.
    pub fn xor(&mut self) -> Result<(), VerificationError> {
        self.binary_integer(OpCode::Xor)
    }

    /// Emits `shl`. Pops the shift amount, then the value.
    ///
    /// # Errors
    /// Rejects a non-integer value or a shift amount that is not `int32` or
    /// `native int`.
    pub fn shift_left(&mut self) -> Result<(), VerificationError> {
        self.shift(OpCode::Shl)
    }

    /// Emits `shr`.
    ///
    /// # Errors
    /// Rejects a non-integer value or a shift amount that is not `int32` or
    /// `native int`.
    pub fn shift_right(&mut self) -> Result<(), VerificationError> {
        self.shift(OpCode::Shr)
    }

    /// Emits `shr.un`.
    ///
    /// # Errors
    /// Rejects a non-integer value or a shift amount that is not `int32` or
    /// `native int`.
    pub fn shift_right_unsigned(&mut self) -> Result<(), VerificationError> {
        self.shift(OpCode::ShrUn)
    }

    /// Emits `neg`.
    ///
    /// # Errors
    /// Rejects a non-numeric operand.
    pub fn negate(&mut self) -> Result<(), VerificationError> {
        self.unary(OpCode::Neg, false)
    }

    /// Emits `not`.
    ///
    /// # Errors
    /// Rejects a non-integer operand.
    pub fn not(&mut self) -> Result<(), VerificationError> {
        self.unary(OpCode::Not, true)
    }

    /// Emits the `conv.*` opcode for the target primitive type.
    ///
    /// # Errors
    /// Rejects a non-numeric operand, and `bool` as a target (the CLI has no
    /// conversion opcode for it).
    pub fn convert(&mut self, target: PrimitiveType) -> Result<(), VerificationError> {
        self.run(|emitter| {
            let opcode = conversion_opcode(target).ok_or_else(|| {
                ErrorKind::InvalidOperation(format!(
                    "no conversion opcode exists for {target}"
                ))
            })?;
            let top = emitter.peek_one(opcode)?;
            if !top.is_numeric() {
                return Err(ErrorKind::TypeMismatch {
                    opcode,
                    position: 0,
                    expected: numeric_expectation(),
                    actual: top,
                });
            }
            let pushed = StackType::of(&CliType::Primitive(target));
            emitter
                .verifier
                .update_state(
                    &mut emitter.stream,
                    opcode,
                    Operand::None,
                    &[Expectation::Assignable(top)],
                    &[pushed],
                )
                .map(drop)
        })
    }

    /// Emits `ceq`, pushing 1 if the two operands compare equal.
    ///
    /// # Errors
    /// Rejects operands that cannot be compared.
    pub fn compare_equal(&mut self) -> Result<(), VerificationError> {
        self.comparison(OpCode::Ceq, true)
    }

    /// Emits `cgt`.
    ///
    /// # Errors
    /// Rejects operands that are not numeric or cannot mix.
    pub fn compare_greater(&mut self) -> Result<(), VerificationError> {
        self.comparison(OpCode::Cgt, false)
    }

    /// Emits `cgt.un`.
    ///
    /// # Errors
    /// Rejects operands that are not numeric or cannot mix.
    pub fn compare_greater_unsigned(&mut self) -> Result<(), VerificationError> {
        self.comparison(OpCode::CgtUn, false)
    }

    /// Emits `clt`.
    ///
    /// # Errors
    /// Rejects operands that are not numeric or cannot mix.
    pub fn compare_less(&mut self) -> Result<(), VerificationError> {
        self.comparison(OpCode::Clt, false)
    }

    /// Emits `clt.un`.
    ///
    /// # Errors
    /// Rejects operands that are not numeric or cannot mix.
    pub fn compare_less_unsigned(&mut self) -> Result<(), VerificationError> {
        self.comparison(OpCode::CltUn, false)
    }
}

fn operand_mismatch(
    opcode: OpCode,
    lhs: &StackType,
    rhs: &StackType,
    expected: Expectation,
) -> ErrorKind {
    if expected.satisfied_by(lhs) {
        ErrorKind::TypeMismatch {
            opcode,
            position: 0,
            expected: Expectation::Assignable(lhs.clone()),
            actual: rhs.clone(),
        }
    } else {
        ErrorKind::TypeMismatch {
            opcode,
            position: 1,
            expected,
            actual: lhs.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MethodSig, ReturnType};

    fn emitter() -> MethodEmitter {
        MethodEmitter::new(MethodSig::new([], ReturnType::Void))
    }

    #[test]
    fn add_preserves_the_operand_kind() {
        let mut emitter = emitter();
        emitter.load_constant(1).unwrap();
        emitter.load_constant(2).unwrap();
        emitter.add().unwrap();
        emitter.load_constant(3).unwrap();
        // int32 + int32 produced int32, which mixes with another int32.
        emitter.add().unwrap();
        emitter.pop().unwrap();
        emitter.ret().unwrap();
        assert!(emitter.create_delegate().is_ok());
    }

    #[test]
    fn mixing_int32_and_int64_is_rejected() {
        let mut emitter = emitter();
        emitter.load_constant(1).unwrap();
        emitter.load_constant(2i64).unwrap();
        let error = emitter.add().unwrap_err();
        assert_eq!(
            error.kind,
            ErrorKind::TypeMismatch {
                opcode: OpCode::Add,
                position: 0,
                expected: Expectation::Assignable(StackType::Int32),
                actual: StackType::Int64,
            }
        );
    }

    #[test]
    fn float_widths_mix_to_float64() {
        let mut emitter = emitter();
        emitter.load_constant(0.5f32).unwrap();
        emitter.load_constant(0.25f64).unwrap();
        emitter.multiply().unwrap();
        emitter.load_constant(1.0f64).unwrap();
        emitter.add().unwrap();
        emitter.pop().unwrap();
        emitter.ret().unwrap();
        assert!(emitter.create_delegate().is_ok());
    }

    #[test]
    fn bitwise_ops_reject_floats() {
        let mut emitter = emitter();
        emitter.load_constant(0.5f32).unwrap();
        emitter.load_constant(0.5f32).unwrap();
        let error = emitter.xor().unwrap_err();
        assert!(matches!(error.kind, ErrorKind::TypeMismatch { opcode: OpCode::Xor, .. }));
    }

    #[test]
    fn references_are_not_numeric() {
        let mut emitter = emitter();
        emitter.load_constant("left").unwrap();
        emitter.load_constant(1).unwrap();
        let error = emitter.add().unwrap_err();
        assert!(
            matches!(error.kind, ErrorKind::TypeMismatch { position: 1, .. }),
            "{error}"
        );
    }

    #[test]
    fn shift_amount_must_be_int32_or_native() {
        let mut emitter = emitter();
        emitter.load_constant(1i64).unwrap();
        emitter.load_constant(2i64).unwrap();
        let error = emitter.shift_left().unwrap_err();
        assert!(matches!(
            error.kind,
            ErrorKind::TypeMismatch { opcode: OpCode::Shl, position: 0, .. }
        ));
    }

    #[test]
    fn shift_keeps_the_value_kind() {
        let mut emitter = emitter();
        emitter.load_constant(1i64).unwrap();
        emitter.load_constant(2).unwrap();
        emitter.shift_left().unwrap();
        emitter.load_constant(1i64).unwrap();
        emitter.add().unwrap();
        emitter.pop().unwrap();
        emitter.ret().unwrap();
        assert!(emitter.create_delegate().is_ok());
    }

    #[test]
    fn conversions_change_the_stack_kind() {
        let mut emitter = emitter();
        emitter.load_constant(1).unwrap();
        emitter.convert(PrimitiveType::Int64).unwrap();
        emitter.load_constant(2i64).unwrap();
        emitter.add().unwrap();
        emitter.convert(PrimitiveType::Int8).unwrap();
        emitter.load_constant(1).unwrap();
        // conv.i1 leaves an int32 on the stack.
        emitter.add().unwrap();
        emitter.pop().unwrap();
        emitter.ret().unwrap();
        assert!(emitter.create_delegate().is_ok());
    }

    #[test]
    fn bool_has_no_conversion_opcode() {
        let mut emitter = emitter();
        emitter.load_constant(1).unwrap();
        let error = emitter.convert(PrimitiveType::Bool).unwrap_err();
        assert!(matches!(error.kind, ErrorKind::InvalidOperation(_)));
    }

    #[test]
    fn compare_equal_accepts_references() {
        let mut emitter = emitter();
        emitter.load_constant("value").unwrap();
        emitter.load_null().unwrap();
        emitter.compare_equal().unwrap();
        emitter.pop().unwrap();
        emitter.ret().unwrap();
        assert!(emitter.create_delegate().is_ok());
    }

    #[test]
    fn ordered_comparisons_reject_references() {
        let mut emitter = emitter();
        emitter.load_constant("value").unwrap();
        emitter.load_null().unwrap();
        let error = emitter.compare_greater().unwrap_err();
        assert!(matches!(error.kind, ErrorKind::TypeMismatch { opcode: OpCode::Cgt, .. }));
    }
}
