//! Constants and raw stack manipulation.

use crate::{
    cil::{Constant, OpCode, Operand},
    emit::MethodEmitter,
    error::{ErrorKind, VerificationError},
    host::CodeSink,
    types::CliType,
    verify::{Expectation, StackType},
};

impl<S: CodeSink> MethodEmitter<S> {
    /// Pushes a constant onto the evaluation stack.
    ///
    /// # Errors
    /// Rejects the call if the emitter is poisoned or finalized.
    pub fn load_constant<C: Into<Constant>>(&mut self, value: C) -> Result<(), VerificationError> {
        let constant = value.into();
        self.run(|emitter| {
            let (opcode, operand, pushed) = match constant {
                Constant::I32(it) => (OpCode::LdcI4, Operand::I32(it), StackType::Int32),
                Constant::I64(it) => (OpCode::LdcI8, Operand::I64(it), StackType::Int64),
                Constant::F32(it) => (OpCode::LdcR4, Operand::F32(it), StackType::Float32),
                Constant::F64(it) => (OpCode::LdcR8, Operand::F64(it), StackType::Float64),
                Constant::Str(it) => (
                    OpCode::LdStr,
                    Operand::Str(it),
                    StackType::Reference(CliType::String),
                ),
            };
            emitter
                .verifier
                .update_state(&mut emitter.stream, opcode, operand, &[], &[pushed])
                .map(drop)
        })
    }

    /// Pushes the `null` literal.
    ///
    /// # Errors
    /// Rejects the call if the emitter is poisoned or finalized.
    pub fn load_null(&mut self) -> Result<(), VerificationError> {
        self.run(|emitter| {
            emitter
                .verifier
                .update_state(
                    &mut emitter.stream,
                    OpCode::LdNull,
                    Operand::None,
                    &[],
                    &[StackType::NullLiteral],
                )
                .map(drop)
        })
    }

    /// Emits a no-op.
    ///
    /// # Errors
    /// Rejects the call if the emitter is poisoned or finalized.
    pub fn nop(&mut self) -> Result<(), VerificationError> {
        self.run(|emitter| {
            emitter
                .verifier
                .update_state(&mut emitter.stream, OpCode::Nop, Operand::None, &[], &[])
                .map(drop)
        })
    }

    /// Duplicates the value on top of the stack.
    ///
    /// # Errors
    /// Rejects an empty stack.
    pub fn duplicate(&mut self) -> Result<(), VerificationError> {
        self.run(|emitter| {
            let top = emitter.peek_one(OpCode::Dup)?;
            emitter
                .verifier
                .update_state(
                    &mut emitter.stream,
                    OpCode::Dup,
                    Operand::None,
                    &[Expectation::Any],
                    &[top.clone(), top],
                )
                .map(drop)
        })
    }

    /// Discards the value on top of the stack.
    ///
    /// # Errors
    /// Rejects an empty stack.
    pub fn pop(&mut self) -> Result<(), VerificationError> {
        self.run(|emitter| {
            emitter
                .verifier
                .update_state(
                    &mut emitter.stream,
                    OpCode::Pop,
                    Operand::None,
                    &[Expectation::Any],
                    &[],
                )
                .map(drop)
        })
    }

    /// The value on top of the stack, for opcode-local precondition checks.
    pub(crate) fn peek_one(&self, opcode: OpCode) -> Result<StackType, ErrorKind> {
        self.verifier
            .peek(1)
            .and_then(|mut it| it.pop())
            .ok_or(ErrorKind::StackUnderflow {
                opcode,
                required: 1,
                have: self.verifier.stack_height(),
            })
    }

    /// The two topmost values `(top, below)`, for opcode-local precondition
    /// checks.
    pub(crate) fn peek_two(&self, opcode: OpCode) -> Result<(StackType, StackType), ErrorKind> {
        let mut operands = self.verifier.peek(2).ok_or(ErrorKind::StackUnderflow {
            opcode,
            required: 2,
            have: self.verifier.stack_height(),
        })?;
        let below = operands.pop().expect("two values were peeked");
        let top = operands.pop().expect("two values were peeked");
        Ok((top, below))
    }
}
