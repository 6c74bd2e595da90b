//! Labels, branches and returns.

use crate::{
    cil::OpCode,
    emit::{Label, MethodEmitter},
    error::{ErrorKind, VerificationError},
    host::CodeSink,
    types::ReturnType,
    verify::{Expectation, StackType},
};

use super::arithmetic::{comparable, merge_numeric};

fn truthy(ty: &StackType) -> bool {
    matches!(
        ty,
        StackType::Int32
            | StackType::Int64
            | StackType::NativeInt
            | StackType::Reference(_)
            | StackType::NullLiteral
            | StackType::ManagedPointer(_)
    )
}

impl<S: CodeSink> MethodEmitter<S> {
    /// Defines a fresh, unmarked label.
    #[must_use]
    pub fn define_label(&mut self) -> Label {
        let id = self.verifier.define_label(None);
        self.label_token(id)
    }

    /// Defines a fresh, unmarked label with a name used in diagnostics.
    #[must_use]
    pub fn define_label_named(&mut self, name: &str) -> Label {
        let id = self.verifier.define_label(Some(name.to_owned()));
        self.label_token(id)
    }

    /// Binds a label to the current position.
    ///
    /// The stack at the mark must structurally equal the shape recorded by
    /// any branch that already targets the label; with none recorded, the
    /// current shape becomes the label's requirement. Forward branches to
    /// the label are patched here.
    ///
    /// # Errors
    /// Rejects a second mark of the same label, a label from another
    /// emitter, and a stack disagreeing with the label's recorded shape.
    pub fn mark_label(&mut self, label: &Label) -> Result<(), VerificationError> {
        let label = *label;
        self.run(|emitter| {
            let id = emitter.check_label(&label)?;
            emitter.verifier.mark_label(&mut emitter.stream, id)
        })
    }

    /// Branches unconditionally.
    ///
    /// # Errors
    /// Rejects a label from another emitter or a stack disagreeing with the
    /// label's recorded shape.
    pub fn branch(&mut self, target: &Label) -> Result<(), VerificationError> {
        let target = *target;
        self.run(|emitter| {
            let id = emitter.check_label(&target)?;
            emitter
                .verifier
                .branch(&mut emitter.stream, OpCode::Br, id, &[], false)
                .map(drop)
        })
    }

    /// Pops a value and branches if it is non-zero (or non-null).
    ///
    /// # Errors
    /// Rejects an operand that is neither an integer, a reference, nor a
    /// managed pointer.
    pub fn branch_if_true(&mut self, target: &Label) -> Result<(), VerificationError> {
        self.branch_on_truth(OpCode::BrTrue, target)
    }

    /// Pops a value and branches if it is zero (or null).
    ///
    /// # Errors
    /// Rejects an operand that is neither an integer, a reference, nor a
    /// managed pointer.
    pub fn branch_if_false(&mut self, target: &Label) -> Result<(), VerificationError> {
        self.branch_on_truth(OpCode::BrFalse, target)
    }

    /// Pops two values and branches if they compare equal.
    ///
    /// # Errors
    /// Rejects operands that cannot be compared.
    pub fn branch_if_equal(&mut self, target: &Label) -> Result<(), VerificationError> {
        self.comparison_branch(OpCode::Beq, target, true)
    }

    /// Pops two values and branches if they compare unequal.
    ///
    /// # Errors
    /// Rejects operands that cannot be compared.
    pub fn branch_if_not_equal(&mut self, target: &Label) -> Result<(), VerificationError> {
        self.comparison_branch(OpCode::BneUn, target, true)
    }

    /// Pops two values and branches if the first pushed is greater.
    ///
    /// # Errors
    /// Rejects operands that are not numeric or cannot mix.
    pub fn branch_if_greater(&mut self, target: &Label) -> Result<(), VerificationError> {
        self.comparison_branch(OpCode::Bgt, target, false)
    }

    /// Pops two values and branches if the first pushed is greater or equal.
    ///
    /// # Errors
    /// Rejects operands that are not numeric or cannot mix.
    pub fn branch_if_greater_or_equal(
        &mut self,
        target: &Label,
    ) -> Result<(), VerificationError> {
        self.comparison_branch(OpCode::Bge, target, false)
    }

    /// Pops two values and branches if the first pushed is less.
    ///
    /// # Errors
    /// Rejects operands that are not numeric or cannot mix.
    pub fn branch_if_less(&mut self, target: &Label) -> Result<(), VerificationError> {
        self.comparison_branch(OpCode::Blt, target, false)
    }

    /// Pops two values and branches if the first pushed is less or equal.
    ///
    /// # Errors
    /// Rejects operands that are not numeric or cannot mix.
    pub fn branch_if_less_or_equal(&mut self, target: &Label) -> Result<(), VerificationError> {
        self.comparison_branch(OpCode::Ble, target, false)
    }

    /// Pops an index and jumps to `targets[index]`, falling through when the
    /// index is out of range.
    ///
    /// # Errors
    /// Rejects an index that is not `int32` or `native int`, a label from
    /// another emitter, and any target whose recorded stack shape disagrees
    /// with the stack after the pop.
    pub fn switch(&mut self, targets: &[Label]) -> Result<(), VerificationError> {
        let targets = targets.to_vec();
        self.run(|emitter| {
            let ids = targets
                .iter()
                .map(|it| emitter.check_label(it))
                .collect::<Result<Vec<_>, _>>()?;
            emitter
                .verifier
                .switch(&mut emitter.stream, &ids)
                .map(drop)
        })
    }

    /// Exits a protected region, discarding the evaluation stack and
    /// continuing at the target label.
    ///
    /// # Errors
    /// Rejects a label from another emitter or a target whose recorded
    /// stack shape is not empty.
    pub fn leave(&mut self, target: &Label) -> Result<(), VerificationError> {
        let target = *target;
        self.run(|emitter| {
            let id = emitter.check_label(&target)?;
            emitter
                .verifier
                .branch(&mut emitter.stream, OpCode::Leave, id, &[], true)
                .map(drop)
        })
    }

    /// Returns from the method.
    ///
    /// The stack must hold exactly the return value, or nothing for a void
    /// method.
    ///
    /// # Errors
    /// Rejects extra values on the stack, a missing return value, or one of
    /// the wrong type.
    pub fn ret(&mut self) -> Result<(), VerificationError> {
        self.run(|emitter| {
            let return_type = emitter.verifier.return_type().clone();
            let height = emitter.verifier.stack_height();
            match return_type {
                ReturnType::Void => {
                    if height != 0 {
                        return Err(ErrorKind::InvalidOperation(format!(
                            "ret from a void method leaves {height} value(s) on the stack"
                        )));
                    }
                    emitter
                        .verifier
                        .update_state(
                            &mut emitter.stream,
                            OpCode::Ret,
                            crate::cil::Operand::None,
                            &[],
                            &[],
                        )
                        .map(drop)
                }
                ReturnType::Returns(ty) => {
                    if height > 1 {
                        return Err(ErrorKind::InvalidOperation(format!(
                            "ret must leave only the return value on the stack; found {height}"
                        )));
                    }
                    emitter
                        .verifier
                        .update_state(
                            &mut emitter.stream,
                            OpCode::Ret,
                            crate::cil::Operand::None,
                            &[Expectation::Assignable(StackType::of(&ty))],
                            &[],
                        )
                        .map(drop)
                }
            }
        })
    }

    fn branch_on_truth(
        &mut self,
        opcode: OpCode,
        target: &Label,
    ) -> Result<(), VerificationError> {
        let target = *target;
        self.run(|emitter| {
            let id = emitter.check_label(&target)?;
            let top = emitter.peek_one(opcode)?;
            if !truthy(&top) {
                return Err(ErrorKind::TypeMismatch {
                    opcode,
                    position: 0,
                    expected: Expectation::AnyOf(vec![
                        StackType::Int32,
                        StackType::Int64,
                        StackType::NativeInt,
                    ]),
                    actual: top,
                });
            }
            emitter
                .verifier
                .branch(
                    &mut emitter.stream,
                    opcode,
                    id,
                    &[Expectation::Assignable(top)],
                    false,
                )
                .map(drop)
        })
    }

    fn comparison_branch(
        &mut self,
        opcode: OpCode,
        target: &Label,
        refs_allowed: bool,
    ) -> Result<(), VerificationError> {
        let target = *target;
        self.run(|emitter| {
            let id = emitter.check_label(&target)?;
            let (rhs, lhs) = emitter.peek_two(opcode)?;
            let valid = if refs_allowed {
                comparable(&lhs, &rhs)
            } else {
                merge_numeric(&lhs, &rhs).is_some()
            };
            if !valid {
                return Err(ErrorKind::TypeMismatch {
                    opcode,
                    position: 0,
                    expected: Expectation::Assignable(lhs),
                    actual: rhs,
                });
            }
            emitter
                .verifier
                .branch(
                    &mut emitter.stream,
                    opcode,
                    id,
                    &[
                        Expectation::Assignable(rhs),
                        Expectation::Assignable(lhs),
                    ],
                    false,
                )
                .map(drop)
        })
    }
}
