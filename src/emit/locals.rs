//! Local variables and arguments.

use crate::{
    cil::{OpCode, Operand},
    emit::{Local, MethodEmitter},
    error::{ErrorKind, VerificationError},
    host::CodeSink,
    types::CliType,
    verify::{Expectation, StackType},
};

impl<S: CodeSink> MethodEmitter<S> {
    /// Declares a new local variable of the given type.
    ///
    /// # Errors
    /// Rejects the call if the emitter is poisoned or finalized, or if all
    /// 65536 slots are taken.
    pub fn declare_local(&mut self, ty: CliType) -> Result<Local, VerificationError> {
        self.run(|emitter| {
            let index = emitter.verifier.declare_local(ty, None)?;
            Ok(emitter.local_token(index))
        })
    }

    /// Declares a new named local variable of the given type.
    ///
    /// # Errors
    /// Rejects the call if the emitter is poisoned or finalized, or if all
    /// 65536 slots are taken.
    pub fn declare_local_named(
        &mut self,
        ty: CliType,
        name: &str,
    ) -> Result<Local, VerificationError> {
        let name = name.to_owned();
        self.run(|emitter| {
            let index = emitter.verifier.declare_local(ty, Some(name))?;
            Ok(emitter.local_token(index))
        })
    }

    /// Pushes the value of a local variable.
    ///
    /// # Errors
    /// Rejects a local that was never stored to: its value would be
    /// whatever the host zero-initializes it to, which is almost always a
    /// bug at this layer.
    pub fn load_local(&mut self, local: &Local) -> Result<(), VerificationError> {
        let local = *local;
        self.run(|emitter| {
            let index = emitter.check_local(&local)?;
            let slot = emitter.verifier.local(index);
            if !slot.initialized {
                return Err(ErrorKind::InvalidOperation(format!(
                    "local `{}` is loaded before it is assigned",
                    slot.name.clone().unwrap_or_else(|| index.to_string())
                )));
            }
            let pushed = StackType::of(&slot.ty);
            emitter
                .verifier
                .update_state(
                    &mut emitter.stream,
                    OpCode::LdLoc,
                    Operand::Local(index),
                    &[],
                    &[pushed],
                )
                .map(drop)
        })
    }

    /// Pops the top of the stack into a local variable.
    ///
    /// # Errors
    /// Rejects a value that is not assignable to the local's declared type.
    pub fn store_local(&mut self, local: &Local) -> Result<(), VerificationError> {
        let local = *local;
        self.run(|emitter| {
            let index = emitter.check_local(&local)?;
            let expected = StackType::of(&emitter.verifier.local(index).ty);
            emitter.verifier.update_state(
                &mut emitter.stream,
                OpCode::StLoc,
                Operand::Local(index),
                &[Expectation::Assignable(expected)],
                &[],
            )?;
            emitter.verifier.initialize_local(index);
            Ok(())
        })
    }

    /// Pushes a managed pointer to a local variable.
    ///
    /// Taking the address counts as an assignment: the callee behind the
    /// pointer may initialize the slot.
    ///
    /// # Errors
    /// Rejects the call if the emitter is poisoned or finalized.
    pub fn load_local_address(&mut self, local: &Local) -> Result<(), VerificationError> {
        let local = *local;
        self.run(|emitter| {
            let index = emitter.check_local(&local)?;
            let pushed = StackType::ManagedPointer(emitter.verifier.local(index).ty.clone());
            emitter.verifier.update_state(
                &mut emitter.stream,
                OpCode::LdLocA,
                Operand::Local(index),
                &[],
                &[pushed],
            )?;
            emitter.verifier.initialize_local(index);
            Ok(())
        })
    }

    /// Pushes the value of an argument.
    ///
    /// # Errors
    /// Rejects an argument index outside the method signature.
    pub fn load_argument(&mut self, index: u16) -> Result<(), VerificationError> {
        self.run(|emitter| {
            let pushed = StackType::of(emitter.verifier.argument(index)?);
            emitter
                .verifier
                .update_state(
                    &mut emitter.stream,
                    OpCode::LdArg,
                    Operand::Argument(index),
                    &[],
                    &[pushed],
                )
                .map(drop)
        })
    }

    /// Pops the top of the stack into an argument slot.
    ///
    /// # Errors
    /// Rejects an argument index outside the method signature, or a value
    /// that is not assignable to the argument's type.
    pub fn store_argument(&mut self, index: u16) -> Result<(), VerificationError> {
        self.run(|emitter| {
            let expected = StackType::of(emitter.verifier.argument(index)?);
            emitter
                .verifier
                .update_state(
                    &mut emitter.stream,
                    OpCode::StArg,
                    Operand::Argument(index),
                    &[Expectation::Assignable(expected)],
                    &[],
                )
                .map(drop)
        })
    }

    /// Pushes a managed pointer to an argument slot.
    ///
    /// # Errors
    /// Rejects an argument index outside the method signature.
    pub fn load_argument_address(&mut self, index: u16) -> Result<(), VerificationError> {
        self.run(|emitter| {
            let pushed = StackType::ManagedPointer(emitter.verifier.argument(index)?.clone());
            emitter
                .verifier
                .update_state(
                    &mut emitter.stream,
                    OpCode::LdArgA,
                    Operand::Argument(index),
                    &[],
                    &[pushed],
                )
                .map(drop)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MethodSig, PrimitiveType, ReturnType};

    fn int32() -> CliType {
        CliType::Primitive(PrimitiveType::Int32)
    }

    #[test]
    fn store_then_load_round_trips() {
        let mut emitter = MethodEmitter::new(MethodSig::new([], int32()));
        let local = emitter.declare_local_named(int32(), "answer").unwrap();
        emitter.load_constant(42).unwrap();
        emitter.store_local(&local).unwrap();
        emitter.load_local(&local).unwrap();
        emitter.ret().unwrap();
        let method = emitter.create_delegate().unwrap();
        assert_eq!(method.locals.len(), 1);
        assert_eq!(method.locals[0].name.as_deref(), Some("answer"));
    }

    #[test]
    fn loading_an_unassigned_local_is_rejected() {
        let mut emitter = MethodEmitter::new(MethodSig::new([], ReturnType::Void));
        let local = emitter.declare_local(int32()).unwrap();
        let error = emitter.load_local(&local).unwrap_err();
        assert!(
            matches!(error.kind, ErrorKind::InvalidOperation(ref it) if it.contains("before it is assigned"))
        );
    }

    #[test]
    fn storing_a_mismatched_type_is_rejected() {
        let mut emitter = MethodEmitter::new(MethodSig::new([], ReturnType::Void));
        let local = emitter.declare_local(int32()).unwrap();
        emitter.load_constant("text").unwrap();
        let error = emitter.store_local(&local).unwrap_err();
        assert!(matches!(
            error.kind,
            ErrorKind::TypeMismatch { opcode: OpCode::StLoc, position: 0, .. }
        ));
    }

    #[test]
    fn taking_the_address_initializes_the_slot() {
        let mut emitter = MethodEmitter::new(MethodSig::new([], ReturnType::Void));
        let local = emitter.declare_local(int32()).unwrap();
        emitter.load_local_address(&local).unwrap();
        emitter.pop().unwrap();
        emitter.load_local(&local).unwrap();
        emitter.pop().unwrap();
        emitter.ret().unwrap();
        assert!(emitter.create_delegate().is_ok());
    }

    #[test]
    fn arguments_push_their_declared_types() {
        let mut emitter = MethodEmitter::new(MethodSig::new(
            [int32(), CliType::String],
            int32(),
        ));
        emitter.load_argument(0).unwrap();
        emitter.ret().unwrap();
        assert!(emitter.create_delegate().is_ok());
    }

    #[test]
    fn out_of_range_arguments_are_rejected() {
        let mut emitter = MethodEmitter::new(MethodSig::new([int32()], ReturnType::Void));
        let error = emitter.load_argument(1).unwrap_err();
        assert!(matches!(error.kind, ErrorKind::InvalidOperation(ref it) if it.contains("out of range")));
    }

    #[test]
    fn argument_stores_check_assignability() {
        let mut emitter = MethodEmitter::new(MethodSig::new([CliType::String], ReturnType::Void));
        emitter.load_constant(3).unwrap();
        let error = emitter.store_argument(0).unwrap_err();
        assert!(matches!(
            error.kind,
            ErrorKind::TypeMismatch { opcode: OpCode::StArg, .. }
        ));
    }
}
