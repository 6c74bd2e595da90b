//! Exception scoping: protected regions, handlers, throw and rethrow.
//!
//! The seven scope transitions form a state machine over the verifier's
//! scope stack; all of them require an empty evaluation stack, and entering
//! a catch handler is the one place where a value appears out of thin air
//! (the caught exception).

use crate::{
    cil::{OpCode, Operand},
    emit::MethodEmitter,
    error::{ErrorKind, VerificationError},
    host::CodeSink,
    types::CliType,
    verify::{Expectation, StackType},
};

impl<S: CodeSink> MethodEmitter<S> {
    /// Opens a protected region.
    ///
    /// # Errors
    /// Rejects a non-empty evaluation stack.
    pub fn begin_exception_block(&mut self) -> Result<(), VerificationError> {
        self.run(|emitter| emitter.verifier.begin_try(&mut emitter.stream))
    }

    /// Opens a catch handler for the innermost protected region. The stack
    /// resets to hold exactly the caught exception.
    ///
    /// # Errors
    /// Rejects a type that does not derive from `System.Exception`, a
    /// missing or mis-nested protected region, and a non-empty stack.
    pub fn begin_catch_block(&mut self, exception_type: &CliType) -> Result<(), VerificationError> {
        let exception_type = exception_type.clone();
        self.run(|emitter| emitter.verifier.begin_catch(&mut emitter.stream, exception_type))
    }

    /// Opens a catch handler for every exception, equivalent to catching
    /// `System.Exception`.
    ///
    /// # Errors
    /// Rejects a missing or mis-nested protected region and a non-empty
    /// stack.
    pub fn begin_catch_all_block(&mut self) -> Result<(), VerificationError> {
        self.run(|emitter| {
            emitter
                .verifier
                .begin_catch(&mut emitter.stream, CliType::exception())
        })
    }

    /// Closes the current catch handler, leaving to the end of the
    /// protected region.
    ///
    /// # Errors
    /// Rejects a non-empty stack (the caught exception must be consumed)
    /// and a missing open catch handler.
    pub fn end_catch_block(&mut self) -> Result<(), VerificationError> {
        self.run(|emitter| emitter.verifier.end_catch(&mut emitter.stream))
    }

    /// Opens the finally handler of the innermost protected region.
    ///
    /// # Errors
    /// Rejects a second finally for the same region, a missing or
    /// mis-nested protected region, and a non-empty stack.
    pub fn begin_finally_block(&mut self) -> Result<(), VerificationError> {
        self.run(|emitter| emitter.verifier.begin_finally(&mut emitter.stream))
    }

    /// Closes the current finally handler with `endfinally`.
    ///
    /// # Errors
    /// Rejects a non-empty stack and a missing open finally handler.
    pub fn end_finally_block(&mut self) -> Result<(), VerificationError> {
        self.run(|emitter| emitter.verifier.end_finally(&mut emitter.stream))
    }

    /// Closes the innermost protected region and marks its end label.
    ///
    /// # Errors
    /// Rejects a region with no catch or finally handler, an open handler,
    /// and a non-empty stack.
    pub fn end_exception_block(&mut self) -> Result<(), VerificationError> {
        self.run(|emitter| emitter.verifier.end_exception_block(&mut emitter.stream))
    }

    /// Pops an exception reference and throws it.
    ///
    /// # Errors
    /// Rejects an operand that is not assignable to `System.Exception`.
    pub fn throw(&mut self) -> Result<(), VerificationError> {
        self.run(|emitter| {
            emitter
                .verifier
                .update_state(
                    &mut emitter.stream,
                    OpCode::Throw,
                    Operand::None,
                    &[Expectation::Assignable(StackType::Reference(
                        CliType::exception(),
                    ))],
                    &[],
                )
                .map(drop)
        })
    }

    /// Rethrows the exception being handled by the current catch block.
    ///
    /// # Errors
    /// Rejects the call outside an open catch handler.
    pub fn rethrow(&mut self) -> Result<(), VerificationError> {
        self.run(|emitter| {
            if !emitter.verifier.in_open_catch() {
                return Err(ErrorKind::InvalidOperation(
                    "rethrow is only valid inside a catch block".to_string(),
                ));
            }
            emitter
                .verifier
                .update_state(
                    &mut emitter.stream,
                    OpCode::Rethrow,
                    Operand::None,
                    &[],
                    &[],
                )
                .map(drop)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        host::HandlerKind,
        types::{ClassDef, MethodSig, PrimitiveType, ReturnType},
    };

    fn void_emitter() -> MethodEmitter {
        MethodEmitter::new(MethodSig::new([], ReturnType::Void))
    }

    #[test]
    fn try_catch_round_trip() {
        let mut emitter = void_emitter();
        let out = emitter.define_label();
        emitter.begin_exception_block().unwrap();
        emitter.load_constant("boom").unwrap();
        emitter.pop().unwrap();
        emitter.leave(&out).unwrap();
        emitter.begin_catch_all_block().unwrap();
        emitter.pop().unwrap();
        emitter.end_catch_block().unwrap();
        emitter.end_exception_block().unwrap();
        emitter.mark_label(&out).unwrap();
        emitter.ret().unwrap();
        let method = emitter.create_delegate().unwrap();
        assert_eq!(method.exception_clauses.len(), 1);
        assert_eq!(
            method.exception_clauses[0].handler,
            HandlerKind::Catch(CliType::exception())
        );
    }

    #[test]
    fn catch_blocks_start_with_the_exception_on_the_stack() {
        let custom = CliType::Class(
            ClassDef::builder("Acme.Boom")
                .extends(ClassDef::exception())
                .build(),
        );
        let mut emitter = void_emitter();
        let out = emitter.define_label();
        emitter.begin_exception_block().unwrap();
        emitter.leave(&out).unwrap();
        emitter.begin_catch_block(&custom).unwrap();
        // The handler body sees exactly one value: the caught exception.
        emitter.throw().unwrap();
        emitter.end_catch_block().unwrap();
        emitter.end_exception_block().unwrap();
        emitter.mark_label(&out).unwrap();
        emitter.ret().unwrap();
        assert!(emitter.create_delegate().is_ok());
    }

    #[test]
    fn catching_a_non_exception_type_is_rejected() {
        let mut emitter = void_emitter();
        emitter.begin_exception_block().unwrap();
        let error = emitter
            .begin_catch_block(&CliType::String)
            .unwrap_err();
        assert!(matches!(error.kind, ErrorKind::Scope { ref reason } if reason.contains("derive")));
    }

    #[test]
    fn catch_outside_a_try_is_rejected() {
        let mut emitter = void_emitter();
        let error = emitter.begin_catch_all_block().unwrap_err();
        assert!(matches!(error.kind, ErrorKind::Scope { ref reason } if reason.contains("no protected region")));
    }

    #[test]
    fn scope_transitions_require_an_empty_stack() {
        let mut emitter = void_emitter();
        emitter.load_constant(1).unwrap();
        let error = emitter.begin_exception_block().unwrap_err();
        assert!(matches!(error.kind, ErrorKind::Scope { ref reason } if reason.contains("empty")));
    }

    #[test]
    fn a_second_finally_is_rejected() {
        let mut emitter = void_emitter();
        emitter.begin_exception_block().unwrap();
        emitter.begin_finally_block().unwrap();
        emitter.end_finally_block().unwrap();
        let error = emitter.begin_finally_block().unwrap_err();
        assert!(matches!(error.kind, ErrorKind::Scope { ref reason } if reason.contains("already has a finally")));
    }

    #[test]
    fn a_catch_cannot_follow_the_finally() {
        let mut emitter = void_emitter();
        emitter.begin_exception_block().unwrap();
        emitter.begin_finally_block().unwrap();
        emitter.end_finally_block().unwrap();
        let error = emitter.begin_catch_all_block().unwrap_err();
        assert!(matches!(error.kind, ErrorKind::Scope { ref reason } if reason.contains("follow the finally")));
    }

    #[test]
    fn unclosed_scopes_fail_finalization() {
        let mut emitter = void_emitter();
        emitter.begin_exception_block().unwrap();
        let error = emitter.create_delegate().unwrap_err();
        assert!(matches!(error.kind, ErrorKind::Scope { ref reason } if reason.contains("never closed")));
    }

    #[test]
    fn rethrow_outside_a_catch_is_rejected() {
        let mut emitter = void_emitter();
        let error = emitter.rethrow().unwrap_err();
        assert!(matches!(error.kind, ErrorKind::InvalidOperation(ref it) if it.contains("catch")));
    }

    #[test]
    fn rethrow_inside_a_catch_verifies() {
        let mut emitter = void_emitter();
        let out = emitter.define_label();
        emitter.begin_exception_block().unwrap();
        emitter.leave(&out).unwrap();
        emitter.begin_catch_all_block().unwrap();
        emitter.pop().unwrap();
        emitter.rethrow().unwrap();
        emitter.end_catch_block().unwrap();
        emitter.end_exception_block().unwrap();
        emitter.mark_label(&out).unwrap();
        emitter.ret().unwrap();
        assert!(emitter.create_delegate().is_ok());
    }

    #[test]
    fn throw_requires_an_exception_reference() {
        let mut emitter = void_emitter();
        emitter.load_constant(3).unwrap();
        let error = emitter.throw().unwrap_err();
        assert!(matches!(
            error.kind,
            ErrorKind::TypeMismatch { opcode: OpCode::Throw, .. }
        ));
    }

    #[test]
    fn nested_regions_close_inside_out() {
        let mut emitter = MethodEmitter::new(MethodSig::new(
            [],
            CliType::Primitive(PrimitiveType::Int32),
        ));
        emitter.begin_exception_block().unwrap();
        emitter.begin_exception_block().unwrap();
        emitter.begin_finally_block().unwrap();
        emitter.end_finally_block().unwrap();
        emitter.end_exception_block().unwrap();
        emitter.begin_catch_all_block().unwrap();
        emitter.pop().unwrap();
        emitter.end_catch_block().unwrap();
        emitter.end_exception_block().unwrap();
        emitter.load_constant(0).unwrap();
        emitter.ret().unwrap();
        let method = emitter.create_delegate().unwrap();
        assert_eq!(method.exception_clauses.len(), 2);
    }

    #[test]
    fn closing_the_outer_region_with_an_open_inner_one_is_rejected() {
        let mut emitter = void_emitter();
        emitter.begin_exception_block().unwrap();
        emitter.begin_catch_all_block().unwrap();
        let error = emitter.end_exception_block().unwrap_err();
        assert!(matches!(error.kind, ErrorKind::Scope { ref reason } if reason.contains("catch")));
    }
}
