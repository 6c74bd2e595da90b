//! Method calls, direct, virtual and indirect.

use crate::{
    cil::{MethodRef, OpCode, Operand},
    emit::MethodEmitter,
    error::{ErrorKind, VerificationError},
    host::CodeSink,
    types::{CliType, MethodSig, ReturnType},
    verify::{Expectation, StackType},
};

/// What the `this` operand of an instance call may be: a managed pointer
/// for value types, an object reference otherwise.
fn this_expectation(owner: &CliType) -> Expectation {
    if owner.is_value_type() {
        Expectation::Assignable(StackType::ManagedPointer(owner.clone()))
    } else {
        Expectation::Assignable(StackType::Reference(owner.clone()))
    }
}

/// The pop expectations of a call, top-first: the arguments in reverse
/// order, then `this` for instance methods.
fn call_pops(method: &MethodRef) -> Vec<Expectation> {
    let mut pops: Vec<_> = method
        .signature
        .parameter_types
        .iter()
        .rev()
        .map(|it| Expectation::Assignable(StackType::of(it)))
        .collect();
    if !method.is_static() {
        pops.push(this_expectation(&method.owner));
    }
    pops
}

fn return_pushes(return_type: &ReturnType) -> Vec<StackType> {
    match return_type {
        ReturnType::Void => Vec::new(),
        ReturnType::Returns(it) => vec![StackType::of(it)],
    }
}

impl<S: CodeSink> MethodEmitter<S> {
    /// Calls a method directly, popping its arguments (and `this` for
    /// instance methods) and pushing its return value.
    ///
    /// # Errors
    /// Rejects operands that do not match the method's signature.
    pub fn call(&mut self, method: &MethodRef) -> Result<(), VerificationError> {
        let method = method.clone();
        self.run(|emitter| emitter.emit_call(OpCode::Call, method))
    }

    /// Calls a method with virtual dispatch.
    ///
    /// # Errors
    /// Rejects static methods, value-type targets, and operands that do not
    /// match the method's signature.
    pub fn call_virtual(&mut self, method: &MethodRef) -> Result<(), VerificationError> {
        let method = method.clone();
        self.run(|emitter| {
            if method.is_static() {
                return Err(ErrorKind::InvalidOperation(format!(
                    "call_virtual requires an instance method, but {method} is static"
                )));
            }
            if method.owner.is_value_type() {
                return Err(ErrorKind::InvalidOperation(format!(
                    "call_virtual cannot target the value-type method {method}"
                )));
            }
            emitter.emit_call(OpCode::CallVirt, method)
        })
    }

    /// Resolves a method of `owner` by name and exact parameter types, then
    /// calls it (virtually when the method is virtual).
    ///
    /// # Errors
    /// Rejects an unknown method and operands that do not match its
    /// signature.
    pub fn call_named(
        &mut self,
        owner: &CliType,
        name: &str,
        parameter_types: &[CliType],
    ) -> Result<(), VerificationError> {
        let owner = owner.clone();
        let name = name.to_owned();
        let parameter_types = parameter_types.to_vec();
        self.run(|emitter| {
            let method = owner.find_method(&name, &parameter_types).ok_or_else(|| {
                ErrorKind::NoSuchMethod {
                    owner: owner.clone(),
                    name: name.clone(),
                    parameter_types: parameter_types.clone(),
                }
            })?;
            let opcode = if method.is_virtual() && !owner.is_value_type() {
                OpCode::CallVirt
            } else {
                OpCode::Call
            };
            emitter.emit_call(opcode, method)
        })
    }

    /// Calls through a function pointer with the given signature. Pops the
    /// pointer, then the arguments.
    ///
    /// # Errors
    /// Rejects a non-pointer on top of the stack or arguments that do not
    /// match the signature.
    pub fn call_indirect(&mut self, signature: &MethodSig) -> Result<(), VerificationError> {
        let signature = signature.clone();
        self.run(|emitter| {
            let mut pops = vec![Expectation::Assignable(StackType::NativeInt)];
            pops.extend(
                signature
                    .parameter_types
                    .iter()
                    .rev()
                    .map(|it| Expectation::Assignable(StackType::of(it))),
            );
            let pushes = return_pushes(&signature.return_type);
            emitter
                .verifier
                .update_state(
                    &mut emitter.stream,
                    OpCode::Calli,
                    Operand::Signature(signature),
                    &pops,
                    &pushes,
                )
                .map(drop)
        })
    }

    /// Pushes a pointer to a method, usable with
    /// [`MethodEmitter::call_indirect`].
    ///
    /// # Errors
    /// Rejects the call if the emitter is poisoned or finalized.
    pub fn load_function_pointer(
        &mut self,
        method: &MethodRef,
    ) -> Result<(), VerificationError> {
        let method = method.clone();
        self.run(|emitter| {
            emitter
                .verifier
                .update_state(
                    &mut emitter.stream,
                    OpCode::LdFtn,
                    Operand::Method(method),
                    &[],
                    &[StackType::NativeInt],
                )
                .map(drop)
        })
    }

    fn emit_call(&mut self, opcode: OpCode, method: MethodRef) -> Result<(), ErrorKind> {
        let pops = call_pops(&method);
        let pushes = return_pushes(&method.signature.return_type);
        self.verifier
            .update_state(
                &mut self.stream,
                opcode,
                Operand::Method(method),
                &pops,
                &pushes,
            )
            .map(drop)
    }
}
