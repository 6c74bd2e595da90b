//! Object and array construction, element access, and casts.

use crate::{
    cil::{CtorRef, OpCode, Operand},
    emit::MethodEmitter,
    error::{ErrorKind, VerificationError},
    host::CodeSink,
    types::CliType,
    verify::{Expectation, StackType},
};

impl<S: CodeSink> MethodEmitter<S> {
    /// Pops the constructor's arguments, allocates a new object and pushes
    /// the reference to it.
    ///
    /// # Errors
    /// Rejects value-type constructors and arguments that do not match the
    /// constructor's parameters.
    pub fn new_object(&mut self, ctor: &CtorRef) -> Result<(), VerificationError> {
        let ctor = ctor.clone();
        self.run(|emitter| emitter.emit_new_object(ctor))
    }

    /// Resolves a constructor of `ty` by exact parameter types, then emits
    /// it like [`MethodEmitter::new_object`].
    ///
    /// # Errors
    /// Rejects an unknown constructor, value types, and mismatched
    /// arguments.
    pub fn new_object_with(
        &mut self,
        ty: &CliType,
        parameter_types: &[CliType],
    ) -> Result<(), VerificationError> {
        let ty = ty.clone();
        let parameter_types = parameter_types.to_vec();
        self.run(|emitter| {
            let ctor = ty.find_constructor(&parameter_types).ok_or_else(|| {
                ErrorKind::NoSuchConstructor {
                    owner: ty.clone(),
                    parameter_types: parameter_types.clone(),
                }
            })?;
            emitter.emit_new_object(ctor)
        })
    }

    /// Pops an array length and pushes a reference to a new array of the
    /// given element type.
    ///
    /// # Errors
    /// Rejects a length that is not `int32` or `native int`.
    pub fn new_array(&mut self, element_type: &CliType) -> Result<(), VerificationError> {
        let element_type = element_type.clone();
        self.run(|emitter| {
            let pushed = StackType::Reference(element_type.array_of());
            emitter
                .verifier
                .update_state(
                    &mut emitter.stream,
                    OpCode::NewArr,
                    Operand::Type(element_type),
                    &[Expectation::index()],
                    &[pushed],
                )
                .map(drop)
        })
    }

    /// Pops an array reference and pushes its length.
    ///
    /// # Errors
    /// Rejects a non-array operand.
    pub fn load_length(&mut self) -> Result<(), VerificationError> {
        self.run(|emitter| {
            emitter
                .verifier
                .update_state(
                    &mut emitter.stream,
                    OpCode::LdLen,
                    Operand::None,
                    &[Expectation::AnyArray],
                    &[StackType::NativeInt],
                )
                .map(drop)
        })
    }

    /// Pops an index and an array reference and pushes the element.
    ///
    /// # Errors
    /// Rejects a non-integer index or an array of the wrong element type.
    pub fn load_element(&mut self, element_type: &CliType) -> Result<(), VerificationError> {
        let element_type = element_type.clone();
        self.run(|emitter| {
            let array = Expectation::Assignable(StackType::Reference(element_type.array_of()));
            let pushed = StackType::of(&element_type);
            emitter
                .verifier
                .update_state(
                    &mut emitter.stream,
                    OpCode::LdElem,
                    Operand::Type(element_type),
                    &[Expectation::index(), array],
                    &[pushed],
                )
                .map(drop)
        })
    }

    /// Pops a value, an index and an array reference and stores the value
    /// into the array.
    ///
    /// # Errors
    /// Rejects a value not assignable to the element type, a non-integer
    /// index, or an array of the wrong element type.
    pub fn store_element(&mut self, element_type: &CliType) -> Result<(), VerificationError> {
        let element_type = element_type.clone();
        self.run(|emitter| {
            let value = Expectation::Assignable(StackType::of(&element_type));
            let array = Expectation::Assignable(StackType::Reference(element_type.array_of()));
            emitter
                .verifier
                .update_state(
                    &mut emitter.stream,
                    OpCode::StElem,
                    Operand::Type(element_type),
                    &[value, Expectation::index(), array],
                    &[],
                )
                .map(drop)
        })
    }

    /// Pops a reference, checks the cast at runtime and pushes it as the
    /// target type.
    ///
    /// # Errors
    /// Rejects value-type targets and non-reference operands.
    pub fn cast_class(&mut self, target: &CliType) -> Result<(), VerificationError> {
        self.cast(OpCode::CastClass, target)
    }

    /// Pops a reference and pushes it as the target type, or null when the
    /// value is not an instance of it.
    ///
    /// # Errors
    /// Rejects value-type targets and non-reference operands.
    pub fn is_instance(&mut self, target: &CliType) -> Result<(), VerificationError> {
        self.cast(OpCode::IsInst, target)
    }

    fn cast(&mut self, opcode: OpCode, target: &CliType) -> Result<(), VerificationError> {
        let target = target.clone();
        self.run(|emitter| {
            if !target.is_reference_type() {
                return Err(ErrorKind::InvalidOperation(format!(
                    "{opcode} requires a reference type, not {target}"
                )));
            }
            let pushed = StackType::Reference(target.clone());
            emitter
                .verifier
                .update_state(
                    &mut emitter.stream,
                    opcode,
                    Operand::Type(target),
                    &[Expectation::Assignable(StackType::Reference(CliType::Object))],
                    &[pushed],
                )
                .map(drop)
        })
    }

    fn emit_new_object(&mut self, ctor: CtorRef) -> Result<(), ErrorKind> {
        if ctor.owner.is_value_type() {
            return Err(ErrorKind::InvalidOperation(format!(
                "cannot construct value type {} with new_object",
                ctor.owner
            )));
        }
        let pops: Vec<_> = ctor
            .parameter_types
            .iter()
            .rev()
            .map(|it| Expectation::Assignable(StackType::of(it)))
            .collect();
        let pushed = StackType::Reference(ctor.owner.clone());
        self.verifier
            .update_state(
                &mut self.stream,
                OpCode::NewObj,
                Operand::Ctor(ctor),
                &pops,
                &[pushed],
            )
            .map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClassDef, MethodSig, PrimitiveType, ReturnType};

    fn int32() -> CliType {
        CliType::Primitive(PrimitiveType::Int32)
    }

    #[test]
    fn constructors_pop_their_arguments_in_reverse() {
        let widget = CliType::Class(
            ClassDef::builder("Acme.Widget")
                .constructor([int32(), CliType::String])
                .build(),
        );
        let mut emitter = MethodEmitter::new(MethodSig::new([], widget.clone()));
        emitter.load_constant(1).unwrap();
        emitter.load_constant("name").unwrap();
        emitter
            .new_object_with(&widget, &[int32(), CliType::String])
            .unwrap();
        emitter.ret().unwrap();
        assert!(emitter.create_delegate().is_ok());
    }

    #[test]
    fn constructor_argument_order_is_enforced() {
        let widget = CliType::Class(
            ClassDef::builder("Acme.Widget")
                .constructor([int32(), CliType::String])
                .build(),
        );
        let mut emitter = MethodEmitter::new(MethodSig::new([], ReturnType::Void));
        emitter.load_constant("name").unwrap();
        emitter.load_constant(1).unwrap();
        let error = emitter
            .new_object_with(&widget, &[int32(), CliType::String])
            .unwrap_err();
        assert!(matches!(
            error.kind,
            ErrorKind::TypeMismatch { opcode: OpCode::NewObj, position: 0, .. }
        ));
    }

    #[test]
    fn unknown_constructors_are_rejected() {
        let widget = CliType::Class(ClassDef::builder("Acme.Widget").constructor([]).build());
        let mut emitter = MethodEmitter::new(MethodSig::new([], ReturnType::Void));
        let error = emitter.new_object_with(&widget, &[int32()]).unwrap_err();
        assert!(matches!(error.kind, ErrorKind::NoSuchConstructor { .. }));
    }

    #[test]
    fn element_round_trip() {
        let mut emitter = MethodEmitter::new(MethodSig::new([], int32()));
        let array = emitter.declare_local(int32().array_of()).unwrap();
        emitter.load_constant(3).unwrap();
        emitter.new_array(&int32()).unwrap();
        emitter.store_local(&array).unwrap();
        emitter.load_local(&array).unwrap();
        emitter.load_constant(0).unwrap();
        emitter.load_constant(42).unwrap();
        emitter.store_element(&int32()).unwrap();
        emitter.load_local(&array).unwrap();
        emitter.load_constant(0).unwrap();
        emitter.load_element(&int32()).unwrap();
        emitter.ret().unwrap();
        assert!(emitter.create_delegate().is_ok());
    }

    #[test]
    fn load_length_requires_an_array() {
        let mut emitter = MethodEmitter::new(MethodSig::new([], ReturnType::Void));
        emitter.load_constant(1).unwrap();
        let error = emitter.load_length().unwrap_err();
        assert!(matches!(
            error.kind,
            ErrorKind::TypeMismatch { opcode: OpCode::LdLen, position: 0, .. }
        ));
    }

    #[test]
    fn casts_require_reference_targets() {
        let mut emitter = MethodEmitter::new(MethodSig::new([], ReturnType::Void));
        emitter.load_constant("value").unwrap();
        let error = emitter.cast_class(&int32()).unwrap_err();
        assert!(matches!(error.kind, ErrorKind::InvalidOperation(ref it) if it.contains("reference type")));
    }

    #[test]
    fn is_instance_refines_the_reference() {
        let mut emitter = MethodEmitter::new(MethodSig::new([], CliType::String));
        emitter.load_constant("value").unwrap();
        emitter.is_instance(&CliType::String).unwrap();
        emitter.ret().unwrap();
        assert!(emitter.create_delegate().is_ok());
    }
}
