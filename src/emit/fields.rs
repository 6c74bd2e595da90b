//! Field loads and stores.

use crate::{
    cil::{FieldRef, OpCode, Operand},
    emit::MethodEmitter,
    error::VerificationError,
    host::CodeSink,
    types::CliType,
    verify::{Expectation, StackType},
};

/// What the instance operand of a field access may be: an object reference
/// for classes, the value itself or a managed pointer for value types.
fn instance_expectation(owner: &CliType) -> Expectation {
    if owner.is_value_type() {
        Expectation::AnyOf(vec![
            StackType::ManagedPointer(owner.clone()),
            StackType::Value(owner.clone()),
        ])
    } else {
        Expectation::Assignable(StackType::Reference(owner.clone()))
    }
}

impl<S: CodeSink> MethodEmitter<S> {
    /// Pushes the value of a field, popping the instance first unless the
    /// field is static.
    ///
    /// # Errors
    /// Rejects an instance operand that does not match the field's owner.
    pub fn load_field(&mut self, field: &FieldRef) -> Result<(), VerificationError> {
        let field = field.clone();
        self.run(|emitter| {
            let pushed = StackType::of(&field.field_type);
            let (opcode, pops) = if field.is_static() {
                (OpCode::LdsFld, Vec::new())
            } else {
                (OpCode::LdFld, vec![instance_expectation(&field.owner)])
            };
            emitter
                .verifier
                .update_state(
                    &mut emitter.stream,
                    opcode,
                    Operand::Field(field),
                    &pops,
                    &[pushed],
                )
                .map(drop)
        })
    }

    /// Pops a value (and the instance, unless the field is static) and
    /// stores it into a field.
    ///
    /// # Errors
    /// Rejects a value that is not assignable to the field's type, or an
    /// instance operand that does not match the field's owner.
    pub fn store_field(&mut self, field: &FieldRef) -> Result<(), VerificationError> {
        let field = field.clone();
        self.run(|emitter| {
            let value = Expectation::Assignable(StackType::of(&field.field_type));
            let (opcode, pops) = if field.is_static() {
                (OpCode::StsFld, vec![value])
            } else {
                // The value sits on top of the instance.
                (
                    OpCode::StFld,
                    vec![value, instance_expectation(&field.owner)],
                )
            };
            emitter
                .verifier
                .update_state(
                    &mut emitter.stream,
                    opcode,
                    Operand::Field(field),
                    &pops,
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
        cil::FieldFlags,
        error::ErrorKind,
        types::{ClassDef, MethodSig, PrimitiveType, ReturnType},
    };

    fn counter_field() -> FieldRef {
        FieldRef {
            owner: CliType::Class(ClassDef::builder("Acme.Counter").build()),
            name: "count".to_string(),
            field_type: CliType::Primitive(PrimitiveType::Int32),
            flags: FieldFlags::empty(),
        }
    }

    fn static_field() -> FieldRef {
        FieldRef {
            flags: FieldFlags::STATIC,
            ..counter_field()
        }
    }

    #[test]
    fn static_fields_need_no_instance() {
        let mut emitter = MethodEmitter::new(MethodSig::new([], ReturnType::Void));
        let field = static_field();
        emitter.load_field(&field).unwrap();
        emitter.store_field(&field).unwrap();
        emitter.ret().unwrap();
        assert!(emitter.create_delegate().is_ok());
    }

    #[test]
    fn instance_loads_pop_the_owner() {
        let field = counter_field();
        let mut emitter = MethodEmitter::new(MethodSig::new(
            [field.owner.clone()],
            ReturnType::Void,
        ));
        emitter.load_argument(0).unwrap();
        emitter.load_field(&field).unwrap();
        emitter.pop().unwrap();
        emitter.ret().unwrap();
        assert!(emitter.create_delegate().is_ok());
    }

    #[test]
    fn instance_loads_reject_a_missing_owner() {
        let mut emitter = MethodEmitter::new(MethodSig::new([], ReturnType::Void));
        let error = emitter.load_field(&counter_field()).unwrap_err();
        assert_eq!(
            error.kind,
            ErrorKind::StackUnderflow {
                opcode: OpCode::LdFld,
                required: 1,
                have: 0
            }
        );
    }

    #[test]
    fn stores_pop_value_then_instance() {
        let field = counter_field();
        let mut emitter = MethodEmitter::new(MethodSig::new(
            [field.owner.clone()],
            ReturnType::Void,
        ));
        emitter.load_argument(0).unwrap();
        emitter.load_constant(1).unwrap();
        emitter.store_field(&field).unwrap();
        emitter.ret().unwrap();
        assert!(emitter.create_delegate().is_ok());
    }

    #[test]
    fn stores_reject_a_wrong_value_type() {
        let field = counter_field();
        let mut emitter = MethodEmitter::new(MethodSig::new(
            [field.owner.clone()],
            ReturnType::Void,
        ));
        emitter.load_argument(0).unwrap();
        emitter.load_constant("nope").unwrap();
        let error = emitter.store_field(&field).unwrap_err();
        assert!(matches!(
            error.kind,
            ErrorKind::TypeMismatch { opcode: OpCode::StFld, position: 0, .. }
        ));
    }

    #[test]
    fn value_type_owners_accept_a_managed_pointer() {
        let point = CliType::Class(ClassDef::builder("Acme.Point").value_type().build());
        let field = FieldRef {
            owner: point.clone(),
            name: "x".to_string(),
            field_type: CliType::Primitive(PrimitiveType::Int32),
            flags: FieldFlags::empty(),
        };
        let mut emitter = MethodEmitter::new(MethodSig::new([], ReturnType::Void));
        let local = emitter.declare_local(point).unwrap();
        emitter.load_local_address(&local).unwrap();
        emitter.load_field(&field).unwrap();
        emitter.pop().unwrap();
        emitter.ret().unwrap();
        assert!(emitter.create_delegate().is_ok());
    }
}
