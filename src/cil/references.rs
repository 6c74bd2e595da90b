//! References to metadata members.

use bitflags::bitflags;

use crate::types::{CliType, MethodSig};

bitflags! {
    /// Attributes of a method that are relevant to call verification.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MethodFlags: u16 {
        /// The method is static (no `this` operand).
        const STATIC = 0x0010;
        /// The method is virtual and may be dispatched with `callvirt`.
        const VIRTUAL = 0x0040;
    }
}

bitflags! {
    /// Attributes of a field that are relevant to access verification.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FieldFlags: u16 {
        /// The field is static (no instance operand).
        const STATIC = 0x0010;
    }
}

/// A reference to a method.
#[derive(Debug, PartialEq, Eq, Hash, Clone, derive_more::Display)]
#[display("{owner}::{name}")]
pub struct MethodRef {
    /// The type that declares the method.
    pub owner: CliType,
    /// The name of the method.
    pub name: String,
    /// The signature of the method.
    pub signature: MethodSig,
    /// The method's attributes.
    pub flags: MethodFlags,
}

impl MethodRef {
    /// Checks whether the method is static.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodFlags::STATIC)
    }

    /// Checks whether the method is virtual.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.flags.contains(MethodFlags::VIRTUAL)
    }
}

/// A reference to a constructor.
#[derive(Debug, PartialEq, Eq, Hash, Clone, derive_more::Display)]
#[display("{owner}::.ctor")]
pub struct CtorRef {
    /// The type that declares the constructor.
    pub owner: CliType,
    /// The types of the constructor's parameters, in declaration order.
    pub parameter_types: Vec<CliType>,
}

impl CtorRef {
    /// Creates a constructor reference.
    pub fn new<P: Into<Vec<CliType>>>(owner: CliType, parameter_types: P) -> Self {
        Self {
            owner,
            parameter_types: parameter_types.into(),
        }
    }
}

/// A reference to a field.
#[derive(Debug, PartialEq, Eq, Hash, Clone, derive_more::Display)]
#[display("{owner}::{name}")]
pub struct FieldRef {
    /// The type that declares the field.
    pub owner: CliType,
    /// The name of the field.
    pub name: String,
    /// The type of the field.
    pub field_type: CliType,
    /// The field's attributes.
    pub flags: FieldFlags,
}

impl FieldRef {
    /// Checks whether the field is static.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(FieldFlags::STATIC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PrimitiveType, ReturnType};

    #[test]
    fn display() {
        let owner = CliType::Object;
        let method = MethodRef {
            owner: owner.clone(),
            name: "ToString".to_string(),
            signature: MethodSig::new([], CliType::String),
            flags: MethodFlags::VIRTUAL,
        };
        assert_eq!(method.to_string(), "System.Object::ToString");

        let ctor = CtorRef::new(owner.clone(), []);
        assert_eq!(ctor.to_string(), "System.Object::.ctor");

        let field = FieldRef {
            owner,
            name: "value".to_string(),
            field_type: CliType::Primitive(PrimitiveType::Int32),
            flags: FieldFlags::empty(),
        };
        assert_eq!(field.to_string(), "System.Object::value");
    }

    #[test]
    fn flags() {
        let method = MethodRef {
            owner: CliType::Object,
            name: "Parse".to_string(),
            signature: MethodSig::new([CliType::String], ReturnType::Void),
            flags: MethodFlags::STATIC,
        };
        assert!(method.is_static());
        assert!(!method.is_virtual());
    }
}
