//! Verification types: the lattice of values on the evaluation stack.

use std::fmt::Display;

use itertools::Itertools;

use crate::types::{CliType, PrimitiveType};

/// The verification type of one slot on the evaluation stack.
///
/// Every CLI type is canonicalized to one of these when it is pushed; the
/// small integer types all widen to [`StackType::Int32`], as the stack never
/// holds values narrower than four bytes.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum StackType {
    /// A 32-bit integer (also bool, char and the 8/16-bit integers).
    Int32,
    /// A 64-bit integer.
    Int64,
    /// A pointer-sized integer.
    NativeInt,
    /// A 32-bit float.
    Float32,
    /// A 64-bit float.
    Float64,
    /// An object reference of the given type.
    Reference(CliType),
    /// A managed pointer to a value of the given type.
    ManagedPointer(CliType),
    /// A value type held by value.
    Value(CliType),
    /// The `null` literal, which satisfies any reference expectation.
    NullLiteral,
    /// A value of the given type that the verifier cannot refine further;
    /// it satisfies only expectations of exactly the same type.
    Opaque(CliType),
}

impl StackType {
    /// Canonicalizes a CLI type to the verification type it has on the
    /// evaluation stack.
    #[must_use]
    pub fn of(ty: &CliType) -> Self {
        use PrimitiveType::{
            Bool, Char, Float32, Float64, Int8, Int16, Int32, Int64, NativeInt, NativeUInt, UInt8,
            UInt16, UInt32, UInt64,
        };
        match ty {
            CliType::Primitive(Bool | Char | Int8 | UInt8 | Int16 | UInt16 | Int32 | UInt32) => {
                Self::Int32
            }
            CliType::Primitive(Int64 | UInt64) => Self::Int64,
            CliType::Primitive(NativeInt | NativeUInt) => Self::NativeInt,
            CliType::Primitive(Float32) => Self::Float32,
            CliType::Primitive(Float64) => Self::Float64,
            CliType::Class(def) if def.is_value_type() => Self::Value(ty.clone()),
            CliType::Object | CliType::String | CliType::Class(_) | CliType::Array(_) => {
                Self::Reference(ty.clone())
            }
        }
    }

    /// Checks whether a value of this type satisfies an expectation of
    /// `expected`, per the CLI verification-type rules.
    ///
    /// This is the only place where assignability is defined: `Int32` widens
    /// to `NativeInt` (never the other way around), the `null` literal
    /// satisfies any reference, references follow the subtyping relation of
    /// their types, and value types and managed pointers match exactly.
    #[must_use]
    pub fn assignable_to(&self, expected: &Self) -> bool {
        if self == expected {
            return true;
        }
        match (self, expected) {
            (Self::Int32, Self::NativeInt) => true,
            (Self::NullLiteral, Self::Reference(_)) => true,
            (Self::Reference(actual), Self::Reference(target)) => actual.is_subtype_of(target),
            _ => false,
        }
    }

    /// Checks whether this is one of the numeric verification types.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Int32 | Self::Int64 | Self::NativeInt | Self::Float32 | Self::Float64
        )
    }

    /// Checks whether this is one of the integer verification types.
    #[must_use]
    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Int32 | Self::Int64 | Self::NativeInt)
    }
}

impl Display for StackType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int32 => write!(f, "int32"),
            Self::Int64 => write!(f, "int64"),
            Self::NativeInt => write!(f, "native int"),
            Self::Float32 => write!(f, "float32"),
            Self::Float64 => write!(f, "float64"),
            Self::Reference(it) => it.fmt(f),
            Self::ManagedPointer(it) => write!(f, "{it}&"),
            Self::Value(it) => it.fmt(f),
            Self::NullLiteral => write!(f, "null"),
            Self::Opaque(it) => write!(f, "opaque {it}"),
        }
    }
}

/// What an opcode expects of one popped operand.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Expectation {
    /// Any single value.
    Any,
    /// A value assignable to the given verification type.
    Assignable(StackType),
    /// A value assignable to one of the given verification types.
    AnyOf(Vec<StackType>),
    /// A reference to an array of any element type.
    AnyArray,
}

impl Expectation {
    /// An operand usable as an array or element index.
    #[must_use]
    pub fn index() -> Self {
        Self::AnyOf(vec![StackType::Int32, StackType::NativeInt])
    }

    /// Checks whether a popped value satisfies this expectation.
    #[must_use]
    pub fn satisfied_by(&self, actual: &StackType) -> bool {
        match self {
            Self::Any => true,
            Self::Assignable(expected) => actual.assignable_to(expected),
            Self::AnyOf(alternatives) => {
                alternatives.iter().any(|it| actual.assignable_to(it))
            }
            Self::AnyArray => matches!(
                actual,
                StackType::Reference(CliType::Array(_)) | StackType::NullLiteral
            ),
        }
    }
}

impl Display for Expectation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => write!(f, "any value"),
            Self::Assignable(it) => it.fmt(f),
            Self::AnyOf(alternatives) => write!(f, "{}", alternatives.iter().join("|")),
            Self::AnyArray => write!(f, "array reference"),
        }
    }
}

/// Renders a stack shape for diagnostics, bottom first.
pub(crate) fn render_shape(shape: &[StackType]) -> String {
    shape.iter().join(", ")
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::types::ClassDef;

    fn arb_stack_type() -> impl Strategy<Value = StackType> {
        prop_oneof![
            Just(StackType::Int32),
            Just(StackType::Int64),
            Just(StackType::NativeInt),
            Just(StackType::Float32),
            Just(StackType::Float64),
            Just(StackType::NullLiteral),
            Just(StackType::Reference(CliType::Object)),
            Just(StackType::Reference(CliType::String)),
            Just(StackType::Value(CliType::Primitive(PrimitiveType::Int32))),
            Just(StackType::ManagedPointer(CliType::String)),
            Just(StackType::Opaque(CliType::Object)),
            any::<PrimitiveType>().prop_map(|it| StackType::of(&CliType::Primitive(it))),
        ]
    }

    proptest! {
        #[test]
        fn assignability_is_reflexive(ty in arb_stack_type()) {
            prop_assert!(ty.assignable_to(&ty));
        }

        #[test]
        fn null_satisfies_any_reference(ty in arb_stack_type()) {
            if let StackType::Reference(_) = &ty {
                prop_assert!(StackType::NullLiteral.assignable_to(&ty));
            }
        }
    }

    #[test]
    fn small_integers_widen_to_int32() {
        for primitive in [
            PrimitiveType::Bool,
            PrimitiveType::Char,
            PrimitiveType::Int8,
            PrimitiveType::UInt16,
            PrimitiveType::UInt32,
        ] {
            assert_eq!(StackType::of(&CliType::Primitive(primitive)), StackType::Int32);
        }
    }

    #[test]
    fn int32_widens_to_native_int_only() {
        assert!(StackType::Int32.assignable_to(&StackType::NativeInt));
        assert!(!StackType::NativeInt.assignable_to(&StackType::Int32));
        assert!(!StackType::Int64.assignable_to(&StackType::Int32));
        assert!(!StackType::Int32.assignable_to(&StackType::Int64));
    }

    #[test]
    fn references_follow_subtyping() {
        let exception = StackType::Reference(CliType::exception());
        let object = StackType::Reference(CliType::Object);
        assert!(exception.assignable_to(&object));
        assert!(!object.assignable_to(&exception));
    }

    #[test]
    fn value_types_match_exactly() {
        let point = CliType::Class(ClassDef::builder("Acme.Point").value_type().build());
        let size = CliType::Class(ClassDef::builder("Acme.Size").value_type().build());
        assert!(StackType::of(&point).assignable_to(&StackType::Value(point.clone())));
        assert!(!StackType::of(&point).assignable_to(&StackType::Value(size)));
        assert!(!StackType::of(&point).assignable_to(&StackType::Reference(CliType::Object)));
    }

    #[test]
    fn opaque_matches_itself_only() {
        let opaque = StackType::Opaque(CliType::Object);
        assert!(opaque.assignable_to(&StackType::Opaque(CliType::Object)));
        assert!(!opaque.assignable_to(&StackType::Reference(CliType::Object)));
        assert!(!StackType::Reference(CliType::Object).assignable_to(&opaque));
    }

    #[test]
    fn index_expectation() {
        let index = Expectation::index();
        assert!(index.satisfied_by(&StackType::Int32));
        assert!(index.satisfied_by(&StackType::NativeInt));
        assert!(!index.satisfied_by(&StackType::Int64));
        assert!(!index.satisfied_by(&StackType::Reference(CliType::String)));
    }

    #[test]
    fn array_expectation() {
        let arrays = Expectation::AnyArray;
        assert!(arrays.satisfied_by(&StackType::Reference(CliType::Object.array_of())));
        assert!(arrays.satisfied_by(&StackType::NullLiteral));
        assert!(!arrays.satisfied_by(&StackType::Reference(CliType::Object)));
    }

    #[test]
    fn expectation_display() {
        assert_eq!(Expectation::index().to_string(), "int32|native int");
        assert_eq!(Expectation::Any.to_string(), "any value");
        assert_eq!(
            Expectation::Assignable(StackType::Reference(CliType::String)).to_string(),
            "System.String"
        );
    }
}
