//! CLI types and class metadata.

use std::{fmt::Display, hash::Hash, sync::Arc};

use crate::{
    cil::{CtorRef, MethodFlags, MethodRef},
    types::MethodSig,
};

/// A primitive CLI type.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum PrimitiveType {
    /// The `bool` type.
    Bool,
    /// The `char` type (UTF-16 code unit).
    Char,
    /// The `int8` type.
    Int8,
    /// The `unsigned int8` type.
    UInt8,
    /// The `int16` type.
    Int16,
    /// The `unsigned int16` type.
    UInt16,
    /// The `int32` type.
    Int32,
    /// The `unsigned int32` type.
    UInt32,
    /// The `int64` type.
    Int64,
    /// The `unsigned int64` type.
    UInt64,
    /// The `float32` type.
    Float32,
    /// The `float64` type.
    Float64,
    /// The `native int` type.
    NativeInt,
    /// The `native unsigned int` type.
    NativeUInt,
}

impl Display for PrimitiveType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Char => write!(f, "char"),
            Self::Int8 => write!(f, "int8"),
            Self::UInt8 => write!(f, "unsigned int8"),
            Self::Int16 => write!(f, "int16"),
            Self::UInt16 => write!(f, "unsigned int16"),
            Self::Int32 => write!(f, "int32"),
            Self::UInt32 => write!(f, "unsigned int32"),
            Self::Int64 => write!(f, "int64"),
            Self::UInt64 => write!(f, "unsigned int64"),
            Self::Float32 => write!(f, "float32"),
            Self::Float64 => write!(f, "float64"),
            Self::NativeInt => write!(f, "native int"),
            Self::NativeUInt => write!(f, "native unsigned int"),
        }
    }
}

/// A CLI type.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum CliType {
    /// A primitive type.
    Primitive(PrimitiveType),
    /// The `System.Object` root class.
    Object,
    /// The `System.String` class.
    String,
    /// A class or value type described by its metadata.
    Class(Arc<ClassDef>),
    /// A single-dimensional, zero-based array type.
    Array(Box<CliType>),
}

impl Display for CliType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primitive(it) => it.fmt(f),
            Self::Object => write!(f, "System.Object"),
            Self::String => write!(f, "System.String"),
            Self::Class(it) => write!(f, "{}", it.name()),
            Self::Array(it) => write!(f, "{it}[]"),
        }
    }
}

impl From<PrimitiveType> for CliType {
    fn from(value: PrimitiveType) -> Self {
        Self::Primitive(value)
    }
}

impl From<Arc<ClassDef>> for CliType {
    fn from(value: Arc<ClassDef>) -> Self {
        Self::Class(value)
    }
}

impl CliType {
    /// Creates an array type with `self` as its element type.
    #[must_use]
    pub fn array_of(&self) -> Self {
        Self::Array(Box::new(self.clone()))
    }

    /// The `System.Exception` class, the base of every throwable type.
    #[must_use]
    pub fn exception() -> Self {
        Self::Class(ClassDef::exception())
    }

    /// Checks whether values of this type are value types (copied by value,
    /// never null).
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        match self {
            Self::Primitive(_) => true,
            Self::Class(def) => def.is_value_type(),
            Self::Object | Self::String | Self::Array(_) => false,
        }
    }

    /// Checks whether values of this type live on the stack as object
    /// references.
    #[must_use]
    pub fn is_reference_type(&self) -> bool {
        !self.is_value_type()
    }

    /// Checks the CLI subtyping relation between two types.
    ///
    /// Every reference type is a subtype of [`CliType::Object`]; classes
    /// follow their base-class chain; arrays are covariant in reference
    /// element types. Value types are subtypes of themselves only.
    #[must_use]
    pub fn is_subtype_of(&self, other: &Self) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (it, Self::Object) => it.is_reference_type(),
            (Self::Class(sub), Self::Class(sup)) => sub.has_base(sup),
            (Self::Array(sub), Self::Array(sup)) => {
                sub.is_reference_type() && sub.is_subtype_of(sup)
            }
            _ => false,
        }
    }

    /// Resolves a constructor of this type by exact parameter-type match.
    #[must_use]
    pub fn find_constructor(&self, parameter_types: &[CliType]) -> Option<CtorRef> {
        let Self::Class(def) = self else {
            return None;
        };
        def.constructors
            .iter()
            .find(|it| it.as_slice() == parameter_types)
            .map(|it| CtorRef {
                owner: self.clone(),
                parameter_types: it.clone(),
            })
    }

    /// Resolves a method of this type by name and exact parameter-type match.
    #[must_use]
    pub fn find_method(&self, name: &str, parameter_types: &[CliType]) -> Option<MethodRef> {
        let Self::Class(def) = self else {
            return None;
        };
        def.methods
            .iter()
            .find(|it| it.name == name && it.signature.parameter_types == parameter_types)
            .map(|it| MethodRef {
                owner: self.clone(),
                name: it.name.clone(),
                signature: it.signature.clone(),
                flags: it.flags,
            })
    }
}

/// Metadata of a class or value type.
///
/// Two [`ClassDef`]s are the same type iff they have the same full name, so
/// independently constructed definitions of e.g. `System.Exception` compare
/// equal.
#[derive(Debug, Clone)]
pub struct ClassDef {
    name: String,
    base: Option<Arc<ClassDef>>,
    value_type: bool,
    constructors: Vec<Vec<CliType>>,
    methods: Vec<MethodDecl>,
}

#[derive(Debug, Clone)]
struct MethodDecl {
    name: String,
    signature: MethodSig,
    flags: MethodFlags,
}

impl PartialEq for ClassDef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ClassDef {}

impl Hash for ClassDef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl ClassDef {
    const EXCEPTION_NAME: &'static str = "System.Exception";

    /// Starts building a class with the given full name.
    pub fn builder<S: Into<String>>(name: S) -> ClassDefBuilder {
        ClassDefBuilder {
            name: name.into(),
            base: None,
            value_type: false,
            constructors: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// The `System.Exception` class definition.
    #[must_use]
    pub fn exception() -> Arc<Self> {
        Self::builder(Self::EXCEPTION_NAME)
            .constructor([])
            .build()
    }

    /// The full name of the type.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The base class, if one was declared.
    ///
    /// `None` means the class extends [`CliType::Object`] directly.
    #[must_use]
    pub fn base(&self) -> Option<&Arc<ClassDef>> {
        self.base.as_ref()
    }

    /// Whether this definition describes a value type.
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        self.value_type
    }

    fn has_base(&self, sup: &ClassDef) -> bool {
        let mut current = self.base.as_deref();
        while let Some(it) = current {
            if it == sup {
                return true;
            }
            current = it.base.as_deref();
        }
        false
    }
}

/// Builder for [`ClassDef`].
#[derive(Debug)]
pub struct ClassDefBuilder {
    name: String,
    base: Option<Arc<ClassDef>>,
    value_type: bool,
    constructors: Vec<Vec<CliType>>,
    methods: Vec<MethodDecl>,
}

impl ClassDefBuilder {
    /// Declares the base class.
    #[must_use]
    pub fn extends(mut self, base: Arc<ClassDef>) -> Self {
        self.base = Some(base);
        self
    }

    /// Marks the type being built as a value type.
    #[must_use]
    pub fn value_type(mut self) -> Self {
        self.value_type = true;
        self
    }

    /// Registers a constructor with the given parameter types.
    #[must_use]
    pub fn constructor<P: Into<Vec<CliType>>>(mut self, parameter_types: P) -> Self {
        self.constructors.push(parameter_types.into());
        self
    }

    /// Registers a method.
    #[must_use]
    pub fn method<S: Into<String>>(
        mut self,
        name: S,
        signature: MethodSig,
        flags: MethodFlags,
    ) -> Self {
        self.methods.push(MethodDecl {
            name: name.into(),
            signature,
            flags,
        });
        self
    }

    /// Finishes building the class.
    #[must_use]
    pub fn build(self) -> Arc<ClassDef> {
        Arc::new(ClassDef {
            name: self.name,
            base: self.base,
            value_type: self.value_type,
            constructors: self.constructors,
            methods: self.methods,
        })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::types::ReturnType;

    fn widget() -> Arc<ClassDef> {
        ClassDef::builder("Acme.Widget")
            .constructor([])
            .constructor([CliType::Primitive(PrimitiveType::Int32)])
            .build()
    }

    #[test]
    fn display() {
        assert_eq!(CliType::Object.to_string(), "System.Object");
        assert_eq!(CliType::String.to_string(), "System.String");
        assert_eq!(CliType::Class(widget()).to_string(), "Acme.Widget");
        assert_eq!(
            CliType::Primitive(PrimitiveType::Int32)
                .array_of()
                .to_string(),
            "int32[]"
        );
    }

    #[test]
    fn subtyping_follows_base_chain() {
        let base = ClassDef::builder("Acme.Base").build();
        let mid = ClassDef::builder("Acme.Mid").extends(base.clone()).build();
        let leaf = ClassDef::builder("Acme.Leaf").extends(mid.clone()).build();

        let base = CliType::Class(base);
        let mid = CliType::Class(mid);
        let leaf = CliType::Class(leaf);
        assert!(leaf.is_subtype_of(&leaf));
        assert!(leaf.is_subtype_of(&mid));
        assert!(leaf.is_subtype_of(&base));
        assert!(leaf.is_subtype_of(&CliType::Object));
        assert!(!base.is_subtype_of(&leaf));
        assert!(!CliType::Object.is_subtype_of(&leaf));
    }

    #[test]
    fn value_types_are_not_object_subtypes() {
        let point = CliType::Class(ClassDef::builder("Acme.Point").value_type().build());
        assert!(point.is_value_type());
        assert!(!point.is_subtype_of(&CliType::Object));
    }

    #[test]
    fn array_covariance_is_reference_only() {
        let exception = CliType::exception();
        assert!(
            exception
                .array_of()
                .is_subtype_of(&CliType::Object.array_of())
        );
        let int32 = CliType::Primitive(PrimitiveType::Int32);
        assert!(!int32.array_of().is_subtype_of(&CliType::Object.array_of()));
    }

    #[test]
    fn constructor_resolution_is_exact() {
        let ty = CliType::Class(widget());
        let int32 = CliType::Primitive(PrimitiveType::Int32);
        assert!(ty.find_constructor(&[]).is_some());
        let ctor = ty.find_constructor(std::slice::from_ref(&int32)).unwrap();
        assert_eq!(ctor.parameter_types, vec![int32.clone()]);
        assert!(
            ty.find_constructor(&[CliType::Primitive(PrimitiveType::Int64)])
                .is_none()
        );
        assert!(ty.find_constructor(&[int32.clone(), int32]).is_none());
    }

    #[test]
    fn method_resolution_matches_name_and_parameters() {
        let sig = MethodSig::new([], ReturnType::Void);
        let ty = CliType::Class(
            ClassDef::builder("Acme.Widget")
                .method("Run", sig, MethodFlags::empty())
                .build(),
        );
        assert!(ty.find_method("Run", &[]).is_some());
        assert!(ty.find_method("Walk", &[]).is_none());
        assert!(
            ty.find_method("Run", &[CliType::Primitive(PrimitiveType::Int32)])
                .is_none()
        );
    }

    #[test]
    fn exception_classes_unify_by_name() {
        assert_eq!(CliType::exception(), CliType::exception());
        let custom = CliType::Class(
            ClassDef::builder("Acme.Boom")
                .extends(ClassDef::exception())
                .build(),
        );
        assert!(custom.is_subtype_of(&CliType::exception()));
    }

    proptest! {
        #[test]
        fn primitives_are_value_types(primitive in any::<PrimitiveType>()) {
            prop_assert!(CliType::Primitive(primitive).is_value_type());
        }

        #[test]
        fn array_of_wraps_element_display(primitive in any::<PrimitiveType>()) {
            let ty = CliType::Primitive(primitive);
            prop_assert_eq!(ty.array_of().to_string(), format!("{ty}[]"));
        }
    }
}
