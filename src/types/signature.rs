//! Method signatures.

use itertools::Itertools;

use crate::types::CliType;

/// The return type of a method.
#[derive(Debug, PartialEq, Eq, Hash, Clone, derive_more::Display, derive_more::From)]
pub enum ReturnType {
    /// The method does not return a value.
    #[display("void")]
    Void,
    /// The method returns a value of the given type.
    Returns(CliType),
}

/// The stack-relevant shape of a method: its parameter types and return type.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct MethodSig {
    /// The types of the parameters, in declaration order.
    pub parameter_types: Vec<CliType>,
    /// The return type.
    pub return_type: ReturnType,
}

impl MethodSig {
    /// Creates a signature from parameter types and a return type.
    pub fn new<P, R>(parameter_types: P, return_type: R) -> Self
    where
        P: Into<Vec<CliType>>,
        R: Into<ReturnType>,
    {
        Self {
            parameter_types: parameter_types.into(),
            return_type: return_type.into(),
        }
    }
}

impl std::fmt::Display for MethodSig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}) -> {}",
            self.parameter_types.iter().join(", "),
            self.return_type
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PrimitiveType;

    #[test]
    fn display() {
        let sig = MethodSig::new(
            [
                CliType::Primitive(PrimitiveType::Int32),
                CliType::String,
            ],
            CliType::Primitive(PrimitiveType::Int64),
        );
        assert_eq!(sig.to_string(), "(int32, System.String) -> int64");
        let void = MethodSig::new([], ReturnType::Void);
        assert_eq!(void.to_string(), "() -> void");
    }
}
