//! The CLI (non-generic) type system as seen by callers and the verifier.

mod cli_type;
mod signature;

pub use cli_type::{ClassDef, ClassDefBuilder, CliType, PrimitiveType};
pub use signature::{MethodSig, ReturnType};
