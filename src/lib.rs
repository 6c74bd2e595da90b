#![warn(
    clippy::pedantic,
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    rust_2021_compatibility
)]
#![deny(rustdoc::broken_intra_doc_links)]

//! Welcome to `cilantro`, a library for building CIL method bodies with
//! eager verification.
//!
//! Every instruction is checked at its call site against the abstract state
//! of the evaluation stack, the control-flow labels and the exception
//! scopes; a malformed sequence is rejected with an error naming the
//! offending instruction and the stack it saw, instead of surfacing as an
//! opaque failure when the host JIT materializes the method.
//!
//! ```
//! use cilantro::{
//!     emit::MethodEmitter,
//!     types::{CliType, MethodSig, PrimitiveType},
//! };
//!
//! let int32 = CliType::Primitive(PrimitiveType::Int32);
//! let mut emitter = MethodEmitter::new(MethodSig::new([], int32.array_of()));
//! emitter.load_constant(5)?;
//! emitter.new_array(&int32)?;
//! emitter.ret()?;
//! let method = emitter.create_delegate()?;
//! assert_eq!(method.max_stack, 1);
//! # Ok::<(), cilantro::error::VerificationError>(())
//! ```

pub mod cil;
pub mod emit;
pub mod error;
pub mod host;
pub mod types;
pub mod verify;
