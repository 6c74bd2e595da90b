//! The emitting surface: one method per opcode family, each enforcing its
//! opcode-local preconditions before funneling through the verifier.

mod arithmetic;
mod branches;
mod calls;
mod constants;
mod exceptions;
mod fields;
mod locals;
mod objects;

use std::sync::atomic::{AtomicU64, Ordering};

use crate::{
    cil::{CodeStream, InstructionLog, LabelId},
    error::{ErrorKind, VerificationError},
    host::{CodeSink, InMemorySink},
    types::MethodSig,
    verify::state::Verifier,
};

/// Hands out process-unique emitter identities, so that tokens from
/// different emitters can never be confused.
static EMITTER_IDS: AtomicU64 = AtomicU64::new(0);

/// A jump target produced by [`MethodEmitter::define_label`].
///
/// A label is usable only with the emitter that defined it.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, derive_more::Display)]
#[display("{id}")]
pub struct Label {
    id: LabelId,
    owner: u64,
}

/// A local-variable slot produced by [`MethodEmitter::declare_local`].
///
/// A local is usable only with the emitter that declared it.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, derive_more::Display)]
#[display("loc{index}")]
pub struct Local {
    index: u16,
    owner: u64,
}

/// Builds one method as a stream of eagerly verified CIL instructions.
///
/// Every operation either verifies and emits, or rejects the call with a
/// [`VerificationError`] pointing at the offending instruction and the
/// current abstract stack. A rejection poisons the emitter; callers fix the
/// offending call and build the method again.
///
/// Once [`MethodEmitter::create_delegate`] succeeds the emitter is
/// read-only: further emission is rejected, and repeated finalization
/// returns the cached result.
pub struct MethodEmitter<S: CodeSink = InMemorySink> {
    id: u64,
    signature: MethodSig,
    verifier: Verifier,
    stream: CodeStream<S>,
    delegate: Option<S::Output>,
    poisoned: bool,
}

impl MethodEmitter<InMemorySink> {
    /// Creates an emitter for a method with the given signature, emitting
    /// into an [`InMemorySink`].
    #[must_use]
    pub fn new(signature: MethodSig) -> Self {
        Self::with_sink(signature, InMemorySink::new())
    }
}

impl<S: CodeSink> MethodEmitter<S> {
    /// Creates an emitter for a method with the given signature, emitting
    /// into the given host sink.
    pub fn with_sink(signature: MethodSig, sink: S) -> Self {
        Self {
            id: EMITTER_IDS.fetch_add(1, Ordering::Relaxed),
            verifier: Verifier::new(&signature),
            signature,
            stream: CodeStream::new(sink),
            delegate: None,
            poisoned: false,
        }
    }

    /// The signature of the method under construction.
    #[must_use]
    pub fn signature(&self) -> &MethodSig {
        &self.signature
    }

    /// The instructions emitted so far, renderable one per line.
    #[must_use]
    pub fn instruction_log(&self) -> InstructionLog<'_> {
        InstructionLog(self.stream.instructions())
    }

    /// Finalizes the method and hands it to the host sink.
    ///
    /// Checks that every label is marked, every exception scope is closed,
    /// every forward branch is patched, and that no path falls off the end
    /// of the method. The produced delegate is cached: calling this again
    /// returns the same result without further mutation.
    ///
    /// # Errors
    /// Rejects an incomplete or poisoned method, with the offending label or
    /// scope named in the error.
    pub fn create_delegate(&mut self) -> Result<S::Output, VerificationError> {
        if let Some(delegate) = &self.delegate {
            return Ok(delegate.clone());
        }
        if self.poisoned {
            return Err(self.contextualize(Self::poisoned_kind()));
        }
        if let Err(kind) = self.verifier.check_complete() {
            self.poisoned = true;
            return Err(self.contextualize(kind));
        }
        let max_stack =
            u16::try_from(self.verifier.max_stack()).expect("the stack depth stays within u16");
        let return_type = self.verifier.return_type().clone();
        let locals = self.verifier.local_decls();
        let delegate = self.stream.finalize(&return_type, &locals, max_stack);
        self.delegate = Some(delegate.clone());
        Ok(delegate)
    }

    /// Runs one verified operation, attaching the program point and stack
    /// snapshot to any failure and poisoning the emitter on rejection.
    pub(crate) fn run<T>(
        &mut self,
        operation: impl FnOnce(&mut Self) -> Result<T, ErrorKind>,
    ) -> Result<T, VerificationError> {
        if let Err(kind) = self.ready() {
            return Err(self.contextualize(kind));
        }
        match operation(self) {
            Ok(it) => Ok(it),
            Err(kind) => {
                self.poisoned = true;
                Err(self.contextualize(kind))
            }
        }
    }

    fn ready(&self) -> Result<(), ErrorKind> {
        if self.poisoned {
            Err(Self::poisoned_kind())
        } else if self.delegate.is_some() {
            Err(ErrorKind::InvalidOperation(
                "the method is finalized; no further instructions can be emitted".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn poisoned_kind() -> ErrorKind {
        ErrorKind::InvalidOperation(
            "the emitter was poisoned by an earlier verification failure; \
             discard it and build the method again"
                .to_string(),
        )
    }

    fn contextualize(&self, kind: ErrorKind) -> VerificationError {
        VerificationError {
            kind,
            at: self.stream.next_index(),
            stack: self.verifier.stack_snapshot(),
        }
    }

    pub(crate) fn check_label(&self, label: &Label) -> Result<LabelId, ErrorKind> {
        if label.owner == self.id {
            Ok(label.id)
        } else {
            Err(ErrorKind::Ownership { token: "label" })
        }
    }

    pub(crate) fn check_local(&self, local: &Local) -> Result<u16, ErrorKind> {
        if local.owner == self.id {
            Ok(local.index)
        } else {
            Err(ErrorKind::Ownership { token: "local" })
        }
    }

    pub(crate) fn label_token(&self, id: LabelId) -> Label {
        Label {
            id,
            owner: self.id,
        }
    }

    pub(crate) fn local_token(&self, index: u16) -> Local {
        Local {
            index,
            owner: self.id,
        }
    }
}

impl<S: CodeSink> std::fmt::Debug for MethodEmitter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodEmitter")
            .field("signature", &self.signature)
            .field("poisoned", &self.poisoned)
            .field("finalized", &self.delegate.is_some())
            .finish_non_exhaustive()
    }
}
