//! Integration with the host runtime that materializes verified code.
//!
//! The emitter streams verified instructions into a [`CodeSink`]; the sink
//! owns the byte layout and, at finalization, turns the accumulated method
//! into whatever the host runtime can execute. [`InMemorySink`] is the
//! default sink: it keeps everything in memory and finalizes into an
//! [`EmittedMethod`] that tests and host shims can inspect.

use std::sync::Arc;

use crate::{
    cil::{OpCode, TokenEntry},
    types::{CliType, ReturnType},
};

/// A declared local variable, as handed to the host at finalization.
#[derive(Debug, PartialEq, Clone)]
pub struct LocalDecl {
    /// The declared type of the local.
    pub ty: CliType,
    /// The optional debugging name of the local.
    pub name: Option<String>,
}

/// Everything the host needs to materialize a finished method.
#[derive(Debug)]
pub struct FinalizeRequest<'a> {
    /// The return type of the method.
    pub return_type: &'a ReturnType,
    /// The declared locals, in slot order.
    pub locals: &'a [LocalDecl],
    /// The maximum evaluation-stack depth reached by any program point.
    pub max_stack: u16,
    /// The metadata token table referenced by operand bytes.
    pub tokens: &'a [TokenEntry],
}

/// The byte-emitting backend consumed by the emitter.
///
/// Offsets are byte positions in the code the sink has accumulated so far.
pub trait CodeSink {
    /// What [`CodeSink::finalize`] produces; cached by the emitter and
    /// handed out on every finalization call.
    type Output: Clone;

    /// Appends the encoding of an opcode.
    fn append_opcode(&mut self, opcode: OpCode);

    /// Appends raw operand bytes.
    fn append_operand(&mut self, bytes: &[u8]);

    /// Overwrites previously appended bytes at `offset`.
    fn patch(&mut self, offset: usize, bytes: &[u8]);

    /// Opens a protected region at the current offset.
    fn begin_try(&mut self);

    /// Opens a catch handler for the innermost protected region.
    fn begin_catch(&mut self, exception_type: &CliType);

    /// Opens the finally handler for the innermost protected region.
    fn begin_finally(&mut self);

    /// Closes the innermost protected region.
    fn end_try(&mut self);

    /// The current byte offset.
    fn current_offset(&self) -> usize;

    /// Materializes the finished method.
    fn finalize(&mut self, request: FinalizeRequest<'_>) -> Self::Output;
}

/// The kind of an exception handler.
#[derive(Debug, PartialEq, Clone)]
pub enum HandlerKind {
    /// A catch handler for the given exception type.
    Catch(CliType),
    /// A finally handler.
    Finally,
}

/// One entry of a method's exception-handling table, with byte extents for
/// the protected region and the handler. Inner regions precede outer ones.
#[derive(Debug, PartialEq, Clone)]
pub struct ExceptionClause {
    /// Offset of the first protected byte.
    pub try_start: usize,
    /// Offset one past the last protected byte.
    pub try_end: usize,
    /// Offset of the first handler byte.
    pub handler_start: usize,
    /// Offset one past the last handler byte.
    pub handler_end: usize,
    /// What kind of handler this is.
    pub handler: HandlerKind,
}

/// A finalized method, ready for a host JIT shim or for inspection.
#[derive(Debug, Clone)]
pub struct EmittedMethod {
    /// The encoded instruction bytes.
    pub code: Vec<u8>,
    /// The exception-handling table.
    pub exception_clauses: Vec<ExceptionClause>,
    /// The declared locals, in slot order.
    pub locals: Vec<LocalDecl>,
    /// The maximum evaluation-stack depth.
    pub max_stack: u16,
    /// The return type.
    pub return_type: ReturnType,
    /// The metadata token table referenced by operand bytes.
    pub tokens: Vec<TokenEntry>,
}

#[derive(Debug, Clone)]
enum RegionEvent {
    TryStart,
    CatchStart(CliType),
    FinallyStart,
    TryEnd,
}

/// The default [`CodeSink`]: accumulates bytes and exception regions in
/// memory.
#[derive(Debug, Default)]
pub struct InMemorySink {
    code: Vec<u8>,
    events: Vec<(usize, RegionEvent)>,
}

impl InMemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The bytes accumulated so far.
    #[must_use]
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    fn build_clauses(&self) -> Vec<ExceptionClause> {
        struct OpenTry {
            start: usize,
            try_end: Option<usize>,
            open_handler: Option<(HandlerKind, usize)>,
        }

        let mut clauses = Vec::new();
        let mut open: Vec<OpenTry> = Vec::new();
        for (offset, event) in &self.events {
            match event {
                RegionEvent::TryStart => open.push(OpenTry {
                    start: *offset,
                    try_end: None,
                    open_handler: None,
                }),
                RegionEvent::CatchStart(_) | RegionEvent::FinallyStart => {
                    let top = open
                        .last_mut()
                        .expect("handler events are preceded by a try start");
                    if let Some((handler, handler_start)) = top.open_handler.take() {
                        clauses.push(ExceptionClause {
                            try_start: top.start,
                            try_end: top.try_end.expect("a handler was already open"),
                            handler_start,
                            handler_end: *offset,
                            handler,
                        });
                    }
                    top.try_end.get_or_insert(*offset);
                    let handler = match event {
                        RegionEvent::CatchStart(it) => HandlerKind::Catch(it.clone()),
                        _ => HandlerKind::Finally,
                    };
                    top.open_handler = Some((handler, *offset));
                }
                RegionEvent::TryEnd => {
                    let top = open.pop().expect("try ends are preceded by a try start");
                    let (handler, handler_start) = top
                        .open_handler
                        .expect("a protected region has at least one handler");
                    clauses.push(ExceptionClause {
                        try_start: top.start,
                        try_end: top.try_end.expect("a handler was already open"),
                        handler_start,
                        handler_end: *offset,
                        handler,
                    });
                }
            }
        }
        clauses
    }
}

impl CodeSink for InMemorySink {
    type Output = Arc<EmittedMethod>;

    fn append_opcode(&mut self, opcode: OpCode) {
        self.code.extend_from_slice(opcode.encoding());
    }

    fn append_operand(&mut self, bytes: &[u8]) {
        self.code.extend_from_slice(bytes);
    }

    fn patch(&mut self, offset: usize, bytes: &[u8]) {
        self.code[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn begin_try(&mut self) {
        self.events.push((self.code.len(), RegionEvent::TryStart));
    }

    fn begin_catch(&mut self, exception_type: &CliType) {
        self.events.push((
            self.code.len(),
            RegionEvent::CatchStart(exception_type.clone()),
        ));
    }

    fn begin_finally(&mut self) {
        self.events
            .push((self.code.len(), RegionEvent::FinallyStart));
    }

    fn end_try(&mut self) {
        self.events.push((self.code.len(), RegionEvent::TryEnd));
    }

    fn current_offset(&self) -> usize {
        self.code.len()
    }

    fn finalize(&mut self, request: FinalizeRequest<'_>) -> Self::Output {
        Arc::new(EmittedMethod {
            code: self.code.clone(),
            exception_clauses: self.build_clauses(),
            locals: request.locals.to_vec(),
            max_stack: request.max_stack,
            return_type: request.return_type.clone(),
            tokens: request.tokens.to_vec(),
        })
    }
}
