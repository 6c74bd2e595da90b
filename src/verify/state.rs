//! The verifier core: one state machine through which every instruction
//! funnels.

use std::{
    collections::BTreeMap,
    sync::{Arc, atomic::AtomicU64},
};

use crate::{
    cil::{CodeStream, InstructionIndex, LabelId, OpCode, Operand, PatchSite},
    error::ErrorKind,
    host::{CodeSink, LocalDecl},
    types::{CliType, MethodSig, ReturnType},
    verify::{
        EvalStack, Expectation, StackId, StackType,
        scope::{CatchFrame, FinallyFrame, ScopeFrame, ScopeId, TryFrame},
        stack_type::render_shape,
    },
};

/// Everything the verifier knows about one label.
#[derive(Debug)]
pub(crate) struct LabelRecord {
    name: Option<String>,
    /// The stack shape every path into the label must produce. Recorded by
    /// the first incoming branch or by the mark, whichever happens first.
    required: Option<EvalStack>,
    marked_at: Option<InstructionIndex>,
    offset: Option<usize>,
}

/// A declared local variable slot.
#[derive(Debug)]
pub(crate) struct LocalSlot {
    pub ty: CliType,
    pub name: Option<String>,
    pub initialized: bool,
}

/// The abstract-interpretation state of one method under construction.
#[derive(Debug)]
pub(crate) struct Verifier {
    stack: EvalStack,
    labels: BTreeMap<LabelId, LabelRecord>,
    next_label: u32,
    locals: Vec<LocalSlot>,
    args: Vec<CliType>,
    scopes: Vec<ScopeFrame>,
    open_scopes: Vec<ScopeId>,
    pending_patches: BTreeMap<LabelId, Vec<PatchSite>>,
    branches_by_stack: BTreeMap<StackId, (LabelId, InstructionIndex)>,
    max_stack: usize,
    /// False right after an unconditional transfer; ordinary instructions
    /// are rejected until a mark or a scope transition re-establishes a
    /// program point.
    reachable: bool,
    return_type: ReturnType,
}

impl Verifier {
    pub(crate) fn new(signature: &MethodSig) -> Self {
        Self {
            stack: EvalStack::root(Arc::new(AtomicU64::new(0))),
            labels: BTreeMap::new(),
            next_label: 0,
            locals: Vec::new(),
            args: signature.parameter_types.clone(),
            scopes: Vec::new(),
            open_scopes: Vec::new(),
            pending_patches: BTreeMap::new(),
            branches_by_stack: BTreeMap::new(),
            max_stack: 0,
            reachable: true,
            return_type: signature.return_type.clone(),
        }
    }

    pub(crate) fn return_type(&self) -> &ReturnType {
        &self.return_type
    }

    pub(crate) fn stack_height(&self) -> usize {
        self.stack.height()
    }

    pub(crate) fn stack_snapshot(&self) -> Vec<StackType> {
        self.stack.snapshot()
    }

    /// The top `n` values, top-first, for opcode-local precondition checks.
    pub(crate) fn peek(&self, n: usize) -> Option<Vec<StackType>> {
        self.stack.top_n(n)
    }

    pub(crate) fn max_stack(&self) -> usize {
        self.max_stack
    }

    #[cfg(test)]
    pub(crate) fn branch_records(&self) -> &BTreeMap<StackId, (LabelId, InstructionIndex)> {
        &self.branches_by_stack
    }

    /// The single state-update primitive. Checks the popped operands against
    /// the opcode's expectations, replaces them with the pushed types,
    /// appends the instruction, and handles the reachability consequences of
    /// unconditional transfers.
    pub(crate) fn update_state<S: CodeSink>(
        &mut self,
        stream: &mut CodeStream<S>,
        opcode: OpCode,
        operand: Operand,
        pops: &[Expectation],
        pushes: &[StackType],
    ) -> Result<InstructionIndex, ErrorKind> {
        self.require_reachable(opcode)?;
        self.check_pops(opcode, pops)?;
        let (mut stack, _) = self
            .stack
            .pop_n(pops.len())
            .expect("the height was checked");
        for ty in pushes {
            stack = stack.push(ty.clone());
        }
        self.stack = stack;
        self.max_stack = self.max_stack.max(self.stack.height());
        let index = stream.append(opcode, operand);
        if opcode.is_terminal() {
            self.stack = self.stack.fresh();
            self.reachable = false;
        }
        Ok(index)
    }

    /// The branch-aware variant of [`Verifier::update_state`]: additionally
    /// reconciles the flowing stack shape with the target label and registers
    /// a patch when the target is not marked yet.
    ///
    /// `empties_stack` models `leave`, which discards the evaluation stack
    /// instead of carrying it to the target.
    pub(crate) fn branch<S: CodeSink>(
        &mut self,
        stream: &mut CodeStream<S>,
        opcode: OpCode,
        target: LabelId,
        pops: &[Expectation],
        empties_stack: bool,
    ) -> Result<InstructionIndex, ErrorKind> {
        self.require_reachable(opcode)?;
        self.check_pops(opcode, pops)?;
        let (after, _) = self
            .stack
            .pop_n(pops.len())
            .expect("the height was checked");
        let flowing = if empties_stack {
            after.fresh()
        } else {
            after.clone()
        };

        let label = self.label_name(target);
        let record = self
            .labels
            .get_mut(&target)
            .expect("token ownership was checked");
        let resolved = record.offset;
        match &record.required {
            Some(required) if !flowing.shape_eq(required) => {
                return Err(ErrorKind::Label {
                    label,
                    reason: format!(
                        "stack at branch differs from the label's stack: have [{}], required [{}]",
                        render_shape(&flowing.snapshot()),
                        render_shape(&required.snapshot()),
                    ),
                });
            }
            Some(_) => {}
            None => record.required = Some(flowing.clone()),
        }

        let (index, site) = stream.append_branch(opcode, target, resolved);
        if let Some(site) = site {
            self.pending_patches.entry(target).or_default().push(site);
        }
        self.branches_by_stack
            .insert(flowing.unique(), (target, index));
        self.stack = after;
        if opcode.is_terminal() {
            self.stack = self.stack.fresh();
            self.reachable = false;
        }
        Ok(index)
    }

    /// Emits a `switch` jump table. Every target must agree with the stack
    /// shape that remains after the match value is popped.
    pub(crate) fn switch<S: CodeSink>(
        &mut self,
        stream: &mut CodeStream<S>,
        targets: &[LabelId],
    ) -> Result<InstructionIndex, ErrorKind> {
        self.require_reachable(OpCode::Switch)?;
        self.check_pops(OpCode::Switch, &[Expectation::index()])?;
        let (after, _) = self.stack.pop_n(1).expect("the height was checked");

        let mut resolved = Vec::with_capacity(targets.len());
        for target in targets {
            let label = self.label_name(*target);
            let record = self
                .labels
                .get_mut(target)
                .expect("token ownership was checked");
            match &record.required {
                Some(required) if !after.shape_eq(required) => {
                    return Err(ErrorKind::Label {
                        label,
                        reason: format!(
                            "stack at branch differs from the label's stack: \
                             have [{}], required [{}]",
                            render_shape(&after.snapshot()),
                            render_shape(&required.snapshot()),
                        ),
                    });
                }
                Some(_) => {}
                None => record.required = Some(after.clone()),
            }
            resolved.push((*target, record.offset));
        }

        let (index, sites) = stream.append_switch(&resolved);
        for (target, site) in sites {
            self.pending_patches.entry(target).or_default().push(site);
        }
        self.stack = after;
        Ok(index)
    }

    pub(crate) fn define_label(&mut self, name: Option<String>) -> LabelId {
        let id = LabelId::from(self.next_label);
        self.next_label += 1;
        self.labels.insert(
            id,
            LabelRecord {
                name,
                required: None,
                marked_at: None,
                offset: None,
            },
        );
        id
    }

    /// Binds a label to the current position. The current stack must agree
    /// with the shape recorded by any incoming branch; with none recorded,
    /// the current shape becomes the label's requirement.
    pub(crate) fn mark_label<S: CodeSink>(
        &mut self,
        stream: &mut CodeStream<S>,
        target: LabelId,
    ) -> Result<(), ErrorKind> {
        let offset = stream.current_offset();
        let marked_at = stream.next_index();
        let label = self.label_name(target);
        let record = self
            .labels
            .get_mut(&target)
            .expect("token ownership was checked");
        if record.marked_at.is_some() {
            return Err(ErrorKind::Label {
                label,
                reason: "the label is already marked".to_string(),
            });
        }
        match &record.required {
            Some(required) if !self.stack.shape_eq(required) => {
                return Err(ErrorKind::Label {
                    label,
                    reason: format!(
                        "stack at mark differs from incoming branch: have [{}], required [{}]",
                        render_shape(&required.snapshot()),
                        render_shape(&self.stack.snapshot()),
                    ),
                });
            }
            Some(_) => {}
            None => record.required = Some(self.stack.clone()),
        }
        record.marked_at = Some(marked_at);
        record.offset = Some(offset);
        for site in self.pending_patches.remove(&target).unwrap_or_default() {
            stream.patch(site, offset);
        }
        self.reachable = true;
        Ok(())
    }

    pub(crate) fn declare_local(
        &mut self,
        ty: CliType,
        name: Option<String>,
    ) -> Result<u16, ErrorKind> {
        let index = u16::try_from(self.locals.len()).map_err(|_| {
            ErrorKind::InvalidOperation("no more than 65536 locals can be declared".to_string())
        })?;
        self.locals.push(LocalSlot {
            ty,
            name,
            initialized: false,
        });
        Ok(index)
    }

    pub(crate) fn local(&self, index: u16) -> &LocalSlot {
        &self.locals[usize::from(index)]
    }

    pub(crate) fn initialize_local(&mut self, index: u16) {
        self.locals[usize::from(index)].initialized = true;
    }

    pub(crate) fn local_decls(&self) -> Vec<LocalDecl> {
        self.locals
            .iter()
            .map(|it| LocalDecl {
                ty: it.ty.clone(),
                name: it.name.clone(),
            })
            .collect()
    }

    pub(crate) fn argument(&self, index: u16) -> Result<&CliType, ErrorKind> {
        self.args.get(usize::from(index)).ok_or_else(|| {
            ErrorKind::InvalidOperation(format!(
                "argument index {index} is out of range for a method with {} parameter(s)",
                self.args.len()
            ))
        })
    }

    /// Whether the innermost open scope is a catch handler.
    pub(crate) fn in_open_catch(&self) -> bool {
        matches!(
            self.open_scopes
                .last()
                .map(|id| &self.scopes[id.0]),
            Some(ScopeFrame::Catch(_))
        )
    }
}

/// Exception-scope transitions.
impl Verifier {
    pub(crate) fn begin_try<S: CodeSink>(
        &mut self,
        stream: &mut CodeStream<S>,
    ) -> Result<(), ErrorKind> {
        self.require_root("a protected region can only begin with an empty evaluation stack")?;
        let end_label = self.define_label(Some(format!("try{}_end", self.scopes.len())));
        let id = ScopeId(self.scopes.len());
        self.scopes.push(ScopeFrame::Try(TryFrame {
            end_label,
            opened_at: stream.next_index(),
            closed_at: None,
            catches: Vec::new(),
            finally: None,
        }));
        self.open_scopes.push(id);
        stream.begin_try();
        self.reachable = true;
        Ok(())
    }

    pub(crate) fn begin_catch<S: CodeSink>(
        &mut self,
        stream: &mut CodeStream<S>,
        caught_type: CliType,
    ) -> Result<(), ErrorKind> {
        let try_id = self.innermost_try("begin a catch block")?;
        if !caught_type.is_subtype_of(&CliType::exception()) {
            return Err(ErrorKind::Scope {
                reason: format!(
                    "cannot catch {caught_type}: it does not derive from System.Exception"
                ),
            });
        }
        if self.try_frame(try_id).finally.is_some() {
            return Err(ErrorKind::Scope {
                reason: "a catch block cannot follow the finally block of the same protected \
                         region"
                    .to_string(),
            });
        }
        self.require_root("a catch block can only begin with an empty evaluation stack")?;
        let id = ScopeId(self.scopes.len());
        self.scopes.push(ScopeFrame::Catch(CatchFrame {
            parent: try_id,
            caught_type: caught_type.clone(),
            opened_at: stream.next_index(),
            closed_at: None,
        }));
        self.try_frame_mut(try_id).catches.push(id);
        self.open_scopes.push(id);
        stream.begin_catch(&caught_type);
        self.stack = self.stack.fresh().push(StackType::Reference(caught_type));
        self.max_stack = self.max_stack.max(1);
        self.reachable = true;
        Ok(())
    }

    pub(crate) fn end_catch<S: CodeSink>(
        &mut self,
        stream: &mut CodeStream<S>,
    ) -> Result<(), ErrorKind> {
        let catch_id = self.innermost_scope("end a catch block", "catch")?;
        self.require_root("a catch block can only close with an empty evaluation stack")?;
        let parent = match &self.scopes[catch_id.0] {
            ScopeFrame::Catch(it) => it.parent,
            _ => unreachable!("the innermost scope was checked to be a catch"),
        };
        let end_label = self.try_frame(parent).end_label;
        // Exiting a handler is a transfer of its own even when the body
        // already transferred control.
        self.reachable = true;
        let index = self.branch(stream, OpCode::Leave, end_label, &[], true)?;
        let ScopeFrame::Catch(catch) = &mut self.scopes[catch_id.0] else {
            unreachable!("the innermost scope was checked to be a catch");
        };
        catch.closed_at = Some(index);
        self.open_scopes.pop();
        Ok(())
    }

    pub(crate) fn begin_finally<S: CodeSink>(
        &mut self,
        stream: &mut CodeStream<S>,
    ) -> Result<(), ErrorKind> {
        let try_id = self.innermost_try("begin a finally block")?;
        if self.try_frame(try_id).finally.is_some() {
            return Err(ErrorKind::Scope {
                reason: "the protected region already has a finally block".to_string(),
            });
        }
        self.require_root("a finally block can only begin with an empty evaluation stack")?;
        let id = ScopeId(self.scopes.len());
        self.scopes.push(ScopeFrame::Finally(FinallyFrame {
            parent: try_id,
            opened_at: stream.next_index(),
            closed_at: None,
        }));
        self.try_frame_mut(try_id).finally = Some(id);
        self.open_scopes.push(id);
        stream.begin_finally();
        self.stack = self.stack.fresh();
        self.reachable = true;
        Ok(())
    }

    pub(crate) fn end_finally<S: CodeSink>(
        &mut self,
        stream: &mut CodeStream<S>,
    ) -> Result<(), ErrorKind> {
        let finally_id = self.innermost_scope("end a finally block", "finally")?;
        self.require_root("a finally block can only close with an empty evaluation stack")?;
        self.reachable = true;
        let index = self.update_state(stream, OpCode::EndFinally, Operand::None, &[], &[])?;
        let ScopeFrame::Finally(finally) = &mut self.scopes[finally_id.0] else {
            unreachable!("the innermost scope was checked to be a finally");
        };
        finally.closed_at = Some(index);
        let parent = finally.parent;
        debug_assert!(matches!(self.scopes[parent.0], ScopeFrame::Try(_)));
        self.open_scopes.pop();
        Ok(())
    }

    pub(crate) fn end_exception_block<S: CodeSink>(
        &mut self,
        stream: &mut CodeStream<S>,
    ) -> Result<(), ErrorKind> {
        let try_id = self.innermost_try("end the protected region")?;
        let frame = self.try_frame(try_id);
        if frame.catches.is_empty() && frame.finally.is_none() {
            return Err(ErrorKind::Scope {
                reason: "the try block requires at least one catch or finally".to_string(),
            });
        }
        if let Some(handler) = frame
            .catches
            .iter()
            .chain(frame.finally.as_ref())
            .map(|id| &self.scopes[id.0])
            .find(|it| it.closed_at().is_none())
        {
            return Err(ErrorKind::Scope {
                reason: format!(
                    "cannot end the protected region: the {} block opened at {} is still open",
                    handler.describe(),
                    handler.opened_at(),
                ),
            });
        }
        self.require_root(
            "a protected region can only close with an empty evaluation stack",
        )?;
        let end_label = frame.end_label;
        self.try_frame_mut(try_id).closed_at = Some(stream.next_index());
        self.open_scopes.pop();
        stream.end_try();
        self.mark_label(stream, end_label)
    }

    fn innermost_try(&self, action: &str) -> Result<ScopeId, ErrorKind> {
        match self.open_scopes.last() {
            None => Err(ErrorKind::Scope {
                reason: format!("cannot {action}: no protected region is open"),
            }),
            Some(id) => match &self.scopes[id.0] {
                ScopeFrame::Try(_) => Ok(*id),
                frame => Err(ErrorKind::Scope {
                    reason: format!(
                        "cannot {action}: the {} block opened at {} is still open",
                        frame.describe(),
                        frame.opened_at(),
                    ),
                }),
            },
        }
    }

    fn innermost_scope(&self, action: &str, kind: &'static str) -> Result<ScopeId, ErrorKind> {
        match self.open_scopes.last() {
            None => Err(ErrorKind::Scope {
                reason: format!("cannot {action}: no protected region is open"),
            }),
            Some(id) if self.scopes[id.0].kind_name() == kind => Ok(*id),
            Some(id) => {
                let frame = &self.scopes[id.0];
                Err(ErrorKind::Scope {
                    reason: format!(
                        "cannot {action}: the innermost scope is the {} block opened at {}",
                        frame.describe(),
                        frame.opened_at(),
                    ),
                })
            }
        }
    }

    fn try_frame(&self, id: ScopeId) -> &TryFrame {
        match &self.scopes[id.0] {
            ScopeFrame::Try(it) => it,
            _ => unreachable!("the id denotes a try frame"),
        }
    }

    fn try_frame_mut(&mut self, id: ScopeId) -> &mut TryFrame {
        match &mut self.scopes[id.0] {
            ScopeFrame::Try(it) => it,
            _ => unreachable!("the id denotes a try frame"),
        }
    }
}

/// Finalization checks.
impl Verifier {
    /// Verifies that the method is complete: no open scopes, no unmarked
    /// labels, no unresolved patches, and no path that falls off the end.
    pub(crate) fn check_complete(&self) -> Result<(), ErrorKind> {
        if let Some(id) = self.open_scopes.last() {
            let frame = &self.scopes[id.0];
            return Err(ErrorKind::Scope {
                reason: format!(
                    "the {} block opened at {} is never closed",
                    frame.describe(),
                    frame.opened_at(),
                ),
            });
        }
        if let Some(frame) = self.scopes.iter().find(|it| it.closed_at().is_none()) {
            return Err(ErrorKind::Scope {
                reason: format!(
                    "the {} block opened at {} is never closed",
                    frame.describe(),
                    frame.opened_at(),
                ),
            });
        }
        if let Some((id, record)) = self
            .labels
            .iter()
            .find(|(_, record)| record.marked_at.is_none())
        {
            return Err(ErrorKind::Label {
                label: record.name.clone().unwrap_or_else(|| id.to_string()),
                reason: "the label is never marked".to_string(),
            });
        }
        if !self.pending_patches.is_empty() {
            return Err(ErrorKind::InvalidOperation(
                "unresolved forward-branch patches remain".to_string(),
            ));
        }
        if self.reachable {
            return Err(ErrorKind::InvalidOperation(
                "execution can fall off the end of the method; \
                 end with ret, throw, or a branch"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

impl Verifier {
    fn require_reachable(&self, opcode: OpCode) -> Result<(), ErrorKind> {
        if self.reachable {
            Ok(())
        } else {
            Err(ErrorKind::InvalidOperation(format!(
                "{opcode} is unreachable; mark a label before emitting more code"
            )))
        }
    }

    fn require_root(&self, reason: &str) -> Result<(), ErrorKind> {
        if self.stack.is_root() {
            Ok(())
        } else {
            Err(ErrorKind::Scope {
                reason: format!(
                    "{reason}; the stack holds [{}]",
                    render_shape(&self.stack.snapshot())
                ),
            })
        }
    }

    fn check_pops(&self, opcode: OpCode, pops: &[Expectation]) -> Result<(), ErrorKind> {
        let actuals = self
            .stack
            .top_n(pops.len())
            .ok_or(ErrorKind::StackUnderflow {
                opcode,
                required: pops.len(),
                have: self.stack.height(),
            })?;
        for (position, (expected, actual)) in pops.iter().zip(&actuals).enumerate() {
            if !expected.satisfied_by(actual) {
                return Err(ErrorKind::TypeMismatch {
                    opcode,
                    position,
                    expected: expected.clone(),
                    actual: actual.clone(),
                });
            }
        }
        Ok(())
    }

    fn label_name(&self, id: LabelId) -> String {
        self.labels
            .get(&id)
            .and_then(|record| record.name.clone())
            .unwrap_or_else(|| id.to_string())
    }
}
