//! The append-only instruction log and its byte stream.

use crate::{
    cil::{Instruction, InstructionIndex, LabelId, OpCode, Operand, TokenEntry},
    host::{CodeSink, FinalizeRequest, LocalDecl},
    types::ReturnType,
};

/// A patchable branch-operand location in the byte stream.
///
/// `base` is the offset branch displacements are relative to (the end of the
/// instruction for `switch`, the end of the operand otherwise).
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) struct PatchSite {
    operand_offset: usize,
    base: usize,
}

/// The append-only log of verified instructions.
///
/// Instructions are assigned monotonically increasing indices and their byte
/// encodings are streamed to the host sink as they are appended; the log
/// itself keeps the symbolic form. Operands that reference metadata are
/// interned into the token table and encoded as their 1-based position.
/// Appends are never reordered.
#[derive(Debug)]
pub(crate) struct CodeStream<S> {
    sink: S,
    instructions: Vec<Instruction>,
    tokens: Vec<TokenEntry>,
}

impl<S: CodeSink> CodeStream<S> {
    pub(crate) fn new(sink: S) -> Self {
        Self {
            sink,
            instructions: Vec::new(),
            tokens: Vec::new(),
        }
    }

    /// The index the next appended instruction will receive.
    pub(crate) fn next_index(&self) -> InstructionIndex {
        let position = u32::try_from(self.instructions.len())
            .expect("the instruction count stays within u32");
        InstructionIndex::from(position)
    }

    pub(crate) fn current_offset(&self) -> usize {
        self.sink.current_offset()
    }

    pub(crate) fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub(crate) fn tokens(&self) -> &[TokenEntry] {
        &self.tokens
    }

    #[cfg(test)]
    pub(crate) fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Appends a non-branching instruction.
    pub(crate) fn append(&mut self, opcode: OpCode, operand: Operand) -> InstructionIndex {
        let index = self.next_index();
        self.sink.append_opcode(opcode);
        let bytes = self.operand_bytes(&operand);
        self.sink.append_operand(&bytes);
        self.instructions.push(Instruction { opcode, operand });
        index
    }

    /// Appends a single-target branch.
    ///
    /// When the target offset is already known the final displacement is
    /// written; otherwise a placeholder is written and the returned
    /// [`PatchSite`] must be patched once the target is marked.
    pub(crate) fn append_branch(
        &mut self,
        opcode: OpCode,
        target: LabelId,
        resolved: Option<usize>,
    ) -> (InstructionIndex, Option<PatchSite>) {
        let index = self.next_index();
        self.sink.append_opcode(opcode);
        let operand_offset = self.sink.current_offset();
        let base = operand_offset + 4;
        let displacement = resolved.map_or(0, |target_offset| relative(base, target_offset));
        self.sink.append_operand(&displacement.to_le_bytes());
        self.instructions.push(Instruction {
            opcode,
            operand: Operand::Target(target),
        });
        let site = resolved
            .is_none()
            .then_some(PatchSite {
                operand_offset,
                base,
            });
        (index, site)
    }

    /// Appends a `switch` jump table. Displacements are relative to the end
    /// of the whole instruction.
    pub(crate) fn append_switch(
        &mut self,
        targets: &[(LabelId, Option<usize>)],
    ) -> (InstructionIndex, Vec<(LabelId, PatchSite)>) {
        let index = self.next_index();
        self.sink.append_opcode(OpCode::Switch);
        let count = u32::try_from(targets.len()).expect("the jump table size stays within u32");
        self.sink.append_operand(&count.to_le_bytes());
        let base = self.sink.current_offset() + 4 * targets.len();
        let mut sites = Vec::new();
        for (label, resolved) in targets {
            let operand_offset = self.sink.current_offset();
            let displacement = resolved.map_or(0, |target_offset| relative(base, target_offset));
            self.sink.append_operand(&displacement.to_le_bytes());
            if resolved.is_none() {
                sites.push((
                    *label,
                    PatchSite {
                        operand_offset,
                        base,
                    },
                ));
            }
        }
        self.instructions.push(Instruction {
            opcode: OpCode::Switch,
            operand: Operand::Switch(targets.iter().map(|(label, _)| *label).collect()),
        });
        (index, sites)
    }

    /// Rewrites a placeholder displacement now that its target is known.
    pub(crate) fn patch(&mut self, site: PatchSite, target_offset: usize) {
        let displacement = relative(site.base, target_offset);
        self.sink.patch(site.operand_offset, &displacement.to_le_bytes());
    }

    /// Hands the finished method to the host sink.
    pub(crate) fn finalize(
        &mut self,
        return_type: &ReturnType,
        locals: &[LocalDecl],
        max_stack: u16,
    ) -> S::Output {
        let request = FinalizeRequest {
            return_type,
            locals,
            max_stack,
            tokens: &self.tokens,
        };
        self.sink.finalize(request)
    }

    pub(crate) fn begin_try(&mut self) {
        self.sink.begin_try();
    }

    pub(crate) fn begin_catch(&mut self, exception_type: &crate::types::CliType) {
        self.sink.begin_catch(exception_type);
    }

    pub(crate) fn begin_finally(&mut self) {
        self.sink.begin_finally();
    }

    pub(crate) fn end_try(&mut self) {
        self.sink.end_try();
    }

    fn operand_bytes(&mut self, operand: &Operand) -> Vec<u8> {
        match operand {
            Operand::None => Vec::new(),
            Operand::I32(it) => it.to_le_bytes().to_vec(),
            Operand::I64(it) => it.to_le_bytes().to_vec(),
            Operand::F32(it) => it.to_le_bytes().to_vec(),
            Operand::F64(it) => it.to_le_bytes().to_vec(),
            Operand::Local(it) | Operand::Argument(it) => it.to_le_bytes().to_vec(),
            Operand::Str(it) => self.token_bytes(TokenEntry::String(it.clone())),
            Operand::Type(it) => self.token_bytes(TokenEntry::Type(it.clone())),
            Operand::Method(it) => self.token_bytes(TokenEntry::Method(it.clone())),
            Operand::Ctor(it) => self.token_bytes(TokenEntry::Ctor(it.clone())),
            Operand::Field(it) => self.token_bytes(TokenEntry::Field(it.clone())),
            Operand::Signature(it) => self.token_bytes(TokenEntry::Signature(it.clone())),
            Operand::Target(_) | Operand::Switch(_) => {
                unreachable!("branch operands are encoded by the branch-aware appends")
            }
        }
    }

    fn token_bytes(&mut self, entry: TokenEntry) -> Vec<u8> {
        let position = self
            .tokens
            .iter()
            .position(|it| it == &entry)
            .unwrap_or_else(|| {
                self.tokens.push(entry);
                self.tokens.len() - 1
            });
        let token = u32::try_from(position + 1).expect("the token table size stays within u32");
        token.to_le_bytes().to_vec()
    }
}

fn relative(base: usize, target: usize) -> i32 {
    let displacement = i64::try_from(target).expect("offsets stay within i64")
        - i64::try_from(base).expect("offsets stay within i64");
    i32::try_from(displacement).expect("branch displacements stay within i32")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{host::InMemorySink, types::CliType};

    fn stream() -> CodeStream<InMemorySink> {
        CodeStream::new(InMemorySink::new())
    }

    #[test]
    fn indices_are_monotonic() {
        let mut stream = stream();
        assert_eq!(stream.next_index(), InstructionIndex::ZERO);
        let first = stream.append(OpCode::Nop, Operand::None);
        let second = stream.append(OpCode::LdcI4, Operand::I32(1));
        assert_eq!(first, InstructionIndex::from(0));
        assert_eq!(second, InstructionIndex::from(1));
        assert_eq!(stream.next_index(), InstructionIndex::from(2));
    }

    #[test]
    fn backward_branch_is_written_resolved() {
        let mut stream = stream();
        stream.append(OpCode::Nop, Operand::None);
        let (_, site) = stream.append_branch(OpCode::Br, LabelId(0), Some(0));
        assert!(site.is_none());
        // br occupies [1, 6); the displacement is 0 - 6.
        assert_eq!(stream.sink_mut().code(), [0x00, 0x38, 0xFA, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn forward_branch_is_patched() {
        let mut stream = stream();
        let (_, site) = stream.append_branch(OpCode::Br, LabelId(0), None);
        let site = site.unwrap();
        stream.append(OpCode::Nop, Operand::None);
        let target = stream.current_offset();
        stream.patch(site, target);
        // The target is the byte right after nop: displacement 6 - 5 = 1.
        assert_eq!(stream.sink_mut().code(), [0x38, 1, 0, 0, 0, 0x00]);
    }

    #[test]
    fn switch_table_patches_individual_entries() {
        let mut stream = stream();
        let targets = [(LabelId(0), Some(0)), (LabelId(1), None)];
        let (_, sites) = stream.append_switch(&targets);
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].0, LabelId(1));
        let target = stream.current_offset();
        let (label, site) = sites[0];
        assert_eq!(label, LabelId(1));
        stream.patch(site, target);
        // switch: opcode, count = 2, two displacements relative to offset 13.
        let code = stream.sink_mut().code().to_vec();
        assert_eq!(code.len(), 13);
        assert_eq!(&code[..5], [0x45, 2, 0, 0, 0]);
        assert_eq!(&code[5..9], (-13i32).to_le_bytes());
        assert_eq!(&code[9..13], 0i32.to_le_bytes());
    }

    #[test]
    fn tokens_are_interned_once() {
        let mut stream = stream();
        stream.append(OpCode::NewArr, Operand::Type(CliType::Object));
        stream.append(OpCode::NewArr, Operand::Type(CliType::Object));
        stream.append(OpCode::LdStr, Operand::Str("hi".to_string()));
        assert_eq!(stream.tokens().len(), 2);
        let code = stream.sink_mut().code();
        // Both newarr instructions carry token 1, ldstr carries token 2.
        assert_eq!(&code[1..5], 1u32.to_le_bytes());
        assert_eq!(&code[6..10], 1u32.to_le_bytes());
        assert_eq!(&code[11..15], 2u32.to_le_bytes());
    }
}
