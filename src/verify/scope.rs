//! Exception-scope frames.

use crate::{
    cil::{InstructionIndex, LabelId},
    types::CliType,
};

/// Identifies a scope frame in the verifier's arena.
///
/// Frames reference each other by id, so parent/child relations constrain
/// nothing about closure order at the ownership level.
#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Clone, Copy)]
pub(crate) struct ScopeId(pub(crate) usize);

/// A protected region and the bookkeeping of its handlers.
#[derive(Debug)]
pub(crate) struct TryFrame {
    /// The label marking the first instruction after the whole region;
    /// `leave`s out of the handlers target it.
    pub end_label: LabelId,
    pub opened_at: InstructionIndex,
    pub closed_at: Option<InstructionIndex>,
    pub catches: Vec<ScopeId>,
    pub finally: Option<ScopeId>,
}

/// A catch handler.
#[derive(Debug)]
pub(crate) struct CatchFrame {
    pub parent: ScopeId,
    pub caught_type: CliType,
    pub opened_at: InstructionIndex,
    pub closed_at: Option<InstructionIndex>,
}

/// A finally handler.
#[derive(Debug)]
pub(crate) struct FinallyFrame {
    pub parent: ScopeId,
    pub opened_at: InstructionIndex,
    pub closed_at: Option<InstructionIndex>,
}

/// One frame on the verifier's scope stack.
#[derive(Debug)]
pub(crate) enum ScopeFrame {
    Try(TryFrame),
    Catch(CatchFrame),
    Finally(FinallyFrame),
}

impl ScopeFrame {
    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            Self::Try(_) => "try",
            Self::Catch(_) => "catch",
            Self::Finally(_) => "finally",
        }
    }

    /// The frame as it appears in diagnostics, e.g. `catch (Acme.Boom)`.
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Try(_) => "try".to_string(),
            Self::Catch(it) => format!("catch ({})", it.caught_type),
            Self::Finally(_) => "finally".to_string(),
        }
    }

    pub(crate) fn opened_at(&self) -> InstructionIndex {
        match self {
            Self::Try(it) => it.opened_at,
            Self::Catch(it) => it.opened_at,
            Self::Finally(it) => it.opened_at,
        }
    }

    pub(crate) fn closed_at(&self) -> Option<InstructionIndex> {
        match self {
            Self::Try(it) => it.closed_at,
            Self::Catch(it) => it.closed_at,
            Self::Finally(it) => it.closed_at,
        }
    }
}
