//! The persistent abstract model of the evaluation stack.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use crate::verify::StackType;

/// A stable identity for one abstract stack state, usable as a map key when
/// recording which stack flowed into which label.
#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Clone, Copy, derive_more::Display)]
#[display("s{_0}")]
pub(crate) struct StackId(u64);

/// An immutable snapshot of the evaluation stack at one program point.
///
/// The stack is a persistent singly-linked list with structural sharing:
/// pushing and popping produce new stacks without invalidating snapshots
/// captured earlier, which is what makes branch-site snapshots cheap. Every
/// derived stack receives a fresh generation id from the owning emitter's
/// counter.
#[derive(Debug, Clone)]
pub(crate) struct EvalStack {
    top: Option<Arc<Node>>,
    height: usize,
    id: StackId,
    generations: Arc<AtomicU64>,
}

#[derive(Debug)]
struct Node {
    ty: StackType,
    below: Option<Arc<Node>>,
}

impl EvalStack {
    /// Creates an empty root stack drawing ids from the given counter.
    pub(crate) fn root(generations: Arc<AtomicU64>) -> Self {
        let id = next_id(&generations);
        Self {
            top: None,
            height: 0,
            id,
            generations,
        }
    }

    /// Creates an empty root stack sharing this stack's id counter.
    pub(crate) fn fresh(&self) -> Self {
        Self::root(self.generations.clone())
    }

    pub(crate) fn height(&self) -> usize {
        self.height
    }

    /// Checks whether the stack is at its root, i.e. holds no values.
    pub(crate) fn is_root(&self) -> bool {
        self.height == 0
    }

    /// The generation id of this stack state.
    pub(crate) fn unique(&self) -> StackId {
        self.id
    }

    #[must_use]
    pub(crate) fn push(&self, ty: StackType) -> Self {
        Self {
            top: Some(Arc::new(Node {
                ty,
                below: self.top.clone(),
            })),
            height: self.height + 1,
            id: next_id(&self.generations),
            generations: self.generations.clone(),
        }
    }

    /// Removes the top `n` values, returning the remaining stack and the
    /// removed values top-first, or `None` on underflow.
    #[must_use]
    pub(crate) fn pop_n(&self, n: usize) -> Option<(Self, Vec<StackType>)> {
        if self.height < n {
            return None;
        }
        let mut popped = Vec::with_capacity(n);
        let mut current = self.top.clone();
        for _ in 0..n {
            let node = current.expect("the height was checked");
            popped.push(node.ty.clone());
            current = node.below.clone();
        }
        let remaining = Self {
            top: current,
            height: self.height - n,
            id: next_id(&self.generations),
            generations: self.generations.clone(),
        };
        Some((remaining, popped))
    }

    /// The top `n` values, top-first, or `None` if fewer are present.
    #[must_use]
    pub(crate) fn top_n(&self, n: usize) -> Option<Vec<StackType>> {
        if self.height < n {
            return None;
        }
        Some(self.iter().take(n).cloned().collect())
    }

    /// The whole stack, bottom-first, for diagnostics.
    pub(crate) fn snapshot(&self) -> Vec<StackType> {
        let mut shape: Vec<_> = self.iter().cloned().collect();
        shape.reverse();
        shape
    }

    /// Structural equality of two stack shapes: same height, and each pair
    /// of slots assignable in both directions.
    pub(crate) fn shape_eq(&self, other: &Self) -> bool {
        self.height == other.height
            && self
                .iter()
                .zip(other.iter())
                .all(|(lhs, rhs)| lhs.assignable_to(rhs) && rhs.assignable_to(lhs))
    }

    fn iter(&self) -> impl Iterator<Item = &StackType> {
        std::iter::successors(self.top.as_deref(), |node| node.below.as_deref())
            .map(|node| &node.ty)
    }
}

fn next_id(generations: &AtomicU64) -> StackId {
    StackId(generations.fetch_add(1, Ordering::Relaxed))
}
