use std::{collections::BTreeMap, fmt};

use cranelift_entity::entity_impl;
use smallvec::SmallVec;

use crate::{
    factory::DexType,
    value::{DebugLocal, ValueId},
};

/// An opaque reference to [`BlockData`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u32);
entity_impl!(BlockId, "block");

/// Exception type a handler accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatchGuard {
    Type(DexType),
    All,
}

impl CatchGuard {
    pub fn is_catch_all(self) -> bool {
        matches!(self, Self::All)
    }
}

impl fmt::Display for CatchGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type(ty) => write!(f, "{ty}"),
            Self::All => f.write_str("all"),
        }
    }
}

/// Ordered guards of a block, each naming the index of its handler in the
/// successor list of that block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatchHandlers {
    guards: Vec<CatchGuard>,
    targets: Vec<u32>,
}

impl CatchHandlers {
    pub fn new(guards: Vec<CatchGuard>, targets: Vec<u32>) -> Self {
        assert_eq!(
            guards.len(),
            targets.len(),
            "every catch guard needs exactly one target"
        );
        Self { guards, targets }
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn guards(&self) -> &[CatchGuard] {
        &self.guards
    }

    /// Successor indices of the handlers, parallel to [`Self::guards`].
    pub fn targets(&self) -> &[u32] {
        &self.targets
    }

    pub fn iter(&self) -> impl Iterator<Item = (CatchGuard, u32)> + '_ {
        self.guards.iter().copied().zip(self.targets.iter().copied())
    }

    /// Distinct successor indices in ascending order.
    pub fn unique_targets(&self) -> Vec<u32> {
        let mut targets = self.targets.clone();
        targets.sort_unstable();
        targets.dedup();
        targets
    }

    pub fn has_catch_all(&self) -> bool {
        self.guards.iter().any(|guard| guard.is_catch_all())
    }

    pub fn contains_guard(&self, guard: CatchGuard) -> bool {
        self.guards.contains(&guard)
    }

    pub fn push(&mut self, guard: CatchGuard, target: u32) {
        self.guards.push(guard);
        self.targets.push(target);
    }

    /// Rewrites every target index with `f`.
    pub fn remap_targets(&mut self, mut f: impl FnMut(u32) -> u32) {
        for target in &mut self.targets {
            *target = f(*target);
        }
    }

    /// Drops the handlers targeting successor `index` and shifts the indices
    /// above it down by one.
    pub fn remove_target(&mut self, index: u32) {
        let mut kept = Self::default();
        for (guard, target) in self.iter() {
            match target.cmp(&index) {
                std::cmp::Ordering::Less => kept.push(guard, target),
                std::cmp::Ordering::Equal => {}
                std::cmp::Ordering::Greater => kept.push(guard, target - 1),
            }
        }
        *self = kept;
    }

    pub fn clear(&mut self) {
        self.guards.clear();
        self.targets.clear();
    }
}

/// A block data definition.
///
/// Instruction order is kept by [`crate::Layout`]. Control flow edges are kept
/// here and must stay mutual: `b` is in `a.succs` iff `a` is in `b.preds`.
#[derive(Debug, Clone, Default)]
pub struct BlockData {
    pub number: u32,
    pub preds: SmallVec<[BlockId; 2]>,
    /// Catch handler successors first, normal successors after them.
    pub succs: SmallVec<[BlockId; 2]>,
    pub phis: Vec<ValueId>,
    pub catch_handlers: CatchHandlers,
    pub locals_at_entry: Option<BTreeMap<u32, DebugLocal>>,
    pub filled: bool,
    pub sealed: bool,
}

impl BlockData {
    pub fn new(number: u32) -> Self {
        Self {
            number,
            ..Self::default()
        }
    }

    pub fn has_catch_handlers(&self) -> bool {
        !self.catch_handlers.is_empty()
    }

    pub fn is_catch_successor_index(&self, index: usize) -> bool {
        self.catch_handlers
            .targets()
            .iter()
            .any(|&target| target as usize == index)
    }

    pub fn is_catch_successor(&self, block: BlockId) -> bool {
        self.succs
            .iter()
            .enumerate()
            .any(|(idx, &succ)| succ == block && self.is_catch_successor_index(idx))
    }

    pub fn catch_successors(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.catch_handlers
            .unique_targets()
            .into_iter()
            .map(|idx| self.succs[idx as usize])
    }

    pub fn normal_successors(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.succs
            .iter()
            .enumerate()
            .filter(|(idx, _)| !self.is_catch_successor_index(*idx))
            .map(|(_, &succ)| succ)
    }

    pub fn pred_index(&self, pred: BlockId) -> Option<usize> {
        self.preds.iter().position(|&b| b == pred)
    }

    pub fn succ_index(&self, succ: BlockId) -> Option<usize> {
        self.succs.iter().position(|&b| b == succ)
    }
}
