//! This module contains the code layout: block order and instruction order
//! within each block.
use cranelift_entity::{packed_option::PackedOption, SecondaryMap};

use crate::{block::BlockId, inst::InstId};

#[derive(Debug, Clone, Default)]
pub struct Layout {
    blocks: SecondaryMap<BlockId, BlockNode>,
    insts: SecondaryMap<InstId, InstNode>,
    entry_block: PackedOption<BlockId>,
    last_block: PackedOption<BlockId>,
}

impl Layout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry_block(&self) -> Option<BlockId> {
        self.entry_block.expand()
    }

    pub fn last_block(&self) -> Option<BlockId> {
        self.last_block.expand()
    }

    pub fn is_block_inserted(&self, block: BlockId) -> bool {
        self.blocks[block].inserted
    }

    pub fn is_inst_inserted(&self, inst: InstId) -> bool {
        self.insts[inst].block.is_some()
    }

    pub fn is_block_empty(&self, block: BlockId) -> bool {
        self.first_inst_of(block).is_none()
    }

    pub fn prev_block_of(&self, block: BlockId) -> Option<BlockId> {
        debug_assert!(self.is_block_inserted(block));
        self.blocks[block].prev.expand()
    }

    pub fn next_block_of(&self, block: BlockId) -> Option<BlockId> {
        debug_assert!(self.is_block_inserted(block));
        self.blocks[block].next.expand()
    }

    pub fn first_inst_of(&self, block: BlockId) -> Option<InstId> {
        debug_assert!(self.is_block_inserted(block));
        self.blocks[block].first_inst.expand()
    }

    pub fn last_inst_of(&self, block: BlockId) -> Option<InstId> {
        debug_assert!(self.is_block_inserted(block));
        self.blocks[block].last_inst.expand()
    }

    pub fn prev_inst_of(&self, inst: InstId) -> Option<InstId> {
        debug_assert!(self.is_inst_inserted(inst));
        self.insts[inst].prev.expand()
    }

    pub fn next_inst_of(&self, inst: InstId) -> Option<InstId> {
        debug_assert!(self.is_inst_inserted(inst));
        self.insts[inst].next.expand()
    }

    /// # Panics
    /// Panics if `inst` is not in the layout.
    pub fn inst_block(&self, inst: InstId) -> BlockId {
        self.insts[inst]
            .block
            .expand()
            .unwrap_or_else(|| panic!("{inst} is not inserted"))
    }

    pub fn iter_block(&self) -> impl Iterator<Item = BlockId> + '_ {
        std::iter::successors(self.entry_block(), |&block| self.blocks[block].next.expand())
    }

    pub fn iter_inst(&self, block: BlockId) -> impl Iterator<Item = InstId> + '_ {
        debug_assert!(self.is_block_inserted(block));
        std::iter::successors(self.first_inst_of(block), |&inst| {
            self.insts[inst].next.expand()
        })
    }

    /// Iterates over `inst` and every instruction after it in its block.
    pub fn iter_inst_from(&self, inst: InstId) -> impl Iterator<Item = InstId> + '_ {
        debug_assert!(self.is_inst_inserted(inst));
        std::iter::successors(Some(inst), |&inst| self.insts[inst].next.expand())
    }

    pub fn block_len(&self, block: BlockId) -> usize {
        self.iter_inst(block).count()
    }

    pub fn append_block(&mut self, block: BlockId) {
        match self.last_block() {
            Some(last) => self.insert_block_after(block, last),
            None => {
                debug_assert!(!self.is_block_inserted(block));
                self.blocks[block] = BlockNode::inserted();
                self.entry_block = block.into();
                self.last_block = block.into();
            }
        }
    }

    pub fn insert_block_after(&mut self, block: BlockId, after: BlockId) {
        debug_assert!(self.is_block_inserted(after));
        debug_assert!(!self.is_block_inserted(block));

        let next = self.blocks[after].next;
        self.blocks[block] = BlockNode {
            prev: after.into(),
            next,
            ..BlockNode::inserted()
        };
        self.blocks[after].next = block.into();
        match next.expand() {
            Some(next) => self.blocks[next].prev = block.into(),
            None => self.last_block = block.into(),
        }
    }

    pub fn insert_block_before(&mut self, block: BlockId, before: BlockId) {
        debug_assert!(self.is_block_inserted(before));
        debug_assert!(!self.is_block_inserted(block));

        let prev = self.blocks[before].prev;
        self.blocks[block] = BlockNode {
            prev,
            next: before.into(),
            ..BlockNode::inserted()
        };
        self.blocks[before].prev = block.into();
        match prev.expand() {
            Some(prev) => self.blocks[prev].next = block.into(),
            None => self.entry_block = block.into(),
        }
    }

    /// Removes `block` from the block order. Its instructions are dropped from
    /// the layout as well.
    pub fn remove_block(&mut self, block: BlockId) {
        debug_assert!(self.is_block_inserted(block));

        let insts: Vec<_> = self.iter_inst(block).collect();
        for inst in insts {
            self.insts[inst] = InstNode::default();
        }

        let BlockNode { prev, next, .. } = self.blocks[block];
        match prev.expand() {
            Some(prev_block) => self.blocks[prev_block].next = next,
            None => self.entry_block = next,
        }
        match next.expand() {
            Some(next_block) => self.blocks[next_block].prev = prev,
            None => self.last_block = prev,
        }
        self.blocks[block] = BlockNode::default();
    }

    pub fn append_inst(&mut self, inst: InstId, block: BlockId) {
        debug_assert!(self.is_block_inserted(block));
        match self.last_inst_of(block) {
            Some(last) => self.insert_inst_after(inst, last),
            None => self.insert_first_inst(inst, block),
        }
    }

    pub fn prepend_inst(&mut self, inst: InstId, block: BlockId) {
        debug_assert!(self.is_block_inserted(block));
        match self.first_inst_of(block) {
            Some(first) => self.insert_inst_before(inst, first),
            None => self.insert_first_inst(inst, block),
        }
    }

    fn insert_first_inst(&mut self, inst: InstId, block: BlockId) {
        debug_assert!(!self.is_inst_inserted(inst));
        self.insts[inst] = InstNode {
            block: block.into(),
            ..InstNode::default()
        };
        let node = &mut self.blocks[block];
        node.first_inst = inst.into();
        node.last_inst = inst.into();
    }

    pub fn insert_inst_before(&mut self, inst: InstId, before: InstId) {
        debug_assert!(!self.is_inst_inserted(inst));
        let block = self.inst_block(before);
        let prev = self.insts[before].prev;
        self.insts[inst] = InstNode {
            block: block.into(),
            prev,
            next: before.into(),
        };
        self.insts[before].prev = inst.into();
        match prev.expand() {
            Some(prev) => self.insts[prev].next = inst.into(),
            None => self.blocks[block].first_inst = inst.into(),
        }
    }

    pub fn insert_inst_after(&mut self, inst: InstId, after: InstId) {
        debug_assert!(!self.is_inst_inserted(inst));
        let block = self.inst_block(after);
        let next = self.insts[after].next;
        self.insts[inst] = InstNode {
            block: block.into(),
            prev: after.into(),
            next,
        };
        self.insts[after].next = inst.into();
        match next.expand() {
            Some(next) => self.insts[next].prev = inst.into(),
            None => self.blocks[block].last_inst = inst.into(),
        }
    }

    /// Remove instruction from the layout.
    pub fn remove_inst(&mut self, inst: InstId) {
        let block = self.inst_block(inst);
        let InstNode { prev, next, .. } = self.insts[inst];
        match prev.expand() {
            Some(prev_inst) => self.insts[prev_inst].next = next,
            None => self.blocks[block].first_inst = next,
        }
        match next.expand() {
            Some(next_inst) => self.insts[next_inst].prev = prev,
            None => self.blocks[block].last_inst = prev,
        }
        self.insts[inst] = InstNode::default();
    }

    /// Moves `from` and every instruction after it to the end of `to`.
    pub fn move_insts_from(&mut self, from: InstId, to: BlockId) {
        debug_assert!(self.is_block_inserted(to));
        let tail: Vec<_> = self.iter_inst_from(from).collect();
        for inst in tail {
            self.remove_inst(inst);
            self.append_inst(inst, to);
        }
    }
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
struct BlockNode {
    inserted: bool,
    prev: PackedOption<BlockId>,
    next: PackedOption<BlockId>,
    first_inst: PackedOption<InstId>,
    last_inst: PackedOption<InstId>,
}

impl BlockNode {
    fn inserted() -> Self {
        Self {
            inserted: true,
            ..Self::default()
        }
    }
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
struct InstNode {
    /// The block containing the instruction.
    block: PackedOption<BlockId>,
    prev: PackedOption<InstId>,
    next: PackedOption<InstId>,
}
