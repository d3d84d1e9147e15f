//! This module contains dominator tree related structs.
//!
//! The algorithm is based on Keith D. Cooper., Timothy J. Harvey., and Ken Kennedy.: A Simple, Fast Dominance Algorithm:
//! <https://www.cs.rice.edu/~keith/EMBED/dom.pdf>

use cranelift_entity::{packed_option::PackedOption, SecondaryMap};

use dexopt_ir::{BlockId, IrCode};

#[derive(Default, Debug)]
pub struct DomTree {
    doms: SecondaryMap<BlockId, PackedOption<BlockId>>,
    rpo: Vec<BlockId>,
}

impl DomTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.doms.clear();
        self.rpo.clear();
    }

    /// Returns the immediate dominator of the `block`.
    /// Returns None if the `block` is unreachable from the entry block, or the `block` is the entry block itself.
    pub fn idom_of(&self, block: BlockId) -> Option<BlockId> {
        if self.rpo.first() == Some(&block) {
            return None;
        }
        self.doms[block].expand()
    }

    /// Returns `true` if block1 strictly dominates block2.
    pub fn strictly_dominates(&self, block1: BlockId, block2: BlockId) -> bool {
        let mut current_block = block2;
        while let Some(block) = self.idom_of(current_block) {
            if block == block1 {
                return true;
            }
            current_block = block;
        }

        false
    }

    /// Returns `true` if block1 dominates block2.
    pub fn dominates(&self, block1: BlockId, block2: BlockId) -> bool {
        if block1 == block2 {
            return true;
        }

        self.strictly_dominates(block1, block2)
    }

    pub fn compute(&mut self, code: &IrCode) {
        self.clear();

        self.rpo = code.topologically_sorted_blocks();
        let block_num = self.rpo.len();

        let mut rpo_nums = SecondaryMap::with_capacity(block_num);
        for (i, &block) in self.rpo.iter().enumerate() {
            rpo_nums[block] = (block_num - i) as u32;
        }

        match self.rpo.first() {
            Some(&entry) => self.doms[entry] = entry.into(),
            None => return,
        }

        let mut changed = true;
        while changed {
            changed = false;
            for &block in self.rpo.iter().skip(1) {
                let preds = &code.block(block).preds;
                let processed_pred = match preds.iter().find(|&&pred| self.doms[pred].is_some()) {
                    Some(pred) => *pred,
                    _ => continue,
                };
                let mut new_dom = processed_pred;

                for &pred in preds {
                    if pred != processed_pred && self.doms[pred].is_some() {
                        new_dom = self.intersect(new_dom, pred, &rpo_nums);
                    }
                }
                if Some(new_dom) != self.doms[block].expand() {
                    changed = true;
                    self.doms[block] = new_dom.into();
                }
            }
        }
    }

    /// Returns `true` if block is reachable from the entry block.
    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.doms[block].is_some()
    }

    /// Returns blocks in RPO.
    pub fn rpo(&self) -> &[BlockId] {
        &self.rpo
    }

    fn intersect(
        &self,
        mut b1: BlockId,
        mut b2: BlockId,
        rpo_nums: &SecondaryMap<BlockId, u32>,
    ) -> BlockId {
        while b1 != b2 {
            while rpo_nums[b1] < rpo_nums[b2] {
                b1 = self.doms[b1].unwrap();
            }
            while rpo_nums[b2] < rpo_nums[b1] {
                b2 = self.doms[b2].unwrap();
            }
        }

        b1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use dexopt_ir::{builder::test_util::*, inst::IfCondition, DexItemFactory, InstKind, MoveType};

    fn calc_dom(code: &IrCode) -> DomTree {
        let mut dom_tree = DomTree::default();
        dom_tree.compute(code);
        dom_tree
    }

    fn test_idom(code: &IrCode, block: BlockId) -> Option<BlockId> {
        let dom_tree = calc_dom(code);
        dom_tree.idom_of(block)
    }

    #[test]
    fn dom_tree_if_else() {
        let factory = DexItemFactory::new();
        let mut builder = test_builder(&factory, "m", &["I"]);

        let entry_block = builder.append_block();
        let then_block = builder.append_block();
        let else_block = builder.append_block();
        let merge_block = builder.append_block();

        builder.switch_to_block(entry_block);
        let arg = builder.add_argument(0, MoveType::Single, None, false);
        builder.add_inst(InstKind::If(IfCondition::Eq), &[arg], None);
        builder.link(entry_block, then_block);
        builder.link(entry_block, else_block);

        for block in [then_block, else_block] {
            builder.switch_to_block(block);
            builder.add_inst(InstKind::Goto, &[], None);
            builder.link(block, merge_block);
        }

        builder.switch_to_block(merge_block);
        builder.add_inst(InstKind::Return(None), &[], None);
        let code = builder.build().unwrap();

        assert_eq!(test_idom(&code, entry_block), None);
        assert_eq!(test_idom(&code, then_block), Some(entry_block));
        assert_eq!(test_idom(&code, else_block), Some(entry_block));
        assert_eq!(test_idom(&code, merge_block), Some(entry_block));
    }

    #[test]
    fn unreachable_edge() {
        let factory = DexItemFactory::new();
        let mut builder = test_builder(&factory, "m", &["I"]);

        let a = builder.append_block();
        let b = builder.append_block();
        let c = builder.append_block();
        let d = builder.append_block();
        let e = builder.append_block();

        builder.switch_to_block(a);
        let arg = builder.add_argument(0, MoveType::Single, None, false);
        builder.add_inst(InstKind::If(IfCondition::Eq), &[arg], None);
        builder.link(a, b);
        builder.link(a, c);

        builder.switch_to_block(b);
        builder.add_inst(InstKind::Goto, &[], None);
        builder.link(b, e);

        builder.switch_to_block(c);
        builder.add_inst(InstKind::Goto, &[], None);
        builder.link(c, e);

        builder.switch_to_block(d);
        builder.add_inst(InstKind::Goto, &[], None);
        builder.link(d, e);

        builder.switch_to_block(e);
        builder.add_inst(InstKind::Return(None), &[], None);
        let code = builder.build().unwrap();

        let dom_tree = calc_dom(&code);
        assert_eq!(dom_tree.idom_of(a), None);
        assert_eq!(dom_tree.idom_of(b), Some(a));
        assert_eq!(dom_tree.idom_of(c), Some(a));
        assert_eq!(dom_tree.idom_of(d), None);
        assert!(!dom_tree.is_reachable(d));
        assert!(dom_tree.is_reachable(a));
        assert_eq!(dom_tree.idom_of(e), Some(a));
        assert!(dom_tree.dominates(a, e));
        assert!(!dom_tree.strictly_dominates(b, e));
    }

    #[test]
    fn dom_tree_loop() {
        let factory = DexItemFactory::new();
        let mut builder = test_builder(&factory, "m", &["I"]);

        let entry = builder.append_block();
        let header = builder.append_block();
        let body = builder.append_block();
        let exit = builder.append_block();

        builder.switch_to_block(entry);
        let arg = builder.add_argument(0, MoveType::Single, None, false);
        builder.add_inst(InstKind::Goto, &[], None);
        builder.link(entry, header);

        builder.switch_to_block(header);
        builder.add_inst(InstKind::If(IfCondition::Eq), &[arg], None);
        builder.link(header, exit);
        builder.link(header, body);

        builder.switch_to_block(body);
        builder.add_inst(InstKind::Goto, &[], None);
        builder.link(body, header);

        builder.switch_to_block(exit);
        builder.add_inst(InstKind::Return(None), &[], None);
        let code = builder.build().unwrap();

        let dom_tree = calc_dom(&code);
        assert_eq!(dom_tree.idom_of(header), Some(entry));
        assert_eq!(dom_tree.idom_of(body), Some(header));
        assert_eq!(dom_tree.idom_of(exit), Some(header));
        assert!(!dom_tree.dominates(body, exit));
    }
}
