//! The SSA body of one method.
use cranelift_entity::packed_option::PackedOption;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    block::{BlockData, BlockId},
    dfg::DataFlowGraph,
    factory::DexMethod,
    inst::{ConstType, InstData, InstId, InstKind},
    layout::Layout,
    value::{DebugLocal, MoveType, PhiData, ValueData, ValueId, ValueKind},
};

/// Distance between two consecutive instruction numbers.
pub const INSTRUCTION_NUMBER_DELTA: i32 = 2;

#[derive(Debug, Clone)]
pub struct IrCode {
    pub method: DexMethod,
    pub dfg: DataFlowGraph,
    pub layout: Layout,
    normal_exit: PackedOption<BlockId>,
    next_block_number: u32,
    value_numbers: u32,
}

/// Result of [`IrCode::absorb`]: where the blocks of another body ended up.
#[derive(Debug, Clone)]
pub struct AbsorbedCode {
    pub entry: BlockId,
    pub normal_exit: Option<BlockId>,
    /// The absorbed blocks in their new layout order.
    pub blocks: Vec<BlockId>,
}

impl IrCode {
    pub fn new(method: DexMethod) -> Self {
        Self {
            method,
            dfg: DataFlowGraph::new(),
            layout: Layout::new(),
            normal_exit: PackedOption::default(),
            next_block_number: 0,
            value_numbers: 0,
        }
    }

    /// Creates a block with a fresh number. The block is not inserted into the
    /// layout.
    pub fn make_block(&mut self) -> BlockId {
        let number = self.next_block_number;
        self.next_block_number += 1;
        self.dfg.make_block(number)
    }

    /// Creates a block and appends it to the layout.
    pub fn append_new_block(&mut self) -> BlockId {
        let block = self.make_block();
        self.layout.append_block(block);
        block
    }

    pub fn block(&self, block: BlockId) -> &BlockData {
        self.dfg.block(block)
    }

    pub fn block_mut(&mut self, block: BlockId) -> &mut BlockData {
        self.dfg.block_mut(block)
    }

    pub fn entry_block(&self) -> Option<BlockId> {
        self.layout.entry_block()
    }

    pub fn blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.layout.iter_block()
    }

    pub fn insts(&self, block: BlockId) -> impl Iterator<Item = InstId> + '_ {
        self.layout.iter_inst(block)
    }

    pub fn block_entry(&self, block: BlockId) -> Option<InstId> {
        self.layout.first_inst_of(block)
    }

    pub fn block_exit(&self, block: BlockId) -> Option<InstId> {
        self.layout.last_inst_of(block)
    }

    pub fn normal_exit(&self) -> Option<BlockId> {
        self.normal_exit.expand()
    }

    pub fn set_normal_exit(&mut self, block: Option<BlockId>) {
        self.normal_exit = block.into();
    }

    pub fn next_value_number(&mut self) -> u32 {
        let number = self.value_numbers;
        self.value_numbers += 1;
        number
    }

    pub fn create_value(&mut self, ty: MoveType) -> ValueId {
        let number = self.next_value_number();
        self.dfg.make_value(ValueData::new(ty, number))
    }

    /// Creates a value carrying a local. The back link to `previous` is
    /// registered once the value is attached to its defining instruction.
    pub fn create_value_with_local(
        &mut self,
        ty: MoveType,
        local: DebugLocal,
        previous: Option<ValueId>,
    ) -> ValueId {
        let number = self.next_value_number();
        let mut data = ValueData::new(ty, number).with_local(local);
        data.previous_local_value = previous;
        self.dfg.make_value(data)
    }

    pub fn create_phi(&mut self, block: BlockId, ty: MoveType) -> ValueId {
        let number = self.next_value_number();
        self.dfg.make_phi(block, ty, number)
    }

    /// Creates an instruction that is not inserted yet. If `out` is given, a
    /// fresh output value of that type is attached.
    pub fn make_inst(&mut self, kind: InstKind, args: &[ValueId], out: Option<MoveType>) -> InstId {
        let inst = self.dfg.make_inst(InstData::new(kind, args));
        if let Some(ty) = out {
            let value = self.create_value(ty);
            self.dfg.attach_result(inst, value);
        }
        inst
    }

    pub fn append_inst(
        &mut self,
        block: BlockId,
        kind: InstKind,
        args: &[ValueId],
        out: Option<MoveType>,
    ) -> InstId {
        let inst = self.make_inst(kind, args, out);
        self.layout.append_inst(inst, block);
        inst
    }

    pub fn inst_result(&self, inst: InstId) -> Option<ValueId> {
        self.dfg.inst_result(inst)
    }

    pub fn inst_block(&self, inst: InstId) -> BlockId {
        self.layout.inst_block(inst)
    }

    /// Creates an `int` constant instruction that is not inserted yet.
    pub fn create_int_constant(&mut self, value: i32) -> InstId {
        self.make_inst(
            InstKind::ConstNumber {
                ty: ConstType::Int,
                value: value.into(),
            },
            &[],
            Some(MoveType::Single),
        )
    }

    /// Removes `inst` from its block and from the use lists it is on.
    ///
    /// # Panics
    /// Panics if the output of `inst` is still used.
    pub fn remove_inst(&mut self, inst: InstId) {
        if let Some(result) = self.dfg.inst_result(inst) {
            assert!(
                !self.dfg.is_used(result),
                "cannot remove {inst}: its output {result} still has users"
            );
        }
        self.dfg.untrack_inst(inst);
        self.layout.remove_inst(inst);
    }

    /// Adds the edge `pred -> succ`. The new successor goes last.
    pub fn link(&mut self, pred: BlockId, succ: BlockId) {
        debug_assert!(
            !self.dfg.block(pred).succs.contains(&succ),
            "duplicate edge {pred} -> {succ}"
        );
        self.dfg.block_mut(pred).succs.push(succ);
        self.dfg.block_mut(succ).preds.push(pred);
    }

    /// Removes the edge `pred -> succ` together with the phi operands of
    /// `succ` that flow in over it and the handlers of `pred` targeting it.
    pub fn unlink(&mut self, pred: BlockId, succ: BlockId) {
        let succ_data = self.dfg.block_mut(succ);
        let pred_idx = succ_data
            .pred_index(pred)
            .unwrap_or_else(|| panic!("{pred} is not a predecessor of {succ}"));
        succ_data.preds.remove(pred_idx);
        let phis = succ_data.phis.clone();
        for phi in phis {
            self.dfg.remove_phi_operand(phi, pred_idx);
        }

        let pred_data = self.dfg.block_mut(pred);
        let succ_idx = pred_data
            .succ_index(succ)
            .unwrap_or_else(|| panic!("{succ} is not a successor of {pred}"));
        pred_data.succs.remove(succ_idx);
        pred_data.catch_handlers.remove_target(succ_idx as u32);
    }

    /// Replaces `old` by `new` in the predecessor list of `block`, keeping its
    /// position so that phi operands stay aligned.
    pub fn replace_pred(&mut self, block: BlockId, old: BlockId, new: BlockId) {
        let data = self.dfg.block_mut(block);
        let idx = data
            .pred_index(old)
            .unwrap_or_else(|| panic!("{old} is not a predecessor of {block}"));
        data.preds[idx] = new;
    }

    /// Values of the `Argument` instructions at the start of the entry block,
    /// in order.
    pub fn collect_arguments(&self) -> Vec<ValueId> {
        let Some(entry) = self.entry_block() else {
            return Vec::new();
        };
        self.layout
            .iter_inst(entry)
            .take_while(|&inst| self.dfg.inst_kind(inst).is_argument())
            .filter_map(|inst| self.dfg.inst_result(inst))
            .collect()
    }

    /// Blocks reachable from the entry in reverse post order, visiting
    /// successors in successor list order.
    pub fn topologically_sorted_blocks(&self) -> Vec<BlockId> {
        let Some(entry) = self.entry_block() else {
            return Vec::new();
        };
        let mut visited = FxHashSet::default();
        let mut post_order = Vec::new();
        let mut stack = vec![(entry, 0usize)];
        visited.insert(entry);
        while let Some((block, next)) = stack.last_mut() {
            let succs = &self.dfg.block(*block).succs;
            if let Some(&succ) = succs.get(*next) {
                *next += 1;
                if visited.insert(succ) {
                    stack.push((succ, 0));
                }
            } else {
                post_order.push(*block);
                stack.pop();
            }
        }
        post_order.reverse();
        post_order
    }

    /// Numbers every instruction in topological block order and returns the
    /// next unused number.
    pub fn number_instructions(&mut self) -> i32 {
        let mut number = 0;
        for block in self.topologically_sorted_blocks() {
            let insts: Vec<_> = self.layout.iter_inst(block).collect();
            for inst in insts {
                self.dfg.set_inst_number(inst, number);
                number += INSTRUCTION_NUMBER_DELTA;
            }
        }
        number
    }

    pub fn highest_block_number(&self) -> u32 {
        self.blocks()
            .map(|block| self.dfg.block(block).number)
            .max()
            .unwrap_or(0)
    }

    pub fn inst_count(&self) -> usize {
        self.blocks().map(|block| self.layout.block_len(block)).sum()
    }

    /// Returns `true` if any instruction of `block` can throw.
    pub fn block_can_throw(&self, block: BlockId) -> bool {
        self.insts(block)
            .any(|inst| self.dfg.inst_kind(inst).can_throw())
    }

    /// Removes blocks that were already detached from the rest of the graph.
    /// Their instructions and phis stop using any value.
    pub fn remove_blocks(&mut self, blocks: &[BlockId]) {
        for &block in blocks {
            let insts: Vec<_> = self.layout.iter_inst(block).collect();
            for inst in insts {
                self.dfg.untrack_inst(inst);
            }
            let phis = self.dfg.block(block).phis.clone();
            for phi in phis {
                self.dfg.remove_phi(phi);
            }
            self.layout.remove_block(block);
            if self.normal_exit() == Some(block) {
                self.set_normal_exit(None);
            }
        }
    }

    /// Moves all blocks of `other` into this code, right after `after` in the
    /// layout. Blocks and values are renumbered; the control flow between the
    /// moved blocks is kept, nothing is linked to the existing blocks.
    pub fn absorb(&mut self, other: IrCode, after: BlockId) -> AbsorbedCode {
        let other_blocks: Vec<_> = other.layout.iter_block().collect();
        let entry = *other_blocks
            .first()
            .unwrap_or_else(|| panic!("cannot absorb empty code"));

        let mut block_map = FxHashMap::default();
        let mut anchor = after;
        for &block in &other_blocks {
            let new_block = self.make_block();
            self.layout.insert_block_after(new_block, anchor);
            block_map.insert(block, new_block);
            anchor = new_block;
        }

        let mut value_map = FxHashMap::default();
        for &block in &other_blocks {
            let defs = other
                .dfg
                .block(block)
                .phis
                .iter()
                .copied()
                .chain(other.layout.iter_inst(block).filter_map(|i| other.dfg.inst_result(i)));
            for value in defs {
                let mut data = other.dfg.value(value).clone();
                data.kind = ValueKind::Undefined;
                data.number = self.next_value_number();
                data.previous_local_value = None;
                value_map.insert(value, self.dfg.make_value(data));
            }
        }
        let map_value = |value: ValueId| -> ValueId {
            *value_map
                .get(&value)
                .unwrap_or_else(|| panic!("{value} is used but not defined in absorbed code"))
        };

        for &block in &other_blocks {
            let new_block = block_map[&block];
            let data = other.dfg.block(block);
            let new_data = self.dfg.block_mut(new_block);
            new_data.preds = data.preds.iter().map(|b| block_map[b]).collect();
            new_data.succs = data.succs.iter().map(|b| block_map[b]).collect();
            new_data.catch_handlers = data.catch_handlers.clone();
            new_data.locals_at_entry = data.locals_at_entry.clone();
            new_data.filled = data.filled;
            new_data.sealed = data.sealed;

            for &phi in &data.phis {
                let new_phi = map_value(phi);
                let value = self.dfg.value_mut(new_phi);
                value.kind = ValueKind::Phi(PhiData {
                    block: new_block,
                    operands: Default::default(),
                });
                value.previous_local_value =
                    other.dfg.value(phi).previous_local_value.map(map_value);
                self.dfg.block_mut(new_block).phis.push(new_phi);
                for &op in other.dfg.phi_operands(phi) {
                    self.dfg.append_phi_operand(new_phi, map_value(op));
                }
            }

            for inst in other.layout.iter_inst(block) {
                let old = other.dfg.inst(inst);
                let args: Vec<_> = old.args().iter().copied().map(map_value).collect();
                let mut new = InstData::new(old.kind.clone(), &args);
                new.debug_values = old.debug_values().map(map_value).collect();
                let new_inst = self.dfg.make_inst(new);
                if let Some(result) = old.result() {
                    let new_result = map_value(result);
                    self.dfg.value_mut(new_result).previous_local_value =
                        other.dfg.value(result).previous_local_value.map(map_value);
                    self.dfg.attach_result(new_inst, new_result);
                }
                self.layout.append_inst(new_inst, new_block);
            }
        }

        AbsorbedCode {
            entry: block_map[&entry],
            normal_exit: other.normal_exit().map(|b| block_map[&b]),
            blocks: other_blocks.iter().map(|b| block_map[b]).collect(),
        }
    }
}
