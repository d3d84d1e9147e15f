//! This module contains the data flow graph: blocks, values, instructions and
//! the use/def bookkeeping between them.
use std::collections::BTreeSet;

use cranelift_entity::{PrimaryMap, SecondaryMap};
use rustc_hash::FxHashSet;

use crate::{
    block::{BlockData, BlockId},
    inst::{InstData, InstId, InstKind},
    value::{DebugLocal, MoveType, PhiData, ValueData, ValueId, ValueKind},
};

#[derive(Debug, Default, Clone)]
pub struct DataFlowGraph {
    #[doc(hidden)]
    pub blocks: PrimaryMap<BlockId, BlockData>,
    #[doc(hidden)]
    pub values: PrimaryMap<ValueId, ValueData>,
    insts: PrimaryMap<InstId, InstData>,
    users: SecondaryMap<ValueId, BTreeSet<InstId>>,
    phi_users: SecondaryMap<ValueId, BTreeSet<ValueId>>,
    debug_users: SecondaryMap<ValueId, BTreeSet<InstId>>,
}

impl DataFlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn make_block(&mut self, number: u32) -> BlockId {
        self.blocks.push(BlockData::new(number))
    }

    pub fn block(&self, block: BlockId) -> &BlockData {
        &self.blocks[block]
    }

    pub fn block_mut(&mut self, block: BlockId) -> &mut BlockData {
        &mut self.blocks[block]
    }

    pub fn make_value(&mut self, value: ValueData) -> ValueId {
        self.values.push(value)
    }

    pub fn value(&self, value: ValueId) -> &ValueData {
        &self.values[value]
    }

    /// Gives access to the flags and type of a value. Use/def edges must be
    /// changed through the graph.
    pub fn value_mut(&mut self, value: ValueId) -> &mut ValueData {
        &mut self.values[value]
    }

    /// Creates an instruction and registers it as a user of its arguments and
    /// as a debug user of its debug values.
    pub fn make_inst(&mut self, data: InstData) -> InstId {
        let inst = self.insts.push(data);
        self.attach_user(inst);
        inst
    }

    pub fn inst(&self, inst: InstId) -> &InstData {
        &self.insts[inst]
    }

    pub fn inst_kind(&self, inst: InstId) -> &InstKind {
        &self.insts[inst].kind
    }

    pub fn inst_kind_mut(&mut self, inst: InstId) -> &mut InstKind {
        &mut self.insts[inst].kind
    }

    pub fn set_inst_number(&mut self, inst: InstId, number: i32) {
        self.insts[inst].number = number;
    }

    pub fn inst_args(&self, inst: InstId) -> &[ValueId] {
        &self.insts[inst].args
    }

    pub fn inst_result(&self, inst: InstId) -> Option<ValueId> {
        self.insts[inst].result()
    }

    /// Makes `value` the output of `inst`. If the value links to a previous
    /// local value, the instruction becomes a debug user of that value.
    pub fn attach_result(&mut self, inst: InstId, value: ValueId) {
        debug_assert!(self.insts[inst].result.is_none());
        debug_assert!(matches!(self.values[value].kind, ValueKind::Undefined));
        self.insts[inst].result = value.into();
        self.values[value].kind = ValueKind::Inst(inst);
        if let Some(prev) = self.values[value].previous_local_value {
            self.debug_users[prev].insert(inst);
        }
    }

    pub fn attach_user(&mut self, inst: InstId) {
        let data = &self.insts[inst];
        for &arg in &data.args {
            self.users[arg].insert(inst);
        }
        for &value in &data.debug_values {
            self.debug_users[value].insert(inst);
        }
    }

    /// Deregisters `inst` from every value it reads, including its debug
    /// values and the previous local value of its output.
    pub fn untrack_inst(&mut self, inst: InstId) {
        let data = &self.insts[inst];
        for &arg in &data.args {
            self.users[arg].remove(&inst);
        }
        for &value in &data.debug_values {
            self.debug_users[value].remove(&inst);
        }
        if let Some(prev) = data
            .result()
            .and_then(|result| self.values[result].previous_local_value)
        {
            self.debug_users[prev].remove(&inst);
        }
    }

    pub fn replace_inst_arg(&mut self, inst: InstId, idx: usize, new: ValueId) {
        let old = std::mem::replace(&mut self.insts[inst].args[idx], new);
        if !self.insts[inst].args.contains(&old) {
            self.users[old].remove(&inst);
        }
        self.users[new].insert(inst);
    }

    pub fn add_debug_value(&mut self, inst: InstId, value: ValueId) {
        self.insts[inst].debug_values.insert(value);
        self.debug_users[value].insert(inst);
    }

    pub fn remove_debug_value(&mut self, inst: InstId, value: ValueId) {
        self.insts[inst].debug_values.remove(&value);
        self.debug_users[value].remove(&inst);
    }

    /// Attaches local info to `value`. `previous` is the value that held the
    /// same local before.
    pub fn set_local_info(
        &mut self,
        value: ValueId,
        local: DebugLocal,
        previous: Option<ValueId>,
    ) {
        let definition = self.values[value].definition();
        if let (Some(old), Some(inst)) = (self.values[value].previous_local_value, definition) {
            self.debug_users[old].remove(&inst);
        }
        let data = &mut self.values[value];
        data.local = Some(local);
        data.previous_local_value = previous;
        if let (Some(prev), Some(inst)) = (previous, definition) {
            self.debug_users[prev].insert(inst);
        }
    }

    /// Returns the all instructions that use `value` as an input.
    pub fn users(&self, value: ValueId) -> impl Iterator<Item = InstId> + '_ {
        self.users[value].iter().copied()
    }

    pub fn phi_users(&self, value: ValueId) -> impl Iterator<Item = ValueId> + '_ {
        self.phi_users[value].iter().copied()
    }

    pub fn debug_users(&self, value: ValueId) -> impl Iterator<Item = InstId> + '_ {
        self.debug_users[value].iter().copied()
    }

    pub fn is_user(&self, value: ValueId, inst: InstId) -> bool {
        self.users[value].contains(&inst)
    }

    pub fn is_phi_user(&self, value: ValueId, phi: ValueId) -> bool {
        self.phi_users[value].contains(&phi)
    }

    pub fn is_debug_user(&self, value: ValueId, inst: InstId) -> bool {
        self.debug_users[value].contains(&inst)
    }

    /// Number of data users: instructions and phis.
    pub fn num_users(&self, value: ValueId) -> usize {
        self.users[value].len() + self.phi_users[value].len()
    }

    pub fn has_debug_users(&self, value: ValueId) -> bool {
        !self.debug_users[value].is_empty()
    }

    /// Returns `true` if anything, including debug instructions, reads `value`.
    pub fn is_used(&self, value: ValueId) -> bool {
        self.num_users(value) > 0 || self.has_debug_users(value)
    }

    /// Creates a phi at the head of `block` with no operands.
    pub fn make_phi(&mut self, block: BlockId, ty: MoveType, number: u32) -> ValueId {
        let mut data = ValueData::new(ty, number);
        data.kind = ValueKind::Phi(PhiData {
            block,
            operands: Default::default(),
        });
        let phi = self.values.push(data);
        self.blocks[block].phis.push(phi);
        phi
    }

    pub fn phi_data(&self, phi: ValueId) -> &PhiData {
        self.values[phi]
            .phi()
            .unwrap_or_else(|| panic!("{phi} is not a phi"))
    }

    fn phi_data_mut(&mut self, phi: ValueId) -> &mut PhiData {
        match &mut self.values[phi].kind {
            ValueKind::Phi(data) => data,
            _ => panic!("{phi} is not a phi"),
        }
    }

    pub fn phi_operands(&self, phi: ValueId) -> &[ValueId] {
        &self.phi_data(phi).operands
    }

    pub fn phi_block(&self, phi: ValueId) -> BlockId {
        self.phi_data(phi).block
    }

    /// Returns `true` if `phi` is still listed in its block.
    pub fn is_live_phi(&self, phi: ValueId) -> bool {
        match self.values[phi].phi() {
            Some(data) => self.blocks[data.block].phis.contains(&phi),
            None => false,
        }
    }

    pub fn append_phi_operand(&mut self, phi: ValueId, operand: ValueId) {
        self.phi_data_mut(phi).operands.push(operand);
        self.phi_users[operand].insert(phi);
    }

    pub fn remove_phi_operand(&mut self, phi: ValueId, pred_index: usize) {
        let data = self.phi_data_mut(phi);
        let removed = data.operands.remove(pred_index);
        if !data.operands.contains(&removed) {
            self.phi_users[removed].remove(&phi);
        }
    }

    pub fn replace_phi_operand(&mut self, phi: ValueId, pred_index: usize, operand: ValueId) {
        let data = self.phi_data_mut(phi);
        let old = std::mem::replace(&mut data.operands[pred_index], operand);
        if !data.operands.contains(&old) {
            self.phi_users[old].remove(&phi);
        }
        self.phi_users[operand].insert(phi);
    }

    /// Returns the single operand other than the phi itself, or `None` if the
    /// phi merges distinct values.
    pub fn trivial_phi_operand(&self, phi: ValueId) -> Option<ValueId> {
        let mut same = None;
        for &op in self.phi_operands(phi) {
            if op == phi || Some(op) == same {
                continue;
            }
            if same.is_some() {
                return None;
            }
            same = Some(op);
        }
        same
    }

    pub fn is_trivial_phi(&self, phi: ValueId) -> bool {
        self.trivial_phi_operand(phi).is_some()
    }

    /// Removes `phi` from its block and from the phi users of its operands.
    pub fn remove_phi(&mut self, phi: ValueId) {
        let data = self.phi_data_mut(phi);
        let block = data.block;
        let operands = std::mem::take(&mut data.operands);
        for op in operands {
            self.phi_users[op].remove(&phi);
        }
        self.blocks[block].phis.retain(|p| *p != phi);
    }

    /// Eliminates `phi` if it is trivial.
    ///
    /// All users of the phi are rewritten to the single real operand; phis
    /// that used the removed phi are re-checked recursively. `on_replace` is
    /// called with `(removed, replacement)` for every eliminated phi so that
    /// callers can update their own definition maps.
    ///
    /// # Panics
    /// Panics if the phi has no operand other than itself.
    pub fn remove_trivial_phi(
        &mut self,
        phi: ValueId,
        on_replace: &mut dyn FnMut(ValueId, ValueId),
    ) -> bool {
        if !self.is_live_phi(phi) {
            return false;
        }
        let mut same = None;
        for &op in self.phi_operands(phi) {
            if op == phi || Some(op) == same {
                continue;
            }
            if same.is_some() {
                return false;
            }
            same = Some(op);
        }
        let same = same.unwrap_or_else(|| panic!("{phi} has no operand other than itself"));

        let phi_users: Vec<_> = self.phi_users(phi).filter(|user| *user != phi).collect();
        self.remove_phi(phi);
        self.replace_users(phi, same);
        on_replace(phi, same);

        for user in phi_users {
            self.remove_trivial_phi(user, on_replace);
        }
        true
    }

    /// Rewrites every use of `old` to `new`: instruction inputs, phi
    /// operands, debug values and previous local links. Afterwards `old` has no
    /// users.
    pub fn replace_users(&mut self, old: ValueId, new: ValueId) {
        if old == new {
            return;
        }

        for user in std::mem::take(&mut self.users[old]) {
            for arg in self.insts[user].args.iter_mut() {
                if *arg == old {
                    *arg = new;
                }
            }
            self.users[new].insert(user);
        }

        for user in std::mem::take(&mut self.phi_users[old]) {
            for op in self.phi_data_mut(user).operands.iter_mut() {
                if *op == old {
                    *op = new;
                }
            }
            self.phi_users[new].insert(user);
        }

        for user in std::mem::take(&mut self.debug_users[old]) {
            let data = &mut self.insts[user];
            if data.debug_values.remove(&old) {
                data.debug_values.insert(new);
            }
            if let Some(result) = data.result() {
                let result = &mut self.values[result];
                if result.previous_local_value == Some(old) {
                    result.previous_local_value = Some(new);
                }
            }
            self.debug_users[new].insert(user);
        }
    }

    /// Returns the register class of `value`. For phis the class is inferred
    /// from the operands.
    pub fn out_type(&self, value: ValueId) -> MoveType {
        if self.values[value].is_phi() {
            self.compute_phi_out_type(value)
        } else {
            self.values[value].ty
        }
    }

    /// Infers the type of `phi` from its operands.
    ///
    /// A zero constant is both a valid int and a valid null reference, so it
    /// never decides the type. Non-phi operands are inspected first, then phi
    /// operands recursively. If nothing decides, the result is
    /// [`MoveType::Single`].
    pub fn compute_phi_out_type(&self, phi: ValueId) -> MoveType {
        let mut active = FxHashSet::default();
        self.compute_phi_out_type_rec(phi, &mut active)
    }

    fn compute_phi_out_type_rec(&self, phi: ValueId, active: &mut FxHashSet<ValueId>) -> MoveType {
        active.insert(phi);
        let operands = self.phi_operands(phi);
        for &op in operands {
            if !self.values[op].is_phi() && !self.is_single_zero_const(op) {
                return self.values[op].ty;
            }
        }
        for &op in operands {
            if self.values[op].is_phi() && !active.contains(&op) {
                let ty = self.compute_phi_out_type_rec(op, active);
                if ty != MoveType::Single {
                    return ty;
                }
            }
        }
        MoveType::Single
    }

    fn is_single_zero_const(&self, value: ValueId) -> bool {
        let data = &self.values[value];
        data.ty == MoveType::Single
            && data
                .definition()
                .is_some_and(|inst| self.insts[inst].kind.is_zero_const())
    }

    /// Returns `true` if `value` is defined by a constant and carries no local.
    pub fn is_constant(&self, value: ValueId) -> bool {
        let data = &self.values[value];
        !data.has_local_info()
            && data
                .definition()
                .is_some_and(|inst| self.insts[inst].kind.is_const())
    }

    /// Returns `true` if removing the definition of `value` cannot change the
    /// program.
    ///
    /// Debug users keep a value alive. Otherwise every instruction user must
    /// itself be removable with a dead output and every phi user must be dead.
    /// Cycles through phis count as dead.
    pub fn is_dead(&self, value: ValueId) -> bool {
        if !self.is_used(value) {
            return true;
        }
        let mut active = FxHashSet::default();
        self.is_dead_rec(value, &mut active)
    }

    fn is_dead_rec(&self, value: ValueId, active: &mut FxHashSet<ValueId>) -> bool {
        active.insert(value);
        if self.has_debug_users(value) {
            return false;
        }
        for user in self.users(value) {
            let data = &self.insts[user];
            if !data.kind.can_be_dead_code() {
                return false;
            }
            match data.result() {
                Some(out) if active.contains(&out) => {}
                Some(out) => {
                    if !self.is_dead_rec(out, active) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        for user in self.phi_users(value) {
            if !active.contains(&user) && !self.is_dead_rec(user, active) {
                return false;
            }
        }
        true
    }
}
