//! SSA construction over VM registers, based on [`Simple and Efficient
//! Construction of Static Single Assignment Form`](https://link.springer.com/chapter/10.1007/978-3-642-37051-9_6).
use rustc_hash::FxHashMap;

use crate::{
    block::BlockId,
    code::IrCode,
    error::{CompilationError, CompilationResult},
    value::{MoveType, ValueId},
};

#[derive(Debug, Default)]
pub(super) struct SsaBuilder {
    /// Current definition of a register at the end of a block.
    defs: FxHashMap<(BlockId, u32), ValueId>,

    /// Operand-less phis created in blocks that were not sealed yet.
    incomplete_phis: FxHashMap<BlockId, Vec<(u32, ValueId)>>,

    /// Eliminated phis and the value that replaced them.
    replaced: FxHashMap<ValueId, ValueId>,
}

impl SsaBuilder {
    pub(super) fn new() -> Self {
        Self::default()
    }

    pub(super) fn write_register(&mut self, block: BlockId, reg: u32, value: ValueId) {
        self.defs.insert((block, reg), value);
    }

    pub(super) fn read_register(
        &mut self,
        code: &mut IrCode,
        block: BlockId,
        reg: u32,
        ty: MoveType,
    ) -> CompilationResult<ValueId> {
        match self.defs.get(&(block, reg)) {
            Some(&value) => Ok(self.resolve(value)),
            None => self.read_register_recursive(code, block, reg, ty),
        }
    }

    pub(super) fn seal_block(&mut self, code: &mut IrCode, block: BlockId) -> CompilationResult<()> {
        if code.block(block).sealed {
            return Ok(());
        }
        code.block_mut(block).sealed = true;
        for (reg, phi) in self.incomplete_phis.remove(&block).unwrap_or_default() {
            self.add_phi_operands(code, reg, phi)?;
        }
        Ok(())
    }

    /// Follows the chain of eliminated phis starting at `value`.
    pub(super) fn resolve(&self, mut value: ValueId) -> ValueId {
        while let Some(&next) = self.replaced.get(&value) {
            value = next;
        }
        value
    }

    fn read_register_recursive(
        &mut self,
        code: &mut IrCode,
        block: BlockId,
        reg: u32,
        ty: MoveType,
    ) -> CompilationResult<ValueId> {
        if !code.block(block).sealed {
            let phi = code.create_phi(block, ty);
            self.incomplete_phis
                .entry(block)
                .or_default()
                .push((reg, phi));
            self.write_register(block, reg, phi);
            return Ok(phi);
        }

        let value = match *code.block(block).preds.as_slice() {
            [] => return Err(CompilationError::UndefinedValue),
            [pred] => self.read_register(code, pred, reg, ty)?,
            _ => {
                let phi = code.create_phi(block, ty);
                // Break potential cycles by defining the operand-less phi first.
                self.write_register(block, reg, phi);
                self.add_phi_operands(code, reg, phi)?
            }
        };
        self.write_register(block, reg, value);
        Ok(value)
    }

    /// Fills `phi` with one operand per predecessor and tries to remove it.
    /// Returns the value that now stands for the phi.
    fn add_phi_operands(
        &mut self,
        code: &mut IrCode,
        reg: u32,
        phi: ValueId,
    ) -> CompilationResult<ValueId> {
        let block = code.dfg.phi_block(phi);
        let ty = code.dfg.value(phi).ty;
        let preds = code.block(block).preds.clone();

        // Reading a predecessor may eliminate phis read from earlier ones.
        let mut operands = Vec::with_capacity(preds.len());
        for pred in preds {
            operands.push(self.read_register(code, pred, reg, ty)?);
        }
        for operand in operands {
            let operand = self.resolve(operand);
            code.dfg.append_phi_operand(phi, operand);
        }

        self.try_remove_trivial_phi(code, phi)
    }

    fn try_remove_trivial_phi(
        &mut self,
        code: &mut IrCode,
        phi: ValueId,
    ) -> CompilationResult<ValueId> {
        if code.dfg.phi_operands(phi).iter().all(|&op| op == phi) {
            // Only reachable through a cycle that never defines the register.
            return Err(CompilationError::UndefinedValue);
        }
        if !code.dfg.is_trivial_phi(phi) {
            return Ok(phi);
        }

        let Self { defs, replaced, .. } = self;
        code.dfg.remove_trivial_phi(phi, &mut |old, new| {
            replaced.insert(old, new);
            for value in defs.values_mut() {
                if *value == old {
                    *value = new;
                }
            }
        });
        Ok(self.resolve(phi))
    }
}
