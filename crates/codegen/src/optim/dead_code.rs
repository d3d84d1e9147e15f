//! Removal of instructions and phis whose results are never observed.

use rustc_hash::FxHashSet;

use dexopt_ir::{BlockId, InstId, IrCode, ValueId};

#[derive(Debug, Default)]
pub struct DeadCodeRemover {
    dead_phis: Vec<ValueId>,
    dead_insts: Vec<InstId>,
}

impl DeadCodeRemover {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.dead_phis.clear();
        self.dead_insts.clear();
    }

    /// Removes dead instructions and phis until nothing changes.
    /// Returns the number of removed items.
    pub fn run(&mut self, code: &mut IrCode) -> usize {
        let mut removed = 0;
        loop {
            let count = self.run_once(code);
            if count == 0 {
                break;
            }
            removed += count;
        }
        if removed > 0 {
            tracing::trace!(removed, "removed dead code");
        }
        removed
    }

    fn run_once(&mut self, code: &mut IrCode) -> usize {
        self.clear();

        // Users are visited before their definitions: unreachable blocks
        // first, then reachable blocks in post order.
        let mut order = code.topologically_sorted_blocks();
        let reachable: FxHashSet<BlockId> = order.iter().copied().collect();
        let unreachable: Vec<_> = code.blocks().filter(|b| !reachable.contains(b)).collect();
        order.extend(unreachable);

        for &block in order.iter().rev() {
            for &phi in &code.block(block).phis {
                if code.dfg.is_dead(phi) {
                    self.dead_phis.push(phi);
                }
            }
            let insts: Vec<_> = code.insts(block).collect();
            for &inst in insts.iter().rev() {
                if !code.dfg.inst_kind(inst).can_be_dead_code() {
                    continue;
                }
                if code
                    .dfg
                    .inst_result(inst)
                    .map_or(true, |result| code.dfg.is_dead(result))
                {
                    self.dead_insts.push(inst);
                }
            }
        }

        // Phis go first so that no instruction output is still listed as a
        // phi operand when its instruction is removed.
        for &phi in &self.dead_phis {
            code.dfg.remove_phi(phi);
        }
        for &inst in &self.dead_insts {
            code.remove_inst(inst);
        }
        self.dead_phis.len() + self.dead_insts.len()
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use super::*;
    use dexopt_ir::{
        builder::test_util::dump_code,
        inst::{BinopKind, IfCondition, NumericType},
        DexItemFactory, InstKind, MoveType,
    };

    const ADD: InstKind = InstKind::Binop {
        op: BinopKind::Add,
        ty: NumericType::Int,
    };

    fn new_code(factory: &DexItemFactory) -> IrCode {
        let holder = factory.create_type("LTest;");
        let proto = factory.create_proto(factory.void_type, &[factory.int_type]);
        IrCode::new(factory.create_method(holder, proto, "m"))
    }

    #[test]
    fn unused_arithmetic_is_removed() {
        let factory = DexItemFactory::new();
        let mut code = new_code(&factory);
        let b0 = code.append_new_block();
        let arg = code.append_inst(b0, InstKind::Argument, &[], Some(MoveType::Single));
        let arg = code.inst_result(arg).unwrap();
        code.append_inst(b0, ADD, &[arg, arg], Some(MoveType::Single));
        let used = code.append_inst(b0, ADD, &[arg, arg], Some(MoveType::Single));
        let used = code.inst_result(used).unwrap();
        code.append_inst(b0, InstKind::Return(Some(MoveType::Single)), &[used], None);

        assert_eq!(DeadCodeRemover::new().run(&mut code), 1);
        assert_snapshot!(dump_code(&code), @r"
        block0:
            v0 = argument
            v2 = add v0, v0
            return v2
        ");
    }

    #[test]
    fn dead_loop_phi_is_removed() {
        let factory = DexItemFactory::new();
        let mut code = new_code(&factory);
        let b0 = code.append_new_block();
        let b1 = code.append_new_block();
        let b2 = code.append_new_block();
        let b3 = code.append_new_block();

        let arg = code.append_inst(b0, InstKind::Argument, &[], Some(MoveType::Single));
        let arg = code.inst_result(arg).unwrap();
        let c = code.create_int_constant(3);
        code.layout.append_inst(c, b0);
        let c = code.inst_result(c).unwrap();
        code.append_inst(b0, InstKind::Goto, &[], None);
        code.link(b0, b1);

        let phi = code.create_phi(b1, MoveType::Single);
        code.append_inst(b1, InstKind::If(IfCondition::Eq), &[arg], None);
        code.link(b1, b2);
        code.link(b1, b3);

        let next = code.append_inst(b2, ADD, &[phi, c], Some(MoveType::Single));
        let next = code.inst_result(next).unwrap();
        code.append_inst(b2, InstKind::Goto, &[], None);
        code.link(b2, b1);
        code.dfg.append_phi_operand(phi, c);
        code.dfg.append_phi_operand(phi, next);

        code.append_inst(b3, InstKind::Return(None), &[], None);
        code.set_normal_exit(Some(b3));

        assert!(code.dfg.is_dead(phi));
        assert_eq!(DeadCodeRemover::new().run(&mut code), 3);
        assert!(code.block(b1).phis.is_empty());
        assert_snapshot!(dump_code(&code), @r"
        block0: succs(block1)
            v0 = argument
            goto
        block1: preds(block0, block2) succs(block2, block3)
            if-eq v0
        block2: preds(block1) succs(block1)
            goto
        block3: preds(block1)
            return
        ");
    }

    #[test]
    fn debug_users_keep_values() {
        let factory = DexItemFactory::new();
        let mut code = new_code(&factory);
        let b0 = code.append_new_block();
        let arg = code.append_inst(b0, InstKind::Argument, &[], Some(MoveType::Single));
        let arg = code.inst_result(arg).unwrap();
        let sum = code.append_inst(b0, ADD, &[arg, arg], Some(MoveType::Single));
        let sum = code.inst_result(sum).unwrap();
        let ret = code.append_inst(b0, InstKind::Return(None), &[], None);
        code.dfg.add_debug_value(ret, sum);

        assert_eq!(DeadCodeRemover::new().run(&mut code), 0);
        assert_eq!(code.layout.block_len(b0), 3);
    }
}
