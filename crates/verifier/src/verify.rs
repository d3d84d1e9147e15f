use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use dexopt_ir::{value::ValueKind, BlockId, InstId, InstKind, IrCode, ValueId};

use crate::{
    diagnostic::{Diagnostic, DiagnosticCode, Location},
    report::VerificationReport,
    VerifierConfig,
};

pub fn verify_code(code: &IrCode, cfg: &VerifierConfig) -> VerificationReport {
    let mut verifier = CodeVerifier::new(code, cfg);
    verifier.run();
    verifier.report
}

pub fn verify_code_or_panic(code: &IrCode, cfg: &VerifierConfig) {
    let report = verify_code(code, cfg);
    if report.has_errors() {
        eprintln!("DEXOPT_IR_VERIFY_FAILURE: {}", code.method);
        eprintln!("{report}");
        panic!("DEXOPT_IR_VERIFY_FAILURE");
    }
}

struct CodeVerifier<'a> {
    code: &'a IrCode,
    cfg: &'a VerifierConfig,
    report: VerificationReport,
    block_order: Vec<BlockId>,
    inserted: FxHashSet<BlockId>,
}

impl<'a> CodeVerifier<'a> {
    fn new(code: &'a IrCode, cfg: &'a VerifierConfig) -> Self {
        Self {
            code,
            cfg,
            report: VerificationReport::default(),
            block_order: Vec::new(),
            inserted: FxHashSet::default(),
        }
    }

    fn run(&mut self) {
        self.scan_layout();
        if self.block_order.is_empty() {
            return;
        }
        self.check_edges();
        self.check_catch_handlers();

        if self.cfg.should_check_instructions() {
            self.check_block_ends();
            self.check_throwing_insts();
            self.check_normal_exit();
        }
        if self.cfg.should_check_phis() {
            self.check_phis();
        }
        if self.cfg.should_check_users() {
            self.check_users();
        }
        if !self.cfg.allow_unreachable_blocks {
            self.check_reachability();
        }
    }

    fn emit(&mut self, diagnostic: Diagnostic) {
        self.report.push(diagnostic, self.cfg.max_diagnostics);
    }

    fn block_loc(&self, block: BlockId) -> Location {
        let number = self
            .code
            .dfg
            .blocks
            .get(block)
            .map(|data| data.number);
        Location::Block { block, number }
    }

    fn inst_loc(&self, block: BlockId, inst: InstId) -> Location {
        Location::Inst {
            block: Some(block),
            inst,
        }
    }

    fn value_loc(&self, value: ValueId) -> Location {
        let number = self.code.dfg.values.get(value).map(|data| data.number);
        Location::Value { value, number }
    }

    /// Collects the block order and checks numbering and instruction
    /// membership.
    fn scan_layout(&mut self) {
        let code = self.code;
        let Some(entry) = code.layout.entry_block() else {
            self.emit(Diagnostic::error(
                DiagnosticCode::MissingEntryBlock,
                "code has no entry block",
                Location::Code,
            ));
            return;
        };

        let mut numbers = FxHashMap::default();
        for block in code.layout.iter_block() {
            if !code.dfg.blocks.is_valid(block) {
                self.emit(Diagnostic::error(
                    DiagnosticCode::InvalidBlockRef,
                    "layout lists a block without data",
                    Location::Block {
                        block,
                        number: None,
                    },
                ));
                continue;
            }
            self.block_order.push(block);
            self.inserted.insert(block);

            let number = code.block(block).number;
            if let Some(first) = numbers.insert(number, block) {
                self.emit(
                    Diagnostic::error(
                        DiagnosticCode::DuplicateBlockNumber,
                        "block number is used twice",
                        self.block_loc(block),
                    )
                    .with_note(format!("also used by {first}")),
                );
            }

            for inst in code.layout.iter_inst(block) {
                if code.layout.inst_block(inst) != block {
                    self.emit(Diagnostic::error(
                        DiagnosticCode::InstBlockMismatch,
                        "instruction is listed in a block it does not belong to",
                        self.inst_loc(block, inst),
                    ));
                }
            }
        }

        if !code.block(entry).preds.is_empty() {
            self.emit(Diagnostic::error(
                DiagnosticCode::EntryHasPredecessors,
                "entry block has predecessors",
                self.block_loc(entry),
            ));
        }
    }

    /// Every successor edge must be mirrored by a predecessor edge and the
    /// other way around.
    fn check_edges(&mut self) {
        let code = self.code;
        for &block in &self.block_order.clone() {
            let data = code.block(block);
            let mut seen: SmallVec<[BlockId; 4]> = SmallVec::new();
            for &succ in &data.succs {
                if seen.contains(&succ) {
                    self.emit(
                        Diagnostic::error(
                            DiagnosticCode::DuplicateSuccessor,
                            "block lists a successor twice",
                            self.block_loc(block),
                        )
                        .with_note(format!("successor {succ}")),
                    );
                    continue;
                }
                seen.push(succ);
                if !self.inserted.contains(&succ) {
                    self.emit(
                        Diagnostic::error(
                            DiagnosticCode::BranchToNonInsertedBlock,
                            "successor is not in the layout",
                            self.block_loc(block),
                        )
                        .with_note(format!("successor {succ}")),
                    );
                    continue;
                }
                if !code.block(succ).preds.contains(&block) {
                    self.emit(
                        Diagnostic::error(
                            DiagnosticCode::EdgeMismatch,
                            "successor does not list the block as predecessor",
                            self.block_loc(block),
                        )
                        .with_note(format!("successor {}", self.block_loc(succ))),
                    );
                }
            }

            for &pred in &data.preds {
                if !self.inserted.contains(&pred) {
                    self.emit(
                        Diagnostic::error(
                            DiagnosticCode::BranchToNonInsertedBlock,
                            "predecessor is not in the layout",
                            self.block_loc(block),
                        )
                        .with_note(format!("predecessor {pred}")),
                    );
                    continue;
                }
                if !code.block(pred).succs.contains(&block) {
                    self.emit(
                        Diagnostic::error(
                            DiagnosticCode::EdgeMismatch,
                            "predecessor does not list the block as successor",
                            self.block_loc(block),
                        )
                        .with_note(format!("predecessor {}", self.block_loc(pred))),
                    );
                }
            }
        }
    }

    /// Handlers target the leading successors, and a catch-all guard can
    /// only come last.
    fn check_catch_handlers(&mut self) {
        let code = self.code;
        for &block in &self.block_order.clone() {
            let data = code.block(block);
            let handlers = &data.catch_handlers;
            if handlers.is_empty() {
                continue;
            }

            let succ_count = data.succs.len() as u32;
            if let Some(&target) = handlers.targets().iter().find(|&&t| t >= succ_count) {
                self.emit(
                    Diagnostic::error(
                        DiagnosticCode::CatchTargetOutOfRange,
                        "catch handler targets a missing successor index",
                        self.block_loc(block),
                    )
                    .with_note(format!("index {target}, {succ_count} successors")),
                );
                continue;
            }

            let unique = handlers.unique_targets();
            if unique.iter().enumerate().any(|(idx, &t)| t as usize != idx) {
                self.emit(Diagnostic::error(
                    DiagnosticCode::CatchSuccessorsNotFirst,
                    "catch successors must precede normal successors",
                    self.block_loc(block),
                ));
            }

            let guards = handlers.guards();
            if guards[..guards.len() - 1].iter().any(|g| g.is_catch_all()) {
                self.emit(Diagnostic::error(
                    DiagnosticCode::CatchAllNotLast,
                    "catch-all guard is followed by other guards",
                    self.block_loc(block),
                ));
            }
        }
    }

    fn check_block_ends(&mut self) {
        let code = self.code;
        for &block in &self.block_order.clone() {
            let insts: SmallVec<[InstId; 8]> = code.insts(block).collect();
            let Some((&last, rest)) = insts.split_last() else {
                self.emit(Diagnostic::error(
                    DiagnosticCode::EmptyBlock,
                    "block has no instructions",
                    self.block_loc(block),
                ));
                continue;
            };

            for &inst in rest {
                if code.dfg.inst_kind(inst).is_block_end() {
                    self.emit(Diagnostic::error(
                        DiagnosticCode::BlockEndNotLast,
                        "block ending instruction is followed by other instructions",
                        self.inst_loc(block, inst),
                    ));
                }
            }

            let kind = code.dfg.inst_kind(last);
            if !kind.is_block_end() {
                self.emit(
                    Diagnostic::error(
                        DiagnosticCode::MissingBlockEnd,
                        "block does not end with a jump, return or throw",
                        self.block_loc(block),
                    )
                    .with_note(format!("last instruction is {kind}")),
                );
                continue;
            }

            let data = code.block(block);
            let normal = data.succs.len() - data.catch_handlers.unique_targets().len();
            let fits = match kind {
                InstKind::Goto => normal == 1,
                InstKind::If(_) => normal == 2,
                InstKind::Switch { targets, .. } => {
                    normal >= 1 && targets.iter().all(|&t| (t as usize) < data.succs.len())
                }
                _ => normal == 0,
            };
            if !fits {
                self.emit(
                    Diagnostic::error(
                        DiagnosticCode::SuccessorCountMismatch,
                        "normal successor count does not fit the block end",
                        self.inst_loc(block, last),
                    )
                    .with_note(format!("{kind} with {normal} normal successors")),
                );
            }
        }
    }

    /// A block with catch handlers holds at most one throwing instruction.
    fn check_throwing_insts(&mut self) {
        let code = self.code;
        for &block in &self.block_order.clone() {
            if !code.block(block).has_catch_handlers() {
                continue;
            }
            let throwing = code
                .insts(block)
                .filter(|&inst| code.dfg.inst_kind(inst).can_throw())
                .count();
            if throwing > 1 {
                self.emit(
                    Diagnostic::error(
                        DiagnosticCode::MultipleThrowingInsts,
                        "block with catch handlers has several throwing instructions",
                        self.block_loc(block),
                    )
                    .with_note(format!("{throwing} throwing instructions")),
                );
            }
        }
    }

    fn check_normal_exit(&mut self) {
        let code = self.code;
        let Some(exit) = code.normal_exit() else {
            return;
        };
        if !self.inserted.contains(&exit) {
            self.emit(Diagnostic::error(
                DiagnosticCode::InvalidBlockRef,
                "normal exit is not in the layout",
                Location::Block {
                    block: exit,
                    number: None,
                },
            ));
            return;
        }
        let ends_in_return = code
            .block_exit(exit)
            .is_some_and(|inst| code.dfg.inst_kind(inst).is_return());
        if !ends_in_return {
            self.emit(Diagnostic::error(
                DiagnosticCode::NormalExitWithoutReturn,
                "normal exit does not end with a return",
                self.block_loc(exit),
            ));
        }
    }

    fn check_phis(&mut self) {
        let code = self.code;
        for &block in &self.block_order.clone() {
            let data = code.block(block);
            for &phi in &data.phis {
                let phi_data = code.dfg.values.get(phi).and_then(|value| value.phi());
                let Some(phi_data) = phi_data.filter(|p| p.block == block) else {
                    self.emit(Diagnostic::error(
                        DiagnosticCode::PhiNotListed,
                        "block lists a value that is not one of its phis",
                        self.value_loc(phi),
                    ));
                    continue;
                };
                if phi_data.operands.len() != data.preds.len() {
                    self.emit(
                        Diagnostic::error(
                            DiagnosticCode::PhiArgCountMismatchPreds,
                            "phi operand count does not match predecessor count",
                            self.value_loc(phi),
                        )
                        .with_note(format!(
                            "expected {}, found {}",
                            data.preds.len(),
                            phi_data.operands.len()
                        )),
                    );
                }
            }
        }
    }

    /// Returns `true` if `value` has a definition that is still in the code.
    fn is_defined(&self, value: ValueId) -> bool {
        let code = self.code;
        let Some(data) = code.dfg.values.get(value) else {
            return false;
        };
        match &data.kind {
            ValueKind::Inst(inst) => code.layout.is_inst_inserted(*inst),
            ValueKind::Phi(_) => code.dfg.is_live_phi(value),
            ValueKind::Undefined => false,
        }
    }

    /// Use lists and operand lists must agree in both directions for data,
    /// phi and debug uses.
    fn check_users(&mut self) {
        let code = self.code;
        let dfg = &code.dfg;

        for &block in &self.block_order.clone() {
            for &phi in &code.block(block).phis {
                if !dfg.is_live_phi(phi) {
                    continue;
                }
                for &operand in dfg.phi_operands(phi) {
                    if !self.is_defined(operand) {
                        self.emit(
                            Diagnostic::error(
                                DiagnosticCode::UndefinedValueUsed,
                                "phi reads a value without a live definition",
                                self.value_loc(phi),
                            )
                            .with_note(format!("operand {}", self.value_loc(operand))),
                        );
                    } else if !dfg.is_phi_user(operand, phi) {
                        self.emit(
                            Diagnostic::error(
                                DiagnosticCode::PhiUsersMismatch,
                                "phi is missing from the phi users of its operand",
                                self.value_loc(phi),
                            )
                            .with_note(format!("operand {}", self.value_loc(operand))),
                        );
                    }
                }
            }

            for inst in code.insts(block) {
                let data = dfg.inst(inst);
                for &arg in data.args() {
                    if !self.is_defined(arg) {
                        self.emit(
                            Diagnostic::error(
                                DiagnosticCode::UndefinedValueUsed,
                                "instruction reads a value without a live definition",
                                self.inst_loc(block, inst),
                            )
                            .with_note(format!("argument {}", self.value_loc(arg))),
                        );
                    } else if !dfg.is_user(arg, inst) {
                        self.emit(
                            Diagnostic::error(
                                DiagnosticCode::UsersSetMismatch,
                                "instruction is missing from the users of its argument",
                                self.inst_loc(block, inst),
                            )
                            .with_note(format!("argument {}", self.value_loc(arg))),
                        );
                    }
                }
                for value in data.debug_values() {
                    if !dfg.is_debug_user(value, inst) {
                        self.emit(
                            Diagnostic::error(
                                DiagnosticCode::DebugUsersMismatch,
                                "instruction is missing from the debug users of its value",
                                self.inst_loc(block, inst),
                            )
                            .with_note(format!("value {}", self.value_loc(value))),
                        );
                    }
                }
            }
        }

        let live: Vec<_> = dfg
            .values
            .keys()
            .filter(|&value| self.is_defined(value))
            .collect();
        for value in live {
            for user in dfg.users(value) {
                if !code.layout.is_inst_inserted(user) || !dfg.inst_args(user).contains(&value) {
                    self.emit(
                        Diagnostic::error(
                            DiagnosticCode::UsersSetMismatch,
                            "value lists a user that does not read it",
                            self.value_loc(value),
                        )
                        .with_note(format!("user {user}")),
                    );
                }
            }
            for user in dfg.phi_users(value) {
                if !dfg.is_live_phi(user) || !dfg.phi_operands(user).contains(&value) {
                    self.emit(
                        Diagnostic::error(
                            DiagnosticCode::PhiUsersMismatch,
                            "value lists a phi user that does not read it",
                            self.value_loc(value),
                        )
                        .with_note(format!("phi {}", self.value_loc(user))),
                    );
                }
            }
            for user in dfg.debug_users(value) {
                let reads = code.layout.is_inst_inserted(user)
                    && (dfg.inst(user).debug_values().any(|v| v == value)
                        || dfg
                            .inst_result(user)
                            .and_then(|out| dfg.value(out).previous_local_value)
                            == Some(value));
                if !reads {
                    self.emit(
                        Diagnostic::error(
                            DiagnosticCode::DebugUsersMismatch,
                            "value lists a debug user that does not read it",
                            self.value_loc(value),
                        )
                        .with_note(format!("user {user}")),
                    );
                }
            }
        }
    }

    fn check_reachability(&mut self) {
        let reachable: FxHashSet<_> = self
            .code
            .topologically_sorted_blocks()
            .into_iter()
            .collect();
        for &block in &self.block_order.clone() {
            if !reachable.contains(&block) {
                self.emit(Diagnostic::warning(
                    DiagnosticCode::UnreachableBlock,
                    "block is unreachable from the entry block",
                    self.block_loc(block),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use dexopt_ir::{
        inst::{BinopKind, IfCondition, NumericType},
        CatchGuard, CatchHandlers, DexItemFactory, MoveType,
    };

    use crate::VerificationLevel;

    const ADD: InstKind = InstKind::Binop {
        op: BinopKind::Add,
        ty: NumericType::Int,
    };

    fn full() -> VerifierConfig {
        VerifierConfig::for_level(VerificationLevel::Full)
    }

    fn new_code(factory: &DexItemFactory) -> IrCode {
        let holder = factory.create_type("LTest;");
        let proto = factory.create_proto(factory.void_type, &[factory.int_type]);
        IrCode::new(factory.create_method(holder, proto, "m"))
    }

    /// entry -> header <-> body, header -> exit, with a counter phi.
    fn loop_code(factory: &DexItemFactory) -> (IrCode, [BlockId; 4], ValueId) {
        let mut code = new_code(factory);
        let b0 = code.append_new_block();
        let b1 = code.append_new_block();
        let b2 = code.append_new_block();
        let b3 = code.append_new_block();

        let arg = code.append_inst(b0, InstKind::Argument, &[], Some(MoveType::Single));
        let arg = code.inst_result(arg).unwrap();
        code.append_inst(b0, InstKind::Goto, &[], None);
        code.link(b0, b1);

        let phi = code.create_phi(b1, MoveType::Single);
        code.append_inst(b1, InstKind::If(IfCondition::Eq), &[phi], None);
        code.link(b1, b2);
        code.link(b1, b3);

        let next = code.append_inst(b2, ADD, &[phi, arg], Some(MoveType::Single));
        let next = code.inst_result(next).unwrap();
        code.append_inst(b2, InstKind::Goto, &[], None);
        code.link(b2, b1);
        code.dfg.append_phi_operand(phi, arg);
        code.dfg.append_phi_operand(phi, next);

        code.append_inst(b3, InstKind::Return(None), &[], None);
        code.set_normal_exit(Some(b3));
        (code, [b0, b1, b2, b3], phi)
    }

    #[test]
    fn well_formed_loop() {
        let factory = DexItemFactory::new();
        let (code, ..) = loop_code(&factory);
        let report = verify_code(&code, &full());
        assert!(report.diagnostics.is_empty(), "{report}");
    }

    #[test]
    fn one_sided_edge() {
        let factory = DexItemFactory::new();
        let (mut code, [b0, _, _, b3], _) = loop_code(&factory);
        code.block_mut(b0).succs.push(b3);

        let report = verify_code(&code, &VerifierConfig::for_level(VerificationLevel::Fast));
        assert!(report.contains(DiagnosticCode::EdgeMismatch));
    }

    #[test]
    fn phi_arity() {
        let factory = DexItemFactory::new();
        let (mut code, [_, b1, ..], phi) = loop_code(&factory);
        code.dfg.remove_phi_operand(phi, 1);

        let report = verify_code(&code, &VerifierConfig::default());
        assert!(report.contains(DiagnosticCode::PhiArgCountMismatchPreds));
        assert_eq!(code.block(b1).phis.len(), 1);
    }

    #[test]
    fn normal_exit_must_return() {
        let factory = DexItemFactory::new();
        let (mut code, [_, _, b2, _], _) = loop_code(&factory);
        code.set_normal_exit(Some(b2));

        let report = verify_code(&code, &VerifierConfig::default());
        assert!(report.contains(DiagnosticCode::NormalExitWithoutReturn));
    }

    #[test]
    fn removed_user_is_reported() {
        let factory = DexItemFactory::new();
        let (mut code, [_, _, b2, _], _) = loop_code(&factory);
        let add = code.block_entry(b2).unwrap();
        code.layout.remove_inst(add);

        let report = verify_code(&code, &full());
        assert!(report.contains(DiagnosticCode::UsersSetMismatch));
        assert!(report.contains(DiagnosticCode::UndefinedValueUsed));
    }

    #[test]
    fn catch_handlers() {
        let factory = DexItemFactory::new();
        let mut code = new_code(&factory);
        let b0 = code.append_new_block();
        let handler = code.append_new_block();
        let next = code.append_new_block();

        let arg = code.append_inst(b0, InstKind::Argument, &[], Some(MoveType::Object));
        let arg = code.inst_result(arg).unwrap();
        let cast = InstKind::CheckCast(factory.object_type);
        code.append_inst(b0, cast.clone(), &[arg], Some(MoveType::Object));
        code.append_inst(b0, InstKind::Goto, &[], None);
        code.link(b0, handler);
        code.link(b0, next);
        code.block_mut(b0).catch_handlers = CatchHandlers::new(vec![CatchGuard::All], vec![0]);
        code.append_inst(handler, InstKind::Return(None), &[], None);
        code.append_inst(next, InstKind::Return(None), &[], None);

        let cfg = VerifierConfig::default();
        assert!(verify_code(&code, &cfg).is_ok());

        code.layout.remove_inst(code.block_exit(b0).unwrap());
        code.append_inst(b0, cast, &[arg], Some(MoveType::Object));
        code.append_inst(b0, InstKind::Goto, &[], None);
        assert!(verify_code(&code, &cfg).contains(DiagnosticCode::MultipleThrowingInsts));

        code.block_mut(b0).catch_handlers = CatchHandlers::new(vec![CatchGuard::All], vec![1]);
        assert!(verify_code(&code, &cfg).contains(DiagnosticCode::CatchSuccessorsNotFirst));
    }
}
