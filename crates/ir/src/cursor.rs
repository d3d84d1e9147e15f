use crate::{
    block::BlockId,
    code::IrCode,
    factory::DexString,
    inst::{InstId, InstKind},
};

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorLocation {
    At(InstId),
    BlockTop(BlockId),
    BlockBottom(BlockId),
    #[default]
    NoWhere,
}

/// A position inside the instruction list of a block.
///
/// Insertion happens right after the current instruction (or at the top of an
/// empty position) and moves the cursor onto the inserted instruction, so a
/// series of inserts keeps its order.
#[derive(Debug, Default, Clone)]
pub struct InstCursor {
    loc: CursorLocation,
    pending_position: Option<(u32, Option<DexString>)>,
}

impl InstCursor {
    pub fn at_location(loc: CursorLocation) -> Self {
        Self {
            loc,
            pending_position: None,
        }
    }

    pub fn at_block_top(block: BlockId) -> Self {
        Self::at_location(CursorLocation::BlockTop(block))
    }

    pub fn at_inst(inst: InstId) -> Self {
        Self::at_location(CursorLocation::At(inst))
    }

    pub fn loc(&self) -> CursorLocation {
        self.loc
    }

    pub fn set_location(&mut self, loc: CursorLocation) {
        self.loc = loc;
    }

    pub fn inst(&self) -> Option<InstId> {
        match self.loc {
            CursorLocation::At(inst) => Some(inst),
            _ => None,
        }
    }

    pub fn expect_inst(&self) -> InstId {
        self.inst()
            .expect("current cursor location doesn't point to inst")
    }

    pub fn block(&self, code: &IrCode) -> Option<BlockId> {
        match self.loc {
            CursorLocation::At(inst) => Some(code.layout.inst_block(inst)),
            CursorLocation::BlockTop(block) | CursorLocation::BlockBottom(block) => Some(block),
            CursorLocation::NoWhere => None,
        }
    }

    pub fn expect_block(&self, code: &IrCode) -> BlockId {
        self.block(code).expect("cursor loc points to `NoWhere`")
    }

    /// Moves to the next instruction of the block and returns it. At the end
    /// of the block the cursor stays at the bottom and `None` is returned.
    pub fn next(&mut self, code: &IrCode) -> Option<InstId> {
        let next = match self.loc {
            CursorLocation::At(inst) => code.layout.next_inst_of(inst),
            CursorLocation::BlockTop(block) => code.layout.first_inst_of(block),
            CursorLocation::BlockBottom(_) | CursorLocation::NoWhere => None,
        };
        match next {
            Some(inst) => self.loc = CursorLocation::At(inst),
            None => {
                if let Some(block) = self.block(code) {
                    self.loc = CursorLocation::BlockBottom(block);
                }
            }
        }
        next
    }

    /// Moves to the previous instruction of the block and returns it. At the
    /// start of the block the cursor stays at the top and `None` is returned.
    pub fn prev(&mut self, code: &IrCode) -> Option<InstId> {
        let prev = match self.loc {
            CursorLocation::At(inst) => code.layout.prev_inst_of(inst),
            CursorLocation::BlockBottom(block) => code.layout.last_inst_of(block),
            CursorLocation::BlockTop(_) | CursorLocation::NoWhere => None,
        };
        match prev {
            Some(inst) => self.loc = CursorLocation::At(inst),
            None => {
                if let Some(block) = self.block(code) {
                    self.loc = CursorLocation::BlockTop(block);
                }
            }
        }
        prev
    }

    /// Requests a position marker in front of the next inserted instruction.
    pub fn set_position(&mut self, line: u32, file: Option<DexString>) {
        self.pending_position = Some((line, file));
    }

    /// Inserts an instruction that is not yet in the layout.
    pub fn insert(&mut self, code: &mut IrCode, inst: InstId) {
        if let Some((line, file)) = self.pending_position.take() {
            let position = code.make_inst(InstKind::DebugPosition { line, file }, &[], None);
            self.insert_raw(code, position);
        }
        self.insert_raw(code, inst);
    }

    fn insert_raw(&mut self, code: &mut IrCode, inst: InstId) {
        match self.loc {
            CursorLocation::At(at) => code.layout.insert_inst_after(inst, at),
            CursorLocation::BlockTop(block) => code.layout.prepend_inst(inst, block),
            CursorLocation::BlockBottom(block) => code.layout.append_inst(inst, block),
            CursorLocation::NoWhere => panic!("cursor loc points to `NoWhere`"),
        }
        self.loc = CursorLocation::At(inst);
    }

    /// Removes the current instruction and moves to the one before it.
    ///
    /// # Panics
    /// Panics if the output of the instruction still has users.
    pub fn remove(&mut self, code: &mut IrCode) {
        let inst = self.expect_inst();
        let block = code.layout.inst_block(inst);
        self.loc = code
            .layout
            .prev_inst_of(inst)
            .map_or(CursorLocation::BlockTop(block), CursorLocation::At);
        code.remove_inst(inst);
    }

    /// Replaces the current instruction by `new`, which must not be inserted
    /// yet. Users of the old output are moved to the new output.
    pub fn replace_current(&mut self, code: &mut IrCode, new: InstId) {
        let old = self.expect_inst();
        match (code.inst_result(old), code.inst_result(new)) {
            (Some(old_out), Some(new_out)) => code.dfg.replace_users(old_out, new_out),
            (Some(old_out), None) => assert!(
                !code.dfg.is_used(old_out),
                "replacement of {old} drops a used output"
            ),
            _ => {}
        }
        code.layout.insert_inst_before(new, old);
        code.remove_inst(old);
        self.loc = CursorLocation::At(new);
    }
}
