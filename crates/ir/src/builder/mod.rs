mod ssa;

use std::collections::BTreeMap;

use crate::{
    block::{BlockId, CatchGuard, CatchHandlers},
    code::IrCode,
    error::CompilationResult,
    factory::DexMethod,
    inst::{InstId, InstKind},
    value::{DebugLocal, LocalInterner, MoveType, ValueId},
};
use ssa::SsaBuilder;

/// Builds the SSA form of a method body from register level operations.
///
/// Registers are the variables of the SSA construction: reads look up the
/// reaching definition and insert phis where control flow merges. A block
/// must be sealed once all of its predecessors are linked.
#[derive(Debug)]
pub struct IrBuilder {
    code: IrCode,
    ssa: SsaBuilder,
    current: Option<BlockId>,
    locals: LocalInterner,
}

impl IrBuilder {
    pub fn new(method: DexMethod) -> Self {
        Self {
            code: IrCode::new(method),
            ssa: SsaBuilder::new(),
            current: None,
            locals: LocalInterner::new(),
        }
    }

    pub fn code(&self) -> &IrCode {
        &self.code
    }

    pub fn locals(&mut self) -> &mut LocalInterner {
        &mut self.locals
    }

    /// Creates a block at the end of the layout.
    pub fn append_block(&mut self) -> BlockId {
        self.code.append_new_block()
    }

    pub fn switch_to_block(&mut self, block: BlockId) {
        self.current = Some(block);
    }

    pub fn current_block(&self) -> BlockId {
        self.current.expect("no current block")
    }

    /// Adds the normal edge `pred -> succ`.
    pub fn link(&mut self, pred: BlockId, succ: BlockId) {
        assert!(
            !self.code.block(succ).sealed,
            "cannot add predecessor {pred} to sealed {succ}"
        );
        self.code.link(pred, succ);
    }

    /// Installs the handlers of `block`. Must be called before any normal
    /// successor is linked, so that the handlers form a prefix of the
    /// successor list.
    pub fn set_catch_handlers(&mut self, block: BlockId, handlers: &[(CatchGuard, BlockId)]) {
        assert!(
            self.code.block(block).succs.is_empty(),
            "catch handlers of {block} must be linked before its normal successors"
        );
        let mut guards = Vec::with_capacity(handlers.len());
        let mut targets = Vec::with_capacity(handlers.len());
        for (idx, &(guard, handler)) in handlers.iter().enumerate() {
            assert!(
                !guard.is_catch_all() || idx + 1 == handlers.len(),
                "catch-all guard of {block} must come last"
            );
            let target = match self.code.block(block).succ_index(handler) {
                Some(target) => target,
                None => {
                    self.link(block, handler);
                    self.code.block(block).succs.len() - 1
                }
            };
            guards.push(guard);
            targets.push(target as u32);
        }
        self.code.block_mut(block).catch_handlers = CatchHandlers::new(guards, targets);
    }

    pub fn seal_block(&mut self, block: BlockId) -> CompilationResult<()> {
        self.ssa.seal_block(&mut self.code, block)
    }

    pub fn seal_all(&mut self) -> CompilationResult<()> {
        let blocks: Vec<_> = self.code.blocks().collect();
        for block in blocks {
            self.seal_block(block)?;
        }
        Ok(())
    }

    pub fn is_sealed(&self, block: BlockId) -> bool {
        self.code.block(block).sealed
    }

    pub fn write_register(&mut self, reg: u32, value: ValueId) {
        let block = self.current_block();
        self.ssa.write_register(block, reg, value);
    }

    /// Returns the value reaching `reg` at the current position.
    ///
    /// Fails with [`crate::CompilationError::UndefinedValue`] if some path
    /// from the entry does not define the register.
    pub fn read_register(&mut self, reg: u32, ty: MoveType) -> CompilationResult<ValueId> {
        let block = self.current_block();
        self.ssa.read_register(&mut self.code, block, reg, ty)
    }

    /// Appends an `Argument` instruction defining `reg`.
    pub fn add_argument(
        &mut self,
        reg: u32,
        ty: MoveType,
        local: Option<DebugLocal>,
        is_this: bool,
    ) -> ValueId {
        let inst = self.add_inst(InstKind::Argument, &[], Some(ty));
        let value = self.code.inst_result(inst).expect("argument has an output");
        let data = self.code.dfg.value_mut(value);
        if is_this {
            data.mark_as_this();
        } else {
            data.mark_as_argument();
        }
        data.local = local;
        self.write_register(reg, value);
        value
    }

    /// Appends an instruction to the current block.
    pub fn add_inst(&mut self, kind: InstKind, args: &[ValueId], out: Option<MoveType>) -> InstId {
        let block = self.current_block();
        debug_assert!(
            !self.code.block(block).filled,
            "{block} already ends in a jump or exit"
        );
        let is_block_end = kind.is_block_end();
        let inst = self.code.append_inst(block, kind, args, out);
        if is_block_end {
            self.code.block_mut(block).filled = true;
        }
        inst
    }

    /// Appends an instruction whose output is written to `dest`.
    pub fn add_inst_to(
        &mut self,
        kind: InstKind,
        args: &[ValueId],
        dest: u32,
        ty: MoveType,
    ) -> ValueId {
        let inst = self.add_inst(kind, args, Some(ty));
        let value = self.code.inst_result(inst).expect("output was requested");
        self.write_register(dest, value);
        value
    }

    /// Records the locals live on entry of `block`.
    pub fn set_locals_at_entry(&mut self, block: BlockId, locals: BTreeMap<u32, DebugLocal>) {
        self.code.block_mut(block).locals_at_entry = Some(locals);
    }

    pub fn set_normal_exit(&mut self, block: BlockId) {
        self.code.set_normal_exit(Some(block));
    }

    /// Seals every remaining block and returns the finished code.
    pub fn build(mut self) -> CompilationResult<IrCode> {
        self.seal_all()?;
        Ok(self.code)
    }
}

pub mod test_util {
    use super::*;
    use crate::{factory::DexItemFactory, ir_writer::IrWriter};

    /// Creates a builder for `LTest;->name` with the given parameter types.
    pub fn test_builder(factory: &DexItemFactory, name: &str, params: &[&str]) -> IrBuilder {
        let holder = factory.create_type("LTest;");
        let params: Vec<_> = params.iter().map(|p| factory.create_type(p)).collect();
        let proto = factory.create_proto(factory.void_type, &params);
        IrBuilder::new(factory.create_method(holder, proto, name))
    }

    pub fn dump_code(code: &IrCode) -> String {
        IrWriter::new(code).dump_string().unwrap()
    }
}
