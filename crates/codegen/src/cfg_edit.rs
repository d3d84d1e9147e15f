//! Structural edits of the control flow graph: block splitting, call site
//! inlining and redistribution of catch handlers.
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use dexopt_ir::{
    cursor::{CursorLocation, InstCursor},
    BlockId, CatchHandlers, DexType, InstId, InstKind, IrCode, MoveType,
};

/// Splits the block of `cursor` right after the current instruction.
///
/// The instructions after the cut move to a new block placed after the
/// original one in the layout, and the original block jumps to it. If the
/// instruction before the cut can throw, the catch handlers stay with it and
/// only the normal successors move. Otherwise every successor moves.
///
/// The cursor ends up at the top of the new block, which is returned.
pub fn split_block(code: &mut IrCode, cursor: &mut InstCursor) -> BlockId {
    let block = cursor.expect_block(code);
    let (first_moved, keep_handlers) = match cursor.loc() {
        CursorLocation::At(inst) => (
            code.layout.next_inst_of(inst),
            code.dfg.inst_kind(inst).can_throw(),
        ),
        CursorLocation::BlockTop(block) => (code.layout.first_inst_of(block), false),
        CursorLocation::BlockBottom(_) | CursorLocation::NoWhere => (None, false),
    };
    let first_moved =
        first_moved.unwrap_or_else(|| panic!("cannot split {block} after its last instruction"));

    let new_block = code.make_block();
    code.layout.insert_block_after(new_block, block);
    code.layout.move_insts_from(first_moved, new_block);

    let data = code.block_mut(block);
    let succs = std::mem::take(&mut data.succs);
    let handlers = std::mem::take(&mut data.catch_handlers);
    let filled = data.filled;
    let (kept, kept_handlers, moved, moved_handlers) = if keep_handlers {
        let (catch, handlers, normal) = partition_successors(&succs, handlers);
        (catch, handlers, normal, CatchHandlers::default())
    } else {
        (SmallVec::new(), CatchHandlers::default(), succs, handlers)
    };

    for &succ in &moved {
        code.replace_pred(succ, block, new_block);
    }
    let data = code.block_mut(block);
    data.succs = kept;
    data.catch_handlers = kept_handlers;
    data.filled = true;
    let new_data = code.block_mut(new_block);
    new_data.succs = moved;
    new_data.catch_handlers = moved_handlers;
    new_data.filled = filled;
    new_data.sealed = true;

    code.append_inst(block, InstKind::Goto, &[], None);
    code.link(block, new_block);
    if code.normal_exit() == Some(block) {
        code.set_normal_exit(Some(new_block));
    }

    cursor.set_location(CursorLocation::BlockTop(new_block));
    tracing::trace!(%block, %new_block, keep_handlers, "split block");
    new_block
}

/// Splits at the cursor, then again after `n` more instructions, isolating
/// those instructions in a block of their own. Returns that block.
pub fn split_n(code: &mut IrCode, cursor: &mut InstCursor, n: usize) -> BlockId {
    let new_block = split_block(code, cursor);
    for _ in 0..n {
        cursor.next(code);
    }
    split_block(code, cursor);
    new_block
}

/// Separates the catch successors of a block from its normal successors.
/// Handler targets are rewritten for the catch-only successor list.
fn partition_successors(
    succs: &[BlockId],
    mut handlers: CatchHandlers,
) -> (SmallVec<[BlockId; 2]>, CatchHandlers, SmallVec<[BlockId; 2]>) {
    let unique = handlers.unique_targets();
    let catch = unique.iter().map(|&idx| succs[idx as usize]).collect();
    let normal = succs
        .iter()
        .enumerate()
        .filter(|(idx, _)| unique.binary_search(&(*idx as u32)).is_err())
        .map(|(_, &succ)| succ)
        .collect();
    handlers.remap_targets(|target| unique.partition_point(|&idx| idx < target) as u32);
    (catch, handlers, normal)
}

/// Replaces the inlined call `invoke` by the body of `inlinee`.
///
/// The arguments of the inlinee are substituted by the call arguments. With
/// `downcast`, the receiver is first cast to that type. Returns the block
/// that continues after the inlined body, or `None` if the inlinee never
/// returns normally and the code after the call was dropped.
pub fn inline_invoke(
    code: &mut IrCode,
    invoke: InstId,
    inlinee: IrCode,
    downcast: Option<DexType>,
) -> Option<BlockId> {
    assert!(
        code.dfg.inst_kind(invoke).is_invoke(),
        "{invoke} is not an invoke"
    );
    let inlinee_can_throw = inlinee
        .blocks()
        .any(|block| inlinee.block_can_throw(block));

    let mut cursor = match code.layout.prev_inst_of(invoke) {
        Some(prev) => InstCursor::at_inst(prev),
        None => InstCursor::at_block_top(code.inst_block(invoke)),
    };
    let invoke_block = split_n(code, &mut cursor, 1);
    let invoke_pred = code.block(invoke_block).preds[0];

    let absorbed = code.absorb(inlinee, invoke_block);
    let entry = absorbed.entry;
    let mut exit = absorbed.normal_exit;
    let mut blocks = absorbed.blocks;
    assert!(
        code.block(entry).preds.is_empty(),
        "entry {entry} of the inlinee has predecessors"
    );

    let arguments: Vec<InstId> = code
        .insts(entry)
        .take_while(|&inst| code.dfg.inst_kind(inst).is_argument())
        .collect();
    let actuals = code.dfg.inst_args(invoke).to_vec();
    assert_eq!(
        arguments.len(),
        actuals.len(),
        "inlinee arguments do not match the inputs of {invoke}"
    );
    let mut cast = None;
    for (idx, (&argument, &actual)) in arguments.iter().zip(&actuals).enumerate() {
        let formal = code
            .inst_result(argument)
            .unwrap_or_else(|| panic!("{argument} defines no value"));
        match downcast {
            Some(ty) if idx == 0 => {
                let inst = code.make_inst(InstKind::CheckCast(ty), &[actual], Some(MoveType::Object));
                let casted = code
                    .inst_result(inst)
                    .unwrap_or_else(|| panic!("{inst} defines no value"));
                code.dfg.replace_users(formal, casted);
                cast = Some(inst);
            }
            _ => code.dfg.replace_users(formal, actual),
        }
    }
    for argument in arguments {
        code.remove_inst(argument);
    }

    if let Some(cast) = cast {
        // The cast gets a block of its own in front of the inlined entry.
        let mut top = InstCursor::at_block_top(entry);
        let body = split_block(code, &mut top);
        code.layout.prepend_inst(cast, entry);
        if exit == Some(entry) {
            exit = Some(body);
        }
        blocks.insert(1, body);
    }

    let Some(exit) = exit else {
        assert!(
            inlinee_can_throw,
            "inlinee without a normal exit cannot throw"
        );
        assert!(
            !code.block(invoke_block).has_catch_handlers(),
            "an inlinee that always throws cannot be placed in {invoke_block}, which has handlers"
        );
        replace_successor(code, invoke_pred, invoke_block, entry);
        let removed = unlink(code, invoke_block);
        tracing::trace!(%invoke, removed = removed.len(), "inlinee never returns normally");
        return None;
    };

    let ret = code
        .block_exit(exit)
        .filter(|&inst| code.dfg.inst_kind(inst).is_return())
        .unwrap_or_else(|| panic!("normal exit {exit} of the inlinee does not end in a return"));
    if let Some(out) = code.inst_result(invoke) {
        let value = code
            .dfg
            .inst_args(ret)
            .first()
            .copied()
            .unwrap_or_else(|| panic!("{invoke} has an output but the inlinee returns void"));
        code.dfg.replace_users(out, value);
    }
    code.remove_inst(ret);
    code.append_inst(exit, InstKind::Goto, &[], None);
    code.remove_inst(invoke);

    replace_successor(code, invoke_pred, invoke_block, entry);
    code.link(exit, invoke_block);

    // The call block keeps its handlers, so they stay reachable even when no
    // inlined instruction can throw.
    if code.block(invoke_block).has_catch_handlers() {
        append_catch_handlers(code, invoke_block, &blocks);
    }

    Some(invoke_block)
}

/// Redirects the edge `block -> old` to `block -> new`, keeping the position
/// of the edge in the successor list of `block`.
fn replace_successor(code: &mut IrCode, block: BlockId, old: BlockId, new: BlockId) {
    let data = code.block_mut(block);
    let idx = data
        .succ_index(old)
        .unwrap_or_else(|| panic!("{old} is not a successor of {block}"));
    data.succs[idx] = new;
    code.block_mut(new).preds.push(block);
    code.block_mut(old).preds.retain(|&mut pred| pred != block);
}

/// Makes every throwing instruction of `blocks` covered by the handlers of
/// `from`.
pub fn append_catch_handlers(code: &mut IrCode, from: BlockId, blocks: &[BlockId]) {
    for &block in blocks {
        if code.block(block).has_catch_handlers() {
            copy_catch_handlers(code, block, from);
        } else {
            split_block_and_copy_catch_handlers(code, from, block);
        }
    }
}

/// Splits `block` so that each piece holds at most one throwing instruction,
/// and gives the pieces with a throwing instruction the handlers of `from`.
pub fn split_block_and_copy_catch_handlers(code: &mut IrCode, from: BlockId, block: BlockId) {
    assert!(
        !code.block(block).has_catch_handlers(),
        "{block} already has catch handlers"
    );
    let mut current = block;
    let mut cursor = InstCursor::at_block_top(block);
    while let Some(inst) = cursor.next(code) {
        if !code.dfg.inst_kind(inst).can_throw() {
            continue;
        }
        let more_throwing = code
            .layout
            .iter_inst_from(inst)
            .skip(1)
            .any(|next| code.dfg.inst_kind(next).can_throw());
        let next = more_throwing.then(|| split_block(code, &mut cursor));
        copy_catch_handlers(code, current, from);
        match next {
            Some(next) => current = next,
            None => break,
        }
    }
}

/// Appends the handlers of `from` to those of `block`.
///
/// Guards `block` already handles are skipped and nothing is added after a
/// catch-all. A handler that becomes a new successor of `block` receives, for
/// each of its phis, the operand flowing in from `from`.
pub fn copy_catch_handlers(code: &mut IrCode, block: BlockId, from: BlockId) {
    let from_data = code.block(from);
    let handlers: Vec<_> = from_data
        .catch_handlers
        .iter()
        .map(|(guard, target)| (guard, from_data.succs[target as usize]))
        .collect();

    for (guard, handler) in handlers {
        let data = code.block(block);
        if data.catch_handlers.has_catch_all() {
            break;
        }
        if data.catch_handlers.contains_guard(guard) {
            continue;
        }
        let target = match data.succ_index(handler) {
            Some(idx) => {
                assert!(
                    data.is_catch_successor_index(idx),
                    "{handler} is a normal successor of {block}"
                );
                idx
            }
            None => add_catch_successor(code, block, handler, from),
        };
        code.block_mut(block)
            .catch_handlers
            .push(guard, target as u32);
    }
}

fn add_catch_successor(code: &mut IrCode, block: BlockId, handler: BlockId, from: BlockId) -> usize {
    let data = code.block_mut(block);
    let position = data.catch_handlers.unique_targets().len();
    data.succs.insert(position, handler);
    data.catch_handlers.remap_targets(|target| {
        if target as usize >= position {
            target + 1
        } else {
            target
        }
    });

    let from_idx = code
        .block(handler)
        .pred_index(from)
        .unwrap_or_else(|| panic!("{from} is not a predecessor of {handler}"));
    code.block_mut(handler).preds.push(block);
    let phis = code.block(handler).phis.clone();
    for phi in phis {
        let operand = code.dfg.phi_operands(phi)[from_idx];
        code.dfg.append_phi_operand(phi, operand);
    }
    position
}

/// Detaches `block` from its predecessors and removes it together with every
/// block that is no longer reachable from the entry. Returns the removed
/// blocks.
pub fn unlink(code: &mut IrCode, block: BlockId) -> Vec<BlockId> {
    let preds = code.block(block).preds.clone();
    for pred in preds {
        code.unlink(pred, block);
    }

    let reachable: FxHashSet<BlockId> = code.topologically_sorted_blocks().into_iter().collect();
    let removed: Vec<BlockId> = code
        .blocks()
        .filter(|block| !reachable.contains(block))
        .collect();
    for &dead in &removed {
        let succs = code.block(dead).succs.clone();
        for succ in succs {
            if reachable.contains(&succ) {
                code.unlink(dead, succ);
            }
        }
    }
    for &dead in &removed {
        let data = code.block_mut(dead);
        data.preds.clear();
        data.succs.clear();
        data.catch_handlers.clear();
    }
    code.remove_blocks(&removed);
    removed
}
