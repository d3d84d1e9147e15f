use std::collections::BTreeMap;

use super::{
    DexDebugEvent, DexDebugInfo, DBG_ADDRESS_RANGE, DBG_LINE_BASE, DBG_LINE_RANGE,
};
use crate::{
    code::IrCode,
    factory::{DexItemFactory, DexMethod, DexString},
    inst::{InstId, InstKind, LocalsChange},
    value::DebugLocal,
};

type Locals = BTreeMap<u32, DebugLocal>;

#[derive(Debug, Clone)]
struct PendingPosition {
    pc: u32,
    line: u32,
    file: Option<DexString>,
    locals: Option<Locals>,
}

impl PendingPosition {
    fn same_state(&self, other: &Self) -> bool {
        self.line == other.line && self.file == other.file && self.locals == other.locals
    }
}

/// Encodes positions and local changes into a debug event stream.
///
/// Locals are compared by identity: a register that gets back the local it
/// held last is restarted, any other local is started anew.
///
/// There are two ways to feed the builder. [`Self::set_position`] takes
/// observations in increasing pc order and only emits a position once a
/// later observation differs from it. [`Self::add`] walks the instructions of
/// an [`IrCode`] in pc order; there every position instruction is emitted.
#[derive(Debug)]
pub struct DexDebugEventBuilder {
    parameter_count: usize,
    /// Locals of the non-`this` arguments, in order.
    arguments: Option<Vec<Option<DebugLocal>>>,
    last_argument_register: Option<u32>,

    /// The local each register held last, for restarts.
    last_known_locals: Locals,
    /// Locals visible at the current instruction.
    pending_locals: Option<Locals>,
    /// Cleared once `pending_locals` is known to equal `emitted_locals`.
    pending_local_changes: bool,

    emitted_pc: Option<u32>,
    emitted_line: Option<u32>,
    emitted_file: Option<DexString>,
    emitted_locals: Option<Locals>,

    /// Pc of a move-exception that the next position is attributed to.
    last_move_exception_pc: Option<u32>,

    pending_position: Option<PendingPosition>,
    positions_have_locals: Option<bool>,

    events: Vec<DexDebugEvent>,
    start_line: Option<u32>,
}

impl DexDebugEventBuilder {
    pub fn new(parameter_count: usize) -> Self {
        Self {
            parameter_count,
            arguments: None,
            last_argument_register: None,
            last_known_locals: Locals::new(),
            pending_locals: None,
            pending_local_changes: false,
            emitted_pc: None,
            emitted_line: None,
            emitted_file: None,
            emitted_locals: None,
            last_move_exception_pc: None,
            pending_position: None,
            positions_have_locals: None,
            events: Vec::new(),
            start_line: None,
        }
    }

    pub fn for_method(method: DexMethod, factory: &DexItemFactory) -> Self {
        let proto = factory.method(method).proto;
        Self::new(factory.proto(proto).parameters.len())
    }

    /// Opens an argument local.
    ///
    /// Arguments must come in increasing register order. A local without a
    /// generic signature is live from the start of the method and needs no
    /// event; the decoder recreates it from the parameter names.
    pub fn start_argument(&mut self, register: u32, local: Option<DebugLocal>, is_this: bool) {
        if let Some(last) = self.last_argument_register {
            assert!(
                register > last,
                "argument register {register} follows register {last}"
            );
        }
        self.last_argument_register = Some(register);
        self.record_argument(local.clone(), is_this);
        if let Some(local) = local.filter(|local| local.signature.is_none()) {
            self.emitted_locals
                .get_or_insert_with(Locals::new)
                .insert(register, local.clone());
            self.last_known_locals.insert(register, local);
        }
    }

    /// Records the state at `pc`. Emission is deferred until a later
    /// position with a different line, file or set of locals shows up; a
    /// later position at the same pc replaces the pending one.
    ///
    /// # Panics
    /// Panics if `pc` goes backwards, or if locals are given for some
    /// positions but not for others.
    pub fn set_position(
        &mut self,
        pc: u32,
        line: u32,
        file: Option<DexString>,
        locals: Option<&Locals>,
    ) {
        let has_locals = locals.is_some();
        let expected = *self.positions_have_locals.get_or_insert(has_locals);
        assert_eq!(
            expected, has_locals,
            "locals must be given for every position or for none"
        );

        let next = PendingPosition {
            pc,
            line,
            file,
            locals: locals.cloned(),
        };
        self.pending_position = Some(match self.pending_position.take() {
            None => next,
            Some(pending) if pending.pc == pc => next,
            Some(pending) => {
                assert!(
                    pc > pending.pc,
                    "position at pc {pc} follows pc {}",
                    pending.pc
                );
                if pending.same_state(&next) {
                    pending
                } else {
                    self.flush_position(pending);
                    next
                }
            }
        });
    }

    /// Adds the events for `inst`, which is at `pc` in the output.
    pub fn add(&mut self, pc: u32, inst: InstId, code: &IrCode) {
        let block = code.inst_block(inst);
        if code.block_entry(block) == Some(inst) {
            self.update_block_entry(code.block(block).locals_at_entry.as_ref());
        }
        assert!(
            self.pending_locals.is_some(),
            "{inst} is added before the entry of {block}"
        );

        match &code.dfg.inst(inst).kind {
            InstKind::DebugPosition { line, file } => {
                self.emit_debug_position(pc, *line, *file);
            }
            InstKind::Argument => {
                let value = code
                    .inst_result(inst)
                    .unwrap_or_else(|| panic!("argument {inst} has no output"));
                let data = code.dfg.value(value);
                self.record_argument(data.local.clone(), data.is_this());
            }
            InstKind::DebugLocalsChange(change) => self.update_locals(change),
            _ if code.block_exit(block) == Some(inst) => {
                self.pending_locals = None;
                self.pending_local_changes = false;
            }
            InstKind::MoveException => self.last_move_exception_pc = Some(pc),
            _ => self.emit_local_changes(pc),
        }
    }

    /// Returns the debug info, or `None` if no position was ever emitted.
    pub fn build(mut self) -> Option<DexDebugInfo> {
        if let Some(pending) = self.pending_position.take() {
            self.flush_position(pending);
        }
        assert!(
            self.pending_locals.is_none(),
            "debug info is built in the middle of a block"
        );
        debug_assert!(!self.pending_local_changes);

        let start_line = self.start_line?;
        let mut parameters = vec![None; self.parameter_count];
        if let Some(arguments) = &self.arguments {
            assert_eq!(
                arguments.len(),
                self.parameter_count,
                "argument count differs from the prototype"
            );
            for (param, local) in parameters.iter_mut().zip(arguments) {
                *param = local
                    .as_ref()
                    .filter(|local| local.signature.is_none())
                    .map(|local| local.name);
            }
        }
        Some(DexDebugInfo::new(start_line, parameters, self.events))
    }

    fn record_argument(&mut self, local: Option<DebugLocal>, is_this: bool) {
        if !is_this {
            let parameter_count = self.parameter_count;
            self.arguments
                .get_or_insert_with(|| Vec::with_capacity(parameter_count))
                .push(local);
        }
    }

    fn flush_position(&mut self, pending: PendingPosition) {
        let has_locals = pending.locals.is_some();
        if let Some(locals) = pending.locals {
            self.emitted_locals.get_or_insert_with(Locals::new);
            self.pending_locals = Some(locals);
            self.pending_local_changes = true;
        }
        self.emit_debug_position(pending.pc, pending.line, pending.file);
        if has_locals {
            self.pending_locals = None;
        }
    }

    fn update_block_entry(&mut self, locals: Option<&Locals>) {
        assert!(
            self.pending_locals.is_none() && !self.pending_local_changes,
            "block entry while the previous block is still open"
        );
        match locals {
            Some(locals) => {
                self.pending_locals = Some(locals.clone());
                self.pending_local_changes = true;
            }
            None => self.pending_locals = Some(Locals::new()),
        }
        if self.emitted_locals.is_none() {
            self.initialize(locals);
        }
    }

    fn initialize(&mut self, locals: Option<&Locals>) {
        debug_assert!(self.start_line.is_none());
        // Arguments without a generic signature are live from the start.
        let open: Locals = locals
            .into_iter()
            .flatten()
            .filter(|(_, local)| local.signature.is_none())
            .map(|(&register, local)| (register, local.clone()))
            .collect();
        self.last_known_locals = open.clone();
        self.emitted_locals = Some(open);
    }

    fn update_locals(&mut self, change: &LocalsChange) {
        self.pending_local_changes = true;
        let pending = self.pending_locals.get_or_insert_with(Locals::new);
        for (register, local) in &change.ending {
            assert_eq!(
                pending.get(register),
                Some(local),
                "ending local in v{register} is not open"
            );
            pending.remove(register);
        }
        for (&register, local) in &change.starting {
            assert!(
                !pending.contains_key(&register),
                "starting local in v{register} which is still open"
            );
            pending.insert(register, local.clone());
        }
    }

    fn locals_changed(&mut self) -> bool {
        if !self.pending_local_changes {
            return false;
        }
        let empty = Locals::new();
        let emitted = self.emitted_locals.as_ref().unwrap_or(&empty);
        let pending = self.pending_locals.as_ref().unwrap_or(&empty);
        self.pending_local_changes = emitted != pending;
        self.pending_local_changes
    }

    fn emit_debug_position(&mut self, pc: u32, line: u32, file: Option<DexString>) {
        let emit_pc = self.last_move_exception_pc.take().unwrap_or(pc);
        assert_ne!(
            self.emitted_pc,
            Some(emit_pc),
            "two positions at pc {emit_pc}"
        );
        if self.start_line.is_none() {
            debug_assert!(self.emitted_line.is_none());
            self.start_line = Some(line);
            self.emitted_line = Some(line);
        }
        self.emit_advancement_events(emit_pc, Some(line), file);
        self.emitted_pc = Some(emit_pc);
        self.emitted_line = Some(line);
        self.emitted_file = file;
        if self.locals_changed() {
            self.emit_local_change_events();
        }
        self.pending_local_changes = false;
    }

    fn emit_local_changes(&mut self, pc: u32) {
        if self.locals_changed() {
            let emit_pc = self.last_move_exception_pc.take().unwrap_or(pc);
            self.emit_advancement_events(emit_pc, None, self.emitted_file);
            self.emitted_pc = Some(emit_pc);
            self.emit_local_change_events();
            self.pending_local_changes = false;
        }
    }

    fn emit_advancement_events(
        &mut self,
        next_pc: u32,
        next_line: Option<u32>,
        next_file: Option<DexString>,
    ) {
        let mut pc_delta = match self.emitted_pc {
            Some(previous) => {
                assert!(next_pc >= previous, "pc {next_pc} precedes pc {previous}");
                next_pc - previous
            }
            None => next_pc,
        };
        let mut line_delta = match (next_line, self.emitted_line) {
            (Some(next), Some(previous)) => (i64::from(next) - i64::from(previous)) as i32,
            _ => 0,
        };

        if next_file != self.emitted_file {
            self.events.push(DexDebugEvent::SetFile(next_file));
        }
        if line_delta < DBG_LINE_BASE || line_delta - DBG_LINE_BASE >= DBG_LINE_RANGE {
            self.events.push(DexDebugEvent::AdvanceLine(line_delta));
            line_delta = 0;
        }
        if pc_delta >= DBG_ADDRESS_RANGE {
            self.events.push(DexDebugEvent::AdvancePc(pc_delta));
            pc_delta = 0;
        }
        self.events.push(DexDebugEvent::special(line_delta, pc_delta));
    }

    fn emit_local_change_events(&mut self) {
        let Self {
            emitted_locals,
            pending_locals,
            last_known_locals,
            events,
            ..
        } = self;
        let previous = emitted_locals.get_or_insert_with(Locals::new);
        let empty = Locals::new();
        let next = pending_locals.as_ref().unwrap_or(&empty);

        let ending: Locals = previous
            .iter()
            .filter(|&(register, local)| next.get(register) != Some(local))
            .map(|(&register, local)| (register, local.clone()))
            .collect();
        let starting: Locals = next
            .iter()
            .filter(|&(register, local)| previous.get(register) != Some(local))
            .map(|(&register, local)| (register, local.clone()))
            .collect();
        debug_assert!(!ending.is_empty() || !starting.is_empty());

        for &register in ending.keys() {
            if !starting.contains_key(&register) {
                previous.remove(&register);
                events.push(DexDebugEvent::EndLocal(register));
            }
        }
        for (register, local) in starting {
            previous.insert(register, local.clone());
            if last_known_locals.get(&register) == Some(&local) {
                events.push(DexDebugEvent::RestartLocal(register));
            } else {
                events.push(DexDebugEvent::StartLocal {
                    register,
                    local: *local.info(),
                });
                last_known_locals.insert(register, local);
            }
        }
    }
}
