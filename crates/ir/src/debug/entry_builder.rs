use std::collections::BTreeMap;

use super::{DexDebugEntry, DexDebugEvent};
use crate::{
    class::DexEncodedMethod,
    factory::{DexItemFactory, DexString, DexType},
    value::{DebugLocal, LocalInterner},
};

/// The local of one register: the visible one and the one a restart brings
/// back.
#[derive(Debug, Default, Clone)]
struct LocalEntry {
    current: Option<DebugLocal>,
    last: Option<DebugLocal>,
}

impl LocalEntry {
    fn set(&mut self, local: DebugLocal) {
        self.current = Some(local.clone());
        self.last = Some(local);
    }

    fn unset(&mut self) {
        self.current = None;
    }

    fn reset(&mut self) {
        self.current = self.last.clone();
    }
}

#[derive(Debug, Clone)]
struct PendingEntry {
    address: u32,
    line: u32,
    source_file: Option<DexString>,
    prologue_end: bool,
    epilogue_begin: bool,
}

/// Reconstructs per position debug entries from an event stream.
///
/// The builder accepts any event order. Local changes that follow a position
/// event belong to that position; an entry is completed when the next
/// position event arrives or on [`Self::build`].
#[derive(Debug)]
pub struct DexDebugEntryBuilder {
    current_pc: u32,
    current_line: i64,
    current_file: Option<DexString>,
    prologue_end: bool,
    epilogue_begin: bool,
    locals: BTreeMap<u32, LocalEntry>,
    pending: Option<PendingEntry>,
    interner: LocalInterner,
    entries: Vec<DexDebugEntry>,
}

impl DexDebugEntryBuilder {
    pub fn new(start_line: u32) -> Self {
        Self {
            current_pc: 0,
            current_line: start_line.into(),
            current_file: None,
            prologue_end: false,
            epilogue_begin: false,
            locals: BTreeMap::new(),
            pending: None,
            interner: LocalInterner::new(),
            entries: Vec::new(),
        }
    }

    /// Replays the debug info of `method`.
    ///
    /// The receiver and the named parameters are live from the start. They
    /// occupy the last `ins_size` registers; wide parameters take two.
    /// Returns `None` if the method has no code or no debug info.
    pub fn for_method(method: &DexEncodedMethod, factory: &DexItemFactory) -> Option<Self> {
        let code = method.code.as_ref()?;
        let info = code.debug_info.as_ref()?;
        let mut builder = Self::new(info.start_line);

        let mut register = u32::from(code.registers_size) - u32::from(code.ins_size);
        let data = factory.method(method.method);
        if !method.access_flags.is_static() {
            builder.start_local(register, factory.this_name, data.holder, None);
            register += factory.move_type_of(data.holder).required_registers();
        }
        let parameters = factory.proto(data.proto).parameters;
        for (&ty, name) in parameters.iter().zip(&info.parameters) {
            if let Some(name) = *name {
                builder.start_local(register, name, ty, None);
            }
            register += factory.move_type_of(ty).required_registers();
        }

        for &event in &info.events {
            builder.apply(event);
        }
        Some(builder)
    }

    pub fn apply(&mut self, event: DexDebugEvent) {
        match event {
            DexDebugEvent::AdvancePc(delta) => self.advance_pc(delta),
            DexDebugEvent::AdvanceLine(delta) => self.advance_line(delta),
            DexDebugEvent::StartLocal { register, local } => {
                self.start_local(register, local.name, local.ty, local.signature)
            }
            DexDebugEvent::EndLocal(register) => self.end_local(register),
            DexDebugEvent::RestartLocal(register) => self.restart_local(register),
            DexDebugEvent::SetPrologueEnd => self.end_prologue(),
            DexDebugEvent::SetEpilogueBegin => self.begin_epilogue(),
            DexDebugEvent::SetFile(file) => self.set_file(file),
            DexDebugEvent::Default(_) => {
                let (pc_delta, line_delta) = event
                    .special_deltas()
                    .unwrap_or_else(|| unreachable!("special opcode without deltas"));
                self.set_position(pc_delta, line_delta);
            }
        }
    }

    pub fn set_file(&mut self, file: Option<DexString>) {
        self.current_file = file;
    }

    pub fn advance_pc(&mut self, delta: u32) {
        self.current_pc += delta;
    }

    pub fn advance_line(&mut self, delta: i32) {
        self.current_line += i64::from(delta);
    }

    pub fn end_prologue(&mut self) {
        self.prologue_end = true;
    }

    pub fn begin_epilogue(&mut self) {
        self.epilogue_begin = true;
    }

    pub fn start_local(
        &mut self,
        register: u32,
        name: DexString,
        ty: DexType,
        signature: Option<DexString>,
    ) {
        let local = self.interner.local(name, ty, signature);
        self.locals.entry(register).or_default().set(local);
    }

    pub fn end_local(&mut self, register: u32) {
        self.locals.entry(register).or_default().unset();
    }

    pub fn restart_local(&mut self, register: u32) {
        self.locals.entry(register).or_default().reset();
    }

    /// Completes the pending entry with the current locals and opens a new
    /// one at the advanced position.
    pub fn set_position(&mut self, pc_delta: u32, line_delta: i32) {
        if let Some(pending) = self.pending.take() {
            let locals = self.current_locals();
            self.entries.push(DexDebugEntry {
                address: pending.address,
                line: pending.line,
                source_file: pending.source_file,
                prologue_end: pending.prologue_end,
                epilogue_begin: pending.epilogue_begin,
                locals,
            });
        }
        self.current_pc += pc_delta;
        self.current_line += i64::from(line_delta);
        self.pending = Some(PendingEntry {
            address: self.current_pc,
            // Malformed streams can move below line 0.
            line: self.current_line.clamp(0, u32::MAX.into()) as u32,
            source_file: self.current_file,
            prologue_end: self.prologue_end,
            epilogue_begin: self.epilogue_begin,
        });
        self.prologue_end = false;
        self.epilogue_begin = false;
    }

    pub fn build(mut self) -> Vec<DexDebugEntry> {
        if self.pending.is_some() {
            self.set_position(0, 0);
        }
        self.entries
    }

    fn current_locals(&self) -> BTreeMap<u32, DebugLocal> {
        self.locals
            .iter()
            .filter_map(|(&register, entry)| Some((register, entry.current.clone()?)))
            .collect()
    }
}
