//! Source positions and local variable liveness.
//!
//! [`DexDebugEntryBuilder`] replays an encoded event stream into one
//! [`DexDebugEntry`] per position, and [`DexDebugEventBuilder`] goes the other
//! way.
mod entry_builder;
mod event;
mod event_builder;

use std::{collections::BTreeMap, fmt};

pub use entry_builder::DexDebugEntryBuilder;
pub use event::*;
pub use event_builder::DexDebugEventBuilder;

use crate::{
    error::CompilationResult,
    factory::{DexString, DexType},
    leb128::{write_uleb128, write_uleb128p1, ByteReader},
    offset::ObjectToOffsetMapping,
    value::DebugLocal,
};

/// The debug info item of a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DexDebugInfo {
    pub start_line: u32,
    /// Parameter names without `this`. `None` for parameters whose local is
    /// introduced by the event stream.
    pub parameters: Vec<Option<DexString>>,
    pub events: Vec<DexDebugEvent>,
}

impl DexDebugInfo {
    pub fn new(
        start_line: u32,
        parameters: Vec<Option<DexString>>,
        events: Vec<DexDebugEvent>,
    ) -> Self {
        Self {
            start_line,
            parameters,
            events,
        }
    }

    pub fn write(&self, mapping: &ObjectToOffsetMapping, out: &mut Vec<u8>) {
        write_uleb128(out, self.start_line);
        write_uleb128(out, self.parameters.len() as u32);
        for name in &self.parameters {
            write_uleb128p1(out, name.map(|name| mapping.offset_for(name)));
        }
        for event in &self.events {
            event.write(mapping, out);
        }
        out.push(DBG_END_SEQUENCE);
    }

    pub fn read(
        bytes: &[u8],
        strings: &dyn Fn(u32) -> Option<DexString>,
        types: &dyn Fn(u32) -> Option<DexType>,
    ) -> CompilationResult<Self> {
        let mut reader = ByteReader::new(bytes);
        let start_line = reader.read_uleb128()?;
        let count = reader.read_uleb128()?;
        let mut parameters = Vec::with_capacity(count.min(256) as usize);
        for _ in 0..count {
            let name = match reader.read_uleb128p1()? {
                None => None,
                Some(idx) => Some(strings(idx).ok_or_else(|| {
                    crate::CompilationError::MalformedDebugInfo(format!(
                        "parameter name index {idx} out of range"
                    ))
                })?),
            };
            parameters.push(name);
        }
        let events = DexDebugEvent::decode_stream(&mut reader, strings, types)?;
        Ok(Self::new(start_line, parameters, events))
    }
}

/// Debug state at one pc.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DexDebugEntry {
    pub address: u32,
    pub line: u32,
    pub source_file: Option<DexString>,
    pub prologue_end: bool,
    pub epilogue_begin: bool,
    pub locals: BTreeMap<u32, DebugLocal>,
}

impl fmt::Display for DexDebugEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pc {:#x}", self.address)?;
        if let Some(file) = self.source_file {
            write!(f, ", file {file}")?;
        }
        write!(f, ", line {}", self.line)?;
        if self.prologue_end {
            f.write_str(", prologue_end = true")?;
        }
        if self.epilogue_begin {
            f.write_str(", epilogue_begin = true")?;
        }
        if !self.locals.is_empty() {
            f.write_str(", locals: [")?;
            for (idx, (register, local)) in self.locals.iter().enumerate() {
                if idx > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{register} -> {}", local.name)?;
            }
            f.write_str("]")?;
        }
        Ok(())
    }
}
