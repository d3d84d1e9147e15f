use std::fmt;

use crate::{
    error::{CompilationError, CompilationResult},
    factory::{DexString, DexType},
    leb128::{write_sleb128, write_uleb128, write_uleb128p1, ByteReader},
    offset::ObjectToOffsetMapping,
    value::DebugLocalInfo,
};

pub const DBG_END_SEQUENCE: u8 = 0x00;
pub const DBG_ADVANCE_PC: u8 = 0x01;
pub const DBG_ADVANCE_LINE: u8 = 0x02;
pub const DBG_START_LOCAL: u8 = 0x03;
pub const DBG_START_LOCAL_EXTENDED: u8 = 0x04;
pub const DBG_END_LOCAL: u8 = 0x05;
pub const DBG_RESTART_LOCAL: u8 = 0x06;
pub const DBG_SET_PROLOGUE_END: u8 = 0x07;
pub const DBG_SET_EPILOGUE_BEGIN: u8 = 0x08;
pub const DBG_SET_FILE: u8 = 0x09;

pub const DBG_FIRST_SPECIAL: u8 = 0x0a;
pub const DBG_LINE_BASE: i32 = -4;
pub const DBG_LINE_RANGE: i32 = 15;
/// Smallest pc delta that needs an explicit `AdvancePc`.
pub const DBG_ADDRESS_RANGE: u32 = 16;

/// One record of an encoded debug info stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DexDebugEvent {
    AdvancePc(u32),
    AdvanceLine(i32),
    StartLocal { register: u32, local: DebugLocalInfo },
    EndLocal(u32),
    RestartLocal(u32),
    SetPrologueEnd,
    SetEpilogueBegin,
    SetFile(Option<DexString>),
    /// A special opcode packing a pc delta and a small line delta.
    Default(u8),
}

impl DexDebugEvent {
    /// Packs `line_delta` and `pc_delta` into a special opcode.
    ///
    /// # Panics
    /// Panics if the deltas do not fit.
    pub fn special(line_delta: i32, pc_delta: u32) -> Self {
        assert!(
            (DBG_LINE_BASE..DBG_LINE_BASE + DBG_LINE_RANGE).contains(&line_delta),
            "line delta {line_delta} does not fit a special opcode"
        );
        assert!(
            pc_delta < DBG_ADDRESS_RANGE,
            "pc delta {pc_delta} does not fit a special opcode"
        );
        let opcode = i64::from(DBG_FIRST_SPECIAL)
            + i64::from(line_delta - DBG_LINE_BASE)
            + i64::from(DBG_LINE_RANGE) * i64::from(pc_delta);
        Self::Default(opcode as u8)
    }

    /// For a special opcode, the `(pc_delta, line_delta)` it encodes.
    pub fn special_deltas(self) -> Option<(u32, i32)> {
        match self {
            Self::Default(opcode) => {
                let adjusted = i32::from(opcode - DBG_FIRST_SPECIAL);
                let line_delta = DBG_LINE_BASE + adjusted % DBG_LINE_RANGE;
                let pc_delta = (adjusted / DBG_LINE_RANGE) as u32;
                Some((pc_delta, line_delta))
            }
            _ => None,
        }
    }

    /// Appends the dex encoding of the event.
    pub fn write(&self, mapping: &ObjectToOffsetMapping, out: &mut Vec<u8>) {
        match *self {
            Self::AdvancePc(delta) => {
                out.push(DBG_ADVANCE_PC);
                write_uleb128(out, delta);
            }
            Self::AdvanceLine(delta) => {
                out.push(DBG_ADVANCE_LINE);
                write_sleb128(out, delta);
            }
            Self::StartLocal { register, local } => {
                let opcode = if local.signature.is_some() {
                    DBG_START_LOCAL_EXTENDED
                } else {
                    DBG_START_LOCAL
                };
                out.push(opcode);
                write_uleb128(out, register);
                write_uleb128p1(out, Some(mapping.offset_for(local.name)));
                write_uleb128p1(out, Some(mapping.offset_for(local.ty)));
                if let Some(signature) = local.signature {
                    write_uleb128p1(out, Some(mapping.offset_for(signature)));
                }
            }
            Self::EndLocal(register) => {
                out.push(DBG_END_LOCAL);
                write_uleb128(out, register);
            }
            Self::RestartLocal(register) => {
                out.push(DBG_RESTART_LOCAL);
                write_uleb128(out, register);
            }
            Self::SetPrologueEnd => out.push(DBG_SET_PROLOGUE_END),
            Self::SetEpilogueBegin => out.push(DBG_SET_EPILOGUE_BEGIN),
            Self::SetFile(file) => {
                out.push(DBG_SET_FILE);
                write_uleb128p1(out, file.map(|file| mapping.offset_for(file)));
            }
            Self::Default(opcode) => out.push(opcode),
        }
    }

    /// Reads events up to and including the end-of-sequence marker.
    ///
    /// `strings` and `types` map file indices back to items.
    pub fn decode_stream(
        reader: &mut ByteReader<'_>,
        strings: &dyn Fn(u32) -> Option<DexString>,
        types: &dyn Fn(u32) -> Option<DexType>,
    ) -> CompilationResult<Vec<DexDebugEvent>> {
        let string = |reader: &mut ByteReader<'_>| -> CompilationResult<Option<DexString>> {
            match reader.read_uleb128p1()? {
                None => Ok(None),
                Some(idx) => strings(idx)
                    .map(Some)
                    .ok_or_else(|| malformed(format!("string index {idx} out of range"))),
            }
        };
        let ty = |reader: &mut ByteReader<'_>| -> CompilationResult<DexType> {
            let idx = reader
                .read_uleb128p1()?
                .ok_or_else(|| malformed("local without type".to_string()))?;
            types(idx).ok_or_else(|| malformed(format!("type index {idx} out of range")))
        };

        let mut events = Vec::new();
        loop {
            let opcode = reader.read_u8()?;
            let event = match opcode {
                DBG_END_SEQUENCE => return Ok(events),
                DBG_ADVANCE_PC => Self::AdvancePc(reader.read_uleb128()?),
                DBG_ADVANCE_LINE => Self::AdvanceLine(reader.read_sleb128()?),
                DBG_START_LOCAL | DBG_START_LOCAL_EXTENDED => {
                    let register = reader.read_uleb128()?;
                    let name = string(reader)?
                        .ok_or_else(|| malformed(format!("local in v{register} has no name")))?;
                    let local_ty = ty(reader)?;
                    let signature = if opcode == DBG_START_LOCAL_EXTENDED {
                        string(reader)?
                    } else {
                        None
                    };
                    Self::StartLocal {
                        register,
                        local: DebugLocalInfo::new(name, local_ty, signature),
                    }
                }
                DBG_END_LOCAL => Self::EndLocal(reader.read_uleb128()?),
                DBG_RESTART_LOCAL => Self::RestartLocal(reader.read_uleb128()?),
                DBG_SET_PROLOGUE_END => Self::SetPrologueEnd,
                DBG_SET_EPILOGUE_BEGIN => Self::SetEpilogueBegin,
                DBG_SET_FILE => Self::SetFile(string(reader)?),
                special => Self::Default(special),
            };
            events.push(event);
        }
    }
}

fn malformed(message: String) -> CompilationError {
    CompilationError::MalformedDebugInfo(message)
}

impl fmt::Display for DexDebugEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AdvancePc(delta) => write!(f, "ADVANCE_PC {delta}"),
            Self::AdvanceLine(delta) => write!(f, "ADVANCE_LINE {delta}"),
            Self::StartLocal { register, local } => {
                write!(f, "START_LOCAL {register} {} {}", local.name, local.ty)?;
                if let Some(signature) = local.signature {
                    write!(f, " {signature}")?;
                }
                Ok(())
            }
            Self::EndLocal(register) => write!(f, "END_LOCAL {register}"),
            Self::RestartLocal(register) => write!(f, "RESTART_LOCAL {register}"),
            Self::SetPrologueEnd => f.write_str("SET_PROLOGUE_END"),
            Self::SetEpilogueBegin => f.write_str("SET_EPILOGUE_BEGIN"),
            Self::SetFile(Some(file)) => write!(f, "SET_FILE {file}"),
            Self::SetFile(None) => f.write_str("SET_FILE null"),
            Self::Default(opcode) => {
                let (pc, line) = self.special_deltas().unwrap_or_default();
                write!(f, "DEFAULT {opcode:#04x} (pc +{pc}, line {line:+})")
            }
        }
    }
}
