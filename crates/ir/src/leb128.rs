//! Variable length integer encodings of the dex format.
use crate::error::{CompilationError, CompilationResult};

pub fn write_uleb128(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

pub fn write_sleb128(out: &mut Vec<u8>, mut value: i32) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        if done {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Writes `value + 1`, so that `None` is encoded as `0`.
pub fn write_uleb128p1(out: &mut Vec<u8>, value: Option<u32>) {
    write_uleb128(out, value.map_or(0, |v| v + 1));
}

/// A forward reader over an encoded byte stream.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    pub fn read_u8(&mut self) -> CompilationResult<u8> {
        let byte = *self.bytes.get(self.pos).ok_or_else(|| {
            CompilationError::MalformedDebugInfo(format!("unexpected end of data at {}", self.pos))
        })?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_uleb128(&mut self) -> CompilationResult<u32> {
        let mut result = 0u32;
        let mut shift = 0;
        loop {
            let byte = self.read_u8()?;
            result |= ((byte & 0x7f) as u32) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
            if shift >= 35 {
                return Err(self.too_long());
            }
        }
    }

    pub fn read_sleb128(&mut self) -> CompilationResult<i32> {
        let mut result = 0i32;
        let mut shift = 0;
        loop {
            let byte = self.read_u8()?;
            result |= ((byte & 0x7f) as i32) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 32 && byte & 0x40 != 0 {
                    result |= -1 << shift;
                }
                return Ok(result);
            }
            if shift >= 35 {
                return Err(self.too_long());
            }
        }
    }

    pub fn read_uleb128p1(&mut self) -> CompilationResult<Option<u32>> {
        Ok(self.read_uleb128()?.checked_sub(1))
    }

    fn too_long(&self) -> CompilationError {
        CompilationError::MalformedDebugInfo(format!("LEB128 value too long at {}", self.pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_encodings() {
        let mut out = Vec::new();
        write_uleb128(&mut out, 0);
        write_uleb128(&mut out, 127);
        write_uleb128(&mut out, 128);
        write_uleb128(&mut out, 16256);
        assert_eq!(out, [0x00, 0x7f, 0x80, 0x01, 0x80, 0x7f]);

        out.clear();
        write_sleb128(&mut out, 0);
        write_sleb128(&mut out, 1);
        write_sleb128(&mut out, -1);
        write_sleb128(&mut out, -128);
        assert_eq!(out, [0x00, 0x01, 0x7f, 0x80, 0x7f]);

        out.clear();
        write_uleb128p1(&mut out, None);
        write_uleb128p1(&mut out, Some(0));
        assert_eq!(out, [0x00, 0x01]);
    }

    #[test]
    fn read_back() {
        let mut out = Vec::new();
        for v in [0, 5, 300, u32::MAX] {
            write_uleb128(&mut out, v);
        }
        for v in [0, -5, 63, -64, 64, i32::MIN, i32::MAX] {
            write_sleb128(&mut out, v);
        }
        let mut reader = ByteReader::new(&out);
        for v in [0, 5, 300, u32::MAX] {
            assert_eq!(reader.read_uleb128().unwrap(), v);
        }
        for v in [0, -5, 63, -64, 64, i32::MIN, i32::MAX] {
            assert_eq!(reader.read_sleb128().unwrap(), v);
        }
        assert!(reader.is_at_end());
        assert!(reader.read_u8().is_err());
    }
}
