//! Bit-exact wire primitives for chat payloads.
//!
//! Integers are big-endian, variable-length integers use 7-bit groups with a
//! continuation bit (at most five bytes), UUIDs are sixteen raw bytes and
//! strings are a varint byte length followed by UTF-8.

use thiserror::Error;
use uuid::Uuid;

/// Longest encoding of a 32-bit varint.
pub const MAX_VAR_INT_BYTES: usize = 5;

/// Errors raised while reading or writing chat payloads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected end of payload: needed {needed} more bytes")]
    UnexpectedEof { needed: usize },

    #[error("varint is longer than {MAX_VAR_INT_BYTES} bytes")]
    VarIntTooLong,

    #[error("value {value} does not fit the field")]
    OutOfRange { value: i64 },

    #[error("string of {length} code units exceeds the limit of {max}")]
    StringTooLong { length: usize, max: usize },

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("{count} entries exceed the limit of {max}")]
    TooManyEntries { count: usize, max: usize },

    #[error("bit set has bits beyond position {size}")]
    BitSetOverflow { size: usize },

    #[error("unknown packet id {id}")]
    UnknownPacket { id: u32 },

    #[error("{count} trailing bytes after payload")]
    TrailingBytes { count: usize },
}

pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Counts UTF-16 code units, the unit chat length limits are expressed in.
pub fn code_units(value: &str) -> usize {
    value.encode_utf16().count()
}

/// Appends wire fields to a growable buffer.
#[derive(Debug, Default)]
pub struct PacketWriter {
    buf: Vec<u8>,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_var_int(&mut self, value: u32) {
        let mut value = value;
        loop {
            if value & !0x7F == 0 {
                self.buf.push(value as u8);
                return;
            }
            self.buf.push((value & 0x7F) as u8 | 0x80);
            value >>= 7;
        }
    }

    pub fn write_uuid(&mut self, value: &Uuid) {
        self.buf.extend_from_slice(value.as_bytes());
    }

    pub fn write_bytes(&mut self, value: &[u8]) {
        self.buf.extend_from_slice(value);
    }

    /// Writes a length-prefixed byte array.
    pub fn write_byte_array(&mut self, value: &[u8]) -> CodecResult<()> {
        let length = u32::try_from(value.len()).map_err(|_| CodecError::OutOfRange {
            value: value.len() as i64,
        })?;
        self.write_var_int(length);
        self.write_bytes(value);
        Ok(())
    }

    /// Writes a string, refusing anything longer than `max` code units.
    pub fn write_string(&mut self, value: &str, max: usize) -> CodecResult<()> {
        let length = code_units(value);
        if length > max {
            return Err(CodecError::StringTooLong { length, max });
        }
        self.write_byte_array(value.as_bytes())
    }

    /// Writes a fixed-size bit set as `ceil(size / 8)` bytes.
    pub fn write_fixed_bit_set(&mut self, bits: u32, size: usize) -> CodecResult<()> {
        if size < 32 && bits >> size != 0 {
            return Err(CodecError::BitSetOverflow { size });
        }
        let bytes = bits.to_le_bytes();
        self.write_bytes(&bytes[..size.div_ceil(8)]);
        Ok(())
    }
}

/// Reads wire fields from a borrowed payload.
#[derive(Debug)]
pub struct PacketReader<'a> {
    buf: &'a [u8],
}

impl<'a> PacketReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Fails if any bytes are left unread.
    pub fn finish(self) -> CodecResult<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(CodecError::TrailingBytes {
                count: self.buf.len(),
            })
        }
    }

    pub fn read_bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        if self.buf.len() < len {
            return Err(CodecError::UnexpectedEof {
                needed: len - self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    pub fn read_array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> CodecResult<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_bool(&mut self) -> CodecResult<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::OutOfRange {
                value: i64::from(other),
            }),
        }
    }

    pub fn read_i32(&mut self) -> CodecResult<i32> {
        Ok(i32::from_be_bytes(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> CodecResult<i64> {
        Ok(i64::from_be_bytes(self.read_array()?))
    }

    pub fn read_var_int(&mut self) -> CodecResult<u32> {
        let mut value: u32 = 0;
        for position in 0..MAX_VAR_INT_BYTES {
            let byte = self.read_u8()?;
            value |= u32::from(byte & 0x7F) << (7 * position);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(CodecError::VarIntTooLong)
    }

    pub fn read_uuid(&mut self) -> CodecResult<Uuid> {
        Ok(Uuid::from_bytes(self.read_array()?))
    }

    /// Reads a length-prefixed byte array of at most `max` bytes.
    pub fn read_byte_array(&mut self, max: usize) -> CodecResult<&'a [u8]> {
        let length = self.read_var_int()? as usize;
        if length > max {
            return Err(CodecError::TooManyEntries { count: length, max });
        }
        self.read_bytes(length)
    }

    pub fn read_string(&mut self, max: usize) -> CodecResult<String> {
        // A code unit never takes more than three UTF-8 bytes.
        let bytes = self.read_byte_array(max * 3)?;
        let value = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
        let length = code_units(value);
        if length > max {
            return Err(CodecError::StringTooLong { length, max });
        }
        Ok(value.to_owned())
    }

    pub fn read_fixed_bit_set(&mut self, size: usize) -> CodecResult<u32> {
        let bytes = self.read_bytes(size.div_ceil(8))?;
        let mut raw = [0u8; 4];
        raw[..bytes.len()].copy_from_slice(bytes);
        let bits = u32::from_le_bytes(raw);
        if size < 32 && bits >> size != 0 {
            return Err(CodecError::BitSetOverflow { size });
        }
        Ok(bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var_int_bytes(value: u32) -> Vec<u8> {
        let mut writer = PacketWriter::new();
        writer.write_var_int(value);
        writer.into_bytes()
    }

    #[test]
    fn test_var_int_encoding() {
        assert_eq!(var_int_bytes(0), vec![0x00]);
        assert_eq!(var_int_bytes(1), vec![0x01]);
        assert_eq!(var_int_bytes(127), vec![0x7F]);
        assert_eq!(var_int_bytes(128), vec![0x80, 0x01]);
        assert_eq!(var_int_bytes(300), vec![0xAC, 0x02]);
        assert_eq!(
            var_int_bytes(i32::MAX as u32),
            vec![0xFF, 0xFF, 0xFF, 0xFF, 0x07]
        );
    }

    #[test]
    fn test_var_int_too_long() {
        let data = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        let mut reader = PacketReader::new(&data);
        assert_eq!(reader.read_var_int(), Err(CodecError::VarIntTooLong));
    }

    #[test]
    fn test_truncated_input() {
        let data = [0x00, 0x01];
        let mut reader = PacketReader::new(&data);
        assert_eq!(
            reader.read_i64(),
            Err(CodecError::UnexpectedEof { needed: 6 })
        );
    }

    #[test]
    fn test_fixed_bit_set_layout() {
        let mut writer = PacketWriter::new();
        writer.write_fixed_bit_set(0b1 | 1 << 9 | 1 << 19, 20).unwrap();
        assert_eq!(writer.into_bytes(), vec![0x01, 0x02, 0x08]);
    }

    #[test]
    fn test_fixed_bit_set_rejects_high_bits() {
        let mut writer = PacketWriter::new();
        assert_eq!(
            writer.write_fixed_bit_set(1 << 20, 20),
            Err(CodecError::BitSetOverflow { size: 20 })
        );

        let data = [0x00, 0x00, 0x10];
        let mut reader = PacketReader::new(&data);
        assert_eq!(
            reader.read_fixed_bit_set(20),
            Err(CodecError::BitSetOverflow { size: 20 })
        );
    }

    #[test]
    fn test_string_limits() {
        let mut writer = PacketWriter::new();
        assert!(writer.write_string("hello", 5).is_ok());
        assert_eq!(
            writer.write_string("hello!", 5),
            Err(CodecError::StringTooLong { length: 6, max: 5 })
        );

        let bytes = writer.into_bytes();
        let mut reader = PacketReader::new(&bytes);
        assert_eq!(reader.read_string(5).unwrap(), "hello");
        reader.finish().unwrap();
    }

    #[test]
    fn test_invalid_utf8() {
        let data = [0x02, 0xC3, 0x28];
        let mut reader = PacketReader::new(&data);
        assert_eq!(reader.read_string(16), Err(CodecError::InvalidUtf8));
    }

    #[test]
    fn test_trailing_bytes() {
        let data = [0x01, 0x02];
        let mut reader = PacketReader::new(&data);
        reader.read_u8().unwrap();
        assert_eq!(reader.finish(), Err(CodecError::TrailingBytes { count: 1 }));
    }
}
