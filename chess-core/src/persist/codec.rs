//! Little-endian byte codecs for persisted sections.

use core::fmt;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodecError {
    /// The staging buffer has no room for the value.
    BufferFull,
    /// The record ended before the value.
    UnexpectedEnd,
    /// A decoded value is outside its domain.
    InvalidValue,
    /// Bytes were left after the last section.
    TrailingBytes,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CodecError::BufferFull => "staging buffer full",
            CodecError::UnexpectedEnd => "record truncated",
            CodecError::InvalidValue => "invalid field value",
            CodecError::TrailingBytes => "unexpected trailing bytes",
        };
        f.write_str(text)
    }
}

/// Sequential writer over a fixed buffer.
pub struct ByteWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> ByteWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        let end = self.pos + bytes.len();
        let slot = self
            .buf
            .get_mut(self.pos..end)
            .ok_or(CodecError::BufferFull)?;
        slot.copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), CodecError> {
        self.write_bytes(&[value])
    }

    pub fn write_bool(&mut self, value: bool) -> Result<(), CodecError> {
        self.write_u8(u8::from(value))
    }

    pub fn write_u16(&mut self, value: u16) -> Result<(), CodecError> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_i16(&mut self, value: i16) -> Result<(), CodecError> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), CodecError> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Writes a `u16` element count followed by the elements.
    pub fn write_u16_slice(&mut self, values: &[u16]) -> Result<(), CodecError> {
        let count = u16::try_from(values.len()).map_err(|_| CodecError::InvalidValue)?;
        self.write_u16(count)?;
        values.iter().try_for_each(|value| self.write_u16(*value))
    }
}

/// Sequential reader over a received record.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos + len;
        let bytes = self
            .buf
            .get(self.pos..end)
            .ok_or(CodecError::UnexpectedEnd)?;
        self.pos = end;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(CodecError::InvalidValue),
        }
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        self.read_array().map(u16::from_le_bytes)
    }

    pub fn read_i16(&mut self) -> Result<i16, CodecError> {
        self.read_array().map(i16::from_le_bytes)
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        self.read_array().map(u32::from_le_bytes)
    }

    /// Reads a count-prefixed `u16` list into `out`.
    pub fn read_u16_vec<const N: usize>(
        &mut self,
        out: &mut heapless::Vec<u16, N>,
    ) -> Result<(), CodecError> {
        let count = usize::from(self.read_u16()?);
        if count > N {
            return Err(CodecError::InvalidValue);
        }
        out.clear();
        for _ in 0..count {
            out.push(self.read_u16()?)
                .map_err(|_| CodecError::InvalidValue)?;
        }
        Ok(())
    }

    /// Fails if anything is left unread.
    pub fn finish(self) -> Result<(), CodecError> {
        if self.remaining() == 0 {
            Ok(())
        } else {
            Err(CodecError::TrailingBytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_rejects_overflow() {
        let mut buf = [0u8; 3];
        let mut writer = ByteWriter::new(&mut buf);
        writer.write_u16(0xBEEF).unwrap();
        assert_eq!(writer.write_u16(1), Err(CodecError::BufferFull));
        assert_eq!(writer.position(), 2);
        assert_eq!(buf[..2], [0xEF, 0xBE]);
    }

    #[test]
    fn reader_reports_truncation() {
        let mut reader = ByteReader::new(&[1, 2, 3]);
        assert_eq!(reader.read_u16(), Ok(0x0201));
        assert_eq!(reader.read_u32(), Err(CodecError::UnexpectedEnd));
    }

    #[test]
    fn bool_rejects_other_values() {
        let mut reader = ByteReader::new(&[2]);
        assert_eq!(reader.read_bool(), Err(CodecError::InvalidValue));
    }

    #[test]
    fn list_count_is_bounded() {
        let mut buf = [0u8; 16];
        let mut writer = ByteWriter::new(&mut buf);
        writer.write_u16_slice(&[1, 2, 3]).unwrap();

        let mut small: heapless::Vec<u16, 2> = heapless::Vec::new();
        let mut reader = ByteReader::new(&buf);
        assert_eq!(reader.read_u16_vec(&mut small), Err(CodecError::InvalidValue));

        let mut big: heapless::Vec<u16, 4> = heapless::Vec::new();
        let mut reader = ByteReader::new(&buf[..8]);
        reader.read_u16_vec(&mut big).unwrap();
        assert_eq!(big.as_slice(), &[1, 2, 3]);
        reader.finish().unwrap();
    }
}
