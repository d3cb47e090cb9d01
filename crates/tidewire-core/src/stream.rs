//! Fixed-capacity binary stream.
//!
//! `BinaryStream` frames every datagram and every application value. The backing buffer is
//! allocated once and never grows; writes fail with `CapacityExceeded` instead. Integers and
//! floats are little-endian and fixed width, strings are prefixed with their byte length as a
//! 7-bit encoded integer.
//!
//! A failed write or read leaves the cursor and written length untouched.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};

use crate::{
    constants::MAX_VARINT_LEN,
    error::{ErrorKind, Result},
};

/// Text encoding used for string values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TextEncoding {
    /// UTF-8, written without a scratch copy.
    #[default]
    Utf8,
    /// UTF-16 little-endian code units.
    Utf16Le,
    /// 7-bit ASCII; characters outside the range are written as `?`.
    Ascii,
}

/// A byte buffer of fixed capacity with a read/write cursor.
#[derive(Clone)]
pub struct BinaryStream {
    buffer: Box<[u8]>,
    cursor: usize,
    written_len: usize,
    encoding: TextEncoding,
    /// Reused for string encodings that need a transcoded copy.
    scratch: Vec<u8>,
}

impl BinaryStream {
    /// Creates an empty UTF-8 stream that can hold `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_encoding(capacity, TextEncoding::Utf8)
    }

    /// Creates an empty stream with the given capacity and string encoding.
    pub fn with_encoding(capacity: usize, encoding: TextEncoding) -> Self {
        Self {
            buffer: vec![0; capacity].into_boxed_slice(),
            cursor: 0,
            written_len: 0,
            encoding,
            scratch: Vec::new(),
        }
    }

    /// Total number of bytes the stream can hold.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Current cursor position.
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Logical written length.
    pub fn len(&self) -> usize {
        self.written_len
    }

    /// Returns true when nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.written_len == 0
    }

    /// Bytes left to read between the cursor and the written length.
    pub fn remaining(&self) -> usize {
        self.written_len - self.cursor
    }

    /// Bytes that can still be written at the cursor.
    pub fn remaining_capacity(&self) -> usize {
        self.buffer.len() - self.cursor
    }

    /// String encoding used by this stream.
    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// Rewinds the cursor and logical length without reallocating.
    pub fn reset(&mut self, position: usize, written_len: usize) -> Result<()> {
        if written_len > self.buffer.len() || position > written_len {
            return Err(ErrorKind::CapacityExceeded {
                needed: written_len.max(position),
                remaining: self.buffer.len(),
            });
        }
        self.cursor = position;
        self.written_len = written_len;
        Ok(())
    }

    /// Empties the stream for reuse.
    pub fn clear(&mut self) {
        self.cursor = 0;
        self.written_len = 0;
    }

    /// Moves the cursor within the written bytes.
    pub fn seek(&mut self, position: usize) -> Result<()> {
        if position > self.written_len {
            return Err(ErrorKind::EndOfStream);
        }
        self.cursor = position;
        Ok(())
    }

    /// Replaces the content with `bytes` and rewinds the cursor.
    pub fn load(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.buffer.len() {
            return Err(ErrorKind::CapacityExceeded {
                needed: bytes.len(),
                remaining: self.buffer.len(),
            });
        }
        self.buffer[..bytes.len()].copy_from_slice(bytes);
        self.cursor = 0;
        self.written_len = bytes.len();
        Ok(())
    }

    /// All written bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer[..self.written_len]
    }

    /// Written bytes that have not been read yet.
    pub fn unread(&self) -> &[u8] {
        &self.buffer[self.cursor..self.written_len]
    }

    /// The whole backing buffer, used as a receive target. Follow with `reset(0, n)`.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    fn claim_write(&mut self, count: usize) -> Result<usize> {
        let remaining = self.remaining_capacity();
        if count > remaining {
            return Err(ErrorKind::CapacityExceeded { needed: count, remaining });
        }
        let start = self.cursor;
        self.cursor += count;
        self.written_len = self.written_len.max(self.cursor);
        Ok(start)
    }

    fn claim_read(&mut self, count: usize) -> Result<usize> {
        if count > self.remaining() {
            return Err(ErrorKind::EndOfStream);
        }
        let start = self.cursor;
        self.cursor += count;
        Ok(start)
    }

    /// Writes a single byte.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        let start = self.claim_write(1)?;
        self.buffer[start] = value;
        Ok(())
    }

    /// Writes a little-endian `i16`.
    pub fn write_i16(&mut self, value: i16) -> Result<()> {
        let start = self.claim_write(2)?;
        LittleEndian::write_i16(&mut self.buffer[start..start + 2], value);
        Ok(())
    }

    /// Writes a little-endian `u16`.
    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        let start = self.claim_write(2)?;
        LittleEndian::write_u16(&mut self.buffer[start..start + 2], value);
        Ok(())
    }

    /// Writes a little-endian `i32`.
    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        let start = self.claim_write(4)?;
        LittleEndian::write_i32(&mut self.buffer[start..start + 4], value);
        Ok(())
    }

    /// Writes a little-endian `u32`.
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        let start = self.claim_write(4)?;
        LittleEndian::write_u32(&mut self.buffer[start..start + 4], value);
        Ok(())
    }

    /// Writes an `f32` as its IEEE-754 bit pattern.
    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        self.write_u32(value.to_bits())
    }

    /// Writes an `f64` as its IEEE-754 bit pattern.
    pub fn write_f64(&mut self, value: f64) -> Result<()> {
        let start = self.claim_write(8)?;
        LittleEndian::write_u64(&mut self.buffer[start..start + 8], value.to_bits());
        Ok(())
    }

    /// Writes raw bytes without a length prefix.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let start = self.claim_write(bytes.len())?;
        self.buffer[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Writes a base-128 varint. Negative values are reinterpreted as `u32`.
    pub fn write_7bit_encoded_int(&mut self, value: i32) -> Result<()> {
        let start = self.claim_write(encoded_varint_len(value))?;
        let mut remaining = value as u32;
        let mut index = start;
        while remaining >= 0x80 {
            self.buffer[index] = (remaining as u8) | 0x80;
            remaining >>= 7;
            index += 1;
        }
        self.buffer[index] = remaining as u8;
        Ok(())
    }

    /// Writes a string with a varint byte-length prefix in the stream's encoding.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        if self.encoding == TextEncoding::Utf8 {
            return self.write_prefixed(value.as_bytes());
        }

        let mut scratch = std::mem::take(&mut self.scratch);
        transcode(self.encoding, value, &mut scratch);
        let result = self.write_prefixed(&scratch);
        scratch.clear();
        self.scratch = scratch;
        result
    }

    fn write_prefixed(&mut self, bytes: &[u8]) -> Result<()> {
        let remaining = self.remaining_capacity();
        let len = i32::try_from(bytes.len())
            .map_err(|_| ErrorKind::CapacityExceeded { needed: bytes.len(), remaining })?;
        let needed = encoded_varint_len(len) + bytes.len();
        if needed > remaining {
            return Err(ErrorKind::CapacityExceeded { needed, remaining });
        }
        self.write_7bit_encoded_int(len)?;
        self.write_bytes(bytes)
    }

    /// Reads a single byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        let start = self.claim_read(1)?;
        Ok(self.buffer[start])
    }

    /// Reads a little-endian `i16`.
    pub fn read_i16(&mut self) -> Result<i16> {
        let start = self.claim_read(2)?;
        Ok(LittleEndian::read_i16(&self.buffer[start..start + 2]))
    }

    /// Reads a little-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16> {
        let start = self.claim_read(2)?;
        Ok(LittleEndian::read_u16(&self.buffer[start..start + 2]))
    }

    /// Reads a little-endian `i32`.
    pub fn read_i32(&mut self) -> Result<i32> {
        let start = self.claim_read(4)?;
        Ok(LittleEndian::read_i32(&self.buffer[start..start + 4]))
    }

    /// Reads a little-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32> {
        let start = self.claim_read(4)?;
        Ok(LittleEndian::read_u32(&self.buffer[start..start + 4]))
    }

    /// Reads an `f32` from its IEEE-754 bit pattern.
    pub fn read_f32(&mut self) -> Result<f32> {
        self.read_u32().map(f32::from_bits)
    }

    /// Reads an `f64` from its IEEE-754 bit pattern.
    pub fn read_f64(&mut self) -> Result<f64> {
        let start = self.claim_read(8)?;
        Ok(f64::from_bits(LittleEndian::read_u64(&self.buffer[start..start + 8])))
    }

    /// Reads `count` raw bytes.
    pub fn read_bytes(&mut self, count: usize) -> Result<&[u8]> {
        let start = self.claim_read(count)?;
        Ok(&self.buffer[start..start + count])
    }

    /// Reads everything between the cursor and the written length.
    pub fn read_remaining(&mut self) -> &[u8] {
        let start = self.cursor;
        self.cursor = self.written_len;
        &self.buffer[start..self.written_len]
    }

    /// Reads a base-128 varint of at most five bytes.
    pub fn read_7bit_encoded_int(&mut self) -> Result<i32> {
        let mut result: u32 = 0;
        let mut position = self.cursor;
        for index in 0..MAX_VARINT_LEN {
            if position >= self.written_len {
                return Err(ErrorKind::EndOfStream);
            }
            let byte = self.buffer[position];
            position += 1;

            // The fifth byte only has room for the top four bits of a u32.
            if index == MAX_VARINT_LEN - 1 && byte > 0x0F {
                return Err(ErrorKind::CorruptStream);
            }

            result |= u32::from(byte & 0x7F) << (7 * index);
            if byte & 0x80 == 0 {
                self.cursor = position;
                return Ok(result as i32);
            }
        }
        Err(ErrorKind::CorruptStream)
    }

    /// Reads a varint-prefixed string in the stream's encoding.
    pub fn read_string(&mut self) -> Result<String> {
        let start = self.cursor;
        let result = self.read_string_inner();
        if result.is_err() {
            self.cursor = start;
        }
        result
    }

    fn read_string_inner(&mut self) -> Result<String> {
        let len = self.read_7bit_encoded_int()?;
        let len = usize::try_from(len).map_err(|_| ErrorKind::CorruptStream)?;
        let start = self.claim_read(len)?;
        decode(self.encoding, &self.buffer[start..start + len])
    }
}

impl fmt::Debug for BinaryStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryStream")
            .field("capacity", &self.buffer.len())
            .field("cursor", &self.cursor)
            .field("written_len", &self.written_len)
            .field("encoding", &self.encoding)
            .finish()
    }
}

/// Number of bytes `write_7bit_encoded_int` emits for `value`.
pub fn encoded_varint_len(value: i32) -> usize {
    let mut remaining = value as u32;
    let mut len = 1;
    while remaining >= 0x80 {
        remaining >>= 7;
        len += 1;
    }
    len
}

fn transcode(encoding: TextEncoding, value: &str, out: &mut Vec<u8>) {
    match encoding {
        TextEncoding::Utf8 => out.extend_from_slice(value.as_bytes()),
        TextEncoding::Utf16Le => {
            for unit in value.encode_utf16() {
                out.extend_from_slice(&unit.to_le_bytes());
            }
        }
        TextEncoding::Ascii => {
            out.extend(value.chars().map(|c| if c.is_ascii() { c as u8 } else { b'?' }))
        }
    }
}

fn decode(encoding: TextEncoding, bytes: &[u8]) -> Result<String> {
    match encoding {
        TextEncoding::Utf8 => {
            std::str::from_utf8(bytes).map(str::to_owned).map_err(|_| ErrorKind::CorruptStream)
        }
        TextEncoding::Utf16Le => {
            if bytes.len() % 2 != 0 {
                return Err(ErrorKind::CorruptStream);
            }
            char::decode_utf16(bytes.chunks_exact(2).map(LittleEndian::read_u16))
                .collect::<std::result::Result<String, _>>()
                .map_err(|_| ErrorKind::CorruptStream)
        }
        TextEncoding::Ascii => {
            if !bytes.is_ascii() {
                return Err(ErrorKind::CorruptStream);
            }
            std::str::from_utf8(bytes).map(str::to_owned).map_err(|_| ErrorKind::CorruptStream)
        }
    }
}
