//! Bit-addressable views over a frame buffer.
//!
//! Bit-packed groups are read and written most-significant-bit first: the
//! first bit of a field lands in bit 7 of the current byte. Fixed-width fields
//! (`u8`, `u32`, `f32`) are little-endian and may only be accessed on a byte
//! boundary, so a bit region must be closed with `align_to_byte` before them.

use crate::error::CodecError;

fn check_width(bits: u32) -> Result<(), CodecError> {
    if (1..=32).contains(&bits) {
        Ok(())
    } else {
        Err(CodecError::InvalidBitWidth(bits))
    }
}

/// Read cursor over a borrowed frame
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    buf: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    /// Creates a reader positioned at the first bit of `buf`
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, bit_pos: 0 }
    }

    /// Current absolute position in bits, suitable for [`BitReader::seek`]
    pub fn bit_offset(&self) -> usize {
        self.bit_pos
    }

    /// Total size of the buffer in bits
    pub fn len_bits(&self) -> usize {
        self.buf.len() * 8
    }

    /// Bits left to read
    pub fn remaining_bits(&self) -> usize {
        self.len_bits() - self.bit_pos
    }

    /// Bytes not yet touched, counting a partially consumed byte as used.
    pub fn remaining_bytes(&self) -> usize {
        self.buf.len() - self.bit_pos.div_ceil(8)
    }

    /// Returns true if the cursor sits on a byte boundary
    pub fn is_aligned(&self) -> bool {
        self.bit_pos % 8 == 0
    }

    /// Moves the cursor to an absolute bit offset, used to replay a region
    /// once more context is known.
    pub fn seek(&mut self, bit_offset: usize) -> Result<(), CodecError> {
        if bit_offset > self.len_bits() {
            return Err(CodecError::TruncatedStream {
                needed: bit_offset,
                remaining: self.len_bits(),
            });
        }
        self.bit_pos = bit_offset;
        Ok(())
    }

    fn ensure(&self, bits: usize) -> Result<(), CodecError> {
        let remaining = self.remaining_bits();
        if bits > remaining {
            return Err(CodecError::TruncatedStream {
                needed: bits,
                remaining,
            });
        }
        Ok(())
    }

    /// Reads the next `bits` bits (1..=32) as an unsigned integer.
    pub fn read_bits(&mut self, bits: u32) -> Result<u32, CodecError> {
        check_width(bits)?;
        self.ensure(bits as usize)?;

        let mut value: u64 = 0;
        let mut left = bits;
        while left > 0 {
            let byte = self.buf[self.bit_pos / 8];
            let used = (self.bit_pos % 8) as u32;
            let avail = 8 - used;
            let take = avail.min(left);
            let chunk = (u32::from(byte) >> (avail - take)) & ((1 << take) - 1);

            value = (value << take) | u64::from(chunk);
            self.bit_pos += take as usize;
            left -= take;
        }

        Ok(value as u32)
    }

    /// Reads a single bit as a flag
    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.read_bits(1)? == 1)
    }

    /// Skips padding up to the next byte boundary. A no-op when aligned.
    pub fn align_to_byte(&mut self) {
        self.bit_pos = self.bit_pos.div_ceil(8) * 8;
    }

    fn take_aligned<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        if !self.is_aligned() {
            return Err(CodecError::Misaligned {
                bit_offset: self.bit_pos,
            });
        }
        self.ensure(N * 8)?;

        let start = self.bit_pos / 8;
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&self.buf[start..start + N]);
        self.bit_pos += N * 8;
        Ok(bytes)
    }

    /// Reads one whole byte.
    ///
    /// Fails with `Misaligned` inside a bit group and `TruncatedStream` at the
    /// end of the buffer, as do the other fixed-width reads.
    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take_aligned::<1>()?[0])
    }

    /// Reads a little-endian `u32`
    pub fn read_u32_le(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.take_aligned::<4>()?))
    }

    /// Reads a little-endian IEEE-754 `f32`
    pub fn read_f32_le(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_bits(self.read_u32_le()?))
    }
}

/// Append-only write cursor that owns its buffer
#[derive(Debug, Clone, Default)]
pub struct BitWriter {
    buf: Vec<u8>,
    bit_len: usize,
}

impl BitWriter {
    /// Creates an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty writer with room for `bytes` bytes, typically the
    /// frame length computed up front
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            buf: Vec::with_capacity(bytes),
            bit_len: 0,
        }
    }

    /// Number of bits appended so far
    pub fn bits_written(&self) -> usize {
        self.bit_len
    }

    /// Number of bytes touched so far, counting a partial byte
    pub fn bytes_written(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if the next write starts on a byte boundary
    pub fn is_aligned(&self) -> bool {
        self.bit_len % 8 == 0
    }

    /// Appends the low `bits` bits of `value`, tagging range failures with
    /// the field name.
    pub fn write_field(
        &mut self,
        field: &'static str,
        bits: u32,
        value: u32,
    ) -> Result<(), CodecError> {
        check_width(bits)?;
        if bits < 32 && value >> bits != 0 {
            return Err(CodecError::ValueOutOfRange { field, value, bits });
        }

        let mut left = bits;
        while left > 0 {
            let used = (self.bit_len % 8) as u32;
            if used == 0 {
                self.buf.push(0);
            }
            let avail = 8 - used;
            let take = avail.min(left);
            let chunk = (value >> (left - take)) & ((1 << take) - 1);

            let last = self.buf.len() - 1;
            self.buf[last] |= (chunk << (avail - take)) as u8;
            self.bit_len += take as usize;
            left -= take;
        }

        Ok(())
    }

    /// Appends the low `bits` bits (1..=32) of `value`, most significant bit
    /// first. Fails with `ValueOutOfRange` if `value` does not fit.
    pub fn write_bits(&mut self, bits: u32, value: u32) -> Result<(), CodecError> {
        self.write_field("value", bits, value)
    }

    /// Appends a single flag bit
    pub fn write_bool(&mut self, value: bool) -> Result<(), CodecError> {
        self.write_bits(1, u32::from(value))
    }

    /// Pads with zero bits up to the next byte boundary.
    pub fn align_to_byte(&mut self) {
        // The partially filled byte was pushed zeroed, so only the length moves.
        self.bit_len = self.buf.len() * 8;
    }

    fn put_aligned(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        if !self.is_aligned() {
            return Err(CodecError::Misaligned {
                bit_offset: self.bit_len,
            });
        }
        self.buf.extend_from_slice(bytes);
        self.bit_len += bytes.len() * 8;
        Ok(())
    }

    /// Appends one whole byte. Fails with `Misaligned` inside a bit group.
    pub fn write_u8(&mut self, value: u8) -> Result<(), CodecError> {
        self.put_aligned(&[value])
    }

    /// Appends a little-endian `u32`
    pub fn write_u32_le(&mut self, value: u32) -> Result<(), CodecError> {
        self.put_aligned(&value.to_le_bytes())
    }

    /// Appends a little-endian IEEE-754 `f32`
    pub fn write_f32_le(&mut self, value: f32) -> Result<(), CodecError> {
        self.write_u32_le(value.to_bits())
    }

    /// Finishes the frame, padding any open bit group with zeros.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}
