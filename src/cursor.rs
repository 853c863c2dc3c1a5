//! Bit-granular cursor over an immutable byte buffer.
//!
//! CTF packs fields at bit granularity, so the cursor tracks its position in
//! bits and understands both byte orders at the sub-byte level:
//!
//! - **Little-endian**: value bits fill each byte starting from its least
//!   significant bit; bit `i` of the stream is bit `i % 8` of byte `i / 8`.
//! - **Big-endian**: value bits fill each byte starting from its most
//!   significant bit.
//!
//! Whole-byte reads at byte-aligned positions take a fast path over
//! `from_le_bytes`/`from_be_bytes`. The cursor is a view: it never copies the
//! underlying buffer and its only side effect is advancing its own position.

use crate::error::{DecodeError, Result};
use crate::types::ByteOrder;

/// Mutable read head over an immutable byte buffer, positioned in bits.
#[derive(Debug)]
pub struct BitCursor<'a> {
    buf: &'a [u8],
    pos_bits: u64,
    len_bits: u64,
    default_order: ByteOrder,
    /// Byte the cursor stopped inside mid-read, with the order that filled
    /// its consumed bits. The two orders map stream positions to different
    /// physical bits, so switching orders inside one byte would alias bits
    /// already consumed; such a read is rejected.
    partial: Option<(u64, ByteOrder)>,
}

impl<'a> BitCursor<'a> {
    /// Create a cursor at bit position 0 with the trace's default byte order.
    pub fn new(buf: &'a [u8], default_order: ByteOrder) -> Self {
        Self { buf, pos_bits: 0, len_bits: (buf.len() as u64) * 8, default_order, partial: None }
    }

    /// Current position in bits from the start of the buffer.
    pub fn position_bits(&self) -> u64 {
        self.pos_bits
    }

    /// Current position rounded down to a byte offset, for error reporting.
    pub fn byte_offset(&self) -> usize {
        (self.pos_bits / 8) as usize
    }

    /// Total buffer length in bits.
    pub fn len_bits(&self) -> u64 {
        self.len_bits
    }

    /// Bits left before the end of the buffer.
    pub fn remaining_bits(&self) -> u64 {
        self.len_bits - self.pos_bits
    }

    /// Byte order used when a field does not declare its own.
    pub fn default_order(&self) -> ByteOrder {
        self.default_order
    }

    /// Resolve a per-field byte-order override against the default.
    pub fn resolve_order(&self, field_order: Option<ByteOrder>) -> ByteOrder {
        field_order.unwrap_or(self.default_order)
    }

    /// Round the position up to the next multiple of `align_bits`.
    ///
    /// An alignment of 0 or 1 is a no-op. Padding must exist in the buffer:
    /// aligning past the end fails with `OutOfBounds`.
    pub fn align_to(&mut self, align_bits: u64) -> Result<()> {
        if align_bits > 1 {
            let aligned = self.pos_bits.div_ceil(align_bits) * align_bits;
            if aligned > self.len_bits {
                return Err(DecodeError::out_of_bounds("", self.byte_offset()));
            }
            self.pos_bits = aligned;
            if self.pos_bits % 8 == 0 {
                self.partial = None;
            }
        }
        Ok(())
    }

    /// Move the position forward to an absolute bit offset (packet padding skip).
    pub fn seek_to(&mut self, target_bits: u64) -> Result<()> {
        if target_bits < self.pos_bits || target_bits > self.len_bits {
            return Err(DecodeError::out_of_bounds("", self.byte_offset()));
        }
        self.pos_bits = target_bits;
        self.partial = None;
        Ok(())
    }

    /// Read `n` bits (n <= 64) in the given byte order and advance.
    ///
    /// A read may not switch byte order inside a partially consumed byte:
    /// the orders fill bytes from opposite ends, so the switch would alias
    /// bits of the preceding field. Byte-aligned positions reset this.
    pub fn read_bits(&mut self, n: u64, order: ByteOrder) -> Result<u64> {
        debug_assert!(n <= 64);
        if n == 0 {
            return Ok(0);
        }
        self.check_available(n)?;
        self.check_order(order)?;
        let value = if self.pos_bits % 8 == 0 && n % 8 == 0 {
            self.read_bytes_fast((n / 8) as usize, order)
        } else {
            match order {
                ByteOrder::LittleEndian => self.read_bits_le(n),
                ByteOrder::BigEndian => self.read_bits_be(n),
            }
        };
        self.pos_bits += n;
        self.partial = if self.pos_bits % 8 == 0 {
            None
        } else {
            Some((self.pos_bits / 8, order))
        };
        Ok(value)
    }

    /// Read `n` bits of arbitrary width and advance, returning the magnitude
    /// as big-endian bytes. Used for integers wider than 64 bits.
    pub fn read_bits_raw(&mut self, n: u64, order: ByteOrder) -> Result<Vec<u8>> {
        if n > 256 {
            return Err(DecodeError::schema(format!("integer size of {n} bits is unsupported")));
        }
        if n == 0 {
            return Ok(vec![0]);
        }
        self.check_available(n)?;
        let n_bytes = n.div_ceil(8) as usize;
        let mut out = vec![0u8; n_bytes];
        // Consume in <= 56-bit chunks so each chunk fits u64 with headroom.
        // Big-endian streams yield most significant chunks first; little-endian
        // streams yield least significant chunks first.
        let mut remaining = n;
        let mut chunks = Vec::new();
        while remaining > 0 {
            let take = remaining.min(56);
            let chunk = self.read_bits(take, order)?;
            chunks.push((chunk, take));
            remaining -= take;
        }
        let mut value = Wide::default();
        match order {
            ByteOrder::BigEndian => {
                // First chunk is most significant.
                for (chunk, take) in &chunks {
                    value.shl_or(*take as u32, *chunk);
                }
            }
            ByteOrder::LittleEndian => {
                // First chunk is least significant.
                let mut shift: u32 = 0;
                for (chunk, take) in &chunks {
                    value.or_shifted(shift, *chunk);
                    shift += *take as u32;
                }
            }
        }
        value.write_be(&mut out);
        Ok(value_trim(out))
    }

    fn check_available(&self, n: u64) -> Result<()> {
        if self.pos_bits + n > self.len_bits {
            return Err(DecodeError::out_of_bounds("", self.byte_offset()));
        }
        Ok(())
    }

    fn check_order(&self, order: ByteOrder) -> Result<()> {
        if self.pos_bits % 8 != 0
            && let Some((byte, prev)) = self.partial
            && byte == self.pos_bits / 8
            && prev != order
        {
            return Err(DecodeError::schema(format!(
                "byte order switches from {prev:?} to {order:?} inside byte {byte}"
            )));
        }
        Ok(())
    }

    fn read_bytes_fast(&self, n_bytes: usize, order: ByteOrder) -> u64 {
        let start = (self.pos_bits / 8) as usize;
        let bytes = &self.buf[start..start + n_bytes];
        let mut buf = [0u8; 8];
        match order {
            ByteOrder::LittleEndian => {
                buf[..n_bytes].copy_from_slice(bytes);
                u64::from_le_bytes(buf)
            }
            ByteOrder::BigEndian => {
                buf[8 - n_bytes..].copy_from_slice(bytes);
                u64::from_be_bytes(buf)
            }
        }
    }

    fn read_bits_le(&self, n: u64) -> u64 {
        let mut value = 0u64;
        for i in 0..n {
            let bit_pos = self.pos_bits + i;
            let byte = self.buf[(bit_pos / 8) as usize];
            let bit = (byte >> (bit_pos % 8)) & 1;
            value |= u64::from(bit) << i;
        }
        value
    }

    fn read_bits_be(&self, n: u64) -> u64 {
        let mut value = 0u64;
        for i in 0..n {
            let bit_pos = self.pos_bits + i;
            let byte = self.buf[(bit_pos / 8) as usize];
            let bit = (byte >> (7 - (bit_pos % 8))) & 1;
            value = (value << 1) | u64::from(bit);
        }
        value
    }

    /// Read `n_bytes` whole bytes at a byte-aligned position and advance.
    pub fn read_byte_slice(&mut self, n_bytes: usize) -> Result<&'a [u8]> {
        debug_assert_eq!(self.pos_bits % 8, 0);
        self.check_available((n_bytes as u64) * 8)?;
        let start = (self.pos_bits / 8) as usize;
        self.pos_bits += (n_bytes as u64) * 8;
        Ok(&self.buf[start..start + n_bytes])
    }

    /// Read one byte at a byte-aligned position and advance.
    pub fn read_byte(&mut self) -> Result<u8> {
        Ok(self.read_byte_slice(1)?[0])
    }
}

/// 256-bit accumulator for raw reads wider than 64 bits.
#[derive(Default)]
struct Wide {
    limbs: [u64; 4], // little-endian limb order
}

impl Wide {
    /// self = (self << shift) | chunk
    fn shl_or(&mut self, shift: u32, chunk: u64) {
        let mut carry = 0u64;
        for limb in self.limbs.iter_mut() {
            let wide = (u128::from(*limb) << shift) | u128::from(carry);
            *limb = wide as u64;
            carry = (wide >> 64) as u64;
        }
        self.limbs[0] |= chunk;
    }

    /// self |= chunk << shift
    fn or_shifted(&mut self, shift: u32, chunk: u64) {
        let limb = (shift / 64) as usize;
        let bit = shift % 64;
        self.limbs[limb] |= chunk << bit;
        if bit != 0 && limb + 1 < self.limbs.len() {
            self.limbs[limb + 1] |= chunk >> (64 - bit);
        }
    }

    /// Write the low `out.len()` bytes of the value in big-endian order.
    fn write_be(&self, out: &mut [u8]) {
        let n = out.len();
        for (i, slot) in out.iter_mut().enumerate() {
            let byte_index = n - 1 - i; // significance of this output position
            let limb = self.limbs[byte_index / 8];
            *slot = (limb >> ((byte_index % 8) * 8)) as u8;
        }
    }
}

/// Strip leading zero bytes, keeping at least one byte.
fn value_trim(bytes: Vec<u8>) -> Vec<u8> {
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len() - 1);
    bytes[first..].to_vec()
}
