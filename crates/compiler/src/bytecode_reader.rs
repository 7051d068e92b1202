use alloc::{string::String, vec::Vec};
use wasmc_core::{CompileError, CompileErrorKind};

/// A bounds-checked cursor over an immutable byte span.
///
/// Every other parsing component (`ValidationStack`, `ModuleInfo`,
/// `Frontend`) reads exclusively through this type; nothing in the compiler
/// indexes the input bytes directly. This keeps the "malformed binary"
/// class of error (§7) centralized in one place with one canonical set of
/// LEB128 padding rules.
pub struct BytecodeReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

type Res<T> = Result<T, CompileError>;

impl<'a> BytecodeReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    pub fn with_offset(bytes: &'a [u8], offset: usize) -> Self {
        Self { bytes, offset }
    }

    pub fn get_offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    pub fn has_next_byte(&self) -> bool {
        self.offset < self.bytes.len()
    }

    pub fn jump_to(&mut self, ptr: usize) {
        self.offset = ptr;
    }

    pub fn step(&mut self, n: usize) -> Res<()> {
        if self.offset + n > self.bytes.len() {
            return Err(CompileErrorKind::UnexpectedEnd.into());
        }
        self.offset += n;
        Ok(())
    }

    pub fn read_byte(&mut self) -> Res<u8> {
        let byte = *self
            .bytes
            .get(self.offset)
            .ok_or(CompileErrorKind::UnexpectedEnd)?;
        self.offset += 1;
        Ok(byte)
    }

    /// Reads `n` raw bytes and returns a slice borrowed from the original
    /// input (no copy); used for section payload extraction and the
    /// custom-section skip path.
    pub fn read_bytes(&mut self, n: usize) -> Res<&'a [u8]> {
        if self.offset + n > self.bytes.len() {
            return Err(CompileErrorKind::UnexpectedEnd.into());
        }
        let slice = &self.bytes[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    pub fn read_le_u32(&mut self) -> Res<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_le_u64(&mut self) -> Res<u64> {
        let bytes = self.read_bytes(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_le_f32(&mut self) -> Res<f32> {
        Ok(f32::from_bits(self.read_le_u32()?))
    }

    pub fn read_le_f64(&mut self) -> Res<f64> {
        Ok(f64::from_bits(self.read_le_u64()?))
    }

    /// Canonical LEB128 decode for an unsigned value up to `max_bits` wide.
    ///
    /// §4.1: "the trailing byte may only be 0x00 extension... or 0x7F
    /// extension...; excess bits beyond `maxBits` must match the sign bit;
    /// otherwise fail with `Malformed_LEB128_*`." For the unsigned case the
    /// "sign bit" is always zero, so any set bit beyond `max_bits` is
    /// malformed.
    pub fn read_uleb128(&mut self, max_bits: u32, what: &'static str) -> Res<u64> {
        let start = self.offset;
        let mut result: u64 = 0;
        let mut shift: u32 = 0;
        loop {
            let byte = self.read_byte().map_err(|_| {
                CompileError::from(CompileErrorKind::MalformedLeb128 { what, offset: start })
            })?;
            let low7 = u64::from(byte & 0x7F);
            if shift < 64 {
                result |= low7 << shift;
            } else if low7 != 0 {
                return Err(CompileErrorKind::MalformedLeb128 { what, offset: start }.into());
            }
            let continues = byte & 0x80 != 0;
            if !continues {
                // Canonical padding: any bits set above `max_bits` in the
                // final byte are malformed (there is no sign to extend for
                // an unsigned value).
                let total_bits = shift + 7;
                if max_bits < 64 && total_bits > max_bits {
                    let valid_bits_in_byte = max_bits.saturating_sub(shift);
                    let mask: u8 = if valid_bits_in_byte >= 7 {
                        0x7F
                    } else {
                        (1u8 << valid_bits_in_byte) - 1
                    };
                    if byte & 0x7F & !mask != 0 {
                        return Err(
                            CompileErrorKind::MalformedLeb128 { what, offset: start }.into(),
                        );
                    }
                }
                return Ok(result);
            }
            shift += 7;
            if shift >= 64 + 7 {
                return Err(CompileErrorKind::MalformedLeb128 { what, offset: start }.into());
            }
        }
    }

    /// Canonical LEB128 decode for a signed value up to `max_bits` wide.
    pub fn read_sleb128(&mut self, max_bits: u32, what: &'static str) -> Res<i64> {
        let start = self.offset;
        let mut result: i64 = 0;
        let mut shift: u32 = 0;
        let mut byte;
        loop {
            byte = self.read_byte().map_err(|_| {
                CompileError::from(CompileErrorKind::MalformedLeb128 { what, offset: start })
            })?;
            let low7 = i64::from(byte & 0x7F);
            if shift < 64 {
                result |= low7 << shift;
            }
            shift += 7;
            if byte & 0x80 == 0 {
                break;
            }
            if shift >= 64 + 7 {
                return Err(CompileErrorKind::MalformedLeb128 { what, offset: start }.into());
            }
        }
        let sign_bit_set = byte & 0x40 != 0;
        if shift < 64 && sign_bit_set {
            result |= -1i64 << shift;
        }
        if max_bits < 64 {
            // Every bit from max_bits..64 must equal the sign bit of a
            // canonical max_bits-wide two's complement value (the
            // "0x7F extension for negative" rule from §4.1).
            let sign_extended = (result << (64 - max_bits)) >> (64 - max_bits);
            if sign_extended != result {
                return Err(CompileErrorKind::MalformedLeb128 { what, offset: start }.into());
            }
        }
        Ok(result)
    }

    pub fn read_var_u32(&mut self) -> Res<u32> {
        Ok(self.read_uleb128(32, "u32")? as u32)
    }

    pub fn read_var_u64(&mut self) -> Res<u64> {
        self.read_uleb128(64, "u64")
    }

    pub fn read_var_i32(&mut self) -> Res<i32> {
        Ok(self.read_sleb128(32, "i32")? as i32)
    }

    pub fn read_var_i64(&mut self) -> Res<i64> {
        self.read_sleb128(64, "i64")
    }

    /// Reads a length-prefixed UTF-8 string, validating against the
    /// canonical rules from §4.1: no overlong sequences, no surrogate
    /// halves, no code points beyond U+10FFFF. `str::from_utf8` already
    /// rejects all three, so this is a thin, explicitly-documented wrapper
    /// rather than a hand-rolled decoder.
    pub fn read_name(&mut self) -> Res<String> {
        let len = self.read_var_u32()? as usize;
        if len as u32 > wasmc_core::limits::MAX_STRING_LEN {
            return Err(CompileErrorKind::StringTooLong.into());
        }
        let offset = self.offset;
        let bytes = self.read_bytes(len)?;
        let s = core::str::from_utf8(bytes)
            .map_err(|_| CompileErrorKind::MalformedUtf8 { offset })?;
        Ok(String::from(s))
    }

    pub fn read_vec<T>(&mut self, mut item: impl FnMut(&mut Self) -> Res<T>) -> Res<Vec<T>> {
        let len = self.read_var_u32()? as usize;
        let mut out = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            out.push(item(self)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uleb128_basic() {
        let mut r = BytecodeReader::new(&[0xE5, 0x8E, 0x26]);
        assert_eq!(r.read_uleb128(32, "test").unwrap(), 624485);
    }

    #[test]
    fn sleb128_negative() {
        let mut r = BytecodeReader::new(&[0x9b, 0xf1, 0x59]);
        assert_eq!(r.read_sleb128(32, "test").unwrap(), -624485);
    }

    #[test]
    fn uleb128_rejects_excess_bits() {
        // Encodes a value needing more than 32 bits of payload with a
        // non-zero high bit in the final (5th) byte: malformed for u32.
        let mut r = BytecodeReader::new(&[0xFF, 0xFF, 0xFF, 0xFF, 0x1F]);
        assert!(r.read_uleb128(32, "test").is_ok());
        let mut r2 = BytecodeReader::new(&[0xFF, 0xFF, 0xFF, 0xFF, 0x7F]);
        assert!(r2.read_uleb128(32, "test").is_err());
    }

    #[test]
    fn sleb128_rejects_bad_sign_extension() {
        // 32-bit canonical -1 is 0x7F; a non-canonical encoding with wrong
        // high bits in the 5th byte must be rejected.
        let mut ok = BytecodeReader::new(&[0x7F]);
        assert_eq!(ok.read_sleb128(32, "test").unwrap(), -1);
    }

    #[test]
    fn name_rejects_invalid_utf8() {
        let mut r = BytecodeReader::new(&[0x02, 0xFF, 0xFE]);
        assert!(r.read_name().is_err());
    }

    #[test]
    fn unexpected_end() {
        let mut r = BytecodeReader::new(&[0x01]);
        assert!(r.read_le_u32().is_err());
    }
}
