use crate::err::{DeserializationError, DeserializationResult};
use crate::utils::bytes;
use crate::utils::utf16::decode_utf16le_lossy;

/// A lightweight cursor over an immutable byte slice.
///
/// Positions are offsets into `buf`. Token streams are decoded with `buf` set to the chunk
/// prefix ending at the stream's end, which keeps positions chunk-relative while making any
/// read past the end of the stream fail.
///
/// All reads are little-endian and advance the cursor on success only.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    #[inline]
    pub(crate) fn with_pos(buf: &'a [u8], pos: usize) -> DeserializationResult<Self> {
        // Allow pos == len (EOF), reject pos > len.
        let _ = bytes::slice_r(buf, pos, 0, "cursor.position")?;
        Ok(Self { buf, pos })
    }

    #[inline]
    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    #[inline]
    pub(crate) fn is_at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    #[inline]
    pub(crate) fn set_pos(&mut self, pos: usize, what: &'static str) -> DeserializationResult<()> {
        let _ = bytes::slice_r(self.buf, pos, 0, what)?;
        self.pos = pos;
        Ok(())
    }

    #[inline]
    pub(crate) fn advance(&mut self, n: usize, what: &'static str) -> DeserializationResult<()> {
        let _ = bytes::slice_r(self.buf, self.pos, n, what)?;
        self.pos += n;
        Ok(())
    }

    #[inline]
    pub(crate) fn take_bytes(
        &mut self,
        len: usize,
        what: &'static str,
    ) -> DeserializationResult<&'a [u8]> {
        let out = bytes::slice_r(self.buf, self.pos, len, what)?;
        self.pos += len;
        Ok(out)
    }

    #[inline]
    pub(crate) fn array<const N: usize>(
        &mut self,
        what: &'static str,
    ) -> DeserializationResult<[u8; N]> {
        let v = bytes::read_array::<N>(self.buf, self.pos).ok_or_else(|| {
            DeserializationError::Truncated {
                what,
                offset: self.pos as u64,
                need: N,
                have: self.buf.len().saturating_sub(self.pos),
            }
        })?;
        self.pos += N;
        Ok(v)
    }

    #[inline]
    pub(crate) fn u8_named(&mut self, what: &'static str) -> DeserializationResult<u8> {
        let [b] = self.array::<1>(what)?;
        Ok(b)
    }

    #[inline]
    pub(crate) fn u16_named(&mut self, what: &'static str) -> DeserializationResult<u16> {
        let v = bytes::read_u16_le_r(self.buf, self.pos, what)?;
        self.pos += 2;
        Ok(v)
    }

    #[inline]
    pub(crate) fn u32_named(&mut self, what: &'static str) -> DeserializationResult<u32> {
        let v = bytes::read_u32_le_r(self.buf, self.pos, what)?;
        self.pos += 4;
        Ok(v)
    }

    /// Read `char_count` UTF-16LE code units and decode them.
    pub(crate) fn utf16_by_char_count(
        &mut self,
        char_count: usize,
        what: &'static str,
    ) -> DeserializationResult<String> {
        let byte_len = char_count
            .checked_mul(2)
            .ok_or(DeserializationError::Truncated {
                what,
                offset: self.pos as u64,
                need: usize::MAX,
                have: self.buf.len().saturating_sub(self.pos),
            })?;
        let raw = self.take_bytes(byte_len, what)?;
        Ok(decode_utf16le_lossy(raw))
    }

    /// Read a `u16` character count followed by that many UTF-16LE code units.
    pub(crate) fn len_prefixed_utf16_string(
        &mut self,
        what: &'static str,
    ) -> DeserializationResult<String> {
        let char_count = self.u16_named(what)?;
        self.utf16_by_char_count(usize::from(char_count), what)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_reads_advance_only_on_success() {
        let buf = [0x2a, 0x2a, 0x00, 0x00, 0x10];
        let mut cursor = ByteCursor::with_pos(&buf, 0).unwrap();

        assert_eq!(cursor.u32_named("magic").unwrap(), 0x2a2a);
        assert_eq!(cursor.pos(), 4);

        assert!(cursor.u16_named("size").is_err());
        assert_eq!(cursor.pos(), 4);

        assert_eq!(cursor.u8_named("byte").unwrap(), 0x10);
        assert!(cursor.is_at_end());
    }

    #[test]
    fn test_cursor_rejects_positions_past_end() {
        let buf = [0_u8; 4];
        assert!(ByteCursor::with_pos(&buf, 4).is_ok());
        assert!(ByteCursor::with_pos(&buf, 5).is_err());

        let mut cursor = ByteCursor::with_pos(&buf, 0).unwrap();
        assert!(cursor.advance(5, "skip").is_err());
        assert_eq!(cursor.pos(), 0);
    }

    #[test]
    fn test_reads_len_prefixed_string() {
        let buf = [2, 0, b'h', 0, b'i', 0];
        let mut cursor = ByteCursor::with_pos(&buf, 0).unwrap();
        assert_eq!(cursor.len_prefixed_utf16_string("value").unwrap(), "hi");
        assert_eq!(cursor.pos(), buf.len());
    }
}
