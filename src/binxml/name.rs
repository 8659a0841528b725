use std::fmt;

use log::trace;

use crate::ChunkOffset;
use crate::binxml::name_cache::NameCache;
use crate::err::{DeserializationError, DeserializationResult as Result};
use crate::utils::{ByteCursor, bytes, decode_utf16le_lossy};

/// Size of `next_offset:u32, hash:u16, char_count:u16`.
const NAME_HEADER_SIZE: usize = 8;

/// An element or attribute name stored in the chunk.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct BinXmlName {
    name: String,
    char_count: u16,
    next_offset: ChunkOffset,
    hash: u16,
}

impl BinXmlName {
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Next name in the same bucket of the chunk's shared name table, `0` ends the chain.
    pub fn next_offset(&self) -> ChunkOffset {
        self.next_offset
    }

    pub fn name_hash(&self) -> u16 {
        self.hash
    }

    /// Number of bytes the name occupies when written inline:
    /// header, UTF-16 code units and the NUL terminator.
    pub fn body_size(&self) -> usize {
        NAME_HEADER_SIZE + usize::from(self.char_count) * 2 + 2
    }

    /// Reads a name definition at `offset` without touching any cursor.
    pub(crate) fn read_at(chunk: &[u8], offset: ChunkOffset) -> Result<BinXmlName> {
        let start = offset as usize;
        let header = bytes::span_r(chunk, start, NAME_HEADER_SIZE, "name header")?;

        let next_offset = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let hash = u16::from_le_bytes([header[4], header[5]]);
        let char_count = u16::from_le_bytes([header[6], header[7]]);

        if char_count == 0 {
            return Err(DeserializationError::InvalidNameLength {
                offset: u64::from(offset),
                char_count,
            });
        }

        let text_len = usize::from(char_count) * 2;
        // The terminator must fit too.
        let body = bytes::span_r(chunk, start + NAME_HEADER_SIZE, text_len + 2, "name")?;

        Ok(BinXmlName {
            name: decode_utf16le_lossy(&body[..text_len]),
            char_count,
            next_offset,
            hash,
        })
    }

    /// Reads a `name_offset` field at the cursor and resolves the name it points to.
    ///
    /// When the offset equals the cursor position right after the field, the name body
    /// follows inline and is consumed; the offset is then registered in `cache`. Otherwise
    /// the name was defined elsewhere in the chunk and the cursor does not move further.
    pub(crate) fn from_binxml_stream(
        cursor: &mut ByteCursor<'_>,
        chunk: &[u8],
        cache: &mut NameCache,
    ) -> Result<BinXmlName> {
        let name_offset = cursor.u32_named("name offset")?;

        if cursor.pos() == name_offset as usize {
            if let Some(cached) = cache.get(name_offset) {
                // Same inline body decoded again (a shared template body).
                let name = cached.clone();
                cursor.advance(name.body_size(), "inline name")?;
                return Ok(name);
            }

            let name = BinXmlName::read_at(chunk, name_offset)?;
            cursor.advance(name.body_size(), "inline name")?;
            trace!("Offset `0x{name_offset:08x}`: inline name `{}`", name.name);
            cache.add(name_offset, name.clone());
            return Ok(name);
        }

        match cache.get(name_offset) {
            Some(cached) => Ok(cached.clone()),
            None => BinXmlName::read_at(chunk, name_offset),
        }
    }
}

impl fmt::Display for BinXmlName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl From<BinXmlName> for String {
    fn from(name: BinXmlName) -> Self {
        name.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binxml::test_utils::name_body;
    use pretty_assertions::assert_eq;

    /// `[u32 offset][body]` at position 0x20 of a zeroed buffer.
    fn inline_name_at_0x20(name: &str) -> Vec<u8> {
        let mut chunk = vec![0_u8; 0x20];
        chunk.extend_from_slice(&0x24_u32.to_le_bytes());
        chunk.extend_from_slice(&name_body(name));
        chunk
    }

    #[test]
    fn test_inline_name_is_consumed_once() {
        let mut chunk = inline_name_at_0x20("EventData");
        let reference_at = chunk.len();
        chunk.extend_from_slice(&0x24_u32.to_le_bytes());
        let mut cache = NameCache::new();

        let mut cursor = ByteCursor::with_pos(&chunk, 0x20).unwrap();
        let first = BinXmlName::from_binxml_stream(&mut cursor, &chunk, &mut cache).unwrap();
        assert_eq!(first.as_str(), "EventData");
        assert_eq!(cursor.pos(), reference_at);
        assert!(cache.is_cached(0x24));

        let second = BinXmlName::from_binxml_stream(&mut cursor, &chunk, &mut cache).unwrap();
        assert_eq!(second, first);
        // Only the 4-byte offset was read.
        assert_eq!(cursor.pos(), reference_at + 4);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cached_inline_body_is_skipped() {
        let chunk = inline_name_at_0x20("Data");
        let mut cache = NameCache::new();

        for _ in 0..2 {
            let mut cursor = ByteCursor::with_pos(&chunk, 0x20).unwrap();
            let name = BinXmlName::from_binxml_stream(&mut cursor, &chunk, &mut cache).unwrap();
            assert_eq!(name.as_str(), "Data");
            assert_eq!(cursor.pos(), chunk.len());
        }
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_uncached_remote_name_is_resolved_without_moving() {
        let mut chunk = name_body("System");
        let at = chunk.len();
        chunk.extend_from_slice(&0_u32.to_le_bytes());
        let mut cache = NameCache::new();

        let mut cursor = ByteCursor::with_pos(&chunk, at).unwrap();
        let name = BinXmlName::from_binxml_stream(&mut cursor, &chunk, &mut cache).unwrap();
        assert_eq!(name.as_str(), "System");
        assert_eq!(cursor.pos(), at + 4);
        assert!(!cache.is_cached(0));
    }

    #[test]
    fn test_rejects_zero_length_and_out_of_bounds_names() {
        let mut chunk = name_body("A");
        chunk[6] = 0;
        assert!(matches!(
            BinXmlName::read_at(&chunk, 0),
            Err(DeserializationError::InvalidNameLength { .. })
        ));

        let mut chunk = name_body("A");
        chunk[6] = 0xff;
        assert!(matches!(
            BinXmlName::read_at(&chunk, 0),
            Err(DeserializationError::OffsetOutOfBounds { .. })
        ));

        assert!(matches!(
            BinXmlName::read_at(&chunk, 0xffff_fff0),
            Err(DeserializationError::OffsetOutOfBounds { .. })
        ));
    }
}
