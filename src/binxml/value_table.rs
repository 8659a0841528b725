use log::trace;

use crate::ChunkOffset;
use crate::binxml::value_variant::BinXmlValueType;
use crate::err::{DeserializationError, DeserializationResult};
use crate::utils::bytes;

/// One substitution slot of a template instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueDescriptor {
    pub size: u16,
    pub value_type: BinXmlValueType,
    /// Chunk offset of the first byte of the value.
    pub offset: ChunkOffset,
}

impl ValueDescriptor {
    /// Borrows the value bytes. Bounds were validated when the table was parsed.
    pub fn bytes<'a>(&self, chunk: &'a [u8]) -> &'a [u8] {
        let start = self.offset as usize;
        chunk
            .get(start..start + usize::from(self.size))
            .unwrap_or_default()
    }

    /// A null slot, or a slot with no payload.
    pub fn is_empty(&self) -> bool {
        self.value_type.is_null() || self.size == 0
    }
}

/// The substitution array that follows a template instance.
///
/// Layout: `count:u32`, then `count` descriptors of `size:u16, type:u16`, then the values
/// back to back in descriptor order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueTable {
    slots: Vec<ValueDescriptor>,
    end: usize,
}

impl ValueTable {
    pub fn parse(chunk: &[u8], offset: usize) -> DeserializationResult<ValueTable> {
        let out_of_bounds = |what| DeserializationError::OffsetOutOfBounds {
            what,
            offset: offset as u64,
            len: chunk.len(),
        };

        let count = bytes::read_u32_le(chunk, offset).ok_or(out_of_bounds("value table"))? as usize;

        let descriptors_len = count
            .checked_mul(4)
            .ok_or(out_of_bounds("value descriptors"))?;
        let descriptors = bytes::span_r(chunk, offset + 4, descriptors_len, "value descriptors")?;

        let mut value_offset = offset + 4 + descriptors_len;
        let mut slots = Vec::with_capacity(count);

        for raw in descriptors.chunks_exact(4) {
            let size = u16::from_le_bytes([raw[0], raw[1]]);
            // Only the low byte of the type carries meaning.
            let value_type = BinXmlValueType::from_u8(raw[2]);

            slots.push(ValueDescriptor {
                size,
                value_type,
                offset: value_offset as ChunkOffset,
            });
            value_offset += usize::from(size);
        }

        if value_offset > chunk.len() {
            return Err(out_of_bounds("value data"));
        }

        trace!(
            "Offset `0x{offset:08x}`: value table with {count} values ending at 0x{value_offset:08x}"
        );

        Ok(ValueTable {
            slots,
            end: value_offset,
        })
    }

    pub fn get(&self, index: u16) -> Option<&ValueDescriptor> {
        self.slots.get(usize::from(index))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Chunk offset right past the last value.
    pub fn end(&self) -> usize {
        self.end
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValueDescriptor> {
        self.slots.iter()
    }
}
