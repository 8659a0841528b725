use hashbrown::HashMap;

use crate::ChunkOffset;
use crate::binxml::name::BinXmlName;

/// Names whose inline bodies were already consumed in the current chunk.
///
/// After a name body has been read at its canonical position, later references carry only
/// the 4-byte offset. The cache lives exactly as long as one chunk is being decoded and must
/// be cleared when entering and leaving a chunk.
#[derive(Debug, Default)]
pub struct NameCache {
    names: HashMap<ChunkOffset, BinXmlName>,
}

impl NameCache {
    pub fn new() -> Self {
        NameCache::default()
    }

    pub fn is_cached(&self, offset: ChunkOffset) -> bool {
        self.names.contains_key(&offset)
    }

    /// Registers `offset`. Registering an offset twice keeps the first name.
    pub fn add(&mut self, offset: ChunkOffset, name: BinXmlName) {
        self.names.entry(offset).or_insert(name);
    }

    pub fn get(&self, offset: ChunkOffset) -> Option<&BinXmlName> {
        self.names.get(&offset)
    }

    pub fn clear(&mut self) {
        self.names.clear();
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
