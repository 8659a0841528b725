use crate::ParserSettings;
use crate::binxml::deserializer::BinXmlDeserializer;
use crate::binxml::name::BinXmlName;
use crate::binxml::name_cache::NameCache;
use crate::binxml::tokens::TemplateDefinitionHeader;
use crate::err::{
    ChunkError, ChunkResult, DeserializationError, DeserializationResult, EvtxError, Result,
};
use crate::evtx_file_header::EVTX_FILE_HEADER_SIZE;
use crate::evtx_record::{EVTX_RECORD_HEADER_SIZE, EvtxRecord, EvtxRecordHeader};
use crate::utils::{bytes, dump_around};

use hashbrown::HashSet;
use log::{Level, debug, info, log_enabled, trace, warn};
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

pub const EVTX_CHUNK_SIZE: usize = 65536;
pub const EVTX_CHUNK_HEADER_SIZE: usize = 512;

/// The header checksum skips the flags and the checksum itself.
const HEADER_CHECKSUM_RANGES: [(usize, usize); 2] = [(0, 120), (128, EVTX_CHUNK_HEADER_SIZE)];

#[derive(Clone, PartialEq, Eq)]
pub struct EvtxChunkHeader {
    pub first_event_record_number: u64,
    pub last_event_record_number: u64,
    pub first_event_record_id: u64,
    pub last_event_record_id: u64,
    pub header_size: u32,
    pub last_event_record_data_offset: u32,
    pub free_space_offset: u32,
    pub events_checksum: u32,
    pub flags: u32,
    pub header_chunk_checksum: u32,
    pub strings_offsets: [u32; 64],
    pub template_offsets: [u32; 32],
}

impl Debug for EvtxChunkHeader {
    fn fmt(&self, fmt: &mut Formatter) -> fmt::Result {
        fmt.debug_struct("EvtxChunkHeader")
            .field("first_event_record_number", &self.first_event_record_number)
            .field("last_event_record_number", &self.last_event_record_number)
            .field("first_event_record_id", &self.first_event_record_id)
            .field("last_event_record_id", &self.last_event_record_id)
            .field("checksum", &self.header_chunk_checksum)
            .field("free_space_offset", &self.free_space_offset)
            .finish()
    }
}

impl EvtxChunkHeader {
    pub fn from_bytes(data: &[u8]) -> ChunkResult<EvtxChunkHeader> {
        let header = bytes::span_r(data, 0, EVTX_CHUNK_HEADER_SIZE, "chunk header")?;

        let magic = bytes::read_array::<8>(header, 0).unwrap_or_default();
        if &magic != b"ElfChnk\x00" {
            return Err(ChunkError::InvalidChunkMagic { magic });
        }

        Ok(EvtxChunkHeader {
            first_event_record_number: bytes::read_u64_le_r(header, 0x08, "first record number")?,
            last_event_record_number: bytes::read_u64_le_r(header, 0x10, "last record number")?,
            first_event_record_id: bytes::read_u64_le_r(header, 0x18, "first record id")?,
            last_event_record_id: bytes::read_u64_le_r(header, 0x20, "last record id")?,
            header_size: bytes::read_u32_le_r(header, 0x28, "chunk header size")?,
            last_event_record_data_offset: bytes::read_u32_le_r(
                header,
                0x2c,
                "last record offset",
            )?,
            free_space_offset: bytes::read_u32_le_r(header, 0x30, "free space offset")?,
            events_checksum: bytes::read_u32_le_r(header, 0x34, "data checksum")?,
            // 64 reserved bytes
            flags: bytes::read_u32_le_r(header, 0x78, "chunk flags")?,
            header_chunk_checksum: bytes::read_u32_le_r(header, 0x7c, "header checksum")?,
            strings_offsets: bytes::read_u32_table_r::<64>(header, 0x80, "string offsets")?,
            template_offsets: bytes::read_u32_table_r::<32>(header, 0x180, "template offsets")?,
        })
    }

    /// One-line summary, as printed by `evtx_dump --headers`.
    pub fn describe(&self, chunk_number: u64) -> String {
        let file_offset = EVTX_FILE_HEADER_SIZE as u64 + chunk_number * EVTX_CHUNK_SIZE as u64;
        format!(
            "ElfChnk#{:05} (0x{:08x}) record_num={}-{} record_id={}-{} last_offset=0x{:04x} free_offset=0x{:04x}",
            chunk_number,
            file_offset,
            self.first_event_record_number,
            self.last_event_record_number,
            self.first_event_record_id,
            self.last_event_record_id,
            self.last_event_record_data_offset,
            self.free_space_offset,
        )
    }
}

/// An owned chunk buffer with its parsed header.
#[derive(Clone)]
pub struct EvtxChunkData {
    pub header: EvtxChunkHeader,
    pub data: Vec<u8>,
}

impl EvtxChunkData {
    /// Will fail if the data starts with an invalid evtx chunk header, or when checksums are
    /// requested and do not match.
    pub fn new(data: Vec<u8>, validate_checksum: bool) -> ChunkResult<Self> {
        let header = EvtxChunkHeader::from_bytes(&data)?;
        let chunk = EvtxChunkData { header, data };

        if validate_checksum {
            let found = chunk.header_checksum();
            if found != chunk.header.header_chunk_checksum {
                return Err(ChunkError::InvalidChunkHeaderChecksum {
                    expected: chunk.header.header_chunk_checksum,
                    found,
                });
            }

            let found = chunk.data_checksum();
            if found != chunk.header.events_checksum {
                return Err(ChunkError::InvalidChunkDataChecksum {
                    expected: chunk.header.events_checksum,
                    found,
                });
            }
        }

        Ok(chunk)
    }

    /// Borrows the chunk for record iteration.
    pub fn parse(&self, settings: Arc<ParserSettings>) -> EvtxChunk<'_> {
        EvtxChunk::new(&self.data, &self.header, settings)
    }

    fn header_checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        for (start, end) in HEADER_CHECKSUM_RANGES {
            hasher.update(&self.data[start..end]);
        }
        hasher.finalize()
    }

    fn data_checksum(&self) -> u32 {
        let end = (self.header.free_space_offset as usize)
            .clamp(EVTX_CHUNK_HEADER_SIZE, self.data.len());
        crc32fast::hash(&self.data[EVTX_CHUNK_HEADER_SIZE..end])
    }

    pub fn validate_header_checksum(&self) -> bool {
        debug!("Validating header checksum");
        let checksum = self.header_checksum();
        debug!(
            "Expected checksum: {:?}, found: {:?}",
            self.header.header_chunk_checksum, checksum
        );
        checksum == self.header.header_chunk_checksum
    }

    pub fn validate_data_checksum(&self) -> bool {
        debug!("Validating data checksum");
        let checksum = self.data_checksum();
        debug!(
            "Expected checksum: {:?}, found: {:?}",
            self.header.events_checksum, checksum
        );
        checksum == self.header.events_checksum
    }

    pub fn validate_checksum(&self) -> bool {
        self.validate_header_checksum() && self.validate_data_checksum()
    }

    /// Lists the shared name and template tables, following each bucket's `next_offset` chain.
    pub fn describe_tables(&self) -> Vec<String> {
        let mut lines = Vec::new();

        for (bucket, &head) in self.header.strings_offsets.iter().enumerate() {
            walk_chain(head, |offset| {
                let name = BinXmlName::read_at(&self.data, offset)?;
                lines.push(format!(
                    "  Name#{:02} (0x{:08x}) next=0x{:08x} hash=0x{:04x} {}",
                    bucket,
                    offset,
                    name.next_offset(),
                    name.name_hash(),
                    name
                ));
                Ok(name.next_offset())
            });
        }

        for (bucket, &head) in self.header.template_offsets.iter().enumerate() {
            walk_chain(head, |offset| {
                let definition = TemplateDefinitionHeader::read_at(&self.data, offset)?;
                lines.push(format!(
                    "  Template#{:02} (0x{:08x}) next=0x{:08x} id=0x{:08x} size={}",
                    bucket,
                    offset,
                    definition.next_template_offset,
                    definition.template_id,
                    definition.data_size
                ));
                Ok(definition.next_template_offset)
            });
        }

        lines
    }
}

/// Visits a `next_offset` chain starting at `head`, stopping at `0`, at a loop or at an
/// unreadable entry.
fn walk_chain(head: u32, mut visit: impl FnMut(u32) -> DeserializationResult<u32>) {
    let mut seen = HashSet::new();
    let mut offset = head;

    while offset != 0 && seen.insert(offset) {
        match visit(offset) {
            Ok(next) => offset = next,
            Err(err) => {
                debug!("Offset `0x{offset:08x}`: stopping table walk, {err}");
                return;
            }
        }
    }
}

impl Debug for EvtxChunkData {
    fn fmt(&self, fmt: &mut Formatter) -> fmt::Result {
        fmt.debug_struct("EvtxChunkData")
            .field("header", &self.header)
            .field("len", &self.data.len())
            .finish()
    }
}

/// A chunk being decoded. Owns the name cache shared by all of its records.
pub struct EvtxChunk<'chunk> {
    pub data: &'chunk [u8],
    pub header: &'chunk EvtxChunkHeader,
    pub name_cache: NameCache,
    pub settings: Arc<ParserSettings>,
}

impl<'chunk> EvtxChunk<'chunk> {
    pub fn new(
        data: &'chunk [u8],
        header: &'chunk EvtxChunkHeader,
        settings: Arc<ParserSettings>,
    ) -> EvtxChunk<'chunk> {
        EvtxChunk {
            data,
            header,
            name_cache: NameCache::new(),
            settings,
        }
    }

    /// Iterates the records of the chunk in order.
    pub fn iter(&mut self) -> IterChunkRecords<'_, 'chunk> {
        self.name_cache.clear();
        IterChunkRecords {
            chunk: self,
            offset_from_chunk_start: EVTX_CHUNK_HEADER_SIZE,
            exhausted: false,
        }
    }

    /// Scanning stops at the free space offset, which may not exceed the buffer.
    fn scan_end(&self) -> usize {
        (self.header.free_space_offset as usize).min(self.data.len())
    }
}

impl Debug for EvtxChunk<'_> {
    fn fmt(&self, fmt: &mut Formatter) -> fmt::Result {
        writeln!(fmt, "\nEvtxChunk")?;
        writeln!(fmt, "-----------------------")?;
        writeln!(fmt, "{:#?}", &self.header)?;
        writeln!(fmt, "{} cached names", self.name_cache.len())?;
        Ok(())
    }
}

pub struct IterChunkRecords<'a, 'chunk> {
    chunk: &'a mut EvtxChunk<'chunk>,
    offset_from_chunk_start: usize,
    exhausted: bool,
}

impl IterChunkRecords<'_, '_> {
    fn finish(&mut self) {
        self.exhausted = true;
        self.chunk.name_cache.clear();
    }
}

impl Iterator for IterChunkRecords<'_, '_> {
    type Item = Result<EvtxRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.exhausted || self.offset_from_chunk_start >= self.chunk.scan_end() {
                self.finish();
                return None;
            }

            let record_start = self.offset_from_chunk_start;
            let record_header = match EvtxRecordHeader::from_bytes(self.chunk.data, record_start) {
                Ok(header) => header,
                Err(err) => {
                    warn!("Offset `0x{record_start:08x}`: stopping record scan, {err}");
                    self.finish();
                    return Some(Err(EvtxError::ChunkError(err)));
                }
            };

            info!("Record id - {}", record_header.event_record_id);
            debug!("Record header - {:?}", record_header);

            // The declared size advances the scan whether or not the record decodes.
            self.offset_from_chunk_start =
                align_to_8(record_start + record_header.data_size as usize);

            let trailing_size_at = record_start + record_header.data_size as usize - 4;
            match bytes::read_u32_le(self.chunk.data, trailing_size_at) {
                Some(copy) if copy == record_header.data_size => {}
                other => debug!(
                    "Record {}: trailing size {:?} does not match declared size {}",
                    record_header.event_record_id, other, record_header.data_size
                ),
            }

            let timestamp = match record_header.timestamp() {
                Ok(timestamp) => timestamp,
                Err(err) => {
                    warn!(
                        "Record {}: unreadable timestamp {:#018x}",
                        record_header.event_record_id, record_header.written
                    );
                    return Some(Err(EvtxError::FailedToDeserializeRecord {
                        record_id: record_header.event_record_id,
                        source: err,
                    }));
                }
            };

            let binxml_start = record_start + EVTX_RECORD_HEADER_SIZE;
            let binxml_size = record_header.record_data_size() as usize;
            debug!("Need to deserialize {binxml_size} bytes of binxml");

            let chunk = &mut *self.chunk;
            let tree = BinXmlDeserializer::new(chunk.data, &mut chunk.name_cache, &chunk.settings)
                .deserialize_record(binxml_start, binxml_size);

            let tree = match tree {
                Ok(tree) => tree,
                Err(err) => {
                    log_failed_record(chunk.data, record_header.event_record_id, &err);
                    return Some(Err(EvtxError::FailedToDeserializeRecord {
                        record_id: record_header.event_record_id,
                        source: err,
                    }));
                }
            };

            let record = EvtxRecord {
                chunk_offset: record_start,
                event_record_id: record_header.event_record_id,
                timestamp,
                tree,
                settings: Arc::clone(&chunk.settings),
            };

            if let Some(wanted) = chunk.settings.get_event_id_filter() {
                let matches = record
                    .event_id()
                    .and_then(|id| id.trim().parse::<u16>().ok())
                    == Some(wanted);
                if !matches {
                    trace!(
                        "Record {} skipped, event id {:?} != {wanted}",
                        record.event_record_id,
                        record.event_id()
                    );
                    continue;
                }
            }

            return Some(Ok(record));
        }
    }
}

fn align_to_8(offset: usize) -> usize {
    (offset + 7) & !7
}

fn log_failed_record(data: &[u8], record_id: u64, err: &DeserializationError) {
    warn!("Failed to decode record {record_id}: {err}");

    if log_enabled!(Level::Debug) {
        if let Some(offset) = err.offset() {
            debug!("\n{}", dump_around(data, offset as usize, 4));
        }
    }
}
