use crate::ParserSettings;
use crate::err::{ChunkError, ChunkResult, DeserializationResult, Result};
use crate::model::xml_tree::XmlTree;
use crate::utils::{bytes, filetime_to_iso8601, filetime_to_timestamp};
use crate::xml_output::{self, OutputFormat};

use jiff::Timestamp;
use std::fmt;
use std::sync::Arc;

pub type RecordId = u64;

pub(crate) const EVTX_RECORD_HEADER_SIZE: usize = 24;
/// Header plus the trailing copy of the size.
pub(crate) const EVTX_RECORD_OVERHEAD: u32 = EVTX_RECORD_HEADER_SIZE as u32 + 4;

#[derive(Debug, Clone)]
pub struct EvtxRecord {
    pub chunk_offset: usize,
    pub event_record_id: RecordId,
    pub timestamp: Timestamp,
    pub tree: XmlTree,
    pub settings: Arc<ParserSettings>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvtxRecordHeader {
    pub data_size: u32,
    pub event_record_id: RecordId,
    /// Raw FILETIME, converted per record so that a bad value only costs that record.
    pub written: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedEvtxRecord<T> {
    pub event_record_id: RecordId,
    pub timestamp: Timestamp,
    pub data: T,
}

impl EvtxRecordHeader {
    /// Reads the 24-byte record header at `offset` of `chunk`.
    pub fn from_bytes(chunk: &[u8], offset: usize) -> ChunkResult<EvtxRecordHeader> {
        let raw = bytes::span_r(chunk, offset, EVTX_RECORD_HEADER_SIZE, "record header")?;

        let magic = [raw[0], raw[1], raw[2], raw[3]];
        if &magic != b"\x2a\x2a\x00\x00" {
            return Err(ChunkError::InvalidEvtxRecordHeaderMagic {
                offset: offset as u64,
                magic,
            });
        }

        let data_size = bytes::read_u32_le_r(raw, 4, "record size")?;
        if data_size <= EVTX_RECORD_OVERHEAD {
            return Err(ChunkError::RecordTooSmall {
                offset: offset as u64,
                size: data_size,
            });
        }

        let event_record_id = bytes::read_u64_le_r(raw, 8, "record id")?;
        let written = bytes::read_u64_le_r(raw, 16, "record timestamp")?;

        Ok(EvtxRecordHeader {
            data_size,
            event_record_id,
            written,
        })
    }

    pub fn timestamp(&self) -> DeserializationResult<Timestamp> {
        filetime_to_timestamp(self.written)
    }

    pub fn record_data_size(&self) -> u32 {
        // 24 - record header size
        // 4 - copy of size record size
        self.data_size - EVTX_RECORD_OVERHEAD
    }
}

impl fmt::Display for EvtxRecordHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ElfRec#{} size={} written={}",
            self.event_record_id,
            self.data_size,
            filetime_to_iso8601(self.written)
        )
    }
}

impl EvtxRecord {
    /// Consumes the record, serializing its tree in `format`.
    pub fn into_output(self, format: OutputFormat) -> Result<SerializedEvtxRecord<String>> {
        let data = xml_output::serialize(&self.tree, format)?;

        Ok(SerializedEvtxRecord {
            event_record_id: self.event_record_id,
            timestamp: self.timestamp,
            data,
        })
    }

    /// Consumes the record, serializing it in the format selected by its settings.
    pub fn into_xml(self) -> Result<SerializedEvtxRecord<String>> {
        let format = self.settings.get_output_format();
        self.into_output(format)
    }

    /// Text of `Event/System/EventID`, when the record has one.
    pub fn event_id(&self) -> Option<&str> {
        self.tree
            .find_path(&["Event", "System", "EventID"])
            .and_then(|node| self.tree.element(node).visible_text())
    }
}
