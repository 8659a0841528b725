#![deny(unused_must_use)]
#![forbid(unsafe_code)]

pub use evtx_chunk::{EvtxChunk, EvtxChunkData, EvtxChunkHeader, IterChunkRecords};
pub use evtx_file_header::{EvtxFileHeader, HeaderFlags};
pub use evtx_parser::{EvtxParser, IterChunks, ParserSettings, ReadSeek};
pub use evtx_record::{EvtxRecord, EvtxRecordHeader, RecordId, SerializedEvtxRecord};
pub use xml_output::OutputFormat;

pub use binxml::deserializer::decode_fragment;
pub use model::xml_tree::{NodeId, XmlAttribute, XmlElement, XmlTree};

pub mod binxml;
pub mod err;
pub mod model;
pub mod xml_output;

mod evtx_chunk;
mod evtx_file_header;
mod evtx_parser;
mod evtx_record;
mod utils;

mod ntsid;

pub mod messages;

pub use ntsid::Sid;
pub use utils::{dump_around, filetime_to_iso8601, format_timestamp, hexdump};

/// Offset relative to the start of a chunk.
pub type ChunkOffset = u32;

// For tests, we only initialize logging once.
#[cfg(test)]
use std::sync::Once;

#[cfg(test)]
static LOGGER_INIT: Once = Once::new();

// Rust runs the tests concurrently, so unless we synchronize logging access
// it will crash when attempting to run `cargo test` with some logging facilities.
#[cfg(test)]
pub fn ensure_env_logger_initialized() {
    use std::io::Write;

    LOGGER_INIT.call_once(|| {
        let mut builder = env_logger::Builder::from_default_env();
        builder
            .format(|buf, record| writeln!(buf, "[{}] - {}", record.level(), record.args()))
            .init();
    });
}
