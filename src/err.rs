use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EvtxError>;
pub type DeserializationResult<T> = std::result::Result<T, DeserializationError>;
pub type ChunkResult<T> = std::result::Result<T, ChunkError>;

/// Errors raised while decoding bytes of a single chunk.
///
/// All offsets are relative to the start of the chunk.
#[derive(Debug, Error)]
pub enum DeserializationError {
    #[error("Offset {offset}: buffer too small for {what} (need {need} bytes, have {have})")]
    Truncated {
        what: &'static str,
        offset: u64,
        need: usize,
        have: usize,
    },

    #[error("Offset {offset}: {what} points outside of its enclosing span (len={len})")]
    OffsetOutOfBounds {
        what: &'static str,
        offset: u64,
        len: usize,
    },

    #[error("Offset {offset}: name has an invalid character count of {char_count}")]
    InvalidNameLength { offset: u64, char_count: u16 },

    #[error(
        "Offset {offset}: template instance marker `0C 01` was not found within the first {window} bytes"
    )]
    MissingTemplateMarker { offset: u64, window: usize },

    #[error("Offset {offset}: end of element without a matching open element")]
    ElementStackUnderflow { offset: u64 },

    #[error("Offset {offset}: nested BinXML exceeded the maximum depth of {limit}")]
    RecursionLimitExceeded { offset: u64, limit: usize },

    #[error("Offset {offset}: record expanded to more than {limit} tokens and template instances")]
    DecodeBudgetExceeded { offset: u64, limit: usize },

    #[error("Offset {offset}: substitution index {index} is out of range ({count} values)")]
    SubstitutionOutOfRange { offset: u64, index: u16, count: usize },

    #[error("Offset {offset}: failed to decode ansi string (used encoding scheme {encoding}), caused by: {message}")]
    FailedToDecodeAnsiString {
        encoding: &'static str,
        message: String,
        offset: u64,
    },

    #[error("Invalid date/time value")]
    InvalidDateTimeError,
}

impl DeserializationError {
    /// Chunk offset the error refers to, if it carries one.
    pub fn offset(&self) -> Option<u64> {
        match self {
            DeserializationError::Truncated { offset, .. }
            | DeserializationError::OffsetOutOfBounds { offset, .. }
            | DeserializationError::InvalidNameLength { offset, .. }
            | DeserializationError::MissingTemplateMarker { offset, .. }
            | DeserializationError::ElementStackUnderflow { offset }
            | DeserializationError::RecursionLimitExceeded { offset, .. }
            | DeserializationError::DecodeBudgetExceeded { offset, .. }
            | DeserializationError::SubstitutionOutOfRange { offset, .. }
            | DeserializationError::FailedToDecodeAnsiString { offset, .. } => Some(*offset),
            DeserializationError::InvalidDateTimeError => None,
        }
    }
}

/// Errors related to the framing of a single chunk.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("Invalid EVTX chunk header magic, expected `ElfChnk0`, found `{magic:2X?}`")]
    InvalidChunkMagic { magic: [u8; 8] },

    #[error(
        "Offset {offset}: invalid EVTX record header magic, expected `2a2a0000`, found `{magic:2X?}`"
    )]
    InvalidEvtxRecordHeaderMagic { offset: u64, magic: [u8; 4] },

    #[error("Offset {offset}: record declares size {size}, which cannot hold a record")]
    RecordTooSmall { offset: u64, size: u32 },

    #[error("Invalid chunk header checksum, expected `{expected:08x}`, found `{found:08x}`")]
    InvalidChunkHeaderChecksum { expected: u32, found: u32 },

    #[error("Invalid chunk data checksum, expected `{expected:08x}`, found `{found:08x}`")]
    InvalidChunkDataChecksum { expected: u32, found: u32 },

    #[error("Failed to read chunk structures, caused by: {0}")]
    FailedToReadChunkStructure(#[from] DeserializationError),
}

#[derive(Debug, Error)]
pub enum EvtxError {
    #[error("Offset {offset}: An I/O error has occurred while trying to read {what}: {source}")]
    FailedToRead {
        offset: u64,
        what: &'static str,
        source: io::Error,
    },

    #[error("Failed to open file {}: {source}", path.display())]
    FailedToOpenFile { source: io::Error, path: PathBuf },

    #[error("Invalid EVTX file header magic, expected `ElfFile0`, found `{magic:2X?}`")]
    InvalidEvtxFileHeaderMagic { magic: [u8; 8] },

    #[error("Reached EOF while trying to allocate chunk {chunk_number}")]
    IncompleteChunk { chunk_number: u64 },

    #[error("Failed to parse chunk number {chunk_number}, caused by:\n\t {source}")]
    FailedToParseChunk {
        chunk_number: u64,
        source: ChunkError,
    },

    #[error("Failed to parse record {record_id}, caused by:\n\t {source}")]
    FailedToDeserializeRecord {
        record_id: u64,
        source: DeserializationError,
    },

    #[error(transparent)]
    ChunkError(#[from] ChunkError),

    #[error(transparent)]
    DeserializationError(#[from] DeserializationError),

    #[error("Failed to serialize record: {0}")]
    SerializationError(#[from] std::fmt::Error),

    #[error("An I/O error has occurred: {0}")]
    Io(#[from] io::Error),
}

impl EvtxError {
    pub fn failed_to_read(what: &'static str, offset: u64) -> impl FnOnce(io::Error) -> Self {
        move |source| EvtxError::FailedToRead {
            offset,
            what,
            source,
        }
    }
}
