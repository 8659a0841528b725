use crate::err::{EvtxError, Result};
use crate::evtx_chunk::{EVTX_CHUNK_SIZE, EvtxChunkData};
use crate::evtx_file_header::{EVTX_FILE_HEADER_SIZE, EvtxFileHeader};
use crate::evtx_record::{EvtxRecord, SerializedEvtxRecord};
use crate::xml_output::OutputFormat;

#[cfg(feature = "multithreading")]
use rayon::prelude::*;

use encoding::EncodingRef;
use encoding::all::WINDOWS_1252;
use log::{debug, error, info, trace, warn};

use std::cmp::max;
use std::fmt;
use std::fmt::Debug;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

/// Default bound on nested BinXML (templates inside substitutions).
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 32;
/// Tokens and template instantiations a single record may expand to.
pub const DEFAULT_MAX_DECODE_STEPS: usize = 1 << 18;

// Inspired by https://github.com/mitsuhiko/unbox/blob/master/src/formats/cab.rs
pub trait ReadSeek: Read + Seek {
    fn tell(&mut self) -> io::Result<u64> {
        self.stream_position()
    }
}

impl<T: Read + Seek> ReadSeek for T {}

pub struct EvtxParser<T: ReadSeek> {
    data: T,
    header: EvtxFileHeader,
    config: Arc<ParserSettings>,
}

impl<T: ReadSeek> Debug for EvtxParser<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("EvtxParser")
            .field("header", &self.header)
            .field("config", &self.config)
            .finish()
    }
}

#[derive(Clone)]
pub struct ParserSettings {
    /// Controls the number of threads used for parsing chunks concurrently.
    num_threads: usize,
    /// If enabled, chunks with bad checksums will be skipped.
    validate_checksums: bool,
    output_format: OutputFormat,
    /// Only yield records whose `Event/System/EventID` equals this value.
    event_id_filter: Option<u16>,
    max_recursion_depth: usize,
    /// Bounds the work spent on one record, since templates may instantiate each other repeatedly.
    max_decode_steps: usize,
    /// Codec used to decode ansi strings.
    ansi_codec: EncodingRef,
    /// Replace `%%NNNN` string values with their message text.
    resolve_messages: bool,
}

impl Debug for ParserSettings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ParserSettings")
            .field("num_threads", &self.num_threads)
            .field("validate_checksums", &self.validate_checksums)
            .field("output_format", &self.output_format)
            .field("event_id_filter", &self.event_id_filter)
            .field("max_recursion_depth", &self.max_recursion_depth)
            .field("max_decode_steps", &self.max_decode_steps)
            .field("ansi_codec", &self.ansi_codec.name())
            .field("resolve_messages", &self.resolve_messages)
            .finish()
    }
}

impl PartialEq for ParserSettings {
    fn eq(&self, other: &ParserSettings) -> bool {
        self.ansi_codec.name() == other.ansi_codec.name()
            && self.num_threads == other.num_threads
            && self.validate_checksums == other.validate_checksums
            && self.output_format == other.output_format
            && self.event_id_filter == other.event_id_filter
            && self.max_recursion_depth == other.max_recursion_depth
            && self.max_decode_steps == other.max_decode_steps
            && self.resolve_messages == other.resolve_messages
    }
}

impl Default for ParserSettings {
    fn default() -> Self {
        ParserSettings {
            num_threads: 0,
            validate_checksums: false,
            output_format: OutputFormat::default(),
            event_id_filter: None,
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            max_decode_steps: DEFAULT_MAX_DECODE_STEPS,
            ansi_codec: WINDOWS_1252,
            resolve_messages: false,
        }
    }
}

impl ParserSettings {
    pub fn new() -> Self {
        ParserSettings::default()
    }

    /// Sets the number of worker threads.
    /// `0` will let rayon decide.
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = if cfg!(feature = "multithreading") {
            num_threads
        } else {
            if num_threads > 1 {
                warn!(
                    "Setting num_threads has no effect when compiling without multithreading support."
                );
            }
            1
        };

        self
    }

    pub fn validate_checksums(mut self, validate_checksums: bool) -> Self {
        self.validate_checksums = validate_checksums;
        self
    }

    pub fn output_format(mut self, output_format: OutputFormat) -> Self {
        self.output_format = output_format;
        self
    }

    pub fn event_id_filter(mut self, event_id: Option<u16>) -> Self {
        self.event_id_filter = event_id;
        self
    }

    pub fn max_recursion_depth(mut self, depth: usize) -> Self {
        self.max_recursion_depth = depth;
        self
    }

    pub fn max_decode_steps(mut self, steps: usize) -> Self {
        self.max_decode_steps = steps;
        self
    }

    pub fn ansi_codec(mut self, ansi_codec: EncodingRef) -> Self {
        self.ansi_codec = ansi_codec;
        self
    }

    pub fn resolve_messages(mut self, resolve_messages: bool) -> Self {
        self.resolve_messages = resolve_messages;
        self
    }

    pub fn get_num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn should_validate_checksums(&self) -> bool {
        self.validate_checksums
    }

    pub fn get_output_format(&self) -> OutputFormat {
        self.output_format
    }

    pub fn get_event_id_filter(&self) -> Option<u16> {
        self.event_id_filter
    }

    pub fn get_max_recursion_depth(&self) -> usize {
        self.max_recursion_depth
    }

    pub fn get_max_decode_steps(&self) -> usize {
        self.max_decode_steps
    }

    pub fn get_ansi_codec(&self) -> EncodingRef {
        self.ansi_codec
    }

    pub fn should_resolve_messages(&self) -> bool {
        self.resolve_messages
    }
}

impl EvtxParser<File> {
    /// Attempts to load an evtx file from a given path, will fail if the path does not exist,
    /// or if the file header is invalid.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let f = File::open(path).map_err(|source| EvtxError::FailedToOpenFile {
            source,
            path: path.to_path_buf(),
        })?;

        Self::from_read_seek(f)
    }
}

impl EvtxParser<Cursor<Vec<u8>>> {
    /// Attempts to load an evtx file from a given buffer.
    pub fn from_buffer(buffer: Vec<u8>) -> Result<Self> {
        Self::from_read_seek(Cursor::new(buffer))
    }
}

impl<T: ReadSeek> EvtxParser<T> {
    pub fn from_read_seek(mut read_seek: T) -> Result<Self> {
        let mut header_block = Vec::with_capacity(EVTX_FILE_HEADER_SIZE);
        (&mut read_seek)
            .take(EVTX_FILE_HEADER_SIZE as u64)
            .read_to_end(&mut header_block)
            .map_err(EvtxError::failed_to_read("file header", 0))?;

        let header = EvtxFileHeader::from_stream(&mut Cursor::new(&header_block))?;
        debug!("EVTX Header: {:#?}", header);

        if !header.validate_checksum(&header_block) {
            debug!("File header checksum does not match, the file was probably not closed cleanly");
        }

        Ok(EvtxParser {
            data: read_seek,
            header,
            config: Arc::new(ParserSettings::default()),
        })
    }

    pub fn with_configuration(mut self, configuration: ParserSettings) -> Self {
        self.config = Arc::new(configuration);
        self
    }

    pub fn header(&self) -> &EvtxFileHeader {
        &self.header
    }

    /// Reads chunk `chunk_number`.
    ///
    /// Returns `Ok(None)` when the stream ends exactly at the chunk boundary.
    pub fn allocate_chunk(
        data: &mut T,
        chunk_number: u16,
        validate_checksum: bool,
    ) -> Result<Option<EvtxChunkData>> {
        let chunk_offset =
            EVTX_FILE_HEADER_SIZE as u64 + u64::from(chunk_number) * EVTX_CHUNK_SIZE as u64;
        data.seek(SeekFrom::Start(chunk_offset))
            .map_err(EvtxError::failed_to_read("chunk", chunk_offset))?;
        trace!("Allocating chunk {} at {:?}", chunk_number, data.tell());

        let mut chunk_data = Vec::with_capacity(EVTX_CHUNK_SIZE);
        data.by_ref()
            .take(EVTX_CHUNK_SIZE as u64)
            .read_to_end(&mut chunk_data)
            .map_err(EvtxError::failed_to_read("chunk", chunk_offset))?;

        if chunk_data.is_empty() {
            return Ok(None);
        }

        if chunk_data.len() != EVTX_CHUNK_SIZE {
            return Err(EvtxError::IncompleteChunk {
                chunk_number: u64::from(chunk_number),
            });
        }

        EvtxChunkData::new(chunk_data, validate_checksum)
            .map(Some)
            .map_err(|source| EvtxError::FailedToParseChunk {
                chunk_number: u64::from(chunk_number),
                source,
            })
    }

    /// Find the next chunk, starting at `chunk_number` (inclusive).
    /// If a chunk fails, it is returned as an error along with its number,
    /// and iteration continues with the one after it.
    pub fn find_next_chunk(
        &mut self,
        chunk_number: u16,
    ) -> Option<(Result<EvtxChunkData>, u16)> {
        if chunk_number >= self.header.chunk_count {
            return None;
        }

        match Self::allocate_chunk(
            &mut self.data,
            chunk_number,
            self.config.should_validate_checksums(),
        ) {
            Ok(Some(chunk)) => Some((Ok(chunk), chunk_number)),
            Ok(None) => {
                info!("Reached EOF before chunk {chunk_number}");
                None
            }
            Err(err) => {
                error!("Failed to allocate chunk {chunk_number}: {err}");
                Some((Err(err), chunk_number))
            }
        }
    }

    /// Return an iterator over all the chunks.
    /// Each chunk supports iterating over its records.
    pub fn chunks(&mut self) -> IterChunks<'_, T> {
        IterChunks {
            parser: self,
            current_chunk_number: 0,
        }
    }

    /// Return an iterator over all the records, each passed through `f`.
    ///
    /// Chunks are decoded `num_threads` at a time when multithreading is enabled; records are
    /// always yielded in file order.
    pub fn serialized_records<'a, U: Send>(
        &'a mut self,
        f: impl Fn(Result<EvtxRecord>) -> Result<U> + Send + Sync + Clone + 'a,
    ) -> impl Iterator<Item = Result<U>> + 'a {
        let num_threads = max(self.config.get_num_threads(), 1);
        #[cfg(feature = "multithreading")]
        let num_threads = if self.config.get_num_threads() == 0 {
            rayon::current_num_threads()
        } else {
            num_threads
        };

        let chunk_settings = Arc::clone(&self.config);
        let mut chunks = self.chunks();

        let records_per_chunk = std::iter::from_fn(move || {
            // Allocate some chunks in advance, so they can be parsed in parallel.
            let mut chunk_of_chunks = Vec::with_capacity(num_threads);

            for _ in 0..num_threads {
                if let Some(chunk) = chunks.next() {
                    chunk_of_chunks.push(chunk);
                };
            }

            // We only stop if we couldn't get any chunks.
            if chunk_of_chunks.is_empty() {
                return None;
            }

            #[cfg(feature = "multithreading")]
            let chunk_iter = chunk_of_chunks.into_par_iter();

            #[cfg(not(feature = "multithreading"))]
            let chunk_iter = chunk_of_chunks.into_iter();

            let iterators = chunk_iter
                .map(|chunk_res| match chunk_res {
                    Err(err) => vec![Err(err)],
                    Ok(chunk_data) => {
                        let mut chunk = chunk_data.parse(Arc::clone(&chunk_settings));
                        chunk.iter().map(f.clone()).collect::<Vec<_>>()
                    }
                })
                .collect::<Vec<Vec<Result<U>>>>();

            Some(iterators.into_iter().flatten())
        });

        records_per_chunk.flatten()
    }

    /// Return an iterator over all the records.
    pub fn records(&mut self) -> impl Iterator<Item = Result<EvtxRecord>> + '_ {
        self.serialized_records(|record| record)
    }

    /// Return an iterator over all the records, serialized in the configured output format.
    pub fn records_xml(
        &mut self,
    ) -> impl Iterator<Item = Result<SerializedEvtxRecord<String>>> + '_ {
        self.serialized_records(|record| record.and_then(|record| record.into_xml()))
    }
}

pub struct IterChunks<'c, T: ReadSeek> {
    parser: &'c mut EvtxParser<T>,
    current_chunk_number: u16,
}

impl<T: ReadSeek> Iterator for IterChunks<'_, T> {
    type Item = Result<EvtxChunkData>;

    fn next(&mut self) -> Option<<Self as Iterator>::Item> {
        let (chunk, chunk_number) = self.parser.find_next_chunk(self.current_chunk_number)?;
        self.current_chunk_number = chunk_number.checked_add(1)?;

        Some(chunk)
    }
}
