use crate::err::{EvtxError, Result};

use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt};
use std::fmt;
use std::io::{Read, Seek, SeekFrom};

/// Size of the header block preceding the first chunk.
pub const EVTX_FILE_HEADER_SIZE: usize = 4096;

/// The checksum covers everything before the flags field.
const CHECKSUMMED_HEADER_LEN: usize = 120;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct EvtxFileHeader {
    pub first_chunk_number: u64,
    pub last_chunk_number: u64,
    pub next_record_id: u64,
    pub header_size: u32,
    pub minor_version: u16,
    pub major_version: u16,
    pub header_block_size: u16,
    pub chunk_count: u16,
    pub flags: HeaderFlags,
    // Checksum is of first 120 bytes of header
    pub checksum: u32,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HeaderFlags: u32 {
        const DIRTY = 0x1;
        const FULL = 0x2;
    }
}

impl EvtxFileHeader {
    /// Reads the header from the current position and leaves the stream at the first chunk.
    pub fn from_stream<T: Read + Seek>(stream: &mut T) -> Result<EvtxFileHeader> {
        let mut magic = [0_u8; 8];
        stream
            .read_exact(&mut magic)
            .map_err(EvtxError::failed_to_read("file header magic", 0))?;

        if &magic != b"ElfFile\x00" {
            return Err(EvtxError::InvalidEvtxFileHeaderMagic { magic });
        }

        let read_err = |what| EvtxError::failed_to_read(what, 0);

        let first_chunk_number = stream
            .read_u64::<LittleEndian>()
            .map_err(read_err("first chunk number"))?;
        let last_chunk_number = stream
            .read_u64::<LittleEndian>()
            .map_err(read_err("last chunk number"))?;
        let next_record_id = stream
            .read_u64::<LittleEndian>()
            .map_err(read_err("next record id"))?;
        let header_size = stream
            .read_u32::<LittleEndian>()
            .map_err(read_err("header size"))?;
        let minor_version = stream
            .read_u16::<LittleEndian>()
            .map_err(read_err("minor version"))?;
        let major_version = stream
            .read_u16::<LittleEndian>()
            .map_err(read_err("major version"))?;
        let header_block_size = stream
            .read_u16::<LittleEndian>()
            .map_err(read_err("header block size"))?;
        let chunk_count = stream
            .read_u16::<LittleEndian>()
            .map_err(read_err("chunk count"))?;

        // unused
        stream.seek(SeekFrom::Current(76))?;

        let raw_flags = stream
            .read_u32::<LittleEndian>()
            .map_err(read_err("header flags"))?;
        let flags = HeaderFlags::from_bits_truncate(raw_flags);

        let checksum = stream
            .read_u32::<LittleEndian>()
            .map_err(read_err("header checksum"))?;

        // The rest of the block is padding.
        stream.seek(SeekFrom::Current((EVTX_FILE_HEADER_SIZE - 128) as i64))?;

        Ok(EvtxFileHeader {
            first_chunk_number,
            last_chunk_number,
            next_record_id,
            header_size,
            minor_version,
            major_version,
            header_block_size,
            chunk_count,
            flags,
            checksum,
        })
    }

    /// Checks the stored checksum against the raw header bytes.
    pub fn validate_checksum(&self, header_bytes: &[u8]) -> bool {
        match header_bytes.get(..CHECKSUMMED_HEADER_LEN) {
            Some(bytes) => crc32fast::hash(bytes) == self.checksum,
            None => false,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.flags.contains(HeaderFlags::DIRTY)
    }

    pub fn is_full(&self) -> bool {
        self.flags.contains(HeaderFlags::FULL)
    }
}

impl fmt::Display for EvtxFileHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.is_full() {
            "full"
        } else if self.is_dirty() {
            "dirty"
        } else {
            "clean"
        };

        write!(
            f,
            "ElfFile v{}.{} chunks={} (first={} last={}) next_record_id={} {}",
            self.major_version,
            self.minor_version,
            self.chunk_count,
            self.first_chunk_number,
            self.last_chunk_number,
            self.next_record_id,
            state
        )
    }
}
