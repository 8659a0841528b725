//! Little-endian reads at fixed offsets of a byte slice.
//!
//! Two layers are provided:
//! - **Option layer** (`read_*`): returns `None` when the read does not fit.
//! - **Result layer** (`*_r`): maps `None` to a [`DeserializationError`] naming what was read.
//!
//! Offsets are interpreted relative to the slice passed in, which for EVTX parsing is always
//! the chunk buffer, so every offset reported in an error is chunk-relative.

use crate::err::DeserializationError;

/// Read `N` raw bytes at `offset`.
pub(crate) fn read_array<const N: usize>(buf: &[u8], offset: usize) -> Option<[u8; N]> {
    let end = offset.checked_add(N)?;
    buf.get(offset..end)?.try_into().ok()
}

pub(crate) fn read_u16_le(buf: &[u8], offset: usize) -> Option<u16> {
    Some(u16::from_le_bytes(read_array::<2>(buf, offset)?))
}

pub(crate) fn read_u32_le(buf: &[u8], offset: usize) -> Option<u32> {
    Some(u32::from_le_bytes(read_array::<4>(buf, offset)?))
}

pub(crate) fn read_u64_le(buf: &[u8], offset: usize) -> Option<u64> {
    Some(u64::from_le_bytes(read_array::<8>(buf, offset)?))
}

#[inline]
fn truncated(what: &'static str, offset: usize, need: usize, len: usize) -> DeserializationError {
    DeserializationError::Truncated {
        what,
        offset: offset as u64,
        need,
        have: len.saturating_sub(offset),
    }
}

/// Borrow `len` bytes at `offset`, or fail with `Truncated`.
pub(crate) fn slice_r<'a>(
    buf: &'a [u8],
    offset: usize,
    len: usize,
    what: &'static str,
) -> Result<&'a [u8], DeserializationError> {
    let end = offset
        .checked_add(len)
        .ok_or_else(|| truncated(what, offset, len, buf.len()))?;
    buf.get(offset..end)
        .ok_or_else(|| truncated(what, offset, len, buf.len()))
}

/// Borrow `len` bytes at an offset that was read out of the data itself.
///
/// Same as [`slice_r`], but reports `OffsetOutOfBounds`, since the failure means the
/// stored offset (not the buffer) is bad.
pub(crate) fn span_r<'a>(
    buf: &'a [u8],
    offset: usize,
    len: usize,
    what: &'static str,
) -> Result<&'a [u8], DeserializationError> {
    offset
        .checked_add(len)
        .and_then(|end| buf.get(offset..end))
        .ok_or(DeserializationError::OffsetOutOfBounds {
            what,
            offset: offset as u64,
            len: buf.len(),
        })
}

pub(crate) fn read_u16_le_r(
    buf: &[u8],
    offset: usize,
    what: &'static str,
) -> Result<u16, DeserializationError> {
    read_u16_le(buf, offset).ok_or_else(|| truncated(what, offset, 2, buf.len()))
}

pub(crate) fn read_u32_le_r(
    buf: &[u8],
    offset: usize,
    what: &'static str,
) -> Result<u32, DeserializationError> {
    read_u32_le(buf, offset).ok_or_else(|| truncated(what, offset, 4, buf.len()))
}

pub(crate) fn read_u64_le_r(
    buf: &[u8],
    offset: usize,
    what: &'static str,
) -> Result<u64, DeserializationError> {
    read_u64_le(buf, offset).ok_or_else(|| truncated(what, offset, 8, buf.len()))
}

/// Read a `count`-element `u32` table at `offset` with a single bounds check.
pub(crate) fn read_u32_table_r<const N: usize>(
    buf: &[u8],
    offset: usize,
    what: &'static str,
) -> Result<[u32; N], DeserializationError> {
    let bytes = slice_r(buf, offset, N * 4, what)?;

    let mut out = [0_u32; N];
    for (slot, raw) in out.iter_mut().zip(bytes.chunks_exact(4)) {
        *slot = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
    }
    Ok(out)
}
