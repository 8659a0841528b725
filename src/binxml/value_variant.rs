use std::fmt::{self, Display};

use encoding::{DecoderTrap, EncodingRef};
use log::trace;
use winstructs::guid::Guid;

use crate::ChunkOffset;
use crate::err::{DeserializationError, DeserializationResult};
use crate::ntsid::Sid;
use crate::utils::{
    decode_utf16le_lossy, filetime_to_iso8601, format_timestamp, systime_from_bytes,
};

/// Type tag of a BinXML value, as found in value tokens and substitution descriptors.
#[derive(Debug, PartialOrd, PartialEq, Eq, Clone, Copy, Hash)]
pub enum BinXmlValueType {
    NullType,
    StringType,
    AnsiStringType,
    Int8Type,
    UInt8Type,
    Int16Type,
    UInt16Type,
    Int32Type,
    UInt32Type,
    Int64Type,
    UInt64Type,
    Real32Type,
    Real64Type,
    BoolType,
    BinaryType,
    GuidType,
    SizeTType,
    FileTimeType,
    SysTimeType,
    SidType,
    HexInt32Type,
    HexInt64Type,
    EvtHandle,
    BinXmlType,
    EvtXmlType,
    /// Any tag with the `0x80` array flag set; holds the raw tag.
    ArrayType(u8),
    /// A tag with no known meaning; holds the raw tag.
    Unknown(u8),
}

impl BinXmlValueType {
    pub fn from_u8(byte: u8) -> BinXmlValueType {
        match byte {
            0x00 => BinXmlValueType::NullType,
            0x01 => BinXmlValueType::StringType,
            0x02 => BinXmlValueType::AnsiStringType,
            0x03 => BinXmlValueType::Int8Type,
            0x04 => BinXmlValueType::UInt8Type,
            0x05 => BinXmlValueType::Int16Type,
            0x06 => BinXmlValueType::UInt16Type,
            0x07 => BinXmlValueType::Int32Type,
            0x08 => BinXmlValueType::UInt32Type,
            0x09 => BinXmlValueType::Int64Type,
            0x0a => BinXmlValueType::UInt64Type,
            0x0b => BinXmlValueType::Real32Type,
            0x0c => BinXmlValueType::Real64Type,
            0x0d => BinXmlValueType::BoolType,
            0x0e => BinXmlValueType::BinaryType,
            0x0f => BinXmlValueType::GuidType,
            0x10 => BinXmlValueType::SizeTType,
            0x11 => BinXmlValueType::FileTimeType,
            0x12 => BinXmlValueType::SysTimeType,
            0x13 => BinXmlValueType::SidType,
            0x14 => BinXmlValueType::HexInt32Type,
            0x15 => BinXmlValueType::HexInt64Type,
            0x20 => BinXmlValueType::EvtHandle,
            0x21 => BinXmlValueType::BinXmlType,
            0x23 => BinXmlValueType::EvtXmlType,
            array if array & 0x80 != 0 => BinXmlValueType::ArrayType(array),
            other => BinXmlValueType::Unknown(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            BinXmlValueType::NullType => 0x00,
            BinXmlValueType::StringType => 0x01,
            BinXmlValueType::AnsiStringType => 0x02,
            BinXmlValueType::Int8Type => 0x03,
            BinXmlValueType::UInt8Type => 0x04,
            BinXmlValueType::Int16Type => 0x05,
            BinXmlValueType::UInt16Type => 0x06,
            BinXmlValueType::Int32Type => 0x07,
            BinXmlValueType::UInt32Type => 0x08,
            BinXmlValueType::Int64Type => 0x09,
            BinXmlValueType::UInt64Type => 0x0a,
            BinXmlValueType::Real32Type => 0x0b,
            BinXmlValueType::Real64Type => 0x0c,
            BinXmlValueType::BoolType => 0x0d,
            BinXmlValueType::BinaryType => 0x0e,
            BinXmlValueType::GuidType => 0x0f,
            BinXmlValueType::SizeTType => 0x10,
            BinXmlValueType::FileTimeType => 0x11,
            BinXmlValueType::SysTimeType => 0x12,
            BinXmlValueType::SidType => 0x13,
            BinXmlValueType::HexInt32Type => 0x14,
            BinXmlValueType::HexInt64Type => 0x15,
            BinXmlValueType::EvtHandle => 0x20,
            BinXmlValueType::BinXmlType => 0x21,
            BinXmlValueType::EvtXmlType => 0x23,
            BinXmlValueType::ArrayType(raw) | BinXmlValueType::Unknown(raw) => raw,
        }
    }

    pub fn is_null(self) -> bool {
        self == BinXmlValueType::NullType
    }

    fn is_signed_integer(self) -> bool {
        matches!(
            self,
            BinXmlValueType::Int8Type
                | BinXmlValueType::Int16Type
                | BinXmlValueType::Int32Type
                | BinXmlValueType::Int64Type
        )
    }

    fn is_unsigned_integer(self) -> bool {
        matches!(
            self,
            BinXmlValueType::UInt8Type
                | BinXmlValueType::UInt16Type
                | BinXmlValueType::UInt32Type
                | BinXmlValueType::UInt64Type
        )
    }
}

/// A decoded BinXML value.
///
/// `Display` renders the textual form written into the output tree.
#[derive(Debug, PartialEq, Clone)]
pub enum BinXmlValue<'a> {
    NullType,
    /// A non-null type with a zero sized payload.
    EmptyValue(BinXmlValueType),
    StringType(String),
    AnsiStringType(String),
    /// Any signed integer tag, widened from its observed size.
    IntType(i64),
    /// Any unsigned integer tag, widened from its observed size.
    UIntType(u64),
    Real32Type(f32),
    Real64Type(f64),
    BoolType(bool),
    BinaryType(&'a [u8]),
    GuidType(Guid),
    SizeTType { value: u64, width: usize },
    FileTimeType(u64),
    SysTimeType(jiff::Timestamp),
    SidType(Sid),
    HexInt32Type(u32),
    HexInt64Type(u64),
    /// Nested BinXML, decoded by the caller.
    BinXmlType { offset: ChunkOffset, size: u16 },
    /// A value that cannot be rendered, either because of its tag or its size.
    Unsupported { raw_type: u8, size: u16 },
}

impl<'a> BinXmlValue<'a> {
    /// Decodes exactly `bytes` (one substitution slot) as a value of `value_type`.
    ///
    /// `offset` is the chunk offset of `bytes[0]`. The only hard failure is an ANSI string the
    /// configured codec cannot decode, everything else degrades to `Unsupported`.
    pub(crate) fn deserialize(
        bytes: &'a [u8],
        value_type: BinXmlValueType,
        offset: ChunkOffset,
        ansi_codec: EncodingRef,
    ) -> DeserializationResult<BinXmlValue<'a>> {
        let size = bytes.len();

        if value_type.is_null() {
            return Ok(BinXmlValue::NullType);
        }
        if size == 0 {
            return Ok(BinXmlValue::EmptyValue(value_type));
        }

        let unsupported = BinXmlValue::Unsupported {
            raw_type: value_type.to_u8(),
            size: size as u16,
        };

        let value = match value_type {
            BinXmlValueType::StringType => BinXmlValue::StringType(decode_utf16le_lossy(bytes)),
            BinXmlValueType::AnsiStringType => {
                BinXmlValue::AnsiStringType(decode_ansi(bytes, offset, ansi_codec)?)
            }
            t if t.is_signed_integer() => match read_signed(bytes) {
                Some(v) => BinXmlValue::IntType(v),
                None => unsupported,
            },
            t if t.is_unsigned_integer() => match read_unsigned(bytes) {
                Some(v) => BinXmlValue::UIntType(v),
                None => unsupported,
            },
            BinXmlValueType::Real32Type => match bytes.first_chunk::<4>() {
                Some(raw) if size == 4 => BinXmlValue::Real32Type(f32::from_le_bytes(*raw)),
                _ => unsupported,
            },
            BinXmlValueType::Real64Type => match bytes.first_chunk::<8>() {
                Some(raw) if size == 8 => BinXmlValue::Real64Type(f64::from_le_bytes(*raw)),
                _ => unsupported,
            },
            BinXmlValueType::BoolType => match read_unsigned(bytes) {
                Some(v) => BinXmlValue::BoolType(v != 0),
                None => unsupported,
            },
            BinXmlValueType::BinaryType => BinXmlValue::BinaryType(bytes),
            BinXmlValueType::GuidType => match bytes.get(..16).map(Guid::from_buffer) {
                Some(Ok(guid)) => BinXmlValue::GuidType(guid),
                _ => unsupported,
            },
            BinXmlValueType::SizeTType => match (size, read_unsigned(bytes)) {
                (4 | 8, Some(value)) => BinXmlValue::SizeTType {
                    value,
                    width: size * 2,
                },
                _ => unsupported,
            },
            BinXmlValueType::FileTimeType => match bytes.first_chunk::<8>() {
                Some(raw) => BinXmlValue::FileTimeType(u64::from_le_bytes(*raw)),
                None => unsupported,
            },
            BinXmlValueType::SysTimeType => match bytes.first_chunk::<16>() {
                Some(raw) => match systime_from_bytes(raw) {
                    Ok(ts) => BinXmlValue::SysTimeType(ts),
                    Err(_) => unsupported,
                },
                None => unsupported,
            },
            BinXmlValueType::SidType => match Sid::from_bytes(bytes) {
                Some(sid) => BinXmlValue::SidType(sid),
                None => unsupported,
            },
            BinXmlValueType::HexInt32Type => match bytes.first_chunk::<4>() {
                Some(raw) => BinXmlValue::HexInt32Type(u32::from_le_bytes(*raw)),
                None => unsupported,
            },
            BinXmlValueType::HexInt64Type => match bytes.first_chunk::<8>() {
                Some(raw) => BinXmlValue::HexInt64Type(u64::from_le_bytes(*raw)),
                None => unsupported,
            },
            BinXmlValueType::BinXmlType => BinXmlValue::BinXmlType {
                offset,
                size: size as u16,
            },
            _ => unsupported,
        };

        if let BinXmlValue::Unsupported { raw_type, size } = value {
            trace!("Offset `0x{offset:08x}`: cannot render value type 0x{raw_type:02x} of size {size}");
        }

        Ok(value)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, BinXmlValue::NullType)
    }
}

fn read_signed(bytes: &[u8]) -> Option<i64> {
    Some(match bytes.len() {
        1 => i64::from(bytes[0] as i8),
        2 => i64::from(i16::from_le_bytes(*bytes.first_chunk()?)),
        4 => i64::from(i32::from_le_bytes(*bytes.first_chunk()?)),
        8 => i64::from_le_bytes(*bytes.first_chunk()?),
        _ => return None,
    })
}

fn read_unsigned(bytes: &[u8]) -> Option<u64> {
    Some(match bytes.len() {
        1 => u64::from(bytes[0]),
        2 => u64::from(u16::from_le_bytes(*bytes.first_chunk()?)),
        4 => u64::from(u32::from_le_bytes(*bytes.first_chunk()?)),
        8 => u64::from_le_bytes(*bytes.first_chunk()?),
        _ => return None,
    })
}

fn decode_ansi(
    bytes: &[u8],
    offset: ChunkOffset,
    ansi_codec: EncodingRef,
) -> DeserializationResult<String> {
    let filtered: Vec<u8> = bytes.iter().copied().filter(|&b| b != 0).collect();

    ansi_codec
        .decode(&filtered, DecoderTrap::Strict)
        .map_err(|message| DeserializationError::FailedToDecodeAnsiString {
            encoding: ansi_codec.name(),
            message: message.into_owned(),
            offset: u64::from(offset),
        })
}

impl Display for BinXmlValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinXmlValue::NullType | BinXmlValue::EmptyValue(_) => Ok(()),
            BinXmlValue::StringType(s) | BinXmlValue::AnsiStringType(s) => f.write_str(s),
            BinXmlValue::IntType(v) => write!(f, "{}", v),
            BinXmlValue::UIntType(v) => write!(f, "{}", v),
            BinXmlValue::Real32Type(v) => write!(f, "{}", v),
            BinXmlValue::Real64Type(v) => write!(f, "{}", v),
            BinXmlValue::BoolType(v) => write!(f, "{}", v),
            BinXmlValue::BinaryType(bytes) => {
                for b in *bytes {
                    write!(f, "{:02X}", b)?;
                }
                Ok(())
            }
            BinXmlValue::GuidType(guid) => {
                let text = guid.to_string();
                let text = text.trim_matches(&['{', '}'][..]);
                write!(f, "{{{}}}", text.to_ascii_uppercase())
            }
            BinXmlValue::SizeTType { value, width } => write!(f, "0x{:0width$x}", value),
            BinXmlValue::FileTimeType(ticks) => f.write_str(&filetime_to_iso8601(*ticks)),
            BinXmlValue::SysTimeType(ts) => f.write_str(&format_timestamp(*ts)),
            BinXmlValue::SidType(sid) => write!(f, "{}", sid),
            BinXmlValue::HexInt32Type(v) => write!(f, "0x{:08x}", v),
            BinXmlValue::HexInt64Type(v) => write!(f, "0x{:016x}", v),
            BinXmlValue::BinXmlType { offset, size } => {
                write!(f, "[BinXml at 0x{:08x}, size {}]", offset, size)
            }
            BinXmlValue::Unsupported { raw_type, size } if raw_type & 0x80 != 0 => {
                write!(f, "[ArrayType 0x{:02x}, size {}]", raw_type, size)
            }
            BinXmlValue::Unsupported { raw_type, size } => {
                write!(f, "[UnknownType 0x{:02x}, size {}]", raw_type, size)
            }
        }
    }
}
