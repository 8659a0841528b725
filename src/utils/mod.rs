mod byte_cursor;
pub(crate) mod bytes;
mod hexdump;
mod time;
mod utf16;

pub(crate) use self::byte_cursor::ByteCursor;
pub use self::hexdump::{dump_around, hexdump};
pub use self::time::{filetime_to_iso8601, format_timestamp};
pub(crate) use self::time::{filetime_to_timestamp, systime_from_bytes};
pub(crate) use self::utf16::decode_utf16le_lossy;
