use jiff::{Timestamp, civil::DateTime, tz::Offset};

use crate::err::{DeserializationError, DeserializationResult};

const WINDOWS_TO_UNIX_SECS: i64 = 11_644_473_600;
const TICKS_PER_SECOND: u64 = 10_000_000;

#[inline]
pub(crate) fn filetime_to_timestamp(filetime: u64) -> DeserializationResult<Timestamp> {
    let secs = (filetime / TICKS_PER_SECOND) as i64 - WINDOWS_TO_UNIX_SECS;
    let nanos = ((filetime % TICKS_PER_SECOND) * 100) as i32;
    Timestamp::new(secs, nanos).map_err(|_| DeserializationError::InvalidDateTimeError)
}

/// Formats as `YYYY-MM-DDTHH:MM:SS.nnnnnnnnnZ`, always with nine fractional digits.
pub fn format_timestamp(timestamp: Timestamp) -> String {
    let dt = Offset::UTC.to_datetime(timestamp);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:09}Z",
        dt.year(),
        dt.month(),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
        dt.subsec_nanosecond()
    )
}

/// Renders a FILETIME (100ns ticks since 1601-01-01) as ISO-8601 UTC.
///
/// Values past the last representable instant fall back to the raw tick count.
pub fn filetime_to_iso8601(filetime: u64) -> String {
    match filetime_to_timestamp(filetime) {
        Ok(ts) => format_timestamp(ts),
        Err(_) => filetime.to_string(),
    }
}

pub(crate) fn systime_from_bytes(bytes: &[u8; 16]) -> DeserializationResult<Timestamp> {
    let field = |i: usize| u16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]]);
    let (year, month, day) = (field(0), field(1), field(3));
    let (hour, minute, second, milliseconds) = (field(4), field(5), field(6), field(7));

    // The entire value is unset. By convention, use the FILETIME epoch.
    if bytes.iter().all(|&b| b == 0) {
        return filetime_to_timestamp(0);
    }

    let narrow = |v: u16| i8::try_from(v).map_err(|_| DeserializationError::InvalidDateTimeError);
    let year = i16::try_from(year).map_err(|_| DeserializationError::InvalidDateTimeError)?;
    let nanos = i32::from(milliseconds) * 1_000_000;

    let dt = DateTime::new(
        year,
        narrow(month)?,
        narrow(day)?,
        narrow(hour)?,
        narrow(minute)?,
        narrow(second)?,
        nanos,
    )
    .map_err(|_| DeserializationError::InvalidDateTimeError)?;

    Offset::UTC
        .to_timestamp(dt)
        .map_err(|_| DeserializationError::InvalidDateTimeError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_unix_epoch() {
        assert_eq!(
            filetime_to_iso8601(116_444_736_000_000_000),
            "1970-01-01T00:00:00.000000000Z"
        );
    }

    #[test]
    fn test_keeps_all_100ns_ticks() {
        // 2019-03-28T12:34:56 plus 1234567 ticks.
        let ticks = (1_553_776_496 + 11_644_473_600) * 10_000_000 + 1_234_567;
        assert_eq!(filetime_to_iso8601(ticks), "2019-03-28T12:34:56.123456700Z");
    }

    #[test]
    fn test_out_of_range_falls_back_to_ticks() {
        assert_eq!(filetime_to_iso8601(u64::MAX), u64::MAX.to_string());
    }

    #[test]
    fn test_systemtime() {
        let mut raw = [0_u8; 16];
        for (i, v) in [2020_u16, 2, 0, 29, 23, 59, 58, 250].iter().enumerate() {
            raw[i * 2..i * 2 + 2].copy_from_slice(&v.to_le_bytes());
        }
        let ts = systime_from_bytes(&raw).unwrap();
        assert_eq!(format_timestamp(ts), "2020-02-29T23:59:58.250000000Z");
    }
}
