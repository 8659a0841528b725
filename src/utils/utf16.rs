/// Decode a UTF-16LE byte slice until the first NUL (0x0000), if present.
///
/// Unpaired surrogates are replaced with U+FFFD, a trailing odd byte is ignored.
pub(crate) fn decode_utf16le_lossy(bytes: &[u8]) -> String {
    let units = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|&unit| unit != 0);

    // ASCII is the common case in event logs.
    let mut out = String::with_capacity(bytes.len() / 2);
    for ch in char::decode_utf16(units) {
        out.push(ch.unwrap_or(char::REPLACEMENT_CHARACTER));
    }
    out
}
