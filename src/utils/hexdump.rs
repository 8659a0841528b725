use std::fmt::Write;

const BYTES_PER_LINE: usize = 16;

/// Canonical hex+ASCII dump (`hexdump -C` style) of `data`.
///
/// `base_offset` is the offset of `data[0]` and is what gets printed in the address column.
pub fn hexdump(data: &[u8], base_offset: usize) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(BYTES_PER_LINE) * 78);

    for (i, line) in data.chunks(BYTES_PER_LINE).enumerate() {
        let _ = write!(out, "{:08x}: ", base_offset + i * BYTES_PER_LINE);

        for col in 0..BYTES_PER_LINE {
            match line.get(col) {
                Some(b) => {
                    let _ = write!(out, "{:02x} ", b);
                }
                None => out.push_str("   "),
            }
            if col == 7 {
                out.push(' ');
            }
        }

        out.push_str(" |");
        for &b in line {
            out.push(if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            });
        }
        out.push_str("|\n");
    }

    out
}

/// Dumps `lines` lines of `buf` around `offset`, clamped to the buffer.
pub fn dump_around(buf: &[u8], offset: usize, lines: usize) -> String {
    let start = offset
        .min(buf.len())
        .saturating_sub(lines / 2 * BYTES_PER_LINE);
    let start = start - start % BYTES_PER_LINE;
    let end = (start + lines * BYTES_PER_LINE).min(buf.len());
    hexdump(&buf[start..end], start)
}
