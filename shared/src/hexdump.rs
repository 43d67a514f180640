//! Hex dump formatting for packet debugging.

use std::fmt::Write;

const BYTES_PER_ROW: usize = 16;

/// Formats `bytes` as rows of `offset  hex  |ascii|`.
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::new();

    for (row, chunk) in bytes.chunks(BYTES_PER_ROW).enumerate() {
        let _ = write!(out, "{:04X}  ", row * BYTES_PER_ROW);

        for i in 0..BYTES_PER_ROW {
            match chunk.get(i) {
                Some(b) => {
                    let _ = write!(out, "{:02X} ", b);
                }
                None => out.push_str("   "),
            }
        }

        out.push('|');
        out.extend(chunk.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
        out.push_str("|\n");
    }

    out
}
