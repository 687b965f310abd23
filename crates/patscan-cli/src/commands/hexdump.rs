//! Hexdump command implementation.
//!
//! Displays raw image bytes in traditional hexdump format, labelled with the
//! address each row would have at runtime.
//!
//! # Output Format
//!
//! ```text
//! 0x140001000: 48 65 6C 6C 6F 20 57 6F  72 6C 64 00 00 00 00 00  |Hello World.....|
//! ```

use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Result, bail};

use super::hex_utils::format_hex_address;

const ROW: usize = 16;

/// Run the hexdump command
pub fn run(file: &Path, offset: u64, size: usize, base: u64, ascii: bool) -> Result<()> {
    let image = super::read_image(file)?;

    let start = usize::try_from(offset)?;
    if start >= image.len() {
        bail!(
            "Offset {} is past the end of the image ({} bytes)",
            format_hex_address(offset),
            image.len()
        );
    }
    let end = start.saturating_add(size).min(image.len());

    println!(
        "Hexdump at {} ({} bytes):",
        format_hex_address(base.wrapping_add(offset)),
        end - start
    );
    println!();
    for line in dump_lines(&image[start..end], base.wrapping_add(offset), ascii) {
        println!("{}", line);
    }

    Ok(())
}

/// Render `bytes` as hexdump rows, labelling the first byte as `address`.
pub fn dump_lines(bytes: &[u8], address: u64, ascii: bool) -> Vec<String> {
    bytes
        .chunks(ROW)
        .enumerate()
        .map(|(i, chunk)| format_row(chunk, address.wrapping_add((i * ROW) as u64), ascii))
        .collect()
}

fn format_row(chunk: &[u8], address: u64, ascii: bool) -> String {
    let mut line = format!("{}: ", format_hex_address(address));

    for j in 0..ROW {
        if j == ROW / 2 {
            line.push(' ');
        }
        match chunk.get(j) {
            Some(byte) => {
                let _ = write!(line, "{:02X} ", byte);
            }
            None => line.push_str("   "),
        }
    }

    if ascii {
        line.push_str(" |");
        for byte in chunk {
            line.push(if (0x20..0x7F).contains(byte) {
                *byte as char
            } else {
                '.'
            });
        }
        for _ in chunk.len()..ROW {
            line.push(' ');
        }
        line.push('|');
    }

    line
}
