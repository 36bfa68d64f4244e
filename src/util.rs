//! Binary helpers: hex conversion, bit counting and dump formatting

use crate::error::{Error, Result};

/// Decode a hex string into bytes
///
/// Accepts contiguous hex (`3F00`) as well as bytes separated by `:` or
/// whitespace (`3F:00`, `3F 00`). Each separated group must hold an even
/// number of hex digits.
pub fn hex_to_bin(input: &str) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for group in input
        .split(|c: char| c == ':' || c.is_whitespace())
        .filter(|g| !g.is_empty())
    {
        let bytes = hex::decode(group).map_err(|e| Error::InvalidHex(format!("{group}: {e}")))?;
        out.extend(bytes);
    }
    Ok(out)
}

/// Encode bytes as uppercase hex, optionally separating bytes
pub fn bin_to_hex(data: &[u8], separator: Option<char>) -> String {
    match separator {
        None => hex::encode_upper(data),
        Some(sep) => data
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(&sep.to_string()),
    }
}

/// Number of significant bits in a big-endian unsigned integer
///
/// Leading zero bits are not counted, so a 1024-bit RSA modulus with a
/// leading zero pad byte still reports 1024.
pub fn count_bit_string_size(buf: &[u8]) -> usize {
    match buf.iter().position(|&b| b != 0) {
        Some(first) => (buf.len() - first - 1) * 8 + (8 - buf[first].leading_zeros() as usize),
        None => 0,
    }
}

/// Space-separated hex dump on a single line
pub fn hex_dump(data: &[u8]) -> String {
    bin_to_hex(data, Some(' '))
}

/// Multi-line dump with offset, hex and printable ASCII columns
///
/// Each line holds up to `width` bytes.
pub fn hex_dump_ascii(data: &[u8], width: usize) -> String {
    let width = width.max(1);
    let mut out = String::new();
    for (line, chunk) in data.chunks(width).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{:02X}", b)).collect();
        let ascii: String = chunk
            .iter()
            .map(|&b| if (0x20..0x7F).contains(&b) { b as char } else { '.' })
            .collect();
        out.push_str(&format!(
            "{:04X}: {:<w$} {}\n",
            line * width,
            hex.join(" "),
            ascii,
            w = width * 3 - 1
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_to_bin_formats() {
        assert_eq!(hex_to_bin("3F00").unwrap(), vec![0x3F, 0x00]);
        assert_eq!(hex_to_bin("3f:00:50:15").unwrap(), vec![0x3F, 0x00, 0x50, 0x15]);
        assert_eq!(hex_to_bin(" 00 A4  04 00 ").unwrap(), vec![0x00, 0xA4, 0x04, 0x00]);
        assert!(hex_to_bin("").unwrap().is_empty());
    }

    #[test]
    fn test_hex_to_bin_rejects_garbage() {
        assert!(matches!(hex_to_bin("3G00"), Err(Error::InvalidHex(_))));
        assert!(matches!(hex_to_bin("3F0"), Err(Error::InvalidHex(_))));
        assert!(matches!(hex_to_bin("3F:0"), Err(Error::InvalidHex(_))));
    }

    #[test]
    fn test_bin_to_hex() {
        assert_eq!(bin_to_hex(&[0x3F, 0x00], None), "3F00");
        assert_eq!(bin_to_hex(&[0x3F, 0x00], Some(':')), "3F:00");
        assert_eq!(bin_to_hex(&[], Some(':')), "");
    }

    #[test]
    fn test_count_bit_string_size() {
        assert_eq!(count_bit_string_size(&[]), 0);
        assert_eq!(count_bit_string_size(&[0x00, 0x00]), 0);
        assert_eq!(count_bit_string_size(&[0x01]), 1);
        assert_eq!(count_bit_string_size(&[0x80, 0x00]), 16);
        assert_eq!(count_bit_string_size(&[0x00, 0x7F, 0xFF]), 15);

        let mut modulus = vec![0x00];
        modulus.extend(vec![0xC3; 128]);
        assert_eq!(count_bit_string_size(&modulus), 1024);
    }

    #[test]
    fn test_hex_dump_ascii() {
        let dump = hex_dump_ascii(b"ABC\x00", 16);
        assert!(dump.starts_with("0000: 41 42 43 00"));
        assert!(dump.trim_end().ends_with("ABC."));

        let two_lines = hex_dump_ascii(&[0u8; 20], 16);
        assert_eq!(two_lines.lines().count(), 2);
        assert!(two_lines.lines().nth(1).unwrap().starts_with("0010:"));
    }
}
