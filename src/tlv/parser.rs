//! BER-TLV Parser
//!
//! Parses BER-TLV (Basic Encoding Rules - Tag Length Value) structures
//! as returned by smart cards in SELECT FILE responses.

use thiserror::Error;

/// Errors that can occur during TLV parsing
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TLVError {
    #[error("Unexpected end of data while parsing tag")]
    UnexpectedEndTag,

    #[error("Unexpected end of data while parsing length")]
    UnexpectedEndLength,

    #[error("Unexpected end of data while parsing value")]
    UnexpectedEndValue,

    #[error("Invalid length encoding")]
    InvalidLength,

    #[error("Length too large: {0}")]
    LengthTooLarge(usize),
}

/// A TLV (Tag-Length-Value) structure
///
/// - `tag`: The tag value (stored as u32 to support 1-3 byte tags)
/// - `value`: The raw value bytes (kept for constructed tags too)
/// - `subs`: Child TLVs for constructed tags, when parsed recursively
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TLV {
    /// The tag (1-3 bytes encoded as u32)
    pub tag: u32,
    /// The raw value bytes
    pub value: Vec<u8>,
    /// Child TLVs if this is a constructed tag
    pub subs: Vec<TLV>,
}

impl TLV {
    /// Create a new primitive TLV
    pub fn new(tag: u32, value: Vec<u8>) -> Self {
        Self {
            tag,
            value,
            subs: Vec::new(),
        }
    }

    /// Check if this is a constructed (container) tag based on the tag bits
    pub fn is_constructed(&self) -> bool {
        (first_tag_byte(self.tag) & 0x20) != 0
    }

    /// Recursively search for a tag (depth-first)
    pub fn find(&self, tag: u32) -> Option<&TLV> {
        if self.tag == tag {
            return Some(self);
        }
        self.subs.iter().find_map(|child| child.find(tag))
    }

    /// Find a direct child by tag (non-recursive)
    pub fn find_child(&self, tag: u32) -> Option<&TLV> {
        self.subs.iter().find(|c| c.tag == tag)
    }

    /// Value interpreted as a big-endian unsigned number
    ///
    /// Returns None for empty values or values wider than 8 bytes.
    pub fn value_as_usize(&self) -> Option<usize> {
        if self.value.is_empty() || self.value.len() > std::mem::size_of::<usize>() {
            return None;
        }
        Some(self.value.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize))
    }
}

fn first_tag_byte(tag: u32) -> u8 {
    if tag > 0xFFFF {
        ((tag >> 16) & 0xFF) as u8
    } else if tag > 0xFF {
        ((tag >> 8) & 0xFF) as u8
    } else {
        (tag & 0xFF) as u8
    }
}

/// Parse multiple TLVs from raw bytes
///
/// Filler bytes (0x00, 0xFF) between objects are skipped.
pub fn read_list(data: &[u8], recursive: bool) -> Result<Vec<TLV>, TLVError> {
    let mut result = Vec::new();
    let mut remaining = data;

    while let Some(&first) = remaining.first() {
        if first == 0x00 || first == 0xFF {
            remaining = &remaining[1..];
            continue;
        }
        let (tlv, rest) = read_single(remaining, recursive)?;
        result.push(tlv);
        remaining = rest;
    }

    Ok(result)
}

/// Parse a single TLV and return it with the remaining bytes
fn read_single(data: &[u8], recursive: bool) -> Result<(TLV, &[u8]), TLVError> {
    let (tag, tag_len) = parse_tag(data)?;
    let (length, len_len) = parse_length(&data[tag_len..])?;

    let start = tag_len + len_len;
    let end = start
        .checked_add(length)
        .filter(|&end| end <= data.len())
        .ok_or(TLVError::UnexpectedEndValue)?;
    let value = data[start..end].to_vec();

    let subs = if recursive && (first_tag_byte(tag) & 0x20) != 0 && !value.is_empty() {
        read_list(&value, true)?
    } else {
        Vec::new()
    };

    Ok((TLV { tag, value, subs }, &data[end..]))
}

/// Parse a BER tag (1-3 bytes)
fn parse_tag(data: &[u8]) -> Result<(u32, usize), TLVError> {
    let first = *data.first().ok_or(TLVError::UnexpectedEndTag)?;

    // Low 5 bits all set means more tag bytes follow
    if (first & 0x1F) != 0x1F {
        return Ok((first as u32, 1));
    }

    let second = *data.get(1).ok_or(TLVError::UnexpectedEndTag)?;
    if (second & 0x80) == 0 {
        return Ok((((first as u32) << 8) | second as u32, 2));
    }

    let third = *data.get(2).ok_or(TLVError::UnexpectedEndTag)?;
    let tag = ((first as u32) << 16) | ((second as u32) << 8) | (third as u32);
    Ok((tag, 3))
}

/// Parse a BER length (1-5 bytes)
fn parse_length(data: &[u8]) -> Result<(usize, usize), TLVError> {
    let first = *data.first().ok_or(TLVError::UnexpectedEndLength)?;

    // Short form (0-127)
    if (first & 0x80) == 0 {
        return Ok((first as usize, 1));
    }

    let num_bytes = (first & 0x7F) as usize;
    if num_bytes == 0 {
        // Indefinite length is not allowed in card data
        return Err(TLVError::InvalidLength);
    }
    if num_bytes > 4 {
        return Err(TLVError::LengthTooLarge(num_bytes));
    }
    if data.len() < 1 + num_bytes {
        return Err(TLVError::UnexpectedEndLength);
    }

    let length = data[1..=num_bytes]
        .iter()
        .fold(0usize, |acc, &b| (acc << 8) | b as usize);
    Ok((length, 1 + num_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_tlv() {
        let data = hex::decode("830250150000").unwrap();
        let tlvs = read_list(&data, true).unwrap();
        assert_eq!(tlvs.len(), 1);
        assert_eq!(tlvs[0].tag, 0x83);
        assert_eq!(tlvs[0].value, vec![0x50, 0x15]);
    }

    #[test]
    fn test_two_byte_tag() {
        let data = hex::decode("5F500B6578616D706C652E636F6D").unwrap();
        let tlvs = read_list(&data, true).unwrap();
        assert_eq!(tlvs[0].tag, 0x5F50);
        assert_eq!(tlvs[0].value, b"example.com");
    }

    #[test]
    fn test_constructed_fcp() {
        // 62 { 82 01 38, 83 02 3F00, 86 03 000000 }
        let data = hex::decode("620C82013883023F0086030000 00".replace(' ', "")).unwrap();
        let tlvs = read_list(&data, true).unwrap();
        assert_eq!(tlvs.len(), 1);
        assert!(tlvs[0].is_constructed());
        assert_eq!(tlvs[0].subs.len(), 3);
        assert_eq!(tlvs[0].find_child(0x82).unwrap().value, vec![0x38]);
        assert_eq!(tlvs[0].find(0x86).unwrap().value, vec![0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_long_length() {
        let mut data = vec![0xC0, 0x81, 0x80];
        data.extend(vec![0x11; 128]);
        let tlvs = read_list(&data, true).unwrap();
        assert_eq!(tlvs[0].value.len(), 128);
    }

    #[test]
    fn test_truncated_value_is_error() {
        let data = hex::decode("8302 50".replace(' ', "")).unwrap();
        assert_eq!(read_list(&data, true), Err(TLVError::UnexpectedEndValue));
    }

    #[test]
    fn test_truncated_length_is_error() {
        assert_eq!(read_list(&[0x80, 0x82, 0x01], true), Err(TLVError::UnexpectedEndLength));
        assert_eq!(read_list(&[0x80], true), Err(TLVError::UnexpectedEndLength));
        assert_eq!(read_list(&[0x80, 0x80], true), Err(TLVError::InvalidLength));
    }

    #[test]
    fn test_huge_length_does_not_overflow() {
        let data = [0x80, 0x84, 0xFF, 0xFF, 0xFF, 0xFF, 0x00];
        assert_eq!(read_list(&data, true), Err(TLVError::UnexpectedEndValue));
    }

    #[test]
    fn test_filler_bytes() {
        let data = hex::decode("00FF830201020000").unwrap();
        let tlvs = read_list(&data, true).unwrap();
        assert_eq!(tlvs.len(), 1);
        assert_eq!(tlvs[0].tag, 0x83);
    }

    #[test]
    fn test_value_as_usize() {
        assert_eq!(TLV::new(0x80, vec![0x01, 0x00]).value_as_usize(), Some(256));
        assert_eq!(TLV::new(0x80, vec![]).value_as_usize(), None);
    }
}
