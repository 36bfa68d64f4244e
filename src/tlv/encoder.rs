//! BER-TLV encoding for the templates the simulated card returns

fn push_tag(out: &mut Vec<u8>, tag: u32) {
    if tag > 0xFFFF {
        out.push((tag >> 16) as u8);
    }
    if tag > 0xFF {
        out.push((tag >> 8) as u8);
    }
    out.push(tag as u8);
}

/// Definite length, short form below 128
fn push_length(out: &mut Vec<u8>, length: usize) {
    match length {
        0..=0x7F => out.push(length as u8),
        0x80..=0xFF => out.extend_from_slice(&[0x81, length as u8]),
        0x100..=0xFFFF => out.extend_from_slice(&[0x82, (length >> 8) as u8, length as u8]),
        _ => out.extend_from_slice(&[
            0x83,
            (length >> 16) as u8,
            (length >> 8) as u8,
            length as u8,
        ]),
    }
}

fn encode(tag: u32, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len() + 4);
    push_tag(&mut out, tag);
    push_length(&mut out, value.len());
    out.extend_from_slice(value);
    out
}

/// Builder for constructing nested TLV structures
///
/// ```
/// use cardlink::tlv::TLVBuilder;
///
/// let fcp = TLVBuilder::new()
///     .add(0x82, &[0x01])
///     .add(0x83, &[0x50, 0x15])
///     .wrap(0x62)
///     .build();
/// assert_eq!(fcp, vec![0x62, 0x07, 0x82, 0x01, 0x01, 0x83, 0x02, 0x50, 0x15]);
/// ```
#[derive(Debug, Default)]
pub struct TLVBuilder {
    data: Vec<u8>,
}

impl TLVBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a primitive TLV
    pub fn add(mut self, tag: u32, value: &[u8]) -> Self {
        self.data.extend(encode(tag, value));
        self
    }

    /// Append a primitive TLV only when the value is non-empty
    pub fn add_nonempty(self, tag: u32, value: &[u8]) -> Self {
        if value.is_empty() {
            self
        } else {
            self.add(tag, value)
        }
    }

    /// Wrap everything added so far in a constructed tag
    pub fn wrap(self, tag: u32) -> Self {
        Self {
            data: encode(tag, &self.data),
        }
    }

    pub fn build(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tlv::read_list;

    #[test]
    fn test_encode_simple() {
        let encoded = encode(0x84, &[0xA0, 0x00, 0x00, 0x00, 0x63]);
        assert_eq!(encoded, vec![0x84, 0x05, 0xA0, 0x00, 0x00, 0x00, 0x63]);
        assert_eq!(&encode(0x5F2D, b"en")[..3], &[0x5F, 0x2D, 0x02]);
    }

    #[test]
    fn test_length_forms() {
        let len_of = |n: usize| {
            let mut out = Vec::new();
            push_length(&mut out, n);
            out
        };
        assert_eq!(len_of(0), vec![0x00]);
        assert_eq!(len_of(127), vec![0x7F]);
        assert_eq!(len_of(128), vec![0x81, 0x80]);
        assert_eq!(len_of(256), vec![0x82, 0x01, 0x00]);
    }

    #[test]
    fn test_builder_fcp_parses_back() {
        let data = TLVBuilder::new()
            .add(0x82, &[0x38])
            .add(0x83, &[0x3F, 0x00])
            .add_nonempty(0x84, &[])
            .add_nonempty(0x86, &[0x00, 0x10])
            .wrap(0x62)
            .build();

        let tlvs = read_list(&data, true).unwrap();
        assert_eq!(tlvs.len(), 1);
        assert_eq!(tlvs[0].tag, 0x62);
        assert_eq!(tlvs[0].subs.len(), 3);
        assert!(tlvs[0].find_child(0x84).is_none());
        assert_eq!(tlvs[0].find_child(0x86).unwrap().value, vec![0x00, 0x10]);
    }

    #[test]
    fn test_long_value() {
        let data = TLVBuilder::new().add(0x53, &[0xAB; 300]).build();
        assert_eq!(&data[..4], &[0x53, 0x82, 0x01, 0x2C]);
        assert_eq!(read_list(&data, false).unwrap()[0].value.len(), 300);
    }
}
