//! TLV (Tag-Length-Value) encoding and decoding
//!
//! BER-TLV as used by ISO 7816-4 for File Control Parameters. Card output is
//! untrusted, so decoding is strict: any truncated tag, length or value is an
//! error instead of a silently shortened list.
//!
//! # Example
//! ```
//! use cardlink::tlv::read_list;
//!
//! let fcp = [0x62, 0x04, 0x83, 0x02, 0x3F, 0x00];
//! let tlvs = read_list(&fcp, true).unwrap();
//! assert_eq!(tlvs[0].find(0x83).unwrap().value, vec![0x3F, 0x00]);
//! ```

mod encoder;
mod parser;

pub use encoder::TLVBuilder;
pub use parser::{TLVError, TLV};

/// Parse TLV data and return a list of TLV structures
///
/// # Arguments
/// * `data` - Raw bytes to parse
/// * `recursive` - If true, parse nested TLVs in constructed tags
pub fn read_list(data: &[u8], recursive: bool) -> Result<Vec<TLV>, TLVError> {
    parser::read_list(data, recursive)
}
