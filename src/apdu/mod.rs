//! APDU (Application Protocol Data Unit) handling
//!
//! Command APDUs are built with [`APDU`], classified into one of the
//! ISO 7816-4 cases and serialized for transmission. Raw command bytes typed
//! by a user are classified with [`APDU::parse`], which follows the short
//! grammar `CLA INS P1 P2 [Lc data...] [Le]`.
//!
//! # Example
//! ```
//! use cardlink::apdu::{APDU, APDUCase};
//!
//! let apdu = APDU::parse(&[0x00, 0xA4, 0x00, 0x00, 0x02, 0x3F, 0x00]).unwrap();
//! assert_eq!(apdu.case, APDUCase::Case3Short);
//! assert_eq!(apdu.data, vec![0x3F, 0x00]);
//! ```

mod response;
mod status;

pub use response::Response;
pub use status::{
    classify, CardErrorKind, StatusClass, StatusEntry, StatusMeaning, ISO7816_STATUS, SW,
};

use std::fmt;

use thiserror::Error;

/// Largest command data field in short form
pub const MAX_SHORT_DATA: usize = 255;
/// Largest expected response length in short form (Le byte 00)
pub const MAX_SHORT_LE: u32 = 256;
/// Largest command data field in extended form
pub const MAX_EXTENDED_DATA: usize = 65535;
/// Largest expected response length in extended form (Le bytes 0000)
pub const MAX_EXTENDED_LE: u32 = 65536;

/// Errors raised while classifying or validating a command APDU
#[derive(Debug, Error, PartialEq, Eq)]
pub enum APDUError {
    #[error("APDU too short (need {needed} more byte(s))")]
    TooShort { needed: usize },

    #[error("APDU too long ({extra} byte(s) extra)")]
    TooLong { extra: usize },

    #[error("Lc must not be zero")]
    ZeroLc,

    #[error("Command data of {0} bytes does not fit the APDU case")]
    DataLength(usize),

    #[error("Expected response length {0} does not fit the APDU case")]
    InvalidLe(u32),
}

/// ISO 7816-4 command case
///
/// Case 1 carries neither command data nor Le, case 2 only Le, case 3 only
/// command data and case 4 both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum APDUCase {
    Case1,
    Case2Short,
    Case3Short,
    Case4Short,
    Case2Extended,
    Case3Extended,
    Case4Extended,
}

impl APDUCase {
    /// Case number 1 to 4
    pub fn number(self) -> u8 {
        match self {
            APDUCase::Case1 => 1,
            APDUCase::Case2Short | APDUCase::Case2Extended => 2,
            APDUCase::Case3Short | APDUCase::Case3Extended => 3,
            APDUCase::Case4Short | APDUCase::Case4Extended => 4,
        }
    }

    pub fn is_extended(self) -> bool {
        matches!(
            self,
            APDUCase::Case2Extended | APDUCase::Case3Extended | APDUCase::Case4Extended
        )
    }

    /// Whether the case carries command data
    pub fn has_data(self) -> bool {
        matches!(self.number(), 3 | 4)
    }

    /// Whether the case carries an Le field
    pub fn has_le(self) -> bool {
        matches!(self.number(), 2 | 4)
    }

    /// Pick the smallest case able to carry `data_len` bytes and `le`
    pub fn for_lengths(data_len: usize, le: Option<u32>) -> APDUCase {
        let extended = data_len > MAX_SHORT_DATA || le.map_or(false, |l| l > MAX_SHORT_LE);
        match (data_len > 0, le.is_some(), extended) {
            (false, false, _) => APDUCase::Case1,
            (false, true, false) => APDUCase::Case2Short,
            (false, true, true) => APDUCase::Case2Extended,
            (true, false, false) => APDUCase::Case3Short,
            (true, false, true) => APDUCase::Case3Extended,
            (true, true, false) => APDUCase::Case4Short,
            (true, true, true) => APDUCase::Case4Extended,
        }
    }
}

impl fmt::Display for APDUCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let form = match self {
            APDUCase::Case1 => "",
            c if c.is_extended() => " extended",
            _ => " short",
        };
        write!(f, "case {}{}", self.number(), form)
    }
}

/// A command APDU
///
/// `le` is the expected response length Ne: a short Le byte of `00` is
/// stored as 256, an extended `0000` as 65536.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct APDU {
    /// Class byte (CLA)
    pub cla: u8,
    /// Instruction byte (INS)
    pub ins: u8,
    /// Parameter 1 (P1)
    pub p1: u8,
    /// Parameter 2 (P2)
    pub p2: u8,
    /// Command data (may be empty)
    pub data: Vec<u8>,
    /// Expected response length, None if absent
    pub le: Option<u32>,
    /// Case classification
    pub case: APDUCase,
}

impl APDU {
    /// Create a case 1 APDU with just the header
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Vec::new(),
            le: None,
            case: APDUCase::Case1,
        }
    }

    /// Attach command data, reclassifying the case
    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self.case = APDUCase::for_lengths(self.data.len(), self.le);
        self
    }

    /// Attach an expected response length, reclassifying the case
    pub fn with_le(mut self, le: u32) -> Self {
        self.le = Some(le);
        self.case = APDUCase::for_lengths(self.data.len(), self.le);
        self
    }

    /// Get P1-P2 combined as a u16
    pub fn p1p2(&self) -> u16 {
        ((self.p1 as u16) << 8) | (self.p2 as u16)
    }

    /// Classify raw command bytes
    ///
    /// After the four header bytes: nothing is case 1; a single byte is Le
    /// (case 2); otherwise the first byte is Lc, followed by Lc data bytes
    /// and at most one trailing Le byte (case 3 or 4).
    pub fn parse(raw: &[u8]) -> Result<APDU, APDUError> {
        if raw.len() < 4 {
            return Err(APDUError::TooShort {
                needed: 4 - raw.len(),
            });
        }

        let mut apdu = APDU::new(raw[0], raw[1], raw[2], raw[3]);
        let body = &raw[4..];

        match body.len() {
            0 => Ok(apdu),
            1 => {
                apdu.le = Some(short_le(body[0]));
                apdu.case = APDUCase::Case2Short;
                Ok(apdu)
            }
            _ => {
                let lc = body[0] as usize;
                if lc == 0 {
                    return Err(APDUError::ZeroLc);
                }
                let rest = &body[1..];
                if rest.len() < lc {
                    return Err(APDUError::TooShort {
                        needed: lc - rest.len(),
                    });
                }
                let (data, tail) = rest.split_at(lc);
                apdu.data = data.to_vec();
                match tail.len() {
                    0 => apdu.case = APDUCase::Case3Short,
                    1 => {
                        apdu.le = Some(short_le(tail[0]));
                        apdu.case = APDUCase::Case4Short;
                    }
                    n => return Err(APDUError::TooLong { extra: n - 1 }),
                }
                Ok(apdu)
            }
        }
    }

    /// Check that data, Le and the declared case agree
    pub fn check(&self) -> Result<(), APDUError> {
        let (max_data, max_le) = if self.case.is_extended() {
            (MAX_EXTENDED_DATA, MAX_EXTENDED_LE)
        } else {
            (MAX_SHORT_DATA, MAX_SHORT_LE)
        };

        if self.case.has_data() {
            if self.data.is_empty() || self.data.len() > max_data {
                return Err(APDUError::DataLength(self.data.len()));
            }
        } else if !self.data.is_empty() {
            return Err(APDUError::DataLength(self.data.len()));
        }

        match (self.case.has_le(), self.le) {
            (true, Some(le)) if le == 0 || le > max_le => Err(APDUError::InvalidLe(le)),
            (true, None) => Err(APDUError::InvalidLe(0)),
            (false, Some(le)) => Err(APDUError::InvalidLe(le)),
            _ => Ok(()),
        }
    }

    /// Serialize for transmission
    pub fn to_bytes(&self) -> Result<Vec<u8>, APDUError> {
        self.check()?;

        let mut out = Vec::with_capacity(4 + 3 + self.data.len() + 3);
        out.extend_from_slice(&[self.cla, self.ins, self.p1, self.p2]);
        let le = self.le.unwrap_or(0);

        if self.case.is_extended() {
            out.push(0x00);
            if self.case.has_data() {
                out.extend_from_slice(&(self.data.len() as u16).to_be_bytes());
                out.extend_from_slice(&self.data);
            }
            if self.case.has_le() {
                // 65536 wraps to 0000
                out.extend_from_slice(&(le as u16).to_be_bytes());
            }
        } else {
            if self.case.has_data() {
                out.push(self.data.len() as u8);
                out.extend_from_slice(&self.data);
            }
            if self.case.has_le() {
                // 256 wraps to 00
                out.push(le as u8);
            }
        }
        Ok(out)
    }
}

fn short_le(byte: u8) -> u32 {
    if byte == 0 {
        MAX_SHORT_LE
    } else {
        byte as u32
    }
}

/// ISO 7816-4 instruction bytes
pub mod ins {
    pub const SELECT_FILE: u8 = 0xA4;
    pub const READ_BINARY: u8 = 0xB0;
    pub const READ_RECORD: u8 = 0xB2;
    pub const GET_RESPONSE: u8 = 0xC0;
    pub const VERIFY: u8 = 0x20;
    pub const GET_CHALLENGE: u8 = 0x84;
    /// Proprietary directory listing (SetCOS, class 0x80)
    pub const LIST_FILES: u8 = 0xAA;
    /// Proprietary directory entry lookup (Cryptoflex, class 0xF0)
    pub const DIRECTORY: u8 = 0xA8;
}
