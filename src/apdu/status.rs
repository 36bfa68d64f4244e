//! Status Word (SW) constants and classification
//!
//! ISO 7816-4 status words indicating command execution results. Mapping a
//! status word to an outcome is table driven: a driver may supply its own
//! entries, which are consulted before the generic ISO 7816-4 table.

use std::fmt;

use crate::error::{Error, Result};

/// Status Word constants
#[allow(dead_code)]
pub struct SW;

#[allow(dead_code)]
impl SW {
    // Success
    pub const SUCCESS: u16 = 0x9000;

    // Warnings (62xx, 63xx)
    pub const WARNING_NO_CHANGE: u16 = 0x6200;
    pub const WARNING_CORRUPTED: u16 = 0x6281;
    pub const WARNING_EOF: u16 = 0x6282;
    pub const WARNING_SELECTED_FILE_INVALIDATED: u16 = 0x6283;
    pub const WARNING_FCI_INVALID: u16 = 0x6284;

    // Execution errors (64xx, 65xx)
    pub const EXEC_ERROR: u16 = 0x6400;
    pub const MEMORY_FAILURE: u16 = 0x6581;

    // Checking errors (67xx - 6Fxx)
    pub const WRONG_LENGTH: u16 = 0x6700;

    pub const LOGICAL_CHANNEL_NOT_SUPPORTED: u16 = 0x6881;
    pub const SECURE_MESSAGING_NOT_SUPPORTED: u16 = 0x6882;

    pub const COMMAND_NOT_ALLOWED: u16 = 0x6900;
    pub const COMMAND_INCOMPATIBLE: u16 = 0x6981;
    pub const SECURITY_STATUS_NOT_SATISFIED: u16 = 0x6982;
    pub const AUTH_METHOD_BLOCKED: u16 = 0x6983;
    pub const REFERENCE_DATA_NOT_USABLE: u16 = 0x6984;
    pub const CONDITIONS_NOT_SATISFIED: u16 = 0x6985;
    pub const COMMAND_NOT_ALLOWED_NO_EF: u16 = 0x6986;

    pub const WRONG_DATA: u16 = 0x6A80;
    pub const FUNCTION_NOT_SUPPORTED: u16 = 0x6A81;
    pub const FILE_NOT_FOUND: u16 = 0x6A82;
    pub const RECORD_NOT_FOUND: u16 = 0x6A83;
    pub const NOT_ENOUGH_MEMORY: u16 = 0x6A84;
    pub const INCORRECT_P1_P2: u16 = 0x6A86;
    pub const REFERENCED_DATA_NOT_FOUND: u16 = 0x6A88;
    pub const FILE_ALREADY_EXISTS: u16 = 0x6A89;

    pub const WRONG_P1_P2: u16 = 0x6B00;

    pub const INS_NOT_SUPPORTED: u16 = 0x6D00;
    pub const CLA_NOT_SUPPORTED: u16 = 0x6E00;
    pub const UNKNOWN_ERROR: u16 = 0x6F00;

    /// Create a "more data available" status word (61xx)
    #[inline]
    pub fn bytes_remaining(remaining: u8) -> u16 {
        0x6100 | (remaining as u16)
    }

    /// Create a "wrong Le" status word (6Cxx)
    /// The low byte indicates the correct Le value
    #[inline]
    pub fn wrong_le(correct_le: u8) -> u16 {
        0x6C00 | (correct_le as u16)
    }

    /// Combine SW1 and SW2
    #[inline]
    pub fn from_bytes(sw1: u8, sw2: u8) -> u16 {
        ((sw1 as u16) << 8) | (sw2 as u16)
    }
}

/// Generic reason a card refused a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardErrorKind {
    EndOfFile,
    MemoryFailure,
    WrongLength,
    SecureMessagingNotSupported,
    SecurityStatusNotSatisfied,
    AuthMethodBlocked,
    /// PIN verification failed; `tries_left` comes from the low nibble of SW2
    PinIncorrect { tries_left: u8 },
    ConditionsNotSatisfied,
    CommandNotAllowed,
    IncorrectParameters,
    FunctionNotSupported,
    FileNotFound,
    RecordNotFound,
    NotEnoughMemory,
    FileAlreadyExists,
    /// The card wants the command resent with Le = `correct`
    WrongLe { correct: u8 },
    InsNotSupported,
    ClaNotSupported,
    /// Not present in any status table
    Unknown,
}

impl CardErrorKind {
    /// Fill in the parts of the kind that are carried in SW2
    fn with_sw2(self, sw2: u8) -> Self {
        match self {
            CardErrorKind::PinIncorrect { .. } => CardErrorKind::PinIncorrect {
                tries_left: sw2 & 0x0F,
            },
            CardErrorKind::WrongLe { .. } => CardErrorKind::WrongLe { correct: sw2 },
            other => other,
        }
    }
}

impl fmt::Display for CardErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardErrorKind::EndOfFile => write!(f, "End of file reached before Le bytes"),
            CardErrorKind::MemoryFailure => write!(f, "Memory failure"),
            CardErrorKind::WrongLength => write!(f, "Wrong length"),
            CardErrorKind::SecureMessagingNotSupported => {
                write!(f, "Secure messaging not supported")
            }
            CardErrorKind::SecurityStatusNotSatisfied => write!(f, "Security status not satisfied"),
            CardErrorKind::AuthMethodBlocked => write!(f, "Authentication method blocked"),
            CardErrorKind::PinIncorrect { tries_left } => {
                write!(f, "PIN incorrect ({} tries left)", tries_left)
            }
            CardErrorKind::ConditionsNotSatisfied => write!(f, "Conditions of use not satisfied"),
            CardErrorKind::CommandNotAllowed => write!(f, "Command not allowed"),
            CardErrorKind::IncorrectParameters => write!(f, "Incorrect parameters"),
            CardErrorKind::FunctionNotSupported => write!(f, "Function not supported"),
            CardErrorKind::FileNotFound => write!(f, "File not found"),
            CardErrorKind::RecordNotFound => write!(f, "Record not found"),
            CardErrorKind::NotEnoughMemory => write!(f, "Not enough memory in file"),
            CardErrorKind::FileAlreadyExists => write!(f, "File already exists"),
            CardErrorKind::WrongLe { correct } => write!(f, "Wrong Le, card expects {}", correct),
            CardErrorKind::InsNotSupported => write!(f, "Instruction not supported"),
            CardErrorKind::ClaNotSupported => write!(f, "Class not supported"),
            CardErrorKind::Unknown => write!(f, "Unknown card error"),
        }
    }
}

/// What a status word table entry means
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusMeaning {
    Success,
    /// Response continues; SW2 holds the remaining byte count (0 = 256 or more)
    MoreData,
    Failure(CardErrorKind),
}

/// One row of a status word table
///
/// Matches when `(sw & mask) == sw_value`. Exact entries use a mask of
/// `0xFFFF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusEntry {
    pub sw: u16,
    pub mask: u16,
    pub meaning: StatusMeaning,
}

impl StatusEntry {
    pub const fn exact(sw: u16, meaning: StatusMeaning) -> Self {
        Self {
            sw,
            mask: 0xFFFF,
            meaning,
        }
    }

    pub const fn masked(sw: u16, mask: u16, meaning: StatusMeaning) -> Self {
        Self { sw, mask, meaning }
    }

    fn matches(&self, sw: u16) -> bool {
        sw & self.mask == self.sw
    }
}

const fn fail(kind: CardErrorKind) -> StatusMeaning {
    StatusMeaning::Failure(kind)
}

/// Generic ISO 7816-4 status words
pub const ISO7816_STATUS: &[StatusEntry] = &[
    StatusEntry::exact(SW::SUCCESS, StatusMeaning::Success),
    StatusEntry::masked(0x6100, 0xFF00, StatusMeaning::MoreData),
    StatusEntry::exact(SW::WARNING_EOF, fail(CardErrorKind::EndOfFile)),
    StatusEntry::exact(SW::MEMORY_FAILURE, fail(CardErrorKind::MemoryFailure)),
    StatusEntry::masked(0x63C0, 0xFFF0, fail(CardErrorKind::PinIncorrect { tries_left: 0 })),
    StatusEntry::exact(SW::WRONG_LENGTH, fail(CardErrorKind::WrongLength)),
    StatusEntry::exact(
        SW::SECURE_MESSAGING_NOT_SUPPORTED,
        fail(CardErrorKind::SecureMessagingNotSupported),
    ),
    StatusEntry::exact(SW::COMMAND_NOT_ALLOWED, fail(CardErrorKind::CommandNotAllowed)),
    StatusEntry::exact(SW::COMMAND_INCOMPATIBLE, fail(CardErrorKind::CommandNotAllowed)),
    StatusEntry::exact(
        SW::SECURITY_STATUS_NOT_SATISFIED,
        fail(CardErrorKind::SecurityStatusNotSatisfied),
    ),
    StatusEntry::exact(SW::AUTH_METHOD_BLOCKED, fail(CardErrorKind::AuthMethodBlocked)),
    StatusEntry::exact(
        SW::REFERENCE_DATA_NOT_USABLE,
        fail(CardErrorKind::AuthMethodBlocked),
    ),
    StatusEntry::exact(
        SW::CONDITIONS_NOT_SATISFIED,
        fail(CardErrorKind::ConditionsNotSatisfied),
    ),
    StatusEntry::exact(SW::COMMAND_NOT_ALLOWED_NO_EF, fail(CardErrorKind::CommandNotAllowed)),
    StatusEntry::exact(SW::WRONG_DATA, fail(CardErrorKind::IncorrectParameters)),
    StatusEntry::exact(SW::FUNCTION_NOT_SUPPORTED, fail(CardErrorKind::FunctionNotSupported)),
    StatusEntry::exact(SW::FILE_NOT_FOUND, fail(CardErrorKind::FileNotFound)),
    StatusEntry::exact(SW::RECORD_NOT_FOUND, fail(CardErrorKind::RecordNotFound)),
    StatusEntry::exact(SW::NOT_ENOUGH_MEMORY, fail(CardErrorKind::NotEnoughMemory)),
    StatusEntry::exact(SW::INCORRECT_P1_P2, fail(CardErrorKind::IncorrectParameters)),
    StatusEntry::exact(SW::REFERENCED_DATA_NOT_FOUND, fail(CardErrorKind::FileNotFound)),
    StatusEntry::exact(SW::FILE_ALREADY_EXISTS, fail(CardErrorKind::FileAlreadyExists)),
    StatusEntry::exact(SW::WRONG_P1_P2, fail(CardErrorKind::IncorrectParameters)),
    StatusEntry::masked(0x6C00, 0xFF00, fail(CardErrorKind::WrongLe { correct: 0 })),
    StatusEntry::exact(SW::INS_NOT_SUPPORTED, fail(CardErrorKind::InsNotSupported)),
    StatusEntry::exact(SW::CLA_NOT_SUPPORTED, fail(CardErrorKind::ClaNotSupported)),
];

/// Outcome of a single APDU exchange as far as the status word tells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    /// Follow up with GET RESPONSE; 0 means 256 or more bytes wait
    MoreData { remaining: u8 },
    Failure {
        kind: CardErrorKind,
        sw1: u8,
        sw2: u8,
    },
}

impl StatusClass {
    pub fn is_success(&self) -> bool {
        matches!(self, StatusClass::Success)
    }

    /// Success and "more data" are Ok, failures become [`Error::Card`]
    pub fn into_result(self) -> Result<()> {
        match self {
            StatusClass::Success | StatusClass::MoreData { .. } => Ok(()),
            StatusClass::Failure { kind, sw1, sw2 } => Err(Error::Card { kind, sw1, sw2 }),
        }
    }
}

/// Classify a status word
///
/// `driver_entries` are consulted first, then [`ISO7816_STATUS`]. The first
/// matching entry wins. Anything unmatched is an opaque
/// [`CardErrorKind::Unknown`] failure carrying both bytes.
pub fn classify(driver_entries: &[StatusEntry], sw1: u8, sw2: u8) -> StatusClass {
    let sw = SW::from_bytes(sw1, sw2);
    let meaning = driver_entries
        .iter()
        .chain(ISO7816_STATUS.iter())
        .find(|e| e.matches(sw))
        .map(|e| e.meaning)
        .unwrap_or(StatusMeaning::Failure(CardErrorKind::Unknown));

    match meaning {
        StatusMeaning::Success => StatusClass::Success,
        StatusMeaning::MoreData => StatusClass::MoreData { remaining: sw2 },
        StatusMeaning::Failure(kind) => StatusClass::Failure {
            kind: kind.with_sw2(sw2),
            sw1,
            sw2,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_remaining() {
        assert_eq!(SW::bytes_remaining(0), 0x6100);
        assert_eq!(SW::bytes_remaining(16), 0x6110);
        assert_eq!(SW::bytes_remaining(255), 0x61FF);
    }

    #[test]
    fn test_success() {
        assert_eq!(classify(&[], 0x90, 0x00), StatusClass::Success);
        assert!(classify(&[], 0x90, 0x00).into_result().is_ok());
    }

    #[test]
    fn test_more_data_is_not_an_error() {
        let class = classify(&[], 0x61, 0x03);
        assert_eq!(class, StatusClass::MoreData { remaining: 3 });
        assert!(class.into_result().is_ok());
    }

    #[test]
    fn test_unmapped_is_opaque() {
        let class = classify(&[], 0x6F, 0x00);
        assert_eq!(
            class,
            StatusClass::Failure {
                kind: CardErrorKind::Unknown,
                sw1: 0x6F,
                sw2: 0x00
            }
        );
        match class.into_result() {
            Err(Error::Card { sw1, sw2, .. }) => assert_eq!((sw1, sw2), (0x6F, 0x00)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_masked_entries_carry_sw2() {
        assert_eq!(
            classify(&[], 0x63, 0xC2),
            StatusClass::Failure {
                kind: CardErrorKind::PinIncorrect { tries_left: 2 },
                sw1: 0x63,
                sw2: 0xC2
            }
        );
        assert!(matches!(
            classify(&[], 0x6C, 0x10),
            StatusClass::Failure {
                kind: CardErrorKind::WrongLe { correct: 0x10 },
                ..
            }
        ));
    }

    #[test]
    fn test_driver_entries_take_precedence() {
        const GSM: &[StatusEntry] = &[
            StatusEntry::masked(0x9F00, 0xFF00, StatusMeaning::MoreData),
            StatusEntry::exact(0x6A82, StatusMeaning::Failure(CardErrorKind::RecordNotFound)),
        ];
        assert_eq!(classify(GSM, 0x9F, 0x20), StatusClass::MoreData { remaining: 0x20 });
        assert!(matches!(
            classify(GSM, 0x6A, 0x82),
            StatusClass::Failure {
                kind: CardErrorKind::RecordNotFound,
                ..
            }
        ));
        // Without the driver table 9Fxx is unknown
        assert!(matches!(
            classify(&[], 0x9F, 0x20),
            StatusClass::Failure {
                kind: CardErrorKind::Unknown,
                ..
            }
        ));
    }
}
