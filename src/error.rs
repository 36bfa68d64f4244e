//! Crate-wide error type
//!
//! Every fallible operation returns [`Result`]. Errors are grouped into
//! categories so front ends can decide how to react (and which exit code to
//! use) without matching on every variant.

use thiserror::Error;

use crate::apdu::{APDUError, CardErrorKind};
use crate::tlv::TLVError;

/// Broad classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed caller input, rejected before anything was transmitted
    Input,
    /// Reader or bus failure
    Transport,
    /// No card in the reader
    NoCard,
    /// The card answered with a failure status word
    Card,
    /// The card answered with something that violates the protocol
    Protocol,
    /// Caller misuse: invalid handle, bad index, unbalanced lock
    Usage,
    /// Configuration could not be loaded
    Config,
}

/// Errors produced by the card communication engine
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid hex string: {0}")]
    InvalidHex(String),

    #[error(transparent)]
    Apdu(#[from] APDUError),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Path too long: {len} bytes exceeds the maximum of {max}")]
    PathTooLong { len: usize, max: usize },

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Card not present")]
    CardNotPresent,

    #[error("Reader index {index} out of range ({count} reader(s) configured)")]
    ReaderIndexOutOfRange { index: usize, count: usize },

    #[error("No card detected in reader {0}; detect the card before connecting")]
    NotDetected(usize),

    #[error("Card driver '{0}' not found")]
    DriverNotFound(String),

    #[error("Card not recognized by any registered driver")]
    CardNotRecognized,

    #[error("Operation '{operation}' not supported by card driver '{driver}'")]
    NotSupported {
        driver: String,
        operation: &'static str,
    },

    #[error("Invalid handle: the owning context has been destroyed")]
    InvalidHandle,

    #[error("Card is still locked ({0} outstanding lock(s))")]
    CardLocked(u32),

    #[error("Currently selected file is not a dedicated file")]
    NotADirectory,

    #[error("{kind} (SW1=0x{sw1:02X}, SW2=0x{sw2:02X})")]
    Card {
        kind: CardErrorKind,
        sw1: u8,
        sw2: u8,
    },

    #[error("File listing has odd length {0}")]
    OddListLength(usize),

    #[error("Unexpected card response: {0}")]
    UnexpectedResponse(String),

    #[error(transparent)]
    Tlv(#[from] TLVError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classify this error according to the engine's error taxonomy
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidHex(_)
            | Error::Apdu(_)
            | Error::InvalidPath(_)
            | Error::InvalidArguments(_) => ErrorCategory::Input,
            Error::Transport(_) | Error::Io(_) => ErrorCategory::Transport,
            Error::CardNotPresent => ErrorCategory::NoCard,
            Error::Card { .. } => ErrorCategory::Card,
            Error::OddListLength(_) | Error::UnexpectedResponse(_) | Error::Tlv(_) => {
                ErrorCategory::Protocol
            }
            Error::ReaderIndexOutOfRange { .. }
            | Error::NotDetected(_)
            | Error::DriverNotFound(_)
            | Error::CardNotRecognized
            | Error::NotSupported { .. }
            | Error::InvalidHandle
            | Error::CardLocked(_)
            | Error::NotADirectory
            | Error::PathTooLong { .. } => ErrorCategory::Usage,
            Error::Config(_) => ErrorCategory::Config,
        }
    }

    /// Status words carried by a card-reported error
    pub fn status_words(&self) -> Option<(u8, u8)> {
        match self {
            Error::Card { sw1, sw2, .. } => Some((*sw1, *sw2)),
            _ => None,
        }
    }
}

#[cfg(feature = "pcsc")]
impl From<pcsc::Error> for Error {
    fn from(err: pcsc::Error) -> Self {
        match err {
            pcsc::Error::NoSmartcard | pcsc::Error::RemovedCard => Error::CardNotPresent,
            pcsc::Error::InvalidHandle => Error::InvalidHandle,
            other => Error::Transport(other.to_string()),
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;
