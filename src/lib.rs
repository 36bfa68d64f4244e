//! Smart card communication engine
//!
//! `cardlink` talks to ISO 7816 smart cards through a reader transport:
//!
//! - identifies cards by ATR and binds a card driver
//! - classifies, transmits and interprets APDUs
//! - navigates the card file system (SELECT FILE, LIST FILES, ACL decoding)
//! - records the algorithms a card supports
//!
//! Readers are reached through PC/SC (cargo feature `pcsc`) or through the
//! in-process simulated reader in [`reader::virtual_card`].
//!
//! ```
//! use cardlink::config::Config;
//! use cardlink::context::Context;
//! use cardlink::fs::{enumerate, EnumerateOptions, Path};
//! use cardlink::reader::{CardImage, VirtualTransport};
//!
//! let transport = VirtualTransport::with_card(CardImage::demo());
//! let mut ctx = Context::establish(&Config::default(), Box::new(transport))?;
//! ctx.detect_card(0)?;
//! let mut card = ctx.connect(0)?;
//! let tree = enumerate(&mut card, &Path::root(), &EnumerateOptions::default());
//! assert!(!tree.has_failures());
//! # Ok::<(), cardlink::Error>(())
//! ```

// APDU, TLV and SW mirror the ISO 7816 names
#![allow(clippy::upper_case_acronyms)]

// Protocol layers
pub mod apdu;
pub mod tlv;

// Sessions and drivers
pub mod card;
pub mod context;
pub mod driver;
pub mod fs;

pub mod config;
pub mod error;
pub mod reader;
pub mod util;

pub use card::{Card, CardLock, CardOptions};
pub use config::Config;
pub use context::Context;
pub use error::{Error, ErrorCategory, Result};
pub use fs::Path;
