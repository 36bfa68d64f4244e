//! Card drivers
//!
//! A driver identifies a card family by ATR and implements the operations
//! whose encoding differs between families. Anything a driver does not
//! override falls back to the ISO 7816-4 helpers in [`iso7816`].

pub mod default;
pub mod flex;
pub mod iso7816;
pub mod setcos;

use std::sync::Arc;

use crate::apdu::{classify, StatusClass, StatusEntry};
use crate::card::{match_atr, AtrEntry, AtrMatch, Card};
use crate::error::{Error, Result};
use crate::fs::{Path, SelectedFile};

/// Operations a card family plugs into the engine
pub trait CardDriver: Send + Sync {
    /// Name used for configuration and `--card-driver`
    fn short_name(&self) -> &'static str;

    /// Human readable name
    fn name(&self) -> &'static str;

    /// ATR patterns of supported cards, most specific first
    fn atr_table(&self) -> &[AtrEntry];

    fn match_card(&self, atr: &[u8]) -> Option<AtrMatch> {
        match_atr(self.atr_table(), atr)
    }

    /// Prepare a freshly connected card: class byte, algorithms and the like
    fn init(&self, _card: &mut Card) -> Result<()> {
        Ok(())
    }

    /// Family specific status words, consulted before the ISO 7816-4 table
    fn status_entries(&self) -> &[StatusEntry] {
        &[]
    }

    fn check_sw(&self, sw1: u8, sw2: u8) -> StatusClass {
        classify(self.status_entries(), sw1, sw2)
    }

    fn select_file(&self, card: &mut Card, path: &Path) -> Result<SelectedFile> {
        iso7816::select_file(card, path)
    }

    fn read_binary(&self, card: &mut Card, offset: usize, count: usize) -> Result<Vec<u8>> {
        iso7816::read_binary(card, offset, count)
    }

    fn read_record(&self, card: &mut Card, record: u8) -> Result<Vec<u8>> {
        iso7816::read_record(card, record)
    }

    /// Raw child identifiers of the selected DF, two bytes each
    fn list_files(&self, _card: &mut Card) -> Result<Vec<u8>> {
        Err(Error::NotSupported {
            driver: self.short_name().to_string(),
            operation: "list_files",
        })
    }
}

/// All built-in drivers in registration order
///
/// The fallback driver matches any ATR and therefore comes last.
pub fn builtin_drivers() -> Vec<Arc<dyn CardDriver>> {
    vec![
        Arc::new(setcos::SetcosDriver),
        Arc::new(flex::FlexDriver),
        Arc::new(default::DefaultDriver),
    ]
}

/// Look up a built-in driver by short name
pub fn builtin_driver(short_name: &str) -> Option<Arc<dyn CardDriver>> {
    builtin_drivers()
        .into_iter()
        .find(|d| d.short_name() == short_name)
}
