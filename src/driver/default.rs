//! Fallback driver for unrecognized ISO 7816-4 cards

use super::CardDriver;
use crate::card::AtrEntry;

/// Matches every ATR; must be registered after all other drivers
static DEFAULT_ATRS: &[AtrEntry] = &[AtrEntry::masked(&[0x00], &[0x00], 0)];

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultDriver;

impl CardDriver for DefaultDriver {
    fn short_name(&self) -> &'static str {
        "default"
    }

    fn name(&self) -> &'static str {
        "Default driver for ISO 7816-4 cards"
    }

    fn atr_table(&self) -> &[AtrEntry] {
        DEFAULT_ATRS
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::card::tests::scripted_card;
    use crate::error::Error;

    #[test]
    fn test_matches_any_atr() {
        assert!(DefaultDriver.match_card(&[0x3B, 0x00]).is_some());
        assert!(DefaultDriver.match_card(&[0x3F]).is_some());
        assert!(DefaultDriver.match_card(&[]).is_none());
    }

    #[test]
    fn test_list_files_not_supported() {
        let (mut card, sent, _) = scripted_card(Arc::new(DefaultDriver), &[]);
        assert!(matches!(
            card.list_files(),
            Err(Error::NotSupported { operation: "list_files", .. })
        ));
        assert!(sent.lock().is_empty());
    }
}
