//! SetCOS 4.x / FINEID driver
//!
//! Plain ISO 7816-4 FCP handling plus the proprietary LIST FILES command
//! (`80 AA 00 00`), which returns the identifiers of every file in the
//! current DF.

use super::{iso7816, CardDriver};
use crate::apdu::{ins, APDU, MAX_SHORT_LE};
use crate::card::{AlgorithmFlags, AtrEntry, Card};
use crate::error::Result;

pub const TYPE_SETCOS_GENERIC: u32 = 1;
pub const TYPE_SETCOS_FINEID: u32 = 2;

static SETCOS_ATRS: &[AtrEntry] = &[
    AtrEntry::new(
        &[
            0x3B, 0x9F, 0x94, 0x40, 0x1E, 0x00, 0x67, 0x11, 0x43, 0x46, 0x49, 0x53, 0x45, 0x10,
            0x52, 0x66, 0xFF, 0x81, 0x90, 0x00,
        ],
        TYPE_SETCOS_FINEID,
    ),
    AtrEntry::new(&[0x3B, 0x02, 0x14, 0x50], TYPE_SETCOS_GENERIC),
];

const RSA_KEY_LENGTHS: [usize; 3] = [512, 768, 1024];

#[derive(Debug, Default, Clone, Copy)]
pub struct SetcosDriver;

impl CardDriver for SetcosDriver {
    fn short_name(&self) -> &'static str {
        "setcos"
    }

    fn name(&self) -> &'static str {
        "Setec SetCOS 4.x / FINEID"
    }

    fn atr_table(&self) -> &[AtrEntry] {
        SETCOS_ATRS
    }

    fn init(&self, card: &mut Card) -> Result<()> {
        card.cla = 0x00;
        let flags = AlgorithmFlags::RSA_PAD_PKCS1
            | AlgorithmFlags::RSA_HASH_NONE
            | AlgorithmFlags::ONBOARD_KEY_GEN;
        for bits in RSA_KEY_LENGTHS {
            card.algorithms.add_rsa(bits, flags, 0x10001);
        }
        Ok(())
    }

    fn list_files(&self, card: &mut Card) -> Result<Vec<u8>> {
        let apdu = APDU::new(0x80, ins::LIST_FILES, 0x00, 0x00).with_le(MAX_SHORT_LE);
        let resp = iso7816::transceive(card, &apdu)?;
        card.check_response(&resp)?;
        Ok(resp.data)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::card::tests::scripted_card;
    use crate::error::Error;
    use crate::fs::Path;

    #[test]
    fn test_atr_types() {
        let fineid = SETCOS_ATRS[0].atr.to_vec();
        assert_eq!(SetcosDriver.match_card(&fineid).unwrap().id, TYPE_SETCOS_FINEID);
        assert_eq!(
            SetcosDriver.match_card(&[0x3B, 0x02, 0x14, 0x50]).unwrap().id,
            TYPE_SETCOS_GENERIC
        );
        assert!(SetcosDriver.match_card(&[0x3B, 0x02, 0x14, 0x51]).is_none());
    }

    #[test]
    fn test_init_registers_rsa() {
        let (mut card, _, _) = scripted_card(Arc::new(SetcosDriver), &[]);
        SetcosDriver.init(&mut card).unwrap();
        assert_eq!(card.algorithms.len(), 3);
        let rsa = card.algorithms.find_rsa(768).unwrap();
        assert_eq!(rsa.exponent, 0x10001);
        assert!(rsa.flags.contains(AlgorithmFlags::ONBOARD_KEY_GEN));
    }

    #[test]
    fn test_list_files() {
        let (mut card, sent, _) = scripted_card(
            Arc::new(SetcosDriver),
            &[&[0x50, 0x15, 0x00, 0x11, 0x90, 0x00]],
        );
        let ids = card.list_files().unwrap();
        assert_eq!(ids, vec![[0x50, 0x15], [0x00, 0x11]]);
        assert_eq!(sent.lock()[0], vec![0x80, 0xAA, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_odd_listing_is_protocol_error() {
        let (mut card, _, _) = scripted_card(
            Arc::new(SetcosDriver),
            &[&[0x50, 0x15, 0x00, 0x90, 0x00]],
        );
        assert!(matches!(card.list_files(), Err(Error::OddListLength(3))));
    }

    #[test]
    fn test_list_refused_on_ef() {
        // Select answers with an EF FCP
        let fcp = hex::decode("620B82010183025015800200109000").unwrap();
        let (mut card, sent, _) = scripted_card(Arc::new(SetcosDriver), &[&fcp]);
        card.select_file(&Path::parse("3F005015").unwrap()).unwrap();
        assert!(matches!(card.list_files(), Err(Error::NotADirectory)));
        assert_eq!(sent.lock().len(), 1);
    }
}
