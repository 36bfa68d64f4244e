//! Schlumberger Cryptoflex / Multiflex driver
//!
//! These cards speak T=0 with class byte `C0`. A SELECT FILE reply is a
//! fixed proprietary layout rather than an FCP template:
//!
//! | offset | meaning                                 |
//! |--------|-----------------------------------------|
//! | 2..4   | file size                               |
//! | 4..6   | file identifier                         |
//! | 6      | type (01/02/04/06 EF, 38 DF)            |
//! | 8..    | access conditions, one nibble per slot |
//!
//! Paths are selected one component at a time and directories are listed
//! by asking for entry `n` with `F0 A8 00 n` until the card answers `6A82`.

use log::debug;

use super::{iso7816, CardDriver};
use crate::apdu::{ins, CardErrorKind, StatusClass, StatusEntry, StatusMeaning, APDU};
use crate::card::{AlgorithmFlags, AtrEntry, Card};
use crate::error::{Error, Result};
use crate::fs::{
    acl_slots, AccessRule, EfStructure, FileDescriptor, FileType, Path, SelectedFile,
};

pub const TYPE_CRYPTOFLEX: u32 = 1;
pub const TYPE_MULTIFLEX: u32 = 2;

static FLEX_ATRS: &[AtrEntry] = &[
    AtrEntry::new(
        &[0x3B, 0x95, 0x15, 0x40, 0x20, 0x68, 0x01, 0x02, 0x00, 0x00],
        TYPE_CRYPTOFLEX,
    ),
    AtrEntry::new(
        &[0x3B, 0x95, 0x94, 0x40, 0xFF, 0x63, 0x01, 0x01, 0x02, 0x01],
        TYPE_CRYPTOFLEX,
    ),
    AtrEntry::masked(
        &[0x3B, 0x85, 0x40, 0x20, 0x68, 0x01, 0x01, 0x00, 0x00],
        &[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00],
        TYPE_MULTIFLEX,
    ),
];

/// GSM 11.11 style status words used by these cards
static FLEX_STATUS: &[StatusEntry] = &[
    StatusEntry::masked(0x9F00, 0xFF00, StatusMeaning::MoreData),
    StatusEntry::exact(
        0x9802,
        StatusMeaning::Failure(CardErrorKind::SecurityStatusNotSatisfied),
    ),
    StatusEntry::exact(
        0x9804,
        StatusMeaning::Failure(CardErrorKind::SecurityStatusNotSatisfied),
    ),
    StatusEntry::exact(
        0x9808,
        StatusMeaning::Failure(CardErrorKind::ConditionsNotSatisfied),
    ),
    StatusEntry::exact(0x9840, StatusMeaning::Failure(CardErrorKind::AuthMethodBlocked)),
];

/// Class byte of the directory listing command
const CLA_DIRECTORY: u8 = 0xF0;
/// Length of one proprietary file entry
const ENTRY_LEN: u32 = 0x0C;
/// Smallest reply that carries the file type
const MIN_REPLY_LEN: usize = 7;

#[derive(Debug, Default, Clone, Copy)]
pub struct FlexDriver;

impl FlexDriver {
    fn select_component(&self, card: &mut Card, fid: [u8; 2]) -> Result<Vec<u8>> {
        let apdu = APDU::new(card.cla, ins::SELECT_FILE, 0x00, 0x00).with_data(fid.to_vec());
        let resp = iso7816::transceive(card, &apdu)?;
        card.check_response(&resp)?;
        Ok(resp.data)
    }
}

impl CardDriver for FlexDriver {
    fn short_name(&self) -> &'static str {
        "flex"
    }

    fn name(&self) -> &'static str {
        "Schlumberger Multiflex/Cryptoflex"
    }

    fn atr_table(&self) -> &[AtrEntry] {
        FLEX_ATRS
    }

    fn init(&self, card: &mut Card) -> Result<()> {
        card.cla = 0xC0;
        let flags = AlgorithmFlags::RSA_PAD_PKCS1 | AlgorithmFlags::RSA_HASH_NONE;
        if card.type_id() == TYPE_CRYPTOFLEX {
            for bits in [512, 768, 1024] {
                card.algorithms
                    .add_rsa(bits, flags | AlgorithmFlags::ONBOARD_KEY_GEN, 0x10001);
            }
        }
        Ok(())
    }

    fn status_entries(&self) -> &[StatusEntry] {
        FLEX_STATUS
    }

    fn select_file(&self, card: &mut Card, path: &Path) -> Result<SelectedFile> {
        let mut reply = Vec::new();
        for fid in path.components() {
            reply = self.select_component(card, fid)?;
        }
        match parse_flex_reply(&reply)? {
            Some(fd) => Ok(SelectedFile::Described(fd)),
            None => Ok(SelectedFile::NotDescribed),
        }
    }

    fn list_files(&self, card: &mut Card) -> Result<Vec<u8>> {
        let mut ids = Vec::new();
        for index in 0..=u8::MAX {
            let apdu = APDU::new(CLA_DIRECTORY, ins::DIRECTORY, 0x00, index).with_le(ENTRY_LEN);
            let resp = iso7816::transceive(card, &apdu)?;
            if let StatusClass::Failure {
                kind: CardErrorKind::FileNotFound,
                ..
            } = card.check_sw(resp.sw1, resp.sw2)
            {
                break;
            }
            card.check_response(&resp)?;
            if resp.data.len() < 6 {
                return Err(Error::UnexpectedResponse(format!(
                    "directory entry of {} byte(s)",
                    resp.data.len()
                )));
            }
            ids.extend_from_slice(&resp.data[4..6]);
        }
        debug!("Directory holds {} file(s)", ids.len() / 2);
        Ok(ids)
    }
}

/// Decode a proprietary SELECT reply
///
/// Returns `None` for replies too short to carry a file type, and
/// `UnexpectedResponse` for a file type byte the card family does not define.
pub fn parse_flex_reply(p: &[u8]) -> Result<Option<FileDescriptor>> {
    if p.len() < MIN_REPLY_LEN {
        return Ok(None);
    }
    let (file_type, structure) = match p[6] {
        0x01 => (FileType::WorkingEf, EfStructure::Transparent),
        0x02 => (FileType::WorkingEf, EfStructure::LinearFixed),
        0x04 => (FileType::WorkingEf, EfStructure::LinearVariable),
        0x06 => (FileType::WorkingEf, EfStructure::Cyclic),
        0x38 => (FileType::Df, EfStructure::Unknown),
        other => {
            return Err(Error::UnexpectedResponse(format!(
                "unknown file type 0x{:02X}",
                other
            )))
        }
    };

    let mut fd = FileDescriptor::new([p[4], p[5]], file_type);
    fd.ef_structure = structure;
    fd.size = ((p[2] as usize) << 8) | p[3] as usize;

    if p.len() > 8 {
        let nibbles = p[8..].iter().flat_map(|&b| [b >> 4, b & 0x0F]);
        for (slot, nibble) in nibbles.take(acl_slots(file_type)).enumerate() {
            fd.acl[slot] = flex_access_rule(nibble);
        }
        fd.sec_attr = p[8..].to_vec();
    }
    Ok(Some(fd))
}

/// Map one access condition nibble of a proprietary reply
///
/// Only always, CHV1, CHV2 and never carry over. Authentication key and
/// protected-mode conditions have no generic rule and stay opaque.
fn flex_access_rule(nibble: u8) -> AccessRule {
    match nibble {
        0x0 => AccessRule::Always,
        0x1 => AccessRule::Pin1,
        0x2 => AccessRule::Pin2,
        0xF => AccessRule::Never,
        other => AccessRule::Other(other),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::card::tests::scripted_card;
    use crate::fs::EfOperation;

    fn ef_reply() -> Vec<u8> {
        // size 0x0020, id 0002, transparent, ACL read ALW, update PIN1, ...
        vec![0x00, 0x00, 0x00, 0x20, 0x00, 0x02, 0x01, 0x00, 0x01, 0xF4, 0xFF]
    }

    #[test]
    fn test_parse_reply() {
        let fd = parse_flex_reply(&ef_reply()).unwrap().unwrap();
        assert_eq!(fd.id, [0x00, 0x02]);
        assert_eq!(fd.size, 0x20);
        assert_eq!(fd.ef_structure, EfStructure::Transparent);
        assert_eq!(fd.ef_rule(EfOperation::Read), AccessRule::Always);
        assert_eq!(fd.ef_rule(EfOperation::Update), AccessRule::Pin1);
        assert_eq!(fd.ef_rule(EfOperation::Write), AccessRule::Never);
        // AUT condition, not an ISO "system" rule
        assert_eq!(fd.ef_rule(EfOperation::Erase), AccessRule::Other(0x4));
        assert_eq!(fd.sec_attr, vec![0x01, 0xF4, 0xFF]);
    }

    #[test]
    fn test_short_reply_not_described() {
        assert_eq!(parse_flex_reply(&[0x00, 0x00]).unwrap(), None);
        assert!(matches!(
            parse_flex_reply(&[0, 0, 0, 0, 0, 0, 0x77]),
            Err(Error::UnexpectedResponse(_))
        ));
    }

    #[test]
    fn test_select_walks_components_with_get_response() {
        let mut reply = ef_reply();
        reply.extend_from_slice(&[0x90, 0x00]);
        let (mut card, sent, _) = scripted_card(
            Arc::new(FlexDriver),
            &[&[0x90, 0x00], &[0x9F, 0x0B], &reply],
        );
        card.cla = 0xC0;
        let file = card.select_file(&Path::parse("3F000002").unwrap()).unwrap();
        assert_eq!(file.descriptor().unwrap().id, [0x00, 0x02]);

        let sent = sent.lock();
        assert_eq!(sent[0], vec![0xC0, 0xA4, 0x00, 0x00, 0x02, 0x3F, 0x00]);
        assert_eq!(sent[1], vec![0xC0, 0xA4, 0x00, 0x00, 0x02, 0x00, 0x02]);
        assert_eq!(sent[2], vec![0xC0, 0xC0, 0x00, 0x00, 0x0B]);
    }

    #[test]
    fn test_list_until_not_found() {
        let mut e1 = vec![0, 0, 0, 0x10, 0x00, 0x02, 0x01, 0, 0, 0, 0, 0];
        e1.extend_from_slice(&[0x90, 0x00]);
        let mut e2 = vec![0, 0, 0, 0x00, 0x50, 0x15, 0x38, 0, 0, 0, 0, 0];
        e2.extend_from_slice(&[0x90, 0x00]);
        let (mut card, sent, _) =
            scripted_card(Arc::new(FlexDriver), &[&e1, &e2, &[0x6A, 0x82]]);
        assert_eq!(card.list_files().unwrap(), vec![[0x00, 0x02], [0x50, 0x15]]);
        assert_eq!(sent.lock()[2], vec![0xF0, 0xA8, 0x00, 0x02, 0x0C]);
    }

    #[test]
    fn test_gsm_status_words() {
        assert_eq!(
            FlexDriver.check_sw(0x9F, 0x10),
            StatusClass::MoreData { remaining: 0x10 }
        );
        assert!(matches!(
            FlexDriver.check_sw(0x98, 0x04),
            StatusClass::Failure {
                kind: CardErrorKind::SecurityStatusNotSatisfied,
                ..
            }
        ));
    }
}
