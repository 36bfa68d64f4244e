//! ISO 7816-4 command helpers
//!
//! Generic implementations of SELECT FILE, READ BINARY and READ RECORD that
//! drivers use unless their cards need something else. The retry policy for
//! continuation status words lives here: `61XX` (or whatever the driver's
//! table maps to "more data") is followed by GET RESPONSE, and `6CXX` causes
//! one resend with the Le the card asked for.

use log::{debug, warn};

use crate::apdu::{ins, CardErrorKind, Response, StatusClass, APDU, MAX_SHORT_LE};
use crate::card::Card;
use crate::error::{Error, Result};
use crate::fs::{
    acl_slots, AccessRule, EfStructure, FileDescriptor, FileType, Path, SelectedFile,
};
use crate::tlv::{read_list, TLV};

/// Upper bound on GET RESPONSE rounds for one command
const MAX_GET_RESPONSE: usize = 256;

/// Largest offset READ BINARY can address with P1-P2 (bit 15 clear)
const MAX_BINARY_OFFSET: usize = 0x7FFF;

/// FCP template tags
pub mod tags {
    pub const FCP: u32 = 0x62;
    pub const FCI: u32 = 0x6F;
    pub const FILE_SIZE: u32 = 0x80;
    pub const TOTAL_SIZE: u32 = 0x81;
    pub const DESCRIPTOR: u32 = 0x82;
    pub const FILE_ID: u32 = 0x83;
    pub const DF_NAME: u32 = 0x84;
    pub const PROPRIETARY: u32 = 0x85;
    pub const SECURITY_ATTR: u32 = 0x86;
    pub const PROPRIETARY_TEMPLATE: u32 = 0xA5;
}

/// File descriptor byte value of a dedicated file
const FDB_DF: u8 = 0x38;

/// Send `apdu`, following continuation status words
///
/// The returned response carries the concatenated data of every round and
/// the status words of the last one. Failures are not turned into errors.
pub fn transceive(card: &mut Card, apdu: &APDU) -> Result<Response> {
    let mut resp = card.transmit(apdu)?;

    if let StatusClass::Failure {
        kind: CardErrorKind::WrongLe { correct },
        ..
    } = card.check_sw(resp.sw1, resp.sw2)
    {
        let le = if correct == 0 { MAX_SHORT_LE } else { correct as u32 };
        debug!("Card asked for Le={}, resending", le);
        resp = card.transmit(&apdu.clone().with_le(le))?;
    }

    let mut data = std::mem::take(&mut resp.data);
    let mut rounds = 0;
    while let StatusClass::MoreData { remaining } = card.check_sw(resp.sw1, resp.sw2) {
        rounds += 1;
        if rounds > MAX_GET_RESPONSE {
            return Err(Error::UnexpectedResponse(
                "card keeps announcing more data".to_string(),
            ));
        }
        resp = get_response(card, remaining)?;
        data.append(&mut resp.data);
    }

    Ok(Response {
        data,
        sw1: resp.sw1,
        sw2: resp.sw2,
    })
}

/// Fetch pending response data
///
/// `remaining` of 0 asks for the maximum of 256 bytes.
pub fn get_response(card: &mut Card, remaining: u8) -> Result<Response> {
    let le = if remaining == 0 {
        MAX_SHORT_LE
    } else {
        remaining as u32
    };
    let apdu = APDU::new(card.cla, ins::GET_RESPONSE, 0x00, 0x00).with_le(le);
    card.transmit(&apdu)
}

/// Build the SELECT FILE command for `path`
///
/// A single identifier (the MF included) is selected by file id. A longer
/// path starting at the MF is selected by path from the MF, which is left
/// out of the command data. Other paths are taken relative to the current
/// DF.
pub fn select_apdu(cla: u8, path: &Path) -> APDU {
    let bytes = path.as_bytes();
    let (p1, data) = if bytes.len() == 2 {
        (0x00, bytes.to_vec())
    } else if path.starts_at_root() {
        (0x08, bytes[2..].to_vec())
    } else {
        (0x09, bytes.to_vec())
    };
    APDU::new(cla, ins::SELECT_FILE, p1, 0x00)
        .with_data(data)
        .with_le(MAX_SHORT_LE)
}

pub fn select_file(card: &mut Card, path: &Path) -> Result<SelectedFile> {
    let apdu = select_apdu(card.cla, path);
    let resp = transceive(card, &apdu)?;
    card.check_response(&resp)?;

    match resp.data.first() {
        None => Ok(SelectedFile::NotDescribed),
        Some(&tag) if tag as u32 == tags::FCP || tag as u32 == tags::FCI => {
            match parse_fcp(path.file_id(), &resp.data) {
                Ok(fd) => Ok(SelectedFile::Described(fd)),
                Err(e) => {
                    warn!("Unusable file control template for {}: {}", path, e);
                    Ok(SelectedFile::NotDescribed)
                }
            }
        }
        Some(&tag) => {
            debug!("Unrecognized SELECT reply template 0x{:02X}", tag);
            Ok(SelectedFile::NotDescribed)
        }
    }
}

/// Decode an FCP (`62`) or FCI (`6F`) template
///
/// `fid` is used when the template carries no file identifier.
pub fn parse_fcp(fid: [u8; 2], data: &[u8]) -> Result<FileDescriptor> {
    let tlvs = read_list(data, true)?;
    let template = tlvs
        .iter()
        .find(|t| t.tag == tags::FCP || t.tag == tags::FCI)
        .ok_or_else(|| Error::UnexpectedResponse("no FCP template".to_string()))?;

    let (file_type, ef_structure, record_length) = match template.find_child(tags::DESCRIPTOR) {
        Some(fdb) => decode_descriptor(fdb)?,
        None => {
            // Only DFs may omit the descriptor when a DF name is present
            let ft = if template.find_child(tags::DF_NAME).is_some() {
                FileType::Df
            } else {
                FileType::WorkingEf
            };
            (ft, EfStructure::Unknown, None)
        }
    };

    let mut fd = FileDescriptor::new(fid, file_type);
    if file_type != FileType::Df {
        fd.ef_structure = ef_structure;
    }
    fd.record_length = record_length;

    if let Some(id) = template.find_child(tags::FILE_ID) {
        match id.value.as_slice() {
            [a, b] => fd.id = [*a, *b],
            other => warn!("Ignoring file identifier of {} byte(s)", other.len()),
        }
    }

    let size = template
        .find_child(tags::FILE_SIZE)
        .or_else(|| template.find_child(tags::TOTAL_SIZE));
    if let Some(size) = size {
        fd.size = size
            .value_as_usize()
            .ok_or_else(|| Error::UnexpectedResponse("bad file size".to_string()))?;
    }

    if let Some(name) = template.find_child(tags::DF_NAME) {
        if name.value.len() > 16 {
            return Err(Error::UnexpectedResponse(format!(
                "DF name of {} bytes",
                name.value.len()
            )));
        }
        fd.name = Some(name.value.clone());
    }

    if let Some(prop) = template
        .find_child(tags::PROPRIETARY)
        .or_else(|| template.find_child(tags::PROPRIETARY_TEMPLATE))
    {
        fd.prop_attr = prop.value.clone();
    }

    if let Some(sec) = template.find_child(tags::SECURITY_ATTR) {
        fd.sec_attr = sec.value.clone();
        apply_security_attributes(&mut fd);
    }

    Ok(fd)
}

fn decode_descriptor(fdb: &TLV) -> Result<(FileType, EfStructure, Option<usize>)> {
    let first = *fdb
        .value
        .first()
        .ok_or_else(|| Error::UnexpectedResponse("empty file descriptor".to_string()))?;

    if first & 0x3F == FDB_DF {
        return Ok((FileType::Df, EfStructure::Unknown, None));
    }
    let file_type = match (first >> 3) & 0x07 {
        0 => FileType::WorkingEf,
        1 => FileType::InternalEf,
        _ => FileType::WorkingEf,
    };
    let record_length = match fdb.value.len() {
        3 => Some(fdb.value[2] as usize),
        n if n >= 4 => Some(((fdb.value[2] as usize) << 8) | fdb.value[3] as usize),
        _ => None,
    };
    Ok((file_type, EfStructure::from_bits(first), record_length))
}

/// Decode access control bytes out of the security attributes
///
/// One byte per operation slot, in slot order, read by its high nibble.
/// Attributes shorter than the slot count leave the remaining slots at
/// "never".
pub fn apply_security_attributes(fd: &mut FileDescriptor) {
    let slots = acl_slots(fd.file_type);
    for (slot, &byte) in fd.sec_attr.iter().take(slots).enumerate() {
        fd.acl[slot] = AccessRule::from_byte(byte);
    }
}

/// Read a transparent file in chunks of at most `max_recv_size` bytes
pub fn read_binary(card: &mut Card, offset: usize, count: usize) -> Result<Vec<u8>> {
    let chunk_max = card.options().max_recv_size.clamp(1, MAX_SHORT_LE as usize);
    let mut out = Vec::with_capacity(count);

    while out.len() < count {
        let pos = offset + out.len();
        if pos > MAX_BINARY_OFFSET {
            return Err(Error::InvalidArguments(format!(
                "READ BINARY offset {} out of range",
                pos
            )));
        }
        let want = (count - out.len()).min(chunk_max);
        let apdu = APDU::new(card.cla, ins::READ_BINARY, (pos >> 8) as u8, pos as u8)
            .with_le(want as u32);
        let mut resp = transceive(card, &apdu)?;

        match card.check_sw(resp.sw1, resp.sw2) {
            StatusClass::Failure {
                kind: CardErrorKind::EndOfFile,
                ..
            } => {
                out.append(&mut resp.data);
                break;
            }
            other => other.into_result()?,
        }

        let got = resp.data.len();
        out.extend(resp.data.into_iter().take(want));
        if got < want {
            break;
        }
    }

    Ok(out)
}

/// READ RECORD by absolute record number in the current EF
pub fn read_record(card: &mut Card, record: u8) -> Result<Vec<u8>> {
    if record == 0 {
        return Err(Error::InvalidArguments("record numbers start at 1".to_string()));
    }
    let apdu = APDU::new(card.cla, ins::READ_RECORD, record, 0x04).with_le(MAX_SHORT_LE);
    let resp = transceive(card, &apdu)?;
    card.check_response(&resp)?;
    Ok(resp.data)
}
