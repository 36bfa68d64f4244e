//! In-process simulated cards
//!
//! A [`VirtualCard`] executes APDUs against a [`CardImage`]: SELECT FILE by
//! identifier, path or DF name, READ BINARY, READ RECORD, GET RESPONSE and
//! the directory listing command of its flavor. [`VirtualTransport`] puts
//! such cards into numbered virtual readers so the whole engine can run
//! without hardware.

use std::sync::Arc;

use log::{debug, error, info, trace};
use parking_lot::Mutex;

use super::image::{CardFlavor, CardImage, ImageFile, ImageFileKind, ImageStructure};
use super::{CardChannel, CardPresence, Transport};
use crate::apdu::{ins, Response, APDU, SW};
use crate::error::{Error, Result};
use crate::tlv::TLVBuilder;

const FCP_TAG: u32 = 0x62;
const FDB_DF: u8 = 0x38;
/// Length of one Flex directory entry
const FLEX_ENTRY_LEN: usize = 12;

/// Simulated card executing commands against a file tree
#[derive(Debug)]
pub struct VirtualCard {
    image: CardImage,
    powered: bool,
    /// Child indices from the MF to the selected file
    current: Vec<usize>,
    /// Reply waiting for GET RESPONSE
    pending: Vec<u8>,
    log: Vec<Vec<u8>>,
}

impl VirtualCard {
    pub fn new(image: CardImage) -> Self {
        Self {
            image,
            powered: false,
            current: Vec::new(),
            pending: Vec::new(),
            log: Vec::new(),
        }
    }

    pub fn atr(&self) -> &[u8] {
        &self.image.atr
    }

    pub fn image(&self) -> &CardImage {
        &self.image
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    /// Every command received since power-up, in order
    pub fn commands(&self) -> &[Vec<u8>] {
        &self.log
    }

    pub fn power_on(&mut self) -> Vec<u8> {
        self.powered = true;
        self.current.clear();
        self.pending.clear();
        self.log.clear();
        info!("Virtual card powered on");
        self.image.atr.clone()
    }

    pub fn power_off(&mut self) {
        self.powered = false;
        self.current.clear();
        self.pending.clear();
        info!("Virtual card powered off");
    }

    /// Process one command APDU, returning response data and status words
    pub fn process_apdu(&mut self, apdu_bytes: &[u8]) -> Vec<u8> {
        if !self.powered {
            return Response::error(SW::CONDITIONS_NOT_SATISFIED).to_bytes();
        }
        self.log.push(apdu_bytes.to_vec());

        let cmd = match APDU::parse(apdu_bytes) {
            Ok(apdu) => apdu,
            Err(e) => {
                error!("Failed to parse APDU: {}", e);
                return Response::error(SW::WRONG_LENGTH).to_bytes();
            }
        };

        debug!(
            "Processing APDU: CLA={:02X} INS={:02X} P1={:02X} P2={:02X}",
            cmd.cla, cmd.ins, cmd.p1, cmd.p2
        );

        // Anything but GET RESPONSE discards a pending reply
        if cmd.ins != ins::GET_RESPONSE {
            self.pending.clear();
        }

        let response = match (self.image.flavor, cmd.cla, cmd.ins) {
            (CardFlavor::Iso, 0x00, ins::SELECT_FILE) | (CardFlavor::Flex, 0xC0, ins::SELECT_FILE) => {
                self.handle_select(&cmd)
            }
            (CardFlavor::Iso, 0x00, ins::READ_BINARY) | (CardFlavor::Flex, 0xC0, ins::READ_BINARY) => {
                self.handle_read_binary(&cmd)
            }
            (CardFlavor::Iso, 0x00, ins::READ_RECORD) | (CardFlavor::Flex, 0xC0, ins::READ_RECORD) => {
                self.handle_read_record(&cmd)
            }
            (CardFlavor::Iso, 0x00, ins::GET_RESPONSE) | (CardFlavor::Flex, 0xC0, ins::GET_RESPONSE) => {
                self.handle_get_response(&cmd)
            }
            (CardFlavor::Iso, 0x80, ins::LIST_FILES) => self.handle_list_files(),
            (CardFlavor::Flex, 0xF0, ins::DIRECTORY) => self.handle_directory(&cmd),
            (_, _, ins::SELECT_FILE | ins::READ_BINARY | ins::READ_RECORD | ins::GET_RESPONSE) => {
                Response::error(SW::CLA_NOT_SUPPORTED)
            }
            _ => Response::error(SW::INS_NOT_SUPPORTED),
        };
        response.to_bytes()
    }

    fn node(&self, path: &[usize]) -> &ImageFile {
        let mut node = &self.image.root;
        for &i in path {
            node = &node.children[i];
        }
        node
    }

    fn current_file(&self) -> &ImageFile {
        self.node(&self.current)
    }

    fn current_df(&self) -> Vec<usize> {
        if self.current_file().is_df() {
            self.current.clone()
        } else {
            self.current[..self.current.len() - 1].to_vec()
        }
    }

    /// Replies longer than zero bytes go through GET RESPONSE on T=0 cards
    fn answers_with_get_response(&self) -> bool {
        self.image.t0 || self.image.flavor == CardFlavor::Flex
    }

    fn reply(&mut self, body: Vec<u8>, le: Option<u32>) -> Response {
        if body.is_empty() {
            return Response::ok();
        }
        if self.answers_with_get_response() {
            let len = body.len().min(0xFF) as u8;
            self.pending = body;
            let sw1 = match self.image.flavor {
                CardFlavor::Iso => 0x61,
                CardFlavor::Flex => 0x9F,
            };
            return Response::new(Vec::new(), u16::from_be_bytes([sw1, len]));
        }
        match le {
            Some(_) => Response::success(body),
            None => Response::ok(),
        }
    }

    fn resolve_fid(&self, fid: [u8; 2]) -> Option<Vec<usize>> {
        if fid == [0x3F, 0x00] {
            return Some(Vec::new());
        }
        let df_path = self.current_df();
        let df = self.node(&df_path);
        if let Some((i, _)) = df.child(fid) {
            let mut path = df_path;
            path.push(i);
            return Some(path);
        }
        if let Some((_, parent)) = df_path.split_last() {
            if self.node(parent).fid() == fid {
                return Some(parent.to_vec());
            }
        }
        if df.fid() == fid {
            return Some(df_path);
        }
        None
    }

    fn resolve_path(&self, mut path: Vec<usize>, ids: &[u8]) -> Option<Vec<usize>> {
        for fid in ids.chunks(2) {
            let node = self.node(&path);
            if !node.is_df() {
                return None;
            }
            let (i, _) = node.child([fid[0], fid[1]])?;
            path.push(i);
        }
        Some(path)
    }

    fn find_by_name(file: &ImageFile, name: &[u8], path: &mut Vec<usize>) -> bool {
        if file.is_df() && file.name == name {
            return true;
        }
        for (i, child) in file.children.iter().enumerate() {
            path.push(i);
            if Self::find_by_name(child, name, path) {
                return true;
            }
            path.pop();
        }
        false
    }

    fn handle_select(&mut self, cmd: &APDU) -> Response {
        let target = match cmd.p1 {
            0x00 if cmd.data.is_empty() => Some(Vec::new()),
            0x00 if cmd.data.len() == 2 => self.resolve_fid([cmd.data[0], cmd.data[1]]),
            0x00 => return Response::error(SW::WRONG_DATA),
            0x04 if cmd.data.is_empty() => return Response::error(SW::WRONG_DATA),
            0x04 if self.image.flavor == CardFlavor::Iso => {
                let mut path = Vec::new();
                Self::find_by_name(&self.image.root, &cmd.data, &mut path).then_some(path)
            }
            0x08 | 0x09 if self.image.flavor == CardFlavor::Iso => {
                if cmd.data.is_empty() || cmd.data.len() % 2 != 0 {
                    return Response::error(SW::WRONG_DATA);
                }
                let start = if cmd.p1 == 0x08 {
                    Vec::new()
                } else {
                    self.current_df()
                };
                self.resolve_path(start, &cmd.data)
            }
            _ => return Response::error(SW::INCORRECT_P1_P2),
        };

        let Some(target) = target else {
            debug!("SELECT: file {:02X?} not found", cmd.data);
            return Response::error(SW::FILE_NOT_FOUND);
        };
        self.current = target;

        let file = self.current_file();
        trace!("Selected file {}", hex::encode_upper(&file.id));
        if cmd.p2 & 0x0C == 0x0C {
            return Response::ok();
        }
        let body = match self.image.flavor {
            CardFlavor::Iso => fcp(file),
            CardFlavor::Flex => flex_reply(file),
        };
        self.reply(body, cmd.le)
    }

    /// Status word refusing access when the slot's rule is not "always"
    fn check_read_access(file: &ImageFile) -> Option<u16> {
        match file.acl.first() {
            Some(b) if b >> 4 != 0 => Some(SW::SECURITY_STATUS_NOT_SATISFIED),
            _ => None,
        }
    }

    fn handle_read_binary(&mut self, cmd: &APDU) -> Response {
        let file = self.current_file();
        if file.is_df() {
            return Response::error(SW::COMMAND_NOT_ALLOWED_NO_EF);
        }
        if file.structure != ImageStructure::Transparent {
            return Response::error(SW::COMMAND_INCOMPATIBLE);
        }
        if let Some(sw) = Self::check_read_access(file) {
            return Response::error(sw);
        }
        if cmd.p1 & 0x80 != 0 {
            return Response::error(SW::FUNCTION_NOT_SUPPORTED);
        }
        let offset = cmd.p1p2() as usize;
        if offset > file.content.len() {
            return Response::error(SW::WRONG_P1_P2);
        }
        let wanted = cmd.le.unwrap_or(256) as usize;
        let end = (offset + wanted).min(file.content.len());
        let data = file.content[offset..end].to_vec();
        if data.len() < wanted {
            Response::new(data, SW::WARNING_EOF)
        } else {
            Response::success(data)
        }
    }

    fn handle_read_record(&mut self, cmd: &APDU) -> Response {
        if cmd.p2 & 0x07 != 0x04 || cmd.p1 == 0 {
            return Response::error(SW::INCORRECT_P1_P2);
        }
        let file = self.current_file();
        if file.is_df() {
            return Response::error(SW::COMMAND_NOT_ALLOWED_NO_EF);
        }
        if file.structure == ImageStructure::Transparent {
            return Response::error(SW::COMMAND_INCOMPATIBLE);
        }
        if let Some(sw) = Self::check_read_access(file) {
            return Response::error(sw);
        }
        match file.records.get(cmd.p1 as usize - 1) {
            Some(record) => {
                let wanted = cmd.le.unwrap_or(256) as usize;
                Response::success(record[..record.len().min(wanted)].to_vec())
            }
            None => Response::error(SW::RECORD_NOT_FOUND),
        }
    }

    fn handle_get_response(&mut self, cmd: &APDU) -> Response {
        if self.pending.is_empty() {
            return Response::error(SW::CONDITIONS_NOT_SATISFIED);
        }
        let wanted = cmd.le.unwrap_or(256) as usize;
        let rest = self.pending.split_off(wanted.min(self.pending.len()));
        let data = std::mem::replace(&mut self.pending, rest);
        if self.pending.is_empty() {
            Response::success(data)
        } else {
            Response::more_data(data, self.pending.len().min(0xFF) as u8)
        }
    }

    fn handle_list_files(&mut self) -> Response {
        let df = self.node(&self.current_df());
        let ids: Vec<u8> = df.children.iter().flat_map(|c| c.fid()).collect();
        debug!("LIST FILES: {} file(s)", df.children.len());
        Response::success(ids)
    }

    fn handle_directory(&mut self, cmd: &APDU) -> Response {
        let df = self.node(&self.current_df());
        match df.children.get(cmd.p2 as usize) {
            Some(child) => {
                let mut entry = flex_reply(child);
                entry.resize(FLEX_ENTRY_LEN, 0x00);
                Response::success(entry)
            }
            None => Response::error(SW::FILE_NOT_FOUND),
        }
    }
}

/// ISO 7816-4 FCP template describing `file`
fn fcp(file: &ImageFile) -> Vec<u8> {
    let mut fcp = TLVBuilder::new();
    match file.kind {
        ImageFileKind::Df => {
            fcp = fcp.add(0x82, &[FDB_DF]);
        }
        kind => {
            let mut fdb = file.structure.fdb_bits();
            if kind == ImageFileKind::InternalEf {
                fdb |= 0x08;
            }
            let size = file.size().min(0xFFFF) as u16;
            fcp = fcp.add(0x80, &size.to_be_bytes());
            if file.structure == ImageStructure::Transparent {
                fcp = fcp.add(0x82, &[fdb]);
            } else {
                let max_len = file.max_record_len() as u8;
                fcp = fcp.add(0x82, &[fdb, 0x21, 0x00, max_len]);
            }
        }
    }
    fcp.add(0x83, &file.id)
        .add_nonempty(0x84, &file.name)
        .add_nonempty(0x86, &file.acl)
        .wrap(FCP_TAG)
        .build()
}

/// Cryptoflex proprietary SELECT reply describing `file`
fn flex_reply(file: &ImageFile) -> Vec<u8> {
    let size = if file.is_df() {
        0
    } else {
        file.size().min(0xFFFF) as u16
    };
    let file_type = if file.is_df() {
        FDB_DF
    } else {
        file.structure.fdb_bits()
    };
    let mut reply = vec![0x00, 0x00];
    reply.extend_from_slice(&size.to_be_bytes());
    reply.extend_from_slice(&file.id);
    reply.push(file_type);
    reply.push(0x00);
    reply.extend_from_slice(&file.acl);
    reply
}

struct VirtualSlot {
    name: String,
    card: Option<Arc<Mutex<VirtualCard>>>,
}

/// Readers hosting simulated cards
///
/// Clones share the same readers, so a test can keep one handle to insert
/// or remove cards after giving the transport to a context.
#[derive(Clone, Default)]
pub struct VirtualTransport {
    slots: Arc<Mutex<Vec<VirtualSlot>>>,
}

impl VirtualTransport {
    /// Transport without readers
    pub fn new() -> Self {
        Self::default()
    }

    /// One reader holding a card built from `image`
    pub fn with_card(image: CardImage) -> Self {
        let transport = Self::new();
        transport.add_reader(Some(VirtualCard::new(image)));
        transport
    }

    /// Add a reader, returning its index
    pub fn add_reader(&self, card: Option<VirtualCard>) -> usize {
        let mut slots = self.slots.lock();
        let index = slots.len();
        slots.push(VirtualSlot {
            name: format!("Virtual Reader {}", index),
            card: card.map(|c| Arc::new(Mutex::new(c))),
        });
        index
    }

    pub fn insert(&self, index: usize, card: VirtualCard) -> Result<()> {
        let mut slots = self.slots.lock();
        let count = slots.len();
        let slot = slots
            .get_mut(index)
            .ok_or(Error::ReaderIndexOutOfRange { index, count })?;
        slot.card = Some(Arc::new(Mutex::new(card)));
        Ok(())
    }

    /// Pull the card out of a reader; open channels lose it too
    pub fn remove(&self, index: usize) -> Option<Arc<Mutex<VirtualCard>>> {
        let card = self.slots.lock().get_mut(index)?.card.take()?;
        card.lock().power_off();
        Some(card)
    }

    pub fn card(&self, index: usize) -> Option<Arc<Mutex<VirtualCard>>> {
        self.slots.lock().get(index)?.card.clone()
    }

    fn card_in(&self, reader: &str) -> Result<Option<Arc<Mutex<VirtualCard>>>> {
        self.slots
            .lock()
            .iter()
            .find(|s| s.name == reader)
            .map(|s| s.card.clone())
            .ok_or_else(|| Error::Transport(format!("unknown reader '{}'", reader)))
    }
}

impl Transport for VirtualTransport {
    fn name(&self) -> &'static str {
        "virtual"
    }

    fn list_readers(&self) -> Result<Vec<String>> {
        Ok(self.slots.lock().iter().map(|s| s.name.clone()).collect())
    }

    fn detect(&self, reader: &str) -> Result<CardPresence> {
        Ok(match self.card_in(reader)? {
            Some(_) => CardPresence::Present,
            None => CardPresence::Absent,
        })
    }

    fn connect(&self, reader: &str) -> Result<Box<dyn CardChannel>> {
        let card = self.card_in(reader)?.ok_or(Error::CardNotPresent)?;
        let atr = card.lock().power_on();
        Ok(Box::new(VirtualChannel { card, atr }))
    }
}

struct VirtualChannel {
    card: Arc<Mutex<VirtualCard>>,
    atr: Vec<u8>,
}

impl CardChannel for VirtualChannel {
    fn atr(&self) -> &[u8] {
        &self.atr
    }

    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>> {
        let mut card = self.card.lock();
        if !card.is_powered() {
            return Err(Error::CardNotPresent);
        }
        Ok(card.process_apdu(command))
    }

    fn begin_transaction(&mut self) -> Result<()> {
        trace!("Virtual transaction started");
        Ok(())
    }

    fn end_transaction(&mut self) -> Result<()> {
        trace!("Virtual transaction ended");
        Ok(())
    }

    fn disconnect(self: Box<Self>) -> Result<()> {
        self.card.lock().power_off();
        Ok(())
    }
}
