//! Connected card sessions
//!
//! A [`Card`] is produced by [`Context::connect`](crate::context::Context::connect)
//! and binds one card in one reader to the driver that recognized it. All
//! protocol work goes through it: raw APDU exchange, status word checks and
//! the file operations, which are dispatched to the bound driver.

pub mod algorithm;
pub mod atr;

pub use algorithm::{Algorithm, AlgorithmFlags, AlgorithmInfo, AlgorithmRegistry};
pub use atr::{build_atr, match_atr, Atr, AtrEntry, AtrMatch};

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, trace, warn};

use crate::apdu::{ins, StatusClass, APDU, Response};
use crate::driver::CardDriver;
use crate::error::{Error, Result};
use crate::fs::{Path, SelectedFile};
use crate::reader::CardChannel;
use crate::util::hex_dump;

/// Per-card settings inherited from the context
#[derive(Debug, Clone, Copy)]
pub struct CardOptions {
    pub debug: u32,
    pub use_cache: bool,
    /// Largest response data length requested in one READ BINARY
    pub max_recv_size: usize,
}

impl Default for CardOptions {
    fn default() -> Self {
        Self {
            debug: 0,
            use_cache: true,
            max_recv_size: 256,
        }
    }
}

/// A session with one card
///
/// A card is not safe for concurrent use; operations take `&mut self`.
/// Multi-command transactions are expressed with [`Card::lock`].
pub struct Card {
    reader_index: usize,
    reader_name: String,
    atr: Vec<u8>,
    driver: Arc<dyn CardDriver>,
    type_id: u32,
    channel: Option<Box<dyn CardChannel>>,
    alive: Arc<AtomicBool>,
    lock_depth: u32,
    options: CardOptions,
    /// Class byte used by driver commands
    pub cla: u8,
    pub algorithms: AlgorithmRegistry,
    current: Option<(Path, SelectedFile)>,
}

impl Card {
    pub(crate) fn new(
        reader_index: usize,
        reader_name: String,
        channel: Box<dyn CardChannel>,
        driver: Arc<dyn CardDriver>,
        type_id: u32,
        alive: Arc<AtomicBool>,
        options: CardOptions,
    ) -> Self {
        Self {
            reader_index,
            reader_name,
            atr: channel.atr().to_vec(),
            driver,
            type_id,
            channel: Some(channel),
            alive,
            lock_depth: 0,
            options,
            cla: 0x00,
            algorithms: AlgorithmRegistry::new(),
            current: None,
        }
    }

    pub fn reader_index(&self) -> usize {
        self.reader_index
    }

    pub fn reader_name(&self) -> &str {
        &self.reader_name
    }

    pub fn atr(&self) -> &[u8] {
        &self.atr
    }

    pub fn driver(&self) -> &dyn CardDriver {
        self.driver.as_ref()
    }

    /// Card type reported by the matching ATR table entry
    pub fn type_id(&self) -> u32 {
        self.type_id
    }

    pub fn options(&self) -> &CardOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut CardOptions {
        &mut self.options
    }

    pub fn lock_depth(&self) -> u32 {
        self.lock_depth
    }

    /// The file selected last, if known
    pub fn current_file(&self) -> Option<&SelectedFile> {
        self.current.as_ref().map(|(_, file)| file)
    }

    pub fn is_valid(&self) -> bool {
        self.channel.is_some() && self.alive.load(Ordering::Acquire)
    }

    fn channel(&mut self) -> Result<&mut Box<dyn CardChannel>> {
        if !self.alive.load(Ordering::Acquire) {
            return Err(Error::InvalidHandle);
        }
        self.channel.as_mut().ok_or(Error::InvalidHandle)
    }

    /// Exchange one APDU with the card
    ///
    /// The status words are returned as received. No GET RESPONSE chaining
    /// or other retry happens here.
    pub fn transmit(&mut self, apdu: &APDU) -> Result<Response> {
        let command = apdu.to_bytes()?;
        let mut lock = self.lock()?;
        lock.exchange(apdu, &command)
    }

    fn exchange(&mut self, apdu: &APDU, command: &[u8]) -> Result<Response> {
        if self.options.debug > 0 {
            debug!(
                "Sending APDU: CLA={:02X} INS={:02X} P1={:02X} P2={:02X} Lc={} Le={:?} ({})",
                apdu.cla,
                apdu.ins,
                apdu.p1,
                apdu.p2,
                apdu.data.len(),
                apdu.le,
                apdu.case
            );
        }
        trace!("> {}", hex_dump(command));

        if apdu.ins == ins::SELECT_FILE {
            self.current = None;
        }

        let raw = self.channel()?.transmit(command)?;
        trace!("< {}", hex_dump(&raw));

        let response = Response::from_bytes(&raw).ok_or_else(|| {
            Error::UnexpectedResponse(format!("reply of {} byte(s) has no status word", raw.len()))
        })?;
        if self.options.debug > 0 {
            debug!(
                "Received SW1={:02X} SW2={:02X}, {} data byte(s)",
                response.sw1,
                response.sw2,
                response.data.len()
            );
        }
        Ok(response)
    }

    /// Classify status words with the bound driver's table
    pub fn check_sw(&self, sw1: u8, sw2: u8) -> StatusClass {
        self.driver.check_sw(sw1, sw2)
    }

    /// Turn a response's status words into a result
    pub fn check_response(&self, response: &Response) -> Result<()> {
        self.check_sw(response.sw1, response.sw2).into_result()
    }

    /// Begin (or nest) a transaction
    ///
    /// The reader transaction starts when the outermost lock is taken and
    /// ends when it is dropped.
    pub fn lock(&mut self) -> Result<CardLock<'_>> {
        if self.lock_depth == 0 {
            self.channel()?.begin_transaction()?;
        } else if !self.is_valid() {
            return Err(Error::InvalidHandle);
        }
        self.lock_depth += 1;
        Ok(CardLock {
            card: self,
            released: false,
        })
    }

    fn unlock(&mut self) -> Result<()> {
        self.lock_depth = self.lock_depth.saturating_sub(1);
        if self.lock_depth == 0 {
            if let Some(channel) = self.channel.as_mut() {
                channel.end_transaction()?;
            }
        }
        Ok(())
    }

    /// Select a file, returning its metadata
    ///
    /// When the selection cache is enabled and `path` is the file selected
    /// last, no command is sent.
    pub fn select_file(&mut self, path: &Path) -> Result<SelectedFile> {
        if !self.is_valid() {
            return Err(Error::InvalidHandle);
        }
        if self.options.use_cache {
            if let Some((current, file)) = &self.current {
                if current == path {
                    trace!("Selection cache hit for {}", path);
                    return Ok(file.clone());
                }
            }
        }

        let driver = Arc::clone(&self.driver);
        let mut lock = self.lock()?;
        let file = driver.select_file(&mut lock, path)?;
        lock.current = Some((path.clone(), file.clone()));
        Ok(file)
    }

    /// List the children of the selected dedicated file
    pub fn list_files(&mut self) -> Result<Vec<[u8; 2]>> {
        if let Some(file) = self.current_file() {
            if !file.may_have_children() {
                return Err(Error::NotADirectory);
            }
        }

        let driver = Arc::clone(&self.driver);
        let mut lock = self.lock()?;
        let raw = driver.list_files(&mut lock)?;
        if raw.len() % 2 != 0 {
            return Err(Error::OddListLength(raw.len()));
        }
        Ok(raw.chunks_exact(2).map(|c| [c[0], c[1]]).collect())
    }

    /// Read `count` bytes of the selected transparent file from `offset`
    ///
    /// Fewer bytes are returned when the file ends early.
    pub fn read_binary(&mut self, offset: usize, count: usize) -> Result<Vec<u8>> {
        let driver = Arc::clone(&self.driver);
        let mut lock = self.lock()?;
        driver.read_binary(&mut lock, offset, count)
    }

    /// Read one record (numbered from 1) of the selected record file
    pub fn read_record(&mut self, record: u8) -> Result<Vec<u8>> {
        let driver = Arc::clone(&self.driver);
        let mut lock = self.lock()?;
        driver.read_record(&mut lock, record)
    }

    /// Close the session
    ///
    /// Refused while a lock is outstanding. The card handle is unusable
    /// afterwards.
    pub fn disconnect(&mut self) -> Result<()> {
        if self.lock_depth > 0 {
            return Err(Error::CardLocked(self.lock_depth));
        }
        let channel = self.channel.take().ok_or(Error::InvalidHandle)?;
        self.current = None;
        debug!("Disconnecting from reader {}", self.reader_name);
        channel.disconnect()
    }
}

impl Drop for Card {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.take() {
            if let Err(e) = channel.disconnect() {
                warn!("Disconnect on drop failed: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for Card {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Card")
            .field("reader", &self.reader_name)
            .field("driver", &self.driver.short_name())
            .field("atr", &hex_dump(&self.atr))
            .field("lock_depth", &self.lock_depth)
            .finish()
    }
}

/// Scoped card lock
///
/// Dereferences to the card, so every card operation is available while it
/// is held. Dropping the guard releases one level of locking.
pub struct CardLock<'a> {
    card: &'a mut Card,
    released: bool,
}

impl CardLock<'_> {
    /// Release the lock, reporting a failure to end the reader transaction
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.card.unlock()
    }
}

impl Deref for CardLock<'_> {
    type Target = Card;

    fn deref(&self) -> &Card {
        self.card
    }
}

impl DerefMut for CardLock<'_> {
    fn deref_mut(&mut self) -> &mut Card {
        self.card
    }
}

impl Drop for CardLock<'_> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.card.unlock() {
                warn!("Ending card transaction failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::apdu::CardErrorKind;
    use crate::driver::default::DefaultDriver;
    use crate::reader::scripted::ScriptedChannel;

    pub(crate) fn scripted_card(
        driver: Arc<dyn CardDriver>,
        replies: &[&[u8]],
    ) -> (Card, Arc<parking_lot::Mutex<Vec<Vec<u8>>>>, Arc<AtomicBool>) {
        let channel = ScriptedChannel::new(&[0x3B, 0x02, 0x14, 0x50], replies);
        let sent = Arc::clone(&channel.sent);
        let alive = Arc::new(AtomicBool::new(true));
        let card = Card::new(
            0,
            "Scripted Reader 0".to_string(),
            Box::new(channel),
            driver,
            0,
            Arc::clone(&alive),
            CardOptions::default(),
        );
        (card, sent, alive)
    }

    #[test]
    fn test_transmit_returns_status_words_unchanged() {
        let (mut card, sent, _) = scripted_card(Arc::new(DefaultDriver), &[&[0x61, 0x10]]);
        let apdu = APDU::new(0x00, 0xA4, 0x00, 0x00).with_data(vec![0x3F, 0x00]);
        let resp = card.transmit(&apdu).unwrap();
        assert_eq!(resp.sw(), 0x6110);
        assert_eq!(sent.lock().len(), 1);
        assert_eq!(sent.lock()[0], vec![0x00, 0xA4, 0x00, 0x00, 0x02, 0x3F, 0x00]);
    }

    #[test]
    fn test_check_sw_uses_driver_table() {
        let (card, _, _) = scripted_card(Arc::new(DefaultDriver), &[]);
        assert!(card.check_sw(0x90, 0x00).is_success());
        assert_eq!(card.check_sw(0x61, 0x03), StatusClass::MoreData { remaining: 3 });
        assert!(matches!(
            card.check_response(&Response::error(0x6A82)),
            Err(Error::Card {
                kind: CardErrorKind::FileNotFound,
                ..
            })
        ));
    }

    #[test]
    fn test_short_reply_is_protocol_error() {
        let (mut card, _, _) = scripted_card(Arc::new(DefaultDriver), &[&[0x90]]);
        let err = card.transmit(&APDU::new(0x00, 0x84, 0x00, 0x00).with_le(8)).unwrap_err();
        assert!(matches!(err, Error::UnexpectedResponse(_)));
    }

    #[test]
    fn test_nested_locks_balance() {
        let channel = ScriptedChannel::new(&[0x3B], &[]);
        let transactions = Arc::clone(&channel.transactions);
        let mut card = Card::new(
            0,
            "r".to_string(),
            Box::new(channel),
            Arc::new(DefaultDriver),
            0,
            Arc::new(AtomicBool::new(true)),
            CardOptions::default(),
        );
        {
            let mut outer = card.lock().unwrap();
            assert_eq!(outer.lock_depth(), 1);
            {
                let inner = outer.lock().unwrap();
                assert_eq!(inner.lock_depth(), 2);
            }
            assert_eq!(outer.lock_depth(), 1);
            assert_eq!(*transactions.lock(), 1);
        }
        assert_eq!(card.lock_depth(), 0);
        assert_eq!(*transactions.lock(), 0);
        assert!(card.disconnect().is_ok());
    }

    #[test]
    fn test_disconnect_refused_while_locked() {
        let (mut card, _, _) = scripted_card(Arc::new(DefaultDriver), &[]);
        let lock = card.lock().unwrap();
        std::mem::forget(lock);
        assert!(matches!(card.disconnect(), Err(Error::CardLocked(1))));
    }

    #[test]
    fn test_dead_context_invalidates_card() {
        let (mut card, sent, alive) = scripted_card(Arc::new(DefaultDriver), &[&[0x90, 0x00]]);
        alive.store(false, Ordering::Release);
        assert!(matches!(
            card.transmit(&APDU::new(0x00, 0xA4, 0x00, 0x00)),
            Err(Error::InvalidHandle)
        ));
        assert!(matches!(card.lock(), Err(Error::InvalidHandle)));
        assert!(sent.lock().is_empty());
    }

    #[test]
    fn test_disconnected_card_is_invalid() {
        let (mut card, _, _) = scripted_card(Arc::new(DefaultDriver), &[]);
        card.disconnect().unwrap();
        assert!(!card.is_valid());
        assert!(matches!(card.disconnect(), Err(Error::InvalidHandle)));
        assert!(matches!(card.read_binary(0, 4), Err(Error::InvalidHandle)));
    }

    #[test]
    fn test_malformed_apdu_not_sent() {
        let (mut card, sent, _) = scripted_card(Arc::new(DefaultDriver), &[&[0x90, 0x00]]);
        let mut apdu = APDU::new(0x00, 0xA4, 0x00, 0x00).with_data(vec![0x3F, 0x00]);
        apdu.case = crate::apdu::APDUCase::Case1;
        assert!(matches!(card.transmit(&apdu), Err(Error::Apdu(_))));
        assert!(sent.lock().is_empty());
    }
}
