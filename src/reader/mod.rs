//! Reader transport
//!
//! The engine talks to hardware through two traits. A [`Transport`] knows
//! the readers attached to the system and opens a [`CardChannel`] to the
//! card in one of them. A channel moves raw command bytes to the card and
//! returns the raw reply, status words included.
//!
//! Two transports ship with the crate: [`pcsc::PcscTransport`] for real
//! readers (cargo feature `pcsc`) and [`VirtualTransport`], which hosts
//! simulated cards in-process.

pub mod image;
#[cfg(feature = "pcsc")]
pub mod pcsc;
pub mod virtual_card;

pub use image::{CardFlavor, CardImage, ImageFile, ImageFileKind};
pub use virtual_card::{VirtualCard, VirtualTransport};

use crate::error::Result;

/// Whether a reader currently holds a card
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardPresence {
    Present,
    Absent,
}

/// Access to the readers of one system
pub trait Transport: Send {
    /// Short name for log output
    fn name(&self) -> &'static str;

    fn list_readers(&self) -> Result<Vec<String>>;

    fn detect(&self, reader: &str) -> Result<CardPresence>;

    /// Power up the card in `reader` and open an exclusive channel to it
    fn connect(&self, reader: &str) -> Result<Box<dyn CardChannel>>;
}

/// A live connection to one card
///
/// Exchanges are strictly half duplex: `transmit` blocks until the card
/// answered or the transport gave up.
pub trait CardChannel: Send {
    fn atr(&self) -> &[u8];

    /// Send one command APDU, returning response data followed by SW1 SW2
    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>>;

    fn begin_transaction(&mut self) -> Result<()>;

    fn end_transaction(&mut self) -> Result<()>;

    fn disconnect(self: Box<Self>) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod scripted {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::CardChannel;
    use crate::error::{Error, Result};

    /// Channel answering from a fixed script, recording what was sent
    pub struct ScriptedChannel {
        pub atr: Vec<u8>,
        pub replies: VecDeque<Vec<u8>>,
        pub sent: Arc<Mutex<Vec<Vec<u8>>>>,
        pub transactions: Arc<Mutex<i32>>,
    }

    impl ScriptedChannel {
        pub fn new(atr: &[u8], replies: &[&[u8]]) -> Self {
            Self {
                atr: atr.to_vec(),
                replies: replies.iter().map(|r| r.to_vec()).collect(),
                sent: Arc::new(Mutex::new(Vec::new())),
                transactions: Arc::new(Mutex::new(0)),
            }
        }
    }

    impl CardChannel for ScriptedChannel {
        fn atr(&self) -> &[u8] {
            &self.atr
        }

        fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>> {
            self.sent.lock().push(command.to_vec());
            self.replies
                .pop_front()
                .ok_or_else(|| Error::Transport("script exhausted".to_string()))
        }

        fn begin_transaction(&mut self) -> Result<()> {
            *self.transactions.lock() += 1;
            Ok(())
        }

        fn end_transaction(&mut self) -> Result<()> {
            *self.transactions.lock() -= 1;
            Ok(())
        }

        fn disconnect(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }
}
