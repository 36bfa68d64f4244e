//! PC/SC transport for real readers

use std::ffi::CString;

use log::{debug, info};
use pcsc::{
    Attribute, Card as PcscCard, Context, Disposition, Protocols, ReaderState, Scope, ShareMode,
    State, MAX_BUFFER_SIZE,
};

use super::{CardChannel, CardPresence, Transport};
use crate::error::{Error, Result};

fn reader_cstring(reader: &str) -> Result<CString> {
    CString::new(reader).map_err(|_| Error::Transport(format!("invalid reader name '{}'", reader)))
}

pub struct PcscTransport {
    context: Context,
}

impl PcscTransport {
    /// Establish a user-scope context with the PC/SC daemon
    pub fn establish() -> Result<Self> {
        let context = Context::establish(Scope::User)?;
        info!("PC/SC context established");
        Ok(Self { context })
    }
}

impl Transport for PcscTransport {
    fn name(&self) -> &'static str {
        "pcsc"
    }

    fn list_readers(&self) -> Result<Vec<String>> {
        let mut readers_buf = [0; 2048];
        let readers = match self.context.list_readers(&mut readers_buf) {
            Ok(readers) => readers,
            Err(pcsc::Error::NoReadersAvailable) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(readers
            .map(|r| r.to_string_lossy().into_owned())
            .collect())
    }

    fn detect(&self, reader: &str) -> Result<CardPresence> {
        let mut states = [ReaderState::new(reader_cstring(reader)?, State::UNAWARE)];
        self.context
            .get_status_change(std::time::Duration::ZERO, &mut states)?;
        let event = states[0].event_state();
        debug!("Reader '{}' state {:?}", reader, event);
        Ok(if event.contains(State::PRESENT) {
            CardPresence::Present
        } else {
            CardPresence::Absent
        })
    }

    fn connect(&self, reader: &str) -> Result<Box<dyn CardChannel>> {
        let name = reader_cstring(reader)?;
        let card = self
            .context
            .connect(&name, ShareMode::Exclusive, Protocols::ANY)?;
        let atr = card.get_attribute_owned(Attribute::AtrString)?;
        Ok(Box::new(PcscChannel { card, atr }))
    }
}

struct PcscChannel {
    card: PcscCard,
    atr: Vec<u8>,
}

impl CardChannel for PcscChannel {
    fn atr(&self) -> &[u8] {
        &self.atr
    }

    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>> {
        let mut buf = [0; MAX_BUFFER_SIZE];
        let reply = self.card.transmit(command, &mut buf)?;
        Ok(reply.to_vec())
    }

    // The channel is opened in exclusive mode, so the daemon already keeps
    // other applications away from the card.
    fn begin_transaction(&mut self) -> Result<()> {
        Ok(())
    }

    fn end_transaction(&mut self) -> Result<()> {
        Ok(())
    }

    fn disconnect(self: Box<Self>) -> Result<()> {
        self.card
            .disconnect(Disposition::ResetCard)
            .map_err(|(_, e)| e.into())
    }
}
