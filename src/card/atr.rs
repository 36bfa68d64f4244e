//! ATR (Answer To Reset) handling
//!
//! Drivers identify the cards they support with an ordered table of
//! [`AtrEntry`] patterns. [`match_atr`] walks such a table and reports the
//! first entry whose masked pattern matches. [`Atr::parse`] decodes the
//! structure of an ATR for display, and [`build_atr`] produces well-formed
//! ATRs for the simulated card.

use std::borrow::Cow;
use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::util::hex_to_bin;

/// One pattern of a driver's ATR table
///
/// A card matches when its ATR is at least as long as `atr` and
/// `(card[i] & mask[i]) == atr[i]` for every byte of the pattern. Without a
/// mask every byte must match exactly. An entry with an empty pattern
/// terminates the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtrEntry {
    pub atr: Cow<'static, [u8]>,
    pub mask: Option<Cow<'static, [u8]>>,
    /// Driver-specific card type reported on match
    pub id: u32,
}

impl AtrEntry {
    /// Exact-match entry for a static table
    pub const fn new(atr: &'static [u8], id: u32) -> Self {
        Self {
            atr: Cow::Borrowed(atr),
            mask: None,
            id,
        }
    }

    /// Masked entry for a static table
    pub const fn masked(atr: &'static [u8], mask: &'static [u8], id: u32) -> Self {
        Self {
            atr: Cow::Borrowed(atr),
            mask: Some(Cow::Borrowed(mask)),
            id,
        }
    }

    /// Table terminator
    pub const fn end() -> Self {
        Self::new(&[], 0)
    }

    /// Owned entry from hex strings, as found in configuration files
    pub fn from_hex(atr: &str, mask: Option<&str>, id: u32) -> Result<Self> {
        let pattern = hex_to_bin(atr)?;
        let mask = mask.map(hex_to_bin).transpose()?;
        if let Some(m) = &mask {
            if m.len() != pattern.len() {
                return Err(Error::InvalidHex(format!(
                    "ATR mask has {} bytes, pattern has {}",
                    m.len(),
                    pattern.len()
                )));
            }
        }
        Ok(Self {
            atr: Cow::Owned(pattern),
            mask: mask.map(Cow::Owned),
            id,
        })
    }

    pub fn is_terminator(&self) -> bool {
        self.atr.is_empty()
    }

    /// Test a card ATR against this entry
    pub fn matches(&self, card_atr: &[u8]) -> bool {
        if self.is_terminator() || card_atr.len() < self.atr.len() {
            return false;
        }
        match &self.mask {
            Some(mask) => self
                .atr
                .iter()
                .zip(mask.iter())
                .zip(card_atr)
                .all(|((&p, &m), &c)| c & m == p),
            None => card_atr.starts_with(&self.atr),
        }
    }
}

/// Result of a successful table lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtrMatch {
    /// Position of the matching entry in the table
    pub index: usize,
    /// The entry's card type identifier
    pub id: u32,
}

/// Find the first entry of `table` matching `atr`
///
/// Iteration stops at the first terminator entry. No match is `None`, not
/// an error.
pub fn match_atr(table: &[AtrEntry], atr: &[u8]) -> Option<AtrMatch> {
    table
        .iter()
        .take_while(|e| !e.is_terminator())
        .enumerate()
        .find(|(_, e)| e.matches(atr))
        .map(|(index, e)| AtrMatch { index, id: e.id })
}

/// Decoded ATR structure (ISO 7816-3 section 8)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atr {
    /// Initial character: 0x3B direct, 0x3F inverse convention
    pub ts: u8,
    /// Format character
    pub t0: u8,
    /// Interface bytes in transmission order
    pub interface_bytes: Vec<u8>,
    /// Offered protocols (`T=`); T=0 when no TD byte is present
    pub protocols: BTreeSet<u8>,
    pub historical: Vec<u8>,
    /// Check byte, present unless only T=0 is offered
    pub tck: Option<u8>,
    /// Whether XOR of T0..=TCK is zero
    pub tck_valid: bool,
}

impl Atr {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < 2 {
            return Err(Error::UnexpectedResponse(format!(
                "ATR of {} byte(s) is too short",
                raw.len()
            )));
        }
        let truncated = || Error::UnexpectedResponse("ATR truncated".to_string());

        let ts = raw[0];
        let t0 = raw[1];
        let hist_len = (t0 & 0x0F) as usize;
        let mut protocols = BTreeSet::new();
        let mut interface_bytes = Vec::new();

        let mut pos = 2;
        let mut y = t0 >> 4;
        loop {
            // TA, TB, TC present bits
            let count = (y & 0x07).count_ones() as usize;
            let end = pos + count;
            interface_bytes.extend_from_slice(raw.get(pos..end).ok_or_else(truncated)?);
            pos = end;

            if y & 0x08 == 0 {
                break;
            }
            let td = *raw.get(pos).ok_or_else(truncated)?;
            interface_bytes.push(td);
            protocols.insert(td & 0x0F);
            pos += 1;
            y = td >> 4;
        }
        if protocols.is_empty() {
            protocols.insert(0);
        }

        let historical = raw.get(pos..pos + hist_len).ok_or_else(truncated)?.to_vec();
        pos += hist_len;

        let needs_tck = protocols.iter().any(|&p| p != 0);
        let tck = if needs_tck {
            Some(*raw.get(pos).ok_or_else(truncated)?)
        } else {
            None
        };
        let tck_valid = match tck {
            Some(_) => raw[1..=pos].iter().fold(0u8, |acc, &b| acc ^ b) == 0,
            None => true,
        };

        Ok(Self {
            ts,
            t0,
            interface_bytes,
            protocols,
            historical,
            tck,
            tck_valid,
        })
    }

    pub fn is_direct_convention(&self) -> bool {
        self.ts == 0x3B
    }
}

/// Build a T=1 ATR with the given historical bytes (at most 15 are used)
pub fn build_atr(historical_bytes: &[u8]) -> Vec<u8> {
    let hist_len = historical_bytes.len().min(15);
    let mut atr = Vec::with_capacity(4 + hist_len);

    // TS: direct convention
    atr.push(0x3B);
    // T0: TD1 present, K historical bytes
    atr.push(0x80 | hist_len as u8);
    // TD1: T=1, no further interface bytes
    atr.push(0x01);
    atr.extend_from_slice(&historical_bytes[..hist_len]);

    let tck = atr[1..].iter().fold(0u8, |acc, &b| acc ^ b);
    atr.push(tck);
    atr
}
