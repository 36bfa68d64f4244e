//! Session context
//!
//! A [`Context`] owns the reader list, the ordered driver registry and the
//! settings cards inherit. Cards connected through it stay bound to its
//! lifetime: once the context is destroyed, every operation on those cards
//! fails with [`Error::InvalidHandle`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::card::{match_atr, AtrEntry, AtrMatch, Card, CardOptions};
use crate::config::{Config, INTERNAL_DRIVERS};
use crate::driver::{builtin_driver, builtin_drivers, CardDriver};
use crate::error::{Error, Result};
use crate::reader::{CardPresence, Transport};

/// A driver in the context's registry, with ATR entries from configuration
pub struct RegisteredDriver {
    driver: Arc<dyn CardDriver>,
    extra_atrs: Vec<AtrEntry>,
}

impl RegisteredDriver {
    fn new(driver: Arc<dyn CardDriver>) -> Self {
        Self {
            driver,
            extra_atrs: Vec::new(),
        }
    }

    pub fn driver(&self) -> &dyn CardDriver {
        self.driver.as_ref()
    }

    pub fn short_name(&self) -> &'static str {
        self.driver.short_name()
    }

    pub fn name(&self) -> &'static str {
        self.driver.name()
    }

    /// Entries appended to the driver's own table
    pub fn extra_atrs(&self) -> &[AtrEntry] {
        &self.extra_atrs
    }

    /// Match against the built-in table, then the configured entries
    pub fn match_card(&self, atr: &[u8]) -> Option<AtrMatch> {
        if let Some(m) = self.driver.match_card(atr) {
            return Some(m);
        }
        let builtin = self
            .driver
            .atr_table()
            .iter()
            .take_while(|e| !e.is_terminator())
            .count();
        match_atr(&self.extra_atrs, atr).map(|m| AtrMatch {
            index: builtin + m.index,
            id: m.id,
        })
    }
}

pub struct Context {
    transport: Box<dyn Transport>,
    readers: Vec<String>,
    drivers: Vec<RegisteredDriver>,
    forced: Option<usize>,
    /// Reader indices with a positive detect since the last connect attempt
    detected: Vec<bool>,
    options: CardOptions,
    alive: Arc<AtomicBool>,
}

impl Context {
    /// Build the driver registry and take a snapshot of the readers
    ///
    /// Any configuration problem fails the whole call.
    pub fn establish(config: &Config, transport: Box<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let mut drivers = registry_from_config(config)?;

        for entry in &config.card_atrs {
            let atr = AtrEntry::from_hex(&entry.atr, entry.mask.as_deref(), entry.id)
                .map_err(|e| Error::Config(format!("card_atrs entry {}: {}", entry.atr, e)))?;
            match drivers.iter_mut().find(|d| d.short_name() == entry.driver) {
                Some(d) => d.extra_atrs.push(atr),
                None => warn!(
                    "Skipping ATR {} for driver '{}', which is not registered",
                    entry.atr, entry.driver
                ),
            }
        }

        let readers = transport.list_readers()?;
        let mut ctx = Self {
            detected: vec![false; readers.len()],
            transport,
            readers,
            drivers,
            forced: None,
            options: CardOptions {
                debug: config.debug,
                use_cache: config.use_cache,
                max_recv_size: config.max_recv_size,
            },
            alive: Arc::new(AtomicBool::new(true)),
        };
        if let Some(name) = &config.force_driver {
            ctx.set_default_driver(name)?;
        }

        info!(
            "Context established: {} reader(s) via {}, {} driver(s)",
            ctx.readers.len(),
            ctx.transport.name(),
            ctx.drivers.len()
        );
        Ok(ctx)
    }

    pub fn readers(&self) -> &[String] {
        &self.readers
    }

    /// Registered drivers in matching order
    pub fn drivers(&self) -> &[RegisteredDriver] {
        &self.drivers
    }

    pub fn forced_driver(&self) -> Option<&RegisteredDriver> {
        self.forced.map(|i| &self.drivers[i])
    }

    /// Settings handed to every card connected from now on
    pub fn options(&self) -> &CardOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut CardOptions {
        &mut self.options
    }

    /// Bind `name` on every following connect, bypassing ATR matching
    pub fn set_default_driver(&mut self, name: &str) -> Result<()> {
        let index = self
            .drivers
            .iter()
            .position(|d| d.short_name() == name)
            .ok_or_else(|| Error::DriverNotFound(name.to_string()))?;
        debug!("Forcing driver '{}'", name);
        self.forced = Some(index);
        Ok(())
    }

    fn reader(&self, index: usize) -> Result<&str> {
        self.readers
            .get(index)
            .map(String::as_str)
            .ok_or(Error::ReaderIndexOutOfRange {
                index,
                count: self.readers.len(),
            })
    }

    /// Check whether the reader at `index` holds a card
    pub fn detect_card(&mut self, index: usize) -> Result<CardPresence> {
        let reader = self.reader(index)?;
        let presence = self.transport.detect(reader)?;
        debug!("Reader {} ('{}'): card {:?}", index, reader, presence);
        self.detected[index] = presence == CardPresence::Present;
        Ok(presence)
    }

    /// Connect to the card in the reader at `index`
    ///
    /// Requires a positive [`detect_card`](Self::detect_card) first. The
    /// forced driver is bound if one is set; otherwise the first registered
    /// driver whose ATR table matches.
    pub fn connect(&mut self, index: usize) -> Result<Card> {
        let reader = self.reader(index)?.to_string();
        if !self.detected[index] {
            return Err(Error::NotDetected(index));
        }

        let channel = match self.transport.connect(&reader) {
            Ok(channel) => channel,
            Err(e) => {
                if matches!(e, Error::CardNotPresent) {
                    self.detected[index] = false;
                }
                return Err(e);
            }
        };
        let atr = channel.atr().to_vec();
        debug!("ATR: {}", hex::encode_upper(&atr));

        let bound = match self.forced {
            Some(i) => {
                let d = &self.drivers[i];
                Some((Arc::clone(&d.driver), d.match_card(&atr).map_or(0, |m| m.id)))
            }
            None => self
                .drivers
                .iter()
                .find_map(|d| d.match_card(&atr).map(|m| (Arc::clone(&d.driver), m.id))),
        };
        let Some((driver, type_id)) = bound else {
            if let Err(e) = channel.disconnect() {
                warn!("Disconnect after failed match: {}", e);
            }
            return Err(Error::CardNotRecognized);
        };

        let mut card = Card::new(
            index,
            reader,
            channel,
            Arc::clone(&driver),
            type_id,
            Arc::clone(&self.alive),
            self.options,
        );
        card.algorithms.clear();
        driver.init(&mut card)?;

        info!(
            "Connected to card in '{}' using driver '{}'",
            card.reader_name(),
            driver.name()
        );
        Ok(card)
    }

    /// Tear the context down, invalidating every card connected through it
    pub fn destroy(self) {}
}

impl Drop for Context {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
        debug!("Context released");
    }
}

fn registry_from_config(config: &Config) -> Result<Vec<RegisteredDriver>> {
    let mut drivers: Vec<RegisteredDriver> = Vec::new();
    let mut register = |driver: Arc<dyn CardDriver>| {
        if drivers.iter().any(|d| d.short_name() == driver.short_name()) {
            warn!("Driver '{}' listed twice, keeping the first", driver.short_name());
        } else {
            drivers.push(RegisteredDriver::new(driver));
        }
    };

    for name in &config.card_drivers {
        if name == INTERNAL_DRIVERS {
            builtin_drivers().into_iter().for_each(&mut register);
        } else {
            let driver = builtin_driver(name)
                .ok_or_else(|| Error::Config(format!("unknown card driver '{}'", name)))?;
            register(driver);
        }
    }
    Ok(drivers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AtrConfig;
    use crate::reader::{CardImage, VirtualCard, VirtualTransport};

    fn demo_context() -> (Context, VirtualTransport) {
        let transport = VirtualTransport::with_card(CardImage::demo());
        let ctx = Context::establish(&Config::default(), Box::new(transport.clone())).unwrap();
        (ctx, transport)
    }

    #[test]
    fn test_establish_lists_readers_and_drivers() {
        let (ctx, _) = demo_context();
        assert_eq!(ctx.readers(), &["Virtual Reader 0".to_string()]);
        let names: Vec<&str> = ctx.drivers().iter().map(|d| d.short_name()).collect();
        assert_eq!(names, vec!["setcos", "flex", "default"]);
    }

    #[test]
    fn test_unknown_driver_in_config_is_fatal() {
        let config = Config {
            card_drivers: vec!["setcos".to_string(), "nonesuch".to_string()],
            ..Config::default()
        };
        let result = Context::establish(&config, Box::new(VirtualTransport::new()));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_driver_subset_keeps_configured_order() {
        let config = Config {
            card_drivers: vec!["default".to_string(), "setcos".to_string()],
            ..Config::default()
        };
        let transport = VirtualTransport::with_card(CardImage::demo());
        let mut ctx = Context::establish(&config, Box::new(transport)).unwrap();
        ctx.detect_card(0).unwrap();
        // The catch-all driver registered first wins
        let card = ctx.connect(0).unwrap();
        assert_eq!(card.driver().short_name(), "default");
    }

    #[test]
    fn test_set_default_driver() {
        let (mut ctx, _) = demo_context();
        assert!(matches!(
            ctx.set_default_driver("Flex"),
            Err(Error::DriverNotFound(_))
        ));
        assert!(ctx.forced_driver().is_none());
        ctx.set_default_driver("default").unwrap();
        ctx.detect_card(0).unwrap();
        let card = ctx.connect(0).unwrap();
        assert_eq!(card.driver().short_name(), "default");
    }

    #[test]
    fn test_detect_is_tri_state() {
        let transport = VirtualTransport::new();
        transport.add_reader(None);
        let mut ctx = Context::establish(&Config::default(), Box::new(transport)).unwrap();
        assert_eq!(ctx.detect_card(0).unwrap(), CardPresence::Absent);
        assert!(matches!(
            ctx.detect_card(1),
            Err(Error::ReaderIndexOutOfRange { index: 1, count: 1 })
        ));
    }

    #[test]
    fn test_connect_requires_detect() {
        let (mut ctx, _) = demo_context();
        assert!(matches!(ctx.connect(0), Err(Error::NotDetected(0))));
        ctx.detect_card(0).unwrap();
        let card = ctx.connect(0).unwrap();
        assert_eq!(card.driver().short_name(), "setcos");
        assert_eq!(card.algorithms.len(), 3);
    }

    #[test]
    fn test_card_removed_after_detect() {
        let (mut ctx, transport) = demo_context();
        ctx.detect_card(0).unwrap();
        transport.remove(0);
        assert!(matches!(ctx.connect(0), Err(Error::CardNotPresent)));
        assert!(matches!(ctx.connect(0), Err(Error::NotDetected(0))));
    }

    #[test]
    fn test_configured_atr_extends_driver() {
        let mut image = CardImage::demo();
        image.atr = vec![0x3B, 0x02, 0x14, 0x51];
        let config = Config {
            card_drivers: vec!["setcos".to_string()],
            card_atrs: vec![AtrConfig {
                driver: "setcos".to_string(),
                atr: "3B:02:14:51".to_string(),
                mask: None,
                id: 7,
            }],
            ..Config::default()
        };
        let transport = VirtualTransport::new();
        transport.add_reader(Some(VirtualCard::new(image)));
        let mut ctx = Context::establish(&config, Box::new(transport)).unwrap();
        ctx.detect_card(0).unwrap();
        let card = ctx.connect(0).unwrap();
        assert_eq!(card.type_id(), 7);
        assert_eq!(ctx.drivers()[0].match_card(&[0x3B, 0x02, 0x14, 0x51]).unwrap().index, 2);
    }

    #[test]
    fn test_unrecognized_card() {
        let config = Config {
            card_drivers: vec!["flex".to_string()],
            ..Config::default()
        };
        let transport = VirtualTransport::with_card(CardImage::demo());
        let mut ctx = Context::establish(&config, Box::new(transport.clone())).unwrap();
        ctx.detect_card(0).unwrap();
        assert!(matches!(ctx.connect(0), Err(Error::CardNotRecognized)));
        let card = transport.card(0).unwrap();
        assert!(!card.lock().is_powered());
    }

    #[test]
    fn test_destroy_invalidates_cards() {
        let (mut ctx, _) = demo_context();
        ctx.detect_card(0).unwrap();
        let mut card = ctx.connect(0).unwrap();
        assert!(card.is_valid());
        let root = crate::fs::Path::root();
        card.select_file(&root).unwrap();
        assert!(card.current_file().is_some());
        ctx.destroy();
        assert!(!card.is_valid());
        // the cached selection must not outlive the context
        assert!(matches!(card.select_file(&root), Err(Error::InvalidHandle)));
    }
}
