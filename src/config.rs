//! Engine configuration
//!
//! Loaded from the JSON file named by `$CARDLINK_CONF`, or from
//! `<config dir>/cardlink/cardlink.json`. A missing file means defaults; a
//! file that exists but cannot be read or parsed is an error.
//!
//! ```json
//! {
//!   "debug": 0,
//!   "use_cache": true,
//!   "card_drivers": ["internal"],
//!   "force_driver": null,
//!   "card_atrs": [
//!     { "driver": "setcos", "atr": "3B:02:14:51", "id": 1 }
//!   ],
//!   "max_recv_size": 256
//! }
//! ```

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::apdu::MAX_SHORT_LE;
use crate::error::{Error, Result};

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "CARDLINK_CONF";

/// Driver list entry standing for every built-in driver
pub const INTERNAL_DRIVERS: &str = "internal";

const CONFIG_DIR: &str = "cardlink";
const CONFIG_FILE: &str = "cardlink.json";

/// Extra ATR table entry for a registered driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtrConfig {
    /// Short name of the driver the entry is appended to
    pub driver: String,
    /// ATR pattern in hex
    pub atr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<String>,
    /// Card type reported on match
    #[serde(default)]
    pub id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub debug: u32,
    /// Skip SELECT FILE for the path that is already selected
    pub use_cache: bool,
    /// Drivers to register, in matching order
    pub card_drivers: Vec<String>,
    /// Bind this driver on connect instead of matching ATRs
    pub force_driver: Option<String>,
    pub card_atrs: Vec<AtrConfig>,
    /// Largest response requested by a single READ BINARY
    pub max_recv_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: 0,
            use_cache: true,
            card_drivers: vec![INTERNAL_DRIVERS.to_string()],
            force_driver: None,
            card_atrs: Vec::new(),
            max_recv_size: MAX_SHORT_LE as usize,
        }
    }
}

impl Config {
    /// Location of the configuration file, if one can be determined
    pub fn default_path() -> Option<PathBuf> {
        config_path(std::env::var_os(CONFIG_ENV))
    }

    /// Load from the default location
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                debug!("No configuration directory, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No configuration at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config = Self::from_json(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: Config =
            serde_json::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check settings that do not depend on the driver registry
    pub fn validate(&self) -> Result<()> {
        if self.max_recv_size == 0 || self.max_recv_size > MAX_SHORT_LE as usize {
            return Err(Error::Config(format!(
                "max_recv_size must be between 1 and {}, got {}",
                MAX_SHORT_LE, self.max_recv_size
            )));
        }
        if self.card_drivers.is_empty() {
            return Err(Error::Config("card_drivers is empty".to_string()));
        }
        Ok(())
    }
}

fn config_path(env: Option<OsString>) -> Option<PathBuf> {
    match env {
        Some(path) if !path.is_empty() => Some(PathBuf::from(path)),
        _ => dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.use_cache);
        assert_eq!(config.card_drivers, vec!["internal"]);
        assert_eq!(config.max_recv_size, 256);
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cardlink.json");
        fs::write(
            &path,
            r#"{"debug": 2, "card_atrs": [{"driver": "flex", "atr": "3B:95", "mask": "FF:FF"}]}"#,
        )
        .unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.debug, 2);
        assert!(config.use_cache);
        assert_eq!(config.card_atrs[0].driver, "flex");
        assert_eq!(config.card_atrs[0].mask.as_deref(), Some("FF:FF"));
        assert_eq!(config.card_atrs[0].id, 0);
    }

    #[test]
    fn test_malformed_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cardlink.json");
        fs::write(&path, "{\"debug\": ").unwrap();
        assert!(matches!(Config::load_from(&path), Err(Error::Config(_))));

        fs::write(&path, r#"{"max_recv_size": 0}"#).unwrap();
        assert!(matches!(Config::load_from(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_env_path_wins() {
        let path = config_path(Some(OsString::from("/tmp/custom.json")));
        assert_eq!(path, Some(PathBuf::from("/tmp/custom.json")));
        if let Some(path) = config_path(None) {
            assert!(path.ends_with("cardlink/cardlink.json"));
        }
    }
}
