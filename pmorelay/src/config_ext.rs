//! Relay settings stored in pmoconfig
//!
//! The [`RelayConfigExt`] trait adds the relay keys to `pmoconfig::Config`:
//!
//! ```yaml
//! relay:
//!   station_url: http://79.120.39.202:8000/darkelectro
//!   local_url: http://localhost:51111/
//!   title_file: ObsNowPlaying/LocalStationCurrentSong.txt
//! ```
//!
//! Getters persist the default value when the key is missing, so the first
//! run leaves a complete `config.yaml` for the operator to edit.
//!
//! # Example
//!
//! ```no_run
//! use pmoconfig::Config;
//! use pmorelay::RelayConfigExt;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = Config::load_config("")?;
//! let relay = config.get_relay_config()?;
//! println!("Relaying {}", relay.station_url());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

use anyhow::Result;
use pmoconfig::Config;
use serde_yaml::Value;

use crate::config::RelayConfig;

/// Default upstream station
pub const DEFAULT_STATION_URL: &str = "http://79.120.39.202:8000/darkelectro";

/// Default local endpoint
pub const DEFAULT_LOCAL_URL: &str = "http://localhost:51111/";

/// Default title file, relative to the configuration directory
pub const DEFAULT_TITLE_FILE: &str = "ObsNowPlaying/LocalStationCurrentSong.txt";

const STATION_URL_PATH: &[&str] = &["relay", "station_url"];
const LOCAL_URL_PATH: &[&str] = &["relay", "local_url"];
const TITLE_FILE_PATH: &[&str] = &["relay", "title_file"];

/// Extension trait giving `pmoconfig::Config` the relay settings.
pub trait RelayConfigExt {
    /// URL of the ICY station to relay
    fn get_relay_station_url(&self) -> Result<String>;

    fn set_relay_station_url(&self, url: &str) -> Result<()>;

    /// Local URL the relay listens on
    fn get_relay_local_url(&self) -> Result<String>;

    fn set_relay_local_url(&self, url: &str) -> Result<()>;

    /// Title file as written in the configuration
    fn get_relay_title_file(&self) -> Result<String>;

    fn set_relay_title_file(&self, path: &str) -> Result<()>;

    /// Title file resolved against the configuration directory
    fn get_relay_title_path(&self) -> Result<PathBuf>;

    /// Validated [`RelayConfig`] built from the three keys
    fn get_relay_config(&self) -> Result<RelayConfig>;
}

impl RelayConfigExt for Config {
    fn get_relay_station_url(&self) -> Result<String> {
        get_string_or_default(self, STATION_URL_PATH, DEFAULT_STATION_URL)
    }

    fn set_relay_station_url(&self, url: &str) -> Result<()> {
        self.set_value(STATION_URL_PATH, Value::String(url.to_string()))
    }

    fn get_relay_local_url(&self) -> Result<String> {
        get_string_or_default(self, LOCAL_URL_PATH, DEFAULT_LOCAL_URL)
    }

    fn set_relay_local_url(&self, url: &str) -> Result<()> {
        self.set_value(LOCAL_URL_PATH, Value::String(url.to_string()))
    }

    fn get_relay_title_file(&self) -> Result<String> {
        get_string_or_default(self, TITLE_FILE_PATH, DEFAULT_TITLE_FILE)
    }

    fn set_relay_title_file(&self, path: &str) -> Result<()> {
        self.set_value(TITLE_FILE_PATH, Value::String(path.to_string()))
    }

    fn get_relay_title_path(&self) -> Result<PathBuf> {
        let file = self.get_relay_title_file()?;
        Ok(self.resolve_path(&file))
    }

    fn get_relay_config(&self) -> Result<RelayConfig> {
        let station_url = self.get_relay_station_url()?;
        let local_url = self.get_relay_local_url()?;
        let title_path = self.get_relay_title_path()?;
        Ok(RelayConfig::new(&station_url, &local_url, title_path)?)
    }
}

fn get_string_or_default(config: &Config, path: &[&str], default: &str) -> Result<String> {
    match config.get_value(path) {
        Ok(Value::String(s)) if !s.trim().is_empty() => Ok(s),
        _ => {
            // Not set, use default and persist
            config.set_value(path, Value::String(default.to_string()))?;
            Ok(default.to_string())
        }
    }
}
