//! Validated relay settings.

use std::path::{Path, PathBuf};

use url::Url;

use crate::error::{Error, Result};

/// Station, local endpoint and title file of one relay.
///
/// Built once at startup; every URL is checked here so the server never
/// deals with a half-valid configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    station_url: Url,
    local_url: Url,
    title_path: PathBuf,
}

impl RelayConfig {
    /// Validates and builds a configuration.
    ///
    /// Both URLs must be absolute `http`/`https` URLs with a host, and the
    /// title path must not be empty.
    pub fn new(station_url: &str, local_url: &str, title_path: impl Into<PathBuf>) -> Result<Self> {
        let station_url = parse_http_url("station_url", station_url)?;
        let local_url = parse_http_url("local_url", local_url)?;
        let title_path = title_path.into();

        if title_path.as_os_str().is_empty() {
            return Err(Error::invalid_config("title_file must not be empty"));
        }
        if local_url.port_or_known_default().is_none() {
            return Err(Error::invalid_config(format!(
                "local_url has no usable port: {}",
                local_url
            )));
        }

        Ok(Self {
            station_url,
            local_url,
            title_path,
        })
    }

    pub fn station_url(&self) -> &Url {
        &self.station_url
    }

    pub fn local_url(&self) -> &Url {
        &self.local_url
    }

    pub fn title_path(&self) -> &Path {
        &self.title_path
    }

    /// `host:port` the local server binds to.
    pub fn listen_addr(&self) -> String {
        let host = self.local_url.host_str().unwrap_or("localhost");
        let port = self.local_url.port_or_known_default().unwrap_or(80);
        format!("{}:{}", host, port)
    }
}

fn parse_http_url(name: &str, value: &str) -> Result<Url> {
    let url = Url::parse(value.trim())
        .map_err(|e| Error::invalid_config(format!("{} '{}': {}", name, value, e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::invalid_config(format!(
            "{} must use http or https: {}",
            name, url
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(Error::invalid_config(format!("{} has no host: {}", name, url)));
    }

    Ok(url)
}
