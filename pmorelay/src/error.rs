//! Error types for the relay

use std::io;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or running the relay
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Request to the station failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Station stream or local client failed mid-relay
    #[error("Relay error: {0}")]
    Demux(#[from] pmoicy::DemuxError),

    /// Local endpoint could not be bound
    #[error("Unable to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Invalid relay configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The local client went away before the relay could answer
    #[error("Local client disconnected")]
    ClientGone,

    /// Configuration error (from pmoconfig/anyhow)
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),
}

impl Error {
    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// True when the failure is the local client disconnecting.
    pub fn is_client_gone(&self) -> bool {
        match self {
            Error::ClientGone => true,
            Error::Demux(e) => e.is_client_gone(),
            _ => false,
        }
    }
}
