//! # pmorelay - single-listener ICY radio relay
//!
//! Relays one internet radio station to a local HTTP endpoint and exports
//! the station's "Now Playing" title to a text file, e.g. for an OBS text
//! source.
//!
//! - Only one local client is served at a time: a new connection cancels
//!   the previous one.
//! - The station is always asked for ICY metadata; the metadata is only
//!   echoed to clients that asked for it themselves.
//! - The title file is emptied whenever nothing is being relayed.
//!
//! Settings live in `pmoconfig` under the `relay` section, see
//! [`RelayConfigExt`].

pub mod active;
pub mod config;
pub mod config_ext;
pub mod error;
pub mod logs;
pub mod publisher;
pub mod server;
mod session;

pub use active::{ActiveSlot, SessionHandle};
pub use config::RelayConfig;
pub use config_ext::RelayConfigExt;
pub use error::{Error, Result};
pub use logs::{LoggingOptions, init_logging};
pub use publisher::TitlePublisher;
pub use server::{RelayListener, RelayServer, ShutdownHook};
