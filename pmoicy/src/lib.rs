//! # pmoicy - ICY metadata for Shoutcast/Icecast streams
//!
//! Stations speaking the ICY convention interleave "Now Playing" metadata
//! with the audio bytes when the client sends `Icy-MetaData: 1`. The response
//! then carries `icy-metaint: N`: every `N` audio bytes come followed by one
//! length byte and `length * 16` bytes of metadata.
//!
//! This crate provides:
//!
//! - [`metadata`] : bounded-time parsing of a metadata block
//!   (`StreamTitle='...';`)
//! - [`demux`] : an async demultiplexer that forwards the audio, optionally
//!   echoes the metadata, and reports title changes to a [`TitleSink`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use pmoicy::{IcyDemuxer, TitleSink};
//! use async_trait::async_trait;
//!
//! struct Stdout;
//!
//! #[async_trait]
//! impl TitleSink for Stdout {
//!     async fn publish_title(&self, title: &str) -> std::io::Result<()> {
//!         println!("Now playing: {}", title);
//!         Ok(())
//!     }
//! }
//!
//! # async fn example(mut station: tokio::net::TcpStream) -> Result<(), pmoicy::DemuxError> {
//! let mut audio = tokio::io::sink();
//! let mut demuxer = IcyDemuxer::new(16_000, false);
//! demuxer.run(&mut station, &mut audio, &Stdout).await?;
//! # Ok(())
//! # }
//! ```

pub mod demux;
pub mod error;
pub mod metadata;

pub use demux::{DemuxStats, IcyDemuxer, TitleSink};
pub use error::DemuxError;
pub use metadata::{
    ICY_METADATA_BLOCK_SIZE, ICY_METADATA_MAX_LEN, STREAM_TITLE_KEY, STREAM_URL_KEY, icy_field,
    parse_stream_title,
};

/// Request header asking a station to interleave metadata.
pub const ICY_METADATA_HEADER: &str = "icy-metadata";

/// Response header carrying the metadata interval.
pub const ICY_METAINT_HEADER: &str = "icy-metaint";

/// Parses an `icy-metaint` header value.
///
/// Returns `None` unless the value is a positive integer.
pub fn parse_metaint(value: &str) -> Option<usize> {
    value.trim().parse::<usize>().ok().filter(|&n| n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_metaint() {
        assert_eq!(parse_metaint("16000"), Some(16_000));
        assert_eq!(parse_metaint(" 8192 "), Some(8192));
        assert_eq!(parse_metaint("0"), None);
        assert_eq!(parse_metaint("-1"), None);
        assert_eq!(parse_metaint("abc"), None);
        assert_eq!(parse_metaint(""), None);
    }
}
