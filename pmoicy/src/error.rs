//! Error types for ICY demultiplexing

use std::io;

/// Failure of one side of a demultiplexed copy.
///
/// Upstream end-of-stream is not an error: [`crate::IcyDemuxer::run`]
/// returns normally when the station closes the stream.
#[derive(Debug, thiserror::Error)]
pub enum DemuxError {
    /// Reading from the station failed
    #[error("upstream read failed: {0}")]
    Upstream(#[source] io::Error),

    /// Writing to the local client failed (usually a disconnect)
    #[error("client write failed: {0}")]
    Client(#[source] io::Error),
}

impl DemuxError {
    /// True when the local client went away.
    pub fn is_client_gone(&self) -> bool {
        matches!(self, DemuxError::Client(_))
    }
}
