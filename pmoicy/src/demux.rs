//! ICY stream demultiplexer.
//!
//! When a station answers with `icy-metaint: N`, its body is laid out as:
//!
//! ```text
//! [N audio bytes][len][len * 16 metadata bytes][N audio bytes][len]...
//! ```
//!
//! [`IcyDemuxer`] walks that layout, forwards audio to the client as soon as
//! it is read, optionally echoes the metadata bytes, and hands every
//! metadata block to a [`TitleSink`] when the title changes.

use crate::error::DemuxError;
use crate::metadata::{ICY_METADATA_BLOCK_SIZE, ICY_METADATA_MAX_LEN, parse_stream_title};
use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Size of the scratch buffer used to move audio bytes.
const COPY_CHUNK_SIZE: usize = 16 * 1024;

/// Receiver of "Now Playing" changes.
#[async_trait]
pub trait TitleSink: Send + Sync {
    /// Persists a new current title.
    ///
    /// Only called when the title differs from the last one successfully
    /// published by the same demuxer.
    async fn publish_title(&self, title: &str) -> io::Result<()>;
}

/// Counters collected over one demultiplexed stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemuxStats {
    /// Audio bytes read from the station
    pub payload_bytes: u64,
    /// Length bytes read, i.e. metadata opportunities (empty ones included)
    pub metadata_frames: u64,
    /// Titles handed to the sink successfully
    pub titles_published: u64,
}

/// Session-scoped ICY demultiplexer.
pub struct IcyDemuxer {
    metaint: usize,
    keep_metadata: bool,
    scratch: Vec<u8>,
    length: [u8; 1],
    metadata: Box<[u8]>,
    last_title: String,
    stats: DemuxStats,
}

impl IcyDemuxer {
    /// Creates a demuxer for a stream advertising `icy-metaint: metaint`.
    ///
    /// # Arguments
    ///
    /// * `metaint` - audio bytes between two length bytes (0 = no metadata,
    ///   raw passthrough)
    /// * `keep_metadata` - echo length bytes and metadata blocks to the client
    ///   (the client sent `Icy-MetaData` itself)
    pub fn new(metaint: usize, keep_metadata: bool) -> Self {
        Self {
            metaint,
            keep_metadata,
            scratch: vec![0u8; COPY_CHUNK_SIZE],
            length: [0u8; 1],
            metadata: vec![0u8; ICY_METADATA_MAX_LEN].into_boxed_slice(),
            last_title: String::new(),
            stats: DemuxStats::default(),
        }
    }

    /// Last title successfully handed to the sink.
    pub fn last_title(&self) -> &str {
        &self.last_title
    }

    /// Relays `upstream` to `client` until the station closes the stream.
    ///
    /// Returns the collected counters on upstream end-of-stream. Errors tell
    /// which side failed. Cancellation is done by dropping the returned
    /// future; no byte is written after that.
    pub async fn run<R, W, S>(
        &mut self,
        upstream: &mut R,
        client: &mut W,
        sink: &S,
    ) -> Result<DemuxStats, DemuxError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
        S: TitleSink + ?Sized,
    {
        if self.metaint == 0 {
            self.passthrough(upstream, client).await?;
        } else {
            self.demultiplex(upstream, client, sink).await?;
        }

        client.flush().await.map_err(DemuxError::Client)?;
        Ok(self.stats)
    }

    async fn passthrough<R, W>(&mut self, upstream: &mut R, client: &mut W) -> Result<(), DemuxError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        loop {
            let read = upstream
                .read(&mut self.scratch)
                .await
                .map_err(DemuxError::Upstream)?;
            if read == 0 {
                debug!("End of radio stream");
                return Ok(());
            }
            client
                .write_all(&self.scratch[..read])
                .await
                .map_err(DemuxError::Client)?;
            self.stats.payload_bytes += read as u64;
        }
    }

    async fn demultiplex<R, W, S>(
        &mut self,
        upstream: &mut R,
        client: &mut W,
        sink: &S,
    ) -> Result<(), DemuxError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
        S: TitleSink + ?Sized,
    {
        loop {
            if !self.copy_payload(upstream, client).await? {
                break;
            }

            if !fill(upstream, client, &mut self.length, self.keep_metadata).await? {
                break;
            }
            self.stats.metadata_frames += 1;

            let len = self.length[0] as usize * ICY_METADATA_BLOCK_SIZE;
            if len == 0 {
                continue;
            }

            if !fill(upstream, client, &mut self.metadata[..len], self.keep_metadata).await? {
                break;
            }

            let title = parse_stream_title(&self.metadata[..len]);
            self.update_title(title, sink).await;
        }

        debug!("End of radio stream");
        Ok(())
    }

    /// Forwards exactly `metaint` audio bytes. `false` on end-of-stream.
    async fn copy_payload<R, W>(&mut self, upstream: &mut R, client: &mut W) -> Result<bool, DemuxError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let mut remaining = self.metaint;
        while remaining > 0 {
            let want = remaining.min(self.scratch.len());
            let read = upstream
                .read(&mut self.scratch[..want])
                .await
                .map_err(DemuxError::Upstream)?;
            if read == 0 {
                return Ok(false);
            }
            client
                .write_all(&self.scratch[..read])
                .await
                .map_err(DemuxError::Client)?;
            self.stats.payload_bytes += read as u64;
            remaining -= read;
        }
        Ok(true)
    }

    async fn update_title<S>(&mut self, title: String, sink: &S)
    where
        S: TitleSink + ?Sized,
    {
        debug!(title = %title, "ICY metadata block");
        if title == self.last_title {
            return;
        }

        match sink.publish_title(&title).await {
            Ok(()) => {
                info!("🎵 {}", title);
                self.last_title = title;
                self.stats.titles_published += 1;
            }
            Err(e) => warn!("Failed to update title file: {}", e),
        }
    }
}

/// Reads exactly `buf.len()` bytes, forwarding each read piece when asked.
/// `false` on end-of-stream.
async fn fill<R, W>(upstream: &mut R, client: &mut W, buf: &mut [u8], forward: bool) -> Result<bool, DemuxError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let mut offset = 0;
    while offset < buf.len() {
        let read = upstream
            .read(&mut buf[offset..])
            .await
            .map_err(DemuxError::Upstream)?;
        if read == 0 {
            return Ok(false);
        }
        if forward {
            client
                .write_all(&buf[offset..offset + read])
                .await
                .map_err(DemuxError::Client)?;
        }
        offset += read;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sink qui mémorise les titres publiés
    #[derive(Default)]
    struct RecordingSink {
        titles: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn titles(&self) -> Vec<String> {
            self.titles.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TitleSink for RecordingSink {
        async fn publish_title(&self, title: &str) -> io::Result<()> {
            self.titles.lock().unwrap().push(title.to_string());
            Ok(())
        }
    }

    /// Sink dont la première écriture échoue
    #[derive(Default)]
    struct FlakySink {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TitleSink for FlakySink {
        async fn publish_title(&self, _title: &str) -> io::Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
            } else {
                Ok(())
            }
        }
    }

    fn payload(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed)).collect()
    }

    /// Length byte followed by the padded metadata block
    fn metadata_block(meta: &str) -> Vec<u8> {
        let blocks = meta.len().div_ceil(ICY_METADATA_BLOCK_SIZE);
        let mut out = vec![blocks as u8];
        out.extend_from_slice(meta.as_bytes());
        out.resize(1 + blocks * ICY_METADATA_BLOCK_SIZE, 0);
        out
    }

    #[tokio::test]
    async fn test_strips_metadata_and_publishes_title() {
        let first = payload(16_000, 1);
        let second = payload(16_000, 2);
        let block = metadata_block("StreamTitle='Test Song';");
        assert_eq!(block.len(), 1 + 32);

        let mut input = first.clone();
        input.extend_from_slice(&block);
        input.extend_from_slice(&second);

        let sink = RecordingSink::default();
        let mut client = Vec::new();
        let mut upstream: &[u8] = &input;
        let mut demuxer = IcyDemuxer::new(16_000, false);
        let stats = demuxer.run(&mut upstream, &mut client, &sink).await.unwrap();

        assert_eq!(client.len(), 32_000);
        assert_eq!(&client[..16_000], &first[..]);
        assert_eq!(&client[16_000..], &second[..]);
        assert_eq!(sink.titles(), vec!["Test Song".to_string()]);
        assert_eq!(demuxer.last_title(), "Test Song");
        assert_eq!(stats.payload_bytes, 32_000);
        assert_eq!(stats.metadata_frames, 1);
        assert_eq!(stats.titles_published, 1);
    }

    #[tokio::test]
    async fn test_one_metadata_opportunity_per_interval() {
        let mut input = Vec::new();
        let mut expected = Vec::new();
        for i in 0..12u8 {
            let chunk = payload(100, i);
            input.extend_from_slice(&chunk);
            expected.extend_from_slice(&chunk);
            if i % 4 == 0 {
                input.extend_from_slice(&metadata_block(&format!("StreamTitle='Song {}';", i / 4)));
            } else {
                input.push(0);
            }
        }
        // Trailing partial interval: forwarded, no opportunity
        let tail = payload(42, 99);
        input.extend_from_slice(&tail);
        expected.extend_from_slice(&tail);

        let sink = RecordingSink::default();
        let mut client = Vec::new();
        let mut upstream: &[u8] = &input;
        let stats = IcyDemuxer::new(100, false)
            .run(&mut upstream, &mut client, &sink)
            .await
            .unwrap();

        assert_eq!(stats.metadata_frames, (expected.len() / 100) as u64);
        assert_eq!(client, expected);
        assert_eq!(sink.titles(), vec!["Song 0", "Song 1", "Song 2"]);
    }

    #[tokio::test]
    async fn test_keep_metadata_echoes_stream_verbatim() {
        let mut input = payload(64, 3);
        input.extend_from_slice(&metadata_block("StreamTitle='Echo';StreamUrl='';"));
        input.extend_from_slice(&payload(64, 4));
        input.push(0);

        let sink = RecordingSink::default();
        let mut client = Vec::new();
        let mut upstream: &[u8] = &input;
        IcyDemuxer::new(64, true)
            .run(&mut upstream, &mut client, &sink)
            .await
            .unwrap();

        assert_eq!(client, input);
        assert_eq!(sink.titles(), vec!["Echo"]);
    }

    #[tokio::test]
    async fn test_same_title_written_once() {
        let mut input = Vec::new();
        for title in ["A", "A", "A", "B", "B", "A"] {
            input.extend_from_slice(&payload(32, 0));
            input.extend_from_slice(&metadata_block(&format!("StreamTitle='{}';", title)));
        }

        let sink = RecordingSink::default();
        let mut client = Vec::new();
        let mut upstream: &[u8] = &input;
        let stats = IcyDemuxer::new(32, false)
            .run(&mut upstream, &mut client, &sink)
            .await
            .unwrap();

        assert_eq!(sink.titles(), vec!["A", "B", "A"]);
        assert_eq!(stats.metadata_frames, 6);
        assert_eq!(stats.titles_published, 3);
    }

    #[tokio::test]
    async fn test_zero_metaint_is_raw_passthrough() {
        let mut input = payload(100, 5);
        input.extend_from_slice(&metadata_block("StreamTitle='Not parsed';"));
        input.extend_from_slice(&payload(100, 6));

        let sink = RecordingSink::default();
        let mut client = Vec::new();
        let mut upstream: &[u8] = &input;
        let stats = IcyDemuxer::new(0, false)
            .run(&mut upstream, &mut client, &sink)
            .await
            .unwrap();

        assert_eq!(client, input);
        assert!(sink.titles().is_empty());
        assert_eq!(stats.metadata_frames, 0);
        assert_eq!(stats.payload_bytes, input.len() as u64);
    }

    #[tokio::test]
    async fn test_truncated_metadata_ends_quietly() {
        let mut input = payload(50, 7);
        let block = metadata_block("StreamTitle='Cut';");
        input.extend_from_slice(&block[..10]);

        let sink = RecordingSink::default();
        let mut client = Vec::new();
        let mut upstream: &[u8] = &input;
        let stats = IcyDemuxer::new(50, false)
            .run(&mut upstream, &mut client, &sink)
            .await
            .unwrap();

        assert_eq!(client, payload(50, 7));
        assert!(sink.titles().is_empty());
        assert_eq!(stats.metadata_frames, 1);
    }

    #[tokio::test]
    async fn test_fragmented_reads() {
        let mut input = payload(40, 8);
        input.extend_from_slice(&metadata_block("StreamTitle='Fragmented';"));
        input.extend_from_slice(&payload(40, 9));
        input.push(0);

        // Découpage arbitraire, à cheval sur les frontières du protocole
        let mut upstream = tokio_test::io::Builder::new()
            .read(&input[..13])
            .read(&input[13..41])
            .read(&input[41..45])
            .read(&input[45..80])
            .read(&input[80..])
            .build();

        let sink = RecordingSink::default();
        let mut client = Vec::new();
        let stats = IcyDemuxer::new(40, false)
            .run(&mut upstream, &mut client, &sink)
            .await
            .unwrap();

        let mut expected = payload(40, 8);
        expected.extend_from_slice(&payload(40, 9));
        assert_eq!(client, expected);
        assert_eq!(sink.titles(), vec!["Fragmented"]);
        assert_eq!(stats.metadata_frames, 2);
    }

    #[tokio::test]
    async fn test_client_disconnect_is_reported() {
        let input = payload(256, 10);
        let (mut writer, reader) = tokio::io::duplex(16);
        drop(reader);

        let sink = RecordingSink::default();
        let mut upstream: &[u8] = &input;
        let err = IcyDemuxer::new(64, false)
            .run(&mut upstream, &mut writer, &sink)
            .await
            .unwrap_err();

        assert!(err.is_client_gone());
    }

    #[tokio::test]
    async fn test_upstream_error_is_reported() {
        let mut upstream = tokio_test::io::Builder::new()
            .read(&payload(10, 11))
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();

        let sink = RecordingSink::default();
        let mut client = Vec::new();
        let err = IcyDemuxer::new(64, false)
            .run(&mut upstream, &mut client, &sink)
            .await
            .unwrap_err();

        assert!(matches!(err, DemuxError::Upstream(_)));
        assert_eq!(client.len(), 10);
    }

    #[tokio::test]
    async fn test_failed_publish_is_retried() {
        let mut input = Vec::new();
        for _ in 0..3 {
            input.extend_from_slice(&payload(16, 0));
            input.extend_from_slice(&metadata_block("StreamTitle='Retry';"));
        }

        let sink = FlakySink::default();
        let mut client = Vec::new();
        let mut upstream: &[u8] = &input;
        let mut demuxer = IcyDemuxer::new(16, false);
        let stats = demuxer.run(&mut upstream, &mut client, &sink).await.unwrap();

        assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
        assert_eq!(stats.titles_published, 1);
        assert_eq!(demuxer.last_title(), "Retry");
    }
}
