//! Title file ("Now Playing") publisher.

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use pmoicy::TitleSink;
use tracing::{debug, warn};

/// Writes the current title to a text file read by streaming software.
///
/// The file holds exactly the title, without trailing newline. It is
/// emptied whenever no session is relaying.
///
/// Writes and clears are ordered by a generation counter: every clear bumps
/// it, and a write queued before a clear is dropped instead of landing
/// after it.
#[derive(Debug, Clone)]
pub struct TitlePublisher {
    path: PathBuf,
    generation: Arc<Mutex<u64>>,
}

impl TitlePublisher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            generation: Arc::new(Mutex::new(0)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the parent directory of the title file.
    pub fn ensure_directory(&self) -> io::Result<()> {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir),
            _ => Ok(()),
        }
    }

    /// Empties the title file.
    ///
    /// Synchronous so it can run from `Drop` and from the shutdown hook; the
    /// file is a few bytes, the write does not go through the blocking pool.
    /// A missing file is left missing; failures are logged and swallowed.
    pub fn clear(&self) {
        let mut generation = self.generation.lock();
        *generation += 1;

        if !self.path.exists() {
            return;
        }
        match std::fs::write(&self.path, b"") {
            Ok(()) => debug!("Cleared title file {}", self.path.display()),
            Err(e) => warn!("Failed to clear title file {}: {}", self.path.display(), e),
        }
    }
}

#[async_trait]
impl TitleSink for TitlePublisher {
    /// Fails with `Interrupted` when a clear happened before the write ran,
    /// so the caller retries on the next metadata block.
    async fn publish_title(&self, title: &str) -> io::Result<()> {
        let expected = *self.generation.lock();
        let generation = self.generation.clone();
        let path = self.path.clone();
        let title = title.to_string();

        tokio::task::spawn_blocking(move || {
            let current = generation.lock();
            if *current != expected {
                return Err(io::Error::new(
                    io::ErrorKind::Interrupted,
                    "title file cleared before the write",
                ));
            }
            std::fs::write(&path, title.as_bytes())
        })
        .await
        .map_err(io::Error::other)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_publish_writes_exact_title() {
        let dir = TempDir::new().unwrap();
        let publisher = TitlePublisher::new(dir.path().join("title.txt"));

        publisher.publish_title("Artist - Title").await.unwrap();
        assert_eq!(
            std::fs::read_to_string(publisher.path()).unwrap(),
            "Artist - Title"
        );

        publisher.publish_title("B").await.unwrap();
        assert_eq!(std::fs::read_to_string(publisher.path()).unwrap(), "B");
    }

    #[tokio::test]
    async fn test_clear_empties_file() {
        let dir = TempDir::new().unwrap();
        let publisher = TitlePublisher::new(dir.path().join("title.txt"));
        publisher.publish_title("Song").await.unwrap();

        publisher.clear();
        assert_eq!(std::fs::read_to_string(publisher.path()).unwrap(), "");

        // idempotent
        publisher.clear();
        assert_eq!(std::fs::read_to_string(publisher.path()).unwrap(), "");
    }

    #[test]
    fn test_clear_missing_file_is_noop() {
        let dir = TempDir::new().unwrap();
        let publisher = TitlePublisher::new(dir.path().join("missing.txt"));

        publisher.clear();
        assert!(!publisher.path().exists());
    }

    #[test]
    fn test_ensure_directory() {
        let dir = TempDir::new().unwrap();
        let publisher = TitlePublisher::new(dir.path().join("ObsNowPlaying/now.txt"));

        publisher.ensure_directory().unwrap();
        assert!(dir.path().join("ObsNowPlaying").is_dir());
        // no-op the second time
        publisher.ensure_directory().unwrap();
    }

    #[test]
    fn test_cancelled_write_never_lands_after_clear() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .max_blocking_threads(1)
            .enable_time()
            .build()
            .unwrap();

        runtime.block_on(async {
            let dir = TempDir::new().unwrap();
            let publisher = TitlePublisher::new(dir.path().join("title.txt"));
            publisher.publish_title("Old").await.unwrap();

            // Keep the only blocking thread busy so the next write is queued
            let busy = tokio::task::spawn_blocking(|| {
                std::thread::sleep(std::time::Duration::from_millis(200))
            });

            let write = tokio::time::timeout(
                std::time::Duration::from_millis(10),
                publisher.publish_title("Stale"),
            )
            .await;
            assert!(write.is_err());

            publisher.clear();
            assert_eq!(std::fs::read_to_string(publisher.path()).unwrap(), "");

            busy.await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            assert_eq!(std::fs::read_to_string(publisher.path()).unwrap(), "");

            // Later writes are not affected
            publisher.publish_title("Fresh").await.unwrap();
            assert_eq!(std::fs::read_to_string(publisher.path()).unwrap(), "Fresh");
        });
    }

    #[tokio::test]
    async fn test_publish_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let publisher = TitlePublisher::new(dir.path().join("no/such/dir/title.txt"));
        assert!(publisher.publish_title("x").await.is_err());
    }
}
