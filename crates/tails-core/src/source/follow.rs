//! Native polling file follower.
//!
//! Reads lines appended to a file without an external process. Partial
//! lines are held back until their newline arrives. Truncation restarts
//! reading from the top. A file replaced under the same name (rename
//! rotation) is reopened in place and read from its first byte.

use std::fs::Metadata;
use std::io::{self, SeekFrom};
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tracing::info;

use super::{LineSource, SourceError, decode_line};

/// Where the first run starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartAt {
    Beginning,
    #[default]
    End,
}

/// Configuration for [`FileFollower`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowConfig {
    /// How often to check the file for new data.
    pub poll_interval: Duration,
    /// Start position of the first run.
    pub start_at: StartAt,
}

impl Default for FollowConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            start_at: StartAt::End,
        }
    }
}

/// Follows a growing file by polling.
pub struct FileFollower {
    path: PathBuf,
    config: FollowConfig,
    /// Held until the next file is open, so a recreated file never reuses
    /// the inode of the one it replaces.
    reader: Option<BufReader<File>>,
    /// Bytes consumed from the current file, including any pending partial line.
    offset: u64,
    pending: Vec<u8>,
    identity: Option<FileIdentity>,
}

impl FileFollower {
    pub fn new(path: impl Into<PathBuf>, config: FollowConfig) -> Self {
        Self {
            path: path.into(),
            config,
            reader: None,
            offset: 0,
            pending: Vec::new(),
            identity: None,
        }
    }

    fn io_error(&self, source: io::Error) -> SourceError {
        if source.kind() == io::ErrorKind::NotFound {
            SourceError::Missing {
                path: self.path.clone(),
            }
        } else {
            SourceError::Io {
                path: self.path.clone(),
                source,
            }
        }
    }

    async fn open(&self) -> Result<(File, Metadata), SourceError> {
        let file = File::open(&self.path).await.map_err(|e| self.io_error(e))?;
        let meta = file.metadata().await.map_err(|e| self.io_error(e))?;
        Ok((file, meta))
    }

    /// True when `identity` names a different file than the one last opened.
    fn is_replacement(&self, identity: Option<FileIdentity>) -> bool {
        identity.is_some() && self.identity.is_some() && identity != self.identity
    }

    /// Switch to the file now at `path`, reading it from the top.
    async fn reopen(&mut self) -> Result<(), SourceError> {
        let (file, meta) = self.open().await?;
        if !self.pending.is_empty() {
            info!(
                path = %self.path.display(),
                bytes = self.pending.len(),
                "Discarding unterminated line from replaced file"
            );
        }
        self.pending.clear();
        self.offset = 0;
        self.identity = FileIdentity::of(&meta);
        self.reader = Some(BufReader::new(file));
        Ok(())
    }

    /// Check the file on disk after hitting EOF.
    async fn check_file(&self) -> Result<FileCheck, SourceError> {
        let meta = tokio::fs::metadata(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        if self.is_replacement(FileIdentity::of(&meta)) {
            return Ok(FileCheck::Replaced);
        }
        if meta.len() < self.offset {
            return Ok(FileCheck::Truncated);
        }
        Ok(FileCheck::Unchanged)
    }
}

enum FileCheck {
    Unchanged,
    Truncated,
    Replaced,
}

impl LineSource for FileFollower {
    async fn start(&mut self, first_run: bool) -> Result<(), SourceError> {
        let (file, meta) = self.open().await?;
        let identity = FileIdentity::of(&meta);
        let len = meta.len();

        let position = if first_run {
            match self.config.start_at {
                StartAt::Beginning => 0,
                StartAt::End => len,
            }
        } else if self.is_replacement(identity) || len < self.offset {
            // Recreated or shrunk while we were away.
            0
        } else {
            // Resume at the start of the partial line the previous run held,
            // so it is read again whole.
            self.offset.saturating_sub(self.pending.len() as u64)
        };

        let mut reader = BufReader::new(file);
        reader
            .seek(SeekFrom::Start(position))
            .await
            .map_err(|e| self.io_error(e))?;

        info!(
            path = %self.path.display(),
            position,
            first_run,
            "Following file"
        );
        self.pending.clear();
        self.offset = position;
        self.identity = identity;
        self.reader = Some(reader);
        Ok(())
    }

    async fn next_line(&mut self) -> Result<Option<String>, SourceError> {
        loop {
            let Some(reader) = self.reader.as_mut() else {
                return Ok(None);
            };

            let read = reader
                .read_until(b'\n', &mut self.pending)
                .await
                .map_err(|e| SourceError::Io {
                    path: self.path.clone(),
                    source: e,
                })?;
            self.offset += read as u64;

            if self.pending.ends_with(b"\n") {
                let line = decode_line(&self.pending);
                self.pending.clear();
                return Ok(Some(line));
            }

            match self.check_file().await? {
                FileCheck::Unchanged => tokio::time::sleep(self.config.poll_interval).await,
                FileCheck::Truncated => {
                    info!(path = %self.path.display(), "File truncated, reading from start");
                    if let Some(reader) = self.reader.as_mut() {
                        reader
                            .seek(SeekFrom::Start(0))
                            .await
                            .map_err(|e| SourceError::Io {
                                path: self.path.clone(),
                                source: e,
                            })?;
                    }
                    self.pending.clear();
                    self.offset = 0;
                }
                FileCheck::Replaced => {
                    info!(path = %self.path.display(), "File replaced, reopening");
                    self.reopen().await?;
                }
            }
        }
    }

    fn describe(&self) -> String {
        format!("follow {}", self.path.display())
    }
}

/// Device and inode of a file, used to notice rename rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
}

impl FileIdentity {
    #[cfg(unix)]
    fn of(meta: &Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(Self {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }

    #[cfg(not(unix))]
    fn of(_meta: &Metadata) -> Option<Self> {
        None
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use std::io::Write;
    use std::path::Path;

    use super::*;

    fn fast() -> FollowConfig {
        FollowConfig {
            poll_interval: Duration::from_millis(10),
            start_at: StartAt::End,
        }
    }

    async fn next(source: &mut FileFollower) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(5), source.next_line())
            .await
            .expect("no line within timeout")
            .unwrap()
    }

    fn append(path: &Path, data: &str) {
        let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(data.as_bytes()).unwrap();
        file.flush().unwrap();
    }

    #[tokio::test]
    async fn starts_at_end_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "old line\n").unwrap();

        let mut source = FileFollower::new(&path, fast());
        source.start(true).await.unwrap();

        append(&path, "new line\n");
        assert_eq!(next(&mut source).await.as_deref(), Some("new line"));
    }

    #[tokio::test]
    async fn start_at_beginning_reads_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "one\ntwo\n").unwrap();

        let config = FollowConfig {
            start_at: StartAt::Beginning,
            ..fast()
        };
        let mut source = FileFollower::new(&path, config);
        source.start(true).await.unwrap();

        assert_eq!(next(&mut source).await.as_deref(), Some("one"));
        assert_eq!(next(&mut source).await.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn partial_line_waits_for_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "").unwrap();

        let mut source = FileFollower::new(&path, fast());
        source.start(true).await.unwrap();

        append(&path, "hel");
        let early = tokio::time::timeout(Duration::from_millis(100), source.next_line()).await;
        assert!(early.is_err(), "partial line must not be emitted");

        append(&path, "lo\r\n");
        assert_eq!(next(&mut source).await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn truncation_restarts_from_top() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "").unwrap();

        let mut source = FileFollower::new(&path, fast());
        source.start(true).await.unwrap();

        append(&path, "a fairly long first line\n");
        assert_eq!(
            next(&mut source).await.as_deref(),
            Some("a fairly long first line")
        );

        std::fs::write(&path, "short\n").unwrap();
        assert_eq!(next(&mut source).await.as_deref(), Some("short"));
    }

    #[tokio::test]
    async fn missing_file_fails_retryably() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = FileFollower::new(dir.path().join("absent.log"), fast());

        let err = source.start(true).await.unwrap_err();
        assert!(matches!(err, SourceError::Missing { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn deleted_file_surfaces_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "").unwrap();

        let mut source = FileFollower::new(&path, fast());
        source.start(true).await.unwrap();
        std::fs::remove_file(&path).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), source.next_line())
            .await
            .unwrap();
        assert!(matches!(result, Err(SourceError::Missing { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rename_rotation_reopens_new_file_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "").unwrap();

        let mut source = FileFollower::new(&path, fast());
        source.start(true).await.unwrap();

        for round in 1..=3 {
            std::fs::rename(&path, dir.path().join(format!("app.log.{round}"))).unwrap();
            std::fs::write(&path, format!("fresh {round}\nsecond {round}\n")).unwrap();
            assert_eq!(next(&mut source).await, Some(format!("fresh {round}")));
            assert_eq!(next(&mut source).await, Some(format!("second {round}")));
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn restart_after_recreate_reads_new_file_from_top() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "").unwrap();

        let mut source = FileFollower::new(&path, fast());
        source.start(true).await.unwrap();
        append(&path, "a line long enough to pass several short ones\n");
        assert!(next(&mut source).await.is_some());

        std::fs::remove_file(&path).unwrap();
        let gone = tokio::time::timeout(Duration::from_secs(5), source.next_line())
            .await
            .unwrap();
        assert!(matches!(gone, Err(SourceError::Missing { .. })));

        let recreated: String = (1..=8).map(|n| format!("new-{n}\n")).collect();
        std::fs::write(&path, recreated).unwrap();
        source.start(false).await.unwrap();
        append(&path, "new-9\n");

        for n in 1..=9 {
            assert_eq!(next(&mut source).await, Some(format!("new-{n}")));
        }
    }

    #[tokio::test]
    async fn restart_resumes_without_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "").unwrap();

        let mut source = FileFollower::new(&path, fast());
        source.start(true).await.unwrap();
        append(&path, "before\n");
        assert_eq!(next(&mut source).await.as_deref(), Some("before"));

        source.start(false).await.unwrap();
        append(&path, "after\n");
        assert_eq!(next(&mut source).await.as_deref(), Some("after"));
    }
}
