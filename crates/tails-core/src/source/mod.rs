//! Line sources and their supervision.
//!
//! A [`LineSource`] yields the lines appended to a file, in order. The
//! [`SourceSupervisor`] pumps those lines into the broker and restarts the
//! source according to a [`RestartPolicy`].

pub mod error;
pub mod follow;
pub mod policy;
pub mod supervisor;
pub mod tail;

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use serde::Deserialize;

pub use error::SourceError;
pub use follow::{FileFollower, FollowConfig, StartAt};
pub use policy::RestartPolicy;
pub use supervisor::{SourceState, SourceStatus, SourceSupervisor};
pub use tail::{TailConfig, TailProcess};

/// A restartable, in-order producer of text lines.
pub trait LineSource: Send {
    /// Start the source, or restart it after it terminated or failed.
    ///
    /// `first_run` is `false` on restarts, so a source can avoid replaying
    /// history it already produced.
    fn start(&mut self, first_run: bool) -> impl Future<Output = Result<(), SourceError>> + Send;

    /// Next line in order.
    ///
    /// `Ok(None)` means the source terminated. While no new data exists the
    /// future stays pending.
    fn next_line(&mut self) -> impl Future<Output = Result<Option<String>, SourceError>> + Send;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// Which line source implementation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// External `tail -F` process.
    #[default]
    Tail,
    /// Native polling follower.
    Follow,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tail => write!(f, "tail"),
            Self::Follow => write!(f, "follow"),
        }
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tail" => Ok(Self::Tail),
            "follow" => Ok(Self::Follow),
            other => Err(format!("unknown source '{other}' (expected 'tail' or 'follow')")),
        }
    }
}

/// Decode one raw line, dropping the line terminator and replacing invalid
/// UTF-8.
pub(crate) fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
