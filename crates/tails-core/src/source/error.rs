//! Line source error types.

use std::io;
use std::path::PathBuf;

/// Errors from starting or reading a line source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("File not found: {}", path.display())]
    Missing { path: PathBuf },

    #[error("Source process exited with {status}")]
    Exited { status: String },

    #[error("Line source gave up after {attempts} restart attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("Broker closed")]
    BrokerClosed,
}

impl SourceError {
    /// Whether restarting the source could help.
    ///
    /// A missing or non-executable `tail` binary will not fix itself, and
    /// neither will a closed broker.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Spawn { source, .. } => !matches!(
                source.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
            ),
            Self::Io { .. } | Self::Missing { .. } | Self::Exited { .. } => true,
            Self::RetriesExhausted { .. } | Self::BrokerClosed => false,
        }
    }
}
