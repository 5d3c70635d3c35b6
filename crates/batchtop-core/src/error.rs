//! Error types shared by the collectors, the ranking engine and the monitor loop.
//!
//! Only conditions that must stop the monitor are represented here. A task
//! vanishing mid-scan is not an error, and degraded-but-usable readings are
//! logged with `tracing::warn!` and folded into neutral values.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Fatal failure while reading host metrics.
#[derive(Debug, Error)]
pub enum CollectError {
    /// A required interface could not be opened or read.
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A system-wide source no longer has the layout we parse.
    #[error("malformed {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },

    /// A per-task stat record was unusable (bad format, pid mismatch, short tail).
    #[error("bad stat record for task {pid}: {reason}")]
    BadTaskRecord { pid: u32, reason: String },

    /// `MemTotal` is absent or zero, so memory levels cannot be normalized.
    #[error("unable to find MemTotal in {}", path.display())]
    MemTotalMissing { path: PathBuf },

    /// A host constant (clock ticks, page size) could not be determined.
    #[error("host constant {name} unavailable: {reason}")]
    HostConstant { name: &'static str, reason: String },
}

impl CollectError {
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        CollectError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn malformed(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        CollectError::Malformed {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Consistency violation detected while merge-joining two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RankError {
    /// Identifiers were not strictly ascending, so a join could mis-attribute deltas.
    #[error("{side} snapshot out of order at position {position}: id {current} follows {previous}")]
    OutOfOrder {
        side: &'static str,
        position: usize,
        previous: u32,
        current: u32,
    },
}

/// Top-level error returned by the monitor loop.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Collect(#[from] CollectError),

    #[error(transparent)]
    Rank(#[from] RankError),

    #[error("cannot write report: {0}")]
    Output(#[from] io::Error),

    #[error("cannot encode report: {0}")]
    Encode(#[from] serde_json::Error),
}

impl Error {
    /// Process exit status for this failure class.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Collect(CollectError::BadTaskRecord { .. }) => 4,
            Error::Collect(CollectError::MemTotalMissing { .. }) => 6,
            Error::Collect(CollectError::HostConstant { .. }) => 7,
            Error::Rank(RankError::OutOfOrder { .. }) => 9,
            _ => 1,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
