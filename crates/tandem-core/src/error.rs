use std::time::Duration;

use thiserror::Error;

use crate::domain::{ScheduleId, SessionId};

/// Errors raised by lifecycle operations.
///
/// Handshake transitions and queue pushes never fail, so they do not appear here.
#[derive(Debug, Error)]
pub enum TandemError {
    /// A schedule handle was canceled a second time.
    #[error("schedule {id} ({name}) is already canceled")]
    AlreadyCanceled { id: ScheduleId, name: String },

    /// The host scheduler has been shut down and accepts no more work.
    #[error("host scheduler is not running")]
    HostUnavailable,

    #[error("failed to spawn child thread for {name}: {source}")]
    SpawnFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config: {0}")]
    Config(String),

    #[error("archive for {session} timed out after {waited:?}")]
    ArchiveTimeout { session: SessionId, waited: Duration },

    /// The child was asked to stop while waiting for the data file.
    #[error("archive for {session} stopped before the data file was rewritten")]
    ArchiveStopped { session: SessionId },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TandemError>;
