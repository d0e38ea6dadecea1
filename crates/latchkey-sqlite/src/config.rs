//! SQLite store configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default time a connection waits on a locked database.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for [`SqliteStore`](crate::SqliteStore).
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Database file, or `None` for a private in-memory database.
    pub path: Option<PathBuf>,

    /// How long to wait on a locked database before failing.
    pub busy_timeout: Duration,

    /// Use write-ahead logging. Ignored for in-memory databases.
    pub wal: bool,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            wal: true,
        }
    }
}

impl SqliteConfig {
    /// A database stored at `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            ..Default::default()
        }
    }

    /// A private in-memory database.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn with_wal(mut self, wal: bool) -> Self {
        self.wal = wal;
        self
    }
}
