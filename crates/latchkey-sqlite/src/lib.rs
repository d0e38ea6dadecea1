//! SQLite persistence for latchkey sessions.
//!
//! Sessions live in a single `sessions` table keyed by id, with an index on
//! expiry so the background sweep stays cheap. Queries run on Tokio's blocking
//! pool behind one connection.
//!
//! ```rust,ignore
//! use latchkey::{ManagerConfig, SessionManager};
//! use latchkey_sqlite::{SqliteConfig, SqliteStore};
//!
//! let store = SqliteStore::open(SqliteConfig::new("sessions.db"))?;
//! let manager = SessionManager::new(store, ManagerConfig::default())?;
//! ```

mod config;
mod error;
mod store;

pub use config::{DEFAULT_BUSY_TIMEOUT, SqliteConfig};
pub use error::{Result, SqliteStoreError};
pub use store::SqliteStore;
