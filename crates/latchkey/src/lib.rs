//! Server-side session management with pluggable persistence.
//!
//! This crate manages sessions referenced by an opaque cookie token:
//! - 128-bit ids from pooled, periodically reseeded CSPRNGs
//! - strict token validation before anything reaches a backend
//! - size-capped serialization with wiped, pooled buffers
//! - fixation-resistant rotation and fail-safe logout
//! - a background sweep of expired sessions
//!
//! # Example
//!
//! ```rust,ignore
//! use latchkey::{ManagerConfig, MemoryStore, SessionManager};
//!
//! let config = ManagerConfig::default()
//!     .with_ttl(Duration::from_secs(3600))
//!     .with_cookie_name("my_app_session");
//! let manager = SessionManager::new(MemoryStore::new(), config)?;
//!
//! let session = manager.load(&request).await?;
//! session.set("user_id", 42).await?;
//! manager.save(&mut response, &request, &session).await?;
//! ```

mod codec;
mod config;
mod cookies;
mod error;
mod id;
mod manager;
mod memory;
mod pool;
mod reaper;
mod session;
mod store;
mod transport;

pub use codec::Values;
pub use config::{
    DEFAULT_CLEANUP_INTERVAL, DEFAULT_CLEANUP_TIMEOUT, DEFAULT_COOKIE_NAME, DEFAULT_COOKIE_PATH,
    DEFAULT_TTL, ManagerConfig,
};
pub use cookie::SameSite;
pub use error::{Error, Result};
pub use id::{
    DEFAULT_RESEED_INTERVAL, EntropySource, IdGenerator, OsEntropy, SESSION_ID_LEN, is_valid_id,
};
pub use manager::SessionManager;
pub use memory::MemoryStore;
pub use pool::{BufferPool, PooledBuffer};
pub use session::{Payload, Session, SessionState};
pub use store::{SessionRecord, SessionStore};
pub use transport::{RequestContext, ResponseContext, TlsConnection};

/// Encode and decode session payloads the way built-in stores do.
pub mod payload {
    pub use crate::codec::{decode, encode_into};
}
