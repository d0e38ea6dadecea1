//! Configuration for the session manager.

use std::time::Duration;

use cookie::SameSite;

use crate::error::{Error, Result};

/// Default session lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default name of the session cookie.
pub const DEFAULT_COOKIE_NAME: &str = "session_id";

/// Default cookie path.
pub const DEFAULT_COOKIE_PATH: &str = "/";

/// Default interval between expired-session sweeps.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Default bound on a single sweep.
pub const DEFAULT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the session manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// How long a session lives after its last save.
    pub ttl: Duration,

    /// Name of the cookie carrying the session token.
    pub cookie_name: String,

    /// Cookie `Path` attribute.
    pub cookie_path: String,

    /// Cookie `Domain` attribute. Omitted when `None`.
    pub cookie_domain: Option<String>,

    /// Cookie `HttpOnly` attribute. `None` means true.
    pub http_only: Option<bool>,

    /// Cookie `Secure` attribute.
    /// `None` sets it per request, only when the request arrived over TLS.
    pub secure: Option<bool>,

    /// Cookie `SameSite` attribute. `None` forces `secure` on.
    pub same_site: SameSite,

    /// Interval of the background sweep that removes expired sessions.
    pub cleanup_interval: Duration,

    /// Upper bound on a single sweep.
    pub cleanup_timeout: Duration,

    /// Optional bound applied to every backend call made by the manager.
    pub operation_timeout: Option<Duration>,

    /// Maximum size of the serialized session values, in bytes. 0 means unlimited.
    pub max_session_bytes: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            cookie_path: DEFAULT_COOKIE_PATH.to_string(),
            cookie_domain: None,
            http_only: None,
            secure: None,
            same_site: SameSite::Lax,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            cleanup_timeout: DEFAULT_CLEANUP_TIMEOUT,
            operation_timeout: None,
            max_session_bytes: 0,
        }
    }
}

impl ManagerConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the session lifetime.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the cookie name.
    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    /// Set the cookie path.
    pub fn with_cookie_path(mut self, path: impl Into<String>) -> Self {
        self.cookie_path = path.into();
        self
    }

    /// Set the cookie domain.
    pub fn with_cookie_domain(mut self, domain: impl Into<String>) -> Self {
        self.cookie_domain = Some(domain.into());
        self
    }

    /// Set the `HttpOnly` attribute explicitly.
    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = Some(http_only);
        self
    }

    /// Set the `Secure` attribute explicitly instead of detecting TLS.
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = Some(secure);
        self
    }

    /// Set the `SameSite` policy.
    pub fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = same_site;
        self
    }

    /// Set the cleanup interval.
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Set the bound on a single cleanup sweep.
    pub fn with_cleanup_timeout(mut self, timeout: Duration) -> Self {
        self.cleanup_timeout = timeout;
        self
    }

    /// Bound every backend call by `timeout`.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Cap the serialized session size. 0 disables the cap.
    pub fn with_max_session_bytes(mut self, max: usize) -> Self {
        self.max_session_bytes = max;
        self
    }

    /// The `Secure` override after applying the `SameSite=None` rule.
    pub fn effective_secure(&self) -> Option<bool> {
        // Browsers drop SameSite=None cookies that are not Secure.
        if self.same_site == SameSite::None {
            Some(true)
        } else {
            self.secure
        }
    }

    /// Check the configuration for values the manager cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.ttl.is_zero() {
            return Err(Error::InvalidConfig("ttl must be non-zero".to_string()));
        }
        if self.cleanup_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "cleanup_interval must be non-zero".to_string(),
            ));
        }
        if self.cleanup_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "cleanup_timeout must be non-zero".to_string(),
            ));
        }
        if !is_cookie_token(&self.cookie_name) {
            return Err(Error::InvalidConfig(format!(
                "invalid cookie name: {:?}",
                self.cookie_name
            )));
        }
        if !is_attribute_value(&self.cookie_path) {
            return Err(Error::InvalidConfig(format!(
                "invalid cookie path: {:?}",
                self.cookie_path
            )));
        }
        if let Some(domain) = &self.cookie_domain {
            if domain.is_empty() || !is_attribute_value(domain) {
                return Err(Error::InvalidConfig(format!(
                    "invalid cookie domain: {domain:?}"
                )));
            }
        }
        Ok(())
    }
}

/// RFC 6265 cookie-name: a token without separators.
fn is_cookie_token(name: &str) -> bool {
    const SEPARATORS: &[u8] = b"()<>@,;:\\\"/[]?={} \t";
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_graphic() && !SEPARATORS.contains(&b))
}

fn is_attribute_value(value: &str) -> bool {
    value.bytes().all(|b| (b.is_ascii_graphic() || b == b' ') && b != b';')
}
