//! Session cookie parsing and emission.

use chrono::{DateTime, Utc};
use cookie::time::{Duration, OffsetDateTime};
use cookie::{Cookie, SameSite};
use http::HeaderValue;
use http::header::{COOKIE, SET_COOKIE};

use crate::config::ManagerConfig;
use crate::error::Result;
use crate::transport::{RequestContext, ResponseContext};

/// Cookie attributes fixed at manager construction.
#[derive(Debug, Clone)]
pub(crate) struct CookieSettings {
    name: String,
    path: String,
    domain: Option<String>,
    http_only: bool,
    secure: Option<bool>,
    same_site: SameSite,
}

impl CookieSettings {
    pub(crate) fn from_config(config: &ManagerConfig) -> Self {
        Self {
            name: config.cookie_name.clone(),
            path: config.cookie_path.clone(),
            domain: config.cookie_domain.clone(),
            http_only: config.http_only.unwrap_or(true),
            secure: config.effective_secure(),
            same_site: config.same_site,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// The `Secure` attribute for a response to `req`.
    pub(crate) fn is_secure<R: RequestContext>(&self, req: &R) -> bool {
        self.secure.unwrap_or_else(|| req.is_encrypted())
    }

    /// The raw token from the request's session cookie, if any.
    pub(crate) fn token<R: RequestContext>(&self, req: &R) -> Option<String> {
        req.headers()
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|raw| Cookie::split_parse(raw))
            .filter_map(|parsed| parsed.ok())
            .find(|cookie| cookie.name() == self.name)
            .map(|cookie| cookie.value().to_string())
    }

    /// Cookie carrying `id` until `expires_at`.
    pub(crate) fn session_cookie(
        &self,
        id: &str,
        expires_at: DateTime<Utc>,
        max_age_secs: i64,
        secure: bool,
    ) -> Cookie<'static> {
        let mut builder = self
            .builder(id.to_string(), secure)
            .max_age(Duration::seconds(max_age_secs));
        if let Ok(expires) = OffsetDateTime::from_unix_timestamp(expires_at.timestamp()) {
            builder = builder.expires(expires);
        }
        builder.build()
    }

    /// Cookie instructing the client to drop its session token.
    pub(crate) fn removal_cookie(&self, secure: bool) -> Cookie<'static> {
        self.builder(String::new(), secure)
            .max_age(Duration::ZERO)
            .expires(OffsetDateTime::UNIX_EPOCH)
            .build()
    }

    fn builder(&self, value: String, secure: bool) -> cookie::CookieBuilder<'static> {
        let mut builder = Cookie::build((self.name.clone(), value))
            .path(self.path.clone())
            .http_only(self.http_only)
            .secure(secure)
            .same_site(self.same_site);
        if let Some(domain) = &self.domain {
            builder = builder.domain(domain.clone());
        }
        builder
    }

    /// Set `cookie` on the response, replacing any session cookie already set.
    pub(crate) fn write<W: ResponseContext>(&self, res: &mut W, cookie: &Cookie<'_>) -> Result<()> {
        let value = HeaderValue::from_str(&cookie.to_string())?;
        let headers = res.headers_mut();
        let kept: Vec<HeaderValue> = headers
            .get_all(SET_COOKIE)
            .iter()
            .filter(|existing| !self.names_session_cookie(existing))
            .cloned()
            .collect();
        headers.remove(SET_COOKIE);
        for existing in kept {
            headers.append(SET_COOKIE, existing);
        }
        headers.append(SET_COOKIE, value);
        Ok(())
    }

    fn names_session_cookie(&self, header: &HeaderValue) -> bool {
        header
            .to_str()
            .ok()
            .and_then(|raw| Cookie::parse(raw).ok())
            .is_some_and(|cookie| cookie.name() == self.name)
    }
}
