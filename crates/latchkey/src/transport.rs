//! Request and response adapters over the `http` crate.

use http::uri::Scheme;
use http::{HeaderMap, Request, Response, request, response};

/// Request extension marking a connection that arrived over TLS.
///
/// Servers that terminate TLS themselves insert this so the manager can pick
/// the cookie's `Secure` attribute when none is configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TlsConnection;

/// The parts of an inbound request the manager reads.
pub trait RequestContext {
    fn headers(&self) -> &HeaderMap;

    /// Whether the request arrived over an encrypted channel.
    fn is_encrypted(&self) -> bool;
}

/// The parts of an outbound response the manager writes.
pub trait ResponseContext {
    fn headers_mut(&mut self) -> &mut HeaderMap;
}

fn encrypted(extensions: &http::Extensions, uri: &http::Uri) -> bool {
    extensions.get::<TlsConnection>().is_some() || uri.scheme() == Some(&Scheme::HTTPS)
}

impl<B> RequestContext for Request<B> {
    fn headers(&self) -> &HeaderMap {
        Request::headers(self)
    }

    fn is_encrypted(&self) -> bool {
        encrypted(self.extensions(), self.uri())
    }
}

impl RequestContext for request::Parts {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn is_encrypted(&self) -> bool {
        encrypted(&self.extensions, &self.uri)
    }
}

impl<B> ResponseContext for Response<B> {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        Response::headers_mut(self)
    }
}

impl ResponseContext for response::Parts {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }
}

impl ResponseContext for HeaderMap {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        self
    }
}
