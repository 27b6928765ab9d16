//! Envelopes carried through a dispatch call.
//!
//! The interception engine owns these objects; the dispatcher only borrows them
//! mutably for the duration of one fan-out. Listeners read and mutate them in
//! place, in snapshot order.

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use serde::Serialize;
use std::fmt;

/// The four interception points of one proxied transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ClientToProxyRequest,
    ProxyToServerRequest,
    ServerToProxyResponse,
    ProxyToClientResponse,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::ClientToProxyRequest,
        EventKind::ProxyToServerRequest,
        EventKind::ServerToProxyResponse,
        EventKind::ProxyToClientResponse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ClientToProxyRequest => "client_to_proxy_request",
            EventKind::ProxyToServerRequest => "proxy_to_server_request",
            EventKind::ServerToProxyResponse => "server_to_proxy_response",
            EventKind::ProxyToClientResponse => "proxy_to_client_response",
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(
            self,
            EventKind::ClientToProxyRequest | EventKind::ProxyToServerRequest
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event together with the envelope it carries.
#[derive(Debug)]
pub enum ProxyEvent<'a> {
    ClientToProxyRequest(&'a mut ProxyRequest),
    ProxyToServerRequest(&'a mut ProxyRequest),
    ServerToProxyResponse(&'a mut ProxyResponse),
    ProxyToClientResponse(&'a mut ProxyResponse),
}

impl ProxyEvent<'_> {
    pub fn kind(&self) -> EventKind {
        match self {
            ProxyEvent::ClientToProxyRequest(_) => EventKind::ClientToProxyRequest,
            ProxyEvent::ProxyToServerRequest(_) => EventKind::ProxyToServerRequest,
            ProxyEvent::ServerToProxyResponse(_) => EventKind::ServerToProxyResponse,
            ProxyEvent::ProxyToClientResponse(_) => EventKind::ProxyToClientResponse,
        }
    }
}

/// Request phase of a transaction.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Response a listener installed to short-circuit the upstream call.
    response: Option<ProxyResponse>,
}

impl ProxyRequest {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            response: None,
        }
    }

    pub fn get(uri: Uri) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Host the request targets, from the URI authority or the `Host` header.
    ///
    /// IPv6 literals keep their brackets, as with [`Uri::host`].
    pub fn host(&self) -> Option<&str> {
        self.uri.host().or_else(|| {
            self.headers
                .get(http::header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(strip_port)
        })
    }

    /// Answer the client directly instead of forwarding upstream.
    ///
    /// Later listeners still receive the event and may replace or clear the
    /// response.
    pub fn set_response(&mut self, response: ProxyResponse) {
        self.response = Some(response);
    }

    pub fn clear_response(&mut self) -> Option<ProxyResponse> {
        self.response.take()
    }

    pub fn response(&self) -> Option<&ProxyResponse> {
        self.response.as_ref()
    }

    pub fn is_short_circuited(&self) -> bool {
        self.response.is_some()
    }
}

/// Response phase of a transaction.
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// `host[:port]` to `host`; a bare unbracketed IPv6 literal is left whole.
fn strip_port(authority: &str) -> &str {
    match authority.rsplit_once(':') {
        Some((host, port)) if !port.contains(']') && (host.starts_with('[') || !host.contains(':')) => {
            host
        }
        _ => authority,
    }
}
