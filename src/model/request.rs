use bytes::Bytes;

use crate::resolver::HostStateMask;

/// Opaque identifier used to correlate observability events across the
/// system. Minted by the caller, passed through unchanged.
pub type TrailId = u64;

/// Method verbs the executor supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

/// A single outbound call, handed to the executor as an immutable value.
///
/// The path is absolute and must start with `/`. Extra headers are kept in
/// insertion order; each pair becomes one header line on the wire.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    body: Option<Bytes>,
    headers: Vec<(String, String)>,
    host_state: HostStateMask,
    asserted_user: Option<String>,
    trail: TrailId,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        debug_assert!(path.starts_with('/'), "request path must be absolute");
        Self {
            method,
            path,
            body: None,
            headers: Vec::new(),
            host_state: HostStateMask::all(),
            asserted_user: None,
            trail: 0,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Sets the request body. UTF-8 JSON by convention; sent opaque.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        self.body = if body.is_empty() { None } else { Some(body) };
        self
    }

    /// Appends one extra request header. The value must not contain CR/LF.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let (name, value) = (name.into(), value.into());
        debug_assert!(
            !name.contains(['\r', '\n']) && !value.contains(['\r', '\n']),
            "header lines must not contain CR/LF"
        );
        self.headers.push((name, value));
        self
    }

    /// Restricts which resolver lists candidate targets may come from.
    pub fn with_host_state(mut self, mask: HostStateMask) -> Self {
        self.host_state = mask;
        self
    }

    /// Identity to assert on the request. Only emitted when the connection
    /// was built with `assert_user`.
    pub fn with_asserted_user(mut self, username: impl Into<String>) -> Self {
        self.asserted_user = Some(username.into());
        self
    }

    pub fn with_trail(mut self, trail: TrailId) -> Self {
        self.trail = trail;
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn host_state(&self) -> HostStateMask {
        self.host_state
    }

    pub fn asserted_user(&self) -> Option<&str> {
        self.asserted_user.as_deref()
    }

    pub fn trail(&self) -> TrailId {
        self.trail
    }
}
