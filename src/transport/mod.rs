//! Black-box transport boundary.
//
//! The executor drives one `perform` call per attempt and never looks
//! inside the byte-level HTTP/1.1 machinery. Everything an attempt needs is
//! carried in `AttemptOptions`; everything that came back is carried in
//! `Exchange`, including the raw captured bytes for trail events.

pub mod hyper_impl;


use async_trait::async_trait;
use bytes::Bytes;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

use crate::model::Method;

pub use hyper_impl::{HyperTransport, HyperTransportFactory};

/// Per-call DNS override token. `Add` pins `host:port` to a concrete
/// address for the next exchange; `Remove` clears a pin installed by a
/// previous attempt. The connection cache entry keeps the pending `Remove`
/// notes so overrides stay single-call-scoped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveDirective {
    Add { host: String, port: u16, ip: IpAddr },
    Remove { host: String, port: u16 },
}

/// One attempt's transport configuration.
#[derive(Debug, Clone)]
pub struct AttemptOptions {
    pub method: Method,
    pub url: String,
    pub body: Option<Bytes>,
    /// Ordered header pairs; an empty value is sent as a bare `Name:` line.
    pub headers: Vec<(String, String)>,
    pub resolve: Vec<ResolveDirective>,
    /// Force the underlying TCP connection to be re-established.
    pub fresh_connection: bool,
    pub response_timeout: Duration,
    pub connect_timeout: Duration,
}

/// Raw wire bytes captured during one attempt, headers and bodies kept
/// separate so trail verbosity can drop bodies without re-parsing.
#[derive(Debug, Clone, Default)]
pub struct Capture {
    pub request_headers: Vec<u8>,
    pub request_body: Vec<u8>,
    pub response_headers: Vec<u8>,
    pub response_body: Vec<u8>,
}

/// A completed HTTP exchange: any status, including errors the server
/// chose to express in-protocol.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub status: u16,
    /// Header lines as received, status line included.
    pub header_lines: Vec<String>,
    pub body: Bytes,
    pub capture: Capture,
    pub peer: Option<SocketAddr>,
    pub local: Option<SocketAddr>,
}

/// Transport failures, classified for the executor's retry policy.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("malformed url")]
    UrlMalformed,
    #[error("remote file not found")]
    RemoteFileNotFound,
    #[error("remote access denied")]
    RemoteAccessDenied,
    #[error("could not resolve host")]
    CouldNotResolve,
    #[error("could not connect")]
    CouldNotConnect,
    #[error("operation timed out")]
    Timeout,
    #[error("send failed")]
    Send,
    #[error("receive failed")]
    Recv,
    #[error("transport failure: {0}")]
    Other(String),
}

impl TransportError {
    /// Stable numeric kind for trail error events.
    pub fn code(&self) -> u32 {
        match self {
            TransportError::UrlMalformed => 1,
            TransportError::RemoteFileNotFound => 2,
            TransportError::RemoteAccessDenied => 3,
            TransportError::CouldNotResolve => 4,
            TransportError::CouldNotConnect => 5,
            TransportError::Timeout => 6,
            TransportError::Send => 7,
            TransportError::Recv => 8,
            TransportError::Other(_) => 9,
        }
    }
}

/// One worker-local transport handle.
#[async_trait]
pub trait Transport: Send {
    /// Drives a single attempt to completion or failure.
    async fn perform(&mut self, attempt: &AttemptOptions) -> Result<Exchange, TransportError>;
}

/// Creates per-worker transports; each connection handle owns exactly one,
/// allocated lazily on first use.
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> Box<dyn Transport>;
}
