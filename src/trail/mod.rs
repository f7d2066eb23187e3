//! Observability trail events.
//
//! Every executed call leaves a trail: a correlation marker, one TX/RX (or
//! error) event per attempt, and an abort event when the retry budget is
//! exhausted. Events are delivered to a caller-supplied sink keyed by the
//! request's trail id.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::net::SocketAddr;
use tracing::{debug, error};

use crate::model::TrailId;

/// Verbosity of trail reporting: headers only, or headers plus compressed
/// bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailLogLevel {
    Protocol,
    Detail,
}

/// Why the executor stopped retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// A fatal HTTP-level outcome; more attempts would not help.
    Permanent,
    /// The retry budget ran out on transient failures.
    Temporary,
}

/// One reportable step of an executed call.
#[derive(Debug, Clone)]
pub enum TrailEvent {
    /// Fresh v4 UUID bound to one attempt, also carried on the wire in the
    /// branch header.
    CorrelationMarker { branch_id: String },
    /// The executor is about to drive the transport at this endpoint.
    Attempt { endpoint: String },
    /// Raw request bytes left the transport. `body` is present only at
    /// detail level and is gzip-compressed.
    TxRequest {
        method: &'static str,
        url: String,
        peer: Option<SocketAddr>,
        local: Option<SocketAddr>,
        headers: Vec<u8>,
        body: Option<Vec<u8>>,
        timestamp_ms: u64,
    },
    /// A complete HTTP response came back.
    RxResponse {
        status: u16,
        method: &'static str,
        url: String,
        peer: Option<SocketAddr>,
        local: Option<SocketAddr>,
        headers: Vec<u8>,
        body: Option<Vec<u8>>,
    },
    /// The transport failed before a complete exchange.
    TransportFailed {
        kind: u32,
        endpoint: String,
        method: &'static str,
        url: String,
        detail: String,
    },
    /// Retrying stopped deliberately.
    Abort { reason: AbortReason },
}

/// Destination for trail events. Implementations must be cheap; they are
/// called on the request path.
pub trait TrailSink: Send + Sync {
    fn report(&self, trail: TrailId, event: TrailEvent);
}

/// Gzip-compresses a detail-level body capture.
pub fn compress_body(raw: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    if encoder.write_all(raw).is_err() {
        return Vec::new();
    }
    encoder.finish().unwrap_or_default()
}

/// Default sink: renders events as structured tracing output.
pub struct TracingTrailSink;

impl TrailSink for TracingTrailSink {
    fn report(&self, trail: TrailId, event: TrailEvent) {
        match event {
            TrailEvent::CorrelationMarker { branch_id } => {
                debug!(
                    component = "trail",
                    trail = trail,
                    branch_id = %branch_id,
                    "correlation marker"
                );
            }
            TrailEvent::Attempt { endpoint } => {
                debug!(
                    component = "trail",
                    trail = trail,
                    endpoint = %endpoint,
                    "attempting target"
                );
            }
            TrailEvent::TxRequest {
                method,
                url,
                timestamp_ms,
                ..
            } => {
                debug!(
                    component = "trail",
                    trail = trail,
                    method = method,
                    url = %url,
                    timestamp_ms = timestamp_ms,
                    "tx request"
                );
            }
            TrailEvent::RxResponse {
                status, method, url, ..
            } => {
                debug!(
                    component = "trail",
                    trail = trail,
                    status = status,
                    method = method,
                    url = %url,
                    "rx response"
                );
            }
            TrailEvent::TransportFailed {
                kind,
                endpoint,
                method,
                url,
                detail,
            } => {
                error!(
                    component = "trail",
                    trail = trail,
                    kind = kind,
                    endpoint = %endpoint,
                    method = method,
                    url = %url,
                    detail = %detail,
                    "transport failed"
                );
            }
            TrailEvent::Abort { reason } => {
                error!(
                    component = "trail",
                    trail = trail,
                    reason = ?reason,
                    "retrying stopped"
                );
            }
        }
    }
}
