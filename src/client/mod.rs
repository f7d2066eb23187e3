//! The request executor and its worker-local connection cache.
//
//! One `HttpConnection` exists per logical backend service; each worker
//! takes a `ConnectionHandle` and owns it exclusively. A call resolves the
//! hostname to a ranked candidate list, walks it with the retry policy,
//! feeds health signals back to the resolver and the load monitor, and
//! always returns a `Response` whose status encodes the outcome.

mod entry;


use anyhow::{bail, Context, Result};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::model::{Request, Response, Target, TrailId};
use crate::monitor::{CommunicationMonitor, LoadMonitor};
use crate::resolver::Resolver;
use crate::time;
use crate::trail::{compress_body, AbortReason, TrailEvent, TrailLogLevel, TrailSink};
use crate::transport::{
    AttemptOptions, Exchange, HyperTransportFactory, ResolveDirective, Transport,
    TransportError, TransportFactory,
};

pub(crate) use entry::PoolEntry;

/// Maximum number of targets to try connecting to.
pub const MAX_TARGETS: usize = 5;

/// Total response wait as a multiple of the configured target latency.
/// Covers lookup, connection attempts, request and response.
const TIMEOUT_LATENCY_MULTIPLIER: u64 = 5;
const DEFAULT_LATENCY_US: u64 = 500_000;

/// Time allowed for establishing a TCP connection to a single address. Set
/// short so a dead server costs little before the next target is tried.
const SINGLE_CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Correlation header carried on every attempt.
pub const BRANCH_HEADER_NAME: &str = "X-HTTP-Branch-ID";

/// Identity assertion header, emitted only for connections built with
/// `assert_user`.
pub const ASSERTED_IDENTITY_HEADER: &str = "X-XCAP-Asserted-Identity";

/// Derives the absolute response timeout in milliseconds from the target
/// latency the downstream components are working to.
pub(crate) fn calc_req_timeout_from_latency(latency_us: u64) -> u64 {
    ((latency_us * TIMEOUT_LATENCY_MULTIPLIER) / 1000).max(1)
}

/// Maps the final transport signal to the caller-visible status code.
/// Resolution and connect failures become 404 so upstream signalling code
/// treats "no backend reachable" like "no such resource".
fn error_status(err: &TransportError) -> u16 {
    match err {
        TransportError::UrlMalformed => 400,
        TransportError::RemoteFileNotFound
        | TransportError::CouldNotResolve
        | TransportError::CouldNotConnect => 404,
        _ => 500,
    }
}

struct ConnectionShared {
    server: String,
    host: String,
    port: u16,
    scheme: String,
    assert_user: bool,
    resolver: Arc<dyn Resolver>,
    factory: Arc<dyn TransportFactory>,
    trail_sink: Option<Arc<dyn TrailSink>>,
    log_level: TrailLogLevel,
    load_monitor: Option<Arc<dyn LoadMonitor>>,
    comm_monitor: Option<Arc<dyn CommunicationMonitor>>,
    stat_table: Option<Arc<crate::metrics::IpCountTable>>,
}

/// Executor for one logical backend service.
pub struct HttpConnection {
    shared: Arc<ConnectionShared>,
}

impl HttpConnection {
    pub fn builder(server: impl Into<String>) -> HttpConnectionBuilder {
        HttpConnectionBuilder::new(server)
    }

    /// Takes a worker-local handle. The handle owns its transport and
    /// recycle state exclusively; create one per worker, not per call.
    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            shared: Arc::clone(&self.shared),
            transport: None,
            entry: PoolEntry::new(self.shared.stat_table.clone()),
        }
    }

    pub fn server(&self) -> &str {
        &self.shared.server
    }

    pub fn host(&self) -> &str {
        &self.shared.host
    }

    pub fn port(&self) -> u16 {
        self.shared.port
    }
}

pub struct HttpConnectionBuilder {
    server: String,
    scheme: String,
    assert_user: bool,
    resolver: Option<Arc<dyn Resolver>>,
    factory: Arc<dyn TransportFactory>,
    trail_sink: Option<Arc<dyn TrailSink>>,
    log_level: TrailLogLevel,
    load_monitor: Option<Arc<dyn LoadMonitor>>,
    comm_monitor: Option<Arc<dyn CommunicationMonitor>>,
    stat_table: Option<Arc<crate::metrics::IpCountTable>>,
}

impl HttpConnectionBuilder {
    fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            scheme: "http".to_string(),
            assert_user: false,
            resolver: None,
            factory: Arc::new(HyperTransportFactory),
            trail_sink: None,
            log_level: TrailLogLevel::Protocol,
            load_monitor: None,
            comm_monitor: None,
            stat_table: None,
        }
    }

    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Assert the caller identity on requests that carry one.
    pub fn assert_user(mut self, assert_user: bool) -> Self {
        self.assert_user = assert_user;
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn trail_sink(mut self, sink: Arc<dyn TrailSink>, level: TrailLogLevel) -> Self {
        self.trail_sink = Some(sink);
        self.log_level = level;
        self
    }

    pub fn load_monitor(mut self, monitor: Arc<dyn LoadMonitor>) -> Self {
        self.load_monitor = Some(monitor);
        self
    }

    pub fn comm_monitor(mut self, monitor: Arc<dyn CommunicationMonitor>) -> Self {
        self.comm_monitor = Some(monitor);
        self
    }

    /// Report per-peer connection counts into this table.
    pub fn stat_table(mut self, table: Arc<crate::metrics::IpCountTable>) -> Self {
        self.stat_table = Some(table);
        self
    }

    pub fn build(self) -> Result<HttpConnection> {
        let resolver = match self.resolver {
            Some(r) => r,
            None => bail!("an HttpConnection needs a resolver"),
        };

        let (host, mut port) = host_port_from_server(&self.server)
            .with_context(|| format!("invalid server value {:?}", self.server))?;
        if port == 0 {
            port = default_port(&self.scheme);
        }

        debug!(
            component = "client",
            server = %self.server,
            host = %host,
            port = port,
            scheme = %self.scheme,
            "connection configured"
        );

        Ok(HttpConnection {
            shared: Arc::new(ConnectionShared {
                server: self.server,
                host,
                port,
                scheme: self.scheme,
                assert_user: self.assert_user,
                resolver,
                factory: self.factory,
                trail_sink: self.trail_sink,
                log_level: self.log_level,
                load_monitor: self.load_monitor,
                comm_monitor: self.comm_monitor,
                stat_table: self.stat_table,
            }),
        })
    }
}

/// Splits `host`, `host:port`, `[v6]` and `[v6]:port` server strings.
/// Returns port 0 when the server carries none.
pub(crate) fn host_port_from_server(server: &str) -> Result<(String, u16)> {
    let server = server.trim();
    if server.is_empty() {
        bail!("empty server");
    }

    let bracketed = server.starts_with('[') && server.ends_with(']');
    if !bracketed {
        if let Some(colon_idx) = server.rfind(':') {
            let (host, port_str) = (&server[..colon_idx], &server[colon_idx + 1..]);
            let port: u16 = port_str
                .parse()
                .with_context(|| format!("invalid port {:?}", port_str))?;
            return Ok((host.to_string(), port));
        }
    }
    Ok((server.to_string(), 0))
}

fn default_port(scheme: &str) -> u16 {
    match scheme {
        "https" => 443,
        _ => 80,
    }
}

/// A worker's exclusively-owned view of an `HttpConnection`: the live
/// transport, the recycle deadline and the per-call override notes. At most
/// one call is in flight per handle, enforced by `&mut self`.
pub struct ConnectionHandle {
    shared: Arc<ConnectionShared>,
    transport: Option<Box<dyn Transport>>,
    entry: PoolEntry,
}

impl ConnectionHandle {
    /// Executes one call. Never fails: the returned status encodes the
    /// outcome, with resolution/connect failures mapped to 404.
    pub async fn execute(&mut self, request: &Request) -> Response {
        let shared = Arc::clone(&self.shared);
        let trail = request.trail();
        let now_ms = time::now_ms();
        let expired = self.entry.is_connection_expired(now_ms);

        crate::metrics::add_requests(1);

        let mut targets = shared.resolver.resolve(
            &shared.host,
            shared.port,
            MAX_TARGETS,
            request.host_state(),
            trail,
        );

        // Sticky-first: while the connection is not due for recycling,
        // prefer the peer it is already warm to.
        if !expired && !self.entry.remote_ip().is_empty() {
            if let Some(ip) = shared.resolver.parse_ip_target(self.entry.remote_ip()) {
                let probe = Target::tcp(ip, shared.port);
                if let Some(pos) = targets.iter().position(|t| *t == probe) {
                    let sticky = targets.remove(pos);
                    targets.insert(0, sticky);
                }
            }
        }

        // A single candidate is tried twice; we always want one retry.
        if targets.len() == 1 {
            let only = targets[0];
            targets.push(only);
        }

        let server_url = format!("{}://{}{}", shared.scheme, shared.server, request.path());
        let response_timeout = self.response_timeout();

        let mut num_http_503 = 0u32;
        let mut num_http_504 = 0u32;
        let mut num_timeouts_or_io = 0u32;
        let mut aborted = false;

        let mut final_outcome: Result<Exchange, TransportError> =
            Err(TransportError::CouldNotResolve);
        let mut last_target: Option<Target> = None;

        for (attempt_idx, target) in targets.iter().enumerate() {
            if attempt_idx > 0 {
                crate::metrics::add_retries(1);
            }
            last_target = Some(*target);

            self.report(
                trail,
                TrailEvent::Attempt {
                    endpoint: target.endpoint(),
                },
            );

            // Per-call DNS override: drain the removal notes the previous
            // attempt left, then pin this target for the exchange.
            let mut resolve = self.entry.take_resolve_directives();
            resolve.push(ResolveDirective::Add {
                host: shared.host.clone(),
                port: target.port,
                ip: target.address,
            });

            let branch_id = Uuid::new_v4().to_string();
            let mut headers: Vec<(String, String)> = request.headers().to_vec();
            // An empty Expect stops the transport from inserting its own
            // `Expect: 100-continue`, which would garble the trail flow.
            headers.push(("Expect".to_string(), String::new()));
            headers.push((BRANCH_HEADER_NAME.to_string(), branch_id.clone()));
            if shared.assert_user {
                if let Some(user) = request.asserted_user() {
                    headers.push((ASSERTED_IDENTITY_HEADER.to_string(), user.to_string()));
                }
            }
            if request.body().is_some() {
                headers.push(("Content-Type".to_string(), "application/json".to_string()));
            }

            self.report(trail, TrailEvent::CorrelationMarker { branch_id });

            let attempt = AttemptOptions {
                method: request.method(),
                url: format!(
                    "{}://{}:{}{}",
                    shared.scheme,
                    shared.host,
                    target.port,
                    request.path()
                ),
                body: request.body().cloned(),
                headers,
                resolve,
                fresh_connection: expired,
                response_timeout,
                connect_timeout: SINGLE_CONNECT_TIMEOUT,
            };

            debug!(
                component = "client",
                url = %server_url,
                endpoint = %target,
                fresh = expired,
                trail = trail,
                "sending request"
            );

            let req_timestamp_ms = time::now_ms();
            let transport = self.transport.get_or_insert_with(|| shared.factory.create());
            let outcome = transport.perform(&attempt).await;

            // Leave a note to clear this attempt's pin next time round.
            self.entry.note_resolve_removal(&shared.host, target.port);

            match &outcome {
                Ok(exchange) => {
                    if !exchange.capture.request_headers.is_empty() {
                        self.report(
                            trail,
                            TrailEvent::TxRequest {
                                method: request.method().as_str(),
                                url: server_url.clone(),
                                peer: exchange.peer,
                                local: exchange.local,
                                headers: exchange.capture.request_headers.clone(),
                                body: self.body_for_level(&exchange.capture.request_body),
                                timestamp_ms: req_timestamp_ms,
                            },
                        );
                    }
                    self.report(
                        trail,
                        TrailEvent::RxResponse {
                            status: exchange.status,
                            method: request.method().as_str(),
                            url: server_url.clone(),
                            peer: exchange.peer,
                            local: exchange.local,
                            headers: exchange.capture.response_headers.clone(),
                            body: self.body_for_level(&exchange.capture.response_body),
                        },
                    );
                }
                Err(err) => {
                    self.report(
                        trail,
                        TrailEvent::TransportFailed {
                            kind: err.code(),
                            endpoint: target.endpoint(),
                            method: request.method().as_str(),
                            url: server_url.clone(),
                            detail: err.to_string(),
                        },
                    );
                }
            }

            // Classify the outcome and decide whether to keep trying.
            let mut fatal = false;
            match outcome {
                Ok(exchange) => {
                    let status = exchange.status;
                    if status < 400 {
                        if expired {
                            self.entry.update_deadline(now_ms);
                        }
                        final_outcome = Ok(exchange);
                        break;
                    }

                    match status {
                        503 => num_http_503 += 1,
                        504 => num_http_504 += 1,
                        _ => fatal = true,
                    }
                    final_outcome = Ok(exchange);
                }
                Err(err) => {
                    match err {
                        TransportError::RemoteFileNotFound
                        | TransportError::RemoteAccessDenied => {
                            // The far end spoke; treat like a fatal HTTP
                            // outcome.
                            fatal = true;
                        }
                        TransportError::Timeout
                        | TransportError::Send
                        | TransportError::Recv => {
                            num_timeouts_or_io += 1;
                        }
                        _ => {
                            // Connect-level failure. If this attempt forced
                            // a fresh connection the address itself is
                            // suspect: tell the resolver.
                            if expired {
                                shared.resolver.blacklist(target);
                            }
                        }
                    }
                    final_outcome = Err(err);
                }
            }

            if fatal || num_http_503 + num_timeouts_or_io >= 2 || num_http_504 >= 1 {
                let reason = if fatal {
                    AbortReason::Permanent
                } else {
                    AbortReason::Temporary
                };
                self.report(trail, TrailEvent::Abort { reason });
                aborted = true;
                break;
            }
        }

        let succeeded = matches!(&final_outcome, Ok(e) if e.status < 400);
        if !succeeded && !aborted && !targets.is_empty() {
            // Ran out of candidates.
            self.report(
                trail,
                TrailEvent::Abort {
                    reason: AbortReason::Temporary,
                },
            );
        }

        // Downstream overload observed on every try: tell the admission
        // controller it should shed load.
        if num_http_503 >= 2 || num_http_504 >= 1 {
            if let Some(monitor) = &shared.load_monitor {
                monitor.incr_penalties();
                crate::metrics::add_penalties(1);
            }
        }

        // A completed exchange (any status) leaves a live connection behind;
        // record its peer. A transport-level failure leaves none.
        match &final_outcome {
            Ok(_) => {
                let ip = last_target
                    .map(|t| t.address.to_string())
                    .unwrap_or_default();
                self.entry.set_remote_ip(&ip);

                if let Some(monitor) = &shared.comm_monitor {
                    if num_http_503 >= 2 {
                        monitor.inform_failure(now_ms);
                    } else {
                        monitor.inform_success(now_ms);
                    }
                }
            }
            Err(_) => {
                self.entry.set_remote_ip("");
                if let Some(monitor) = &shared.comm_monitor {
                    monitor.inform_failure(now_ms);
                }
            }
        }

        match final_outcome {
            Ok(exchange) => {
                let mut response = Response::new(exchange.status, exchange.body);
                for line in &exchange.header_lines {
                    response.push_header_line(line);
                }
                response
            }
            Err(err) => Response::new(error_status(&err), Bytes::new()),
        }
    }

    /// GET the given absolute path.
    pub async fn send_get(&mut self, path: &str, trail: TrailId) -> Response {
        self.execute(&Request::get(path).with_trail(trail)).await
    }

    /// PUT a JSON body to the given absolute path.
    pub async fn send_put(
        &mut self,
        path: &str,
        body: impl Into<Bytes>,
        trail: TrailId,
    ) -> Response {
        self.execute(&Request::put(path).with_body(body).with_trail(trail))
            .await
    }

    /// POST a JSON body to the given absolute path.
    pub async fn send_post(
        &mut self,
        path: &str,
        body: impl Into<Bytes>,
        trail: TrailId,
    ) -> Response {
        self.execute(&Request::post(path).with_body(body).with_trail(trail))
            .await
    }

    /// DELETE the given absolute path, optionally with a body.
    pub async fn send_delete(
        &mut self,
        path: &str,
        body: impl Into<Bytes>,
        trail: TrailId,
    ) -> Response {
        self.execute(&Request::delete(path).with_body(body).with_trail(trail))
            .await
    }

    /// Peer IP of the last completed exchange, or "" when not connected.
    pub fn remote_ip(&self) -> &str {
        self.entry.remote_ip()
    }

    /// Monotonic instant after which the next call forces a fresh
    /// connection. Zero until the first successful exchange.
    pub fn recycle_deadline_ms(&self) -> u64 {
        self.entry.deadline_ms()
    }

    fn response_timeout(&self) -> Duration {
        let latency_us = self
            .shared
            .load_monitor
            .as_ref()
            .map(|m| m.get_target_latency_us())
            .unwrap_or(DEFAULT_LATENCY_US);
        Duration::from_millis(calc_req_timeout_from_latency(latency_us))
    }

    fn report(&self, trail: TrailId, event: TrailEvent) {
        if let Some(sink) = &self.shared.trail_sink {
            sink.report(trail, event);
        }
    }

    fn body_for_level(&self, raw: &[u8]) -> Option<Vec<u8>> {
        match self.shared.log_level {
            TrailLogLevel::Detail if !raw.is_empty() => Some(compress_body(raw)),
            _ => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn entry_mut(&mut self) -> &mut PoolEntry {
        &mut self.entry
    }
}
