//! Scripted doubles for the transport, resolver, monitors and trail sink.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::client::HttpConnection;
use crate::metrics::IpCountTable;
use crate::model::{Target, TrailId};
use crate::monitor::{CommunicationMonitor, LoadMonitor};
use crate::resolver::{HostStateMask, Resolver};
use crate::trail::{AbortReason, TrailEvent, TrailLogLevel, TrailSink};
use crate::transport::{
    AttemptOptions, Capture, Exchange, ResolveDirective, Transport, TransportError,
    TransportFactory,
};

/// Port every test target listens on.
pub const PORT: u16 = 8888;

/// Routes executor logs into `cargo test` output. Safe to call repeatedly.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn tgt(ip: &str) -> Target {
    Target::tcp(ip.parse().unwrap(), PORT)
}

/// One pre-scripted transport outcome, consumed in order. An exhausted
/// script answers 200 "ok".
pub enum ScriptedOutcome {
    Status(u16, &'static str),
    StatusWithHeaders(u16, &'static str, Vec<(&'static str, &'static str)>),
    Fail(TransportError),
}

#[derive(Default)]
pub struct MockTransportState {
    script: Mutex<VecDeque<ScriptedOutcome>>,
    attempts: Mutex<Vec<AttemptOptions>>,
    created: AtomicUsize,
}

impl MockTransportState {
    pub fn push(&self, outcome: ScriptedOutcome) {
        self.script.lock().push_back(outcome);
    }

    pub fn attempts(&self) -> Vec<AttemptOptions> {
        self.attempts.lock().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }

    pub fn transports_created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// IP pinned by an attempt's final Add directive, as a string.
    pub fn pinned_ip(attempt: &AttemptOptions) -> Option<String> {
        attempt.resolve.iter().rev().find_map(|d| match d {
            ResolveDirective::Add { ip, .. } => Some(ip.to_string()),
            _ => None,
        })
    }
}

pub struct MockTransport {
    state: Arc<MockTransportState>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn perform(&mut self, attempt: &AttemptOptions) -> Result<Exchange, TransportError> {
        self.state.attempts.lock().push(attempt.clone());

        let outcome = self
            .state
            .script
            .lock()
            .pop_front()
            .unwrap_or(ScriptedOutcome::Status(200, "ok"));

        let (status, body, extra_headers) = match outcome {
            ScriptedOutcome::Status(status, body) => (status, body, Vec::new()),
            ScriptedOutcome::StatusWithHeaders(status, body, headers) => (status, body, headers),
            ScriptedOutcome::Fail(err) => return Err(err),
        };

        let mut capture = Capture::default();
        for (name, value) in &attempt.headers {
            capture
                .request_headers
                .extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        if let Some(body) = &attempt.body {
            capture.request_body.extend_from_slice(body);
        }

        let header_lines: Vec<String> = extra_headers
            .iter()
            .map(|(name, value)| format!("{}: {}", name, value))
            .collect();
        for line in &header_lines {
            capture.response_headers.extend_from_slice(line.as_bytes());
            capture.response_headers.extend_from_slice(b"\r\n");
        }
        capture.response_body.extend_from_slice(body.as_bytes());

        let peer: Option<SocketAddr> = attempt.resolve.iter().rev().find_map(|d| match d {
            ResolveDirective::Add { ip, port, .. } => Some(SocketAddr::new(*ip, *port)),
            _ => None,
        });

        Ok(Exchange {
            status,
            header_lines,
            body: Bytes::from_static(body.as_bytes()),
            capture,
            peer,
            local: None,
        })
    }
}

pub struct MockTransportFactory {
    pub state: Arc<MockTransportState>,
}

impl TransportFactory for MockTransportFactory {
    fn create(&self) -> Box<dyn Transport> {
        self.state.created.fetch_add(1, Ordering::Relaxed);
        Box::new(MockTransport {
            state: Arc::clone(&self.state),
        })
    }
}

#[derive(Default)]
pub struct MockResolver {
    targets: Mutex<Vec<Target>>,
    blacklisted: Mutex<Vec<Target>>,
    resolve_calls: AtomicUsize,
    last_mask: Mutex<Option<HostStateMask>>,
}

impl MockResolver {
    pub fn set_targets(&self, targets: Vec<Target>) {
        *self.targets.lock() = targets;
    }

    pub fn blacklisted(&self) -> Vec<Target> {
        self.blacklisted.lock().clone()
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::Relaxed)
    }

    pub fn last_mask(&self) -> Option<HostStateMask> {
        *self.last_mask.lock()
    }
}

impl Resolver for MockResolver {
    fn resolve(
        &self,
        _host: &str,
        _port: u16,
        max: usize,
        allowed: HostStateMask,
        _trail: TrailId,
    ) -> Vec<Target> {
        self.resolve_calls.fetch_add(1, Ordering::Relaxed);
        *self.last_mask.lock() = Some(allowed);
        let targets = self.targets.lock();
        targets.iter().take(max).copied().collect()
    }

    fn blacklist(&self, target: &Target) {
        self.blacklisted.lock().push(*target);
    }
}

#[derive(Default)]
pub struct MockLoadMonitor {
    latency_us: AtomicU64,
    penalties: AtomicU64,
}

impl MockLoadMonitor {
    pub fn with_latency_us(latency_us: u64) -> Self {
        let monitor = Self::default();
        monitor.latency_us.store(latency_us, Ordering::Relaxed);
        monitor
    }

    pub fn penalties(&self) -> u64 {
        self.penalties.load(Ordering::Relaxed)
    }
}

impl LoadMonitor for MockLoadMonitor {
    fn get_target_latency_us(&self) -> u64 {
        match self.latency_us.load(Ordering::Relaxed) {
            0 => 500_000,
            v => v,
        }
    }

    fn incr_penalties(&self) {
        self.penalties.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Default)]
pub struct MockCommMonitor {
    successes: AtomicUsize,
    failures: AtomicUsize,
}

impl MockCommMonitor {
    pub fn successes(&self) -> usize {
        self.successes.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }
}

impl CommunicationMonitor for MockCommMonitor {
    fn inform_success(&self, _now_ms: u64) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    fn inform_failure(&self, _now_ms: u64) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Default)]
pub struct CapturingTrail {
    events: Mutex<Vec<(TrailId, TrailEvent)>>,
}

impl CapturingTrail {
    pub fn events(&self) -> Vec<(TrailId, TrailEvent)> {
        self.events.lock().clone()
    }

    pub fn aborts(&self) -> Vec<AbortReason> {
        self.events
            .lock()
            .iter()
            .filter_map(|(_, e)| match e {
                TrailEvent::Abort { reason } => Some(*reason),
                _ => None,
            })
            .collect()
    }

    pub fn attempt_endpoints(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|(_, e)| match e {
                TrailEvent::Attempt { endpoint } => Some(endpoint.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn branch_ids(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|(_, e)| match e {
                TrailEvent::CorrelationMarker { branch_id } => Some(branch_id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn tx_bodies(&self) -> Vec<Option<Vec<u8>>> {
        self.events
            .lock()
            .iter()
            .filter_map(|(_, e)| match e {
                TrailEvent::TxRequest { body, .. } => Some(body.clone()),
                _ => None,
            })
            .collect()
    }
}

impl TrailSink for CapturingTrail {
    fn report(&self, trail: TrailId, event: TrailEvent) {
        self.events.lock().push((trail, event));
    }
}

pub struct Harness {
    pub connection: HttpConnection,
    pub transport: Arc<MockTransportState>,
    pub resolver: Arc<MockResolver>,
    pub load: Arc<MockLoadMonitor>,
    pub comm: Arc<MockCommMonitor>,
    pub trail: Arc<CapturingTrail>,
    pub table: Arc<IpCountTable>,
}

pub struct HarnessOptions {
    pub assert_user: bool,
    pub level: TrailLogLevel,
    pub monitors: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            assert_user: false,
            level: TrailLogLevel::Protocol,
            monitors: true,
        }
    }
}

/// A connection to `hss.example.net:8888` with every collaborator mocked.
pub fn harness(target_ips: &[&str]) -> Harness {
    harness_with(target_ips, HarnessOptions::default())
}

pub fn harness_with(target_ips: &[&str], options: HarnessOptions) -> Harness {
    let transport = Arc::new(MockTransportState::default());
    let resolver = Arc::new(MockResolver::default());
    resolver.set_targets(target_ips.iter().map(|ip| tgt(ip)).collect());
    let load = Arc::new(MockLoadMonitor::default());
    let comm = Arc::new(MockCommMonitor::default());
    let trail = Arc::new(CapturingTrail::default());
    let table = Arc::new(IpCountTable::new());

    let mut builder = HttpConnection::builder(format!("hss.example.net:{}", PORT))
        .assert_user(options.assert_user)
        .resolver(Arc::clone(&resolver) as Arc<dyn crate::resolver::Resolver>)
        .transport_factory(Arc::new(MockTransportFactory {
            state: Arc::clone(&transport),
        }))
        .trail_sink(
            Arc::clone(&trail) as Arc<dyn TrailSink>,
            options.level,
        )
        .stat_table(Arc::clone(&table));

    if options.monitors {
        builder = builder
            .load_monitor(Arc::clone(&load) as Arc<dyn LoadMonitor>)
            .comm_monitor(Arc::clone(&comm) as Arc<dyn CommunicationMonitor>);
    }

    let connection = builder.build().expect("harness connection");

    Harness {
        connection,
        transport,
        resolver,
        load,
        comm,
        trail,
        table,
    }
}
