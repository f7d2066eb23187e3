//! Hyper-based transport implementation.
//
//! Dials the executor-selected IP directly while the `Host` header carries
//! the logical hostname, so virtual hosting and TLS see the name the caller
//! configured. The idle pool holds at most one connection; a fresh-connection
//! attempt drops the client, which closes the pooled socket.

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::header::{HeaderValue, HOST};
use hyper::Uri;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::dns::GaiResolver;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;
use url::Url;

use super::{AttemptOptions, Capture, Exchange, ResolveDirective, Transport, TransportError};
use crate::model::Method;

/// Idle pool horizon; the recycle schedule normally tears connections down
/// well before this.
const MAX_IDLE_CONN_DURATION: Duration = Duration::from_secs(300);

pub type HyperClient =
    Client<HttpsConnector<HttpConnector<GaiResolver>>, BoxBody<Bytes, hyper::Error>>;

/// Builds a client holding at most one idle connection, HTTP/1.1 only so
/// the Host header goes out as a regular header rather than `:authority`.
fn create_client(connect_timeout: Duration) -> HyperClient {
    let resolver = GaiResolver::new();

    let mut http_connector = HttpConnector::new_with_resolver(resolver);
    http_connector.set_nodelay(true);
    http_connector.set_connect_timeout(Some(connect_timeout));

    let tls = hyper_rustls::HttpsConnectorBuilder::new()
        .with_native_roots()
        .expect("Failed to load native root certificates")
        .https_or_http()
        .enable_http1()
        .wrap_connector(http_connector);

    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(MAX_IDLE_CONN_DURATION)
        .pool_max_idle_per_host(1)
        .build(tls)
}

/// Formats the authority to dial, bracketing IPv6 literals.
pub(crate) fn dial_authority(host: &str, port: u16, pinned: Option<IpAddr>) -> String {
    match pinned {
        Some(IpAddr::V4(v4)) => format!("{}:{}", v4, port),
        Some(IpAddr::V6(v6)) => format!("[{}]:{}", v6, port),
        None => format!("{}:{}", host, port),
    }
}

pub struct HyperTransport {
    client: Option<HyperClient>,
    overrides: HashMap<(String, u16), IpAddr>,
}

impl HyperTransport {
    pub fn new() -> Self {
        Self {
            client: None,
            overrides: HashMap::new(),
        }
    }

    fn apply_directives(&mut self, directives: &[ResolveDirective]) {
        for directive in directives {
            match directive {
                ResolveDirective::Add { host, port, ip } => {
                    self.overrides.insert((host.clone(), *port), *ip);
                }
                ResolveDirective::Remove { host, port } => {
                    self.overrides.remove(&(host.clone(), *port));
                }
            }
        }
    }
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn to_hyper_method(method: Method) -> hyper::Method {
    match method {
        Method::Get => hyper::Method::GET,
        Method::Put => hyper::Method::PUT,
        Method::Post => hyper::Method::POST,
        Method::Delete => hyper::Method::DELETE,
    }
}

fn classify_client_error(e: hyper_util::client::legacy::Error) -> TransportError {
    if e.is_connect() {
        TransportError::CouldNotConnect
    } else {
        TransportError::Other(e.to_string())
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn perform(&mut self, attempt: &AttemptOptions) -> Result<Exchange, TransportError> {
        self.apply_directives(&attempt.resolve);

        let parsed = Url::parse(&attempt.url).map_err(|_| TransportError::UrlMalformed)?;
        let host = parsed
            .host_str()
            .ok_or(TransportError::UrlMalformed)?
            .to_string();
        let port = parsed
            .port_or_known_default()
            .ok_or(TransportError::UrlMalformed)?;

        let pinned = self.overrides.get(&(host.clone(), port)).copied();

        if attempt.fresh_connection {
            // Dropping the client closes the pooled socket.
            self.client = None;
        }
        let connect_timeout = attempt.connect_timeout;
        let client = self
            .client
            .get_or_insert_with(|| create_client(connect_timeout));

        let mut path_and_query = parsed.path().to_string();
        if let Some(query) = parsed.query() {
            path_and_query.push('?');
            path_and_query.push_str(query);
        }

        let authority = dial_authority(&host, port, pinned);
        let dial_url = format!("{}://{}{}", parsed.scheme(), authority, path_and_query);
        let uri: Uri = dial_url.parse().map_err(|_| TransportError::UrlMalformed)?;

        debug!(
            component = "transport",
            url = %attempt.url,
            dial = %dial_url,
            fresh = attempt.fresh_connection,
            "performing exchange"
        );

        let mut builder = hyper::Request::builder()
            .method(to_hyper_method(attempt.method))
            .uri(uri);
        for (name, value) in &attempt.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let req_body: BoxBody<Bytes, hyper::Error> = match &attempt.body {
            Some(body) => Full::new(body.clone())
                .map_err(|never: std::convert::Infallible| match never {})
                .boxed(),
            None => Empty::<Bytes>::new()
                .map_err(|never: std::convert::Infallible| match never {})
                .boxed(),
        };

        let mut req = builder
            .body(req_body)
            .map_err(|_| TransportError::UrlMalformed)?;

        // Set Host after build() so the logical name wins over the dialed
        // IP authority (the builder derives Host from the URI).
        let host_value = HeaderValue::from_str(&format!("{}:{}", host, port))
            .map_err(|_| TransportError::UrlMalformed)?;
        req.headers_mut().remove(HOST);
        req.headers_mut().insert(HOST, host_value);

        let mut capture = Capture::default();
        capture.request_headers.extend_from_slice(
            format!("{} {} HTTP/1.1\r\n", attempt.method.as_str(), path_and_query).as_bytes(),
        );
        for (name, value) in req.headers() {
            capture.request_headers.extend_from_slice(name.as_str().as_bytes());
            capture.request_headers.extend_from_slice(b": ");
            capture.request_headers.extend_from_slice(value.as_bytes());
            capture.request_headers.extend_from_slice(b"\r\n");
        }
        capture.request_headers.extend_from_slice(b"\r\n");
        if let Some(body) = &attempt.body {
            capture.request_body.extend_from_slice(body);
        }

        let peer = pinned.map(|ip| SocketAddr::new(ip, port));

        // One deadline covers the whole exchange: send, wait, read body.
        let exchange = timeout(attempt.response_timeout, async {
            let response = client.request(req).await.map_err(classify_client_error)?;

            let status = response.status().as_u16();
            let mut header_lines = Vec::with_capacity(response.headers().len() + 1);
            header_lines.push(format!(
                "HTTP/1.1 {} {}",
                status,
                response.status().canonical_reason().unwrap_or("")
            ));
            for (name, value) in response.headers() {
                header_lines.push(format!(
                    "{}: {}",
                    name.as_str(),
                    String::from_utf8_lossy(value.as_bytes())
                ));
            }

            let body = response
                .into_body()
                .collect()
                .await
                .map_err(|_| TransportError::Recv)?
                .to_bytes();

            Ok::<_, TransportError>((status, header_lines, body))
        })
        .await
        .map_err(|_| TransportError::Timeout)?;

        let (status, header_lines, body) = exchange?;

        for line in &header_lines {
            capture.response_headers.extend_from_slice(line.as_bytes());
            capture.response_headers.extend_from_slice(b"\r\n");
        }
        capture.response_headers.extend_from_slice(b"\r\n");
        capture.response_body.extend_from_slice(&body);

        Ok(Exchange {
            status,
            header_lines,
            body,
            capture,
            peer,
            local: None,
        })
    }
}

/// Default factory handed to connection handles.
pub struct HyperTransportFactory;

impl super::TransportFactory for HyperTransportFactory {
    fn create(&self) -> Box<dyn Transport> {
        Box::new(HyperTransport::new())
    }
}
