// Connection configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::client::{HttpConnection, HttpConnectionBuilder};
use crate::resolver::StaticResolver;
use crate::trail::TrailLogLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrailLevel {
    Protocol,
    Detail,
}

impl TrailLevel {
    pub fn to_log_level(self) -> TrailLogLevel {
        match self {
            TrailLevel::Protocol => TrailLogLevel::Protocol,
            TrailLevel::Detail => TrailLogLevel::Detail,
        }
    }
}

/// Declarative form of a backend connection, loadable from the embedding
/// process's config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// `host`, `host:port`, or a bracketed IPv6 form.
    pub server: String,
    pub scheme: Option<String>,
    #[serde(rename = "assert_user")]
    pub assert_user: Option<bool>,
    #[serde(rename = "trail_level")]
    pub trail_level: Option<TrailLevel>,
    /// Cooldown for addresses the executor reports as bad; only used when
    /// the fallback static resolver is in play.
    #[serde(rename = "blacklist_ttl", with = "humantime_serde", default)]
    pub blacklist_ttl: Option<Duration>,
}

impl ClientConfig {
    /// Starts a builder with this config's server, scheme and assertion
    /// flag applied. The caller wires resolver, sinks and monitors.
    pub fn builder(&self) -> HttpConnectionBuilder {
        let mut builder = HttpConnection::builder(self.server.clone());
        if let Some(scheme) = &self.scheme {
            builder = builder.scheme(scheme.clone());
        }
        if let Some(assert_user) = self.assert_user {
            builder = builder.assert_user(assert_user);
        }
        builder
    }

    /// Builds the fallback fleet resolver with the configured cooldown.
    pub fn static_resolver(&self) -> StaticResolver {
        match self.blacklist_ttl {
            Some(ttl) => StaticResolver::with_blacklist_ttl(ttl),
            None => StaticResolver::new(),
        }
    }

    pub fn trail_log_level(&self) -> TrailLogLevel {
        self.trail_level
            .map(TrailLevel::to_log_level)
            .unwrap_or(TrailLogLevel::Protocol)
    }
}
