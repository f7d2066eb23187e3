use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use tracing::debug;

use super::{HostStateMask, Resolver};
use crate::model::{Target, TrailId};
use crate::time;

/// How long a blacklisted address stays off the candidate list.
const DEFAULT_BLACKLIST_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostState {
    Whitelisted,
    Graylisted,
    /// Off the list until the stored monotonic instant.
    Blacklisted { until_ms: u64 },
}

struct AddressRecord {
    address: IpAddr,
    state: HostState,
}

/// A resolver over a statically-configured fleet of equivalent addresses.
///
/// Keeps per-address health state and honours blacklist feedback with a
/// cooldown. Used by the test harness and as a fallback when no DNS/SRV
/// resolver is wired in; the production resolver lives outside this crate.
pub struct StaticResolver {
    hosts: Mutex<HashMap<String, Vec<AddressRecord>>>,
    blacklist_ttl: Duration,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::with_blacklist_ttl(DEFAULT_BLACKLIST_TTL)
    }

    pub fn with_blacklist_ttl(blacklist_ttl: Duration) -> Self {
        Self {
            hosts: Mutex::new(HashMap::new()),
            blacklist_ttl,
        }
    }

    /// Registers an address for a hostname. New addresses start whitelisted.
    pub fn add_address(&self, host: impl Into<String>, address: IpAddr) {
        let mut hosts = self.hosts.lock();
        let records = hosts.entry(host.into()).or_default();
        if records.iter().all(|r| r.address != address) {
            records.push(AddressRecord {
                address,
                state: HostState::Whitelisted,
            });
        }
    }

    /// Moves an address to the probation list.
    pub fn graylist(&self, host: &str, address: IpAddr) {
        let mut hosts = self.hosts.lock();
        if let Some(records) = hosts.get_mut(host) {
            for r in records.iter_mut().filter(|r| r.address == address) {
                r.state = HostState::Graylisted;
            }
        }
    }
}

impl Default for StaticResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver for StaticResolver {
    fn resolve(
        &self,
        host: &str,
        port: u16,
        max: usize,
        allowed: HostStateMask,
        trail: TrailId,
    ) -> Vec<Target> {
        let now_ms = time::now_ms();
        let mut hosts = self.hosts.lock();
        let Some(records) = hosts.get_mut(host) else {
            return Vec::new();
        };

        // Expired blacklist entries rejoin the probation list.
        for r in records.iter_mut() {
            if let HostState::Blacklisted { until_ms } = r.state {
                if now_ms >= until_ms {
                    r.state = HostState::Graylisted;
                }
            }
        }

        let mut out = Vec::with_capacity(max.min(records.len()));
        for wanted in [HostState::Whitelisted, HostState::Graylisted] {
            let mask = match wanted {
                HostState::Whitelisted => HostStateMask::WHITELISTED,
                _ => HostStateMask::GRAYLISTED,
            };
            if !allowed.contains(mask) {
                continue;
            }
            for r in records.iter().filter(|r| r.state == wanted) {
                if out.len() == max {
                    break;
                }
                out.push(Target::tcp(r.address, port));
            }
        }

        debug!(
            component = "resolver",
            host = host,
            port = port,
            trail = trail,
            candidates = out.len(),
            "resolved static fleet"
        );
        out
    }

    fn blacklist(&self, target: &Target) {
        let until_ms = time::now_ms() + self.blacklist_ttl.as_millis() as u64;
        let mut hosts = self.hosts.lock();
        for records in hosts.values_mut() {
            for r in records.iter_mut().filter(|r| r.address == target.address) {
                r.state = HostState::Blacklisted { until_ms };
                debug!(
                    component = "resolver",
                    address = %target.address,
                    until_ms = until_ms,
                    "address blacklisted"
                );
            }
        }
    }
}
