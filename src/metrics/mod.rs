//! Connection statistics.
//
//! The per-peer connection count table is the canonical state (the SNMP
//! table model from the signalling world); gauge updates mirror its rows to
//! the process metrics recorder for scraping.

pub mod ip_count;


pub use ip_count::IpCountTable;

/// Counter metric names.
pub const REQUESTS_TOTAL: &str = "backhaul_requests_total";
pub const RETRIES_TOTAL: &str = "backhaul_retries_total";
pub const PENALTIES_TOTAL: &str = "backhaul_penalties_total";

/// Adds executed calls.
pub fn add_requests(value: u64) {
    metrics::counter!(REQUESTS_TOTAL, value);
}

/// Adds follow-up attempts past the first target.
pub fn add_retries(value: u64) {
    metrics::counter!(RETRIES_TOTAL, value);
}

/// Adds load-monitor penalty signals.
pub fn add_penalties(value: u64) {
    metrics::counter!(PENALTIES_TOTAL, value);
}
