use parking_lot::Mutex;
use std::collections::HashMap;

/// Gauge name for per-peer connection counts.
pub const CONNECTED_PEERS: &str = "backhaul_connected_peers";

/// Counts how many worker connections are currently held to each remote
/// peer IP. Process-wide; the sum of all rows equals the number of cache
/// entries with a non-empty remote IP.
///
/// The single mutex guards the two-step decrement/increment swap so the
/// invariant holds even under racing workers. Rows are removed when they
/// reach zero.
pub struct IpCountTable {
    rows: Mutex<HashMap<String, u64>>,
}

impl IpCountTable {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
        }
    }

    /// Moves one connection count from `old` to `new`. Either side may be
    /// empty ("no connection"). Both steps happen under one lock hold.
    pub fn swap(&self, old: &str, new: &str) {
        if old == new {
            return;
        }

        let mut rows = self.rows.lock();

        if !old.is_empty() {
            if let Some(count) = rows.get_mut(old) {
                *count -= 1;
                let remaining = *count;
                if remaining == 0 {
                    rows.remove(old);
                }
                metrics::gauge!(CONNECTED_PEERS, remaining as f64, "peer" => old.to_string());
            }
        }

        if !new.is_empty() {
            let count = rows.entry(new.to_string()).or_insert(0);
            *count += 1;
            metrics::gauge!(CONNECTED_PEERS, *count as f64, "peer" => new.to_string());
        }
    }

    /// Current count for one peer IP; zero when the row is absent.
    pub fn get(&self, ip: &str) -> u64 {
        self.rows.lock().get(ip).copied().unwrap_or(0)
    }

    /// Whether a row exists for the peer.
    pub fn contains(&self, ip: &str) -> bool {
        self.rows.lock().contains_key(ip)
    }

    /// Sum over all rows.
    pub fn total(&self) -> u64 {
        self.rows.lock().values().sum()
    }

    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.rows.lock().clone()
    }
}

impl Default for IpCountTable {
    fn default() -> Self {
        Self::new()
    }
}
