use std::sync::Arc;

use crate::metrics::IpCountTable;
use crate::rand::ExpInterarrival;
use crate::transport::ResolveDirective;

/// Mean age of a connection before it is recycled. Ensures DNS changes are
/// respected and load rebalances onto servers that come back after failure.
/// Actual recycle events are Poisson-distributed with this mean.
pub(crate) const CONNECTION_AGE_MS: f64 = 60_000.0;

/// Worker-local connection state: the recycle deadline, the peer of the
/// last completed exchange, and the DNS-override removal notes left for the
/// next attempt. Owned exclusively by one handle; never locked.
pub(crate) struct PoolEntry {
    deadline_ms: u64,
    sampler: ExpInterarrival,
    remote_ip: String,
    pending_resolves: Vec<ResolveDirective>,
    stat_table: Option<Arc<IpCountTable>>,
}

impl PoolEntry {
    pub(crate) fn new(stat_table: Option<Arc<IpCountTable>>) -> Self {
        Self::with_sampler(ExpInterarrival::new(CONNECTION_AGE_MS), stat_table)
    }

    pub(crate) fn with_sampler(
        sampler: ExpInterarrival,
        stat_table: Option<Arc<IpCountTable>>,
    ) -> Self {
        Self {
            deadline_ms: 0,
            sampler,
            remote_ip: String::new(),
            pending_resolves: Vec::new(),
            stat_table,
        }
    }

    /// Is it time to recycle the connection? Expects monotonic milliseconds.
    pub(crate) fn is_connection_expired(&self, now_ms: u64) -> bool {
        now_ms > self.deadline_ms
    }

    /// Advances the deadline to the next recycle instant. Call on a
    /// successful exchange over a fresh connection.
    pub(crate) fn update_deadline(&mut self, now_ms: u64) {
        let interval_ms = self.sampler.next_interval_ms();

        if self.deadline_ms == 0 || self.deadline_ms + interval_ms < now_ms {
            // First request, or the intended instant has already passed
            // (things must be pretty quiet). Bump it into the future.
            self.deadline_ms = now_ms + interval_ms;
        } else {
            // Schedule relative to the last intended time so the long-run
            // mean inter-arrival is not skewed upwards.
            self.deadline_ms += interval_ms;
        }
    }

    pub(crate) fn deadline_ms(&self) -> u64 {
        self.deadline_ms
    }

    pub(crate) fn remote_ip(&self) -> &str {
        &self.remote_ip
    }

    /// Records the peer of the last completed exchange ("" = none) and
    /// keeps the process-wide per-peer counters in step.
    pub(crate) fn set_remote_ip(&mut self, value: &str) {
        if value == self.remote_ip {
            return;
        }
        if let Some(table) = &self.stat_table {
            table.swap(&self.remote_ip, value);
        }
        self.remote_ip = value.to_string();
    }

    /// Drains the override-removal notes left by the previous attempt.
    pub(crate) fn take_resolve_directives(&mut self) -> Vec<ResolveDirective> {
        std::mem::take(&mut self.pending_resolves)
    }

    /// Leaves a note to clear this attempt's override next time round.
    pub(crate) fn note_resolve_removal(&mut self, host: &str, port: u16) {
        self.pending_resolves.push(ResolveDirective::Remove {
            host: host.to_string(),
            port,
        });
    }

    #[cfg(test)]
    pub(crate) fn set_deadline_for_test(&mut self, deadline_ms: u64) {
        self.deadline_ms = deadline_ms;
    }
}

impl Drop for PoolEntry {
    fn drop(&mut self) {
        // Worker teardown: the connection is gone, settle the counters.
        self.set_remote_ip("");
    }
}
