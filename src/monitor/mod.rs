//! Contracts for the upstream admission controller and the communication
//! alarm monitor. Both are sinks owned by the embedding process; the
//! executor only signals them.

/// Admission-control view of downstream capacity.
pub trait LoadMonitor: Send + Sync {
    /// Current per-request latency target in microseconds. The executor
    /// derives its response timeout from this.
    fn get_target_latency_us(&self) -> u64;

    /// Records that a downstream dependency reported overload.
    fn incr_penalties(&self);
}

/// Tracks whether communication with the backend fleet is healthy, e.g. to
/// drive alarms. Timestamps are monotonic milliseconds.
pub trait CommunicationMonitor: Send + Sync {
    fn inform_success(&self, now_ms: u64);
    fn inform_failure(&self, now_ms: u64);
}
