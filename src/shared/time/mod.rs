//! Monotonic clock helpers.

use once_cell::sync::Lazy;
use std::time::Instant;

/// Offset added to the raw monotonic reading. Keeps zero free as the
/// "never set" deadline sentinel even for calls made right after startup.
const CLOCK_BASE_MS: u64 = 1_000;

static ORIGIN: Lazy<Instant> = Lazy::new(Instant::now);

/// Returns the current monotonic time in milliseconds.
pub fn now_ms() -> u64 {
    ORIGIN.elapsed().as_millis() as u64 + CLOCK_BASE_MS
}
