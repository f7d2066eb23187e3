//! Owned, allocation-free random samplers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Samples inter-arrival intervals from an exponential distribution using a
/// splitmix64 core. One instance lives in each connection cache entry; the
/// state is owned and never shared across workers.
pub struct ExpInterarrival {
    mean_ms: f64,
    state: u64,
}

impl ExpInterarrival {
    /// Creates a sampler with the given mean interval in milliseconds.
    pub fn new(mean_ms: f64) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9e3779b97f4a7c15);
        Self::with_seed(mean_ms, nanos)
    }

    /// Creates a sampler from an explicit seed. Deterministic sequence.
    pub fn with_seed(mean_ms: f64, seed: u64) -> Self {
        let mut state = seed.wrapping_add(0x9e3779b97f4a7c15);
        state = mix(state);
        if state == 0 {
            state = 0x9e3779b97f4a7c15;
        }
        Self { mean_ms, state }
    }

    /// Draws the next interval, in milliseconds.
    pub fn next_interval_ms(&mut self) -> u64 {
        let u = self.next_f64();
        (-self.mean_ms * (1.0 - u).ln()) as u64
    }

    /// Uniform float in [0,1) built from the top 53 bits.
    fn next_f64(&mut self) -> f64 {
        const INV53: f64 = 1.0 / 9007199254740992.0; // 2^53
        (self.next_u64() >> 11) as f64 * INV53
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9e3779b97f4a7c15);
        mix(self.state)
    }
}

/// Mixes a 64-bit value using the SplitMix64 finalizer.
fn mix(z: u64) -> u64 {
    let mut z = z;
    z ^= z >> 30;
    z = z.wrapping_mul(0xbf58476d1ce4e5b9);
    z ^= z >> 27;
    z = z.wrapping_mul(0x94d049bb133111eb);
    z ^= z >> 31;
    z
}
