//! Mock effects for deterministic testing
//!
//! Key features:
//! - Deterministic randomness using a seeded ChaCha20 RNG
//! - Manual clock that only moves when told to, plus a 1ms step per read
//!   so consecutive timestamps are strictly increasing

use chrono::{DateTime, Duration, TimeZone, Utc};
use murmur_core::{PhysicalTimeEffects, RandomEffects};
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use rand_chacha::{rand_core::SeedableRng, ChaCha20Rng};
use std::sync::Arc;

/// Fixed start time: 2024-01-01 00:00:00 UTC
pub const DEFAULT_START_MS: i64 = 1_704_067_200_000;

/// Mock effects implementation for deterministic testing
#[derive(Debug, Clone)]
pub struct MockEffects {
    state: Arc<Mutex<MockState>>,
}

#[derive(Debug)]
struct MockState {
    /// Deterministic RNG for reproducible tests
    rng: ChaCha20Rng,
    /// Physical time (ms since epoch)
    now_ms: i64,
    /// Step applied after every clock read
    step_ms: i64,
}

impl Default for MockEffects {
    fn default() -> Self {
        Self::deterministic()
    }
}

impl MockEffects {
    /// Effects with seed 42 starting at [`DEFAULT_START_MS`].
    pub fn deterministic() -> Self {
        Self::with_seed(42, DEFAULT_START_MS)
    }

    /// Effects with an explicit seed and start time.
    pub fn with_seed(seed: u64, start_ms: i64) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                rng: ChaCha20Rng::seed_from_u64(seed),
                now_ms: start_ms,
                step_ms: 1,
            })),
        }
    }

    /// Current time without advancing the clock.
    pub fn peek_time(&self) -> DateTime<Utc> {
        to_datetime(self.state.lock().now_ms)
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.state.lock().now_ms += by.num_milliseconds();
    }

    /// Set the clock.
    pub fn set_time(&self, at: DateTime<Utc>) {
        self.state.lock().now_ms = at.timestamp_millis();
    }

    /// Freeze the clock: reads no longer step it forward.
    pub fn freeze(&self) {
        self.state.lock().step_ms = 0;
    }
}

fn to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .expect("mock clock stays in range")
}

impl PhysicalTimeEffects for MockEffects {
    fn now(&self) -> DateTime<Utc> {
        let mut state = self.state.lock();
        let now = state.now_ms;
        state.now_ms += state.step_ms;
        to_datetime(now)
    }
}

impl RandomEffects for MockEffects {
    fn random_alphanumeric(&self, len: usize) -> String {
        let mut state = self.state.lock();
        (0..len)
            .map(|_| char::from(state.rng.sample(Alphanumeric)))
            .collect()
    }

    fn random_unit(&self) -> f64 {
        self.state.lock().rng.gen::<f64>()
    }
}
