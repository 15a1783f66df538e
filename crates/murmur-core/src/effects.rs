//! Effect traits for time and randomness
//!
//! Everything that reads the wall clock or draws random bits goes through
//! these traits so tests can substitute deterministic implementations.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Wall-clock access.
pub trait PhysicalTimeEffects: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Random value generation.
pub trait RandomEffects: Send + Sync {
    /// A random alphanumeric string of exactly `len` characters.
    fn random_alphanumeric(&self, len: usize) -> String;

    /// A uniformly distributed value in `[0, 1)`.
    fn random_unit(&self) -> f64;
}

/// Production effects backed by the system clock and the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEffects;

impl PhysicalTimeEffects for SystemEffects {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl RandomEffects for SystemEffects {
    fn random_alphanumeric(&self, len: usize) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    }

    fn random_unit(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}
