//! Murmur Testing Infrastructure
//!
//! Deterministic effects, a scriptable in-memory room server and fixture
//! builders shared by the integration tests.
//!
//! # Usage
//!
//! Add this to your crate's `Cargo.toml` dev-dependencies:
//! ```toml
//! [dev-dependencies]
//! murmur-testkit = { path = "../murmur-testkit" }
//! ```
//!
//! Then in your tests:
//! ```rust,ignore
//! use murmur_testkit::*;
//! use std::sync::Arc;
//!
//! #[tokio::test]
//! async fn my_test() {
//!     init_test_tracing();
//!     let server = Arc::new(MockRoomClient::new("room"));
//!     server.insert_thread(ThreadBuilder::new("room", "th_1").build());
//!     let effects = Arc::new(MockEffects::deterministic());
//!     // ... test logic
//! }
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod fixtures;
pub mod mock_effects;
pub mod room_client;

pub use fixtures::*;
pub use mock_effects::{MockEffects, DEFAULT_START_MS};
pub use room_client::{ops, MockRoomClient};

use tracing_subscriber::EnvFilter;

/// Install a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to `warn`.
pub fn init_test_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
