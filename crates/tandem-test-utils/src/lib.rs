//! Test doubles for tandem integration tests.
//!
//! Everything here runs in-process and is deterministic, so session tests
//! need neither a broker nor an HTTP server.
//!
//! - [`MemoryTransport`] - pub/sub transport with frame injection, publish
//!   capture and scriptable connection failures
//! - [`MockApi`] - conversation and message services backed by memory
//! - [`fixtures`] - builders for conversations and messages

pub mod fixtures;
pub mod memory_transport;
pub mod mock_api;

pub use memory_transport::{MemoryTransport, Published};
pub use mock_api::MockApi;

use std::time::Duration;

/// Poll `condition` until it holds, for up to five seconds of (possibly
/// paused) tokio time.
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
