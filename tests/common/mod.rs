//! Common test infrastructure
//!
//! Builds fleets of job executors that share one lock coordinator and one
//! ledger file, the way separate processes share them in production.
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{sleeping_job, TestFleet};
//!
//! #[tokio::test]
//! async fn test_run() {
//!     let fleet = TestFleet::new();
//!     let instance = fleet.instance("worker-1");
//!     instance.register(sleeping_job("ping", 5_000, 10));
//!     instance.executor.execute("ping").await.unwrap();
//! }
//! ```

mod fixtures;
mod fleet;

// Public API - this is what tests import
#[allow(unused_imports)]
pub use fixtures::{failing_job, sleeping_job, PING_TIMEOUT_MS};
pub use fleet::{TestFleet, TestInstance};
