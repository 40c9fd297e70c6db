//! # Webhooks Test Utilities
//!
//! Shared test utilities for the webhooks service.
//!
//! In here:
//! - Raw server message fixtures (`fixtures`) matching the wire shapes the
//!   normalizer consumes
//! - A server harness (`TestWhServer`) spawning the real API router on an
//!   ephemeral port
//! - A pipeline harness (`TestPipeline`) wiring processor, registries, and
//!   dispatcher over in-memory storage
//!
//! ## Usage
//!
//! ```rust,ignore
//! use wh_test_utils::{fixtures, TestWhServer};
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let server = TestWhServer::spawn().await?;
//!     let response = reqwest::get(server.api_url("hooks/list", "")).await?;
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod fixtures;
pub mod harness;

// Surface the harnesses at the crate root
pub use harness::{TestPipeline, TestWhServer, TEST_SECRET};
