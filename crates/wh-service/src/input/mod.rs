//! Raw event input sources.
//!
//! An input source feeds serialized server events into the
//! [`EventProcessor`](crate::processor::EventProcessor). Redis pub/sub is
//! the production source; tests drive the processor directly.

pub mod redis_pubsub;

pub use redis_pubsub::RedisPubSubInput;

use crate::errors::WhError;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Contract every input source implements.
#[async_trait]
pub trait InputListener {
    /// Pump messages into the processor until the token cancels or the
    /// source dies.
    async fn run(self, cancel_token: CancellationToken) -> Result<(), WhError>;
}
