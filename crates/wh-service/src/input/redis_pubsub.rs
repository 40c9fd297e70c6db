//! Redis pub/sub input source.
//!
//! Subscribes to the configured inbound channels and forwards every payload
//! to the event processor. Malformed payloads are logged and dropped; the
//! listener itself only stops on shutdown or when the subscription dies.

use crate::config::Config;
use crate::errors::WhError;
use crate::input::InputListener;
use crate::processor::EventProcessor;
use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use futures_util::StreamExt;
use redis::{Client, Msg};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace, warn};

pub struct RedisPubSubInput {
    redis_url: SecretString,
    channels: Vec<String>,
    processor: Arc<EventProcessor>,
}

impl RedisPubSubInput {
    #[must_use]
    pub fn new(config: &Config, processor: Arc<EventProcessor>) -> Self {
        Self {
            redis_url: config.redis_url.clone(),
            channels: config.inbound_channels.clone(),
            processor,
        }
    }

    async fn handle_message(&self, message: &Msg) {
        let payload: String = match message.get_payload() {
            Ok(payload) => payload,
            Err(error) => {
                warn!(
                    target: "wh.input.redis",
                    %error,
                    channel = %message.get_channel_name(),
                    "Dropping message with unreadable payload"
                );
                return;
            }
        };

        if payload.trim().is_empty() {
            return;
        }

        trace!(
            target: "wh.input.redis",
            channel = %message.get_channel_name(),
            "Received message"
        );
        self.processor.process_input_event(&payload).await;
    }
}

#[async_trait]
impl InputListener for RedisPubSubInput {
    /// Subscribe and pump messages until shutdown.
    ///
    /// # Errors
    ///
    /// Returns `WhError::Storage` if the connection or a subscription cannot
    /// be established, or if the subscription stream closes unexpectedly.
    async fn run(self, cancel_token: CancellationToken) -> Result<(), WhError> {
        // Note: Do NOT log redis_url as it may contain credentials
        let client = Client::open(self.redis_url.expose_secret()).map_err(|e| {
            error!(
                target: "wh.input.redis",
                error = %e,
                "Failed to open Redis client for pub/sub"
            );
            WhError::Storage(format!("Failed to open Redis client: {e}"))
        })?;

        let mut pubsub = client.get_async_pubsub().await.map_err(|e| {
            error!(
                target: "wh.input.redis",
                error = %e,
                "Failed to connect to Redis pub/sub"
            );
            WhError::Storage(format!("Failed to connect to Redis pub/sub: {e}"))
        })?;

        for channel in &self.channels {
            pubsub.subscribe(channel).await.map_err(|e| {
                error!(
                    target: "wh.input.redis",
                    error = %e,
                    channel = %channel,
                    "Failed to subscribe"
                );
                WhError::Storage(format!("Failed to subscribe to {channel}: {e}"))
            })?;
            info!(target: "wh.input.redis", channel = %channel, "Subscribed");
        }

        let mut messages = pubsub.on_message();
        loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    info!(target: "wh.input.redis", "Input listener shutting down");
                    return Ok(());
                }
                message = messages.next() => {
                    match message {
                        Some(message) => self.handle_message(&message).await,
                        None => {
                            error!(target: "wh.input.redis", "Pub/sub stream closed");
                            return Err(WhError::Storage(
                                "Redis pub/sub stream closed".to_string(),
                            ));
                        }
                    }
                }
            }
        }
    }
}
