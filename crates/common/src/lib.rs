//! Common utilities shared across the webhooks service crates.

#![warn(clippy::pedantic)]

/// Checksum computation and verification (API calls and callbacks)
pub mod checksum;

/// Secret wrappers that keep credentials out of logs
pub mod secret;
