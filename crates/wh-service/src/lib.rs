//! Webhooks Service Library
//!
//! This library provides the core functionality for the webhooks service -
//! an event-delivery bridge that turns raw server events into canonical
//! webhook callbacks:
//!
//! - Normalizing raw server messages into a stable event vocabulary
//! - Correlating internal/external meeting and user ids across events
//! - Registering callback hooks through a checksum-guarded XML API
//! - Delivering callbacks over HTTP with retries and per-hook fan-out
//!
//! # Architecture
//!
//! The service is a pipeline from input source to callback receivers:
//!
//! ```text
//! redis pub/sub -> processor -> normalizer (raw -> canonical)
//!                            -> registries (id/user mappings, side effects)
//!                            -> outputs (dispatcher -> one emitter per hook)
//! ```
//!
//! # Modules
//!
//! - [`api`] - Hook administration API (XML over HTTP)
//! - [`config`] - Service configuration from environment
//! - [`delivery`] - Callback dispatch and retried HTTP delivery
//! - [`errors`] - Error types
//! - [`events`] - Canonical event model and the normalizer
//! - [`input`] - Raw event input sources
//! - [`observability`] - Metrics definitions
//! - [`processor`] - Pipeline core: normalize, correlate, fan out
//! - [`repositories`] - Hook and mapping registries
//! - [`storage`] - Key/value persistence backends
//! - [`tasks`] - Background maintenance tasks

pub mod api;
pub mod config;
pub mod delivery;
pub mod errors;
pub mod events;
pub mod input;
pub mod observability;
pub mod processor;
pub mod repositories;
pub mod storage;
pub mod tasks;
