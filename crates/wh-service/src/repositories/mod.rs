//! Durable registries.
//!
//! Three collections persist across restarts, each one a
//! [`Compartment`](crate::storage::Compartment) over the configured store:
//!
//! - [`hooks`]: registered callback subscriptions
//! - [`id_mappings`]: internal/external meeting id correlation
//! - [`user_mappings`]: per-user correlation and state flags
//!
//! Reads are served from the compartment's in-memory index; writes go
//! through to the store first. Call `resync()` on each repository at
//! startup before serving traffic.

pub mod hooks;
pub mod id_mappings;
pub mod user_mappings;

pub use hooks::{Hook, HookPayload, HookRepository, SubscriptionOutcome, SubscriptionParams};
pub use id_mappings::{IdMapping, IdMappingPayload, IdMappingRepository};
pub use user_mappings::{UserMapping, UserMappingPayload, UserMappingRepository};

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
