//! Mapping cleanup background task.
//!
//! Meetings that end without a `meeting-ended` event (server crash, missed
//! message) would otherwise leave their id and user mappings behind
//! forever. This task periodically expires mappings whose last activity is
//! older than the configured timeout, dropping the user rows before the
//! meeting row so no user mapping outlives its meeting.
//!
//! # Shutdown
//!
//! The task supports graceful shutdown via a cancellation token. When the
//! token is cancelled, the task completes its current iteration and exits
//! cleanly.

use crate::repositories::{IdMappingRepository, UserMappingRepository};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Start the mapping cleanup background task.
///
/// Runs in a loop, expiring idle mappings every `check_interval`. Returns
/// when the cancellation token is triggered.
#[instrument(skip_all, name = "wh.task.mapping_cleanup")]
pub async fn start_mapping_cleanup(
    id_mappings: Arc<IdMappingRepository>,
    user_mappings: Arc<UserMappingRepository>,
    mapping_timeout: Duration,
    check_interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "wh.task.mapping_cleanup",
        mapping_timeout_ms = mapping_timeout.as_millis(),
        check_interval_ms = check_interval.as_millis(),
        "Starting mapping cleanup task"
    );

    let mut interval = tokio::time::interval(check_interval);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_cleanup(&id_mappings, &user_mappings, mapping_timeout).await;
            }
            _ = cancel_token.cancelled() => {
                info!(
                    target: "wh.task.mapping_cleanup",
                    "Mapping cleanup task received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(
        target: "wh.task.mapping_cleanup",
        "Mapping cleanup task stopped"
    );
}

/// One cleanup sweep over both registries.
///
/// Separated from the main loop to allow direct testing.
pub(crate) async fn run_cleanup(
    id_mappings: &IdMappingRepository,
    user_mappings: &UserMappingRepository,
    mapping_timeout: Duration,
) {
    for mapping in id_mappings.expired(mapping_timeout) {
        let internal_meeting_id = &mapping.payload.internal_meeting_id;

        // Users first so a crash between the two deletes cannot leave
        // orphaned user rows behind an already-deleted meeting
        match user_mappings.remove_for_meeting(internal_meeting_id).await {
            Ok(removed_users) => {
                info!(
                    target: "wh.task.mapping_cleanup",
                    internal_meeting_id = %internal_meeting_id,
                    external_meeting_id = %mapping.payload.external_meeting_id,
                    removed_users = removed_users.len(),
                    "Expiring idle meeting mapping"
                );
            }
            Err(e) => {
                warn!(
                    target: "wh.task.mapping_cleanup",
                    error = %e,
                    internal_meeting_id = %internal_meeting_id,
                    "Failed to remove user mappings for expired meeting"
                );
            }
        }

        if let Err(e) = id_mappings.remove(internal_meeting_id).await {
            warn!(
                target: "wh.task.mapping_cleanup",
                error = %e,
                internal_meeting_id = %internal_meeting_id,
                "Failed to remove expired meeting mapping"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serde_json::json;

    fn repositories() -> (IdMappingRepository, UserMappingRepository) {
        let store: Arc<dyn crate::storage::KeyValueStore> = Arc::new(MemoryStore::new());
        (
            IdMappingRepository::new(Arc::clone(&store), "test"),
            UserMappingRepository::new(store, "test"),
        )
    }

    #[tokio::test]
    async fn test_cleanup_expires_idle_meetings_and_their_users() {
        let (id_mappings, user_mappings) = repositories();
        id_mappings.add_or_update("int-1", "ext-1").await.unwrap();
        user_mappings
            .add_or_update("user-1", "ext-user-1", "int-1", json!({"name": "Ada"}))
            .await
            .unwrap();
        user_mappings
            .add_or_update("user-2", "ext-user-2", "int-1", json!({"name": "Grace"}))
            .await
            .unwrap();

        // Zero timeout expires anything with activity in the past
        tokio::time::sleep(Duration::from_millis(5)).await;
        run_cleanup(&id_mappings, &user_mappings, Duration::ZERO).await;

        assert!(id_mappings.all().is_empty());
        assert_eq!(user_mappings.count(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_active_meetings() {
        let (id_mappings, user_mappings) = repositories();
        id_mappings.add_or_update("int-1", "ext-1").await.unwrap();
        user_mappings
            .add_or_update("user-1", "ext-user-1", "int-1", json!({}))
            .await
            .unwrap();

        run_cleanup(&id_mappings, &user_mappings, Duration::from_secs(3600)).await;

        assert_eq!(id_mappings.all().len(), 1);
        assert_eq!(user_mappings.count(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_leaves_other_meetings_untouched() {
        let (id_mappings, user_mappings) = repositories();
        id_mappings.add_or_update("int-old", "ext-old").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        // The fresh meeting's lastActivity is newer than the cutoff
        id_mappings.add_or_update("int-new", "ext-new").await.unwrap();
        user_mappings
            .add_or_update("user-new", "ext-user-new", "int-new", json!({}))
            .await
            .unwrap();

        run_cleanup(&id_mappings, &user_mappings, Duration::from_millis(150)).await;

        assert_eq!(id_mappings.external_meeting_id("int-old"), None);
        assert_eq!(
            id_mappings.external_meeting_id("int-new"),
            Some("ext-new".to_string())
        );
        assert_eq!(user_mappings.count(), 1);
    }

    #[tokio::test]
    async fn test_task_exits_on_cancellation() {
        let (id_mappings, user_mappings) = repositories();
        let cancel_token = CancellationToken::new();

        let handle = tokio::spawn(start_mapping_cleanup(
            Arc::new(id_mappings),
            Arc::new(user_mappings),
            Duration::from_secs(3600),
            Duration::from_secs(3600),
            cancel_token.clone(),
        ));

        cancel_token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
