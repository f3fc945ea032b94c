//! Append-only audit trail per chain.

use chain_store::{ChainId, EntityStore, Event};
use chrono::Utc;
use serde_json::Value;
use strum::{Display, IntoStaticStr};
use tracing::*;
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum EventType {
    Created,
    Paused,
    Resumed,
    Deleted,
    DeploymentCompleted,
    DeploymentStepFailed,
    DeploymentFallbackActivated,
    ScaledUp,
    ScaledDown,
    ValidatorStaked,
    ValidatorRewarded,
    ValidatorSlashed,
    BackupCreated,
    BackupCompleted,
    BackupRestoreStarted,
    BackupRestored,
    BackupDeleted,
    UpgradeInitiated,
    UpgradeStarted,
    UpgradeCompleted,
    UpgradeFailed,
    UpgradeRolledBack,
}

#[derive(Debug, Clone)]
pub struct EventLog {
    store: EntityStore,
}

impl EventLog {
    pub fn new(store: EntityStore) -> Self {
        Self { store }
    }

    /// Records an event. Callers append only after their entity writes have landed.
    pub async fn append(
        &self,
        chain_id: ChainId,
        event_type: EventType,
        description: impl Into<String>,
        actor_id: Option<&str>,
        payload: Value,
    ) -> Result<Event> {
        let event = Event {
            id: Uuid::new_v4(),
            chain_id,
            event_type: event_type.to_string(),
            description: description.into(),
            actor_id: actor_id.map(str::to_string),
            payload,
            created_at: Utc::now(),
            sequence: 0,
        };
        let event = self.store.append_event(event).await?;
        debug!(%chain_id, event = %event_type, sequence = event.sequence, "Appended event");
        Ok(event)
    }

    /// Newest first, at most `limit` entries
    pub async fn list(&self, chain_id: ChainId, limit: usize) -> Result<Vec<Event>> {
        Ok(self.store.events_for_chain(chain_id, limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn append_then_list_newest_first() {
        let log = EventLog::new(EntityStore::memory());
        let chain_id = Uuid::new_v4();

        log.append(chain_id, EventType::Created, "created", Some("alice"), json!({}))
            .await
            .unwrap();
        log.append(
            chain_id,
            EventType::Paused,
            "paused",
            Some("alice"),
            json!({ "reason": "maintenance window" }),
        )
        .await
        .unwrap();

        let events = log.list(chain_id, 10).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "paused");
        assert_eq!(events[0].payload["reason"], "maintenance window");
        assert_eq!(events[1].event_type, "created");
        assert_eq!(events[1].actor_id.as_deref(), Some("alice"));

        assert_eq!(log.list(chain_id, 1).await.unwrap().len(), 1);
        assert!(log.list(Uuid::new_v4(), 10).await.unwrap().is_empty());
    }

    #[test]
    fn event_type_tags() {
        assert_eq!(EventType::BackupRestored.to_string(), "backup_restored");
        assert_eq!(
            EventType::DeploymentFallbackActivated.to_string(),
            "deployment_fallback_activated"
        );
    }
}
