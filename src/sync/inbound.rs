//! Inbound relay: applies webhook events from the external service to the
//! internal backend.
//!
//! Processing is deliberately lossy on error. Every handler logs and
//! swallows failures so a poisoned event can never wedge the worker loop,
//! and events for tasks unknown on the internal side are no-ops.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::clients::{ExternalApi, InternalApi};
use crate::errors::SyncError;
use crate::identity::IdentityMapper;
use crate::models::{InternalTask, TaskPatch, WebhookEventKind, WebhookPayload};
use crate::sync::status;

/// How long after creation an internal task still counts as a linkable
/// placeholder. Older placeholders are treated as failed outbound creates
/// awaiting repair, not as twins of fresh external tasks.
const PLACEHOLDER_MAX_AGE: Duration = Duration::from_secs(30);

const LINK_RETRY_ATTEMPTS: u32 = 3;

pub struct SyncRelay {
    internal: Arc<dyn InternalApi>,
    external: Arc<dyn ExternalApi>,
    mapper: Arc<IdentityMapper>,
    /// Base delay between placeholder-link attempts; attempt `n` waits
    /// `n * base`. Zero in tests.
    link_retry_base: Duration,
}

impl SyncRelay {
    pub fn new(
        internal: Arc<dyn InternalApi>,
        external: Arc<dyn ExternalApi>,
        mapper: Arc<IdentityMapper>,
    ) -> Self {
        Self {
            internal,
            external,
            mapper,
            link_retry_base: Duration::from_millis(500),
        }
    }

    #[cfg(test)]
    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.link_retry_base = base;
        self
    }

    /// Apply one webhook event. Never fails; errors are logged and dropped
    /// so one bad event cannot stall the queue.
    pub async fn handle(&self, payload: WebhookPayload) {
        let kind = match WebhookEventKind::from_str(&payload.event) {
            Ok(kind) => kind,
            Err(_) => {
                debug!(event = %payload.event, "ignoring unhandled webhook event");
                return;
            }
        };
        let Some(task_id) = payload.task_id.clone() else {
            warn!(event = %payload.event, "webhook event without task id");
            return;
        };

        let result = match kind {
            WebhookEventKind::Created => self.on_created(&task_id).await,
            WebhookEventKind::Updated | WebhookEventKind::AssigneeChanged => {
                self.on_updated(&task_id).await
            }
            WebhookEventKind::Deleted => self.on_deleted(&task_id).await,
            WebhookEventKind::StatusChanged => self.on_status_changed(&task_id, &payload).await,
        };
        if let Err(err) = result {
            warn!(event = %payload.event, task_id, error = %err, "webhook processing failed");
        }
    }

    /// The internal backend is the system of record for task creation, so a
    /// creation event never materializes a new internal row. Its only job is
    /// to link a placeholder left behind by an in-flight outbound create.
    async fn on_created(&self, external_id: &str) -> Result<(), SyncError> {
        if self
            .internal
            .find_task_by_external_id(external_id)
            .await?
            .is_some()
        {
            debug!(external_id, "task already linked");
            return Ok(());
        }

        match self.find_placeholder_with_retry().await? {
            Some(task) => {
                info!(task_id = task.id, external_id, "linking placeholder task");
                let patch = TaskPatch {
                    external_id: Some(external_id.to_string()),
                    ..Default::default()
                };
                self.internal.update_task(task.id, &patch).await?;
                // Pull status/assignee from the external side now that the
                // link exists.
                self.on_updated(external_id).await?;
            }
            None => {
                debug!(external_id, "no recent placeholder, ignoring creation event");
            }
        }
        Ok(())
    }

    /// Full refresh from the external task. Missing on either side is a
    /// no-op.
    async fn on_updated(&self, external_id: &str) -> Result<(), SyncError> {
        let Some(external) = self.external.get_task(external_id).await? else {
            debug!(external_id, "external task gone, skipping update");
            return Ok(());
        };
        let Some(internal) = self.internal.find_task_by_external_id(external_id).await? else {
            debug!(external_id, "no internal twin, skipping update");
            return Ok(());
        };

        let (task_status, progress) = status::from_external(external.status_str());
        let assignee_id = match external.primary_assignee() {
            Some(user) => self.mapper.resolve(&user.id).await,
            None => None,
        };

        let patch = TaskPatch {
            title: Some(external.name.clone()),
            description: external.description.clone(),
            status: Some(task_status),
            progress_percentage: Some(progress),
            assignee_id,
            deadline: external.deadline(),
            ..Default::default()
        };
        self.internal.update_task(internal.id, &patch).await?;
        info!(task_id = internal.id, external_id, "applied external update");
        Ok(())
    }

    async fn on_deleted(&self, external_id: &str) -> Result<(), SyncError> {
        match self.internal.find_task_by_external_id(external_id).await? {
            Some(task) => {
                info!(task_id = task.id, external_id, "deleting task removed externally");
                self.internal.delete_task(task.id).await?;
            }
            None => {
                debug!(external_id, "deletion event for unknown task, ignoring");
            }
        }
        Ok(())
    }

    /// Status events usually carry the new value in their history diff; only
    /// fall back to refetching the task when they do not.
    async fn on_status_changed(
        &self,
        external_id: &str,
        payload: &WebhookPayload,
    ) -> Result<(), SyncError> {
        let Some(internal) = self.internal.find_task_by_external_id(external_id).await? else {
            debug!(external_id, "no internal twin, skipping status change");
            return Ok(());
        };

        let raw_status = match payload.status_from_history() {
            Some(raw) => raw.to_string(),
            None => match self.external.get_task(external_id).await? {
                Some(task) => task.status_str().to_string(),
                None => {
                    debug!(external_id, "external task gone, skipping status change");
                    return Ok(());
                }
            },
        };

        let (task_status, progress) = status::from_external(&raw_status);
        let patch = TaskPatch {
            status: Some(task_status),
            progress_percentage: Some(progress),
            ..Default::default()
        };
        self.internal.update_task(internal.id, &patch).await?;
        info!(
            task_id = internal.id,
            external_id,
            status = task_status.as_str(),
            "applied status change"
        );
        Ok(())
    }

    /// Look for a freshly-created placeholder task, retrying to give an
    /// in-flight outbound create time to commit its row.
    async fn find_placeholder_with_retry(&self) -> Result<Option<InternalTask>, SyncError> {
        for attempt in 1..=LINK_RETRY_ATTEMPTS {
            let tasks = self.internal.list_tasks().await?;
            let candidate = tasks
                .into_iter()
                .filter(|t| t.has_placeholder() && Self::is_recent(t))
                .max_by_key(|t| t.created_at);
            if candidate.is_some() {
                return Ok(candidate);
            }
            if attempt < LINK_RETRY_ATTEMPTS {
                tokio::time::sleep(self.link_retry_base * attempt).await;
            }
        }
        Ok(None)
    }

    fn is_recent(task: &InternalTask) -> bool {
        let age = Utc::now().signed_duration_since(task.created_at);
        age >= chrono::Duration::zero()
            && age.to_std().is_ok_and(|age| age <= PLACEHOLDER_MAX_AGE)
    }
}
