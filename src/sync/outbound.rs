//! Outbound sync: mirrors internally-initiated task changes to the external
//! service.
//!
//! The internal backend is authoritative, so writes land there no matter
//! what the external side does. Creation goes external-first to learn the
//! new external id; when that fails the internal task is created anyway
//! with a placeholder id, to be linked later by the inbound relay or a
//! retried create.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use crate::clients::{ExternalApi, InternalApi};
use crate::errors::SyncError;
use crate::identity::IdentityMapper;
use crate::models::{
    placeholder_id, ExternalTaskPatch, InternalTask, NewExternalTask, NewInternalTask, TaskPatch,
    TaskStatus,
};
use crate::sync::status;

/// A task creation request as accepted by the dashboard API.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_status")]
    pub status: TaskStatus,
    #[serde(default)]
    pub assignee_id: Option<i64>,
    #[serde(default)]
    pub assigner_id: Option<i64>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

fn default_status() -> TaskStatus {
    TaskStatus::Pending
}

pub struct OutboundSync {
    internal: Arc<dyn InternalApi>,
    external: Arc<dyn ExternalApi>,
    mapper: Arc<IdentityMapper>,
}

impl OutboundSync {
    pub fn new(
        internal: Arc<dyn InternalApi>,
        external: Arc<dyn ExternalApi>,
        mapper: Arc<IdentityMapper>,
    ) -> Self {
        Self {
            internal,
            external,
            mapper,
        }
    }

    /// Create a task in both systems.
    ///
    /// The external create runs first so the internal row can carry the real
    /// external id from the start. If the external side is down the internal
    /// row is created with a placeholder id instead. If the internal create
    /// fails after the external one succeeded, the external task is deleted
    /// again so no orphan is left behind.
    pub async fn create_task(&self, req: CreateTaskRequest) -> Result<InternalTask, SyncError> {
        let assignees = match req.assignee_id {
            Some(id) => self.mapper.resolve_reverse(id).await.map(|ext| vec![ext]),
            None => None,
        };

        let external_req = NewExternalTask {
            name: req.title.clone(),
            description: req.description.clone(),
            status: status::to_external(req.status).to_string(),
            assignees,
            due_date: req.deadline.map(|d| d.timestamp_millis()),
        };

        let external_id = match self.external.create_task(&external_req).await {
            Ok(created) => {
                info!(external_id = %created.id, title = %req.title, "created external task");
                Some(created.id)
            }
            Err(err) => {
                warn!(error = %err, title = %req.title, "external create failed, using placeholder");
                None
            }
        };

        let internal_req = NewInternalTask {
            external_id: external_id.clone().unwrap_or_else(placeholder_id),
            title: req.title,
            description: req.description,
            status: req.status,
            progress_percentage: req.status.default_progress(),
            assignee_id: req.assignee_id,
            assigner_id: req.assigner_id,
            deadline: req.deadline,
        };

        match self.internal.create_task(&internal_req).await {
            Ok(task) => Ok(task),
            Err(err) => {
                if let Some(id) = &external_id {
                    // Roll the external side back so the two systems stay
                    // consistent when the authoritative write fails.
                    if let Err(cleanup) = self.external.delete_task(id).await {
                        warn!(external_id = %id, error = %cleanup, "orphan cleanup failed");
                    }
                }
                Err(err.into())
            }
        }
    }

    /// Apply a patch internally, then mirror it out. The external write is
    /// best-effort; a failure there leaves the authoritative state intact
    /// and is only logged.
    pub async fn update_task(&self, id: i64, patch: TaskPatch) -> Result<(), SyncError> {
        let task = self
            .internal
            .get_task(id)
            .await?
            .ok_or(SyncError::TaskNotFound(id))?;

        self.internal.update_task(id, &patch).await?;

        let Some(external_id) = task.linked_external_id().map(String::from) else {
            return Ok(());
        };

        let assignees = match patch.assignee_id {
            Some(assignee) => self
                .mapper
                .resolve_reverse(assignee)
                .await
                .map(|ext| vec![ext]),
            None => None,
        };
        let external_patch = ExternalTaskPatch {
            name: patch.title.clone(),
            description: patch.description.clone(),
            status: patch.status.map(|s| status::to_external(s).to_string()),
            assignees,
            due_date: patch.deadline.map(|d| d.timestamp_millis()),
        };

        if let Err(err) = self.external.update_task(&external_id, &external_patch).await {
            warn!(task_id = id, external_id = %external_id, error = %err, "external mirror failed");
        }
        Ok(())
    }

    /// Delete a task from both systems. External deletion is best-effort.
    pub async fn delete_task(&self, id: i64) -> Result<(), SyncError> {
        let task = self.internal.get_task(id).await?;
        self.internal.delete_task(id).await?;

        if let Some(external_id) = task.as_ref().and_then(InternalTask::linked_external_id) {
            if let Err(err) = self.external.delete_task(external_id).await {
                warn!(task_id = id, external_id, error = %err, "external delete failed");
            } else {
                info!(task_id = id, external_id, "deleted task in both systems");
            }
        }
        Ok(())
    }

    /// Reconcile tags for an internal task. Unlinked tasks (placeholder or
    /// no external id) are a no-op; tags only exist externally.
    pub async fn sync_task_tags(&self, id: i64, desired: &[String]) -> Result<(), SyncError> {
        let task = self
            .internal
            .get_task(id)
            .await?
            .ok_or(SyncError::TaskNotFound(id))?;
        let Some(external_id) = task.linked_external_id().map(String::from) else {
            warn!(task_id = id, "task has no external link, skipping tag sync");
            return Ok(());
        };
        self.sync_tags(&external_id, desired).await
    }

    /// Reconcile the external task's tag set with the desired one, issuing
    /// exactly one add per missing tag and one remove per extra tag.
    pub async fn sync_tags(&self, external_id: &str, desired: &[String]) -> Result<(), SyncError> {
        let current = self.external.task_tags(external_id).await?;
        let current: HashSet<&str> = current.iter().map(String::as_str).collect();
        let desired: HashSet<&str> = desired.iter().map(String::as_str).collect();

        for tag in desired.difference(&current) {
            self.external.add_tag(external_id, tag).await?;
        }
        for tag in current.difference(&desired) {
            self.external.remove_tag(external_id, tag).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ClientError;
    use crate::models::{is_placeholder, ExternalStatus, ExternalTask, ExternalUser, InternalUser};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeInternal {
        tasks: Mutex<Vec<InternalTask>>,
        fail_create: AtomicBool,
        creates: Mutex<Vec<NewInternalTask>>,
        patches: Mutex<Vec<(i64, TaskPatch)>>,
        deletes: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl InternalApi for FakeInternal {
        async fn list_users(&self) -> Result<Vec<InternalUser>, ClientError> {
            Ok(vec![InternalUser {
                id: 7,
                email: None,
                name: None,
                username: None,
                external_id: Some("u-ext".into()),
            }])
        }
        async fn list_tasks(&self) -> Result<Vec<InternalTask>, ClientError> {
            Ok(self.tasks.lock().unwrap().clone())
        }
        async fn get_task(&self, id: i64) -> Result<Option<InternalTask>, ClientError> {
            Ok(self.tasks.lock().unwrap().iter().find(|t| t.id == id).cloned())
        }
        async fn find_task_by_external_id(
            &self,
            external_id: &str,
        ) -> Result<Option<InternalTask>, ClientError> {
            Ok(self
                .tasks
                .lock()
                .unwrap()
                .iter()
                .find(|t| t.external_id.as_deref() == Some(external_id))
                .cloned())
        }
        async fn create_task(&self, task: &NewInternalTask) -> Result<InternalTask, ClientError> {
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(ClientError::Status {
                    service: "internal backend",
                    status: 500,
                    body: "boom".into(),
                });
            }
            self.creates.lock().unwrap().push(task.clone());
            Ok(InternalTask {
                id: 1,
                external_id: Some(task.external_id.clone()),
                title: task.title.clone(),
                description: task.description.clone(),
                status: task.status,
                progress_percentage: task.progress_percentage,
                assignee_id: task.assignee_id,
                assigner_id: task.assigner_id,
                deadline: task.deadline,
                created_at: Utc::now(),
            })
        }
        async fn update_task(&self, id: i64, patch: &TaskPatch) -> Result<(), ClientError> {
            self.patches.lock().unwrap().push((id, patch.clone()));
            Ok(())
        }
        async fn delete_task(&self, id: i64) -> Result<(), ClientError> {
            self.deletes.lock().unwrap().push(id);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeExternal {
        fail_create: AtomicBool,
        tags: Mutex<Vec<String>>,
        creates: Mutex<Vec<NewExternalTask>>,
        updates: Mutex<Vec<(String, ExternalTaskPatch)>>,
        deletes: Mutex<Vec<String>>,
        tag_adds: Mutex<Vec<String>>,
        tag_removes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ExternalApi for FakeExternal {
        async fn team_roster(&self) -> Result<Vec<ExternalUser>, ClientError> {
            Ok(vec![])
        }
        async fn get_task(&self, _id: &str) -> Result<Option<ExternalTask>, ClientError> {
            Ok(None)
        }
        async fn create_task(&self, task: &NewExternalTask) -> Result<ExternalTask, ClientError> {
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(ClientError::Status {
                    service: "external service",
                    status: 503,
                    body: "down".into(),
                });
            }
            self.creates.lock().unwrap().push(task.clone());
            Ok(ExternalTask {
                id: "ext-1".into(),
                name: task.name.clone(),
                description: task.description.clone(),
                status: ExternalStatus {
                    status: Some(task.status.clone()),
                },
                due_date: None,
                url: None,
                assignees: vec![],
                tags: vec![],
            })
        }
        async fn update_task(
            &self,
            id: &str,
            patch: &ExternalTaskPatch,
        ) -> Result<(), ClientError> {
            self.updates.lock().unwrap().push((id.to_string(), patch.clone()));
            Ok(())
        }
        async fn delete_task(&self, id: &str) -> Result<(), ClientError> {
            self.deletes.lock().unwrap().push(id.to_string());
            Ok(())
        }
        async fn task_tags(&self, _id: &str) -> Result<Vec<String>, ClientError> {
            Ok(self.tags.lock().unwrap().clone())
        }
        async fn add_tag(&self, _id: &str, tag: &str) -> Result<(), ClientError> {
            self.tag_adds.lock().unwrap().push(tag.to_string());
            Ok(())
        }
        async fn remove_tag(&self, _id: &str, tag: &str) -> Result<(), ClientError> {
            self.tag_removes.lock().unwrap().push(tag.to_string());
            Ok(())
        }
    }

    fn sync(internal: Arc<FakeInternal>, external: Arc<FakeExternal>) -> OutboundSync {
        let mapper = Arc::new(IdentityMapper::new(
            internal.clone(),
            external.clone(),
            Duration::from_secs(600),
        ));
        OutboundSync::new(internal, external, mapper)
    }

    fn request(title: &str) -> CreateTaskRequest {
        CreateTaskRequest {
            title: title.into(),
            description: None,
            status: TaskStatus::Pending,
            assignee_id: None,
            assigner_id: None,
            deadline: None,
        }
    }

    #[tokio::test]
    async fn create_links_external_id_when_external_succeeds() {
        let internal = Arc::new(FakeInternal::default());
        let external = Arc::new(FakeExternal::default());
        let sync = sync(internal.clone(), external.clone());

        let task = sync.create_task(request("Ship it")).await.unwrap();

        assert_eq!(task.external_id.as_deref(), Some("ext-1"));
        assert_eq!(external.creates.lock().unwrap().len(), 1);
        assert_eq!(external.creates.lock().unwrap()[0].status, "to do");
    }

    #[tokio::test]
    async fn create_falls_back_to_placeholder_when_external_fails() {
        let internal = Arc::new(FakeInternal::default());
        let external = Arc::new(FakeExternal::default());
        external.fail_create.store(true, Ordering::SeqCst);
        let sync = sync(internal.clone(), external.clone());

        let task = sync.create_task(request("Ship it")).await.unwrap();

        assert!(is_placeholder(task.external_id.as_deref().unwrap()));
        assert!(external.deletes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_rolls_back_external_task_when_internal_fails() {
        let internal = Arc::new(FakeInternal::default());
        internal.fail_create.store(true, Ordering::SeqCst);
        let external = Arc::new(FakeExternal::default());
        let sync = sync(internal.clone(), external.clone());

        let err = sync.create_task(request("Ship it")).await.unwrap_err();

        assert!(matches!(err, SyncError::Client(_)));
        assert_eq!(*external.deletes.lock().unwrap(), vec!["ext-1"]);
    }

    #[tokio::test]
    async fn create_maps_assignee_to_external_identity() {
        let internal = Arc::new(FakeInternal::default());
        let external = Arc::new(FakeExternal::default());
        let sync = sync(internal.clone(), external.clone());

        let mut req = request("Ship it");
        req.assignee_id = Some(7);
        sync.create_task(req).await.unwrap();

        let creates = external.creates.lock().unwrap();
        assert_eq!(creates[0].assignees, Some(vec!["u-ext".to_string()]));
    }

    #[tokio::test]
    async fn update_mirrors_to_linked_external_task() {
        let internal = Arc::new(FakeInternal::default());
        internal.tasks.lock().unwrap().push(InternalTask {
            id: 3,
            external_id: Some("ext-3".into()),
            title: "t".into(),
            description: None,
            status: TaskStatus::Pending,
            progress_percentage: 0,
            assignee_id: None,
            assigner_id: None,
            deadline: None,
            created_at: Utc::now(),
        });
        let external = Arc::new(FakeExternal::default());
        let sync = sync(internal.clone(), external.clone());

        let patch = TaskPatch {
            status: Some(TaskStatus::Completed),
            progress_percentage: Some(100),
            ..Default::default()
        };
        sync.update_task(3, patch).await.unwrap();

        assert_eq!(internal.patches.lock().unwrap().len(), 1);
        let updates = external.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, "ext-3");
        assert_eq!(updates[0].1.status.as_deref(), Some("complete"));
    }

    #[tokio::test]
    async fn update_skips_external_for_placeholder_tasks() {
        let internal = Arc::new(FakeInternal::default());
        internal.tasks.lock().unwrap().push(InternalTask {
            id: 3,
            external_id: Some(placeholder_id()),
            title: "t".into(),
            description: None,
            status: TaskStatus::Pending,
            progress_percentage: 0,
            assignee_id: None,
            assigner_id: None,
            deadline: None,
            created_at: Utc::now(),
        });
        let external = Arc::new(FakeExternal::default());
        let sync = sync(internal.clone(), external.clone());

        sync.update_task(3, TaskPatch::default()).await.unwrap();

        assert_eq!(internal.patches.lock().unwrap().len(), 1);
        assert!(external.updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_of_missing_task_errors() {
        let internal = Arc::new(FakeInternal::default());
        let external = Arc::new(FakeExternal::default());
        let sync = sync(internal, external);

        let err = sync.update_task(99, TaskPatch::default()).await.unwrap_err();
        assert!(matches!(err, SyncError::TaskNotFound(99)));
    }

    #[tokio::test]
    async fn delete_removes_both_sides() {
        let internal = Arc::new(FakeInternal::default());
        internal.tasks.lock().unwrap().push(InternalTask {
            id: 5,
            external_id: Some("ext-5".into()),
            title: "t".into(),
            description: None,
            status: TaskStatus::Pending,
            progress_percentage: 0,
            assignee_id: None,
            assigner_id: None,
            deadline: None,
            created_at: Utc::now(),
        });
        let external = Arc::new(FakeExternal::default());
        let sync = sync(internal.clone(), external.clone());

        sync.delete_task(5).await.unwrap();

        assert_eq!(*internal.deletes.lock().unwrap(), vec![5]);
        assert_eq!(*external.deletes.lock().unwrap(), vec!["ext-5"]);
    }

    #[tokio::test]
    async fn tag_sync_issues_one_call_per_difference() {
        let internal = Arc::new(FakeInternal::default());
        let external = Arc::new(FakeExternal::default());
        *external.tags.lock().unwrap() = vec!["keep".into(), "drop".into()];
        let sync = sync(internal, external.clone());

        sync.sync_tags("ext-1", &["keep".into(), "new".into()])
            .await
            .unwrap();

        assert_eq!(*external.tag_adds.lock().unwrap(), vec!["new"]);
        assert_eq!(*external.tag_removes.lock().unwrap(), vec!["drop"]);
    }

    #[tokio::test]
    async fn tag_sync_with_equal_sets_makes_no_calls() {
        let internal = Arc::new(FakeInternal::default());
        let external = Arc::new(FakeExternal::default());
        *external.tags.lock().unwrap() = vec!["a".into(), "b".into()];
        let sync = sync(internal, external.clone());

        sync.sync_tags("ext-1", &["b".into(), "a".into()]).await.unwrap();

        assert!(external.tag_adds.lock().unwrap().is_empty());
        assert!(external.tag_removes.lock().unwrap().is_empty());
    }
}
