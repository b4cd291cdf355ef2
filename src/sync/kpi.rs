//! Per-assignee KPI aggregation over the internal task set, enriched with
//! tag usage from the cached external tag map.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::cache::TtlCache;
use crate::clients::InternalApi;
use crate::errors::ClientError;
use crate::models::{InternalTask, TaskStatus};
use crate::sync::TagSync;

#[derive(Debug, Clone, Serialize)]
pub struct AssigneeKpi {
    pub assignee_id: Option<i64>,
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    /// Mean progress percentage across the assignee's tasks.
    pub avg_progress: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TagUsage {
    pub name: String,
    pub tasks: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct KpiReport {
    pub generated_at: DateTime<Utc>,
    pub task_count: usize,
    pub assignees: Vec<AssigneeKpi>,
    /// How many tasks carry each external tag, most used first.
    pub tag_usage: Vec<TagUsage>,
}

impl KpiReport {
    /// Aggregate tasks per assignee. Unassigned tasks land in one bucket
    /// with `assignee_id: null`, sorted first.
    pub fn from_tasks(tasks: &[InternalTask], tag_map: &HashMap<String, Vec<String>>) -> Self {
        let mut buckets: BTreeMap<Option<i64>, Vec<&InternalTask>> = BTreeMap::new();
        for task in tasks {
            buckets.entry(task.assignee_id).or_default().push(task);
        }

        let assignees = buckets
            .into_iter()
            .map(|(assignee_id, tasks)| {
                let count = |status: TaskStatus| {
                    tasks.iter().filter(|t| t.status == status).count()
                };
                let progress_sum: u64 =
                    tasks.iter().map(|t| u64::from(t.progress_percentage)).sum();
                AssigneeKpi {
                    assignee_id,
                    total: tasks.len(),
                    pending: count(TaskStatus::Pending),
                    in_progress: count(TaskStatus::InProgress),
                    completed: count(TaskStatus::Completed),
                    avg_progress: progress_sum as f64 / tasks.len() as f64,
                }
            })
            .collect();

        let mut tag_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for tags in tag_map.values() {
            for tag in tags {
                *tag_counts.entry(tag).or_default() += 1;
            }
        }
        let mut tag_usage: Vec<TagUsage> = tag_counts
            .into_iter()
            .map(|(name, tasks)| TagUsage {
                name: name.to_string(),
                tasks,
            })
            .collect();
        tag_usage.sort_by(|a, b| b.tasks.cmp(&a.tasks).then(a.name.cmp(&b.name)));

        Self {
            generated_at: Utc::now(),
            task_count: tasks.len(),
            assignees,
            tag_usage,
        }
    }
}

/// Serves KPI snapshots from a TTL cache so dashboard polling does not turn
/// into a task-list fetch per page load.
pub struct KpiBoard {
    internal: Arc<dyn InternalApi>,
    tags: Arc<TagSync>,
    cache: TtlCache<KpiReport>,
}

impl KpiBoard {
    pub fn new(internal: Arc<dyn InternalApi>, tags: Arc<TagSync>, ttl: Duration) -> Self {
        Self {
            internal,
            tags,
            cache: TtlCache::new(ttl),
        }
    }

    pub async fn report(&self) -> Result<Arc<KpiReport>, ClientError> {
        self.cache
            .get_or_build(|| async {
                let tasks = self.internal.list_tasks().await?;
                // Tag data is cosmetic here; a broken tag fetch must not
                // take the KPI view down with it.
                let tag_map = match self.tags.snapshot().await {
                    Ok(map) => map,
                    Err(err) => {
                        warn!(error = %err, "tag map unavailable for kpi report");
                        Arc::new(HashMap::new())
                    }
                };
                Ok::<_, ClientError>(KpiReport::from_tasks(&tasks, &tag_map))
            })
            .await
    }

    pub async fn invalidate(&self) {
        self.cache.invalidate().await;
    }
}
