//! Cached view of external tags for the tasks the dashboard shows.
//!
//! Tags only exist on the external side, and fetching them is one request
//! per task, so the whole map is built in bounded parallel bursts and kept
//! behind a TTL cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::cache::TtlCache;
use crate::clients::{ExternalApi, InternalApi};
use crate::errors::ClientError;

/// Hard cap on how many tasks get a tag lookup per rebuild. Anything past
/// this shows without tags rather than hammering the external API.
const MAX_TASKS_PER_REBUILD: usize = 150;

pub struct TagSync {
    internal: Arc<dyn InternalApi>,
    external: Arc<dyn ExternalApi>,
    cache: TtlCache<HashMap<String, Vec<String>>>,
    concurrency: usize,
}

impl TagSync {
    pub fn new(
        internal: Arc<dyn InternalApi>,
        external: Arc<dyn ExternalApi>,
        ttl: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            internal,
            external,
            cache: TtlCache::new(ttl),
            concurrency: concurrency.max(1),
        }
    }

    /// Tag map keyed by external task id, rebuilt when stale.
    ///
    /// Tasks whose tag fetch fails are simply absent from the map; one slow
    /// or broken task must not block the rest.
    pub async fn snapshot(&self) -> Result<Arc<HashMap<String, Vec<String>>>, ClientError> {
        self.cache.get_or_build(|| self.build()).await
    }

    pub async fn invalidate(&self) {
        self.cache.invalidate().await;
    }

    async fn build(&self) -> Result<HashMap<String, Vec<String>>, ClientError> {
        let tasks = self.internal.list_tasks().await?;
        let ids: Vec<String> = tasks
            .iter()
            .filter_map(|t| t.linked_external_id())
            .map(String::from)
            .take(MAX_TASKS_PER_REBUILD)
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let fetches = ids.into_iter().map(|id| {
            let semaphore = Arc::clone(&semaphore);
            let external = Arc::clone(&self.external);
            async move {
                // Never closed; the semaphore outlives the join below.
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                match external.task_tags(&id).await {
                    Ok(tags) => Some((id, tags)),
                    Err(err) => {
                        warn!(external_id = %id, error = %err, "tag fetch failed");
                        None
                    }
                }
            }
        });

        let map: HashMap<String, Vec<String>> =
            join_all(fetches).await.into_iter().flatten().collect();
        debug!(tasks = map.len(), "rebuilt tag map");
        Ok(map)
    }
}
