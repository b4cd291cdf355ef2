//! Cross-system identity mapping.
//!
//! Builds and caches a bidirectional correspondence between external-system
//! user ids and internal user ids from the two rosters. Mapping failures are
//! never fatal: lookups degrade to `None` and a failed rebuild keeps serving
//! the previous table.

pub mod matching;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::TtlCache;
use crate::clients::{ExternalApi, InternalApi};
use crate::errors::ClientError;
use crate::models::{ExternalUser, InternalUser};

/// The derived mapping, maintained as two synchronized tables built together
/// in one pass so reverse lookups never scan values.
#[derive(Debug, Default)]
pub struct MappingTable {
    forward: HashMap<String, i64>,
    reverse: HashMap<i64, String>,
    unmatched: Vec<String>,
}

impl MappingTable {
    /// Pair every external user with at most one internal user.
    ///
    /// Forward entries are unique per external id. When two external ids
    /// map to the same internal user the first one claims the reverse slot.
    pub fn build(externals: &[ExternalUser], internals: &[InternalUser]) -> Self {
        let mut table = MappingTable::default();

        for ext in externals {
            if ext.id.is_empty() {
                warn!("skipping roster entry with empty external id");
                continue;
            }
            match matching::find_match(ext, internals) {
                Some((internal, rule)) => {
                    debug!(
                        external_id = %ext.id,
                        internal_id = internal.id,
                        rule = ?rule,
                        "paired users"
                    );
                    table.forward.insert(ext.id.clone(), internal.id);
                    table.reverse.entry(internal.id).or_insert_with(|| ext.id.clone());
                }
                None => {
                    let label = ext
                        .email
                        .as_deref()
                        .or(ext.username.as_deref())
                        .unwrap_or("unknown");
                    table.unmatched.push(format!("{} ({})", ext.id, label));
                }
            }
        }

        if !table.unmatched.is_empty() {
            warn!(
                count = table.unmatched.len(),
                users = ?table.unmatched,
                "external users could not be mapped"
            );
        }
        info!(
            mapped = table.forward.len(),
            external = externals.len(),
            internal = internals.len(),
            "built identity mapping"
        );
        table
    }

    pub fn resolve(&self, external_id: &str) -> Option<i64> {
        self.forward.get(external_id).copied()
    }

    pub fn resolve_reverse(&self, internal_id: i64) -> Option<&str> {
        self.reverse.get(&internal_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn unmatched(&self) -> &[String] {
        &self.unmatched
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, i64)> {
        self.forward.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Diagnostic snapshot of the mapping state, served by the debug endpoints.
#[derive(Debug, Serialize)]
pub struct MappingReport {
    pub total_mappings: usize,
    pub cache_age_secs: Option<u64>,
    pub last_updated: Option<DateTime<Utc>>,
    pub unmatched_external: Vec<String>,
    pub mappings: Vec<MappingEntry>,
}

#[derive(Debug, Serialize)]
pub struct MappingEntry {
    pub external_id: String,
    pub internal_id: i64,
}

pub struct IdentityMapper {
    internal: Arc<dyn InternalApi>,
    external: Arc<dyn ExternalApi>,
    cache: TtlCache<MappingTable>,
}

impl IdentityMapper {
    pub fn new(
        internal: Arc<dyn InternalApi>,
        external: Arc<dyn ExternalApi>,
        ttl: Duration,
    ) -> Self {
        Self {
            internal,
            external,
            cache: TtlCache::new(ttl),
        }
    }

    /// Map an external user id to an internal one.
    ///
    /// Returns `None` for unmapped identities and for roster-fetch failures;
    /// callers proceed without the field rather than aborting.
    pub async fn resolve(&self, external_id: &str) -> Option<i64> {
        match self.table().await {
            Ok(table) => {
                let hit = table.resolve(external_id);
                if hit.is_none() {
                    warn!(external_id, "no identity mapping found");
                }
                hit
            }
            Err(err) => {
                warn!(error = %err, external_id, "identity mapping unavailable");
                None
            }
        }
    }

    /// Map an internal user id back to an external one.
    ///
    /// Falls back to the explicit backlink on the internal user record when
    /// the built table has no entry (the external user may have left the
    /// roster).
    pub async fn resolve_reverse(&self, internal_id: i64) -> Option<String> {
        match self.table().await {
            Ok(table) => {
                if let Some(id) = table.resolve_reverse(internal_id) {
                    return Some(id.to_string());
                }
            }
            Err(err) => {
                warn!(error = %err, internal_id, "identity mapping unavailable");
            }
        }

        match self.internal.list_users().await {
            Ok(users) => users
                .into_iter()
                .find(|u| u.id == internal_id)
                .and_then(|u| u.external_id),
            Err(err) => {
                warn!(error = %err, internal_id, "backlink lookup failed");
                None
            }
        }
    }

    pub async fn report(&self) -> MappingReport {
        let table = self.table().await.ok();
        let mut mappings: Vec<MappingEntry> = table
            .as_deref()
            .map(|t| {
                t.entries()
                    .map(|(external_id, internal_id)| MappingEntry {
                        external_id: external_id.to_string(),
                        internal_id,
                    })
                    .collect()
            })
            .unwrap_or_default();
        mappings.sort_by(|a, b| a.external_id.cmp(&b.external_id));

        MappingReport {
            total_mappings: mappings.len(),
            cache_age_secs: self.cache.age().await.map(|age| age.as_secs()),
            last_updated: self.cache.last_refresh().await,
            unmatched_external: table
                .as_deref()
                .map(|t| t.unmatched().to_vec())
                .unwrap_or_default(),
            mappings,
        }
    }

    /// Drop the cached table; the next lookup rebuilds from both rosters.
    pub async fn invalidate(&self) {
        self.cache.invalidate().await;
        info!("identity mapping cache cleared");
    }

    async fn table(&self) -> Result<Arc<MappingTable>, ClientError> {
        self.cache
            .get_or_build(|| async {
                let externals = self.external.team_roster().await?;
                let internals = self.internal.list_users().await?;
                Ok::<_, ClientError>(MappingTable::build(&externals, &internals))
            })
            .await
    }
}
