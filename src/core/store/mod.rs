//! Bounded, concurrent map of in-progress and finished workflow results.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, warn};

use crate::core::workflow::types::WorkflowResult;

const SHARDS: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("result archive write failed: {0}")]
    Archive(String),
    #[error("workflow store lock poisoned")]
    Poisoned,
}

/// Durable sink for terminal results.
#[async_trait]
pub trait ResultArchive: Send + Sync {
    async fn archive(&self, result: &WorkflowResult) -> anyhow::Result<()>;
}

type EvictionKey = (DateTime<Utc>, u64, String);

#[derive(Default)]
struct EvictionIndex {
    order: BTreeSet<EvictionKey>,
    keys: HashMap<String, EvictionKey>,
}

pub struct WorkflowStore {
    shards: Vec<RwLock<HashMap<String, WorkflowResult>>>,
    index: Mutex<EvictionIndex>,
    max_resident: usize,
    seq: AtomicU64,
    archive: Option<Arc<dyn ResultArchive>>,
}

impl WorkflowStore {
    pub fn new(max_resident: usize) -> Self {
        Self {
            shards: (0..SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
            index: Mutex::new(EvictionIndex::default()),
            max_resident: max_resident.max(1),
            seq: AtomicU64::new(0),
            archive: None,
        }
    }

    pub fn with_archive(mut self, archive: Arc<dyn ResultArchive>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn capacity(&self) -> usize {
        self.max_resident
    }

    fn shard(&self, workflow_id: &str) -> &RwLock<HashMap<String, WorkflowResult>> {
        let mut hasher = DefaultHasher::new();
        workflow_id.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    /// Insert or update a result. Terminal results are written through to the
    /// archive when one is attached; the in-memory copy is kept either way.
    pub async fn put(&self, result: WorkflowResult) -> Result<(), StoreError> {
        let terminal = result.status.is_terminal();
        let archived = if terminal && self.archive.is_some() {
            Some(result.clone())
        } else {
            None
        };
        self.put_resident(result)?;

        if let (Some(archive), Some(result)) = (&self.archive, archived) {
            archive.archive(&result).await.map_err(|e| {
                warn!(workflow_id = %result.workflow_id, "Archiving workflow result failed: {:#}", e);
                StoreError::Archive(crate::core::error::redact(&format!("{:#}", e)))
            })?;
        }
        Ok(())
    }

    /// Update the in-memory copy only.
    pub fn put_resident(&self, result: WorkflowResult) -> Result<(), StoreError> {
        let mut guard = self.index.lock().map_err(|_| StoreError::Poisoned)?;
        let index = &mut *guard;
        let id = result.workflow_id.clone();

        let needs_key = match index.keys.get(&id) {
            Some(key) if key.0 == result.started_at => false,
            Some(stale) => {
                index.order.remove(stale);
                true
            }
            None => true,
        };
        if needs_key {
            let key = (
                result.started_at,
                self.seq.fetch_add(1, Ordering::Relaxed),
                id.clone(),
            );
            index.order.insert(key.clone());
            index.keys.insert(id.clone(), key);
        }

        self.shard(&id)
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .insert(id, result);

        while index.order.len() > self.max_resident {
            let Some(oldest) = index.order.pop_first() else {
                break;
            };
            index.keys.remove(&oldest.2);
            self.shard(&oldest.2)
                .write()
                .map_err(|_| StoreError::Poisoned)?
                .remove(&oldest.2);
            debug!(workflow_id = %oldest.2, "Evicted workflow result");
        }
        Ok(())
    }

    pub fn get(&self, workflow_id: &str) -> Option<WorkflowResult> {
        self.shard(workflow_id)
            .read()
            .ok()
            .and_then(|shard| shard.get(workflow_id).cloned())
    }

    /// Resident results for an owner, oldest first.
    pub fn list_by_owner(&self, owner_id: &str) -> Vec<WorkflowResult> {
        let mut out: Vec<WorkflowResult> = self
            .shards
            .iter()
            .filter_map(|s| s.read().ok())
            .flat_map(|shard| {
                shard
                    .values()
                    .filter(|r| r.owner_id == owner_id)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        out.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.workflow_id.cmp(&b.workflow_id))
        });
        out
    }

    pub fn purge(&self, workflow_id: &str) -> bool {
        let Ok(mut index) = self.index.lock() else {
            return false;
        };
        if let Some(key) = index.keys.remove(workflow_id) {
            index.order.remove(&key);
        }
        self.shard(workflow_id)
            .write()
            .map(|mut shard| shard.remove(workflow_id).is_some())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.index.lock().map(|i| i.keys.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
