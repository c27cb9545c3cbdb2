//! Artifact cache.
//!
//! `TimelineCache` sits between orchestration and a raw [`ArtifactStore`]:
//! - reads never fail; a store error is logged and reported as a miss
//! - writes for the same id are serialized
//! - `update` re-reads the stored artifact under the id's lock, so
//!   concurrent writers (lazy image fill-in, annotations) never lose each
//!   other's changes
//! - an artifact whose write failed is held in memory until a later write
//!   of the same id succeeds, and reads prefer that copy

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::timeline::TimelineArtifact;
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Id-keyed, last-write-wins artifact persistence.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<TimelineArtifact>>;

    /// Insert or replace by `artifact.id`.
    async fn put(&self, artifact: &TimelineArtifact) -> Result<()>;

    /// Ok whether or not the id exists.
    async fn delete(&self, id: &str) -> Result<()>;

    async fn list_all(&self) -> Result<Vec<TimelineArtifact>>;

    /// Ids of every stored artifact.
    async fn list_ids(&self) -> Result<Vec<String>> {
        Ok(self.list_all().await?.into_iter().map(|a| a.id).collect())
    }
}

#[derive(Clone)]
pub struct TimelineCache {
    store: Arc<dyn ArtifactStore>,
    write_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    /// Latest state of artifacts the store failed to write
    unsaved: Arc<DashMap<String, TimelineArtifact>>,
}

impl TimelineCache {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            write_locks: Arc::new(DashMap::new()),
            unsaved: Arc::new(DashMap::new()),
        }
    }

    /// Cache over a process-local map.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    fn write_lock(&self, id: &str) -> Arc<Mutex<()>> {
        self.write_locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Cached artifact, or None on miss or store failure.
    pub async fn get(&self, id: &str) -> Option<TimelineArtifact> {
        if let Some(held) = self.unsaved.get(id) {
            return Some(held.value().clone());
        }
        match self.store.get(id).await {
            Ok(found) => found,
            Err(e) => {
                warn!(artifact_id = %id, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    /// Write through to the store. On failure the artifact is held in
    /// memory and the error returned.
    pub async fn put(&self, artifact: &TimelineArtifact) -> Result<()> {
        let lock = self.write_lock(&artifact.id);
        let _guard = lock.lock().await;
        self.write(artifact).await
    }

    async fn write(&self, artifact: &TimelineArtifact) -> Result<()> {
        match self.store.put(artifact).await {
            Ok(()) => {
                self.unsaved.remove(&artifact.id);
                debug!(artifact_id = %artifact.id, "Artifact persisted");
                Ok(())
            }
            Err(e) => {
                self.unsaved.insert(artifact.id.clone(), artifact.clone());
                Err(e)
            }
        }
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let lock = self.write_lock(id);
        let _guard = lock.lock().await;
        self.unsaved.remove(id);
        self.store.delete(id).await?;
        debug!(artifact_id = %id, "Artifact deleted");
        Ok(())
    }

    /// Every cached artifact; only held ones if the store cannot be read.
    pub async fn list_all(&self) -> Vec<TimelineArtifact> {
        let mut all = match self.store.list_all().await {
            Ok(all) => all,
            Err(e) => {
                warn!(error = %e, "Cache listing failed, treating as empty");
                Vec::new()
            }
        };
        all.retain(|a| !self.unsaved.contains_key(&a.id));
        all.extend(self.unsaved.iter().map(|a| a.value().clone()));
        all.sort_by_key(|a| a.created_at);
        all
    }

    /// Ids of every cached artifact, without loading payloads.
    pub async fn list_ids(&self) -> HashSet<String> {
        let mut ids: HashSet<String> = match self.store.list_ids().await {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                warn!(error = %e, "Cache listing failed, treating as empty");
                HashSet::new()
            }
        };
        ids.extend(self.unsaved.iter().map(|a| a.key().clone()));
        ids
    }

    /// Read-modify-write against the latest state.
    ///
    /// Returns Ok(None) without writing when the id is not cached. Unlike
    /// `get`, a read failure is returned: writing back a guess would
    /// overwrite whatever the store actually holds. A failed write keeps
    /// the change in memory and still returns it.
    pub async fn update<R, F>(
        &self,
        id: &str,
        mutate: F,
    ) -> Result<Option<(TimelineArtifact, R)>>
    where
        F: FnOnce(&mut TimelineArtifact) -> R + Send,
    {
        let lock = self.write_lock(id);
        let _guard = lock.lock().await;

        let held = self.unsaved.get(id).map(|a| a.value().clone());
        let current = match held {
            Some(artifact) => Some(artifact),
            None => self.store.get(id).await?,
        };
        let Some(mut artifact) = current else {
            return Ok(None);
        };
        let outcome = mutate(&mut artifact);
        if let Err(e) = self.write(&artifact).await {
            warn!(
                artifact_id = %id,
                error = %e,
                "Cache write failed, holding update in memory"
            );
        }
        Ok(Some((artifact, outcome)))
    }
}
