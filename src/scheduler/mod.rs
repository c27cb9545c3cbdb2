use crate::catalog::CatalogEntry;
use crate::pipeline::{GenerationPipeline, GenerationRequest, PipelineError, StatusReporter};
use crate::timeline::TimelineArtifact;
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

/// Fleet-level status of one catalog entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    /// Not generated; a failed attempt returns here and may be retried
    Idle,
    Loading,
    Ready,
}

/// Broadcast whenever an entity changes status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusChange {
    pub id: String,
    pub status: EntityStatus,
}

/// Outcome counts of one `start` sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PregenerationSummary {
    pub already_cached: usize,
    pub generated: usize,
    pub failed: usize,
    /// Entities some other run was already handling
    pub skipped: usize,
}

enum Attempt {
    Generated,
    Failed,
    Skipped,
}

/// Pregenerates every catalog entity that is not cached yet.
///
/// Holds the per-entity status map for the UI. An entity is never driven by
/// two runs at once: background sweeps claim it with an `Idle → Loading`
/// transition, and explicit `generate`/`refresh` calls queue behind whatever
/// run holds the entity's lock.
#[derive(Clone)]
pub struct PregenerationScheduler {
    pipeline: GenerationPipeline,
    catalog: Arc<Vec<CatalogEntry>>,
    statuses: Arc<DashMap<String, EntityStatus>>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    status_tx: broadcast::Sender<StatusChange>,
}

impl PregenerationScheduler {
    pub fn new(pipeline: GenerationPipeline, catalog: Vec<CatalogEntry>) -> Self {
        let statuses = DashMap::new();
        for entry in &catalog {
            statuses.insert(entry.id.clone(), EntityStatus::Idle);
        }
        let (status_tx, _) = broadcast::channel(100);

        Self {
            pipeline,
            catalog: Arc::new(catalog),
            statuses: Arc::new(statuses),
            locks: Arc::new(DashMap::new()),
            status_tx,
        }
    }

    pub fn pipeline(&self) -> &GenerationPipeline {
        &self.pipeline
    }

    pub fn catalog(&self) -> &[CatalogEntry] {
        &self.catalog
    }

    pub fn entry(&self, id: &str) -> Option<&CatalogEntry> {
        crate::catalog::find(&self.catalog, id)
    }

    pub fn status(&self, id: &str) -> EntityStatus {
        self.statuses
            .get(id)
            .map(|s| *s.value())
            .unwrap_or(EntityStatus::Idle)
    }

    /// Catalog in order, with current statuses.
    pub fn snapshot(&self) -> Vec<(CatalogEntry, EntityStatus)> {
        self.catalog
            .iter()
            .map(|e| (e.clone(), self.status(&e.id)))
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.status_tx.subscribe()
    }

    fn set_status(&self, id: &str, status: EntityStatus) {
        self.statuses.insert(id.to_string(), status);
        // No subscribers is fine
        let _ = self.status_tx.send(StatusChange {
            id: id.to_string(),
            status,
        });
    }

    /// Idle → Loading, atomically. False if the entity is already loading or ready.
    fn claim(&self, id: &str) -> bool {
        let mut status = self
            .statuses
            .entry(id.to_string())
            .or_insert(EntityStatus::Idle);
        if *status != EntityStatus::Idle {
            return false;
        }
        *status = EntityStatus::Loading;
        true
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Read the cache once, mark cached entities ready, and generate the rest
    /// concurrently. Returns when every launched run has settled; one
    /// failure never cancels or delays the others.
    pub async fn start(&self) -> PregenerationSummary {
        let cached = self.pipeline.cache().list_ids().await;

        let mut summary = PregenerationSummary::default();
        let mut pending = Vec::new();
        for entry in self.catalog.iter() {
            if cached.contains(&entry.id) {
                self.set_status(&entry.id, EntityStatus::Ready);
                summary.already_cached += 1;
            } else {
                pending.push(entry.clone());
            }
        }

        info!(
            cached = summary.already_cached,
            pending = pending.len(),
            "Starting pregeneration"
        );

        let attempts = join_all(pending.iter().map(|entry| self.pregenerate(entry))).await;
        for attempt in attempts {
            match attempt {
                Attempt::Generated => summary.generated += 1,
                Attempt::Failed => summary.failed += 1,
                Attempt::Skipped => summary.skipped += 1,
            }
        }

        info!(
            generated = summary.generated,
            failed = summary.failed,
            skipped = summary.skipped,
            "Pregeneration finished"
        );
        summary
    }

    async fn pregenerate(&self, entry: &CatalogEntry) -> Attempt {
        if !self.claim(&entry.id) {
            return Attempt::Skipped;
        }
        let _ = self.status_tx.send(StatusChange {
            id: entry.id.clone(),
            status: EntityStatus::Loading,
        });

        let lock = self.lock_for(&entry.id);
        let _guard = lock.lock().await;

        match self
            .pipeline
            .run(GenerationRequest::preset(entry), &StatusReporter::silent())
            .await
        {
            Ok(_) => {
                self.set_status(&entry.id, EntityStatus::Ready);
                Attempt::Generated
            }
            Err(e) => {
                // Background failures stay out of the user's way
                warn!(entity_id = %entry.id, error = %e, "Pregeneration failed");
                self.set_status(&entry.id, EntityStatus::Idle);
                Attempt::Failed
            }
        }
    }

    /// Generate (or load) one preset on the user's behalf.
    pub async fn generate(
        &self,
        entry: &CatalogEntry,
        reporter: &StatusReporter,
    ) -> Result<TimelineArtifact, PipelineError> {
        self.drive(entry, reporter, false).await
    }

    /// Delete the preset's artifact and regenerate it alone.
    pub async fn refresh(
        &self,
        entry: &CatalogEntry,
        reporter: &StatusReporter,
    ) -> Result<TimelineArtifact, PipelineError> {
        self.drive(entry, reporter, true).await
    }

    /// Delete an artifact. Catalog entities drop back to Idle.
    pub async fn invalidate(&self, id: &str) {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        self.pipeline.invalidate(id).await;
        if self.entry(id).is_some() {
            self.set_status(id, EntityStatus::Idle);
        }
    }

    async fn drive(
        &self,
        entry: &CatalogEntry,
        reporter: &StatusReporter,
        refresh: bool,
    ) -> Result<TimelineArtifact, PipelineError> {
        let lock = self.lock_for(&entry.id);
        let _guard = lock.lock().await;

        self.set_status(&entry.id, EntityStatus::Loading);
        let request = GenerationRequest::preset(entry);
        let result = if refresh {
            info!(entity_id = %entry.id, "Refreshing preset");
            self.pipeline.refresh(request, reporter).await
        } else {
            self.pipeline.run(request, reporter).await
        };

        let status = if result.is_ok() {
            EntityStatus::Ready
        } else {
            EntityStatus::Idle
        };
        self.set_status(&entry.id, status);
        result
    }
}
