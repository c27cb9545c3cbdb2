//! Per-entity generation state machine.
//!
//! A run moves `identifying → planning → visualizing → narrating → ready`
//! (identifying only for uploaded photos) and produces a persisted
//! [`TimelineArtifact`]. Runs for the same id are serialized, and a cached
//! artifact short-circuits the run without any remote call, so an id is
//! generated at most once unless explicitly refreshed.

pub mod status;

pub use status::{GenerationStage, GenerationStatus, StatusReporter};

use crate::cache::TimelineCache;
use crate::catalog::CatalogEntry;
use crate::config::PipelineConfig;
use crate::resilience::{FailureKind, RemoteError, ResilientCall};
use crate::service::{GenerationService, PlannedEvent};
use crate::timeline::{
    validate_plan, Citation, ImageData, PlanValidationError, TimelineArtifact, TimelineEvent,
};
use chrono::Utc;
use dashmap::DashMap;
use status::{PROGRESS_IDENTIFIED, PROGRESS_PLANNED, PROGRESS_READY, PROGRESS_VISUALIZED};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

/// What a run starts from.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationInput {
    /// Uploaded photo; the subject is identified first
    Image { image: ImageData },
    /// Catalog landmark with a known name
    Preset { name: String, location: String },
    /// Approved voice research; planned from the report
    Research {
        topic: String,
        report: String,
        /// Scene descriptions from the research, by event index
        image_prompts: Vec<String>,
        sources: Vec<Citation>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Artifact id and cache key
    pub id: String,
    pub input: GenerationInput,
    /// Skip the cache lookup (refresh)
    pub bypass_cache: bool,
}

impl GenerationRequest {
    pub fn preset(entry: &CatalogEntry) -> Self {
        Self {
            id: entry.id.clone(),
            input: GenerationInput::Preset {
                name: entry.name.clone(),
                location: entry.location.clone(),
            },
            bypass_cache: false,
        }
    }

    /// User upload under a fresh id.
    pub fn image(image: ImageData) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            input: GenerationInput::Image { image },
            bypass_cache: false,
        }
    }

    pub fn research(
        topic: String,
        report: String,
        image_prompts: Vec<String>,
        sources: Vec<Citation>,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            input: GenerationInput::Research {
                topic,
                report,
                image_prompts,
                sources,
            },
            bypass_cache: false,
        }
    }

    pub fn is_user_submitted(&self) -> bool {
        !matches!(self.input, GenerationInput::Preset { .. })
    }
}

/// Why a run ended in `error`.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Key missing or invalid, or quota exhausted; the user must supply credentials
    Credential(RemoteError),
    /// Any other remote failure, after retries
    Remote { error: RemoteError, kind: FailureKind },
    /// The planner's answer cannot be used
    InvalidPlan(PlanValidationError),
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::Credential(_) => FailureKind::Credential,
            PipelineError::Remote { kind, .. } => *kind,
            PipelineError::InvalidPlan(_) => FailureKind::Fatal,
        }
    }

    pub fn is_credential(&self) -> bool {
        self.kind() == FailureKind::Credential
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Remote messages are surfaced verbatim
            PipelineError::Credential(e) => write!(f, "{}", e),
            PipelineError::Remote { error, .. } => write!(f, "{}", error),
            PipelineError::InvalidPlan(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for PipelineError {}

#[derive(Clone)]
pub struct GenerationPipeline {
    service: Arc<dyn GenerationService>,
    cache: TimelineCache,
    resilient: ResilientCall,
    config: PipelineConfig,
    run_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl GenerationPipeline {
    pub fn new(
        service: Arc<dyn GenerationService>,
        cache: TimelineCache,
        resilient: ResilientCall,
        config: PipelineConfig,
    ) -> Self {
        Self {
            service,
            cache,
            resilient,
            config,
            run_locks: Arc::new(DashMap::new()),
        }
    }

    pub fn cache(&self) -> &TimelineCache {
        &self.cache
    }

    pub fn service(&self) -> &Arc<dyn GenerationService> {
        &self.service
    }

    pub fn resilient(&self) -> &ResilientCall {
        &self.resilient
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn run_lock(&self, id: &str) -> Arc<Mutex<()>> {
        self.run_locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Cached artifact, including one whose write failed earlier.
    pub async fn cached(&self, id: &str) -> Option<TimelineArtifact> {
        self.cache.get(id).await
    }

    /// Drive one request to a ready artifact.
    ///
    /// Waits for any in-flight run of the same id, then returns the cached
    /// artifact if there is one (unless `bypass_cache`).
    pub async fn run(
        &self,
        request: GenerationRequest,
        reporter: &StatusReporter,
    ) -> Result<TimelineArtifact, PipelineError> {
        let lock = self.run_lock(&request.id);
        let _guard = lock.lock().await;
        self.run_locked(request, reporter).await
    }

    /// Delete the id's cached artifact and generate it again.
    pub async fn refresh(
        &self,
        mut request: GenerationRequest,
        reporter: &StatusReporter,
    ) -> Result<TimelineArtifact, PipelineError> {
        let lock = self.run_lock(&request.id);
        let _guard = lock.lock().await;
        self.forget(&request.id).await;
        request.bypass_cache = true;
        self.run_locked(request, reporter).await
    }

    /// Drop the id from the cache and from memory. Waits for an in-flight run.
    pub async fn invalidate(&self, id: &str) {
        let lock = self.run_lock(id);
        let _guard = lock.lock().await;
        self.forget(id).await;
    }

    async fn forget(&self, id: &str) {
        if let Err(e) = self.cache.delete(id).await {
            warn!(artifact_id = %id, error = %e, "Failed to delete cached artifact");
        }
    }

    async fn run_locked(
        &self,
        request: GenerationRequest,
        reporter: &StatusReporter,
    ) -> Result<TimelineArtifact, PipelineError> {
        if !request.bypass_cache {
            if let Some(artifact) = self.cached(&request.id).await {
                info!(artifact_id = %request.id, "Cache hit, skipping generation");
                reporter.report(GenerationStage::Ready, PROGRESS_READY, "Loaded from cache");
                return Ok(artifact);
            }
        }

        match self.generate(&request, reporter).await {
            Ok(artifact) => Ok(artifact),
            Err(e) => {
                warn!(
                    artifact_id = %request.id,
                    kind = ?e.kind(),
                    error = %e,
                    "Generation failed"
                );
                reporter.fail(e.to_string(), e.kind());
                Err(e)
            }
        }
    }

    fn remote_failure(&self, error: RemoteError) -> PipelineError {
        match self.resilient.classifier().classify(&error) {
            FailureKind::Credential => PipelineError::Credential(error),
            kind => PipelineError::Remote { error, kind },
        }
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        reporter: &StatusReporter,
    ) -> Result<TimelineArtifact, PipelineError> {
        let id = request.id.as_str();
        info!(artifact_id = %id, "Starting generation");

        // Identify
        let (name, location, source_image) = match &request.input {
            GenerationInput::Image { image } => {
                reporter.report(GenerationStage::Identifying, 5, "Identifying landmark");
                let found = self
                    .resilient
                    .execute("identify", || self.service.identify(image))
                    .await
                    .map_err(|e| self.remote_failure(e))?;
                (found.name, found.location, Some(image.clone()))
            }
            GenerationInput::Preset { name, location } => (name.clone(), location.clone(), None),
            GenerationInput::Research { topic, .. } => {
                (topic.clone(), "Research".to_string(), None)
            }
        };

        // Plan
        reporter.report(
            GenerationStage::Planning,
            PROGRESS_IDENTIFIED,
            format!("Researching the history of {}", name),
        );
        let (planned, sources): (Vec<PlannedEvent>, Vec<Citation>) = match &request.input {
            GenerationInput::Research {
                topic,
                report,
                image_prompts,
                sources,
            } => {
                let mut events = self
                    .resilient
                    .execute("plan_timeline_from_report", || {
                        self.service.plan_timeline_from_report(topic, report)
                    })
                    .await
                    .map_err(|e| self.remote_failure(e))?;
                apply_image_prompts(&mut events, image_prompts);
                (events, sources.clone())
            }
            _ => {
                let plan = self
                    .resilient
                    .execute("plan_timeline", || {
                        self.service.plan_timeline(&name, &location)
                    })
                    .await
                    .map_err(|e| self.remote_failure(e))?;
                (plan.events, plan.sources)
            }
        };
        validate_plan(&planned, self.config.event_count).map_err(PipelineError::InvalidPlan)?;

        let mut timeline: Vec<TimelineEvent> = planned
            .into_iter()
            .map(|p| TimelineEvent::from_plan(p, self.config.panoramic))
            .collect();

        // Visualize the first era and narrate, concurrently
        reporter.report(
            GenerationStage::Visualizing,
            PROGRESS_PLANNED,
            "Rendering the first era and composing narration",
        );
        let first_prompt = timeline[0].visual_prompt.clone();
        let reference = source_image.as_ref();
        let render = async {
            let image = self
                .resilient
                .execute("render_image", || {
                    self.service.render_image(&first_prompt, &name, reference)
                })
                .await;
            if image.is_ok() {
                reporter.report(
                    GenerationStage::Narrating,
                    PROGRESS_VISUALIZED,
                    "Recording narration",
                );
            }
            image
        };
        let narrate = self
            .resilient
            .execute("synthesize_narration", || {
                self.service.synthesize_narration(&name, &timeline)
            });
        let (image, narration) = tokio::join!(render, narrate);

        let image = image.map_err(|e| self.remote_failure(e))?;
        let narration_audio = match narration {
            Ok(audio) => Some(audio),
            Err(e) if !self.config.narration_required => {
                warn!(artifact_id = %id, error = %e, "Narration failed, continuing without audio");
                None
            }
            Err(e) => return Err(self.remote_failure(e)),
        };

        // Persist
        timeline[0].attach_image(image);
        let artifact = TimelineArtifact {
            id: id.to_string(),
            subject_name: name,
            subject_location: location,
            source_image,
            timeline,
            narration_audio,
            sources,
            annotations: Vec::new(),
            is_user_submitted: request.is_user_submitted(),
            created_at: Utc::now(),
        };

        if let Err(e) = self.cache.put(&artifact).await {
            error!(
                artifact_id = %id,
                error = %e,
                "Failed to persist artifact, holding it in memory"
            );
        }

        info!(
            artifact_id = %id,
            subject = %artifact.subject_name,
            events = artifact.event_count(),
            "Generation complete"
        );
        reporter.report(GenerationStage::Ready, PROGRESS_READY, "Journey ready");
        Ok(artifact)
    }
}

/// Non-blank research scene descriptions replace the planner's, by index.
fn apply_image_prompts(events: &mut [PlannedEvent], prompts: &[String]) {
    for (event, prompt) in events.iter_mut().zip(prompts) {
        if !prompt.trim().is_empty() {
            event.visual_prompt = prompt.clone();
        }
    }
}
