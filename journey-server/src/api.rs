//! Journey HTTP API.
//!
//! Routes:
//! - `GET /api/catalog` preset landmarks with their pregeneration status
//! - `POST /api/journeys` start a journey from a preset, a photo or a voice request
//! - `GET /api/journeys` summaries of every cached journey
//! - `GET /api/journeys/:id` full artifact
//! - `GET /api/journeys/:id/status` latest status of the journey's run
//! - `POST /api/journeys/:id/refresh` regenerate from scratch
//! - `DELETE /api/journeys/:id`
//! - `POST /api/journeys/:id/scrub` feed a scrub position, generating visible eras
//! - `POST /api/journeys/:id/annotations` add a visitor contribution
//! - `GET /api/journeys/:id/narration` decoded narration metadata
//! - `GET|PUT /api/credentials` API key presence / setup

use crate::jobs::JobRegistry;
use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chronolens::annotations::{AnnotationError, Annotations};
use chronolens::audio::{AudioDecoder, DecodeStrategy};
use chronolens::config::{LazyConfig, SharedRuntimeConfig};
use chronolens::lazy::LazyVisualResolver;
use chronolens::pipeline::{GenerationStage, GenerationStatus};
use chronolens::research::{ResearchDecision, ResearchIntake};
use chronolens::resilience::{FailureKind, RemoteError};
use chronolens::scheduler::{EntityStatus, PregenerationScheduler};
use chronolens::timeline::{Annotation, ImageData};
use chronolens::{GenerationInput, GenerationPipeline, GenerationRequest, TimelineArtifact};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

/// Uploaded photos and recordings arrive base64-encoded in JSON bodies.
pub const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Shared state for the journey API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub pipeline: GenerationPipeline,
    pub scheduler: PregenerationScheduler,
    pub annotations: Arc<Annotations>,
    pub research: Arc<ResearchIntake>,
    pub jobs: JobRegistry,
    pub resolvers: Arc<DashMap<String, Arc<LazyVisualResolver>>>,
    pub runtime: SharedRuntimeConfig,
    pub lazy: LazyConfig,
    /// Re-run the pregeneration sweep after credentials are set
    pub pregeneration: bool,
}

impl ApiState {
    pub fn new(
        scheduler: PregenerationScheduler,
        runtime: SharedRuntimeConfig,
        lazy: LazyConfig,
        pregeneration: bool,
    ) -> Self {
        let pipeline = scheduler.pipeline().clone();
        let service = pipeline.service().clone();
        let resilient = pipeline.resilient().clone();
        Self {
            annotations: Arc::new(Annotations::new(
                service.clone(),
                resilient.clone(),
                pipeline.cache().clone(),
            )),
            research: Arc::new(ResearchIntake::new(service, resilient)),
            pipeline,
            scheduler,
            jobs: JobRegistry::new(),
            resolvers: Arc::new(DashMap::new()),
            runtime,
            lazy,
            pregeneration,
        }
    }
}

/// Request body for `POST /api/journeys`.
#[derive(Debug, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum CreateJourneyRequest {
    Preset {
        id: String,
    },
    Image {
        #[serde(rename = "mimeType")]
        mime_type: String,
        /// Base64 image bytes
        data: String,
    },
    Research {
        /// Base64 recording of the spoken request
        audio: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JourneyAccepted {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub id: String,
    pub name: String,
    pub location: String,
    pub status: EntityStatus,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JourneySummary {
    pub id: String,
    pub subject_name: String,
    pub subject_location: String,
    pub is_user_submitted: bool,
    pub created_at: DateTime<Utc>,
    pub event_count: usize,
    pub generated_count: usize,
}

impl From<&TimelineArtifact> for JourneySummary {
    fn from(artifact: &TimelineArtifact) -> Self {
        Self {
            id: artifact.id.clone(),
            subject_name: artifact.subject_name.clone(),
            subject_location: artifact.subject_location.clone(),
            is_user_submitted: artifact.is_user_submitted,
            created_at: artifact.created_at,
            event_count: artifact.event_count(),
            generated_count: artifact.timeline.iter().filter(|e| e.generated).count(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ScrubRequest {
    pub position: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScrubResponse {
    /// Eras whose generation started with this position
    pub triggered: Vec<usize>,
    pub pending: Vec<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddAnnotationRequest {
    pub event_index: usize,
    pub content: String,
    #[serde(default)]
    pub is_audio: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrationInfo {
    pub channels: usize,
    pub sample_rate: u32,
    pub frames: usize,
    pub duration_seconds: f64,
    pub strategy: DecodeStrategy,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CredentialStatus {
    pub configured: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetCredentialsRequest {
    pub api_key: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// ---------------------------------------------------------------------------
// Business logic (called from HTTP handlers and unit tests)
// ---------------------------------------------------------------------------

/// Run a request in the background, tracking its status under its id.
fn spawn_run(state: &ApiState, request: GenerationRequest, refresh: bool) {
    let reporter = state.jobs.start(&request.id);
    let pipeline = state.pipeline.clone();
    tokio::spawn(async move {
        let id = request.id.clone();
        let result = if refresh {
            pipeline.refresh(request, &reporter).await
        } else {
            pipeline.run(request, &reporter).await
        };
        if let Err(e) = result {
            warn!(artifact_id = %id, error = %e, "Journey generation failed");
        }
    });
}

fn spawn_preset(state: &ApiState, id: &str, refresh: bool) -> Result<(), AppError> {
    let entry = state
        .scheduler
        .entry(id)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("unknown preset {}", id)))?;
    let reporter = state.jobs.start(id);
    let scheduler = state.scheduler.clone();
    tokio::spawn(async move {
        let result = if refresh {
            scheduler.refresh(&entry, &reporter).await
        } else {
            scheduler.generate(&entry, &reporter).await
        };
        if let Err(e) = result {
            warn!(entity_id = %entry.id, error = %e, "Preset generation failed");
        }
    });
    Ok(())
}

pub async fn handle_create_journey(
    state: &ApiState,
    req: CreateJourneyRequest,
) -> Result<JourneyAccepted, AppError> {
    match req {
        CreateJourneyRequest::Preset { id } => {
            spawn_preset(state, &id, false)?;
            Ok(JourneyAccepted { id, title: None })
        }
        CreateJourneyRequest::Image { mime_type, data } => {
            if data.trim().is_empty() {
                return Err(AppError::BadRequest("image data is empty".to_string()));
            }
            let request = GenerationRequest::image(ImageData { mime_type, data });
            let id = request.id.clone();
            info!(artifact_id = %id, "Photo journey submitted");
            spawn_run(state, request, false);
            Ok(JourneyAccepted { id, title: None })
        }
        CreateJourneyRequest::Research { audio } => {
            if audio.trim().is_empty() {
                return Err(AppError::BadRequest("recording is empty".to_string()));
            }
            let decision = state
                .research
                .conduct(&audio)
                .await
                .map_err(|e| remote_error(state, e))?;
            match decision {
                ResearchDecision::Rejected { feedback } => Err(AppError::Unprocessable(feedback)),
                ResearchDecision::Approved { title, request } => {
                    let id = request.id.clone();
                    info!(artifact_id = %id, title = %title, "Research journey submitted");
                    spawn_run(state, request, false);
                    Ok(JourneyAccepted {
                        id,
                        title: Some(title),
                    })
                }
            }
        }
    }
}

/// Regenerate a journey from its original input.
pub async fn handle_refresh(state: &ApiState, id: &str) -> Result<(), AppError> {
    state.resolvers.remove(id);
    if state.scheduler.entry(id).is_some() {
        return spawn_preset(state, id, true);
    }

    let artifact = find_artifact(state, id).await?;
    let request = GenerationRequest {
        id: artifact.id.clone(),
        input: photo_input(&artifact)?,
        bypass_cache: true,
    };
    spawn_run(state, request, true);
    Ok(())
}

/// Only photo journeys keep their input; research reports are not stored.
fn photo_input(artifact: &TimelineArtifact) -> Result<GenerationInput, AppError> {
    match &artifact.source_image {
        Some(image) => Ok(GenerationInput::Image {
            image: image.clone(),
        }),
        None => Err(AppError::Conflict(format!(
            "journey {} cannot be regenerated",
            artifact.id
        ))),
    }
}

pub async fn handle_delete(state: &ApiState, id: &str) -> Result<(), AppError> {
    find_artifact(state, id).await?;
    state.scheduler.invalidate(id).await;
    state.resolvers.remove(id);
    state.jobs.forget(id);
    info!(artifact_id = %id, "Journey deleted");
    Ok(())
}

/// Feed a scrub position to the journey's resolver, creating it on first use
/// and replacing it when the artifact has been regenerated.
pub async fn handle_scrub(
    state: &ApiState,
    id: &str,
    position: f64,
) -> Result<ScrubResponse, AppError> {
    let artifact = find_artifact(state, id).await?;

    let resolver = {
        let build = || {
            Arc::new(LazyVisualResolver::new(
                &artifact,
                state.pipeline.service().clone(),
                state.pipeline.resilient().clone(),
                state.pipeline.cache().clone(),
                state.lazy.clone(),
            ))
        };
        let mut slot = state.resolvers.entry(id.to_string()).or_insert_with(build);
        if !slot.tracks(&artifact) {
            *slot = build();
        }
        Arc::clone(slot.value())
    };

    let triggered = resolver.on_scrub(position);
    Ok(ScrubResponse {
        triggered,
        pending: resolver.pending(),
    })
}

pub async fn handle_narration(state: &ApiState, id: &str) -> Result<NarrationInfo, AppError> {
    let artifact = find_artifact(state, id).await?;
    let audio = artifact
        .narration_audio
        .ok_or_else(|| AppError::NotFound(format!("journey {} has no narration", id)))?;
    let buffer = AudioDecoder::decode(&audio, None)
        .map_err(|e| AppError::Unprocessable(e.to_string()))?;
    Ok(NarrationInfo {
        channels: buffer.channels,
        sample_rate: buffer.sample_rate,
        frames: buffer.frames(),
        duration_seconds: buffer.duration_seconds(),
        strategy: buffer.strategy,
    })
}

/// Store a new API key; failed pregeneration gets another chance.
pub fn handle_set_credentials(state: &ApiState, api_key: &str) -> Result<(), AppError> {
    let api_key = api_key.trim();
    if api_key.is_empty() {
        return Err(AppError::BadRequest("apiKey must not be empty".to_string()));
    }
    state.runtime.write().unwrap().api_key = Some(api_key.to_string());
    info!("API key updated");

    if state.pregeneration {
        let scheduler = state.scheduler.clone();
        tokio::spawn(async move {
            scheduler.start().await;
        });
    }
    Ok(())
}

async fn find_artifact(state: &ApiState, id: &str) -> Result<TimelineArtifact, AppError> {
    state
        .pipeline
        .cached(id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("journey {} not found", id)))
}

fn remote_error(state: &ApiState, error: RemoteError) -> AppError {
    match state.pipeline.resilient().classifier().classify(&error) {
        FailureKind::Credential => AppError::Unauthorized(error.message),
        _ => AppError::BadGateway(error.message),
    }
}

// ---------------------------------------------------------------------------
// HTTP handlers
// ---------------------------------------------------------------------------

async fn list_catalog(State(state): State<Arc<ApiState>>) -> Json<Vec<CatalogItem>> {
    let items = state
        .scheduler
        .snapshot()
        .into_iter()
        .map(|(entry, status)| CatalogItem {
            id: entry.id,
            name: entry.name,
            location: entry.location,
            status,
        })
        .collect();
    Json(items)
}

async fn post_journey(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<CreateJourneyRequest>,
) -> Result<(StatusCode, Json<JourneyAccepted>), AppError> {
    let accepted = handle_create_journey(&state, req).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

async fn list_journeys(State(state): State<Arc<ApiState>>) -> Json<Vec<JourneySummary>> {
    let artifacts = state.pipeline.cache().list_all().await;
    Json(artifacts.iter().map(JourneySummary::from).collect())
}

async fn get_journey(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<TimelineArtifact>, AppError> {
    Ok(Json(find_artifact(&state, &id).await?))
}

async fn get_status(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<GenerationStatus>, AppError> {
    if let Some(status) = state.jobs.status(&id) {
        return Ok(Json(status));
    }
    // Ready from an earlier process or a background sweep
    find_artifact(&state, &id).await?;
    Ok(Json(GenerationStatus {
        stage: GenerationStage::Ready,
        message: "Journey ready".to_string(),
        progress: 100,
        failure: None,
    }))
}

async fn refresh_journey(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<JourneyAccepted>), AppError> {
    handle_refresh(&state, &id).await?;
    Ok((StatusCode::ACCEPTED, Json(JourneyAccepted { id, title: None })))
}

async fn delete_journey(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    handle_delete(&state, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn scrub_journey(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(req): Json<ScrubRequest>,
) -> Result<Json<ScrubResponse>, AppError> {
    Ok(Json(handle_scrub(&state, &id, req.position).await?))
}

async fn post_annotation(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(req): Json<AddAnnotationRequest>,
) -> Result<(StatusCode, Json<Annotation>), AppError> {
    let annotation = state
        .annotations
        .add(&id, req.event_index, &req.content, req.is_audio)
        .await?;
    Ok((StatusCode::CREATED, Json(annotation)))
}

async fn get_narration(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<NarrationInfo>, AppError> {
    Ok(Json(handle_narration(&state, &id).await?))
}

async fn get_credentials(State(state): State<Arc<ApiState>>) -> Json<CredentialStatus> {
    let configured = state.runtime.read().unwrap().has_api_key();
    Json(CredentialStatus { configured })
}

async fn put_credentials(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<SetCredentialsRequest>,
) -> Result<StatusCode, AppError> {
    handle_set_credentials(&state, &req.api_key)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Error handling
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    /// Missing or rejected API key; the UI should ask for credentials
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    Unprocessable(String),
    BadGateway(String),
    Internal(String),
}

impl From<AnnotationError> for AppError {
    fn from(e: AnnotationError) -> Self {
        match e {
            AnnotationError::ArtifactNotFound(_) => AppError::NotFound(e.to_string()),
            AnnotationError::EventOutOfRange { .. } | AnnotationError::EmptyContent => {
                AppError::BadRequest(e.to_string())
            }
            AnnotationError::Rejected { feedback } => AppError::Unprocessable(feedback),
            AnnotationError::Remote(error) => AppError::BadGateway(error.message),
            AnnotationError::Storage(msg) => AppError::Internal(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/catalog", get(list_catalog))
        .route("/api/journeys", get(list_journeys).post(post_journey))
        .route("/api/journeys/:id", get(get_journey).delete(delete_journey))
        .route("/api/journeys/:id/status", get(get_status))
        .route("/api/journeys/:id/refresh", post(refresh_journey))
        .route("/api/journeys/:id/scrub", post(scrub_journey))
        .route("/api/journeys/:id/annotations", post(post_annotation))
        .route("/api/journeys/:id/narration", get(get_narration))
        .route("/api/credentials", get(get_credentials).put(put_credentials))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
