use crate::resilience::RemoteError;
use crate::timeline::{Citation, ImageData, SceneHotspot, TimelineEvent};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Subject recognised in an uploaded photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identification {
    pub name: String,
    pub location: String,
}

/// Event skeleton produced by the planner; images come later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedEvent {
    pub year: i32,
    pub title: String,
    pub description: String,
    pub visual_prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelinePlan {
    pub events: Vec<PlannedEvent>,
    #[serde(default)]
    pub sources: Vec<Citation>,
}

/// Result of a spoken research request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchOutcome {
    pub approved: bool,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub report: String,
    #[serde(default)]
    pub image_prompts: Vec<String>,
    #[serde(default)]
    pub sources: Vec<Citation>,
    /// Why the request was rejected, when it was
    #[serde(default)]
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevanceVerdict {
    pub relevant: bool,
    #[serde(default)]
    pub feedback: String,
}

/// The remote multimodal generation backend.
///
/// Every capability is a single request/response call that may fail with a
/// [`RemoteError`]. Callers wrap these in
/// [`ResilientCall`](crate::resilience::ResilientCall); implementations must
/// not retry on their own.
///
/// # Example
///
/// ```ignore
/// struct Offline;
///
/// #[async_trait]
/// impl GenerationService for Offline {
///     async fn identify(&self, _image: &ImageData) -> Result<Identification, RemoteError> {
///         Err(RemoteError::with_status(503, "offline"))
///     }
///     // ...
/// }
/// ```
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Recognise the landmark in a photo.
    async fn identify(&self, image: &ImageData) -> Result<Identification, RemoteError>;

    /// Research a landmark and plan its eras with citations.
    async fn plan_timeline(&self, name: &str, location: &str)
        -> Result<TimelinePlan, RemoteError>;

    /// Plan eras from an already-approved research report.
    async fn plan_timeline_from_report(
        &self,
        topic: &str,
        report: &str,
    ) -> Result<Vec<PlannedEvent>, RemoteError>;

    async fn render_image(
        &self,
        prompt: &str,
        subject_name: &str,
        reference: Option<&ImageData>,
    ) -> Result<ImageData, RemoteError>;

    async fn identify_hotspots(
        &self,
        image: &ImageData,
        subject_name: &str,
        year: i32,
    ) -> Result<Vec<SceneHotspot>, RemoteError>;

    /// Write a script for the whole timeline and speak it.
    ///
    /// Returns base64-encoded audio, either a container format or headerless
    /// 16-bit PCM; see [`AudioDecoder`](crate::audio::AudioDecoder).
    async fn synthesize_narration(
        &self,
        subject_name: &str,
        events: &[TimelineEvent],
    ) -> Result<String, RemoteError>;

    /// Screen and research a spoken topic request.
    async fn conduct_research(&self, audio: &str) -> Result<ResearchOutcome, RemoteError>;

    async fn validate_relevance(
        &self,
        subject_name: &str,
        year: i32,
        content: &str,
        is_audio: bool,
    ) -> Result<RelevanceVerdict, RemoteError>;
}
