use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::{normalize_hotspots, validate_plan, PlanValidationError};

use crate::service::PlannedEvent;

/// Inline image payload (base64 body plus MIME type).
///
/// Used both for the user's original upload and for generated era images.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageData {
    pub mime_type: String,
    /// Base64-encoded image bytes (standard alphabet, padded)
    pub data: String,
}

impl ImageData {
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: STANDARD.encode(bytes),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.data)
    }

    /// `data:` URL suitable for direct use as an image source.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// A point of interest inside a generated scene.
///
/// Coordinates are normalized to [0,1]; for panoramic images they are
/// equirectangular (x = longitude, y = latitude).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SceneHotspot {
    pub id: String,
    pub name: String,
    pub description: String,
    pub x: f64,
    pub y: f64,
}

/// One era of a journey.
///
/// `generated` is true iff `image` is present. Once generated, only the
/// hotspot list may still change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEvent {
    pub year: i32,
    pub title: String,
    pub description: String,
    pub visual_prompt: String,
    #[serde(rename = "imageRef", skip_serializing_if = "Option::is_none", default)]
    pub image: Option<ImageData>,
    pub generated: bool,
    pub panoramic: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub hotspots: Option<Vec<SceneHotspot>>,
}

impl TimelineEvent {
    /// Build an unresolved event from a planning skeleton.
    pub fn from_plan(planned: PlannedEvent, panoramic: bool) -> Self {
        Self {
            year: planned.year,
            title: planned.title,
            description: planned.description,
            visual_prompt: planned.visual_prompt,
            image: None,
            generated: false,
            panoramic,
            hotspots: None,
        }
    }

    /// Attach the generated image. Returns false (and leaves the event
    /// untouched) if the event already has one.
    pub fn attach_image(&mut self, image: ImageData) -> bool {
        if self.generated {
            return false;
        }
        self.image = Some(image);
        self.generated = true;
        true
    }

    /// Attach hotspots unless some are already present.
    pub fn attach_hotspots(&mut self, hotspots: Vec<SceneHotspot>) -> bool {
        if self.hotspots.is_some() {
            return false;
        }
        self.hotspots = Some(hotspots);
        true
    }
}

/// Citation backing the generated history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub uri: String,
}

/// User contribution attached to one era of an artifact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub id: String,
    pub event_index: usize,
    pub content: String,
    pub is_audio: bool,
    pub created_at: DateTime<Utc>,
}

/// The persisted result of one generation run; the unit of caching.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineArtifact {
    /// Cache key (catalog id for presets, UUIDv7 for user submissions)
    pub id: String,
    pub subject_name: String,
    pub subject_location: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source_image: Option<ImageData>,
    /// Fixed length, decided at plan time
    pub timeline: Vec<TimelineEvent>,
    /// Base64-encoded narration audio as returned by the speech capability
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub narration_audio: Option<String>,
    #[serde(default)]
    pub sources: Vec<Citation>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    pub is_user_submitted: bool,
    pub created_at: DateTime<Utc>,
}

impl TimelineArtifact {
    pub fn event_count(&self) -> usize {
        self.timeline.len()
    }

    /// Indices of events whose image has not been generated yet.
    pub fn pending_events(&self) -> Vec<usize> {
        self.timeline
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.generated)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn is_fully_generated(&self) -> bool {
        self.timeline.iter().all(|e| e.generated)
    }
}
