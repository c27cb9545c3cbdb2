//! Gemini-backed implementation of [`GenerationService`].
//!
//! Each capability is one `generateContent` call (narration is two: script,
//! then speech). Structured answers are requested as JSON and parsed here;
//! a response that does not parse is reported as a plain `RemoteError`
//! without status, which the retry layer treats as fatal.

pub mod api;
pub mod config;
pub mod prompts;

use api::{GeminiClient, GenerateOptions, GenerateResponse, Part};
use async_trait::async_trait;
use chronolens::resilience::RemoteError;
use chronolens::service::{
    GenerationService, Identification, PlannedEvent, RelevanceVerdict, ResearchOutcome,
    TimelinePlan,
};
use chronolens::timeline::{Citation, ImageData, SceneHotspot};
use chronolens::TimelineEvent;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

pub use config::GeminiModels;

/// MIME type assumed for recorded voice input.
pub const RECORDING_MIME_TYPE: &str = "audio/webm";

#[derive(Deserialize)]
struct PlannedEvents {
    events: Vec<PlannedEvent>,
}

#[derive(Deserialize)]
struct RawHotspot {
    name: String,
    #[serde(default)]
    description: String,
    x: f64,
    y: f64,
}

pub struct GeminiService {
    client: GeminiClient,
    models: GeminiModels,
    event_count: usize,
    panoramic: bool,
}

impl GeminiService {
    pub fn new(
        client: GeminiClient,
        models: GeminiModels,
        event_count: usize,
        panoramic: bool,
    ) -> Self {
        Self {
            client,
            models,
            event_count,
            panoramic,
        }
    }

    async fn ask_json<T: DeserializeOwned>(
        &self,
        what: &str,
        parts: Vec<Part>,
        search: bool,
    ) -> Result<(T, GenerateResponse), RemoteError> {
        // Search grounding does not combine with JSON mode
        let options = GenerateOptions {
            json: !search,
            search,
            ..Default::default()
        };
        let response = self.client.generate(&self.models.text, parts, &options).await?;
        let text = response
            .text()
            .ok_or_else(|| RemoteError::new(format!("Empty response for {}", what)))?;
        let parsed = parse_json(&text)
            .map_err(|e| RemoteError::new(format!("Unable to parse {}: {}", what, e)))?;
        Ok((parsed, response))
    }
}

/// Parse a JSON answer, tolerating a surrounding markdown code fence.
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(body.trim())
}

fn citations(response: &GenerateResponse) -> Vec<Citation> {
    let mut seen = std::collections::HashSet::new();
    response
        .web_sources()
        .into_iter()
        .filter(|(_, uri)| seen.insert(uri.clone()))
        .map(|(title, uri)| Citation { title, uri })
        .collect()
}

#[async_trait]
impl GenerationService for GeminiService {
    async fn identify(&self, image: &ImageData) -> Result<Identification, RemoteError> {
        let parts = vec![
            Part::inline(image.mime_type.clone(), image.data.clone()),
            Part::text(prompts::identify()),
        ];
        let (found, _) = self.ask_json::<Identification>("identification", parts, false).await?;
        if found.name.trim().is_empty() {
            return Err(RemoteError::new("No landmark recognised in the photo"));
        }
        Ok(found)
    }

    async fn plan_timeline(&self, name: &str, location: &str) -> Result<TimelinePlan, RemoteError> {
        let parts = vec![Part::text(prompts::plan_timeline(name, location, self.event_count))];
        let (planned, response) = self
            .ask_json::<PlannedEvents>("timeline plan", parts, true)
            .await?;
        let sources = citations(&response);
        debug!(subject = %name, sources = sources.len(), "Timeline planned");
        Ok(TimelinePlan {
            events: planned.events,
            sources,
        })
    }

    async fn plan_timeline_from_report(
        &self,
        topic: &str,
        report: &str,
    ) -> Result<Vec<PlannedEvent>, RemoteError> {
        let parts = vec![Part::text(prompts::plan_from_report(topic, report, self.event_count))];
        let (planned, _) = self
            .ask_json::<PlannedEvents>("timeline plan", parts, false)
            .await?;
        Ok(planned.events)
    }

    async fn render_image(
        &self,
        prompt: &str,
        subject_name: &str,
        reference: Option<&ImageData>,
    ) -> Result<ImageData, RemoteError> {
        let mut parts = Vec::new();
        if let Some(reference) = reference {
            parts.push(Part::inline(reference.mime_type.clone(), reference.data.clone()));
        }
        parts.push(Part::text(prompts::render_image(
            prompt,
            subject_name,
            reference.is_some(),
            self.panoramic,
        )));

        let options = GenerateOptions {
            response_modalities: vec!["IMAGE"],
            ..Default::default()
        };
        let response = self.client.generate(&self.models.image, parts, &options).await?;
        let inline = response
            .inline_data()
            .ok_or_else(|| RemoteError::new("No image data in response"))?;
        Ok(ImageData {
            mime_type: inline.mime_type.clone(),
            data: inline.data.clone(),
        })
    }

    async fn identify_hotspots(
        &self,
        image: &ImageData,
        subject_name: &str,
        year: i32,
    ) -> Result<Vec<SceneHotspot>, RemoteError> {
        let parts = vec![
            Part::inline(image.mime_type.clone(), image.data.clone()),
            Part::text(prompts::identify_hotspots(subject_name, year)),
        ];
        let (raw, _) = self.ask_json::<Vec<RawHotspot>>("hotspots", parts, false).await?;
        Ok(raw
            .into_iter()
            .map(|h| SceneHotspot {
                id: String::new(),
                name: h.name,
                description: h.description,
                x: h.x,
                y: h.y,
            })
            .collect())
    }

    async fn synthesize_narration(
        &self,
        subject_name: &str,
        events: &[TimelineEvent],
    ) -> Result<String, RemoteError> {
        let script_response = self
            .client
            .generate(
                &self.models.text,
                vec![Part::text(prompts::narration_script(subject_name, events))],
                &GenerateOptions::default(),
            )
            .await?;
        let script = script_response
            .text()
            .ok_or_else(|| RemoteError::new("Empty narration script"))?;

        let options = GenerateOptions {
            response_modalities: vec!["AUDIO"],
            voice: Some(self.models.voice.clone()),
            ..Default::default()
        };
        let speech = self
            .client
            .generate(&self.models.speech, vec![Part::text(script)], &options)
            .await?;
        // Headerless 16-bit PCM at 24 kHz
        speech
            .inline_data()
            .map(|audio| audio.data.clone())
            .ok_or_else(|| RemoteError::new("No audio data in speech response"))
    }

    async fn conduct_research(&self, audio: &str) -> Result<ResearchOutcome, RemoteError> {
        let parts = vec![
            Part::inline(RECORDING_MIME_TYPE, audio),
            Part::text(prompts::research()),
        ];
        let (mut outcome, response) = self
            .ask_json::<ResearchOutcome>("research outcome", parts, true)
            .await?;
        if outcome.sources.is_empty() {
            outcome.sources = citations(&response);
        }
        Ok(outcome)
    }

    async fn validate_relevance(
        &self,
        subject_name: &str,
        year: i32,
        content: &str,
        is_audio: bool,
    ) -> Result<RelevanceVerdict, RemoteError> {
        let mut parts = Vec::new();
        if is_audio {
            parts.push(Part::inline(RECORDING_MIME_TYPE, content));
        }
        parts.push(Part::text(prompts::validate_relevance(
            subject_name,
            year,
            content,
            is_audio,
        )));
        let (verdict, _) = self
            .ask_json::<RelevanceVerdict>("relevance verdict", parts, false)
            .await?;
        Ok(verdict)
    }
}
