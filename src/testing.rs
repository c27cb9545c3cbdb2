//! Scripted in-process GenerationService and store doubles used by unit tests.

use crate::cache::ArtifactStore;
use crate::resilience::{RemoteError, ResilientCall, RetryPolicy};
use crate::service::{
    GenerationService, Identification, PlannedEvent, RelevanceVerdict, ResearchOutcome,
    TimelinePlan,
};
use crate::timeline::{Citation, ImageData, SceneHotspot, TimelineArtifact, TimelineEvent};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const IDENTIFY: &str = "identify";
pub const PLAN: &str = "plan_timeline";
pub const PLAN_FROM_REPORT: &str = "plan_timeline_from_report";
pub const RENDER: &str = "render_image";
pub const HOTSPOTS: &str = "identify_hotspots";
pub const NARRATE: &str = "synthesize_narration";
pub const RESEARCH: &str = "conduct_research";
pub const RELEVANCE: &str = "validate_relevance";

/// Retry wrapper that never sleeps.
pub fn instant_retries(max_retries: u32) -> ResilientCall {
    ResilientCall::with_policy(RetryPolicy {
        max_retries,
        base_delay: Duration::ZERO,
        max_jitter: Duration::ZERO,
        multiplier: 1.5,
    })
}

pub fn planned_events(count: usize) -> Vec<PlannedEvent> {
    (0..count)
        .map(|i| PlannedEvent {
            year: 100 * (i as i32 + 1),
            title: format!("Era {}", i),
            description: format!("What happened in era {}", i),
            visual_prompt: format!("scene of era {}", i),
        })
        .collect()
}

#[derive(Default)]
struct Script {
    calls: HashMap<&'static str, u32>,
    /// Errors handed out (in order) before a capability starts succeeding
    queued_failures: HashMap<&'static str, VecDeque<RemoteError>>,
    permanent_failures: HashMap<&'static str, RemoteError>,
    rendered_prompts: Vec<String>,
    /// Reference image passed to each render, in call order
    rendered_references: Vec<Option<ImageData>>,
}

/// Fake backend with per-capability call counters and scripted failures.
pub struct FakeService {
    script: Mutex<Script>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    delay: Duration,
    event_count: usize,
    research: ResearchOutcome,
    relevance: RelevanceVerdict,
}

impl Default for FakeService {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeService {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script::default()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            delay: Duration::ZERO,
            event_count: 4,
            research: ResearchOutcome {
                approved: true,
                title: "Hanging Gardens".to_string(),
                report: "A report on the gardens of Babylon".to_string(),
                image_prompts: vec!["Terraced gardens above the Euphrates".to_string()],
                sources: vec![Citation {
                    title: "Herodotus".to_string(),
                    uri: "https://example.org/histories".to_string(),
                }],
                feedback: None,
            },
            relevance: RelevanceVerdict {
                relevant: true,
                feedback: String::new(),
            },
        }
    }

    /// Every capability sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Planner returns this many events.
    pub fn with_event_count(mut self, count: usize) -> Self {
        self.event_count = count;
        self
    }

    pub fn with_research(mut self, outcome: ResearchOutcome) -> Self {
        self.research = outcome;
        self
    }

    pub fn with_relevance(mut self, verdict: RelevanceVerdict) -> Self {
        self.relevance = verdict;
        self
    }

    /// Fail the next call to `capability` with `error`. Queues.
    pub fn fail_next(&self, capability: &'static str, error: RemoteError) {
        self.script
            .lock()
            .unwrap()
            .queued_failures
            .entry(capability)
            .or_default()
            .push_back(error);
    }

    /// Fail every call to `capability` with `error`.
    pub fn fail_always(&self, capability: &'static str, error: RemoteError) {
        self.script
            .lock()
            .unwrap()
            .permanent_failures
            .insert(capability, error);
    }

    pub fn calls(&self, capability: &str) -> u32 {
        self.script
            .lock()
            .unwrap()
            .calls
            .get(capability)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.script.lock().unwrap().calls.values().sum()
    }

    pub fn rendered_prompts(&self) -> Vec<String> {
        self.script.lock().unwrap().rendered_prompts.clone()
    }

    pub fn rendered_references(&self) -> Vec<Option<ImageData>> {
        self.script.lock().unwrap().rendered_references.clone()
    }

    /// Most calls that were ever waiting out the delay at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self, capability: &'static str) -> Result<(), RemoteError> {
        let scripted = {
            let mut script = self.script.lock().unwrap();
            *script.calls.entry(capability).or_insert(0) += 1;
            match script.permanent_failures.get(capability) {
                Some(err) => Some(err.clone()),
                None => script
                    .queued_failures
                    .get_mut(capability)
                    .and_then(|q| q.pop_front()),
            }
        };
        if !self.delay.is_zero() {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        match scripted {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl GenerationService for FakeService {
    async fn identify(&self, _image: &ImageData) -> Result<Identification, RemoteError> {
        self.enter(IDENTIFY).await?;
        Ok(Identification {
            name: "Colosseum".to_string(),
            location: "Rome, Italy".to_string(),
        })
    }

    async fn plan_timeline(
        &self,
        name: &str,
        _location: &str,
    ) -> Result<TimelinePlan, RemoteError> {
        self.enter(PLAN).await?;
        Ok(TimelinePlan {
            events: planned_events(self.event_count),
            sources: vec![Citation {
                title: format!("{} history", name),
                uri: "https://example.org/history".to_string(),
            }],
        })
    }

    async fn plan_timeline_from_report(
        &self,
        _topic: &str,
        _report: &str,
    ) -> Result<Vec<PlannedEvent>, RemoteError> {
        self.enter(PLAN_FROM_REPORT).await?;
        Ok(planned_events(self.event_count))
    }

    async fn render_image(
        &self,
        prompt: &str,
        _subject_name: &str,
        reference: Option<&ImageData>,
    ) -> Result<ImageData, RemoteError> {
        self.enter(RENDER).await?;
        let mut script = self.script.lock().unwrap();
        script.rendered_prompts.push(prompt.to_string());
        script.rendered_references.push(reference.cloned());
        Ok(ImageData::from_bytes("image/png", prompt.as_bytes()))
    }

    async fn identify_hotspots(
        &self,
        _image: &ImageData,
        subject_name: &str,
        year: i32,
    ) -> Result<Vec<SceneHotspot>, RemoteError> {
        self.enter(HOTSPOTS).await?;
        Ok(vec![SceneHotspot {
            id: String::new(),
            name: format!("{} in {}", subject_name, year),
            description: "Point of interest".to_string(),
            x: 1.2,
            y: 0.4,
        }])
    }

    async fn synthesize_narration(
        &self,
        _subject_name: &str,
        _events: &[TimelineEvent],
    ) -> Result<String, RemoteError> {
        self.enter(NARRATE).await?;
        Ok(STANDARD.encode([0x00, 0x00, 0xFF, 0x7F]))
    }

    async fn conduct_research(&self, _audio: &str) -> Result<ResearchOutcome, RemoteError> {
        self.enter(RESEARCH).await?;
        Ok(self.research.clone())
    }

    async fn validate_relevance(
        &self,
        _subject_name: &str,
        _year: i32,
        _content: &str,
        _is_audio: bool,
    ) -> Result<RelevanceVerdict, RemoteError> {
        self.enter(RELEVANCE).await?;
        Ok(self.relevance.clone())
    }
}

/// Reads find nothing; every write fails.
pub struct UnwritableStore;

#[async_trait]
impl ArtifactStore for UnwritableStore {
    async fn get(&self, _id: &str) -> anyhow::Result<Option<TimelineArtifact>> {
        Ok(None)
    }

    async fn put(&self, _artifact: &TimelineArtifact) -> anyhow::Result<()> {
        anyhow::bail!("database is locked")
    }

    async fn delete(&self, _id: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn list_all(&self) -> anyhow::Result<Vec<TimelineArtifact>> {
        Ok(vec![])
    }
}
