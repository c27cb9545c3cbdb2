//! Scrub-driven image generation for the eras of a ready artifact.
//!
//! The UI feeds a continuous scrub position `p ∈ [0, N-1]`. Every event
//! within the visibility distance of `p` that has no image yet is rendered
//! once, its hotspots identified, and the result merged into the stored
//! artifact. Per-event slots guarantee a single render per index no matter
//! how the position jitters.

use crate::cache::TimelineCache;
use crate::config::LazyConfig;
use crate::resilience::ResilientCall;
use crate::service::GenerationService;
use crate::timeline::{normalize_hotspots, ImageData, SceneHotspot, TimelineArtifact};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Visibility distance for flat images, in timeline indices
pub const VISIBILITY_THRESHOLD: f64 = 1.1;
/// Visibility distance for panoramic images, in timeline indices
pub const PANORAMIC_VISIBILITY_THRESHOLD: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// No image yet
    Pending,
    /// Image present, hotspots missing
    NeedsHotspots,
    InFlight,
    Done,
}

/// Sent after an event's visuals are persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventResolved {
    pub artifact_id: String,
    pub index: usize,
    pub hotspot_count: usize,
}

struct EventInfo {
    year: i32,
    visual_prompt: String,
    panoramic: bool,
}

struct Inner {
    artifact_id: String,
    created_at: DateTime<Utc>,
    subject_name: String,
    reference: Option<ImageData>,
    events: Vec<EventInfo>,
    slots: DashMap<usize, Slot>,
    /// Images of events still missing hotspots
    images: DashMap<usize, ImageData>,
    service: Arc<dyn GenerationService>,
    resilient: ResilientCall,
    cache: TimelineCache,
    thresholds: LazyConfig,
    resolved_tx: broadcast::Sender<EventResolved>,
}

/// Resolves the deferred visuals of one artifact.
pub struct LazyVisualResolver {
    inner: Arc<Inner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LazyVisualResolver {
    pub fn new(
        artifact: &TimelineArtifact,
        service: Arc<dyn GenerationService>,
        resilient: ResilientCall,
        cache: TimelineCache,
        thresholds: LazyConfig,
    ) -> Self {
        let slots = DashMap::new();
        let images = DashMap::new();
        let events = artifact
            .timeline
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let slot = match (e.generated, &e.hotspots) {
                    (false, _) => Slot::Pending,
                    (true, None) => Slot::NeedsHotspots,
                    (true, Some(_)) => Slot::Done,
                };
                if slot == Slot::NeedsHotspots {
                    if let Some(image) = &e.image {
                        images.insert(i, image.clone());
                    }
                }
                slots.insert(i, slot);
                EventInfo {
                    year: e.year,
                    visual_prompt: e.visual_prompt.clone(),
                    panoramic: e.panoramic,
                }
            })
            .collect();
        let (resolved_tx, _) = broadcast::channel(100);

        Self {
            inner: Arc::new(Inner {
                artifact_id: artifact.id.clone(),
                created_at: artifact.created_at,
                subject_name: artifact.subject_name.clone(),
                reference: artifact.source_image.clone(),
                events,
                slots,
                images,
                service,
                resilient,
                cache,
                thresholds,
                resolved_tx,
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn artifact_id(&self) -> &str {
        &self.inner.artifact_id
    }

    /// True if the resolver was built from this exact artifact version.
    pub fn tracks(&self, artifact: &TimelineArtifact) -> bool {
        self.inner.artifact_id == artifact.id && self.inner.created_at == artifact.created_at
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventResolved> {
        self.inner.resolved_tx.subscribe()
    }

    /// Indices that still need an image.
    pub fn pending(&self) -> Vec<usize> {
        self.indices_in(Slot::Pending)
    }

    pub fn in_flight(&self) -> Vec<usize> {
        self.indices_in(Slot::InFlight)
    }

    fn indices_in(&self, wanted: Slot) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .inner
            .slots
            .iter()
            .filter(|s| *s.value() == wanted)
            .map(|s| *s.key())
            .collect();
        indices.sort_unstable();
        indices
    }

    /// Feed a scrub position; returns the indices whose generation started.
    ///
    /// `triggered` also lists visible events that already have an image but
    /// no hotspots (the eagerly rendered first era, or an earlier hotspot
    /// failure); those get a hotspot-only pass and are never re-rendered.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn on_scrub(&self, position: f64) -> Vec<usize> {
        let count = self.inner.events.len();
        if count == 0 || !position.is_finite() {
            return Vec::new();
        }
        let position = position.clamp(0.0, (count - 1) as f64);

        let mut triggered = Vec::new();
        for (index, event) in self.inner.events.iter().enumerate() {
            let threshold = if event.panoramic {
                self.inner.thresholds.panoramic_visibility_threshold
            } else {
                self.inner.thresholds.visibility_threshold
            };
            if (position - index as f64).abs() >= threshold {
                continue;
            }
            let Some(claimed) = self.claim(index) else {
                continue;
            };

            debug!(
                artifact_id = %self.inner.artifact_id,
                index,
                position,
                "Event visible, starting generation"
            );
            let inner = Arc::clone(&self.inner);
            let handle = tokio::spawn(async move { inner.resolve(index, claimed).await });
            self.tasks.lock().unwrap().push(handle);
            triggered.push(index);
        }
        triggered
    }

    /// Pending/NeedsHotspots → InFlight. Returns the state that was claimed.
    fn claim(&self, index: usize) -> Option<Slot> {
        let mut slot = self.inner.slots.get_mut(&index)?;
        match *slot {
            Slot::Pending | Slot::NeedsHotspots => {
                let claimed = *slot;
                *slot = Slot::InFlight;
                Some(claimed)
            }
            Slot::InFlight | Slot::Done => None,
        }
    }

    /// Wait for every generation started so far.
    pub async fn settle(&self) {
        loop {
            let handles: Vec<JoinHandle<()>> = self.tasks.lock().unwrap().drain(..).collect();
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Visual generation task panicked");
                }
            }
        }
    }
}

impl Inner {
    async fn resolve(&self, index: usize, claimed: Slot) {
        let event = &self.events[index];

        let existing = match claimed {
            Slot::NeedsHotspots => self.images.get(&index).map(|i| i.value().clone()),
            _ => None,
        };
        let image = match existing {
            Some(image) => image,
            None => {
                let rendered = self
                    .resilient
                    .execute("render_image", || {
                        self.service.render_image(
                            &event.visual_prompt,
                            &self.subject_name,
                            self.reference.as_ref(),
                        )
                    })
                    .await;
                match rendered {
                    Ok(image) => {
                        self.images.insert(index, image.clone());
                        image
                    }
                    Err(e) => {
                        warn!(
                            artifact_id = %self.artifact_id,
                            index,
                            error = %e,
                            "Event render failed, will retry when visible again"
                        );
                        self.slots.insert(index, Slot::Pending);
                        return;
                    }
                }
            }
        };

        let hotspots: Option<Vec<SceneHotspot>> = match self
            .resilient
            .execute("identify_hotspots", || {
                self.service
                    .identify_hotspots(&image, &self.subject_name, event.year)
            })
            .await
        {
            Ok(found) => Some(normalize_hotspots(found)),
            Err(e) => {
                warn!(
                    artifact_id = %self.artifact_id,
                    index,
                    error = %e,
                    "Hotspot identification failed, keeping image without hotspots"
                );
                None
            }
        };
        let hotspot_count = hotspots.as_ref().map(|h| h.len()).unwrap_or(0);
        let complete = hotspots.is_some();

        let created_at = self.created_at;
        let persisted = self
            .cache
            .update(&self.artifact_id, move |artifact| {
                // A refresh replaced the artifact; this result belongs to the old one
                if artifact.created_at != created_at {
                    return false;
                }
                let Some(stored) = artifact.timeline.get_mut(index) else {
                    return false;
                };
                stored.attach_image(image);
                if let Some(hotspots) = hotspots {
                    stored.attach_hotspots(hotspots);
                }
                true
            })
            .await;

        match persisted {
            Ok(Some((_, true))) => {
                if complete {
                    self.images.remove(&index);
                    self.slots.insert(index, Slot::Done);
                } else {
                    self.slots.insert(index, Slot::NeedsHotspots);
                }
                info!(
                    artifact_id = %self.artifact_id,
                    index,
                    hotspots = hotspot_count,
                    "Event visuals resolved"
                );
                let _ = self.resolved_tx.send(EventResolved {
                    artifact_id: self.artifact_id.clone(),
                    index,
                    hotspot_count,
                });
            }
            Ok(Some((_, false))) => {
                debug!(
                    artifact_id = %self.artifact_id,
                    index,
                    "Artifact replaced, dropping event visuals"
                );
                self.images.remove(&index);
                self.slots.insert(index, Slot::Done);
            }
            Ok(None) => {
                warn!(
                    artifact_id = %self.artifact_id,
                    index,
                    "Artifact not cached, event will render again when visible"
                );
                self.images.remove(&index);
                self.slots.insert(index, Slot::Pending);
            }
            Err(e) => {
                warn!(
                    artifact_id = %self.artifact_id,
                    index,
                    error = %e,
                    "Failed to persist event visuals"
                );
                // The image is kept in memory; the next visit only redoes hotspots
                self.slots.insert(index, Slot::NeedsHotspots);
            }
        }
    }
}
