// Timeline data model and plan validation
pub mod timeline;

// Retry/backoff around remote calls
pub mod resilience;

// Narration audio decoding
pub mod audio;

// Artifact persistence
pub mod cache;

// Remote generation capabilities
pub mod service;

// Per-entity generation state machine
pub mod pipeline;

// Background pregeneration of catalog presets
pub mod scheduler;

// Scrub-driven per-event image generation
pub mod lazy;

// Preset landmark catalog
pub mod catalog;

// Voice research intake
pub mod research;

// User annotations on generated journeys
pub mod annotations;

// Configuration
pub mod config;

#[cfg(test)]
pub(crate) mod testing;

pub use pipeline::{GenerationInput, GenerationPipeline, GenerationRequest, PipelineError};
pub use timeline::{TimelineArtifact, TimelineEvent};
