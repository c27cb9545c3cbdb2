//! Journey server: wires the Chronolens generation core to Gemini and
//! exposes it over HTTP.
//!
//! # Architecture
//!
//! ```text
//!   Browser (scrubber, uploads, recordings)
//!          ↓ HTTP
//! ┌─────────────────────────────────────────┐
//! │       api (axum router)                  │
//! │  - Start journeys, poll status           │
//! │  - Scrub → LazyVisualResolver            │
//! │  - Annotations, credentials              │
//! └─────────────────────────────────────────┘
//!          ↓
//! ┌─────────────────────────────────────────┐
//! │       chronolens core                    │
//! │  - GenerationPipeline / Scheduler        │
//! │  - TimelineCache (SQLite)                │
//! └─────────────────────────────────────────┘
//!          ↓ GenerationService
//! ┌─────────────────────────────────────────┐
//! │       gemini (REST client)               │
//! └─────────────────────────────────────────┘
//! ```

pub mod api;
pub mod gemini;
pub mod jobs;

pub use api::{create_router, ApiState};
pub use gemini::GeminiService;
pub use jobs::JobRegistry;
