use crate::resilience::FailureKind;
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub const PROGRESS_IDENTIFIED: u8 = 15;
pub const PROGRESS_PLANNED: u8 = 30;
pub const PROGRESS_VISUALIZED: u8 = 60;
pub const PROGRESS_READY: u8 = 100;

/// Stage of one generation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStage {
    Idle,
    Identifying,
    Planning,
    Visualizing,
    Narrating,
    Ready,
    Error,
}

impl GenerationStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GenerationStage::Ready | GenerationStage::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationStatus {
    pub stage: GenerationStage,
    pub message: String,
    /// 0..=100, never decreases within a run
    pub progress: u8,
    /// Set when `stage` is `Error`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl GenerationStatus {
    pub fn idle() -> Self {
        Self {
            stage: GenerationStage::Idle,
            message: String::new(),
            progress: 0,
            failure: None,
        }
    }
}

/// Publishes status updates for a single run.
///
/// Progress is clamped so it never goes backwards. Sends to a dropped
/// receiver are ignored; the run carries on regardless of who is watching.
#[derive(Clone)]
pub struct StatusReporter {
    tx: Option<mpsc::UnboundedSender<GenerationStatus>>,
    progress: Arc<AtomicU8>,
}

impl StatusReporter {
    /// Reporter plus the receiving end of its feed.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<GenerationStatus>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Some(tx),
                progress: Arc::new(AtomicU8::new(0)),
            },
            rx,
        )
    }

    /// Reporter nobody listens to (background runs).
    pub fn silent() -> Self {
        Self {
            tx: None,
            progress: Arc::new(AtomicU8::new(0)),
        }
    }

    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::SeqCst)
    }

    pub fn report(&self, stage: GenerationStage, progress: u8, message: impl Into<String>) {
        let progress = progress.min(PROGRESS_READY);
        let previous = self.progress.fetch_max(progress, Ordering::SeqCst);
        self.send(GenerationStatus {
            stage,
            message: message.into(),
            progress: previous.max(progress),
            failure: None,
        });
    }

    pub fn fail(&self, message: impl Into<String>, kind: FailureKind) {
        self.send(GenerationStatus {
            stage: GenerationStage::Error,
            message: message.into(),
            progress: self.progress(),
            failure: Some(kind),
        });
    }

    fn send(&self, status: GenerationStatus) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_never_decreases() {
        let (reporter, mut rx) = StatusReporter::channel();
        reporter.report(GenerationStage::Planning, 30, "planning");
        reporter.report(GenerationStage::Visualizing, 20, "late update");
        reporter.report(GenerationStage::Ready, 250, "done");

        let progress: Vec<u8> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|s| s.progress)
            .collect();
        assert_eq!(progress, vec![30, 30, 100]);
    }

    #[test]
    fn test_fail_keeps_progress() {
        let (reporter, mut rx) = StatusReporter::channel();
        reporter.report(GenerationStage::Planning, 30, "planning");
        reporter.fail("API key not valid", FailureKind::Credential);

        let last = std::iter::from_fn(|| rx.try_recv().ok()).last().unwrap();
        assert_eq!(last.stage, GenerationStage::Error);
        assert_eq!(last.progress, 30);
        assert_eq!(last.message, "API key not valid");
        assert_eq!(last.failure, Some(FailureKind::Credential));
    }

    #[test]
    fn test_dropped_receiver_is_ignored() {
        let (reporter, rx) = StatusReporter::channel();
        drop(rx);
        reporter.report(GenerationStage::Ready, 100, "done");
        StatusReporter::silent().report(GenerationStage::Ready, 100, "done");
    }
}
