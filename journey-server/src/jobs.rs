use chronolens::pipeline::{GenerationStatus, StatusReporter};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct Job {
    run: u64,
    status: GenerationStatus,
}

/// Latest status of each generation run, keyed by artifact id.
///
/// Only the most recent run of an id is tracked; updates still arriving from
/// a superseded run are dropped.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<DashMap<String, Job>>,
    next_run: Arc<AtomicU64>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new run for `id` and return the reporter to hand to it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, id: &str) -> StatusReporter {
        let run = self.next_run.fetch_add(1, Ordering::SeqCst);
        self.jobs.insert(
            id.to_string(),
            Job {
                run,
                status: GenerationStatus::idle(),
            },
        );

        let (reporter, mut rx) = StatusReporter::channel();
        let jobs = Arc::clone(&self.jobs);
        let id = id.to_string();
        tokio::spawn(async move {
            while let Some(status) = rx.recv().await {
                match jobs.get_mut(&id) {
                    Some(mut job) if job.run == run => job.status = status,
                    _ => break,
                }
            }
        });
        reporter
    }

    pub fn status(&self, id: &str) -> Option<GenerationStatus> {
        self.jobs.get(id).map(|job| job.status.clone())
    }

    pub fn forget(&self, id: &str) {
        self.jobs.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronolens::pipeline::GenerationStage;
    use std::time::Duration;

    async fn wait_for(jobs: &JobRegistry, id: &str, stage: GenerationStage) -> GenerationStatus {
        for _ in 0..100 {
            if let Some(status) = jobs.status(id) {
                if status.stage == stage {
                    return status;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("{} never reached {:?}", id, stage);
    }

    #[tokio::test]
    async fn test_tracks_latest_status() {
        let jobs = JobRegistry::new();
        let reporter = jobs.start("petra");
        assert_eq!(jobs.status("petra").unwrap().stage, GenerationStage::Idle);

        reporter.report(GenerationStage::Planning, 15, "Planning");
        reporter.report(GenerationStage::Ready, 100, "Done");

        let status = wait_for(&jobs, "petra", GenerationStage::Ready).await;
        assert_eq!(status.progress, 100);
        assert!(jobs.status("unknown").is_none());
    }

    #[tokio::test]
    async fn test_superseded_run_is_ignored() {
        let jobs = JobRegistry::new();
        let old = jobs.start("petra");
        let new = jobs.start("petra");

        new.report(GenerationStage::Planning, 15, "Planning again");
        wait_for(&jobs, "petra", GenerationStage::Planning).await;

        old.report(GenerationStage::Ready, 100, "Stale");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(jobs.status("petra").unwrap().stage, GenerationStage::Planning);
    }
}
