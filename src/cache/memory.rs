use super::ArtifactStore;
use crate::timeline::TimelineArtifact;
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;

/// Process-local store. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    artifacts: DashMap<String, TimelineArtifact>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<TimelineArtifact>> {
        Ok(self.artifacts.get(id).map(|a| a.value().clone()))
    }

    async fn put(&self, artifact: &TimelineArtifact) -> Result<()> {
        self.artifacts.insert(artifact.id.clone(), artifact.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.artifacts.remove(id);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<TimelineArtifact>> {
        let mut all: Vec<TimelineArtifact> =
            self.artifacts.iter().map(|a| a.value().clone()).collect();
        all.sort_by_key(|a| a.created_at);
        Ok(all)
    }
}
