use crate::cache::TimelineCache;
use crate::resilience::{RemoteError, ResilientCall};
use crate::service::GenerationService;
use crate::timeline::Annotation;
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationError {
    ArtifactNotFound(String),
    EventOutOfRange { index: usize, len: usize },
    EmptyContent,
    /// The service judged the contribution off-topic
    Rejected { feedback: String },
    Remote(RemoteError),
    Storage(String),
}

impl fmt::Display for AnnotationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnnotationError::ArtifactNotFound(id) => write!(f, "journey {} not found", id),
            AnnotationError::EventOutOfRange { index, len } => {
                write!(f, "event {} out of range (timeline has {})", index, len)
            }
            AnnotationError::EmptyContent => write!(f, "annotation is empty"),
            AnnotationError::Rejected { feedback } => write!(f, "{}", feedback),
            AnnotationError::Remote(e) => write!(f, "{}", e),
            AnnotationError::Storage(msg) => write!(f, "failed to save annotation: {}", msg),
        }
    }
}

impl std::error::Error for AnnotationError {}

/// Validated user contributions on a journey's eras.
pub struct Annotations {
    service: Arc<dyn GenerationService>,
    resilient: ResilientCall,
    cache: TimelineCache,
}

impl Annotations {
    pub fn new(
        service: Arc<dyn GenerationService>,
        resilient: ResilientCall,
        cache: TimelineCache,
    ) -> Self {
        Self {
            service,
            resilient,
            cache,
        }
    }

    /// Check relevance to the era, then append to the artifact.
    ///
    /// `content` is text, or base64 audio when `is_audio`.
    pub async fn add(
        &self,
        artifact_id: &str,
        event_index: usize,
        content: &str,
        is_audio: bool,
    ) -> Result<Annotation, AnnotationError> {
        if content.trim().is_empty() {
            return Err(AnnotationError::EmptyContent);
        }

        let artifact = self
            .cache
            .get(artifact_id)
            .await
            .ok_or_else(|| AnnotationError::ArtifactNotFound(artifact_id.to_string()))?;
        let event = artifact
            .timeline
            .get(event_index)
            .ok_or(AnnotationError::EventOutOfRange {
                index: event_index,
                len: artifact.timeline.len(),
            })?;

        let verdict = self
            .resilient
            .execute("validate_relevance", || {
                self.service
                    .validate_relevance(&artifact.subject_name, event.year, content, is_audio)
            })
            .await
            .map_err(AnnotationError::Remote)?;
        if !verdict.relevant {
            return Err(AnnotationError::Rejected {
                feedback: verdict.feedback,
            });
        }

        let annotation = Annotation {
            id: Uuid::now_v7().to_string(),
            event_index,
            content: content.to_string(),
            is_audio,
            created_at: Utc::now(),
        };

        let appended = annotation.clone();
        let updated = self
            .cache
            .update(artifact_id, move |a| a.annotations.push(appended))
            .await
            .map_err(|e| AnnotationError::Storage(e.to_string()))?;
        if updated.is_none() {
            // Deleted while the service was deciding
            return Err(AnnotationError::ArtifactNotFound(artifact_id.to_string()));
        }

        info!(
            artifact_id = %artifact_id,
            event_index,
            annotation_id = %annotation.id,
            "Annotation added"
        );
        Ok(annotation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::default_catalog;
    use crate::config::PipelineConfig;
    use crate::pipeline::{GenerationPipeline, GenerationRequest, StatusReporter};
    use crate::service::RelevanceVerdict;
    use crate::testing::{self, instant_retries, FakeService};

    async fn setup(service: FakeService) -> (Arc<FakeService>, TimelineCache, Annotations) {
        let service = Arc::new(service);
        let cache = TimelineCache::in_memory();
        GenerationPipeline::new(
            service.clone(),
            cache.clone(),
            instant_retries(0),
            PipelineConfig::default(),
        )
        .run(
            GenerationRequest::preset(&default_catalog()[0]),
            &StatusReporter::silent(),
        )
        .await
        .unwrap();
        let annotations = Annotations::new(service.clone(), instant_retries(0), cache.clone());
        (service, cache, annotations)
    }

    #[tokio::test]
    async fn test_relevant_annotation_is_appended() {
        let (service, cache, annotations) = setup(FakeService::new()).await;

        let added = annotations
            .add("colosseum", 1, "My grandfather worked here", false)
            .await
            .unwrap();

        assert_eq!(service.calls(testing::RELEVANCE), 1);
        let stored = cache.get("colosseum").await.unwrap();
        assert_eq!(stored.annotations, vec![added]);
        // Generated events are untouched
        assert!(stored.timeline[0].generated);
    }

    #[tokio::test]
    async fn test_irrelevant_annotation_rejected() {
        let verdict = RelevanceVerdict {
            relevant: false,
            feedback: "This is about a different building.".to_string(),
        };
        let (_, cache, annotations) = setup(FakeService::new().with_relevance(verdict)).await;

        let err = annotations
            .add("colosseum", 1, "The Eiffel Tower is tall", false)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "This is about a different building.");
        assert!(cache.get("colosseum").await.unwrap().annotations.is_empty());
    }

    #[tokio::test]
    async fn test_bad_targets() {
        let (service, _, annotations) = setup(FakeService::new()).await;

        assert_eq!(
            annotations.add("atlantis", 0, "hello", false).await,
            Err(AnnotationError::ArtifactNotFound("atlantis".to_string()))
        );
        assert_eq!(
            annotations.add("colosseum", 9, "hello", false).await,
            Err(AnnotationError::EventOutOfRange { index: 9, len: 4 })
        );
        assert_eq!(
            annotations.add("colosseum", 0, "   ", false).await,
            Err(AnnotationError::EmptyContent)
        );
        assert_eq!(service.calls(testing::RELEVANCE), 0);
    }
}
