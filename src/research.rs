//! Voice research intake: screen a spoken topic request and, when approved,
//! turn the research report into a generation request.

use crate::pipeline::GenerationRequest;
use crate::resilience::{RemoteError, ResilientCall};
use crate::service::GenerationService;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub enum ResearchDecision {
    /// Ready to hand to the pipeline
    Approved {
        title: String,
        request: GenerationRequest,
    },
    /// The service declined the topic
    Rejected { feedback: String },
}

pub struct ResearchIntake {
    service: Arc<dyn GenerationService>,
    resilient: ResilientCall,
}

impl ResearchIntake {
    pub fn new(service: Arc<dyn GenerationService>, resilient: ResilientCall) -> Self {
        Self { service, resilient }
    }

    /// Research a spoken request (base64 audio).
    pub async fn conduct(&self, audio: &str) -> Result<ResearchDecision, RemoteError> {
        let outcome = self
            .resilient
            .execute("conduct_research", || self.service.conduct_research(audio))
            .await?;

        if !outcome.approved || outcome.report.trim().is_empty() {
            let feedback = outcome
                .feedback
                .filter(|f| !f.trim().is_empty())
                .unwrap_or_else(|| "The request could not be researched.".to_string());
            info!(feedback = %feedback, "Research request rejected");
            return Ok(ResearchDecision::Rejected { feedback });
        }

        let title = if outcome.title.trim().is_empty() {
            "Untitled research".to_string()
        } else {
            outcome.title
        };
        info!(title = %title, sources = outcome.sources.len(), "Research approved");

        let request = GenerationRequest::research(
            title.clone(),
            outcome.report,
            outcome.image_prompts,
            outcome.sources,
        );
        Ok(ResearchDecision::Approved { title, request })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::GenerationInput;
    use crate::service::ResearchOutcome;
    use crate::testing::{self, instant_retries, FakeService};

    #[tokio::test]
    async fn test_approved_research_becomes_request() {
        let service = Arc::new(FakeService::new());
        let intake = ResearchIntake::new(service.clone(), instant_retries(3));

        let decision = intake.conduct("c3BlZWNo").await.unwrap();

        let ResearchDecision::Approved { title, request } = decision else {
            panic!("expected approval");
        };
        assert_eq!(title, "Hanging Gardens");
        assert!(request.is_user_submitted());
        match request.input {
            GenerationInput::Research {
                topic,
                report,
                image_prompts,
                sources,
            } => {
                assert_eq!(topic, "Hanging Gardens");
                assert_eq!(report, "A report on the gardens of Babylon");
                assert_eq!(image_prompts, vec!["Terraced gardens above the Euphrates"]);
                assert_eq!(sources.len(), 1);
            }
            other => panic!("unexpected input: {:?}", other),
        }
        assert_eq!(service.calls(testing::RESEARCH), 1);
    }

    #[tokio::test]
    async fn test_rejected_research_carries_feedback() {
        let service = Arc::new(FakeService::new().with_research(ResearchOutcome {
            approved: false,
            title: String::new(),
            report: String::new(),
            image_prompts: vec![],
            sources: vec![],
            feedback: Some("Please name a historical place.".to_string()),
        }));
        let intake = ResearchIntake::new(service, instant_retries(3));

        assert_eq!(
            intake.conduct("c3BlZWNo").await.unwrap(),
            ResearchDecision::Rejected {
                feedback: "Please name a historical place.".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_research_retries_transient_failures() {
        let service = Arc::new(FakeService::new());
        service.fail_next(testing::RESEARCH, RemoteError::with_status(429, "slow down"));
        let intake = ResearchIntake::new(service.clone(), instant_retries(3));

        assert!(intake.conduct("c3BlZWNo").await.is_ok());
        assert_eq!(service.calls(testing::RESEARCH), 2);
    }
}
