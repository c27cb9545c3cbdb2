use super::SceneHotspot;
use crate::service::PlannedEvent;
use std::fmt;
use uuid::Uuid;

/// Validation errors for a planned timeline
#[derive(Debug, Clone, PartialEq)]
pub enum PlanValidationError {
    Empty,
    WrongEventCount { expected: usize, actual: usize },
    MissingTitle(usize),
    MissingVisualPrompt(usize),
}

impl fmt::Display for PlanValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanValidationError::Empty => write!(f, "timeline plan has no events"),
            PlanValidationError::WrongEventCount { expected, actual } => {
                write!(f, "timeline plan must have {} events, got {}", expected, actual)
            }
            PlanValidationError::MissingTitle(i) => write!(f, "event {} has no title", i),
            PlanValidationError::MissingVisualPrompt(i) => {
                write!(f, "event {} has no visual prompt", i)
            }
        }
    }
}

impl std::error::Error for PlanValidationError {}

/// Validates a planned timeline before any image work is spent on it.
///
/// Rules:
/// - At least one event
/// - Exactly `expected_count` events (the timeline is never resized later)
/// - Every event has a non-blank title
/// - Every event has a non-blank visual prompt
pub fn validate_plan(
    events: &[PlannedEvent],
    expected_count: usize,
) -> Result<(), PlanValidationError> {
    if events.is_empty() {
        return Err(PlanValidationError::Empty);
    }
    if events.len() != expected_count {
        return Err(PlanValidationError::WrongEventCount {
            expected: expected_count,
            actual: events.len(),
        });
    }

    for (i, event) in events.iter().enumerate() {
        if event.title.trim().is_empty() {
            return Err(PlanValidationError::MissingTitle(i));
        }
        if event.visual_prompt.trim().is_empty() {
            return Err(PlanValidationError::MissingVisualPrompt(i));
        }
    }

    Ok(())
}

/// Clamps hotspot coordinates into [0,1] and assigns ids where missing.
///
/// Non-finite coordinates land at the image centre.
pub fn normalize_hotspots(hotspots: Vec<SceneHotspot>) -> Vec<SceneHotspot> {
    hotspots
        .into_iter()
        .map(|mut h| {
            h.x = clamp_unit(h.x);
            h.y = clamp_unit(h.y);
            if h.id.trim().is_empty() {
                h.id = Uuid::new_v4().to_string();
            }
            h
        })
        .collect()
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.5
    }
}

#[cfg(test)]
mod validation_tests {
    use super::*;

    fn planned(title: &str, prompt: &str) -> PlannedEvent {
        PlannedEvent {
            year: 1200,
            title: title.to_string(),
            description: "desc".to_string(),
            visual_prompt: prompt.to_string(),
        }
    }

    #[test]
    fn test_blank_fields_rejected() {
        let events = vec![planned("A", "p"), planned("  ", "p")];
        assert_eq!(validate_plan(&events, 2), Err(PlanValidationError::MissingTitle(1)));

        let events = vec![planned("A", "")];
        assert_eq!(
            validate_plan(&events, 1),
            Err(PlanValidationError::MissingVisualPrompt(0))
        );
    }

    #[test]
    fn test_empty_plan_rejected() {
        assert_eq!(validate_plan(&[], 0), Err(PlanValidationError::Empty));
    }

    #[test]
    fn test_clamp_unit() {
        assert_eq!(clamp_unit(-0.2), 0.0);
        assert_eq!(clamp_unit(1.7), 1.0);
        assert_eq!(clamp_unit(0.25), 0.25);
        assert_eq!(clamp_unit(f64::NAN), 0.5);
    }
}
