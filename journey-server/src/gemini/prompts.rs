//! Prompt text for each capability. JSON-returning prompts describe the
//! exact shape the parser in `gemini::mod` expects.

use chronolens::TimelineEvent;

pub fn identify() -> String {
    "Identify the landmark, building or historical site in this photo. \
     Respond with JSON: {\"name\": string, \"location\": string} where location \
     is the city and country."
        .to_string()
}

pub fn plan_timeline(name: &str, location: &str, event_count: usize) -> String {
    format!(
        "Research the history of {name} in {location} using reliable sources. \
         Choose exactly {event_count} pivotal eras in chronological order, from its \
         origins to the present day. Respond with JSON: {{\"events\": [{{\"year\": integer \
         (negative for BCE), \"title\": string, \"description\": string (2-3 sentences), \
         \"visualPrompt\": string (a detailed scene description of the site in that era)}}]}}"
    )
}

pub fn plan_from_report(topic: &str, report: &str, event_count: usize) -> String {
    format!(
        "Using only the research report below about {topic}, choose exactly \
         {event_count} pivotal eras in chronological order. Respond with JSON: \
         {{\"events\": [{{\"year\": integer, \"title\": string, \"description\": string, \
         \"visualPrompt\": string}}]}}\n\nREPORT:\n{report}"
    )
}

pub fn render_image(
    prompt: &str,
    subject_name: &str,
    has_reference: bool,
    panoramic: bool,
) -> String {
    let framing = if panoramic {
        "Photorealistic 360-degree equirectangular panorama"
    } else {
        "Photorealistic wide-angle photograph"
    };
    let reference = if has_reference {
        " Match the architecture and viewpoint of the attached reference photo."
    } else {
        ""
    };
    format!(
        "{framing} of {subject_name}: {prompt}. Historically accurate materials, \
         people and clothing for the period.{reference}"
    )
}

pub fn identify_hotspots(subject_name: &str, year: i32) -> String {
    format!(
        "This image shows {subject_name} in the year {year}. Identify up to 5 notable \
         points of interest visible in the scene. Respond with JSON: [{{\"name\": string, \
         \"description\": string, \"x\": number, \"y\": number}}] where x and y are the \
         position normalized to 0..1 (equirectangular for panoramas)."
    )
}

pub fn narration_script(subject_name: &str, events: &[TimelineEvent]) -> String {
    let eras: Vec<String> = events
        .iter()
        .map(|e| format!("- {}: {}. {}", e.year, e.title, e.description))
        .collect();
    format!(
        "Write a warm, engaging narration of about 150 words that guides a listener \
         through the history of {subject_name} across these eras:\n{}\n\
         Return only the narration text.",
        eras.join("\n")
    )
}

pub fn research() -> String {
    "The attached audio is a spoken request to explore a historical place or topic. \
     If it is a genuine historical request, research it and respond with JSON: \
     {\"approved\": true, \"title\": string, \"report\": string (300-500 words), \
     \"imagePrompts\": [string]}. Otherwise respond with \
     {\"approved\": false, \"feedback\": string explaining what to ask instead}."
        .to_string()
}

pub fn validate_relevance(subject_name: &str, year: i32, content: &str, is_audio: bool) -> String {
    let contribution = if is_audio {
        "the attached audio recording".to_string()
    } else {
        format!("this text: \"{}\"", content)
    };
    format!(
        "A visitor wants to add {contribution} to the story of {subject_name} around the \
         year {year}. Decide whether it is relevant to that place and period. Respond with \
         JSON: {{\"relevant\": boolean, \"feedback\": string}}."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_prompt_mentions_count() {
        let prompt = plan_timeline("Petra", "Jordan", 4);
        assert!(prompt.contains("exactly 4 pivotal eras"));
        assert!(prompt.contains("\"visualPrompt\""));
    }

    #[test]
    fn test_relevance_prompt_embeds_text_only() {
        assert!(validate_relevance("Petra", 100, "Nabataean tombs", false).contains("Nabataean"));
        assert!(!validate_relevance("Petra", 100, "AAAA", true).contains("AAAA"));
    }
}
