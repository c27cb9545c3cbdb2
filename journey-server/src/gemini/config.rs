pub const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub const TEXT_MODEL: &str = "gemini-2.5-flash";
pub const IMAGE_MODEL: &str = "gemini-2.5-flash-image";
pub const SPEECH_MODEL: &str = "gemini-2.5-flash-preview-tts";
pub const NARRATOR_VOICE: &str = "Kore";

/// Model names used for each capability.
///
/// Overridable through environment variables:
/// - `GEMINI_TEXT_MODEL`
/// - `GEMINI_IMAGE_MODEL`
/// - `GEMINI_SPEECH_MODEL`
/// - `GEMINI_VOICE`
#[derive(Debug, Clone, PartialEq)]
pub struct GeminiModels {
    pub text: String,
    pub image: String,
    pub speech: String,
    pub voice: String,
}

impl Default for GeminiModels {
    fn default() -> Self {
        Self {
            text: TEXT_MODEL.to_string(),
            image: IMAGE_MODEL.to_string(),
            speech: SPEECH_MODEL.to_string(),
            voice: NARRATOR_VOICE.to_string(),
        }
    }
}

impl GeminiModels {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let var = |name: &str, fallback: String| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(fallback)
        };
        Self {
            text: var("GEMINI_TEXT_MODEL", defaults.text),
            image: var("GEMINI_IMAGE_MODEL", defaults.image),
            speech: var("GEMINI_SPEECH_MODEL", defaults.speech),
            voice: var("GEMINI_VOICE", defaults.voice),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env vars are process-wide
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_defaults() {
        let models = GeminiModels::default();
        assert_eq!(models.text, "gemini-2.5-flash");
        assert_eq!(models.voice, "Kore");
    }

    #[test]
    fn test_from_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        std::env::set_var("GEMINI_IMAGE_MODEL", "imagen-test");
        std::env::set_var("GEMINI_VOICE", "  ");

        let models = GeminiModels::from_env();
        assert_eq!(models.image, "imagen-test");
        // Blank values fall back
        assert_eq!(models.voice, NARRATOR_VOICE);

        std::env::remove_var("GEMINI_IMAGE_MODEL");
        std::env::remove_var("GEMINI_VOICE");
    }
}
