use std::sync::{Arc, RwLock};

/// Settings that change without a restart.
///
/// The remote-service API key lives here so the credential-setup flow
/// (PUT /api/credentials) takes effect on the very next remote call.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub api_key: Option<String>,
}

impl RuntimeConfig {
    /// Build from env vars, falling back to defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        for var in ["GEMINI_API_KEY", "API_KEY"] {
            if let Ok(v) = std::env::var(var) {
                if !v.trim().is_empty() {
                    cfg.api_key = Some(v.trim().to_string());
                    break;
                }
            }
        }

        cfg
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

pub type SharedRuntimeConfig = Arc<RwLock<RuntimeConfig>>;

pub fn new_runtime_config() -> SharedRuntimeConfig {
    Arc::new(RwLock::new(RuntimeConfig::from_env()))
}
