use chronolens::config::SharedRuntimeConfig;
use chronolens::resilience::RemoteError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::config::BASE_URL;

/// A `generateContent` request part.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }

    pub fn inline(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: mime_type.into(),
                data: data.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub content: Option<CandidateContent>,
    pub grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePart {
    pub text: Option<String>,
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundingMetadata {
    #[serde(default)]
    pub grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Deserialize)]
pub struct GroundingChunk {
    pub web: Option<WebSource>,
}

#[derive(Debug, Deserialize)]
pub struct WebSource {
    pub uri: Option<String>,
    pub title: Option<String>,
}

impl GenerateResponse {
    fn parts(&self) -> impl Iterator<Item = &ResponsePart> {
        self.candidates
            .iter()
            .filter_map(|c| c.content.as_ref())
            .flat_map(|c| c.parts.iter())
    }

    /// Concatenated text parts.
    pub fn text(&self) -> Option<String> {
        let text: String = self.parts().filter_map(|p| p.text.as_deref()).collect();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// First inline (binary) part.
    pub fn inline_data(&self) -> Option<&InlineData> {
        self.parts().find_map(|p| p.inline_data.as_ref())
    }

    /// Web sources from search grounding, as (title, uri).
    pub fn web_sources(&self) -> Vec<(String, String)> {
        self.candidates
            .iter()
            .filter_map(|c| c.grounding_metadata.as_ref())
            .flat_map(|g| g.grounding_chunks.iter())
            .filter_map(|chunk| chunk.web.as_ref())
            .filter_map(|web| {
                let uri = web.uri.clone()?;
                Some((web.title.clone().unwrap_or_else(|| uri.clone()), uri))
            })
            .collect()
    }
}

/// Optional request settings.
#[derive(Debug, Default, Clone)]
pub struct GenerateOptions {
    /// Ask for `application/json` output
    pub json: bool,
    /// Enable Google Search grounding
    pub search: bool,
    /// e.g. `["IMAGE"]` or `["AUDIO"]`
    pub response_modalities: Vec<&'static str>,
    pub voice: Option<String>,
}

/// HTTP client for the Gemini `generateContent` REST API.
///
/// Reads the API key from the shared runtime config on every call so a key
/// entered through the credentials endpoint applies immediately.
pub struct GeminiClient {
    runtime: SharedRuntimeConfig,
    http_client: Client,
    base_url: String,
}

impl GeminiClient {
    /// Create a client using the public Gemini endpoint.
    pub fn new(runtime: SharedRuntimeConfig) -> Self {
        Self::with_base_url(runtime, BASE_URL.to_string())
    }

    /// Create a client with a custom base URL (for testing with a mock server).
    pub fn with_base_url(runtime: SharedRuntimeConfig, base_url: String) -> Self {
        Self {
            runtime,
            http_client: Client::new(),
            base_url,
        }
    }

    fn api_key(&self) -> Result<String, RemoteError> {
        self.runtime
            .read()
            .unwrap()
            .api_key
            .clone()
            .ok_or_else(|| RemoteError::with_status(401, "API key not configured"))
    }

    pub async fn generate(
        &self,
        model: &str,
        parts: Vec<Part>,
        options: &GenerateOptions,
    ) -> Result<GenerateResponse, RemoteError> {
        let api_key = self.api_key()?;
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let body = request_body(parts, options);

        let response = self
            .http_client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let response = check_response_status(response).await?;
        response
            .json::<GenerateResponse>()
            .await
            .map_err(|e| RemoteError::new(format!("Failed to parse Gemini response: {}", e)))
    }
}

fn request_body(parts: Vec<Part>, options: &GenerateOptions) -> Value {
    let mut body = serde_json::json!({
        "contents": [{ "role": "user", "parts": parts }],
    });

    let mut generation_config = serde_json::Map::new();
    if options.json {
        generation_config.insert("responseMimeType".into(), "application/json".into());
    }
    if !options.response_modalities.is_empty() {
        generation_config.insert(
            "responseModalities".into(),
            serde_json::json!(options.response_modalities),
        );
    }
    if let Some(voice) = &options.voice {
        generation_config.insert(
            "speechConfig".into(),
            serde_json::json!({
                "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": voice } }
            }),
        );
    }
    if !generation_config.is_empty() {
        body["generationConfig"] = Value::Object(generation_config);
    }
    if options.search {
        body["tools"] = serde_json::json!([{ "googleSearch": {} }]);
    }
    body
}

/// Connection failures and timeouts count as the service being unavailable.
fn transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() || e.is_connect() {
        RemoteError::with_status(503, format!("Gemini unreachable: {}", e))
    } else {
        RemoteError::new(format!("Gemini request failed: {}", e))
    }
}

/// Map non-2xx responses to a `RemoteError` carrying the HTTP status.
///
/// The message keeps Gemini's status name (e.g. `RESOURCE_EXHAUSTED`) so
/// credential and quota failures can be recognised downstream.
async fn check_response_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| {
            let error = v.get("error")?;
            let message = error.get("message")?.as_str()?.to_string();
            Some(match error.get("status").and_then(|s| s.as_str()) {
                Some(name) => format!("{}: {}", name, message),
                None => message,
            })
        })
        .unwrap_or_else(|| format!("Gemini API error: {}", status));

    Err(RemoteError::with_status(status.as_u16(), message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronolens::config::RuntimeConfig;
    use mockito::Server;
    use std::sync::{Arc, RwLock};

    fn runtime(key: Option<&str>) -> SharedRuntimeConfig {
        Arc::new(RwLock::new(RuntimeConfig {
            api_key: key.map(|k| k.to_string()),
        }))
    }

    #[tokio::test]
    async fn test_generate_text() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/models/gemini-2.5-flash:generateContent")
            .match_header("x-goog-api-key", "test-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "candidates": [{
                        "content": {"parts": [{"text": "{\"name\": "}, {"text": "\"Petra\"}"}]},
                        "groundingMetadata": {"groundingChunks": [
                            {"web": {"uri": "https://en.wikipedia.org/wiki/Petra", "title": "Petra"}}
                        ]}
                    }]
                }"#,
            )
            .create_async()
            .await;

        let client = GeminiClient::with_base_url(runtime(Some("test-key")), server.url());
        let response = client
            .generate("gemini-2.5-flash", vec![Part::text("hi")], &GenerateOptions::default())
            .await
            .unwrap();

        assert_eq!(response.text().unwrap(), "{\"name\": \"Petra\"}");
        assert_eq!(
            response.web_sources(),
            vec![(
                "Petra".to_string(),
                "https://en.wikipedia.org/wiki/Petra".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_error_body_maps_to_remote_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/models/gemini-2.5-flash:generateContent")
            .with_status(429)
            .with_body(
                r#"{"error": {"code": 429, "message": "You exceeded your current quota", "status": "RESOURCE_EXHAUSTED"}}"#,
            )
            .create_async()
            .await;

        let client = GeminiClient::with_base_url(runtime(Some("k")), server.url());
        let err = client
            .generate("gemini-2.5-flash", vec![Part::text("hi")], &GenerateOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.status, Some(429));
        assert_eq!(err.message, "RESOURCE_EXHAUSTED: You exceeded your current quota");
    }

    #[tokio::test]
    async fn test_non_json_error_body() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/models/gemini-2.5-flash:generateContent")
            .with_status(503)
            .with_body("upstream connect error")
            .create_async()
            .await;

        let client = GeminiClient::with_base_url(runtime(Some("k")), server.url());
        let err = client
            .generate("gemini-2.5-flash", vec![Part::text("hi")], &GenerateOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.status, Some(503));
        assert!(err.message.contains("503"));
    }

    #[tokio::test]
    async fn test_missing_key_is_unauthorized() {
        let client = GeminiClient::with_base_url(runtime(None), "http://127.0.0.1:1".to_string());
        let err = client
            .generate("gemini-2.5-flash", vec![Part::text("hi")], &GenerateOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.status, Some(401));
    }

    #[test]
    fn test_request_body_options() {
        let options = GenerateOptions {
            json: true,
            search: true,
            response_modalities: vec!["AUDIO"],
            voice: Some("Kore".to_string()),
        };
        let body = request_body(vec![Part::inline("image/png", "AAAA")], &options);

        assert_eq!(body["contents"][0]["parts"][0]["inlineData"]["mimeType"], "image/png");
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["generationConfig"]["responseModalities"][0], "AUDIO");
        let voice = &body["generationConfig"]["speechConfig"]["voiceConfig"];
        assert_eq!(voice["prebuiltVoiceConfig"]["voiceName"], "Kore");
        assert!(body["tools"][0].get("googleSearch").is_some());

        let plain = request_body(vec![Part::text("hi")], &GenerateOptions::default());
        assert!(plain.get("generationConfig").is_none());
        assert!(plain.get("tools").is_none());
    }
}
