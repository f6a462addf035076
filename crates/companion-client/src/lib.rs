use async_trait::async_trait;
use companion_config::ModelSettings;
use companion_core::{CompanionError, Result};
use tracing::{debug, info};

pub mod types;

pub use types::{
    default_safety_settings, GenerateContentRequest, GenerateContentResponse, GenerationConfig,
    HarmBlockThreshold, HarmCategory, SafetySetting,
};

/// A remote service turning a prompt into generated text
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Client for the Gemini `generateContent` REST endpoint
pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    generation_config: GenerationConfig,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish()
    }
}

impl GeminiClient {
    pub fn new(settings: &ModelSettings) -> Result<Self> {
        if settings.api_key.trim().is_empty() {
            return Err(CompanionError::ConfigError("Gemini API key is not set".into()));
        }

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| CompanionError::TransportError(format!("Failed to build HTTP client: {}", e)))?;

        info!("Gemini client ready: model={}", settings.model);

        Ok(Self {
            http,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            api_key: settings.api_key.clone(),
            generation_config: GenerationConfig {
                temperature: settings.temperature,
                max_output_tokens: settings.max_output_tokens,
                top_p: settings.top_p,
                top_k: settings.top_k,
            },
        })
    }

    pub fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }

    pub fn build_request(&self, prompt: &str) -> GenerateContentRequest {
        GenerateContentRequest::new(prompt, self.generation_config)
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = self.build_request(prompt);
        debug!("POST {} ({} prompt chars)", self.url(), prompt.len());

        let response = self.http
            .post(self.url())
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|e| CompanionError::TransportError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompanionError::ApiError {
                status: status.as_u16(),
                body,
            });
        }

        let payload: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| CompanionError::MalformedResponse(e.to_string()))?;

        let text = payload
            .first_text()
            .ok_or_else(|| CompanionError::MalformedResponse("No candidate text in response".into()))?;

        Ok(text.trim().to_string())
    }
}
