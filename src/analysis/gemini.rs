use reqwest::Client;
use serde::Deserialize;

use crate::analysis::{render_prompt, AnalysisError, AnalysisProvider};
use crate::state::Config;

pub struct Gemini {
    client: Client,
    base: String,
    model: String,
    api_key: Option<String>,
}

impl Gemini {
    pub fn new(cfg: &Config) -> Self {
        Self {
            client: Client::new(),
            base: cfg.gemini_base.clone(),
            model: cfg.gemini_model.clone(),
            api_key: cfg.api_key.clone(),
        }
    }
}

#[derive(Deserialize, Debug, Default)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize, Debug, Default)]
struct GeminiCandidate {
    #[serde(default)]
    content: GeminiContent,
}

#[derive(Deserialize, Debug, Default)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize, Debug, Default)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Debug)]
struct GeminiErrorBody {
    error: GeminiErrorDetail,
}

#[derive(Deserialize, Debug)]
struct GeminiErrorDetail {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[async_trait::async_trait]
impl AnalysisProvider for Gemini {
    async fn generate_spec(&self, request: &serde_json::Value) -> Result<String, AnalysisError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| AnalysisError::Auth("no API key configured".to_string()))?;

        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base, self.model, api_key
        );
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": render_prompt(request) }] }],
            "generationConfig": { "responseMimeType": "application/json" },
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AnalysisError::Transport(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| AnalysisError::Transport(e.to_string()))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<GeminiErrorBody>(&text)
                .map(|b| b.error)
                .unwrap_or(GeminiErrorDetail { code: status.as_u16() as i64, message: text.clone() });
            return Err(match status.as_u16() {
                401 | 403 => AnalysisError::Auth(detail.message),
                404 => AnalysisError::NotFound(detail.message),
                _ => AnalysisError::Transport(format!("http {}: {}", detail.code, detail.message)),
            });
        }

        let envelope: GeminiResponse = serde_json::from_str(&text)
            .map_err(|e| AnalysisError::Transport(format!("unreadable response envelope: {}", e)))?;
        let document: String = envelope
            .candidates
            .first()
            .map(|c| c.content.parts.iter().map(|p| p.text.as_str()).collect())
            .unwrap_or_default();
        if document.trim().is_empty() {
            return Err(AnalysisError::EmptyResponse);
        }
        Ok(document)
    }
}
