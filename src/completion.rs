use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion: api key not configured (set {API_KEY_ENV} or completion.api_key)")]
    MissingCredentials,
    #[error("completion: temperature {0} outside 0.0..=2.0")]
    InvalidTemperature(f32),
    #[error("completion: request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("completion: api error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("completion: response carried no content")]
    EmptyResponse,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_message: String,
    pub prompt: String,
    /// Overrides the client's configured model when set.
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionRequest {
    fn default() -> Self {
        Self {
            system_message: String::new(),
            prompt: String::new(),
            model: None,
            temperature: 0.7,
            max_tokens: 1000,
        }
    }
}

/// The text-completion capability. The analyzer only ever sees this trait,
/// so tests drive it with scripted responses.
pub trait Completion: Send + Sync {
    fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError>;
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub timeout: Option<Duration>,
}

#[derive(Debug)]
pub struct Client {
    http: HttpClient,
    api_key: String,
    base_url: String,
    model: String,
}

impl Client {
    /// Missing credentials fail construction; the capability is either
    /// usable or absent, never half-configured.
    pub fn new(config: ClientConfig) -> Result<Self, CompletionError> {
        let api_key = config
            .api_key
            .filter(|key| !key.trim().is_empty())
            .or_else(|| {
                std::env::var(API_KEY_ENV)
                    .ok()
                    .filter(|key| !key.trim().is_empty())
            })
            .ok_or(CompletionError::MissingCredentials)?;

        let http = HttpClient::builder()
            .timeout(config.timeout.unwrap_or(Duration::from_secs(60)))
            .build()?;

        Ok(Client {
            http,
            api_key,
            base_url: config
                .base_url
                .filter(|url| !url.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: config
                .model
                .filter(|model| !model.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }
}

impl Completion for Client {
    fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        if !(0.0..=2.0).contains(&request.temperature) {
            return Err(CompletionError::InvalidTemperature(request.temperature));
        }

        let body = ChatRequest {
            model: request.model.clone().unwrap_or_else(|| self.model.clone()),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: request.system_message.clone(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: request.prompt.clone(),
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().unwrap_or_default();
            return Err(CompletionError::Api { status, body });
        }

        let parsed: ChatResponse = resp.json()?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.is_empty())
            .ok_or(CompletionError::EmptyResponse)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}
