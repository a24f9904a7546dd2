//! HTTP client for OpenAI-compatible chat completion endpoints.
//!
//! Two conventions are supported:
//! - OpenAI style: `{endpoint}/chat/completions` with a bearer token
//! - Azure style: selected by an API version; `api-key` header and
//!   `?api-version=` query on the deployment URL

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{InferenceRequest, LanguageModel, ModelError};
use crate::config::ModelConfig;

#[derive(Debug, Clone)]
pub struct ChatClient {
    endpoint: String,
    api_key: Option<String>,
    model: String,
    api_version: Option<String>,
    client: Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl ChatClient {
    pub fn from_config(config: &ModelConfig) -> Result<Self, ModelError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            api_version: config.api_version.clone(),
            client,
        })
    }

    fn url(&self) -> String {
        let base = self.endpoint.trim_end_matches('/');
        match &self.api_version {
            Some(version) => format!("{}/chat/completions?api-version={}", base, version),
            None => format!("{}/chat/completions", base),
        }
    }

    /// Build a request with the auth header for the configured convention.
    fn request(&self, body: &ChatRequest<'_>) -> reqwest::RequestBuilder {
        let mut req = self.client.post(self.url()).json(body);
        if let Some(ref key) = self.api_key {
            req = if self.api_version.is_some() {
                req.header("api-key", key)
            } else {
                req.bearer_auth(key)
            };
        }
        req
    }

    async fn handle_response(&self, response: reqwest::Response) -> Result<String, ModelError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Service {
                status: status.as_u16(),
                body,
            });
        }
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Malformed(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(ModelError::Empty)?;
        if content.trim().is_empty() {
            return Err(ModelError::Empty);
        }
        Ok(content)
    }
}

#[async_trait]
impl LanguageModel for ChatClient {
    async fn infer(&self, request: &InferenceRequest) -> Result<String, ModelError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.input,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };
        let response = self.request(&body).send().await.map_err(|e| {
            if e.is_timeout() {
                ModelError::Transport(format!("timed out: {}", e))
            } else {
                ModelError::from(e)
            }
        })?;
        self.handle_response(response).await
    }
}
