//! Language-model collaborator.
//!
//! The model is a pure function from instructions and input to text. Every
//! response stays an untyped string until the caller's `accept` closure has
//! parsed and validated it.

mod client;
pub mod prompts;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{Config, RetryPolicy};
use crate::error::{CadError, CadResult};

pub use client::ChatClient;

#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub system: String,
    pub input: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl InferenceRequest {
    /// A deterministic (temperature 0) request.
    pub fn new(system: impl Into<String>, input: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            system: system.into(),
            input: input.into(),
            temperature: 0.0,
            max_tokens,
        }
    }
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("service returned {status}: {body}")]
    Service { status: u16, body: String },

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("model returned an empty response")]
    Empty,

    #[error("malformed service response: {0}")]
    Malformed(String),
}

impl ModelError {
    /// Network failures, timeouts, throttling and server errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            ModelError::Transport(_) | ModelError::Timeout(_) => true,
            ModelError::Service { status, .. } => *status == 429 || *status >= 500,
            ModelError::Empty | ModelError::Malformed(_) => false,
        }
    }
}

impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        ModelError::Transport(err.to_string())
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn infer(&self, request: &InferenceRequest) -> Result<String, ModelError>;
}

/// One model call with a timeout per attempt and bounded exponential backoff
/// for retryable failures.
pub async fn call_model<M>(
    model: &M,
    request: &InferenceRequest,
    policy: &RetryPolicy,
    timeout: Duration,
) -> CadResult<String>
where
    M: LanguageModel + ?Sized,
{
    let attempts = policy.upstream_attempts.max(1);
    let mut delay = policy.backoff;
    let mut last_error = None;

    for attempt in 1..=attempts {
        let result = match tokio::time::timeout(timeout, model.infer(request)).await {
            Ok(result) => result,
            Err(_) => Err(ModelError::Timeout(timeout)),
        };
        match result {
            Ok(text) if text.trim().is_empty() => {
                return Err(CadError::SchemaViolation(ModelError::Empty.to_string()))
            }
            Ok(text) => return Ok(text),
            Err(err) if err.is_retryable() => {
                warn!(attempt, attempts, error = %err, "Model call failed");
                last_error = Some(err);
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
            Err(err @ (ModelError::Empty | ModelError::Malformed(_))) => {
                return Err(CadError::SchemaViolation(err.to_string()))
            }
            Err(err) => return Err(CadError::UpstreamUnavailable(err.to_string())),
        }
    }

    Err(CadError::UpstreamUnavailable(match last_error {
        Some(err) => format!("{} (after {} attempts)", err, attempts),
        None => "no attempt was made".to_string(),
    }))
}

/// A response accepted by the caller, with the number of prompts it took.
#[derive(Debug, Clone)]
pub struct Accepted<T> {
    pub value: T,
    pub attempts: u32,
}

/// Prompts the model until `accept` takes a response.
///
/// A response rejected with a schema, program or grammar error is answered
/// with a re-prompt whose instructions name the violated rule, at most
/// `repair_attempts` times. Any other error ends the negotiation.
pub async fn negotiate<M, T, F>(
    model: &M,
    config: &Config,
    system: &str,
    input: &str,
    mut accept: F,
) -> CadResult<Accepted<T>>
where
    M: LanguageModel + ?Sized,
    F: FnMut(&str) -> CadResult<T>,
{
    let attempts = config.retry.repair_attempts + 1;
    let mut feedback: Option<String> = None;
    let mut last_error = None;

    for attempt in 1..=attempts {
        let instructions = match &feedback {
            Some(feedback) => prompts::with_feedback(system, feedback),
            None => system.to_string(),
        };
        let request = InferenceRequest::new(instructions, input, config.model.max_tokens);
        debug!(attempt, input_chars = input.len(), "Prompting model");

        let outcome = match call_model(model, &request, &config.retry, config.model.timeout).await {
            Ok(text) => accept(&text),
            Err(err) => Err(err),
        };
        match outcome {
            Ok(value) => return Ok(Accepted { value, attempts: attempt }),
            Err(err) if err.is_repairable() => {
                warn!(attempt, attempts, error = %err, "Model response rejected");
                feedback = Some(prompts::rejection_feedback(&err));
                last_error = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_error
        .unwrap_or_else(|| CadError::UpstreamUnavailable("no attempt was made".to_string())))
}
