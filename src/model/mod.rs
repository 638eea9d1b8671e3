//! Chat model abstraction.
//!
//! The service only ever talks to a model through [`ChatModel`], so the
//! HTTP layer and the chain can run against Gemini in production and a
//! stub in tests.

pub mod gemini;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use thiserror::Error;

pub use gemini::GeminiModel;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Gemini API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Prompt blocked: {0}")]
    Blocked(String),

    #[error("{0}")]
    Other(String),
}

impl ModelError {
    /// Whether the request that produced this error is worth sending again.
    pub fn is_retryable(&self) -> bool {
        match self {
            ModelError::Network(_) => true,
            ModelError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    InlineData { mime_type: String, data: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Message {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self { role, parts }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![Part::Text(text.into())])
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::Text(text.into())])
    }
}

/// Incremental text produced by a model.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, ModelError>> + Send>>;

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model identifier, used in logs.
    fn name(&self) -> &str;

    /// Start a streaming generation for the given conversation.
    async fn stream(&self, messages: Vec<Message>) -> Result<TextStream, ModelError>;

    /// Run a generation to completion and return the full text.
    async fn generate(&self, messages: Vec<Message>) -> Result<String, ModelError> {
        let stream = self.stream(messages).await?;
        drain(stream).await
    }
}

/// Concatenate every chunk of a stream, failing on the first error.
pub async fn drain(mut stream: TextStream) -> Result<String, ModelError> {
    let mut text = String::new();
    while let Some(chunk) = stream.next().await {
        text.push_str(&chunk?);
    }
    Ok(text)
}
