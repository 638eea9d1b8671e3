//! Google Gemini chat model.
//!
//! Talks to the `streamGenerateContent` endpoint with `alt=sse` and turns
//! the server-sent events into a [`TextStream`].

use super::{ChatModel, Message, ModelError, Part, Role, TextStream};
use crate::config::GeminiConfig;
use async_trait::async_trait;
use backoff::{future::retry_notify, ExponentialBackoff, ExponentialBackoffBuilder};
use base64::{engine::general_purpose, Engine as _};
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const API_KEY_HEADER: &str = "x-goog-api-key";
const DEFAULT_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

pub struct GeminiModel {
    model: String,
    api_key: String,
    base_url: String,
    temperature: Option<f32>,
    max_output_tokens: Option<u32>,
    max_retries: u32,
    backoff: Duration,
    client: Client,
}

impl GeminiModel {
    pub fn new(config: &GeminiConfig, model: impl Into<String>) -> Result<Self, ModelError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ModelError::Client(e.to_string()))?;

        Ok(Self {
            model: model.into(),
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            temperature: None,
            max_output_tokens: config.max_output_tokens,
            max_retries: config.max_retries,
            backoff: DEFAULT_BACKOFF,
            client,
        })
    }

    /// Model used for the image analysis endpoint. Sampling is left to the
    /// provider defaults.
    pub fn vision(config: &GeminiConfig) -> Result<Self, ModelError> {
        Self::new(config, config.vision_model.clone())
    }

    /// Model behind the chain routes.
    pub fn chat(config: &GeminiConfig) -> Result<Self, ModelError> {
        Ok(Self::new(config, config.chat_model.clone())?.with_temperature(config.temperature))
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    /// Delay before the first retry. It doubles on every further attempt,
    /// up to ten seconds.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        )
    }

    fn build_request(&self, messages: Vec<Message>) -> GenerateContentRequest {
        let mut system_parts = Vec::new();
        let mut contents = Vec::new();

        for message in messages {
            let parts = message.parts.into_iter().map(RequestPart::from);
            match message.role {
                Role::System => system_parts.extend(parts),
                Role::User => contents.push(Content {
                    role: Some("user"),
                    parts: parts.collect(),
                }),
                Role::Model => contents.push(Content {
                    role: Some("model"),
                    parts: parts.collect(),
                }),
            }
        }

        let generation_config = if self.temperature.is_some() || self.max_output_tokens.is_some() {
            Some(GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
            })
        } else {
            None
        };

        GenerateContentRequest {
            contents,
            system_instruction: (!system_parts.is_empty()).then(|| Content {
                role: None,
                parts: system_parts,
            }),
            generation_config,
        }
    }

    async fn send_once(
        &self,
        request: &GenerateContentRequest,
    ) -> Result<reqwest::Response, ModelError> {
        let response = self
            .client
            .post(self.stream_url())
            .header(API_KEY_HEADER, &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    fn retry_policy(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.backoff)
            .with_multiplier(2.0)
            .with_randomization_factor(0.1)
            .with_max_interval(MAX_BACKOFF)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Sends the request, retrying transient failures with capped
    /// exponential backoff. At most `max_retries` extra attempts are made.
    async fn send_with_retry(
        &self,
        request: &GenerateContentRequest,
    ) -> Result<reqwest::Response, ModelError> {
        let mut attempt = 0u32;
        retry_notify(
            self.retry_policy(),
            || {
                attempt += 1;
                let retries_left = attempt <= self.max_retries;
                async move {
                    self.send_once(request).await.map_err(|e| {
                        if retries_left && e.is_retryable() {
                            backoff::Error::transient(e)
                        } else {
                            backoff::Error::permanent(e)
                        }
                    })
                }
            },
            |e: ModelError, delay: Duration| {
                tracing::warn!(
                    model = %self.model,
                    max_retries = self.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Gemini request failed, retrying"
                );
            },
        )
        .await
    }
}

#[async_trait]
impl ChatModel for GeminiModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn stream(&self, messages: Vec<Message>) -> Result<TextStream, ModelError> {
        let request = self.build_request(messages);

        tracing::debug!(
            model = %self.model,
            contents = request.contents.len(),
            "Starting streaming request to Gemini API"
        );

        let response = self.send_with_retry(&request).await?;

        let (tx, rx) = mpsc::channel(32);
        let model = self.model.clone();

        tokio::spawn(async move {
            let mut events = response.bytes_stream().eventsource();
            let mut produced_text = false;

            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        let _ = tx.send(Err(ModelError::Network(e.to_string()))).await;
                        return;
                    }
                };
                if event.data.is_empty() {
                    continue;
                }

                match decode_chunk(&event.data) {
                    Ok(Some(text)) => {
                        produced_text = true;
                        if tx.send(Ok(text)).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }

            if !produced_text {
                let _ = tx
                    .send(Err(ModelError::MalformedResponse(
                        "Gemini returned no text".to_string(),
                    )))
                    .await;
                return;
            }

            tracing::debug!(model = %model, "Gemini stream finished");
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Extract the text carried by one SSE payload.
fn decode_chunk(payload: &str) -> Result<Option<String>, ModelError> {
    let response: GenerateContentResponse = serde_json::from_str(payload)
        .map_err(|e| ModelError::MalformedResponse(format!("{}: {}", e, payload)))?;

    if let Some(error) = response.error {
        return Err(ModelError::Api {
            status: error.code.unwrap_or(500),
            body: error.message,
        });
    }

    let Some(candidate) = response.candidates.into_iter().next() else {
        return match response.prompt_feedback.and_then(|f| f.block_reason) {
            Some(reason) => Err(ModelError::Blocked(reason)),
            None => Ok(None),
        };
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.is_empty() {
        if let Some(reason @ ("SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT")) =
            candidate.finish_reason.as_deref()
        {
            return Err(ModelError::Blocked(reason.to_string()));
        }
        return Ok(None);
    }

    Ok(Some(text))
}

// Gemini API request/response types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

impl From<Part> for RequestPart {
    fn from(part: Part) -> Self {
        match part {
            Part::Text(text) => RequestPart::Text { text },
            Part::InlineData { mime_type, data } => RequestPart::InlineData {
                inline_data: InlineData {
                    mime_type,
                    data: general_purpose::STANDARD.encode(data),
                },
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> GeminiConfig {
        GeminiConfig {
            api_key: "test-key".to_string(),
            base_url: "http://localhost:1/v1beta/".to_string(),
            vision_model: "gemini-1.5-flash".to_string(),
            chat_model: "gemini-1.5-pro".to_string(),
            temperature: Some(0.0),
            max_output_tokens: None,
            max_retries: 2,
            timeout: None,
        }
    }

    #[test]
    fn stream_url_targets_sse_endpoint() {
        let model = GeminiModel::vision(&config()).unwrap();
        assert_eq!(
            model.stream_url(),
            "http://localhost:1/v1beta/models/gemini-1.5-flash:streamGenerateContent?alt=sse"
        );
    }

    #[test]
    fn image_request_carries_text_and_inline_data() {
        let model = GeminiModel::vision(&config()).unwrap();
        let request = model.build_request(vec![Message::new(
            Role::User,
            vec![
                Part::Text("Analyze".to_string()),
                Part::InlineData {
                    mime_type: "image/png".to_string(),
                    data: vec![1, 2, 3],
                },
            ],
        )]);

        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(
            body,
            json!({
                "contents": [{
                    "role": "user",
                    "parts": [
                        { "text": "Analyze" },
                        { "inline_data": { "mime_type": "image/png", "data": "AQID" } }
                    ]
                }]
            })
        );
    }

    #[test]
    fn system_messages_become_system_instruction() {
        let model = GeminiModel::chat(&config()).unwrap();
        let request = model.build_request(vec![
            Message::system("You are an inspector."),
            Message::user("banana"),
        ]);

        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(
            body["systemInstruction"],
            json!({ "parts": [{ "text": "You are an inspector." }] })
        );
        assert_eq!(body["contents"][0]["parts"][0]["text"], "banana");
        assert_eq!(body["generationConfig"]["temperature"], 0.0);
    }

    #[test]
    fn retry_delay_is_capped() {
        use backoff::backoff::Backoff;

        let model = GeminiModel::vision(&config())
            .unwrap()
            .with_backoff(Duration::from_secs(1));
        let mut policy = model.retry_policy();

        let delays: Vec<Duration> = (0..20).map_while(|_| policy.next_backoff()).collect();
        assert_eq!(delays.len(), 20);
        assert!(delays[0] <= Duration::from_millis(1100));
        assert!(delays.iter().all(|d| *d <= MAX_BACKOFF.mul_f64(1.1)));
    }

    #[test]
    fn chunk_text_joins_all_parts() {
        let payload = json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": "Item 1: " }, { "text": "Apple" }] }
            }]
        })
        .to_string();
        assert_eq!(decode_chunk(&payload).unwrap().as_deref(), Some("Item 1: Apple"));
    }

    #[test]
    fn usage_only_chunk_has_no_text() {
        let payload = json!({ "usageMetadata": { "totalTokenCount": 12 } }).to_string();
        assert_eq!(decode_chunk(&payload).unwrap(), None);
    }

    #[test]
    fn blocked_prompt_is_an_error() {
        let payload = json!({ "promptFeedback": { "blockReason": "SAFETY" } }).to_string();
        let err = decode_chunk(&payload).unwrap_err();
        assert_eq!(err.to_string(), "Prompt blocked: SAFETY");
    }

    #[test]
    fn error_payload_is_an_api_error() {
        let payload =
            json!({ "error": { "code": 400, "message": "API key not valid" } }).to_string();
        let err = decode_chunk(&payload).unwrap_err();
        assert_eq!(err.to_string(), "Gemini API error 400: API key not valid");
    }

    #[test]
    fn garbage_payload_is_malformed() {
        let err = decode_chunk("not json").unwrap_err();
        assert!(matches!(err, ModelError::MalformedResponse(_)));
    }
}
