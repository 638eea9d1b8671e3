//! Invoke/batch/stream routes for the freshness chain, following the
//! LangServe request and response shapes.

use crate::chain::ChainInput;
use crate::error::AppError;
use crate::startup::AppState;
use axum::{
    async_trait,
    extract::{FromRequest, Request, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::{Stream, StreamExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct InvokeRequest {
    pub input: ChainInput,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub inputs: Vec<ChainInput>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvokeResponse {
    pub output: String,
    pub metadata: RunMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchResponse {
    pub output: Vec<String>,
    pub metadata: BatchMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchMetadata {
    pub run_ids: Vec<Uuid>,
}

/// JSON body extractor whose rejections render as `{"detail": ...}`.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(ApiJson(value))
    }
}

/// `POST /api/invoke`
pub async fn invoke(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<InvokeRequest>,
) -> Result<Json<InvokeResponse>, AppError> {
    let run_id = Uuid::new_v4();

    tracing::info!(%run_id, "Chain invoke");
    let output = state.chain.invoke(&request.input).await?;

    Ok(Json(InvokeResponse {
        output,
        metadata: RunMetadata { run_id },
    }))
}

/// `POST /api/batch`
pub async fn batch(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<BatchRequest>,
) -> Result<Json<BatchResponse>, AppError> {
    let run_ids: Vec<Uuid> = request.inputs.iter().map(|_| Uuid::new_v4()).collect();

    tracing::info!(size = request.inputs.len(), "Chain batch");
    let output = state.chain.batch(&request.inputs).await?;

    Ok(Json(BatchResponse {
        output,
        metadata: BatchMetadata { run_ids },
    }))
}

/// `POST /api/stream`
///
/// Emits `metadata`, then one `data` event per chunk, then `end`. A failure
/// after the stream has started is reported as an `error` event.
pub async fn stream(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<InvokeRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let run_id = Uuid::new_v4();

    tracing::info!(%run_id, "Chain stream");
    let mut chunks = state.chain.stream(&request.input).await?;

    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        let metadata = Event::default()
            .event("metadata")
            .data(json!({ "run_id": run_id }).to_string());
        if tx.send(metadata).await.is_err() {
            return;
        }

        while let Some(chunk) = chunks.next().await {
            let event = match chunk {
                Ok(text) => Event::default()
                    .event("data")
                    .data(Value::String(text).to_string()),
                Err(e) => {
                    tracing::error!(%run_id, error = %e, "Chain stream failed");
                    let _ = tx
                        .send(
                            Event::default()
                                .event("error")
                                .data(json!({ "status_code": 500, "message": e.to_string() }).to_string()),
                        )
                        .await;
                    return;
                }
            };
            if tx.send(event).await.is_err() {
                return;
            }
        }

        let _ = tx.send(Event::default().event("end")).await;
    });

    Ok(Sse::new(ReceiverStream::new(rx).map(Ok::<_, Infallible>)).keep_alive(KeepAlive::default()))
}

/// `GET /api/input_schema`
pub async fn input_schema(State(state): State<AppState>) -> Json<Value> {
    let variables = state.chain.prompt().input_variables();
    let properties: serde_json::Map<String, Value> = variables
        .iter()
        .map(|name| (name.clone(), json!({ "title": title(name), "type": "string" })))
        .collect();

    Json(json!({
        "title": "PromptInput",
        "type": "object",
        "properties": properties,
        "required": variables,
    }))
}

/// `GET /api/output_schema`
pub async fn output_schema(State(state): State<AppState>) -> Json<Value> {
    Json(state.chain.parser().output_schema())
}

/// `GET /api/config_schema`
pub async fn config_schema() -> Json<Value> {
    Json(json!({
        "title": "RunnableSequenceConfig",
        "type": "object",
        "properties": {},
    }))
}

fn title(name: &str) -> String {
    name.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http};

    #[test]
    fn titles_are_capitalized() {
        assert_eq!(title("text"), "Text");
        assert_eq!(title("item_name"), "Item Name");
    }

    fn json_request(body: &'static str) -> Request {
        http::Request::builder()
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn invoke_body_ignores_config_and_kwargs() {
        let req = json_request(r#"{"input": {"text": "kiwi"}, "config": {}, "kwargs": {}}"#);
        let ApiJson(request) = ApiJson::<InvokeRequest>::from_request(req, &()).await.unwrap();
        assert_eq!(request.input.get("text").map(String::as_str), Some("kiwi"));
    }

    #[tokio::test]
    async fn non_string_input_is_unprocessable() {
        let req = json_request(r#"{"input": {"text": 5}}"#);
        let err = ApiJson::<InvokeRequest>::from_request(req, &())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AppError::Unprocessable(_)));
    }
}
