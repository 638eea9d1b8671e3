#![allow(dead_code)]

use async_trait::async_trait;
use freshness_analyzer::config::ServerConfig;
use freshness_analyzer::model::{ChatModel, Message, ModelError, TextStream};
use freshness_analyzer::startup::{AppState, Application};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

enum Reply {
    Text(String),
    Fail(String),
}

/// Model stand-in that records every call and answers with a fixed reply.
pub struct StubModel {
    reply: Reply,
    calls: AtomicUsize,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl StubModel {
    pub fn text(text: &str) -> Arc<Self> {
        Arc::new(Self::new(Reply::Text(text.to_string())))
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self::new(Reply::Fail(message.to_string())))
    }

    fn new(reply: Reply) -> Self {
        Self {
            reply,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<Vec<Message>> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ChatModel for StubModel {
    fn name(&self) -> &str {
        "stub"
    }

    async fn stream(&self, messages: Vec<Message>) -> Result<TextStream, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(messages);

        match &self.reply {
            Reply::Text(text) => {
                // Word-sized chunks, the way the provider streams.
                let chunks: Vec<Result<String, ModelError>> = text
                    .split_inclusive(' ')
                    .map(|chunk| Ok(chunk.to_string()))
                    .collect();
                Ok(Box::pin(tokio_stream::iter(chunks)))
            }
            Reply::Fail(message) => Err(ModelError::Other(message.clone())),
        }
    }
}

pub const UPLOAD_LIMIT: usize = 1024 * 1024;

/// Spawn the application on a random port and return its base URL.
pub async fn spawn_app(vision: Arc<StubModel>, chat: Arc<StubModel>) -> String {
    let server = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        max_upload_bytes: UPLOAD_LIMIT,
    };

    let state = AppState::new(vision, chat, server.max_upload_bytes)
        .expect("Failed to build application state");
    let app = Application::build_with_state(&server, state)
        .await
        .expect("Failed to build application");
    let address = format!("http://127.0.0.1:{}", app.port());

    tokio::spawn(app.run_until_stopped());

    address
}
