use crate::chain::Chain;
use crate::config::{Config, ServerConfig};
use crate::model::{ChatModel, GeminiModel};
use crate::parser::StrOutputParser;
use crate::prompt::{ChatPromptTemplate, PromptError};
use crate::routes;
use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

#[derive(Clone)]
pub struct AppState {
    /// Model called directly by the image analysis endpoint.
    pub vision: Arc<dyn ChatModel>,
    pub chain: Arc<Chain>,
    pub parser: StrOutputParser,
    /// Largest accepted request body, in bytes.
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(
        vision: Arc<dyn ChatModel>,
        chat: Arc<dyn ChatModel>,
        max_upload_bytes: usize,
    ) -> Result<Self, PromptError> {
        let parser = StrOutputParser;
        let chain = Chain::new(ChatPromptTemplate::freshness()?, chat, parser);
        Ok(Self {
            vision,
            chain: Arc::new(chain),
            parser,
            max_upload_bytes,
        })
    }
}

pub fn router(state: AppState) -> Router {
    let max_upload_bytes = state.max_upload_bytes;

    Router::new()
        .route("/", get(routes::index))
        .route("/health", get(routes::health_check))
        .route("/api/analyze-image", post(routes::analyze_image))
        .route("/api/invoke", post(routes::chain::invoke))
        .route("/api/batch", post(routes::chain::batch))
        .route("/api/stream", post(routes::chain::stream))
        .route("/api/input_schema", get(routes::chain::input_schema))
        .route("/api/output_schema", get(routes::chain::output_schema))
        .route("/api/config_schema", get(routes::chain::config_schema))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::very_permissive())
                .layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .with_state(state)
}

pub struct Application {
    port: u16,
    server: Pin<Box<dyn Future<Output = std::io::Result<()>> + Send>>,
}

impl Application {
    /// Wire the Gemini models from configuration and bind the listener.
    pub async fn build(config: &Config) -> anyhow::Result<Self> {
        let vision =
            GeminiModel::vision(&config.gemini).context("Failed to create vision model client")?;
        let chat =
            GeminiModel::chat(&config.gemini).context("Failed to create chat model client")?;

        let state = AppState::new(
            Arc::new(vision),
            Arc::new(chat),
            config.server.max_upload_bytes,
        )
        .context("Failed to build chain prompt")?;
        Self::build_with_state(&config.server, state).await
    }

    pub async fn build_with_state(server: &ServerConfig, state: AppState) -> anyhow::Result<Self> {
        let app = router(state);

        let addr = format!("{}:{}", server.host, server.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind TCP listener to {}", addr))?;
        let port = listener.local_addr()?.port();

        tracing::info!(host = %server.host, port, "Listening");

        let server = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .into_future();

        Ok(Self {
            port,
            server: Box::pin(server),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.server.await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
