use anyhow::Context;
use freshness_analyzer::config::Config;
use freshness_analyzer::startup::Application;
use freshness_analyzer::telemetry::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(&config.log_level);

    tracing::info!(
        vision_model = %config.gemini.vision_model,
        chat_model = %config.gemini.chat_model,
        "Starting freshness analyzer"
    );

    let app = Application::build(&config).await?;
    app.run_until_stopped().await?;

    tracing::info!("Server stopped");
    Ok(())
}
