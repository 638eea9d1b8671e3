//! Environment-driven configuration.
//!
//! Everything is read once at startup. `GOOGLE_API_KEY` is the only
//! required variable; a missing key stops the process before the listener
//! binds.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_VISION_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_CHAT_MODEL: &str = "gemini-1.5-pro";
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("API key not found. Please set the {0} environment variable.")]
    MissingApiKey(&'static str),

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub gemini: GeminiConfig,
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

#[derive(Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    /// Model used by the image analysis endpoint.
    pub vision_model: String,
    /// Model behind the chain routes.
    pub chat_model: String,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub max_retries: u32,
    /// `None` means no client-side timeout.
    pub timeout: Option<Duration>,
}

impl fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("vision_model", &self.vision_model)
            .field("chat_model", &self.chat_model)
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("max_retries", &self.max_retries)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = get("GOOGLE_API_KEY").ok_or(ConfigError::MissingApiKey("GOOGLE_API_KEY"))?;

        let gemini = GeminiConfig {
            api_key,
            base_url: get("GEMINI_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
            vision_model: get("GEMINI_VISION_MODEL")
                .unwrap_or_else(|| DEFAULT_VISION_MODEL.to_string()),
            chat_model: get("GEMINI_CHAT_MODEL").unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
            temperature: Some(parse_or("GEMINI_TEMPERATURE", get("GEMINI_TEMPERATURE"), 0.0)?),
            max_output_tokens: parse_opt("GEMINI_MAX_OUTPUT_TOKENS", get("GEMINI_MAX_OUTPUT_TOKENS"))?,
            max_retries: parse_or(
                "GEMINI_MAX_RETRIES",
                get("GEMINI_MAX_RETRIES"),
                DEFAULT_MAX_RETRIES,
            )?,
            timeout: parse_opt::<u64>("GEMINI_TIMEOUT_SECS", get("GEMINI_TIMEOUT_SECS"))?
                .map(Duration::from_secs),
        };

        let server = ServerConfig {
            host: get("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_or("PORT", get("PORT"), 8000)?,
            max_upload_bytes: parse_or(
                "MAX_UPLOAD_BYTES",
                get("MAX_UPLOAD_BYTES"),
                DEFAULT_MAX_UPLOAD_BYTES,
            )?,
        };

        Ok(Config {
            server,
            gemini,
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }
}

fn parse_opt<T: std::str::FromStr>(
    key: &'static str,
    raw: Option<String>,
) -> Result<Option<T>, ConfigError> {
    raw.map(|value| {
        value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value })
    })
    .transpose()
}

fn parse_or<T: std::str::FromStr>(
    key: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    Ok(parse_opt(key, raw)?.unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn missing_api_key_is_fatal() {
        let err = load(&[]).unwrap_err();
        assert_eq!(err, ConfigError::MissingApiKey("GOOGLE_API_KEY"));
        assert!(err.to_string().contains("GOOGLE_API_KEY"));
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let err = load(&[("GOOGLE_API_KEY", "  ")]).unwrap_err();
        assert_eq!(err, ConfigError::MissingApiKey("GOOGLE_API_KEY"));
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("GOOGLE_API_KEY", "k")]).unwrap();
        assert_eq!(config.gemini.api_key, "k");
        assert_eq!(config.gemini.base_url, DEFAULT_GEMINI_BASE_URL);
        assert_eq!(config.gemini.vision_model, "gemini-1.5-flash");
        assert_eq!(config.gemini.chat_model, "gemini-1.5-pro");
        assert_eq!(config.gemini.temperature, Some(0.0));
        assert_eq!(config.gemini.max_output_tokens, None);
        assert_eq!(config.gemini.max_retries, 2);
        assert_eq!(config.gemini.timeout, None);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("GOOGLE_API_KEY", "k"),
            ("GEMINI_BASE_URL", "http://localhost:9999/v1beta/"),
            ("GEMINI_MAX_RETRIES", "0"),
            ("GEMINI_TIMEOUT_SECS", "30"),
            ("GEMINI_MAX_OUTPUT_TOKENS", "2048"),
            ("PORT", "0"),
        ])
        .unwrap();
        assert_eq!(config.gemini.base_url, "http://localhost:9999/v1beta");
        assert_eq!(config.gemini.max_retries, 0);
        assert_eq!(config.gemini.timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.gemini.max_output_tokens, Some(2048));
        assert_eq!(config.server.port, 0);
    }

    #[test]
    fn bad_number_is_rejected() {
        let err = load(&[("GOOGLE_API_KEY", "k"), ("PORT", "eighty")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "PORT",
                value: "eighty".to_string()
            }
        );
    }

    #[test]
    fn debug_output_hides_api_key() {
        let config = load(&[("GOOGLE_API_KEY", "super-secret")]).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("super-secret"));
    }
}
