use std::env;

use chrono_tz::Tz;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // AI providers
    pub anthropic_api_key: String,
    pub voyage_api_key: String,

    /// Dimension of the deployed embedding model. Stored vectors must match.
    pub embedding_dim: usize,

    // HTTP surface
    pub api_key: String,
    pub web_host: String,
    pub web_port: u16,

    /// Time zone used to resolve day boundaries for feed / pinned windows
    /// and ingest chunking. Storage stays UTC.
    pub display_timezone: Tz,

    /// When set, the classifier logs candidate tags per event at debug level.
    pub debug_classification: bool,
}

impl Config {
    /// Load configuration for the API server.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            anthropic_api_key: required_env("ANTHROPIC_API_KEY"),
            voyage_api_key: required_env("VOYAGE_API_KEY"),
            embedding_dim: env_parse("EMBEDDING_DIM", 1024),
            api_key: required_env("API_KEY"),
            web_host: env::var("WEB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            web_port: env::var("WEB_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .expect("WEB_PORT must be a number"),
            display_timezone: display_timezone_from_env(),
            debug_classification: env_flag("DEBUG_CLASSIFICATION"),
        }
    }

    /// Load config for ingest runs (no HTTP auth needed).
    pub fn ingest_from_env() -> Self {
        Self {
            anthropic_api_key: required_env("ANTHROPIC_API_KEY"),
            voyage_api_key: required_env("VOYAGE_API_KEY"),
            embedding_dim: env_parse("EMBEDDING_DIM", 1024),
            api_key: env::var("API_KEY").unwrap_or_default(),
            web_host: String::new(),
            web_port: 0,
            display_timezone: display_timezone_from_env(),
            debug_classification: env_flag("DEBUG_CLASSIFICATION"),
        }
    }

    /// Log presence and length of each sensitive env var for debugging.
    pub fn log_redacted(&self) {
        let vars = [
            ("ANTHROPIC_API_KEY", &self.anthropic_api_key),
            ("VOYAGE_API_KEY", &self.voyage_api_key),
            ("API_KEY", &self.api_key),
        ];
        for (name, value) in vars {
            if value.is_empty() {
                tracing::info!("{name} = (empty)");
            } else {
                tracing::info!("{name} = ({} chars)", value.len());
            }
        }
        tracing::info!(
            embedding_dim = self.embedding_dim,
            display_timezone = %self.display_timezone,
            "config loaded"
        );
    }
}

fn display_timezone_from_env() -> Tz {
    let name =
        env::var("DISPLAY_TIMEZONE").unwrap_or_else(|_| "America/Los_Angeles".to_string());
    name.parse()
        .unwrap_or_else(|_| panic!("DISPLAY_TIMEZONE is not a valid IANA zone: {name}"))
}

fn env_flag(key: &str) -> bool {
    matches!(
        env::var(key).unwrap_or_default().to_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}
