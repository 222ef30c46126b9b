use anyhow::Context;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use teachback_core::persona::VoiceSet;
use tracing::{Level, warn};

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Defines the supported backend providers for the chat model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Gemini,
}

impl Provider {
    /// Base URL of the provider's OpenAI-compatible endpoint.
    pub fn api_base(&self) -> &'static str {
        match self {
            Provider::OpenAI => "https://api.openai.com/v1/",
            Provider::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            Provider::OpenAI => "gpt-4o",
            Provider::Gemini => "gemini-2.5-flash",
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub provider: Provider,
    pub api_key: String,
    pub chat_model: String,
    pub log_level: Level,
    pub prompts_path: PathBuf,
    pub content_path: PathBuf,
    pub voices: VoiceSet,
    /// How long a session created over REST may wait for a connection.
    pub session_idle_timeout: Duration,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env files in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::from_filename(".env.local").ok();
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let provider_str = std::env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let provider = match provider_str.to_lowercase().as_str() {
            "openai" => Provider::OpenAI,
            "gemini" => Provider::Gemini,
            other => {
                return Err(ConfigError::InvalidValue(
                    "LLM_PROVIDER".to_string(),
                    format!("'{}' is not one of 'openai', 'gemini'", other),
                ));
            }
        };

        let key_var = match provider {
            Provider::OpenAI => "OPENAI_API_KEY",
            Provider::Gemini => "GEMINI_API_KEY",
        };
        let api_key = std::env::var(key_var).map_err(|_| {
            ConfigError::MissingVar(format!(
                "{} must be set for '{}' provider",
                key_var,
                provider_str.to_lowercase()
            ))
        })?;

        let chat_model = std::env::var("CHAT_MODEL")
            .unwrap_or_else(|_| provider.default_model().to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let prompts_path = std::env::var("PROMPTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./prompts"));

        let content_path = std::env::var("CONTENT_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./content/concepts.json"));

        let defaults = VoiceSet::default();
        let voices = VoiceSet {
            learn: std::env::var("VOICE_LEARN").unwrap_or(defaults.learn),
            quiz: std::env::var("VOICE_QUIZ").unwrap_or(defaults.quiz),
            teach_back: std::env::var("VOICE_TEACH_BACK").unwrap_or(defaults.teach_back),
        };

        let timeout_str =
            std::env::var("SESSION_IDLE_TIMEOUT_SECS").unwrap_or_else(|_| "900".to_string());
        let session_idle_timeout = timeout_str
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| {
                ConfigError::InvalidValue("SESSION_IDLE_TIMEOUT_SECS".to_string(), e.to_string())
            })?;

        Ok(Self {
            bind_address,
            provider,
            api_key,
            chat_model,
            log_level,
            prompts_path,
            content_path,
            voices,
            session_idle_timeout,
        })
    }
}

/// Loads every `*.md` prompt template in `prompts_path`, keyed by file stem.
///
/// A missing directory yields no templates and the built-in prompts are used.
pub fn load_prompts(prompts_path: &Path) -> anyhow::Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    if !prompts_path.is_dir() {
        warn!(path = %prompts_path.display(), "Prompts directory not found. Using built-in prompts.");
        return Ok(prompts);
    }
    for entry in std::fs::read_dir(prompts_path)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?
                .to_string();
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read prompt {}", path.display()))?;
            prompts.insert(prompt_key, content);
        }
    }
    Ok(prompts)
}
