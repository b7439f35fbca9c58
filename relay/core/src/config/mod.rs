//! TOML Configuration File Support
//!
//! One file at `~/.config/relay/config.toml` configures every adapter.
//!
//! # Configuration Priority
//!
//! Values are resolved with the following priority (highest first):
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. `RELAY_*` environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [subscription]
//! ack_timeout_secs = 10
//!
//! [resilience]
//! failure_threshold = 5
//! cooldown_secs = 30
//! call_timeout_secs = 30
//! max_retries = 3
//! initial_backoff_ms = 1000
//! max_backoff_ms = 30000
//!
//! [llm]
//! base_url = "http://localhost:11434"
//! model = "llama3.2"
//! stream_timeout_secs = 120
//!
//! [speech]
//! asr_url = "http://localhost:8000"
//! tts_url = "http://localhost:8000"
//! voice = "af_sarah"
//!
//! [session]
//! history_limit = 50
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::LlmConfig;
use crate::resilience::ResilienceConfig;
use crate::session::DEFAULT_HISTORY_LIMIT;
use crate::speech::SpeechConfig;
use crate::subscription::SubscriptionConfig;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to render TOML
    #[error("Failed to render TOML config: {0}")]
    RenderError(#[from] toml::ser::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where the highest-priority configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[subscription]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionToml {
    /// Seconds to wait for a subscribe acknowledgement
    pub ack_timeout_secs: Option<u64>,
    /// Subscribe as an agent
    pub agent_mode: Option<bool>,
    /// Subscribe as a voice session
    pub voice_mode: Option<bool>,
}

/// `[resilience]` section, shared by every outbound adapter
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceToml {
    /// Consecutive failures that open the breaker
    pub failure_threshold: Option<u32>,
    /// Seconds the breaker stays open
    pub cooldown_secs: Option<u64>,
    /// Deadline for one call including retries
    pub call_timeout_secs: Option<u64>,
    /// Retries after the first attempt
    pub max_retries: Option<u32>,
    /// First backoff delay
    pub initial_backoff_ms: Option<u64>,
    /// Backoff ceiling
    pub max_backoff_ms: Option<u64>,
}

/// `[llm]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmToml {
    /// Server base URL
    pub base_url: Option<String>,
    /// Bearer token
    pub api_key: Option<String>,
    /// Model name
    pub model: Option<String>,
    /// Completion token cap
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Prepended system message
    pub system_prompt: Option<String>,
    /// Lifetime bound for one streamed response
    pub stream_timeout_secs: Option<u64>,
    /// TCP connect bound
    pub connect_timeout_secs: Option<u64>,
}

/// `[speech]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechToml {
    /// Transcription server
    pub asr_url: Option<String>,
    /// Synthesis server
    pub tts_url: Option<String>,
    /// Transcription model
    pub asr_model: Option<String>,
    /// Synthesis model
    pub tts_model: Option<String>,
    /// Default voice
    pub voice: Option<String>,
    /// Default synthesis format
    pub tts_format: Option<String>,
    /// Default playback speed
    pub speed: Option<f32>,
    /// Transcription language hint
    pub language: Option<String>,
    /// Transcription deadline
    pub asr_timeout_secs: Option<u64>,
    /// Synthesis deadline
    pub tts_timeout_secs: Option<u64>,
}

/// `[session]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionToml {
    /// Messages loaded on resume
    pub history_limit: Option<usize>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayToml {
    /// Subscription section
    pub subscription: SubscriptionToml,
    /// Resilience section
    pub resilience: ResilienceToml,
    /// Model gateway section
    pub llm: LlmToml,
    /// Speech adapters section
    pub speech: SpeechToml,
    /// Session section
    pub session: SessionToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved configuration for every component
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Subscription manager settings
    pub subscription: SubscriptionConfig,
    /// Breaker, retry and deadline shared by adapters
    pub resilience: ResilienceConfig,
    /// Model gateway settings
    pub llm: LlmConfig,
    /// Speech adapter settings
    pub speech: SpeechConfig,
    /// Messages a session keeps cached
    pub history_limit: usize,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            subscription: SubscriptionConfig::default(),
            resilience: ResilienceConfig::default(),
            llm: LlmConfig::default(),
            speech: SpeechConfig::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl RelayConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest-priority source that contributed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Model gateway settings with the shared resilience policy
    #[must_use]
    pub fn llm_config(&self) -> LlmConfig {
        LlmConfig {
            resilience: self.resilience.clone(),
            ..self.llm.clone()
        }
    }

    /// Speech settings with the shared resilience policy
    #[must_use]
    pub fn speech_config(&self) -> SpeechConfig {
        SpeechConfig {
            resilience: self.resilience.clone(),
            ..self.speech.clone()
        }
    }

    /// Check values that would make components misbehave
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::ValidationError(msg.to_string()));

        if self.resilience.breaker.failure_threshold == 0 {
            return invalid("resilience.failure_threshold must be at least 1");
        }
        if self.resilience.call_timeout.is_zero() {
            return invalid("resilience.call_timeout_secs must be positive");
        }
        if self.resilience.retry.initial_backoff_ms > self.resilience.retry.max_backoff_ms {
            return invalid("resilience.initial_backoff_ms exceeds max_backoff_ms");
        }
        if self.subscription.ack_timeout.is_zero() {
            return invalid("subscription.ack_timeout_secs must be positive");
        }
        if self.llm.base_url.trim().is_empty() {
            return invalid("llm.base_url is empty");
        }
        if self.llm.stream_timeout.is_zero() {
            return invalid("llm.stream_timeout_secs must be positive");
        }
        if let Some(t) = self.llm.temperature {
            if !(0.0..=2.0).contains(&t) {
                return invalid("llm.temperature must be between 0 and 2");
            }
        }
        if self.speech.asr_url.trim().is_empty() || self.speech.tts_url.trim().is_empty() {
            return invalid("speech URLs must not be empty");
        }
        if self.speech.speed <= 0.0 {
            return invalid("speech.speed must be positive");
        }
        if self.history_limit == 0 {
            return invalid("session.history_limit must be at least 1");
        }
        Ok(())
    }

    /// Effective configuration as TOML, with the API key masked
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::RenderError`] if serialization fails.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        let rendered = RelayToml {
            subscription: SubscriptionToml {
                ack_timeout_secs: Some(self.subscription.ack_timeout.as_secs()),
                agent_mode: Some(self.subscription.agent_mode),
                voice_mode: Some(self.subscription.voice_mode),
            },
            resilience: ResilienceToml {
                failure_threshold: Some(self.resilience.breaker.failure_threshold),
                cooldown_secs: Some(self.resilience.breaker.cooldown.as_secs()),
                call_timeout_secs: Some(self.resilience.call_timeout.as_secs()),
                max_retries: Some(self.resilience.retry.max_retries),
                initial_backoff_ms: Some(self.resilience.retry.initial_backoff_ms),
                max_backoff_ms: Some(self.resilience.retry.max_backoff_ms),
            },
            llm: LlmToml {
                base_url: Some(self.llm.base_url.clone()),
                api_key: self.llm.api_key.as_ref().map(|_| "********".to_string()),
                model: Some(self.llm.model.clone()),
                max_tokens: self.llm.max_tokens,
                temperature: self.llm.temperature,
                system_prompt: self.llm.system_prompt.clone(),
                stream_timeout_secs: Some(self.llm.stream_timeout.as_secs()),
                connect_timeout_secs: Some(self.llm.connect_timeout.as_secs()),
            },
            speech: SpeechToml {
                asr_url: Some(self.speech.asr_url.clone()),
                tts_url: Some(self.speech.tts_url.clone()),
                asr_model: Some(self.speech.asr_model.clone()),
                tts_model: Some(self.speech.tts_model.clone()),
                voice: Some(self.speech.voice.clone()),
                tts_format: Some(self.speech.tts_format.clone()),
                speed: Some(self.speech.speed),
                language: self.speech.language.clone(),
                asr_timeout_secs: Some(self.speech.asr_timeout.as_secs()),
                tts_timeout_secs: Some(self.speech.tts_timeout.as_secs()),
            },
            session: SessionToml {
                history_limit: Some(self.history_limit),
            },
        };
        Ok(toml::to_string_pretty(&rendered)?)
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/relay/config.toml` or the platform equivalent.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("relay").join("config.toml"))
}

/// Load configuration from the default path and the process environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the result fails validation. A missing config file is not an error.
pub fn load_config() -> Result<RelayConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path and the process environment
///
/// # Errors
///
/// See [`load_config`].
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<RelayConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration with an explicit environment lookup
///
/// # Errors
///
/// See [`load_config`].
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<RelayConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = RelayConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content = read_config_file(config_path)?;
            let toml_config: RelayToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env);
    config.validate()?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
        path: path.to_path_buf(),
        source,
    })
}

fn apply_toml_config(config: &mut RelayConfig, toml: &RelayToml) {
    let sub = &toml.subscription;
    if let Some(secs) = sub.ack_timeout_secs {
        config.subscription.ack_timeout = Duration::from_secs(secs);
    }
    if let Some(agent) = sub.agent_mode {
        config.subscription.agent_mode = agent;
    }
    if let Some(voice) = sub.voice_mode {
        config.subscription.voice_mode = voice;
    }

    let res = &toml.resilience;
    if let Some(threshold) = res.failure_threshold {
        config.resilience.breaker.failure_threshold = threshold;
    }
    if let Some(secs) = res.cooldown_secs {
        config.resilience.breaker.cooldown = Duration::from_secs(secs);
    }
    if let Some(secs) = res.call_timeout_secs {
        config.resilience.call_timeout = Duration::from_secs(secs);
    }
    if let Some(retries) = res.max_retries {
        config.resilience.retry.max_retries = retries;
    }
    if let Some(ms) = res.initial_backoff_ms {
        config.resilience.retry.initial_backoff_ms = ms;
    }
    if let Some(ms) = res.max_backoff_ms {
        config.resilience.retry.max_backoff_ms = ms;
    }

    let llm = &toml.llm;
    if let Some(ref url) = llm.base_url {
        config.llm.base_url.clone_from(url);
    }
    if llm.api_key.is_some() {
        config.llm.api_key.clone_from(&llm.api_key);
    }
    if let Some(ref model) = llm.model {
        config.llm.model.clone_from(model);
    }
    if llm.max_tokens.is_some() {
        config.llm.max_tokens = llm.max_tokens;
    }
    if llm.temperature.is_some() {
        config.llm.temperature = llm.temperature;
    }
    if llm.system_prompt.is_some() {
        config.llm.system_prompt.clone_from(&llm.system_prompt);
    }
    if let Some(secs) = llm.stream_timeout_secs {
        config.llm.stream_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = llm.connect_timeout_secs {
        config.llm.connect_timeout = Duration::from_secs(secs);
    }

    let speech = &toml.speech;
    if let Some(ref url) = speech.asr_url {
        config.speech.asr_url.clone_from(url);
    }
    if let Some(ref url) = speech.tts_url {
        config.speech.tts_url.clone_from(url);
    }
    if let Some(ref model) = speech.asr_model {
        config.speech.asr_model.clone_from(model);
    }
    if let Some(ref model) = speech.tts_model {
        config.speech.tts_model.clone_from(model);
    }
    if let Some(ref voice) = speech.voice {
        config.speech.voice.clone_from(voice);
    }
    if let Some(ref format) = speech.tts_format {
        config.speech.tts_format.clone_from(format);
    }
    if let Some(speed) = speech.speed {
        config.speech.speed = speed;
    }
    if speech.language.is_some() {
        config.speech.language.clone_from(&speech.language);
    }
    if let Some(secs) = speech.asr_timeout_secs {
        config.speech.asr_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = speech.tts_timeout_secs {
        config.speech.tts_timeout = Duration::from_secs(secs);
    }

    if let Some(limit) = toml.session.history_limit {
        config.history_limit = limit;
    }
}

/// Apply `RELAY_*` overrides; unparsable values are ignored with a warning
fn apply_env_config<F>(config: &mut RelayConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    let mut touched = false;
    let mut string = |key: &str, target: &mut String| {
        if let Some(value) = env(key) {
            *target = value;
            touched = true;
        }
    };
    string("RELAY_LLM_URL", &mut config.llm.base_url);
    string("RELAY_LLM_MODEL", &mut config.llm.model);
    string("RELAY_ASR_URL", &mut config.speech.asr_url);
    string("RELAY_TTS_URL", &mut config.speech.tts_url);
    string("RELAY_TTS_VOICE", &mut config.speech.voice);

    if let Some(key) = env("RELAY_LLM_API_KEY") {
        config.llm.api_key = Some(key);
        touched = true;
    }
    if let Some(prompt) = env("RELAY_SYSTEM_PROMPT") {
        config.llm.system_prompt = Some(prompt);
        touched = true;
    }

    if let Some(secs) = parse_env::<u64, _>(&env, "RELAY_STREAM_TIMEOUT_SECS") {
        config.llm.stream_timeout = Duration::from_secs(secs);
        touched = true;
    }
    if let Some(secs) = parse_env::<u64, _>(&env, "RELAY_ACK_TIMEOUT_SECS") {
        config.subscription.ack_timeout = Duration::from_secs(secs);
        touched = true;
    }
    if let Some(secs) = parse_env::<u64, _>(&env, "RELAY_CALL_TIMEOUT_SECS") {
        config.resilience.call_timeout = Duration::from_secs(secs);
        touched = true;
    }
    if let Some(retries) = parse_env::<u32, _>(&env, "RELAY_MAX_RETRIES") {
        config.resilience.retry.max_retries = retries;
        touched = true;
    }
    if let Some(threshold) = parse_env::<u32, _>(&env, "RELAY_FAILURE_THRESHOLD") {
        config.resilience.breaker.failure_threshold = threshold;
        touched = true;
    }
    if let Some(limit) = parse_env::<usize, _>(&env, "RELAY_HISTORY_LIMIT") {
        config.history_limit = limit;
        touched = true;
    }

    if touched {
        config.source = ConfigSource::Env;
    }
}

fn parse_env<T, F>(env: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparsable environment value");
            None
        }
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Model server URL override
    pub llm_url: Option<String>,
    /// Model name override
    pub model: Option<String>,
    /// System prompt override
    pub system_prompt: Option<String>,
    /// Transcription server override
    pub asr_url: Option<String>,
    /// Synthesis server override
    pub tts_url: Option<String>,
    /// Voice override
    pub voice: Option<String>,
    /// Stream timeout override (seconds)
    pub stream_timeout_secs: Option<u64>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set model server URL override
    #[must_use]
    pub fn with_llm_url(mut self, url: String) -> Self {
        self.llm_url = Some(url);
        self
    }

    /// Set model name override
    #[must_use]
    pub fn with_model(mut self, model: String) -> Self {
        self.model = Some(model);
        self
    }

    /// Set system prompt override
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: String) -> Self {
        self.system_prompt = Some(prompt);
        self
    }

    /// Set voice override
    #[must_use]
    pub fn with_voice(mut self, voice: String) -> Self {
        self.voice = Some(voice);
        self
    }

    /// Set stream timeout override
    #[must_use]
    pub fn with_stream_timeout_secs(mut self, secs: u64) -> Self {
        self.stream_timeout_secs = Some(secs);
        self
    }

    fn is_empty(&self) -> bool {
        self.llm_url.is_none()
            && self.model.is_none()
            && self.system_prompt.is_none()
            && self.asr_url.is_none()
            && self.tts_url.is_none()
            && self.voice.is_none()
            && self.stream_timeout_secs.is_none()
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut RelayConfig) {
        if self.is_empty() {
            return;
        }
        config.source = ConfigSource::Cli;

        if let Some(ref url) = self.llm_url {
            config.llm.base_url.clone_from(url);
        }
        if let Some(ref model) = self.model {
            config.llm.model.clone_from(model);
        }
        if self.system_prompt.is_some() {
            config.llm.system_prompt.clone_from(&self.system_prompt);
        }
        if let Some(ref url) = self.asr_url {
            config.speech.asr_url.clone_from(url);
        }
        if let Some(ref url) = self.tts_url {
            config.speech.tts_url.clone_from(url);
        }
        if let Some(ref voice) = self.voice {
            config.speech.voice.clone_from(voice);
        }
        if let Some(secs) = self.stream_timeout_secs {
            config.llm.stream_timeout = Duration::from_secs(secs);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
