//! Speech Adapters
//!
//! Speech-to-text and text-to-speech over HTTP. Each adapter owns its own
//! circuit breaker and per-call deadline.

pub mod asr;
pub mod client;
pub mod tts;

use std::time::Duration;

use crate::resilience::ResilienceConfig;

pub use asr::{AsrAdapter, Segment, Transcriber, Transcription};
pub use client::{SpeechClient, Upload};
pub use tts::{estimate_duration_ms, Synthesis, Synthesizer, TtsAdapter, TtsOptions};

/// Speech endpoint configuration
#[derive(Clone, Debug, PartialEq)]
pub struct SpeechConfig {
    /// Transcription server
    pub asr_url: String,
    /// Synthesis server
    pub tts_url: String,
    /// Transcription model
    pub asr_model: String,
    /// Synthesis model
    pub tts_model: String,
    /// Default voice
    pub voice: String,
    /// Default output container
    pub tts_format: String,
    /// Default playback speed
    pub speed: f32,
    /// Language hint for transcription
    pub language: Option<String>,
    /// Deadline for one transcription including retries
    pub asr_timeout: Duration,
    /// Deadline for one synthesis including retries
    pub tts_timeout: Duration,
    /// Breaker and retry policy
    pub resilience: ResilienceConfig,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            asr_url: "http://localhost:8000".to_string(),
            tts_url: "http://localhost:8000".to_string(),
            asr_model: "whisper-1".to_string(),
            tts_model: "kokoro".to_string(),
            voice: "af_sarah".to_string(),
            tts_format: "pcm".to_string(),
            speed: 1.0,
            language: None,
            asr_timeout: Duration::from_secs(30),
            tts_timeout: Duration::from_secs(30),
            resilience: ResilienceConfig::default(),
        }
    }
}
