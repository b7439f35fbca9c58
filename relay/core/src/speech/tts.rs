//! Speech synthesis adapter (OpenAI `/audio/speech` compatible)

use async_trait::async_trait;
use serde::Serialize;

use super::client::SpeechClient;
use super::SpeechConfig;
use crate::resilience::ServiceError;

const SPEECH_PATH: &str = "/audio/speech";

/// Per-request synthesis overrides
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TtsOptions {
    /// Voice id
    pub voice: Option<String>,
    /// Playback speed multiplier
    pub speed: Option<f32>,
    /// Output container (`pcm`, `mp3`, `opus`, ...)
    pub format: Option<String>,
}

/// Synthesised audio
#[derive(Clone, Debug, PartialEq)]
pub struct Synthesis {
    /// Encoded audio
    pub audio: Vec<u8>,
    /// Container of `audio`
    pub format: String,
    /// Estimated playback length
    pub duration_ms: u64,
}

/// Something that turns text into audio
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesise `text`
    async fn synthesize(&self, text: &str, options: &TtsOptions) -> Result<Synthesis, ServiceError>;
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
    speed: f32,
}

/// `/audio/speech` client
#[derive(Clone, Debug)]
pub struct TtsAdapter {
    client: SpeechClient,
    model: String,
    voice: String,
    format: String,
    speed: f32,
}

impl TtsAdapter {
    /// Create from speech configuration
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be constructed.
    pub fn new(config: &SpeechConfig) -> Result<Self, ServiceError> {
        let resilience = config.resilience.clone().with_call_timeout(config.tts_timeout);
        Ok(Self {
            client: SpeechClient::new("tts", &config.tts_url, &resilience)?,
            model: config.tts_model.clone(),
            voice: config.voice.clone(),
            format: config.tts_format.clone(),
            speed: config.speed,
        })
    }

    /// Default voice
    #[must_use]
    pub fn voice(&self) -> &str {
        &self.voice
    }

    /// Underlying client
    #[must_use]
    pub fn client(&self) -> &SpeechClient {
        &self.client
    }
}

#[async_trait]
impl Synthesizer for TtsAdapter {
    async fn synthesize(&self, text: &str, options: &TtsOptions) -> Result<Synthesis, ServiceError> {
        if text.trim().is_empty() {
            return Err(ServiceError::InvalidInput("text is empty".to_string()));
        }

        let request = SpeechRequest {
            model: &self.model,
            input: text,
            voice: options.voice.as_deref().unwrap_or(&self.voice),
            response_format: options.format.as_deref().unwrap_or(&self.format),
            speed: options.speed.filter(|s| *s > 0.0).unwrap_or(self.speed),
        };

        let audio = self.client.post_json_raw(SPEECH_PATH, &request).await?;
        let duration_ms = estimate_duration_ms(audio.len(), request.response_format);
        tracing::debug!(
            chars = text.len(),
            bytes = audio.len(),
            duration_ms,
            "Synthesis complete"
        );

        Ok(Synthesis {
            audio,
            format: request.response_format.to_string(),
            duration_ms,
        })
    }
}

/// Rough playback length from encoded size
///
/// PCM is 16-bit mono at 24kHz; compressed formats assume typical speech
/// bitrates (opus ~32kbps, mp3 ~128kbps).
#[must_use]
pub fn estimate_duration_ms(len: usize, format: &str) -> u64 {
    let len = len as u64;
    match format {
        "opus" => len / 4,
        "mp3" => len / 16,
        _ => len * 1000 / 48_000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer) -> TtsAdapter {
        TtsAdapter::new(&SpeechConfig {
            tts_url: server.uri(),
            ..SpeechConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_synthesize_defaults() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SPEECH_PATH))
            .and(body_json(serde_json::json!({
                "model": "kokoro",
                "input": "Hello.",
                "voice": "af_sarah",
                "response_format": "pcm",
                "speed": 1.0
            })))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 48_000]))
            .expect(1)
            .mount(&server)
            .await;

        let out = adapter(&server)
            .synthesize("Hello.", &TtsOptions::default())
            .await
            .unwrap();
        assert_eq!(out.format, "pcm");
        assert_eq!(out.audio.len(), 48_000);
        assert_eq!(out.duration_ms, 1000);
    }

    #[tokio::test]
    async fn test_options_override_defaults() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(serde_json::json!({
                "model": "kokoro",
                "input": "Hi",
                "voice": "bm_george",
                "response_format": "mp3",
                "speed": 1.25
            })))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 1600]))
            .expect(1)
            .mount(&server)
            .await;

        let options = TtsOptions {
            voice: Some("bm_george".to_string()),
            speed: Some(1.25),
            format: Some("mp3".to_string()),
        };
        let out = adapter(&server).synthesize("Hi", &options).await.unwrap();
        assert_eq!(out.format, "mp3");
        assert_eq!(out.duration_ms, 100);
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let server = MockServer::start().await;
        let err = adapter(&server)
            .synthesize("   ", &TtsOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[test]
    fn test_duration_estimates() {
        assert_eq!(estimate_duration_ms(48_000, "pcm"), 1000);
        assert_eq!(estimate_duration_ms(4_000, "opus"), 1000);
        assert_eq!(estimate_duration_ms(16_000, "mp3"), 1000);
        assert_eq!(estimate_duration_ms(0, "wav"), 0);
    }
}
