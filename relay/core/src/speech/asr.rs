//! Speech recognition adapter (Whisper-compatible)

use async_trait::async_trait;
use serde::Deserialize;

use super::client::{SpeechClient, Upload};
use super::SpeechConfig;
use crate::resilience::ServiceError;

const TRANSCRIPTIONS_PATH: &str = "/v1/audio/transcriptions";

/// One recognised span of audio
#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    /// Segment index
    pub id: u32,
    /// Start offset in seconds
    pub start: f32,
    /// End offset in seconds
    pub end: f32,
    /// Recognised text
    pub text: String,
    /// `1 - no_speech_prob`
    pub confidence: f32,
}

/// Transcription result
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Transcription {
    /// Full text
    pub text: String,
    /// Detected language
    pub language: Option<String>,
    /// Audio length in seconds
    pub duration: Option<f32>,
    /// Per-segment detail
    pub segments: Vec<Segment>,
    /// Mean segment confidence, if any segments were returned
    pub confidence: Option<f32>,
}

/// Something that turns audio into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe encoded audio (`format` is the container, e.g. `wav`)
    async fn transcribe(&self, audio: &[u8], format: &str) -> Result<Transcription, ServiceError>;
}

#[derive(Debug, Deserialize)]
struct WhisperResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    duration: Option<f32>,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    #[serde(default)]
    id: u32,
    #[serde(default)]
    start: f32,
    #[serde(default)]
    end: f32,
    #[serde(default)]
    text: String,
    #[serde(default)]
    no_speech_prob: f32,
}

/// Whisper-style `/v1/audio/transcriptions` client
#[derive(Clone, Debug)]
pub struct AsrAdapter {
    client: SpeechClient,
    model: String,
    language: Option<String>,
}

impl AsrAdapter {
    /// Create from speech configuration
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be constructed.
    pub fn new(config: &SpeechConfig) -> Result<Self, ServiceError> {
        let resilience = config.resilience.clone().with_call_timeout(config.asr_timeout);
        Ok(Self {
            client: SpeechClient::new("asr", &config.asr_url, &resilience)?,
            model: config.asr_model.clone(),
            language: config.language.clone(),
        })
    }

    /// Model requested from the server
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Underlying client
    #[must_use]
    pub fn client(&self) -> &SpeechClient {
        &self.client
    }
}

#[async_trait]
impl Transcriber for AsrAdapter {
    async fn transcribe(&self, audio: &[u8], format: &str) -> Result<Transcription, ServiceError> {
        if audio.is_empty() {
            return Err(ServiceError::InvalidInput("audio data is empty".to_string()));
        }
        let format = if format.is_empty() { "wav" } else { format };

        let mut fields = vec![
            ("model", self.model.clone()),
            ("response_format", "verbose_json".to_string()),
        ];
        if let Some(language) = &self.language {
            fields.push(("language", language.clone()));
        }

        let upload = Upload {
            fields,
            file_field: "file",
            file_name: format!("audio.{format}"),
            data: audio,
        };

        let response: WhisperResponse = self
            .client
            .post_multipart(TRANSCRIPTIONS_PATH, &upload)
            .await?;

        let segments: Vec<Segment> = response
            .segments
            .into_iter()
            .map(|s| Segment {
                id: s.id,
                start: s.start,
                end: s.end,
                text: s.text,
                confidence: 1.0 - s.no_speech_prob,
            })
            .collect();

        #[allow(clippy::cast_precision_loss)]
        let confidence = (!segments.is_empty())
            .then(|| segments.iter().map(|s| s.confidence).sum::<f32>() / segments.len() as f32);

        tracing::debug!(
            bytes = audio.len(),
            chars = response.text.len(),
            "Transcription complete"
        );

        Ok(Transcription {
            text: response.text,
            language: response.language.filter(|l| !l.is_empty()),
            duration: response.duration,
            segments,
            confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::{ResilienceConfig, RetryConfig};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer) -> AsrAdapter {
        AsrAdapter::new(&SpeechConfig {
            asr_url: server.uri(),
            resilience: ResilienceConfig {
                retry: RetryConfig {
                    initial_backoff_ms: 10,
                    use_jitter: false,
                    ..RetryConfig::default()
                },
                ..ResilienceConfig::default()
            },
            ..SpeechConfig::default()
        })
        .unwrap()
    }

    fn whisper_json() -> serde_json::Value {
        serde_json::json!({
            "text": "hello there",
            "language": "en",
            "duration": 1.5,
            "segments": [
                {"id": 0, "start": 0.0, "end": 0.7, "text": "hello", "no_speech_prob": 0.1},
                {"id": 1, "start": 0.7, "end": 1.5, "text": " there", "no_speech_prob": 0.3}
            ]
        })
    }

    #[tokio::test]
    async fn test_transcribe() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TRANSCRIPTIONS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(whisper_json()))
            .expect(1)
            .mount(&server)
            .await;

        let result = adapter(&server).transcribe(b"RIFF....", "wav").await.unwrap();
        assert_eq!(result.text, "hello there");
        assert_eq!(result.language.as_deref(), Some("en"));
        assert_eq!(result.segments.len(), 2);
        assert!((result.segments[0].confidence - 0.9).abs() < 1e-6);
        assert!((result.confidence.unwrap() - 0.8).abs() < 1e-6);

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&requests[0].body);
        assert!(body.contains("filename=\"audio.wav\""));
        assert!(body.contains("verbose_json"));
        assert!(body.contains("whisper-1"));
    }

    #[tokio::test]
    async fn test_multipart_rebuilt_on_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(whisper_json()))
            .mount(&server)
            .await;

        let audio = b"AUDIO-PAYLOAD-1234";
        let result = adapter(&server).transcribe(audio, "ogg").await.unwrap();
        assert_eq!(result.text, "hello there");

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        for request in &requests {
            let body = String::from_utf8_lossy(&request.body);
            assert!(body.contains("AUDIO-PAYLOAD-1234"), "attempt sent an empty body");
            assert!(body.contains("audio.ogg"));
        }
    }

    #[tokio::test]
    async fn test_empty_audio_rejected_without_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(whisper_json()))
            .expect(0)
            .mount(&server)
            .await;

        let asr = adapter(&server);
        let err = asr.transcribe(&[], "wav").await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
        assert_eq!(asr.client().resilience().breaker().consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(415).set_body_string("unsupported"))
            .expect(1)
            .mount(&server)
            .await;

        let err = adapter(&server).transcribe(b"x", "wav").await.unwrap_err();
        assert_eq!(err.status(), Some(415));
    }
}
