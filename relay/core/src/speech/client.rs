//! HTTP client shared by the speech adapters

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::http::{build_client, send_checked};
use crate::resilience::{Resilience, ResilienceConfig, ServiceError};

/// One speech endpoint behind its own breaker
#[derive(Clone, Debug)]
pub struct SpeechClient {
    http: reqwest::Client,
    base_url: String,
    resilience: Resilience,
}

/// Multipart upload description; the form itself is rebuilt per attempt
#[derive(Debug)]
pub struct Upload<'a> {
    /// Plain form fields
    pub fields: Vec<(&'static str, String)>,
    /// Name of the file field
    pub file_field: &'static str,
    /// File name sent with the part
    pub file_name: String,
    /// File contents
    pub data: &'a [u8],
}

impl Upload<'_> {
    fn to_form(&self) -> Form {
        let form = self
            .fields
            .iter()
            .fold(Form::new(), |form, (name, value)| form.text(*name, value.clone()));
        let file = Part::bytes(self.data.to_vec()).file_name(self.file_name.clone());
        form.part(self.file_field, file)
    }
}

impl SpeechClient {
    /// Create a client for `base_url`
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be constructed.
    pub fn new(
        service: &str,
        base_url: impl Into<String>,
        config: &ResilienceConfig,
    ) -> Result<Self, ServiceError> {
        let http = build_client(Duration::from_secs(10), Some(config.call_timeout))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            resilience: Resilience::new(service, config),
        })
    }

    /// Resilience wrapper guarding this endpoint
    #[must_use]
    pub fn resilience(&self) -> &Resilience {
        &self.resilience
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// POST JSON, return the raw response body
    ///
    /// # Errors
    ///
    /// Any [`ServiceError`] from the resilience wrapper.
    pub async fn post_json_raw<P: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &P,
    ) -> Result<Vec<u8>, ServiceError> {
        let url = self.url(path);
        self.resilience
            .call(|_| {
                let request = self.http.post(&url).json(payload);
                async move {
                    let response = send_checked(request).await?;
                    let bytes = response.bytes().await?;
                    Ok::<_, ServiceError>(bytes.to_vec())
                }
            })
            .await
    }

    /// POST JSON, decode a JSON response
    ///
    /// # Errors
    ///
    /// Any [`ServiceError`]; an undecodable body is [`ServiceError::Decode`].
    pub async fn post_json<P, R>(&self, path: &str, payload: &P) -> Result<R, ServiceError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let body = self.post_json_raw(path, payload).await?;
        serde_json::from_slice(&body).map_err(|e| ServiceError::Decode(e.to_string()))
    }

    /// POST a multipart form, decode a JSON response
    ///
    /// # Errors
    ///
    /// Any [`ServiceError`]; an undecodable body is [`ServiceError::Decode`].
    pub async fn post_multipart<R: DeserializeOwned>(
        &self,
        path: &str,
        upload: &Upload<'_>,
    ) -> Result<R, ServiceError> {
        let url = self.url(path);
        let body = self
            .resilience
            .call(|attempt| {
                // a consumed form cannot be replayed
                let request = self.http.post(&url).multipart(upload.to_form());
                async move {
                    if attempt > 0 {
                        tracing::debug!(attempt, "Re-sending multipart upload");
                    }
                    let response = send_checked(request).await?;
                    let bytes = response.bytes().await?;
                    Ok::<_, ServiceError>(bytes)
                }
            })
            .await?;
        serde_json::from_slice(&body).map_err(|e| ServiceError::Decode(e.to_string()))
    }
}
