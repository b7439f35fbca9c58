//! Shared HTTP plumbing for the outbound adapters

use std::time::Duration;

use crate::resilience::ServiceError;

/// Error bodies are kept for diagnostics but never unbounded
const MAX_ERROR_BODY: usize = 2048;

/// Build a client with a connect timeout and an optional whole-request timeout
///
/// Streaming clients must pass `None`: a total timeout would cut off a body
/// that is still being read.
pub(crate) fn build_client(
    connect_timeout: Duration,
    request_timeout: Option<Duration>,
) -> Result<reqwest::Client, ServiceError> {
    let mut builder = reqwest::Client::builder().connect_timeout(connect_timeout);
    if let Some(timeout) = request_timeout {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(|e| ServiceError::Network(format!("failed to create HTTP client: {e}")))
}

/// Send a request, turning non-2xx answers into [`ServiceError::Status`]
pub(crate) async fn send_checked(
    request: reqwest::RequestBuilder,
) -> Result<reqwest::Response, ServiceError> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = read_prefix(response, MAX_ERROR_BODY).await;
    Err(ServiceError::Status {
        status: status.as_u16(),
        body: truncate(String::from_utf8_lossy(&body).into_owned()),
    })
}

/// Read at most `limit` bytes of a body, abandoning the rest of the stream
async fn read_prefix(mut response: reqwest::Response, limit: usize) -> Vec<u8> {
    let mut buf = Vec::new();
    while buf.len() < limit {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let take = chunk.len().min(limit - buf.len());
                buf.extend_from_slice(&chunk[..take]);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Error body read failed");
                break;
            }
        }
    }
    buf
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let body = "é".repeat(MAX_ERROR_BODY);
        let truncated = truncate(body);
        assert!(truncated.len() <= MAX_ERROR_BODY);
        assert!(truncated.chars().all(|c| c == 'é'));

        assert_eq!(truncate("short".to_string()), "short");
    }

    #[tokio::test]
    async fn test_huge_error_body_is_bounded() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502).set_body_string("x".repeat(4 * 1024 * 1024)))
            .mount(&server)
            .await;

        let client = build_client(Duration::from_secs(5), None).unwrap();
        let err = send_checked(client.get(server.uri())).await.unwrap_err();
        let ServiceError::Status { status, body } = err else {
            panic!("expected status error");
        };
        assert_eq!(status, 502);
        assert_eq!(body.len(), MAX_ERROR_BODY);
        assert!(body.bytes().all(|b| b == b'x'));
    }

    #[tokio::test]
    async fn test_error_body_cut_mid_character_stays_valid() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        // odd prefix pushes a two-byte character across the limit
        let body = format!("a{}", "é".repeat(MAX_ERROR_BODY));
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string(body))
            .mount(&server)
            .await;

        let client = build_client(Duration::from_secs(5), None).unwrap();
        let Err(ServiceError::Status { body, .. }) = send_checked(client.get(server.uri())).await
        else {
            panic!("expected status error");
        };
        assert!(body.len() <= MAX_ERROR_BODY);
        assert!(body.starts_with("aé"));
        assert!(!body.contains(char::REPLACEMENT_CHARACTER));
    }
}
