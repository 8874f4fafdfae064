//! Direct HTTP agent for references that already point at a media file.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use tracing::debug;

use super::{AcquisitionAgent, AgentError, ByteSource};
use crate::config::HttpAgentConfig;

/// Streams the reference URL with a plain GET.
pub struct HttpAgent {
    client: Client,
}

impl HttpAgent {
    pub fn new(config: &HttpAgentConfig) -> Result<Self, AgentError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs as u64))
            .build()
            .map_err(|e| AgentError::Unknown(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

/// Map a non-success status to a failure mode.
fn classify_status(status: StatusCode) -> AgentError {
    let message = format!("origin returned HTTP {}", status.as_u16());
    match status.as_u16() {
        404 | 410 => AgentError::NotFound(message),
        401 | 403 => AgentError::Blocked(message),
        429 | 503 => AgentError::Throttled(message),
        408 | 504 => AgentError::Timeout(message),
        _ => AgentError::Unknown(message),
    }
}

fn classify_transport(e: reqwest::Error) -> AgentError {
    // Strip the URL; references may carry credentials in the query.
    let e = e.without_url();
    if e.is_timeout() {
        AgentError::Timeout(e.to_string())
    } else if e.is_connect() {
        AgentError::Unknown(format!("connection failed: {}", e))
    } else {
        AgentError::Unknown(e.to_string())
    }
}

#[async_trait]
impl AcquisitionAgent for HttpAgent {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(&self, reference: &str) -> Result<ByteSource, AgentError> {
        if !reference.starts_with("http://") && !reference.starts_with("https://") {
            return Err(AgentError::NotFound(
                "reference is not an http(s) URL".to_string(),
            ));
        }

        let response = self
            .client
            .get(reference)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }

        let content_length = response.content_length();
        debug!(status = status.as_u16(), content_length, "Origin responded");

        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(classify_transport))
            .boxed();

        Ok(ByteSource::new(content_length, chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND),
            AgentError::NotFound(_)
        ));
        assert!(matches!(classify_status(StatusCode::GONE), AgentError::NotFound(_)));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN),
            AgentError::Blocked(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            AgentError::Throttled(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::GATEWAY_TIMEOUT),
            AgentError::Timeout(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            AgentError::Unknown(_)
        ));
    }

    #[tokio::test]
    async fn test_bare_identifier_is_not_found() {
        let agent = HttpAgent::new(&HttpAgentConfig::default()).unwrap();
        let err = agent.fetch("video-A").await.unwrap_err();
        assert!(matches!(err, AgentError::NotFound(_)));
    }
}
