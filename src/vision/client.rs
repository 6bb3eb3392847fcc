use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::Serialize;

use crate::settings::VisionSettings;

use super::{AiDecodeResponse, AiMode, VisionError, VisionFallback};

/// HTTP client for the remote barcode vision model.
pub struct HttpVisionClient {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct DecodeRequest<'a> {
    image: String,
    mode: &'a AiMode,
}

impl HttpVisionClient {
    pub fn with_timeout(endpoint: String, timeout: Duration) -> Result<Self, VisionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VisionError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }

    /// `None` when no endpoint is configured.
    pub fn from_settings(settings: &VisionSettings) -> Result<Option<Self>, VisionError> {
        match settings.endpoint.as_deref().map(str::trim) {
            Some(endpoint) if !endpoint.is_empty() => Self::with_timeout(
                endpoint.to_string(),
                Duration::from_millis(settings.timeout_ms.max(1)),
            )
            .map(Some),
            _ => Ok(None),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

pub(crate) fn jpeg_data_url(jpeg: &[u8]) -> String {
    format!(
        "data:image/jpeg;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(jpeg)
    )
}

#[async_trait]
impl VisionFallback for HttpVisionClient {
    async fn decode(&self, jpeg: Vec<u8>, mode: AiMode) -> Result<AiDecodeResponse, VisionError> {
        let body = DecodeRequest {
            image: jpeg_data_url(&jpeg),
            mode: &mode,
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| VisionError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(VisionError::Status(resp.status().as_u16()));
        }

        resp.json::<AiDecodeResponse>()
            .await
            .map_err(|e| VisionError::Malformed(e.to_string()))
    }
}
