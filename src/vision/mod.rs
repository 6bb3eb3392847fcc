//! Remote vision fallback: image in, candidate code + confidence out.

pub mod client;
pub mod phash;

pub use client::HttpVisionClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which path asked. The remote side may trade latency for accuracy on it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AiMode {
    Realtime,
    Manual,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AiDecodeResponse {
    #[serde(default)]
    pub barcode: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl AiDecodeResponse {
    pub fn found(barcode: impl Into<String>, confidence: f32) -> Self {
        Self {
            barcode: Some(barcode.into()),
            confidence: Some(confidence),
        }
    }

    /// A missing or blank barcode is "no candidate". A missing confidence
    /// counts as zero.
    pub fn into_candidate(self) -> Option<AiCandidate> {
        let code = self.barcode?.trim().to_string();
        if code.is_empty() {
            return None;
        }
        let confidence = self
            .confidence
            .filter(|c| c.is_finite())
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);
        Some(AiCandidate { code, confidence })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AiCandidate {
    pub code: String,
    pub confidence: f32,
}

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("vision request failed: {0}")]
    Transport(String),

    #[error("vision service answered HTTP {0}")]
    Status(u16),

    #[error("vision response malformed: {0}")]
    Malformed(String),
}

/// The opaque AI decoding capability. Every error is "no candidate" to the
/// scanner; none of them may interrupt scanning.
#[async_trait]
pub trait VisionFallback: Send + Sync {
    async fn decode(&self, jpeg: Vec<u8>, mode: AiMode) -> Result<AiDecodeResponse, VisionError>;
}
