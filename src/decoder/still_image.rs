use anyhow::Result;
use async_trait::async_trait;
use image::GrayImage;

use crate::camera::RasterBuffer;

use super::{Candidate, DecoderStrategy, StrategyId};

/// Runs the general-purpose `rxing` reader over one grayscale frame.
pub(crate) fn decode_luma(gray: GrayImage) -> Option<Candidate> {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return None;
    }

    match rxing::helpers::detect_in_luma(gray.into_raw(), width, height, None) {
        Ok(result) => {
            let text = result.getText().trim().to_string();
            if text.is_empty() {
                return None;
            }
            Some(Candidate::new(text).with_format(format!("{:?}", result.getBarcodeFormat())))
        }
        Err(_) => None,
    }
}

/// General-purpose still-image decoder. Always available, slower per frame.
pub struct StillImageStrategy;

impl StillImageStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StillImageStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DecoderStrategy for StillImageStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::StillImage
    }

    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn try_decode(&self, frame: &RasterBuffer) -> Option<Candidate> {
        let frame = frame.clone();
        match tokio::task::spawn_blocking(move || decode_luma(frame.to_luma())).await {
            Ok(candidate) => candidate,
            Err(err) => {
                log::warn!("still-image decode worker failed: {err}");
                None
            }
        }
    }
}
