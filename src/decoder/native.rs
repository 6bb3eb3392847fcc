use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::camera::RasterBuffer;

use super::{Candidate, DecoderStrategy, StrategyId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedBarcode {
    pub raw_value: String,
    pub format: String,
}

/// Platform barcode detector supplied by the host (OS vision framework,
/// browser shape-detection API, scanner SDK, ...).
pub trait BarcodeDetector: Send + Sync {
    fn supported_formats(&self) -> Result<Vec<String>>;

    fn detect(&self, frame: &RasterBuffer) -> Result<Vec<DetectedBarcode>>;
}

/// Fastest strategy when present; absent on most desktop builds.
pub struct NativeStrategy {
    detector: Option<Arc<dyn BarcodeDetector>>,
    ready: AtomicBool,
}

impl NativeStrategy {
    pub fn new(detector: Option<Arc<dyn BarcodeDetector>>) -> Self {
        Self {
            detector,
            ready: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl DecoderStrategy for NativeStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::Native
    }

    async fn init(&self) -> Result<()> {
        if self.ready.load(Ordering::SeqCst) {
            return Ok(());
        }
        let Some(detector) = &self.detector else {
            bail!("native barcode detector not present on this platform");
        };

        let formats = detector.supported_formats()?;
        if formats.is_empty() {
            bail!("native barcode detector reports no supported formats");
        }
        log::debug!("native detector formats: {}", formats.join(", "));

        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn try_decode(&self, frame: &RasterBuffer) -> Option<Candidate> {
        let detector = self.detector.as_ref()?;
        match detector.detect(frame) {
            Ok(found) => found
                .into_iter()
                .find(|barcode| !barcode.raw_value.trim().is_empty())
                .map(|barcode| Candidate::new(barcode.raw_value.trim()).with_format(barcode.format)),
            Err(err) => {
                log::debug!("native detect failed on frame #{}: {err}", frame.sequence());
                None
            }
        }
    }
}
