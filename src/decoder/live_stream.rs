use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex,
};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use image::{imageops, GrayImage, Luma};

use crate::camera::RasterBuffer;

use super::still_image::decode_luma;
use super::{Candidate, DecoderStrategy, StrategyId};

const PROBE_SIZE: (u32, u32) = (320, 240);

/// Stream-oriented decoder: looks at the aiming region first, then the whole
/// frame, and only reports a value once consecutive frames agree on it.
/// Costs more per tick than the still-image path but ignores single-frame
/// misreads caused by motion blur.
pub struct LiveStreamStrategy {
    agreement: usize,
    ready: AtomicBool,
    streak: Mutex<Streak>,
}

#[derive(Default)]
struct Streak {
    value: Option<String>,
    count: usize,
}

impl Streak {
    fn observe(&mut self, read: Option<&str>) -> usize {
        match read {
            Some(value) if self.value.as_deref() == Some(value) => self.count += 1,
            Some(value) => {
                self.value = Some(value.to_string());
                self.count = 1;
            }
            None => {
                self.value = None;
                self.count = 0;
            }
        }
        self.count
    }
}

impl LiveStreamStrategy {
    pub fn new(agreement: usize) -> Self {
        Self {
            agreement: agreement.max(1),
            ready: AtomicBool::new(false),
            streak: Mutex::new(Streak::default()),
        }
    }

    fn observe(&self, read: Option<&Candidate>) -> usize {
        let mut streak = self.streak.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        streak.observe(read.map(|c| c.value.as_str()))
    }
}

fn aiming_region(gray: &GrayImage) -> GrayImage {
    let (w, h) = gray.dimensions();
    let crop_w = (w * 3 / 5).max(1);
    let crop_h = (h / 2).max(1);
    imageops::crop_imm(gray, (w - crop_w) / 2, (h - crop_h) / 2, crop_w, crop_h).to_image()
}

fn decode_live(gray: GrayImage) -> Option<Candidate> {
    decode_luma(aiming_region(&gray)).or_else(|| decode_luma(gray))
}

#[async_trait]
impl DecoderStrategy for LiveStreamStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::LiveStream
    }

    async fn init(&self) -> Result<()> {
        // Agreement never carries over from a previous activation.
        *self.streak.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Streak::default();

        if self.ready.load(Ordering::SeqCst) {
            return Ok(());
        }

        // Warm the reader up on a blank frame; a fault here means the engine
        // is unusable on this build.
        let probe = tokio::task::spawn_blocking(|| {
            let blank = GrayImage::from_pixel(PROBE_SIZE.0, PROBE_SIZE.1, Luma([255u8]));
            decode_live(blank)
        })
        .await
        .map_err(|err| anyhow!("live-stream decoder probe faulted: {err}"))?;

        if let Some(phantom) = probe {
            bail!("live-stream decoder read '{}' from a blank probe frame", phantom.value);
        }

        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn try_decode(&self, frame: &RasterBuffer) -> Option<Candidate> {
        let frame = frame.clone();
        let read = match tokio::task::spawn_blocking(move || decode_live(frame.to_luma())).await {
            Ok(read) => read,
            Err(err) => {
                log::warn!("live-stream decode worker failed: {err}");
                None
            }
        };

        let agreed = self.observe(read.as_ref());
        if agreed >= self.agreement {
            read
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::still_image::tests::render;
    use image::DynamicImage;
    use rxing::BarcodeFormat;

    #[test]
    fn streak_resets_on_miss_and_change() {
        let mut streak = Streak::default();
        assert_eq!(streak.observe(Some("a")), 1);
        assert_eq!(streak.observe(Some("a")), 2);
        assert_eq!(streak.observe(Some("b")), 1);
        assert_eq!(streak.observe(None), 0);
        assert_eq!(streak.observe(Some("b")), 1);
    }

    #[tokio::test]
    async fn init_succeeds_and_is_idempotent() {
        let strategy = LiveStreamStrategy::new(2);
        strategy.init().await.unwrap();
        strategy.init().await.unwrap();
    }

    #[tokio::test]
    async fn reports_only_after_consecutive_agreement() {
        let strategy = LiveStreamStrategy::new(2);
        let frame = RasterBuffer::new(render("012345678905", BarcodeFormat::UPC_A), 1);

        assert!(strategy.try_decode(&frame).await.is_none());
        let candidate = strategy.try_decode(&frame).await.unwrap();
        assert_eq!(candidate.value, "012345678905");
    }

    #[tokio::test]
    async fn blank_frames_break_the_streak() {
        let strategy = LiveStreamStrategy::new(2);
        let code = RasterBuffer::new(render("5901234123457", BarcodeFormat::EAN_13), 1);
        let blank = RasterBuffer::new(
            DynamicImage::ImageLuma8(GrayImage::from_pixel(300, 200, Luma([255u8]))),
            2,
        );

        assert!(strategy.try_decode(&code).await.is_none());
        assert!(strategy.try_decode(&blank).await.is_none());
        assert!(strategy.try_decode(&code).await.is_none());
    }
}
