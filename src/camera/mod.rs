// Camera ownership: the live stream, snapshots, torch and facing

pub mod error;
pub mod image_folder;

pub use error::{CameraError, CameraResult, FlashError, PlaybackError};
pub use image_folder::ImageFolderCamera;

use std::{fmt, io::Cursor, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::{codecs::jpeg::JpegEncoder, DynamicImage, GrayImage};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::vision::phash::compute_phash;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Front,
    Rear,
}

impl Facing {
    pub fn opposite(self) -> Self {
        match self {
            Facing::Front => Facing::Rear,
            Facing::Rear => Facing::Front,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Facing::Front => "front",
            Facing::Rear => "rear",
        }
    }
}

impl Default for Facing {
    fn default() -> Self {
        Facing::Rear
    }
}

impl fmt::Display for Facing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Facing {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "front" | "user" => Ok(Facing::Front),
            "rear" | "back" | "environment" => Ok(Facing::Rear),
            other => Err(format!("unknown facing '{other}' (expected front or rear)")),
        }
    }
}

/// An off-screen copy of one video frame.
///
/// Strategies only ever see these snapshots, never the stream itself. The
/// pixels sit behind an `Arc` so a frame can be handed to blocking decode
/// workers without copying.
#[derive(Clone)]
pub struct RasterBuffer {
    image: Arc<DynamicImage>,
    sequence: u64,
    captured_at: DateTime<Utc>,
}

impl RasterBuffer {
    pub fn new(image: DynamicImage, sequence: u64) -> Self {
        Self {
            image: Arc::new(image),
            sequence,
            captured_at: Utc::now(),
        }
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn to_luma(&self) -> GrayImage {
        self.image.to_luma8()
    }

    /// Perceptual hash of the frame, used to spot near-identical shots.
    pub fn phash(&self) -> String {
        compute_phash(&self.image)
    }

    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let rgb = self.image.to_rgb8();
        let mut bytes = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100))
            .encode_image(&rgb)
            .with_context(|| format!("failed to encode frame #{} as JPEG", self.sequence))?;
        Ok(bytes.into_inner())
    }
}

impl fmt::Debug for RasterBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterBuffer")
            .field("sequence", &self.sequence)
            .field("width", &self.width())
            .field("height", &self.height())
            .field("captured_at", &self.captured_at)
            .finish()
    }
}

/// Platform camera access. Implementations map platform failures onto the
/// distinct [`CameraError`] kinds.
#[async_trait]
pub trait CameraBackend: Send + Sync {
    async fn open(&self, facing: Facing) -> CameraResult<Box<dyn CameraStream>>;
}

/// One opened device. Dropping it without `stop_tracks` is a leak on most
/// platforms, so [`FrameSource`] always stops tracks explicitly.
#[async_trait]
pub trait CameraStream: Send {
    async fn start_playback(&mut self) -> Result<(), PlaybackError>;

    fn grab_frame(&mut self) -> CameraResult<DynamicImage>;

    fn torch_supported(&self) -> bool;

    fn set_torch(&mut self, on: bool) -> Result<(), FlashError>;

    fn stop_tracks(&mut self);
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackState {
    Playing,
    /// Autoplay was refused; [`FrameSource::retry_playback`] is the way out.
    NeedsInteraction,
}

/// Live camera session. Owned exclusively by [`FrameSource`]; the stream
/// handle never outlives it.
pub struct ScanSession {
    id: String,
    facing: Facing,
    flash_available: bool,
    flash_on: bool,
    playback: PlaybackState,
    started_at: DateTime<Utc>,
    stream: Box<dyn CameraStream>,
}

impl ScanSession {
    fn handle(&self) -> SessionHandle {
        SessionHandle {
            session_id: self.id.clone(),
            facing: self.facing,
            flash_available: self.flash_available,
            flash_on: self.flash_on,
            playback: self.playback,
            started_at: self.started_at,
        }
    }
}

/// Read-only view of the live session for callers outside the frame source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionHandle {
    pub session_id: String,
    pub facing: Facing,
    pub flash_available: bool,
    pub flash_on: bool,
    pub playback: PlaybackState,
    pub started_at: DateTime<Utc>,
}

impl SessionHandle {
    pub fn needs_interaction(&self) -> bool {
        self.playback == PlaybackState::NeedsInteraction
    }
}

pub struct FrameSource {
    backend: Arc<dyn CameraBackend>,
    session: Option<ScanSession>,
    next_sequence: u64,
}

impl FrameSource {
    pub fn new(backend: Arc<dyn CameraBackend>) -> Self {
        Self {
            backend,
            session: None,
            next_sequence: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<SessionHandle> {
        self.session.as_ref().map(ScanSession::handle)
    }

    pub async fn activate(&mut self, facing: Facing) -> CameraResult<SessionHandle> {
        // Release the previous device before asking for another one.
        if self.session.is_some() {
            self.deactivate();
        }

        let mut stream = self.backend.open(facing).await?;

        let playback = match stream.start_playback().await {
            Ok(()) => PlaybackState::Playing,
            Err(PlaybackError::Blocked) => {
                info!("camera playback blocked; waiting for operator tap");
                PlaybackState::NeedsInteraction
            }
            Err(PlaybackError::Failed(msg)) => {
                stream.stop_tracks();
                return Err(CameraError::StreamFailed(msg));
            }
        };

        let session = ScanSession {
            id: Uuid::new_v4().to_string(),
            facing,
            flash_available: stream.torch_supported(),
            flash_on: false,
            playback,
            started_at: Utc::now(),
            stream,
        };
        let handle = session.handle();
        info!(
            "camera session {} active (facing={}, torch={}, playback={:?})",
            handle.session_id, facing, handle.flash_available, playback
        );
        self.session = Some(session);
        Ok(handle)
    }

    /// Stops every track and drops the device. Returns the closed session id.
    pub fn deactivate(&mut self) -> Option<String> {
        let mut session = self.session.take()?;
        if session.flash_on {
            if let Err(err) = session.stream.set_torch(false) {
                warn!("failed to turn torch off during deactivate: {err}");
            }
        }
        session.stream.stop_tracks();
        info!("camera session {} released", session.id);
        Some(session.id)
    }

    /// Deactivates only if `session_id` is still the live session.
    pub fn deactivate_session(&mut self, session_id: &str) -> bool {
        match &self.session {
            Some(session) if session.id == session_id => self.deactivate().is_some(),
            _ => false,
        }
    }

    pub async fn retry_playback(&mut self) -> CameraResult<PlaybackState> {
        let session = self.session.as_mut().ok_or(CameraError::NotActive)?;
        if session.playback == PlaybackState::Playing {
            return Ok(PlaybackState::Playing);
        }

        match session.stream.start_playback().await {
            Ok(()) => {
                session.playback = PlaybackState::Playing;
                info!("camera playback started after operator tap");
                Ok(PlaybackState::Playing)
            }
            Err(PlaybackError::Blocked) => Ok(PlaybackState::NeedsInteraction),
            Err(PlaybackError::Failed(msg)) => Err(CameraError::StreamFailed(msg)),
        }
    }

    pub async fn switch_facing(&mut self) -> CameraResult<SessionHandle> {
        let facing = self
            .session
            .as_ref()
            .map(|session| session.facing.opposite())
            .ok_or(CameraError::NotActive)?;
        self.deactivate();
        self.activate(facing).await
    }

    /// Flips the torch and returns the new state.
    pub fn toggle_flash(&mut self) -> Result<bool, FlashError> {
        let session = self.session.as_mut().ok_or(FlashError::NoActiveSession)?;
        if !session.flash_available {
            return Err(FlashError::Unsupported);
        }

        let next = !session.flash_on;
        session.stream.set_torch(next)?;
        session.flash_on = next;
        Ok(next)
    }

    pub fn capture_still(&mut self) -> CameraResult<RasterBuffer> {
        let session = self.session.as_mut().ok_or(CameraError::NotActive)?;
        if session.playback == PlaybackState::NeedsInteraction {
            return Err(CameraError::InteractionRequired);
        }

        let image = session.stream.grab_frame()?;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        Ok(RasterBuffer::new(image, self.next_sequence))
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.deactivate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn frame(shade: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 24, Rgb([shade, shade, shade])))
    }

    fn source(camera: ImageFolderCamera) -> FrameSource {
        FrameSource::new(Arc::new(camera))
    }

    #[test]
    fn facing_round_trips_through_str() {
        assert_eq!("back".parse::<Facing>().unwrap(), Facing::Rear);
        assert_eq!("front".parse::<Facing>().unwrap(), Facing::Front);
        assert_eq!(Facing::Front.opposite(), Facing::Rear);
        assert!("sideways".parse::<Facing>().is_err());
    }

    #[tokio::test]
    async fn activate_and_capture_numbers_frames() {
        let mut frames = source(ImageFolderCamera::with_frames(vec![frame(10), frame(200)], vec![]));
        let handle = frames.activate(Facing::Rear).await.unwrap();
        assert_eq!(handle.facing, Facing::Rear);
        assert_eq!(handle.playback, PlaybackState::Playing);

        let first = frames.capture_still().unwrap();
        let second = frames.capture_still().unwrap();
        assert!(second.sequence() > first.sequence());
        assert_eq!(first.width(), 32);
    }

    #[tokio::test]
    async fn capture_without_session_is_not_active() {
        let mut frames = source(ImageFolderCamera::with_frames(vec![frame(0)], vec![]));
        assert_eq!(frames.capture_still().unwrap_err(), CameraError::NotActive);
    }

    #[tokio::test]
    async fn second_source_sees_busy_device_until_release() {
        let camera = ImageFolderCamera::with_frames(vec![frame(0)], vec![]);
        let mut first = FrameSource::new(Arc::new(camera.clone()));
        let mut second = FrameSource::new(Arc::new(camera));

        first.activate(Facing::Rear).await.unwrap();
        assert_eq!(
            second.activate(Facing::Rear).await.unwrap_err(),
            CameraError::DeviceBusy
        );

        first.deactivate();
        assert!(second.activate(Facing::Rear).await.is_ok());
    }

    #[tokio::test]
    async fn reactivation_releases_previous_stream_first() {
        let mut frames = source(ImageFolderCamera::with_frames(vec![frame(0)], vec![frame(1)]));
        let first = frames.activate(Facing::Rear).await.unwrap();
        let second = frames.activate(Facing::Rear).await.unwrap();
        assert_ne!(first.session_id, second.session_id);

        let switched = frames.switch_facing().await.unwrap();
        assert_eq!(switched.facing, Facing::Front);
    }

    #[tokio::test]
    async fn switching_to_missing_facing_reports_no_device() {
        let mut frames = source(ImageFolderCamera::with_frames(vec![frame(0)], vec![]));
        frames.activate(Facing::Rear).await.unwrap();
        assert_eq!(
            frames.switch_facing().await.unwrap_err(),
            CameraError::NoMatchingDevice(Facing::Front)
        );
        assert!(!frames.is_active());
    }

    #[tokio::test]
    async fn flash_requires_torch_support() {
        let mut plain = source(ImageFolderCamera::with_frames(vec![frame(0)], vec![]));
        assert_eq!(plain.toggle_flash().unwrap_err(), FlashError::NoActiveSession);
        plain.activate(Facing::Rear).await.unwrap();
        assert_eq!(plain.toggle_flash().unwrap_err(), FlashError::Unsupported);

        let mut torch = source(ImageFolderCamera::with_frames(vec![frame(0)], vec![]).with_torch());
        torch.activate(Facing::Rear).await.unwrap();
        assert!(torch.toggle_flash().unwrap());
        assert!(!torch.toggle_flash().unwrap());
    }

    #[tokio::test]
    async fn gated_playback_needs_a_tap() {
        let mut frames = source(
            ImageFolderCamera::with_frames(vec![frame(0)], vec![]).with_gesture_gate(),
        );
        let handle = frames.activate(Facing::Rear).await.unwrap();
        assert!(handle.needs_interaction());
        assert_eq!(
            frames.capture_still().unwrap_err(),
            CameraError::InteractionRequired
        );

        assert_eq!(frames.retry_playback().await.unwrap(), PlaybackState::Playing);
        assert!(frames.capture_still().is_ok());
    }

    #[test]
    fn jpeg_encoding_produces_jfif_bytes() {
        let buffer = RasterBuffer::new(frame(128), 1);
        let bytes = buffer.encode_jpeg(80).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }
}
