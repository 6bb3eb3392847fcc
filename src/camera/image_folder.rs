use std::{
    fs, io,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::Context;
use async_trait::async_trait;
use image::DynamicImage;
use log::{debug, warn};

use super::{CameraBackend, CameraError, CameraResult, CameraStream, Facing, FlashError, PlaybackError};

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

/// Camera backend that replays still images as a looping video feed.
///
/// Files whose stem starts with `front` feed the front camera; everything
/// else feeds the rear one. Only one stream can be open at a time, like a
/// real device.
#[derive(Clone)]
pub struct ImageFolderCamera {
    rear: Arc<Vec<DynamicImage>>,
    front: Arc<Vec<DynamicImage>>,
    torch: bool,
    gesture_gate: bool,
    in_use: Arc<AtomicBool>,
}

impl ImageFolderCamera {
    pub fn with_frames(rear: Vec<DynamicImage>, front: Vec<DynamicImage>) -> Self {
        Self {
            rear: Arc::new(rear),
            front: Arc::new(front),
            torch: false,
            gesture_gate: false,
            in_use: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_dir(dir: &Path) -> CameraResult<Self> {
        let entries = fs::read_dir(dir).map_err(|err| match err.kind() {
            io::ErrorKind::PermissionDenied => {
                CameraError::PermissionDenied(format!("{}: {err}", dir.display()))
            }
            io::ErrorKind::NotFound => CameraError::NoMatchingDevice(Facing::Rear),
            _ => CameraError::StreamFailed(format!("{}: {err}", dir.display())),
        })?;

        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        let mut rear = Vec::new();
        let mut front = Vec::new();
        for path in paths {
            let loaded = image::open(&path).with_context(|| format!("loading {}", path.display()));
            match loaded {
                Ok(image) => {
                    let is_front = path
                        .file_stem()
                        .and_then(|stem| stem.to_str())
                        .map(|stem| stem.to_ascii_lowercase().starts_with("front"))
                        .unwrap_or(false);
                    debug!("frame {} -> {}", path.display(), if is_front { "front" } else { "rear" });
                    if is_front {
                        front.push(image);
                    } else {
                        rear.push(image);
                    }
                }
                Err(err) => warn!("skipping unreadable frame: {err:#}"),
            }
        }

        Ok(Self::with_frames(rear, front))
    }

    pub fn with_torch(mut self) -> Self {
        self.torch = true;
        self
    }

    /// First playback attempt of every stream is refused, as browsers do
    /// before a user gesture.
    pub fn with_gesture_gate(mut self) -> Self {
        self.gesture_gate = true;
        self
    }

    pub fn frame_count(&self, facing: Facing) -> usize {
        self.frames_for(facing).len()
    }

    fn frames_for(&self, facing: Facing) -> &Arc<Vec<DynamicImage>> {
        match facing {
            Facing::Front => &self.front,
            Facing::Rear => &self.rear,
        }
    }
}

#[async_trait]
impl CameraBackend for ImageFolderCamera {
    async fn open(&self, facing: Facing) -> CameraResult<Box<dyn CameraStream>> {
        let frames = self.frames_for(facing).clone();
        if frames.is_empty() {
            return Err(CameraError::NoMatchingDevice(facing));
        }

        if self.in_use.swap(true, Ordering::SeqCst) {
            return Err(CameraError::DeviceBusy);
        }

        Ok(Box::new(ImageFolderStream {
            frames,
            cursor: 0,
            torch: self.torch.then_some(false),
            gated: self.gesture_gate,
            live: true,
            in_use: Arc::clone(&self.in_use),
        }))
    }
}

struct ImageFolderStream {
    frames: Arc<Vec<DynamicImage>>,
    cursor: usize,
    torch: Option<bool>,
    gated: bool,
    live: bool,
    in_use: Arc<AtomicBool>,
}

#[async_trait]
impl CameraStream for ImageFolderStream {
    async fn start_playback(&mut self) -> Result<(), PlaybackError> {
        if !self.live {
            return Err(PlaybackError::Failed("stream already stopped".into()));
        }
        if self.gated {
            // The refusal itself counts as the gesture prompt; the retry plays.
            self.gated = false;
            return Err(PlaybackError::Blocked);
        }
        Ok(())
    }

    fn grab_frame(&mut self) -> CameraResult<DynamicImage> {
        if !self.live {
            return Err(CameraError::NotActive);
        }
        let frame = self
            .frames
            .get(self.cursor % self.frames.len())
            .cloned()
            .ok_or_else(|| CameraError::Frame("no frames loaded".into()))?;
        self.cursor = self.cursor.wrapping_add(1);
        Ok(frame)
    }

    fn torch_supported(&self) -> bool {
        self.torch.is_some()
    }

    fn set_torch(&mut self, on: bool) -> Result<(), FlashError> {
        match self.torch.as_mut() {
            Some(state) => {
                *state = on;
                Ok(())
            }
            None => Err(FlashError::Unsupported),
        }
    }

    fn stop_tracks(&mut self) {
        if self.live {
            self.live = false;
            self.in_use.store(false, Ordering::SeqCst);
        }
    }
}

impl Drop for ImageFolderStream {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}
