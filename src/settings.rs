use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::camera::Facing;
use crate::decoder::StrategyId;

const DEBUG_TRACE_CAPACITY: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct VisionSettings {
    /// Endpoint of the remote vision decoder. `None` disables both AI paths.
    pub endpoint: Option<String>,
    pub timeout_ms: u64,
    pub jpeg_quality: u8,
}

impl Default for VisionSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: 15_000,
            jpeg_quality: 85,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ScannerSettings {
    pub native_interval_ms: u64,
    pub live_stream_interval_ms: u64,
    pub still_image_interval_ms: u64,

    pub assist_enabled: bool,
    pub assist_interval_ms: u64,
    /// A frame this close (Hamming distance) to the last one sent is not re-sent...
    pub assist_similarity_distance: u32,
    /// ...unless this much time has passed since the last send.
    pub assist_resend_after_ms: u64,

    pub suggestion_window_ms: u64,
    pub suggestion_capacity: usize,
    /// How many recently offered codes the suggestion set remembers for de-duplication.
    pub suggestion_memory: usize,

    pub trace_capacity: usize,
    pub decode_timeout_ms: u64,
    pub rescan_cooldown_ms: u64,
    /// Consecutive identical reads the live-stream decoder needs before reporting.
    pub live_stream_agreement: usize,

    pub default_facing: Facing,
    pub tone_enabled: bool,
    pub vision: VisionSettings,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            native_interval_ms: 150,
            live_stream_interval_ms: 250,
            still_image_interval_ms: 600,
            assist_enabled: true,
            assist_interval_ms: 3_000,
            assist_similarity_distance: 2,
            assist_resend_after_ms: 8_000,
            suggestion_window_ms: 10_000,
            suggestion_capacity: 3,
            suggestion_memory: 5,
            trace_capacity: 50,
            decode_timeout_ms: 2_500,
            rescan_cooldown_ms: 2_000,
            live_stream_agreement: 2,
            default_facing: Facing::Rear,
            tone_enabled: true,
            vision: VisionSettings::default(),
        }
    }
}

impl ScannerSettings {
    /// Applies `SHELFSCAN_DEBUG` and `SHELFSCAN_VISION_URL`.
    pub fn with_env_overrides(mut self) -> Self {
        let debug_mode = std::env::var("SHELFSCAN_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if debug_mode {
            self.trace_capacity = self.trace_capacity.max(DEBUG_TRACE_CAPACITY);
        }

        if let Ok(url) = std::env::var("SHELFSCAN_VISION_URL") {
            if !url.trim().is_empty() {
                self.vision.endpoint = Some(url.trim().to_string());
            }
        }
        self
    }

    pub fn poll_interval(&self, strategy: StrategyId) -> Duration {
        let ms = match strategy {
            StrategyId::Native => self.native_interval_ms,
            StrategyId::LiveStream => self.live_stream_interval_ms,
            StrategyId::StillImage => self.still_image_interval_ms,
        };
        Duration::from_millis(ms.max(1))
    }

    pub fn assist_interval(&self) -> Duration {
        Duration::from_millis(self.assist_interval_ms.max(1))
    }

    pub fn assist_resend_after(&self) -> Duration {
        Duration::from_millis(self.assist_resend_after_ms)
    }

    pub fn suggestion_window(&self) -> Duration {
        Duration::from_millis(self.suggestion_window_ms)
    }

    pub fn decode_timeout(&self) -> Duration {
        Duration::from_millis(self.decode_timeout_ms.max(1))
    }

    pub fn rescan_cooldown(&self) -> Duration {
        Duration::from_millis(self.rescan_cooldown_ms)
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<ScannerSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!(
                    "Ignoring unparsable settings at {}: {err}; using defaults",
                    path.display()
                );
                ScannerSettings::default()
            })
        } else {
            ScannerSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn settings(&self) -> ScannerSettings {
        self.read().clone()
    }

    pub fn update(&self, settings: ScannerSettings) -> Result<()> {
        let mut guard = self.write();
        *guard = settings;
        self.persist(&guard)
    }

    fn persist(&self, data: &ScannerSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, ScannerSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ScannerSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
