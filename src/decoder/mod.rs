// Barcode decoding strategies and the ordered fallback chain

pub mod live_stream;
pub mod native;
pub mod still_image;

pub use live_stream::LiveStreamStrategy;
pub use native::{BarcodeDetector, DetectedBarcode, NativeStrategy};
pub use still_image::StillImageStrategy;

use std::{fmt, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::camera::RasterBuffer;
use crate::scanner::CodeSource;
use crate::settings::ScannerSettings;

/// Reads shorter than this are treated as truncated or spurious. A length
/// floor, not a symbology check.
pub const MIN_CODE_LEN: usize = 8;

pub fn meets_length_floor(value: &str) -> bool {
    value.chars().count() >= MIN_CODE_LEN
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum StrategyId {
    Native,
    LiveStream,
    StillImage,
}

impl StrategyId {
    pub fn source(self) -> CodeSource {
        match self {
            StrategyId::Native => CodeSource::Native,
            StrategyId::LiveStream | StrategyId::StillImage => CodeSource::Library,
        }
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyId::Native => "native",
            StrategyId::LiveStream => "live-stream",
            StrategyId::StillImage => "still-image",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub value: String,
    /// Symbology as reported by the engine, when it reports one.
    pub format: Option<String>,
}

impl Candidate {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            format: None,
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }
}

/// One poll tick's outcome. Never stored beyond the trace line it produces.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodeAttempt {
    pub strategy_id: StrategyId,
    pub raw_value: Option<String>,
    pub timestamp_ms: i64,
}

impl DecodeAttempt {
    pub fn new(strategy_id: StrategyId, raw_value: Option<String>) -> Self {
        Self {
            strategy_id,
            raw_value,
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }
}

/// A barcode engine. `init` must be idempotent: the chain may call it again
/// for manual capture after the continuous loop already selected it.
#[async_trait]
pub trait DecoderStrategy: Send + Sync {
    fn id(&self) -> StrategyId;

    async fn init(&self) -> Result<()>;

    /// One decode attempt. `None` covers both "nothing found" and engine
    /// failures; a failed tick is simply retried on the next one.
    async fn try_decode(&self, frame: &RasterBuffer) -> Option<Candidate>;
}

pub struct Selection {
    pub active: Option<Arc<dyn DecoderStrategy>>,
    /// Strategies that failed to initialise, with the reason, in chain order.
    pub skipped: Vec<(StrategyId, String)>,
}

/// Ordered, first-success list of strategies.
#[derive(Clone)]
pub struct StrategyChain {
    strategies: Vec<Arc<dyn DecoderStrategy>>,
}

impl StrategyChain {
    pub fn new(strategies: Vec<Arc<dyn DecoderStrategy>>) -> Self {
        Self { strategies }
    }

    /// native -> live-stream -> still-image.
    pub fn standard(detector: Option<Arc<dyn BarcodeDetector>>, settings: &ScannerSettings) -> Self {
        Self::new(vec![
            Arc::new(NativeStrategy::new(detector)),
            Arc::new(LiveStreamStrategy::new(settings.live_stream_agreement)),
            Arc::new(StillImageStrategy::new()),
        ])
    }

    pub fn get(&self, id: StrategyId) -> Option<Arc<dyn DecoderStrategy>> {
        self.strategies.iter().find(|s| s.id() == id).cloned()
    }

    pub fn ids(&self) -> Vec<StrategyId> {
        self.strategies.iter().map(|s| s.id()).collect()
    }

    pub async fn select_active(&self) -> Selection {
        let mut skipped = Vec::new();
        for strategy in &self.strategies {
            match strategy.init().await {
                Ok(()) => {
                    return Selection {
                        active: Some(Arc::clone(strategy)),
                        skipped,
                    }
                }
                Err(err) => skipped.push((strategy.id(), format!("{err:#}"))),
            }
        }
        Selection {
            active: None,
            skipped,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use anyhow::bail;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted strategy for chain and loop tests.
    pub struct ScriptedStrategy {
        id: StrategyId,
        init_error: Option<String>,
        reads: Mutex<Vec<Option<String>>>,
        fallback: Option<String>,
        delay: Duration,
        pub calls: AtomicUsize,
    }

    impl ScriptedStrategy {
        pub fn new(id: StrategyId) -> Self {
            Self {
                id,
                init_error: None,
                reads: Mutex::new(Vec::new()),
                fallback: None,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn failing_init(mut self, reason: &str) -> Self {
            self.init_error = Some(reason.into());
            self
        }

        pub fn always(mut self, value: &str) -> Self {
            self.fallback = Some(value.into());
            self
        }

        pub fn reads(self, reads: &[Option<&str>]) -> Self {
            *self.reads.lock().unwrap() = reads.iter().rev().map(|r| r.map(String::from)).collect();
            self
        }

        pub fn delayed(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl DecoderStrategy for ScriptedStrategy {
        fn id(&self) -> StrategyId {
            self.id
        }

        async fn init(&self) -> Result<()> {
            if let Some(reason) = &self.init_error {
                bail!("{reason}");
            }
            Ok(())
        }

        async fn try_decode(&self, _frame: &RasterBuffer) -> Option<Candidate> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let scripted = self.reads.lock().unwrap().pop();
            match scripted {
                Some(read) => read.map(Candidate::new),
                None => self.fallback.clone().map(Candidate::new),
            }
        }
    }
}
