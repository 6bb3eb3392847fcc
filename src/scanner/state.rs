use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ScanPhase {
    Idle,
    Scanning,
    Resolved,
}

impl Default for ScanPhase {
    fn default() -> Self {
        ScanPhase::Idle
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CodeSource {
    Native,
    Library,
    AiConfirmed,
}

/// The one result an activation produces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedCode {
    pub value: String,
    pub source: CodeSource,
    pub session_id: String,
    pub accepted_at: DateTime<Utc>,
}

/// Proof that a caller belongs to one particular activation. Results carried
/// under an old ticket are discarded by the arbiter.
#[derive(Debug, Clone)]
pub struct ScanTicket {
    pub(crate) generation: u64,
    pub(crate) session_id: String,
    pub(crate) token: CancellationToken,
}

impl ScanTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

/// Single in-flight guard. At most one [`InFlightPermit`] exists at a time.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    busy: Arc<AtomicBool>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_begin(&self) -> Option<InFlightPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightPermit {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

#[must_use = "the guard is released as soon as the permit is dropped"]
#[derive(Debug)]
pub struct InFlightPermit {
    busy: Arc<AtomicBool>,
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// The three independent guards of an activation path. They survive across
/// activations so a straggling tick from a previous session still blocks.
#[derive(Debug, Clone, Default)]
pub struct ScanGuards {
    pub continuous: InFlight,
    pub assist: InFlight,
    pub manual: InFlight,
}
