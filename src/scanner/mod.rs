//! Scan orchestration: the arbiter, the three acquisition paths feeding it,
//! and the controller that wires them to the frame source.

pub mod arbiter;
pub mod assist;
pub mod commands;
pub mod continuous;
pub mod controller;
pub mod events;
pub mod manual;
pub mod state;
pub mod suggestions;
pub mod trace;

pub use arbiter::{ScanArbiter, ScanCallback, SubmitOutcome};
pub use assist::REALTIME_CONFIDENCE_FLOOR;
pub use commands::{dispatch, OperatorCommand};
pub use controller::{ScannerController, ScannerSnapshot};
pub use events::ScannerEvent;
pub use manual::ManualOutcome;
pub use state::{AcceptedCode, CodeSource, InFlight, ScanGuards, ScanPhase, ScanTicket};
pub use suggestions::{AiSuggestion, OfferOutcome, SuggestionSet};
pub use trace::DebugTrace;

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::camera::{CameraResult, FrameSource, RasterBuffer};

/// What every acquisition path needs for one activation.
#[derive(Clone)]
pub(crate) struct LoopContext {
    pub frames: Arc<Mutex<FrameSource>>,
    pub arbiter: Arc<ScanArbiter>,
    pub ticket: ScanTicket,
}

impl LoopContext {
    /// Snapshot under a short lock; decoders never touch the stream.
    pub async fn capture(&self) -> CameraResult<RasterBuffer> {
        self.frames.lock().await.capture_still()
    }
}
