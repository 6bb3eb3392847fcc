use serde::Serialize;

use crate::camera::SessionHandle;
use crate::decoder::StrategyId;
use crate::vision::AiCandidate;

use super::state::{AcceptedCode, ScanPhase};
use super::suggestions::AiSuggestion;

/// Everything the operator-facing surface needs to redraw.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum ScannerEvent {
    StateChanged { phase: ScanPhase },
    SessionStarted(SessionHandle),
    /// Playback refused to autostart; show a "tap to start" affordance.
    NeedsInteraction { session_id: String },
    CameraUnavailable { error: String },
    StrategySelected { strategy: Option<StrategyId> },
    SuggestionsChanged { suggestions: Vec<AiSuggestion> },
    /// Manual-capture AI read waiting for an explicit confirm or reject.
    ConfirmationRequested { candidate: AiCandidate },
    ConfirmationCleared,
    Resolved(AcceptedCode),
}
