use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::audio::ConfirmationTone;
use crate::decoder::meets_length_floor;
use crate::settings::ScannerSettings;
use crate::vision::AiCandidate;

use super::events::ScannerEvent;
use super::state::{AcceptedCode, CodeSource, ScanPhase, ScanTicket};
use super::suggestions::{AiSuggestion, OfferOutcome, SuggestionSet};
use super::trace::DebugTrace;

const EVENT_CAPACITY: usize = 64;

/// Host callback; runs at most once per activation.
pub type ScanCallback = Arc<dyn Fn(AcceptedCode) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Accepted(AcceptedCode),
    /// Shorter than the length floor.
    TooShort,
    /// Same as the last accepted code (same session, or within the cooldown).
    Duplicate,
    /// Another path already won this activation.
    AlreadyResolved,
    /// The ticket belongs to a session that has been stopped or replaced.
    Stale,
    /// No such suggestion or pending confirmation.
    Unknown,
}

impl SubmitOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmitOutcome::Accepted(_))
    }
}

struct LastAccepted {
    value: String,
    session_id: String,
    at: Instant,
}

struct PendingConfirmation {
    generation: u64,
    candidate: AiCandidate,
}

struct ArbiterInner {
    phase: ScanPhase,
    generation: u64,
    session_id: Option<String>,
    token: Option<CancellationToken>,
    last_accepted: Option<LastAccepted>,
    accepted: Option<AcceptedCode>,
    suggestions: SuggestionSet,
    pending: Option<PendingConfirmation>,
    trace: DebugTrace,
}

impl ArbiterInner {
    fn accepts(&self, ticket: &ScanTicket) -> Result<(), SubmitOutcome> {
        if ticket.generation != self.generation {
            return Err(SubmitOutcome::Stale);
        }
        match self.phase {
            ScanPhase::Scanning => Ok(()),
            ScanPhase::Resolved => Err(SubmitOutcome::AlreadyResolved),
            ScanPhase::Idle => Err(SubmitOutcome::Stale),
        }
    }

    fn current_ticket(&self) -> Option<ScanTicket> {
        match (&self.session_id, &self.token) {
            (Some(session_id), Some(token)) => Some(ScanTicket {
                generation: self.generation,
                session_id: session_id.clone(),
                token: token.clone(),
            }),
            _ => None,
        }
    }

    /// Drops every per-activation collection. Returns which ones changed.
    fn clear_operator_state(&mut self) -> (bool, bool) {
        let had_suggestions = !self.suggestions.is_empty();
        self.suggestions.clear();
        let had_pending = self.pending.take().is_some();
        (had_suggestions, had_pending)
    }
}

/// The only component allowed to finalise a scan.
///
/// `Idle -> Scanning -> Resolved -> Idle`. Leaving `Scanning` for `Resolved`
/// happens under one lock, so of all the paths racing to submit exactly one
/// wins; the winner cancels the activation token, which stops both poll
/// loops, and then fires the host callback.
pub struct ScanArbiter {
    inner: Mutex<ArbiterInner>,
    on_scan: ScanCallback,
    tone: Arc<dyn ConfirmationTone>,
    events: broadcast::Sender<ScannerEvent>,
    rescan_cooldown: Duration,
}

impl ScanArbiter {
    pub fn new(
        settings: &ScannerSettings,
        tone: Arc<dyn ConfirmationTone>,
        on_scan: ScanCallback,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Mutex::new(ArbiterInner {
                phase: ScanPhase::Idle,
                generation: 0,
                session_id: None,
                token: None,
                last_accepted: None,
                accepted: None,
                suggestions: SuggestionSet::new(
                    settings.suggestion_window(),
                    settings.suggestion_capacity,
                    settings.suggestion_memory,
                ),
                pending: None,
                trace: DebugTrace::new(settings.trace_capacity),
            }),
            on_scan,
            tone,
            events,
            rescan_cooldown: settings.rescan_cooldown(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ArbiterInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScannerEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: ScannerEvent) {
        let _ = self.events.send(event);
    }

    pub fn phase(&self) -> ScanPhase {
        self.lock().phase
    }

    pub fn trace(&self, line: impl Into<String>) {
        self.lock().trace.push(line);
    }

    pub fn trace_lines(&self) -> Vec<String> {
        self.lock().trace.lines()
    }

    pub fn last_accepted(&self) -> Option<AcceptedCode> {
        self.lock().accepted.clone()
    }

    /// `true` while `ticket` is the live activation and still scanning.
    pub fn is_current(&self, ticket: &ScanTicket) -> bool {
        self.lock().accepts(ticket).is_ok()
    }

    /// `true` once `ticket`'s activation has produced its result and the
    /// teardown is still owed.
    pub fn is_resolved(&self, ticket: &ScanTicket) -> bool {
        let inner = self.lock();
        inner.generation == ticket.generation && inner.phase == ScanPhase::Resolved
    }

    pub fn current_ticket(&self) -> Option<ScanTicket> {
        let inner = self.lock();
        match inner.phase {
            ScanPhase::Scanning => inner.current_ticket(),
            _ => None,
        }
    }

    /// Enters `Scanning` for a fresh activation, superseding any previous one.
    pub fn begin(&self, session_id: &str) -> ScanTicket {
        let (ticket, cleared) = {
            let mut inner = self.lock();
            if let Some(previous) = inner.token.take() {
                previous.cancel();
            }
            let cleared = inner.clear_operator_state();
            inner.generation = inner.generation.wrapping_add(1);
            inner.phase = ScanPhase::Scanning;
            inner.session_id = Some(session_id.to_string());
            inner.accepted = None;
            let token = CancellationToken::new();
            inner.token = Some(token.clone());
            let generation = inner.generation;
            inner
                .trace
                .push(format!("scanning started (session {session_id}, generation {generation})"));
            (
                ScanTicket {
                    generation,
                    session_id: session_id.to_string(),
                    token,
                },
                cleared,
            )
        };

        self.emit_cleared(cleared);
        self.emit(ScannerEvent::StateChanged {
            phase: ScanPhase::Scanning,
        });
        ticket
    }

    /// Leaves whatever phase we are in for `Idle`, cancelling the activation.
    /// Results still in flight for it are discarded when they arrive.
    pub fn halt(&self, reason: &str) -> bool {
        let (was_active, cleared) = {
            let mut inner = self.lock();
            if inner.phase == ScanPhase::Idle && inner.token.is_none() {
                return false;
            }
            if let Some(token) = inner.token.take() {
                token.cancel();
            }
            let cleared = inner.clear_operator_state();
            inner.generation = inner.generation.wrapping_add(1);
            inner.phase = ScanPhase::Idle;
            inner.session_id = None;
            inner.trace.push(format!("scanning halted: {reason}"));
            (true, cleared)
        };

        self.emit_cleared(cleared);
        self.emit(ScannerEvent::StateChanged {
            phase: ScanPhase::Idle,
        });
        was_active
    }

    /// `Resolved -> Idle` once the winner's teardown has completed.
    pub fn finish(&self, generation: u64) -> bool {
        {
            let mut inner = self.lock();
            if inner.generation != generation || inner.phase != ScanPhase::Resolved {
                return false;
            }
            inner.phase = ScanPhase::Idle;
            inner.session_id = None;
            inner.token = None;
        }
        self.emit(ScannerEvent::StateChanged {
            phase: ScanPhase::Idle,
        });
        true
    }

    pub fn submit(&self, ticket: &ScanTicket, value: &str, source: CodeSource) -> SubmitOutcome {
        let value = value.trim();
        let (code, token, cleared) = {
            let mut inner = self.lock();
            if let Err(outcome) = inner.accepts(ticket) {
                inner
                    .trace
                    .push(format!("discarded {value} from {source:?}: {outcome:?}"));
                return outcome;
            }
            if !meets_length_floor(value) {
                inner
                    .trace
                    .push(format!("ignored short read '{value}' from {source:?}"));
                return SubmitOutcome::TooShort;
            }
            if let Some(last) = &inner.last_accepted {
                let same_session = last.session_id == ticket.session_id;
                if last.value == value && (same_session || last.at.elapsed() < self.rescan_cooldown) {
                    inner.trace.push(format!("duplicate of last accepted code {value}"));
                    return SubmitOutcome::Duplicate;
                }
            }

            let code = AcceptedCode {
                value: value.to_string(),
                source,
                session_id: ticket.session_id.clone(),
                accepted_at: Utc::now(),
            };
            inner.phase = ScanPhase::Resolved;
            inner.last_accepted = Some(LastAccepted {
                value: code.value.clone(),
                session_id: code.session_id.clone(),
                at: Instant::now(),
            });
            inner.accepted = Some(code.clone());
            let cleared = inner.clear_operator_state();
            inner
                .trace
                .push(format!("resolved {} via {:?}", code.value, code.source));
            (code, inner.token.clone(), cleared)
        };

        // Stops both loops before anything else can observe the result.
        if let Some(token) = token {
            token.cancel();
        }
        self.emit_cleared(cleared);

        if let Err(err) = self.tone.play() {
            self.trace(format!("confirmation tone failed: {err}"));
        }

        (self.on_scan)(code.clone());

        self.emit(ScannerEvent::StateChanged {
            phase: ScanPhase::Resolved,
        });
        self.emit(ScannerEvent::Resolved(code.clone()));
        SubmitOutcome::Accepted(code)
    }

    pub fn offer_suggestion(&self, ticket: &ScanTicket, candidate: &AiCandidate) -> Option<OfferOutcome> {
        let (outcome, snapshot) = {
            let mut inner = self.lock();
            if inner.accepts(ticket).is_err() || !meets_length_floor(&candidate.code) {
                return None;
            }
            let outcome = inner
                .suggestions
                .offer(&candidate.code, candidate.confidence, Instant::now());
            inner.trace.push(format!(
                "assist candidate {} ({:.2}): {outcome:?}",
                candidate.code, candidate.confidence
            ));
            (outcome, inner.suggestions.entries(Instant::now()))
        };

        if outcome == OfferOutcome::Inserted {
            self.emit(ScannerEvent::SuggestionsChanged {
                suggestions: snapshot,
            });
        }
        Some(outcome)
    }

    pub fn suggestions(&self) -> Vec<AiSuggestion> {
        self.lock().suggestions.entries(Instant::now())
    }

    /// Operator tapped "accept" on a suggestion.
    pub fn accept_suggestion(&self, code: &str) -> SubmitOutcome {
        let ticket = {
            let mut inner = self.lock();
            let Some(ticket) = inner.current_ticket().filter(|t| inner.accepts(t).is_ok()) else {
                return SubmitOutcome::Stale;
            };
            if inner.suggestions.take(code, Instant::now()).is_none() {
                return SubmitOutcome::Unknown;
            }
            ticket
        };
        self.submit(&ticket, code, CodeSource::AiConfirmed)
    }

    /// Operator tapped "reject" on a suggestion. No other side effect.
    pub fn reject_suggestion(&self, code: &str) -> bool {
        let (removed, snapshot) = {
            let mut inner = self.lock();
            let removed = inner.suggestions.remove(code, Instant::now());
            if removed {
                inner.trace.push(format!("operator rejected suggestion {code}"));
            }
            (removed, inner.suggestions.entries(Instant::now()))
        };
        if removed {
            self.emit(ScannerEvent::SuggestionsChanged {
                suggestions: snapshot,
            });
        }
        removed
    }

    /// Parks a manual-capture AI read behind an explicit confirm/reject.
    pub fn request_confirmation(&self, ticket: &ScanTicket, candidate: AiCandidate) -> bool {
        let replaced = {
            let mut inner = self.lock();
            if inner.accepts(ticket).is_err() || !meets_length_floor(&candidate.code) {
                return false;
            }
            inner.trace.push(format!(
                "manual AI candidate {} ({:.2}) awaiting confirmation",
                candidate.code, candidate.confidence
            ));
            inner
                .pending
                .replace(PendingConfirmation {
                    generation: ticket.generation,
                    candidate: candidate.clone(),
                })
                .is_some()
        };
        if replaced {
            self.emit(ScannerEvent::ConfirmationCleared);
        }
        self.emit(ScannerEvent::ConfirmationRequested { candidate });
        true
    }

    pub fn pending_confirmation(&self) -> Option<AiCandidate> {
        self.lock().pending.as_ref().map(|p| p.candidate.clone())
    }

    pub fn confirm_pending(&self) -> SubmitOutcome {
        let (ticket, code) = {
            let mut inner = self.lock();
            let Some(pending) = inner.pending.take() else {
                return SubmitOutcome::Unknown;
            };
            match inner.current_ticket() {
                Some(ticket) if ticket.generation == pending.generation => {
                    (ticket, pending.candidate.code)
                }
                _ => return SubmitOutcome::Stale,
            }
        };
        self.emit(ScannerEvent::ConfirmationCleared);
        self.submit(&ticket, &code, CodeSource::AiConfirmed)
    }

    /// Dismisses the pending confirmation; the arbiter stays in `Scanning`.
    pub fn reject_pending(&self) -> bool {
        let rejected = {
            let mut inner = self.lock();
            let rejected = inner.pending.take();
            if let Some(pending) = &rejected {
                inner
                    .trace
                    .push(format!("operator rejected manual candidate {}", pending.candidate.code));
            }
            rejected.is_some()
        };
        if rejected {
            self.emit(ScannerEvent::ConfirmationCleared);
        }
        rejected
    }

    fn emit_cleared(&self, (had_suggestions, had_pending): (bool, bool)) {
        if had_suggestions {
            self.emit(ScannerEvent::SuggestionsChanged {
                suggestions: Vec::new(),
            });
        }
        if had_pending {
            self.emit(ScannerEvent::ConfirmationCleared);
        }
    }
}
