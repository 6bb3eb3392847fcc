use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use serde::Serialize;
use tokio::{sync::broadcast, sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::audio::ConfirmationTone;
use crate::camera::{
    CameraBackend, CameraError, CameraResult, Facing, FlashError, FrameSource, PlaybackState,
    SessionHandle,
};
use crate::decoder::{StrategyChain, StrategyId};
use crate::settings::ScannerSettings;
use crate::vision::{AiCandidate, VisionFallback};

use super::arbiter::{ScanArbiter, ScanCallback, SubmitOutcome};
use super::assist::{assist_loop, AssistTiming};
use super::continuous::continuous_loop;
use super::events::ScannerEvent;
use super::manual::{manual_capture, ManualOutcome};
use super::state::{AcceptedCode, ScanGuards, ScanPhase, ScanTicket};
use super::suggestions::AiSuggestion;
use super::LoopContext;

use log::{debug, info, warn};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerSnapshot {
    pub phase: ScanPhase,
    pub session: Option<SessionHandle>,
    pub active_strategy: Option<StrategyId>,
    pub assist_enabled: bool,
    pub assist_available: bool,
    pub suggestions: Vec<AiSuggestion>,
    pub pending_confirmation: Option<AiCandidate>,
    pub last_accepted: Option<AcceptedCode>,
    pub trace: Vec<String>,
}

#[derive(Default)]
struct Workers {
    continuous: Option<JoinHandle<()>>,
    assist: Option<(JoinHandle<()>, CancellationToken)>,
    watcher: Option<JoinHandle<()>>,
    active_strategy: Option<StrategyId>,
}

impl Workers {
    /// Loops notice the cancelled ticket on their own; calls already in
    /// flight finish and are discarded by the arbiter.
    fn release(&mut self) {
        if let Some((_, token)) = self.assist.take() {
            token.cancel();
        }
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        if let Some(handle) = self.continuous.take() {
            if !handle.is_finished() {
                debug!("continuous loop detached; it exits on its next wake-up");
            }
        }
        self.active_strategy = None;
    }
}

/// Entry point for the host: owns the frame source, the decoder chain and
/// the arbiter, and runs one activation at a time.
#[derive(Clone)]
pub struct ScannerController {
    frames: Arc<Mutex<FrameSource>>,
    chain: StrategyChain,
    vision: Option<Arc<dyn VisionFallback>>,
    arbiter: Arc<ScanArbiter>,
    settings: Arc<ScannerSettings>,
    guards: ScanGuards,
    workers: Arc<Mutex<Workers>>,
    assist_enabled: Arc<AtomicBool>,
}

impl ScannerController {
    pub fn new(
        settings: ScannerSettings,
        camera: Arc<dyn CameraBackend>,
        chain: StrategyChain,
        vision: Option<Arc<dyn VisionFallback>>,
        tone: Arc<dyn ConfirmationTone>,
        on_scan: ScanCallback,
    ) -> Self {
        let arbiter = Arc::new(ScanArbiter::new(&settings, tone, on_scan));
        Self {
            frames: Arc::new(Mutex::new(FrameSource::new(camera))),
            chain,
            vision,
            arbiter,
            assist_enabled: Arc::new(AtomicBool::new(settings.assist_enabled)),
            settings: Arc::new(settings),
            guards: ScanGuards::default(),
            workers: Arc::new(Mutex::new(Workers::default())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScannerEvent> {
        self.arbiter.subscribe()
    }

    pub fn phase(&self) -> ScanPhase {
        self.arbiter.phase()
    }

    /// Opens the camera and starts scanning. Calling it while already
    /// scanning returns the live session unchanged.
    pub async fn start(&self, facing: Option<Facing>) -> CameraResult<SessionHandle> {
        let mut workers = self.workers.lock().await;

        if self.arbiter.current_ticket().is_some() {
            if let Some(handle) = self.frames.lock().await.session() {
                return Ok(handle);
            }
        }

        workers.release();
        let facing = facing.unwrap_or(self.settings.default_facing);
        let activated = self.frames.lock().await.activate(facing).await;
        let handle = match activated {
            Ok(handle) => handle,
            Err(err) => {
                warn!("camera activation failed: {err}");
                self.arbiter.halt("camera unavailable");
                self.arbiter.trace(format!("camera unavailable: {err}"));
                self.arbiter.emit(ScannerEvent::CameraUnavailable {
                    error: err.to_string(),
                });
                return Err(err);
            }
        };

        self.announce_session(&handle);
        self.launch(&mut workers, &handle).await;
        Ok(handle)
    }

    /// Cancels every pending poll, releases the camera and drops all
    /// per-activation state. The host callback will not fire afterwards.
    pub async fn stop(&self) {
        let mut workers = self.workers.lock().await;
        self.arbiter.halt("stopped");
        workers.release();
        if let Some(session_id) = self.frames.lock().await.deactivate() {
            info!("scanner stopped (session {session_id})");
        }
    }

    /// Host screen is going away.
    pub async fn teardown(&self) {
        self.stop().await;
    }

    /// Full stop followed by a fresh start on the opposite camera.
    pub async fn switch_facing(&self) -> CameraResult<SessionHandle> {
        let mut workers = self.workers.lock().await;
        if !self.frames.lock().await.is_active() {
            return Err(CameraError::NotActive);
        }

        self.arbiter.halt("switching camera");
        workers.release();

        let switched = self.frames.lock().await.switch_facing().await;
        match switched {
            Ok(handle) => {
                self.announce_session(&handle);
                self.launch(&mut workers, &handle).await;
                Ok(handle)
            }
            Err(err) => {
                warn!("camera switch failed: {err}");
                self.arbiter.emit(ScannerEvent::CameraUnavailable {
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    pub async fn toggle_flash(&self) -> Result<bool, FlashError> {
        let result = self.frames.lock().await.toggle_flash();
        match &result {
            Ok(on) => self.arbiter.trace(format!("torch {}", if *on { "on" } else { "off" })),
            Err(err) => self.arbiter.trace(format!("torch toggle failed: {err}")),
        }
        result
    }

    /// The operator tapped the video after autoplay was refused.
    pub async fn resume_playback(&self) -> CameraResult<PlaybackState> {
        let mut frames = self.frames.lock().await;
        let state = frames.retry_playback().await?;
        if state == PlaybackState::NeedsInteraction {
            if let Some(handle) = frames.session() {
                self.arbiter.emit(ScannerEvent::NeedsInteraction {
                    session_id: handle.session_id,
                });
            }
        }
        Ok(state)
    }

    /// Turns the realtime assist reader on or off for the live activation
    /// and for future ones.
    pub async fn set_assist_enabled(&self, enabled: bool) {
        self.assist_enabled.store(enabled, Ordering::SeqCst);
        let mut workers = self.workers.lock().await;

        if !enabled {
            if let Some((_, token)) = workers.assist.take() {
                token.cancel();
                self.arbiter.trace("assist reader switched off");
            }
            return;
        }

        let running = workers
            .assist
            .as_ref()
            .is_some_and(|(handle, _)| !handle.is_finished());
        if running {
            return;
        }
        if let Some(ticket) = self.arbiter.current_ticket() {
            self.spawn_assist(&mut workers, &ticket);
        }
    }

    pub fn assist_enabled(&self) -> bool {
        self.assist_enabled.load(Ordering::SeqCst)
    }

    pub async fn manual_capture(&self) -> CameraResult<ManualOutcome> {
        let Some(_permit) = self.guards.manual.try_begin() else {
            return Ok(ManualOutcome::InProgress);
        };
        let ticket = self.arbiter.current_ticket().ok_or(CameraError::NotActive)?;
        let ctx = self.context(ticket);
        manual_capture(
            &ctx,
            &self.chain,
            self.vision.clone(),
            self.settings.decode_timeout(),
            self.settings.vision.jpeg_quality,
        )
        .await
    }

    pub fn accept_suggestion(&self, code: &str) -> SubmitOutcome {
        self.arbiter.accept_suggestion(code)
    }

    pub fn reject_suggestion(&self, code: &str) -> bool {
        self.arbiter.reject_suggestion(code)
    }

    pub fn confirm_pending(&self) -> SubmitOutcome {
        self.arbiter.confirm_pending()
    }

    pub fn reject_pending(&self) -> bool {
        self.arbiter.reject_pending()
    }

    pub async fn snapshot(&self) -> ScannerSnapshot {
        let phase = self.arbiter.phase();
        let active_strategy = match phase {
            ScanPhase::Scanning => self.workers.lock().await.active_strategy,
            _ => None,
        };
        ScannerSnapshot {
            phase,
            session: self.frames.lock().await.session(),
            active_strategy,
            assist_enabled: self.assist_enabled(),
            assist_available: self.vision.is_some(),
            suggestions: self.arbiter.suggestions(),
            pending_confirmation: self.arbiter.pending_confirmation(),
            last_accepted: self.arbiter.last_accepted(),
            trace: self.arbiter.trace_lines(),
        }
    }

    fn context(&self, ticket: ScanTicket) -> LoopContext {
        LoopContext {
            frames: Arc::clone(&self.frames),
            arbiter: Arc::clone(&self.arbiter),
            ticket,
        }
    }

    fn announce_session(&self, handle: &SessionHandle) {
        self.arbiter.emit(ScannerEvent::SessionStarted(handle.clone()));
        if handle.needs_interaction() {
            self.arbiter.emit(ScannerEvent::NeedsInteraction {
                session_id: handle.session_id.clone(),
            });
        }
    }

    async fn launch(&self, workers: &mut Workers, handle: &SessionHandle) {
        let ticket = self.arbiter.begin(&handle.session_id);

        let selection = self.chain.select_active().await;
        for (id, reason) in &selection.skipped {
            self.arbiter.trace(format!("{id} unavailable: {reason}"));
        }
        let strategy_id = selection.active.as_ref().map(|strategy| strategy.id());
        workers.active_strategy = strategy_id;
        self.arbiter.emit(ScannerEvent::StrategySelected {
            strategy: strategy_id,
        });

        match selection.active {
            Some(strategy) => {
                let interval = self.settings.poll_interval(strategy.id());
                self.arbiter
                    .trace(format!("polling with {} every {}ms", strategy.id(), interval.as_millis()));
                workers.continuous = Some(tokio::spawn(continuous_loop(
                    self.context(ticket.clone()),
                    strategy,
                    interval,
                    self.settings.decode_timeout(),
                    self.guards.continuous.clone(),
                )));
            }
            None => self
                .arbiter
                .trace("no visual decoder available; manual capture and assist only"),
        }

        if self.assist_enabled() {
            self.spawn_assist(workers, &ticket);
        }

        workers.watcher = Some(self.spawn_resolution_watcher(ticket));
    }

    fn spawn_assist(&self, workers: &mut Workers, ticket: &ScanTicket) {
        let Some(vision) = self.vision.clone() else {
            return;
        };
        let token = ticket.token.child_token();
        let handle = tokio::spawn(assist_loop(
            self.context(ticket.clone()),
            vision,
            AssistTiming::from_settings(&self.settings),
            self.guards.assist.clone(),
            token.clone(),
        ));
        workers.assist = Some((handle, token));
    }

    /// Once an activation resolves, the camera it used is released and the
    /// arbiter returns to `Idle`.
    fn spawn_resolution_watcher(&self, ticket: ScanTicket) -> JoinHandle<()> {
        let frames = Arc::clone(&self.frames);
        let arbiter = Arc::clone(&self.arbiter);
        tokio::spawn(async move {
            ticket.cancelled().await;
            if !arbiter.is_resolved(&ticket) {
                return;
            }
            frames.lock().await.deactivate_session(ticket.session_id());
            arbiter.finish(ticket.generation());
        })
    }
}
