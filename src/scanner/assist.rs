use std::sync::Arc;

use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::camera::{CameraError, RasterBuffer};
use crate::decoder::meets_length_floor;
use crate::settings::ScannerSettings;
use crate::vision::phash::compute_hamming_distance;
use crate::vision::{AiMode, VisionFallback};

use super::state::InFlight;
use super::LoopContext;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// Realtime reads below this never reach the operator.
pub const REALTIME_CONFIDENCE_FLOOR: f32 = 0.7;

#[derive(Debug, Clone, Copy)]
pub(crate) struct AssistTiming {
    pub interval: Duration,
    pub similarity_distance: u32,
    pub resend_after: Duration,
    pub jpeg_quality: u8,
}

impl AssistTiming {
    pub fn from_settings(settings: &ScannerSettings) -> Self {
        Self {
            interval: settings.assist_interval(),
            similarity_distance: settings.assist_similarity_distance,
            resend_after: settings.assist_resend_after(),
            jpeg_quality: settings.vision.jpeg_quality,
        }
    }
}

struct LastSent {
    phash: String,
    at: Instant,
}

/// Samples the feed at a slow cadence and turns confident AI reads into
/// operator suggestions. Nothing here can resolve the activation.
///
/// `token` is a child of the activation token, so the loop ends on resolution,
/// stop, or when assist alone is switched off.
pub(crate) async fn assist_loop(
    ctx: LoopContext,
    vision: Arc<dyn VisionFallback>,
    timing: AssistTiming,
    guard: InFlight,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(timing.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_sent: Option<LastSent> = None;

    log_info!(
        "assist loop started: every {}ms (session {})",
        timing.interval.as_millis(),
        ctx.ticket.session_id()
    );

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                log_info!("assist loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                let Some(_permit) = guard.try_begin() else {
                    log_debug!("assist tick skipped: remote call outstanding");
                    continue;
                };
                assist_once(&ctx, vision.as_ref(), &timing, &token, &mut last_sent).await;
            }
        }
    }
}

async fn assist_once(
    ctx: &LoopContext,
    vision: &dyn VisionFallback,
    timing: &AssistTiming,
    token: &CancellationToken,
    last_sent: &mut Option<LastSent>,
) {
    let frame = match ctx.capture().await {
        Ok(frame) => frame,
        Err(CameraError::InteractionRequired) => return,
        Err(err) => {
            ctx.arbiter.trace(format!("assist capture failed: {err}"));
            return;
        }
    };

    let Some((phash, jpeg)) = prepare(frame, timing, last_sent).await else {
        return;
    };

    let response = match vision.decode(jpeg, AiMode::Realtime).await {
        Ok(response) => response,
        Err(err) => {
            // Nothing recorded, so the next tick may send the same view again.
            ctx.arbiter.trace(format!("assist request failed: {err}"));
            return;
        }
    };
    *last_sent = Some(LastSent {
        phash,
        at: Instant::now(),
    });

    // Switched off or superseded while the request was out.
    if token.is_cancelled() {
        log_debug!("assist result discarded after cancellation");
        return;
    }

    let Some(candidate) = response.into_candidate() else {
        return;
    };
    if candidate.confidence < REALTIME_CONFIDENCE_FLOOR || !meets_length_floor(&candidate.code) {
        ctx.arbiter.trace(format!(
            "assist candidate {} ({:.2}) below threshold",
            candidate.code, candidate.confidence
        ));
        return;
    }
    ctx.arbiter.offer_suggestion(&ctx.ticket, &candidate);
}

/// Hashes the frame and, unless it is a near-duplicate of the last upload
/// that is still fresh, encodes it for the wire.
async fn prepare(
    frame: RasterBuffer,
    timing: &AssistTiming,
    last_sent: &Option<LastSent>,
) -> Option<(String, Vec<u8>)> {
    let previous = last_sent
        .as_ref()
        .filter(|sent| sent.at.elapsed() < timing.resend_after)
        .map(|sent| sent.phash.clone());
    let threshold = timing.similarity_distance;
    let quality = timing.jpeg_quality;

    let prepared = tokio::task::spawn_blocking(move || {
        let phash = frame.phash();
        if let Some(previous) = previous {
            let distance = compute_hamming_distance(&previous, &phash);
            if distance <= threshold {
                return Ok(None);
            }
        }
        frame.encode_jpeg(quality).map(|jpeg| Some((phash, jpeg)))
    })
    .await;

    match prepared {
        Ok(Ok(Some(ready))) => Some(ready),
        Ok(Ok(None)) => {
            log_debug!("assist skipped near-identical frame");
            None
        }
        Ok(Err(err)) => {
            log_debug!("assist frame encode failed: {err}");
            None
        }
        Err(err) => {
            log_debug!("assist frame task failed: {err}");
            None
        }
    }
}
