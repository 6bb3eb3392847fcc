use std::sync::Arc;

use tokio::time::{Duration, MissedTickBehavior};

use crate::camera::CameraError;
use crate::decoder::{meets_length_floor, DecodeAttempt, DecoderStrategy};

use super::arbiter::SubmitOutcome;
use super::state::InFlight;
use super::LoopContext;

// Set to false to silence per-tick logging from this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

#[derive(Debug, PartialEq, Eq)]
enum TickOutcome {
    Nothing,
    Forwarded,
    Resolved,
}

/// Polls the active strategy against the live feed until the activation is
/// cancelled or this loop's own submission resolves it.
pub(crate) async fn continuous_loop(
    ctx: LoopContext,
    strategy: Arc<dyn DecoderStrategy>,
    interval: Duration,
    decode_timeout: Duration,
    guard: InFlight,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut last_value: Option<String> = None;
    log_info!(
        "continuous loop started: {} every {}ms (session {})",
        strategy.id(),
        interval.as_millis(),
        ctx.ticket.session_id()
    );

    loop {
        tokio::select! {
            biased;
            _ = ctx.ticket.cancelled() => {
                log_info!("continuous loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                let Some(_permit) = guard.try_begin() else {
                    log_debug!("continuous tick skipped: previous attempt still in flight");
                    continue;
                };

                let fut = poll_once(&ctx, strategy.as_ref(), &mut last_value);
                match tokio::time::timeout(decode_timeout, fut).await {
                    Ok(TickOutcome::Resolved) => break,
                    Ok(_) => {}
                    Err(_) => log_warn!(
                        "{} decode exceeded {}ms; retrying next tick",
                        strategy.id(),
                        decode_timeout.as_millis()
                    ),
                }
            }
        }
    }
}

async fn poll_once(
    ctx: &LoopContext,
    strategy: &dyn DecoderStrategy,
    last_value: &mut Option<String>,
) -> TickOutcome {
    let frame = match ctx.capture().await {
        Ok(frame) => frame,
        Err(CameraError::InteractionRequired) => return TickOutcome::Nothing,
        Err(err) => {
            ctx.arbiter.trace(format!("continuous capture failed: {err}"));
            return TickOutcome::Nothing;
        }
    };

    let candidate = strategy.try_decode(&frame).await;
    let format = candidate.as_ref().and_then(|c| c.format.clone());
    let attempt = DecodeAttempt::new(strategy.id(), candidate.map(|c| c.value));
    let Some(value) = attempt.raw_value else {
        return TickOutcome::Nothing;
    };

    log_debug!(
        "{} read '{}' ({}) from frame #{} at {}",
        attempt.strategy_id,
        value,
        format.as_deref().unwrap_or("unknown format"),
        frame.sequence(),
        attempt.timestamp_ms
    );

    if !meets_length_floor(&value) {
        ctx.arbiter
            .trace(format!("{} short read '{value}' ignored", attempt.strategy_id));
        return TickOutcome::Nothing;
    }
    if last_value.as_deref() == Some(value.as_str()) {
        return TickOutcome::Nothing;
    }
    *last_value = Some(value.clone());

    match ctx
        .arbiter
        .submit(&ctx.ticket, &value, attempt.strategy_id.source())
    {
        SubmitOutcome::Accepted(_) => TickOutcome::Resolved,
        SubmitOutcome::Stale | SubmitOutcome::AlreadyResolved => TickOutcome::Resolved,
        SubmitOutcome::Duplicate => {
            // Still inside the rescan cooldown; offer it again on a later tick.
            *last_value = None;
            TickOutcome::Forwarded
        }
        _ => TickOutcome::Forwarded,
    }
}
