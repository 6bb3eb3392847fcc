use std::sync::Arc;

use serde::Serialize;
use tokio::time::Duration;

use crate::camera::CameraResult;
use crate::decoder::{meets_length_floor, StrategyChain, StrategyId};
use crate::vision::{AiCandidate, AiMode, VisionFallback};

use super::arbiter::SubmitOutcome;
use super::state::AcceptedCode;
use super::LoopContext;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// Result of one operator-triggered capture.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum ManualOutcome {
    /// A local decoder read it; the activation is resolved.
    Resolved { code: AcceptedCode },
    /// Only the AI produced something; the operator must confirm or reject.
    AwaitingConfirmation { candidate: AiCandidate },
    /// Every path came back empty. Scanning continues untouched.
    NoResult,
    /// A local read was turned down by the arbiter (stale, duplicate, ...).
    Declined { reason: String },
    /// A previous capture is still running.
    InProgress,
}

const LOCAL_ORDER: [StrategyId; 2] = [StrategyId::Native, StrategyId::StillImage];

/// Native, then the still-image library, then the AI. The AI result is never
/// accepted here; it is parked for confirmation.
pub(crate) async fn manual_capture(
    ctx: &LoopContext,
    chain: &StrategyChain,
    vision: Option<Arc<dyn VisionFallback>>,
    decode_timeout: Duration,
    jpeg_quality: u8,
) -> CameraResult<ManualOutcome> {
    let frame = ctx.capture().await?;
    ctx.arbiter
        .trace(format!("manual capture of frame #{}", frame.sequence()));

    for id in LOCAL_ORDER {
        let Some(strategy) = chain.get(id) else {
            continue;
        };
        if let Err(err) = strategy.init().await {
            log_debug!("manual capture skipping {id}: {err}");
            continue;
        }

        let read = tokio::time::timeout(decode_timeout, strategy.try_decode(&frame)).await;
        let Ok(Some(candidate)) = read else {
            continue;
        };
        if !meets_length_floor(&candidate.value) {
            ctx.arbiter
                .trace(format!("manual {id} short read '{}' ignored", candidate.value));
            continue;
        }

        return Ok(match ctx.arbiter.submit(&ctx.ticket, &candidate.value, id.source()) {
            SubmitOutcome::Accepted(code) => ManualOutcome::Resolved { code },
            other => ManualOutcome::Declined {
                reason: format!("{other:?}"),
            },
        });
    }

    let Some(vision) = vision else {
        ctx.arbiter.trace("manual capture found nothing; no AI fallback configured");
        return Ok(ManualOutcome::NoResult);
    };

    let encoded = {
        let frame = frame.clone();
        tokio::task::spawn_blocking(move || frame.encode_jpeg(jpeg_quality)).await
    };
    let jpeg = match encoded {
        Ok(Ok(jpeg)) => jpeg,
        Ok(Err(err)) => {
            ctx.arbiter.trace(format!("manual frame encode failed: {err}"));
            return Ok(ManualOutcome::NoResult);
        }
        Err(err) => {
            ctx.arbiter.trace(format!("manual frame task failed: {err}"));
            return Ok(ManualOutcome::NoResult);
        }
    };

    let candidate = match vision.decode(jpeg, AiMode::Manual).await {
        Ok(response) => response.into_candidate(),
        Err(err) => {
            ctx.arbiter.trace(format!("manual AI request failed: {err}"));
            None
        }
    };

    match candidate {
        Some(candidate) if meets_length_floor(&candidate.code) => {
            if ctx.arbiter.request_confirmation(&ctx.ticket, candidate.clone()) {
                log_info!(
                    "manual AI candidate {} ({:.2}) awaiting confirmation",
                    candidate.code,
                    candidate.confidence
                );
                Ok(ManualOutcome::AwaitingConfirmation { candidate })
            } else {
                Ok(ManualOutcome::Declined {
                    reason: "Stale".into(),
                })
            }
        }
        Some(candidate) => {
            ctx.arbiter
                .trace(format!("manual AI short read '{}' ignored", candidate.code));
            Ok(ManualOutcome::NoResult)
        }
        None => Ok(ManualOutcome::NoResult),
    }
}
