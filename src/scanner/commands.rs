use std::str::FromStr;

use crate::camera::Facing;

use super::arbiter::SubmitOutcome;
use super::controller::ScannerController;
use super::manual::ManualOutcome;

/// One line of operator input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Start(Option<Facing>),
    Stop,
    Switch,
    Flash,
    /// Tap on the video surface; retries blocked playback.
    Tap,
    Manual,
    Assist(bool),
    Accept(String),
    Reject(String),
    Confirm,
    Deny,
    Status,
    Trace,
}

impl FromStr for OperatorCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err("empty command".into());
        };
        let arg = words.next();
        if words.next().is_some() {
            return Err(format!("too many arguments for '{verb}'"));
        }

        let command = match (verb.to_ascii_lowercase().as_str(), arg) {
            ("start", None) => OperatorCommand::Start(None),
            ("start", Some(facing)) => OperatorCommand::Start(Some(facing.parse()?)),
            ("stop", None) => OperatorCommand::Stop,
            ("switch", None) => OperatorCommand::Switch,
            ("flash", None) => OperatorCommand::Flash,
            ("tap", None) => OperatorCommand::Tap,
            ("manual", None) => OperatorCommand::Manual,
            ("assist", Some("on")) => OperatorCommand::Assist(true),
            ("assist", Some("off")) => OperatorCommand::Assist(false),
            ("accept", Some(code)) => OperatorCommand::Accept(code.to_string()),
            ("reject", Some(code)) => OperatorCommand::Reject(code.to_string()),
            ("confirm", None) => OperatorCommand::Confirm,
            ("deny", None) => OperatorCommand::Deny,
            ("status", None) => OperatorCommand::Status,
            ("trace", None) => OperatorCommand::Trace,
            (other, _) => return Err(format!("unknown or malformed command '{other}'")),
        };
        Ok(command)
    }
}

fn describe_submit(outcome: SubmitOutcome) -> Result<String, String> {
    match outcome {
        SubmitOutcome::Accepted(code) => Ok(format!("accepted {}", code.value)),
        other => Err(format!("not accepted: {other:?}")),
    }
}

/// Runs one command against the controller and renders the reply.
pub async fn dispatch(controller: &ScannerController, command: OperatorCommand) -> Result<String, String> {
    match command {
        OperatorCommand::Start(facing) => controller
            .start(facing)
            .await
            .map(|handle| {
                let mut reply = format!("scanning with {} camera (session {})", handle.facing, handle.session_id);
                if handle.needs_interaction() {
                    reply.push_str("; tap to start video");
                }
                reply
            })
            .map_err(|e| e.to_string()),
        OperatorCommand::Stop => {
            controller.stop().await;
            Ok("stopped".into())
        }
        OperatorCommand::Switch => controller
            .switch_facing()
            .await
            .map(|handle| format!("switched to {} camera", handle.facing))
            .map_err(|e| e.to_string()),
        OperatorCommand::Flash => controller
            .toggle_flash()
            .await
            .map(|on| format!("flash {}", if on { "on" } else { "off" }))
            .map_err(|e| e.to_string()),
        OperatorCommand::Tap => controller
            .resume_playback()
            .await
            .map(|state| format!("playback {state:?}"))
            .map_err(|e| e.to_string()),
        OperatorCommand::Manual => match controller.manual_capture().await {
            Ok(ManualOutcome::Resolved { code }) => Ok(format!("accepted {}", code.value)),
            Ok(ManualOutcome::AwaitingConfirmation { candidate }) => Ok(format!(
                "AI read {} ({:.0}%); confirm or deny",
                candidate.code,
                candidate.confidence * 100.0
            )),
            Ok(ManualOutcome::NoResult) => Ok("no barcode found".into()),
            Ok(ManualOutcome::Declined { reason }) => Err(format!("not accepted: {reason}")),
            Ok(ManualOutcome::InProgress) => Err("capture already in progress".into()),
            Err(err) => Err(err.to_string()),
        },
        OperatorCommand::Assist(enabled) => {
            controller.set_assist_enabled(enabled).await;
            Ok(format!("assist {}", if enabled { "on" } else { "off" }))
        }
        OperatorCommand::Accept(code) => describe_submit(controller.accept_suggestion(&code)),
        OperatorCommand::Reject(code) => {
            if controller.reject_suggestion(&code) {
                Ok(format!("rejected {code}"))
            } else {
                Err(format!("no suggestion {code}"))
            }
        }
        OperatorCommand::Confirm => describe_submit(controller.confirm_pending()),
        OperatorCommand::Deny => {
            if controller.reject_pending() {
                Ok("candidate dismissed".into())
            } else {
                Err("nothing awaiting confirmation".into())
            }
        }
        OperatorCommand::Status => {
            let snapshot = controller.snapshot().await;
            serde_json::to_string_pretty(&snapshot).map_err(|e| e.to_string())
        }
        OperatorCommand::Trace => Ok(controller.snapshot().await.trace.join("\n")),
    }
}
