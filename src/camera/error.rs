// Camera, playback and flash error types

use thiserror::Error;

use super::Facing;

pub type CameraResult<T> = Result<T, CameraError>;

/// Failures acquiring or reading the camera.
///
/// None of these are fatal to the host: every kind degrades to a
/// "no camera" state where manual code entry remains available.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CameraError {
    /// The operator or the platform refused camera access
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),

    /// Another stream (or another application) holds the device
    #[error("camera device is busy")]
    DeviceBusy,

    /// No device exists for the requested facing
    #[error("no camera matches facing {0}")]
    NoMatchingDevice(Facing),

    /// The device opened but its stream could not be started
    #[error("camera stream failed: {0}")]
    StreamFailed(String),

    /// No session is active
    #[error("camera is not active")]
    NotActive,

    /// Playback is waiting for an operator gesture
    #[error("camera playback needs an operator tap to start")]
    InteractionRequired,

    /// A snapshot could not be taken from the live stream
    #[error("frame capture failed: {0}")]
    Frame(String),
}

/// Outcome of asking the stream to start playing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    /// Autoplay was refused until the operator interacts with the screen
    #[error("playback blocked until operator interaction")]
    Blocked,

    #[error("playback failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlashError {
    #[error("the active camera has no controllable torch")]
    Unsupported,

    #[error("no active camera session")]
    NoActiveSession,

    #[error("torch control failed: {0}")]
    Device(String),
}
