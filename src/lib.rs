#[macro_use]
pub mod utils;

pub mod audio;
pub mod camera;
pub mod decoder;
pub mod scanner;
pub mod settings;
pub mod vision;

pub use camera::{CameraBackend, CameraError, Facing, FrameSource, ImageFolderCamera, SessionHandle};
pub use decoder::{BarcodeDetector, DecoderStrategy, StrategyChain, StrategyId, MIN_CODE_LEN};
pub use scanner::{
    AcceptedCode, CodeSource, ManualOutcome, OperatorCommand, ScanCallback, ScanPhase,
    ScannerController, ScannerEvent, ScannerSnapshot, SubmitOutcome,
};
pub use settings::{ScannerSettings, SettingsStore};
pub use vision::{HttpVisionClient, VisionFallback};

/// Initialises logging (reads `RUST_LOG`, defaults to `info`).
pub fn init_logging() {
    let _ = log_builder("RUST_LOG").try_init();
}

fn log_builder(filter_var: &str) -> env_logger::Builder {
    env_logger::Builder::from_env(env_logger::Env::new().filter_or(filter_var, "info"))
}
