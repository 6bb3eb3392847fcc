#[cfg(feature = "audio")]
pub mod chime;

#[cfg(feature = "audio")]
pub use engine::ToneEngineHandle;

/// Best-effort "scan accepted" feedback. Callers ignore failures.
pub trait ConfirmationTone: Send + Sync {
    fn play(&self) -> Result<(), String>;
}

/// Used when the tone is disabled or no audio output is compiled in.
pub struct SilentTone;

impl ConfirmationTone for SilentTone {
    fn play(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Picks the audible tone when built with `audio` and enabled in settings.
pub fn default_tone(enabled: bool) -> std::sync::Arc<dyn ConfirmationTone> {
    #[cfg(feature = "audio")]
    {
        if enabled {
            return std::sync::Arc::new(ToneEngineHandle::new());
        }
    }

    #[cfg(not(feature = "audio"))]
    {
        if enabled {
            log::debug!("confirmation tone requested but built without the `audio` feature");
        }
    }

    std::sync::Arc::new(SilentTone)
}

#[cfg(feature = "audio")]
mod engine {
    use super::chime::ScanChime;
    use super::ConfirmationTone;

    use rodio::{OutputStream, Sink};
    use std::sync::{
        mpsc::{self, Sender},
        Mutex,
    };
    use std::thread;

    enum ToneCommand {
        Chime,
    }

    /// Owns a dedicated audio thread; rodio output objects are not `Send`.
    pub struct ToneEngineHandle {
        tx: Mutex<Option<Sender<ToneCommand>>>,
    }

    impl ToneEngineHandle {
        pub fn new() -> Self {
            Self {
                tx: Mutex::new(None),
            }
        }

        fn ensure_thread(&self) -> Result<Sender<ToneCommand>, String> {
            let mut guard = self.tx.lock().map_err(|e| e.to_string())?;
            if let Some(tx) = guard.as_ref() {
                return Ok(tx.clone());
            }

            let (tx, rx) = mpsc::channel::<ToneCommand>();

            thread::Builder::new()
                .name("scan-tone".to_string())
                .spawn(move || {
                    let mut _stream: Option<OutputStream> = None;
                    let mut sink: Option<Sink> = None;

                    fn ensure_sink(
                        stream: &mut Option<OutputStream>,
                        sink: &mut Option<Sink>,
                    ) -> Result<(), String> {
                        if sink.is_none() {
                            let (s, handle) = OutputStream::try_default()
                                .map_err(|e| format!("Failed to create audio output stream: {}", e))?;
                            let new_sink = Sink::try_new(&handle)
                                .map_err(|e| format!("Failed to create audio sink: {}", e))?;
                            *stream = Some(s);
                            *sink = Some(new_sink);
                        }
                        Ok(())
                    }

                    while let Ok(cmd) = rx.recv() {
                        match cmd {
                            ToneCommand::Chime => {
                                if let Err(err) = ensure_sink(&mut _stream, &mut sink) {
                                    log::warn!("scan tone unavailable: {err}");
                                    continue;
                                }
                                if let Some(ref s) = sink {
                                    s.append(ScanChime::new());
                                    s.play();
                                }
                            }
                        }
                    }
                })
                .map_err(|e| e.to_string())?;

            *guard = Some(tx.clone());
            Ok(tx)
        }
    }

    impl Default for ToneEngineHandle {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ConfirmationTone for ToneEngineHandle {
        fn play(&self) -> Result<(), String> {
            let tx = self.ensure_thread()?;
            tx.send(ToneCommand::Chime).map_err(|e| e.to_string())
        }
    }
}
