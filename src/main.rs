use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use shelfscan::{
    audio, init_logging, scanner, AcceptedCode, Facing, HttpVisionClient, ImageFolderCamera, OperatorCommand,
    ScannerController, ScannerEvent, SettingsStore, StrategyChain, VisionFallback,
};

/// Interactive barcode scanner over a folder of camera frames.
#[derive(Debug, Parser)]
#[command(name = "shelfscan", version)]
struct Args {
    /// Directory of frames; files named `front*` feed the front camera.
    #[arg(long)]
    frames: PathBuf,

    /// Settings file (created with defaults when `--write-settings` is given).
    #[arg(long, default_value = "shelfscan-settings.json")]
    settings: PathBuf,

    /// Remote vision endpoint; enables the AI assist and manual fallback.
    #[arg(long)]
    endpoint: Option<String>,

    /// Camera to open on `start` when none is named.
    #[arg(long)]
    facing: Option<Facing>,

    /// Persist the effective settings back to the settings file.
    #[arg(long)]
    write_settings: bool,
}

fn main() {
    init_logging();
    let args = Args::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to start runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(run(args)) {
        eprintln!("shelfscan: {err:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let store = SettingsStore::new(args.settings.clone())?;
    let mut settings = store.settings();
    if let Some(endpoint) = args.endpoint {
        settings.vision.endpoint = Some(endpoint);
    }
    if let Some(facing) = args.facing {
        settings.default_facing = facing;
    }
    if args.write_settings {
        store.update(settings.clone())?;
        info!("settings written to {}", args.settings.display());
    }
    let settings = settings.with_env_overrides();

    let camera = ImageFolderCamera::from_dir(&args.frames)
        .with_context(|| format!("cannot use {} as a camera", args.frames.display()))?;
    info!(
        "loaded {} rear / {} front frames",
        camera.frame_count(Facing::Rear),
        camera.frame_count(Facing::Front)
    );

    let vision: Option<Arc<dyn VisionFallback>> = match HttpVisionClient::from_settings(&settings.vision) {
        Ok(Some(client)) => {
            info!("vision fallback at {}", client.endpoint());
            Some(Arc::new(client))
        }
        Ok(None) => None,
        Err(err) => {
            warn!("vision fallback disabled: {err}");
            None
        }
    };

    let chain = StrategyChain::standard(None, &settings);
    let tone = audio::default_tone(settings.tone_enabled);
    let controller = ScannerController::new(
        settings,
        Arc::new(camera),
        chain,
        vision,
        tone,
        Arc::new(|code: AcceptedCode| println!("SCANNED {} ({:?})", code.value, code.source)),
    );

    let mut events = controller.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(missed)) => warn!("event printer lagged by {missed} events"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    println!("commands: start [front|rear], stop, switch, flash, tap, manual, assist on|off,");
    println!("          accept <code>, reject <code>, confirm, deny, status, trace, quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") {
            break;
        }

        let reply = match line.parse::<OperatorCommand>() {
            Ok(command) => scanner::dispatch(&controller, command).await,
            Err(err) => Err(err),
        };
        match reply {
            Ok(message) => println!("{message}"),
            Err(message) => println!("error: {message}"),
        }
    }

    controller.teardown().await;
    Ok(())
}

fn print_event(event: &ScannerEvent) {
    match event {
        ScannerEvent::SuggestionsChanged { suggestions } if !suggestions.is_empty() => {
            for suggestion in suggestions {
                println!(
                    "  suggestion {} ({:.0}%)  -> accept {0} | reject {0}",
                    suggestion.code,
                    suggestion.confidence * 100.0
                );
            }
        }
        ScannerEvent::NeedsInteraction { .. } => println!("  video paused: type `tap` to start it"),
        other => match serde_json::to_string(other) {
            Ok(json) => println!("  event {json}"),
            Err(err) => warn!("unprintable event: {err}"),
        },
    }
}
