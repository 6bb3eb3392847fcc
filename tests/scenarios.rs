use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use rxing::{BarcodeFormat, MultiFormatWriter, Writer};
use tokio::time::{sleep, Duration, Instant};

use shelfscan::audio::SilentTone;
use shelfscan::camera::RasterBuffer;
use shelfscan::decoder::{Candidate, DetectedBarcode};
use shelfscan::scanner::ScanArbiter;
use shelfscan::vision::{AiDecodeResponse, AiMode, VisionError};
use shelfscan::{
    AcceptedCode, BarcodeDetector, CodeSource, DecoderStrategy, ImageFolderCamera, ManualOutcome,
    ScanPhase, ScannerController, ScannerSettings, StrategyChain, StrategyId, SubmitOutcome,
    VisionFallback,
};

struct FixedDetector {
    value: String,
    calls: AtomicUsize,
}

impl FixedDetector {
    fn new(value: &str) -> Arc<Self> {
        Arc::new(Self {
            value: value.into(),
            calls: AtomicUsize::new(0),
        })
    }
}

impl BarcodeDetector for FixedDetector {
    fn supported_formats(&self) -> anyhow::Result<Vec<String>> {
        Ok(vec!["ean_13".into(), "upc_a".into()])
    }

    fn detect(&self, _frame: &RasterBuffer) -> anyhow::Result<Vec<DetectedBarcode>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![DetectedBarcode {
            raw_value: self.value.clone(),
            format: "ean_13".into(),
        }])
    }
}

/// Reads `value` only after `delay`, long enough to be overtaken by a stop.
struct SlowStrategy {
    value: String,
    delay: Duration,
}

#[async_trait]
impl DecoderStrategy for SlowStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::StillImage
    }

    async fn init(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn try_decode(&self, _frame: &RasterBuffer) -> Option<Candidate> {
        sleep(self.delay).await;
        Some(Candidate::new(self.value.clone()))
    }
}

struct ScriptedVision {
    response: AiDecodeResponse,
    delay: Duration,
    calls: AtomicUsize,
    modes: Mutex<Vec<AiMode>>,
}

impl ScriptedVision {
    fn new(barcode: &str, confidence: f32) -> Arc<Self> {
        Arc::new(Self {
            response: AiDecodeResponse::found(barcode, confidence),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            modes: Mutex::new(Vec::new()),
        })
    }

    fn slow(barcode: &str, confidence: f32, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            response: AiDecodeResponse::found(barcode, confidence),
            delay,
            calls: AtomicUsize::new(0),
            modes: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl VisionFallback for ScriptedVision {
    async fn decode(&self, _jpeg: Vec<u8>, mode: AiMode) -> Result<AiDecodeResponse, VisionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.modes.lock().unwrap().push(mode);
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        Ok(self.response.clone())
    }
}

fn fast_settings() -> ScannerSettings {
    ScannerSettings {
        native_interval_ms: 20,
        live_stream_interval_ms: 20,
        still_image_interval_ms: 20,
        assist_enabled: false,
        assist_interval_ms: 20,
        assist_resend_after_ms: 0,
        ..ScannerSettings::default()
    }
}

fn blank_frame() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(160, 120, Rgb([200, 200, 200])))
}

fn rendered_upc(contents: &str) -> DynamicImage {
    let matrix = MultiFormatWriter::default()
        .encode(contents, &BarcodeFormat::UPC_A, 380, 120)
        .expect("barcode encodes");
    let margin = 40u32;
    let (w, h) = (matrix.getWidth(), matrix.getHeight());
    let mut img = GrayImage::from_pixel(w + margin * 2, h + margin * 2, Luma([255u8]));
    for y in 0..h {
        for x in 0..w {
            if matrix.get(x, y) {
                img.put_pixel(x + margin, y + margin, Luma([0u8]));
            }
        }
    }
    DynamicImage::ImageLuma8(img)
}

struct Harness {
    controller: ScannerController,
    scans: Arc<Mutex<Vec<AcceptedCode>>>,
}

impl Harness {
    fn new(
        settings: ScannerSettings,
        frames: Vec<DynamicImage>,
        chain: StrategyChain,
        vision: Option<Arc<dyn VisionFallback>>,
    ) -> Self {
        let scans = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&scans);
        let controller = ScannerController::new(
            settings,
            Arc::new(ImageFolderCamera::with_frames(frames, vec![])),
            chain,
            vision,
            Arc::new(SilentTone),
            Arc::new(move |code| sink.lock().unwrap().push(code)),
        );
        Self { controller, scans }
    }

    fn scans(&self) -> Vec<AcceptedCode> {
        self.scans.lock().unwrap().clone()
    }

    async fn wait_until(&self, what: &str, limit: Duration, mut check: impl FnMut(&Self) -> bool) {
        let deadline = Instant::now() + limit;
        while !check(self) {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            sleep(Duration::from_millis(5)).await;
        }
    }
}

#[tokio::test]
async fn scenario_a_native_read_fires_once_and_stops_polling() {
    let settings = fast_settings();
    let detector = FixedDetector::new("5901234123457");
    let chain = StrategyChain::standard(Some(detector.clone()), &settings);
    let harness = Harness::new(settings, vec![blank_frame()], chain, None);

    harness.controller.start(None).await.unwrap();
    harness
        .wait_until("native scan", Duration::from_millis(500), |h| !h.scans().is_empty())
        .await;
    harness
        .wait_until("idle", Duration::from_millis(500), |h| h.controller.phase() == ScanPhase::Idle)
        .await;

    let calls = detector.calls.load(Ordering::SeqCst);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(detector.calls.load(Ordering::SeqCst), calls);

    let scans = harness.scans();
    assert_eq!(scans.len(), 1);
    assert_eq!(scans[0].value, "5901234123457");
    assert_eq!(scans[0].source, CodeSource::Native);
    assert!(harness.controller.snapshot().await.session.is_none());
}

#[tokio::test]
async fn scenario_b_cascaded_library_read_fires_once() {
    let settings = fast_settings();
    let chain = StrategyChain::standard(None, &settings);
    let harness = Harness::new(settings, vec![rendered_upc("012345678905")], chain, None);

    harness.controller.start(None).await.unwrap();
    harness
        .wait_until("library scan", Duration::from_secs(5), |h| !h.scans().is_empty())
        .await;
    sleep(Duration::from_millis(100)).await;

    let scans = harness.scans();
    assert_eq!(scans.len(), 1);
    assert_eq!(scans[0].value, "012345678905");
    assert_eq!(scans[0].source, CodeSource::Library);
    assert!(harness
        .controller
        .snapshot()
        .await
        .trace
        .iter()
        .any(|line| line.contains("native") && line.contains("unavailable")));
}

#[tokio::test]
async fn scenario_c_manual_ai_read_waits_for_the_operator() {
    let settings = fast_settings();
    let chain = StrategyChain::standard(None, &settings);
    let vision = ScriptedVision::new("8712345000016", 0.42);
    let harness = Harness::new(settings, vec![blank_frame()], chain, Some(vision.clone()));

    harness.controller.start(None).await.unwrap();
    let outcome = harness.controller.manual_capture().await.unwrap();

    match outcome {
        ManualOutcome::AwaitingConfirmation { candidate } => {
            assert_eq!(candidate.code, "8712345000016");
            assert!((candidate.confidence - 0.42).abs() < f32::EPSILON);
        }
        other => panic!("expected a confirmation prompt, got {other:?}"),
    }
    assert!(harness.scans().is_empty());
    assert_eq!(vision.modes.lock().unwrap().as_slice(), &[AiMode::Manual]);

    assert!(harness.controller.reject_pending());
    assert_eq!(harness.controller.phase(), ScanPhase::Scanning);
    assert!(harness.scans().is_empty());

    harness.controller.manual_capture().await.unwrap();
    match harness.controller.confirm_pending() {
        SubmitOutcome::Accepted(code) => assert_eq!(code.source, CodeSource::AiConfirmed),
        other => panic!("expected acceptance, got {other:?}"),
    }
    assert_eq!(harness.scans().len(), 1);
    harness.controller.stop().await;
}

#[tokio::test]
async fn scenario_d_repeated_assist_read_is_one_suggestion() {
    let settings = ScannerSettings {
        assist_enabled: true,
        ..fast_settings()
    };
    let chain = StrategyChain::new(Vec::new());
    let vision = ScriptedVision::new("4006381333931", 0.81);
    let harness = Harness::new(settings, vec![blank_frame()], chain, Some(vision.clone()));

    harness.controller.start(None).await.unwrap();
    harness
        .wait_until("two assist calls", Duration::from_secs(2), |_| {
            vision.calls.load(Ordering::SeqCst) >= 2
        })
        .await;
    sleep(Duration::from_millis(20)).await;

    let snapshot = harness.controller.snapshot().await;
    assert_eq!(snapshot.suggestions.len(), 1);
    assert_eq!(snapshot.suggestions[0].code, "4006381333931");
    assert_eq!(snapshot.phase, ScanPhase::Scanning);
    assert!(harness.scans().is_empty());

    match harness.controller.accept_suggestion("4006381333931") {
        SubmitOutcome::Accepted(code) => assert_eq!(code.source, CodeSource::AiConfirmed),
        other => panic!("expected acceptance, got {other:?}"),
    }
    assert_eq!(harness.scans().len(), 1);
}

#[tokio::test]
async fn low_confidence_assist_reads_never_surface() {
    let settings = ScannerSettings {
        assist_enabled: true,
        ..fast_settings()
    };
    let vision = ScriptedVision::new("4006381333931", 0.69);
    let harness = Harness::new(
        settings,
        vec![blank_frame()],
        StrategyChain::new(Vec::new()),
        Some(vision.clone()),
    );

    harness.controller.start(None).await.unwrap();
    harness
        .wait_until("assist calls", Duration::from_secs(2), |_| {
            vision.calls.load(Ordering::SeqCst) >= 3
        })
        .await;
    assert!(harness.controller.snapshot().await.suggestions.is_empty());
    harness.controller.stop().await;
}

#[tokio::test]
async fn short_codes_never_resolve() {
    let settings = fast_settings();
    let detector = FixedDetector::new("1234567");
    let chain = StrategyChain::standard(Some(detector.clone()), &settings);
    let harness = Harness::new(settings, vec![blank_frame()], chain, None);

    harness.controller.start(None).await.unwrap();
    harness
        .wait_until("several polls", Duration::from_secs(2), |_| {
            detector.calls.load(Ordering::SeqCst) >= 5
        })
        .await;

    assert!(harness.scans().is_empty());
    assert_eq!(harness.controller.phase(), ScanPhase::Scanning);
    harness.controller.stop().await;
}

#[tokio::test]
async fn stop_discards_results_still_in_flight() {
    let settings = ScannerSettings {
        assist_enabled: true,
        ..fast_settings()
    };
    let strategy: Arc<dyn DecoderStrategy> = Arc::new(SlowStrategy {
        value: "5901234123457".into(),
        delay: Duration::from_millis(120),
    });
    let vision = ScriptedVision::slow("4006381333931", 0.95, Duration::from_millis(120));
    let harness = Harness::new(
        settings,
        vec![blank_frame()],
        StrategyChain::new(vec![strategy]),
        Some(vision.clone()),
    );

    harness.controller.start(None).await.unwrap();
    harness
        .wait_until("assist request", Duration::from_secs(1), |_| {
            vision.calls.load(Ordering::SeqCst) >= 1
        })
        .await;
    harness.controller.stop().await;
    sleep(Duration::from_millis(300)).await;

    let snapshot = harness.controller.snapshot().await;
    assert!(harness.scans().is_empty());
    assert_eq!(snapshot.phase, ScanPhase::Idle);
    assert!(snapshot.suggestions.is_empty());
    assert!(snapshot.session.is_none());
}

#[tokio::test]
async fn restart_after_resolution_is_a_fresh_activation() {
    let settings = ScannerSettings {
        rescan_cooldown_ms: 0,
        ..fast_settings()
    };
    let detector = FixedDetector::new("5901234123457");
    let chain = StrategyChain::standard(Some(detector), &settings);
    let harness = Harness::new(settings, vec![blank_frame()], chain, None);

    let first = harness.controller.start(None).await.unwrap();
    harness
        .wait_until("first scan", Duration::from_secs(1), |h| {
            h.controller.phase() == ScanPhase::Idle && h.scans().len() == 1
        })
        .await;

    let second = harness.controller.start(None).await.unwrap();
    assert_ne!(first.session_id, second.session_id);
    harness
        .wait_until("second scan", Duration::from_secs(1), |h| h.scans().len() == 2)
        .await;
    let scans = harness.scans();
    assert_ne!(scans[0].session_id, scans[1].session_id);
}

#[tokio::test]
async fn restart_inside_cooldown_scans_once_the_cooldown_ends() {
    let settings = ScannerSettings {
        rescan_cooldown_ms: 300,
        ..fast_settings()
    };
    let detector = FixedDetector::new("5901234123457");
    let chain = StrategyChain::standard(Some(detector), &settings);
    let harness = Harness::new(settings, vec![blank_frame()], chain, None);

    harness.controller.start(None).await.unwrap();
    harness
        .wait_until("first scan", Duration::from_secs(1), |h| {
            h.controller.phase() == ScanPhase::Idle && h.scans().len() == 1
        })
        .await;

    // Same code still in view: held back by the cooldown, then accepted.
    let restarted = Instant::now();
    harness.controller.start(None).await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.scans().len(), 1);
    assert_eq!(harness.controller.phase(), ScanPhase::Scanning);

    harness
        .wait_until("scan after cooldown", Duration::from_secs(2), |h| h.scans().len() == 2)
        .await;
    assert!(restarted.elapsed() >= Duration::from_millis(150));
    assert_eq!(harness.scans()[1].value, "5901234123457");
}

#[tokio::test]
async fn restart_with_default_cooldown_does_not_stall() {
    let settings = ScannerSettings {
        native_interval_ms: 20,
        ..ScannerSettings::default()
    };
    let detector = FixedDetector::new("5901234123457");
    let chain = StrategyChain::standard(Some(detector), &settings);
    let cooldown = settings.rescan_cooldown();
    let harness = Harness::new(settings, vec![blank_frame()], chain, None);

    harness.controller.start(None).await.unwrap();
    harness
        .wait_until("first scan", Duration::from_secs(1), |h| {
            h.controller.phase() == ScanPhase::Idle && h.scans().len() == 1
        })
        .await;

    harness.controller.start(None).await.unwrap();
    harness
        .wait_until("second scan", cooldown + Duration::from_secs(2), |h| h.scans().len() == 2)
        .await;
    harness
        .wait_until("idle", Duration::from_millis(500), |h| h.controller.phase() == ScanPhase::Idle)
        .await;
}

#[test]
fn late_submission_after_stop_is_stale() {
    let arbiter = ScanArbiter::new(
        &ScannerSettings::default(),
        Arc::new(SilentTone),
        Arc::new(|_: AcceptedCode| panic!("callback must not fire")),
    );
    let ticket = arbiter.begin("bench");
    arbiter.halt("operator left");
    assert_eq!(
        arbiter.submit(&ticket, "5901234123457", CodeSource::Library),
        SubmitOutcome::Stale
    );
}
