// src/main.rs

mod config;
mod detection;
mod evidence;
mod geometry;
mod overlay;
mod pipeline;
mod preprocessing;
mod report;
mod session;
mod types;
mod video_processor;
mod violation;

use anyhow::{Context, Result};
use clap::Parser;
use detection::{ClassTable, TrackingDetector, YoloSegModel};
use evidence::EvidenceStore;
use overlay::AnnotatedVideoWriter;
use pipeline::SessionMetrics;
use report::{ReportGenerator, ReportOutcome};
use session::{Session, SessionContext, SessionControls, SessionEnd};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use types::Config;
use video_processor::{StagedInput, VideoProcessor};

/// Detect vehicles parked off the road in a video and report them.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Video file (mp4, avi, mov, mkv) or `-` to read from stdin
    input: String,

    /// YAML configuration file; defaults are used when it does not exist
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Segmentation model (ONNX)
    #[arg(long)]
    model: Option<String>,

    /// Detection confidence in [0, 1]
    #[arg(long)]
    confidence: Option<f32>,

    /// Minimum vehicle box height in pixels
    #[arg(long)]
    min_height: Option<f32>,

    /// Consecutive off-road frames before a vehicle is flagged
    #[arg(long)]
    threshold: Option<u32>,

    /// Pixels a contact point must lie inside a road polygon to count as on-road
    #[arg(long)]
    tolerance: Option<f32>,

    #[arg(long)]
    evidence_dir: Option<String>,

    /// Report file (.xlsx)
    #[arg(long)]
    report: Option<String>,

    /// Also write an annotated video to this path
    #[arg(long)]
    annotated: Option<String>,

    /// Skip the JSON export of the violation log
    #[arg(long)]
    no_json: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(model) = &self.model {
            config.model.path = model.clone();
        }
        if let Some(c) = self.confidence {
            config.detection.confidence_threshold = c;
        }
        if let Some(h) = self.min_height {
            config.detection.min_box_height = h;
        }
        if let Some(t) = self.threshold {
            config.violation.frame_threshold = t;
        }
        if let Some(t) = self.tolerance {
            config.violation.road_tolerance = t;
        }
        if let Some(dir) = &self.evidence_dir {
            config.output.evidence_dir = dir.clone();
        }
        if let Some(report) = &self.report {
            config.output.report_path = report.clone();
        }
        if let Some(path) = &self.annotated {
            config.video.save_annotated = true;
            config.video.annotated_path = path.clone();
        }
        if self.no_json {
            config.output.export_json = false;
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("parking_violation={},ort=warn", level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load_or_default(&args.config)?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    init_tracing(&config.logging.level);
    info!("🚗 Parking Violation Detection Starting");
    info!(
        "Thresholds: confidence={:.2}, min_height={:.0}px, frames={}, tolerance={:.1}px",
        config.detection.confidence_threshold,
        config.detection.min_box_height,
        config.violation.frame_threshold,
        config.violation.road_tolerance
    );

    let detector = build_detector(&config)?;
    let evidence = EvidenceStore::new(&config.output.evidence_dir)?;
    let input = StagedInput::from_arg(&args.input)?;

    let controls = SessionControls::new(
        config.detection.confidence_threshold,
        config.detection.min_box_height,
    );
    let metrics = SessionMetrics::new();
    spawn_signal_handlers(controls.clone());

    let video_path = input.path().to_path_buf();
    let session_config = config.clone();
    let session_controls = controls.clone();
    let session_metrics = metrics.clone();

    let joined = tokio::task::spawn_blocking(move || {
        run_session(
            &session_config,
            &video_path,
            detector,
            evidence,
            session_controls,
            session_metrics,
        )
    })
    .await
    .context("Session thread panicked")?;

    input.release();

    let (ctx, end) = joined?;
    info!("Session ended: {:?}", end);

    finish(&config, &ctx, &metrics);
    Ok(())
}

fn build_detector(config: &Config) -> Result<TrackingDetector<YoloSegModel>> {
    let mut model = YoloSegModel::load(&config.model)?;
    let names = model.class_names(&config.model.class_names);
    let classes = ClassTable::resolve(&names, &config.detection.class_roles);
    model.set_mask_classes(classes.road_ids());

    Ok(TrackingDetector::new(
        model,
        classes,
        config.detection.tracker.clone(),
    ))
}

fn run_session(
    config: &Config,
    video_path: &Path,
    detector: TrackingDetector<YoloSegModel>,
    evidence: EvidenceStore,
    controls: SessionControls,
    metrics: SessionMetrics,
) -> Result<(SessionContext, SessionEnd)> {
    let processor = VideoProcessor::new(config.video.clone());
    let mut reader = processor.open_video(video_path)?;

    let mut session = Session::new(detector, evidence, controls, metrics, &config.violation);
    match processor.create_writer(reader.fps) {
        Ok(Some(writer)) => {
            session = session.with_annotator(Box::new(AnnotatedVideoWriter::new(writer)));
        }
        Ok(None) => {}
        Err(e) => warn!("Annotated output disabled: {:#}", e),
    }

    let mut ctx = SessionContext::new();
    let end = session.run(&mut reader, &mut ctx);
    Ok((ctx, end))
}

/// Ctrl-C stops the session; SIGHUP resets it (unix only).
fn spawn_signal_handlers(controls: SessionControls) {
    let stop = controls.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("🛑 Stop requested, finishing current frame");
            stop.request_stop();
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                warn!("Reset signal unavailable: {}", e);
                return;
            }
        };
        while hangup.recv().await.is_some() {
            info!("🔄 Reset requested");
            controls.request_reset();
        }
    });
}

fn finish(config: &Config, ctx: &SessionContext, metrics: &SessionMetrics) {
    let records = ctx.ledger.records();

    let generator = ReportGenerator::new(&config.output.evidence_dir, &config.output.report_path);
    match generator.generate(records) {
        Ok(ReportOutcome::Written { path, .. }) => info!("📄 Report: {}", path.display()),
        Ok(ReportOutcome::Empty) => {}
        Err(e) => error!("Report generation failed: {:#}", e),
    }
    for record in records {
        info!("  {}", report::record_summary(record));
    }

    if config.output.export_json && !records.is_empty() {
        let json_path = json_path_for(&config.output.report_path);
        if let Err(e) = report::export_json(records, &json_path) {
            error!("JSON export failed: {:#}", e);
        }
    }

    let stats = metrics.summary();
    info!("\n✓ Session complete");
    info!("  Frames read: {}", stats.frames_read);
    info!("  Frames processed: {}", stats.frames_processed);
    info!("  Frames skipped: {}", stats.frames_skipped);
    info!("  Vehicles checked: {}", stats.vehicles_checked);
    info!("  Violations: {} (in log: {})", stats.violations, records.len());
    info!("  Penalized tracks: {}", ctx.ledger.penalized_count());
    info!("  Resets: {}", stats.resets);
    info!("  Average speed: {:.1} FPS", stats.fps);
}

/// `violations.json` next to the report.
fn json_path_for(report_path: &str) -> PathBuf {
    Path::new(report_path)
        .parent()
        .map(|p| p.join("violations.json"))
        .unwrap_or_else(|| PathBuf::from("violations.json"))
}
