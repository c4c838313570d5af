// src/session.rs
//
// The per-frame loop and the state it owns.
//
//   FrameSource ──► Detector ──► ViolationState.check ──► EvidenceStore
//                                      │                        │
//                                      ▼                        ▼
//                               FrameAnnotator           ViolationLedger
//
// The loop runs on a blocking thread. Operator input (stop, reset, live
// confidence and minimum box height) arrives through `SessionControls`,
// which is polled once per frame.

use crate::detection::{DetectionOutcome, Detector, FrameDetections};
use crate::evidence::EvidenceStore;
use crate::pipeline::event_bus::log_events;
use crate::pipeline::{EventBus, FrameContext, PipelineEvent, SessionMetrics, VehicleView};
use crate::types::{Frame, ViolationConfig};
use crate::violation::{CheckParams, VehicleStatus, ViolationLedger, ViolationState};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const MAX_PENDING_EVENTS: usize = 256;
const PROGRESS_LOG_INTERVAL: u64 = 100;

/// Shared handle for operator input. Cheap to clone; every clone sees the
/// same flags.
#[derive(Debug, Clone)]
pub struct SessionControls {
    stop: Arc<AtomicBool>,
    reset: Arc<AtomicBool>,
    confidence_bits: Arc<AtomicU32>,
    min_height_bits: Arc<AtomicU32>,
}

impl SessionControls {
    pub fn new(confidence: f32, min_box_height: f32) -> Self {
        let controls = Self {
            stop: Arc::new(AtomicBool::new(false)),
            reset: Arc::new(AtomicBool::new(false)),
            confidence_bits: Arc::new(AtomicU32::new(0)),
            min_height_bits: Arc::new(AtomicU32::new(0)),
        };
        controls.set_confidence(confidence);
        controls.set_min_box_height(min_box_height);
        controls
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn request_reset(&self) {
        self.reset.store(true, Ordering::SeqCst);
    }

    /// True once per reset request.
    pub fn take_reset(&self) -> bool {
        self.reset.swap(false, Ordering::SeqCst)
    }

    pub fn set_confidence(&self, confidence: f32) {
        let c = confidence.clamp(0.0, 1.0);
        self.confidence_bits.store(c.to_bits(), Ordering::Relaxed);
    }

    pub fn confidence(&self) -> f32 {
        f32::from_bits(self.confidence_bits.load(Ordering::Relaxed))
    }

    pub fn set_min_box_height(&self, height: f32) {
        let h = height.max(0.0);
        self.min_height_bits.store(h.to_bits(), Ordering::Relaxed);
    }

    pub fn min_box_height(&self) -> f32 {
        f32::from_bits(self.min_height_bits.load(Ordering::Relaxed))
    }
}

/// Session-lived violation state. Cleared only by `reset`.
#[derive(Debug, Default)]
pub struct SessionContext {
    pub state: ViolationState,
    pub ledger: ViolationLedger,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears counters, penalized set and log. Returns how many records went.
    pub fn reset(&mut self) -> usize {
        let cleared = self.ledger.records().len();
        self.state.clear();
        self.ledger.clear();
        cleared
    }
}

pub trait FrameSource {
    /// `Ok(None)` at end of stream. An error means the stream is unreadable.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Percent of the stream consumed, when known.
    fn progress(&self) -> Option<f32> {
        None
    }
}

pub trait FrameAnnotator {
    fn annotate(&mut self, ctx: &FrameContext) -> Result<()>;

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    EndOfStream,
    Stopped,
    ReadError,
}

pub struct Session<D> {
    detector: D,
    evidence: EvidenceStore,
    controls: SessionControls,
    metrics: SessionMetrics,
    events: EventBus,
    frame_threshold: u32,
    road_tolerance: f32,
    annotator: Option<Box<dyn FrameAnnotator + Send>>,
}

impl<D: Detector> Session<D> {
    pub fn new(
        detector: D,
        evidence: EvidenceStore,
        controls: SessionControls,
        metrics: SessionMetrics,
        violation: &ViolationConfig,
    ) -> Self {
        Self {
            detector,
            evidence,
            controls,
            metrics,
            events: EventBus::new(MAX_PENDING_EVENTS),
            frame_threshold: violation.frame_threshold,
            road_tolerance: violation.road_tolerance,
            annotator: None,
        }
    }

    pub fn with_annotator(mut self, annotator: Box<dyn FrameAnnotator + Send>) -> Self {
        self.annotator = Some(annotator);
        self
    }

    pub fn run(&mut self, source: &mut dyn FrameSource, ctx: &mut SessionContext) -> SessionEnd {
        info!(
            "🚀 Session started (confidence {:.2}, min height {:.0}px, threshold {} frames)",
            self.controls.confidence(),
            self.controls.min_box_height(),
            self.frame_threshold
        );

        let mut frame_index: u64 = 0;
        let end = loop {
            if self.controls.is_stopped() {
                info!("Stop requested at frame {}", frame_index);
                break SessionEnd::Stopped;
            }

            if self.controls.take_reset() {
                let cleared_records = ctx.reset();
                self.metrics.inc(&self.metrics.resets);
                self.events
                    .publish(PipelineEvent::SessionReset { cleared_records });
            }

            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    info!("End of video after {} frames", frame_index);
                    break SessionEnd::EndOfStream;
                }
                Err(e) => {
                    warn!("Unreadable frame after {}: {:#}", frame_index, e);
                    self.metrics.inc(&self.metrics.unreadable_frames);
                    break SessionEnd::ReadError;
                }
            };
            frame_index += 1;
            self.metrics.inc(&self.metrics.frames_read);

            if let Some(frame_ctx) = self.process_frame(frame_index, frame, ctx) {
                self.annotate(&frame_ctx);
            }

            log_events(&self.events.drain());

            if frame_index % PROGRESS_LOG_INTERVAL == 0 {
                match source.progress() {
                    Some(p) => info!(
                        "Frame {} ({:.1}%), {} tracked, {} violations, {:.1} FPS",
                        frame_index,
                        p,
                        ctx.state.tracked_count(),
                        ctx.ledger.records().len(),
                        self.metrics.fps()
                    ),
                    None => info!(
                        "Frame {}, {} tracked, {} violations, {:.1} FPS",
                        frame_index,
                        ctx.state.tracked_count(),
                        ctx.ledger.records().len(),
                        self.metrics.fps()
                    ),
                }
            }
        };

        // Events published by a reset on the last iteration
        if self.events.pending_count() > 0 {
            log_events(&self.events.drain());
        }

        if let Some(annotator) = self.annotator.as_mut() {
            if let Err(e) = annotator.finish() {
                warn!("Annotated video not finalized: {:#}", e);
            }
        }

        end
    }

    /// Detect, track and check every vehicle on one frame. `None` when the
    /// detector failed and the frame was skipped without touching state.
    pub fn process_frame(
        &mut self,
        frame_index: u64,
        frame: Frame,
        ctx: &mut SessionContext,
    ) -> Option<FrameContext> {
        let started = Instant::now();
        let outcome = self
            .detector
            .detect_and_track(&frame, self.controls.confidence());
        self.metrics.set_timing(
            &self.metrics.detect_time_us,
            started.elapsed().as_micros() as u64,
        );

        let detections = match outcome {
            DetectionOutcome::Detected(d) => d,
            DetectionOutcome::Empty => FrameDetections::default(),
            DetectionOutcome::Failed(e) => {
                self.metrics.inc(&self.metrics.frames_skipped);
                self.events.publish(PipelineEvent::FrameSkipped {
                    frame_index,
                    reason: format!("{:#}", e),
                });
                return None;
            }
        };
        self.metrics.inc(&self.metrics.frames_processed);

        let params = CheckParams {
            min_box_height: self.controls.min_box_height(),
            frame_threshold: self.frame_threshold,
            road_tolerance: self.road_tolerance,
        };

        let FrameDetections {
            vehicles,
            road_polygons,
        } = detections;

        let mut views = Vec::with_capacity(vehicles.len());
        for detection in vehicles {
            let status = match detection.track_id {
                Some(track_id) => {
                    self.metrics.inc(&self.metrics.vehicles_checked);
                    let status = ctx.state.check(
                        track_id,
                        &detection.bbox,
                        &road_polygons,
                        &ctx.ledger,
                        &params,
                    );
                    if status == VehicleStatus::Violation {
                        self.capture_violation(
                            &frame,
                            frame_index,
                            track_id,
                            &detection.bbox,
                            &detection.class_name,
                            ctx,
                        );
                    }
                    status
                }
                None => VehicleStatus::Skipped,
            };
            views.push(VehicleView { detection, status });
        }

        debug!(
            "Frame {}: {} roads, {} vehicles",
            frame_index,
            road_polygons.len(),
            views.len()
        );

        let mut frame_ctx = FrameContext::new(frame_index, frame);
        frame_ctx.road_polygons = road_polygons;
        frame_ctx.vehicles = views;
        Some(frame_ctx)
    }

    fn capture_violation(
        &mut self,
        frame: &Frame,
        frame_index: u64,
        track_id: u32,
        bbox: &[f32; 4],
        vehicle_type: &str,
        ctx: &mut SessionContext,
    ) {
        let record = self
            .evidence
            .capture(frame, bbox, track_id, vehicle_type, frame_index);
        let evidence = record.evidence.clone();

        if ctx.ledger.record(record) {
            self.metrics.inc(&self.metrics.violations);
            warn!("🚨 {} {} reported!", vehicle_type, track_id);
            self.events.publish(PipelineEvent::ViolationCaptured {
                track_id,
                vehicle_type: vehicle_type.to_string(),
                evidence,
                frame_index,
            });
        }
    }

    fn annotate(&mut self, frame_ctx: &FrameContext) {
        let Some(annotator) = self.annotator.as_mut() else {
            return;
        };
        if let Err(e) = annotator.annotate(frame_ctx) {
            warn!("Annotation failed, disabling annotated output: {:#}", e);
            self.annotator = None;
        }
    }
}
