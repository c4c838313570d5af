// src/overlay.rs
//
// Annotated frame rendering.
//
//   ┌───────────────────────────────────────────┐
//   │ Frame 120 | 3 vehicles | 1 violation      │
//   │      ╱‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾╲               │
//   │     ╱   road (magenta tint)  ╲  ┌──────┐  │
//   │    ╱  ┌────┐                  ╲ │ red  │  │
//   │   ╱   │green│                  ╲└──────┘  │
//   │  ╱    └────┘                    ╲ parked  │
//   └───────────────────────────────────────────┘
//
// Road polygons get a 20% filled tint plus a magenta outline; each tracked
// vehicle gets a box and a `<type> <id>: <STATUS>` label coloured by state.

use crate::geometry::RoadPolygon;
use crate::pipeline::FrameContext;
use crate::session::FrameAnnotator;
use crate::violation::VehicleStatus;
use anyhow::Result;
use opencv::{
    core::{self, Mat, Vector},
    imgproc,
    prelude::*,
    videoio::VideoWriter,
};

/// BGR colors for OpenCV.
pub mod colors {
    use opencv::core::Scalar;

    pub const ROAD_MAGENTA: Scalar = Scalar::new(255.0, 0.0, 255.0, 0.0);
    pub const CLEAN_GREEN: Scalar = Scalar::new(0.0, 255.0, 0.0, 0.0);
    pub const ANALYZING_YELLOW: Scalar = Scalar::new(0.0, 255.0, 255.0, 0.0);
    pub const VIOLATION_RED: Scalar = Scalar::new(0.0, 0.0, 255.0, 0.0);
    pub const HUD_BG: Scalar = Scalar::new(40.0, 40.0, 40.0, 0.0);
    pub const TEXT: Scalar = Scalar::new(230.0, 230.0, 230.0, 0.0);
}

const ROAD_FILL_ALPHA: f64 = 0.2;
const ROAD_OUTLINE_THICKNESS: i32 = 2;
const BOX_THICKNESS: i32 = 2;

pub fn status_color(status: &VehicleStatus) -> core::Scalar {
    match status {
        VehicleStatus::Clean | VehicleStatus::Skipped => colors::CLEAN_GREEN,
        VehicleStatus::Analyzing { .. } => colors::ANALYZING_YELLOW,
        VehicleStatus::Violation | VehicleStatus::Penalized => colors::VIOLATION_RED,
    }
}

pub fn vehicle_label(vehicle_type: &str, track_id: u32, status: &VehicleStatus) -> String {
    format!("{} {}: {}", vehicle_type, track_id, status.label())
}

/// RGB frame from the context, converted to BGR with everything drawn on.
pub fn render_frame(ctx: &FrameContext) -> Result<Mat> {
    let frame = &ctx.frame;
    let mat = Mat::from_slice(frame.data.as_slice())?;
    let mat = mat.reshape(3, frame.height as i32)?;

    let mut output = Mat::default();
    imgproc::cvt_color(&mat, &mut output, imgproc::COLOR_RGB2BGR, 0)?;

    render_road_polygons(&mut output, &ctx.road_polygons)?;

    let mut flagged = 0;
    let mut shown = 0;
    for view in ctx.visible_vehicles() {
        let Some(track_id) = view.detection.track_id else {
            continue;
        };
        shown += 1;
        if matches!(
            view.status,
            VehicleStatus::Violation | VehicleStatus::Penalized
        ) {
            flagged += 1;
        }
        let label = vehicle_label(&view.detection.class_name, track_id, &view.status);
        draw_vehicle(&mut output, &view.detection.bbox, &label, status_color(&view.status))?;
    }

    draw_hud(
        &mut output,
        &format!(
            "Frame {} | {} vehicles | {} flagged",
            ctx.frame_index, shown, flagged
        ),
    )?;

    Ok(output)
}

fn polygon_points(polygons: &[RoadPolygon]) -> Vector<Vector<core::Point>> {
    polygons
        .iter()
        .filter(|p| !p.is_degenerate())
        .map(|p| {
            p.points
                .iter()
                .map(|pt| core::Point::new(pt.x.round() as i32, pt.y.round() as i32))
                .collect::<Vector<core::Point>>()
        })
        .collect()
}

pub fn render_road_polygons(output: &mut Mat, polygons: &[RoadPolygon]) -> Result<()> {
    let pts = polygon_points(polygons);
    if pts.is_empty() {
        return Ok(());
    }

    let mut overlay = output.try_clone()?;
    imgproc::fill_poly(
        &mut overlay,
        &pts,
        colors::ROAD_MAGENTA,
        imgproc::LINE_8,
        0,
        core::Point::default(),
    )?;

    let mut blended = Mat::default();
    core::add_weighted(
        &overlay,
        ROAD_FILL_ALPHA,
        &*output,
        1.0 - ROAD_FILL_ALPHA,
        0.0,
        &mut blended,
        -1,
    )?;
    blended.copy_to(output)?;

    imgproc::polylines(
        output,
        &pts,
        true,
        colors::ROAD_MAGENTA,
        ROAD_OUTLINE_THICKNESS,
        imgproc::LINE_AA,
        0,
    )?;

    Ok(())
}

fn draw_vehicle(img: &mut Mat, bbox: &[f32; 4], label: &str, color: core::Scalar) -> Result<()> {
    let x1 = bbox[0] as i32;
    let y1 = bbox[1] as i32;
    let w = (bbox[2] - bbox[0]).max(1.0) as i32;
    let h = (bbox[3] - bbox[1]).max(1.0) as i32;

    imgproc::rectangle(
        img,
        core::Rect::new(x1, y1, w, h),
        color,
        BOX_THICKNESS,
        imgproc::LINE_8,
        0,
    )?;

    imgproc::put_text(
        img,
        label,
        core::Point::new(x1, (y1 - 8).max(12)),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.5,
        color,
        2,
        imgproc::LINE_AA,
        false,
    )?;

    Ok(())
}

fn draw_hud(img: &mut Mat, text: &str) -> Result<()> {
    let mut baseline = 0;
    let text_size =
        imgproc::get_text_size(text, imgproc::FONT_HERSHEY_SIMPLEX, 0.6, 1, &mut baseline)?;

    imgproc::rectangle(
        img,
        core::Rect::new(5, 5, text_size.width + 20, text_size.height + baseline + 16),
        colors::HUD_BG,
        -1,
        imgproc::LINE_8,
        0,
    )?;

    imgproc::put_text(
        img,
        text,
        core::Point::new(15, 13 + text_size.height),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.6,
        colors::TEXT,
        1,
        imgproc::LINE_AA,
        false,
    )?;

    Ok(())
}

/// Writes every rendered frame to the annotated output video.
pub struct AnnotatedVideoWriter {
    writer: VideoWriter,
    frames_written: u64,
}

impl AnnotatedVideoWriter {
    pub fn new(writer: VideoWriter) -> Self {
        Self {
            writer,
            frames_written: 0,
        }
    }
}

impl FrameAnnotator for AnnotatedVideoWriter {
    fn annotate(&mut self, ctx: &FrameContext) -> Result<()> {
        let output = render_frame(ctx)?;
        self.writer.write(&output)?;
        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.release()?;
        tracing::info!("Annotated video closed ({} frames)", self.frames_written);
        Ok(())
    }
}
