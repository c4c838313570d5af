// src/video_processor.rs

use crate::session::FrameSource;
use crate::types::{Frame, VideoConfig};
use anyhow::{Context, Result};
use opencv::{
    core::{self, Mat},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTraitConst, VideoWriter},
};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "avi", "mov", "mkv"];

pub fn is_supported_video(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| VIDEO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// The video the session reads from: either the user's file, or stdin
/// staged into a temp file that is removed on `release`.
pub enum StagedInput {
    File(PathBuf),
    Temp(tempfile::TempPath),
}

impl StagedInput {
    /// `-` stages stdin; anything else must be an existing supported video.
    pub fn from_arg(arg: &str) -> Result<Self> {
        if arg == "-" {
            return Self::from_reader(io::stdin().lock(), "mp4");
        }

        let path = PathBuf::from(arg);
        if !path.exists() {
            anyhow::bail!("Video not found: {}", path.display());
        }
        if !is_supported_video(&path) {
            anyhow::bail!(
                "Unsupported video type {} (expected one of {:?})",
                path.display(),
                VIDEO_EXTENSIONS
            );
        }
        Ok(Self::File(path))
    }

    pub fn from_reader(mut reader: impl Read, extension: &str) -> Result<Self> {
        let mut tmp = tempfile::Builder::new()
            .prefix("parking-input-")
            .suffix(&format!(".{}", extension))
            .tempfile()
            .context("Failed to create temp file for stdin video")?;
        let bytes = io::copy(&mut reader, &mut tmp).context("Failed to stage video")?;
        info!("Staged {} bytes of video into {}", bytes, tmp.path().display());
        Ok(Self::Temp(tmp.into_temp_path()))
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::File(p) => p.as_path(),
            Self::Temp(p) => &**p,
        }
    }

    /// Best-effort cleanup; failures are only logged.
    pub fn release(self) {
        if let Self::Temp(path) = self {
            let display = path.display().to_string();
            if let Err(e) = path.close() {
                debug!("Could not remove staged video {}: {}", display, e);
            }
        }
    }
}

pub struct VideoProcessor {
    config: VideoConfig,
}

impl VideoProcessor {
    pub fn new(config: VideoConfig) -> Self {
        Self { config }
    }

    pub fn open_video(&self, path: &Path) -> Result<VideoReader> {
        info!("Opening video: {}", path.display());

        let path_str = path
            .to_str()
            .with_context(|| format!("Non UTF-8 video path {}", path.display()))?;
        let cap = VideoCapture::from_file(path_str, videoio::CAP_ANY)?;

        if !cap.is_opened()? {
            anyhow::bail!("Failed to open video file {}", path.display());
        }

        let fps = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FPS)?;
        let total_frames = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_COUNT)? as i32;
        let width = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_WIDTH)? as i32;
        let height = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_HEIGHT)? as i32;

        info!(
            "Video properties: {}x{} @ {:.1} FPS, {} frames (working size {}x{})",
            width,
            height,
            fps,
            total_frames,
            self.config.frame_width,
            self.config.frame_height
        );

        let fps = if fps > 0.0 {
            fps
        } else {
            warn!("Video reports no FPS, assuming 30");
            30.0
        };

        Ok(VideoReader {
            cap,
            fps,
            total_frames,
            current_frame: 0,
            width: self.config.frame_width as i32,
            height: self.config.frame_height as i32,
        })
    }

    pub fn create_writer(&self, fps: f64) -> Result<Option<VideoWriter>> {
        if !self.config.save_annotated {
            return Ok(None);
        }

        let output_path = PathBuf::from(&self.config.annotated_path);
        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        info!("Output video: {}", output_path.display());

        let path_str = output_path
            .to_str()
            .with_context(|| format!("Non UTF-8 output path {}", output_path.display()))?;
        let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
        let writer = VideoWriter::new(
            path_str,
            fourcc,
            fps,
            core::Size::new(
                self.config.frame_width as i32,
                self.config.frame_height as i32,
            ),
            true,
        )?;

        if !writer.is_opened()? {
            anyhow::bail!("Failed to open video writer {}", output_path.display());
        }

        Ok(Some(writer))
    }
}

/// Decodes frames, resizes them to the working size and converts to RGB.
pub struct VideoReader {
    pub cap: VideoCapture,
    pub fps: f64,
    pub total_frames: i32,
    pub current_frame: i32,
    pub width: i32,
    pub height: i32,
}

impl VideoReader {
    pub fn read_frame(&mut self) -> Result<Option<Frame>> {
        use opencv::videoio::VideoCaptureTrait;

        let mut mat = Mat::default();

        if !VideoCaptureTrait::read(&mut self.cap, &mut mat)? || mat.empty() {
            return Ok(None);
        }

        self.current_frame += 1;
        let timestamp_ms = (self.current_frame as f64 / self.fps) * 1000.0;

        let mut resized = Mat::default();
        imgproc::resize(
            &mat,
            &mut resized,
            core::Size::new(self.width, self.height),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;

        let mut rgb_mat = Mat::default();
        imgproc::cvt_color(&resized, &mut rgb_mat, imgproc::COLOR_BGR2RGB, 0)?;

        let data = rgb_mat.data_bytes()?.to_vec();

        Ok(Some(Frame {
            data,
            width: self.width as usize,
            height: self.height as usize,
            timestamp_ms,
        }))
    }

    pub fn progress(&self) -> f32 {
        if self.total_frames <= 0 {
            return 0.0;
        }
        (self.current_frame as f32 / self.total_frames as f32) * 100.0
    }
}

impl FrameSource for VideoReader {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.read_frame()
    }

    fn progress(&self) -> Option<f32> {
        (self.total_frames > 0).then(|| VideoReader::progress(self))
    }
}
