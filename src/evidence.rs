// src/evidence.rs
//
// Evidence capture at the moment a track crosses the violation threshold:
// crop the vehicle out of the frame, write it as a JPEG named after the
// vehicle type and track id, and build the log record.
//
// An empty crop or a failed write still yields a record (with no evidence
// reference), so the record/penalized pairing never breaks.

use crate::types::Frame;
use crate::violation::{ViolationRecord, STATUS_ILLEGAL_PARKING};
use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::{info, warn};

const JPEG_QUALITY: u8 = 90;

pub struct EvidenceStore {
    dir: PathBuf,
}

/// RGB crop of a frame region.
#[derive(Debug, Clone)]
pub struct Crop {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

impl Crop {
    pub fn encode_jpeg(&self, out: &mut impl Write, quality: u8) -> Result<()> {
        let img = RgbImage::from_raw(self.width as u32, self.height as u32, self.data.clone())
            .with_context(|| format!("Crop buffer does not hold {}x{} RGB", self.width, self.height))?;
        JpegEncoder::new_with_quality(out, quality)
            .encode_image(&img)
            .context("JPEG encoding failed")
    }
}

impl EvidenceStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create evidence dir {}", dir.display()))?;
        info!("Evidence directory: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn capture(
        &self,
        frame: &Frame,
        bbox: &[f32; 4],
        track_id: u32,
        vehicle_type: &str,
        frame_index: u64,
    ) -> ViolationRecord {
        let evidence = match crop_frame(frame, bbox) {
            Some(crop) => {
                let file_name = evidence_file_name(vehicle_type, track_id);
                match self.write_jpeg(&crop, &file_name) {
                    Ok(()) => Some(file_name),
                    Err(e) => {
                        warn!("Evidence for track {} not saved: {:#}", track_id, e);
                        None
                    }
                }
            }
            None => {
                warn!("Track {} has an empty crop, no evidence image", track_id);
                None
            }
        };

        ViolationRecord {
            track_id,
            vehicle_type: vehicle_type.to_string(),
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            status: STATUS_ILLEGAL_PARKING.to_string(),
            evidence,
            frame_index,
            video_timestamp_ms: frame.timestamp_ms,
        }
    }

    fn write_jpeg(&self, crop: &Crop, file_name: &str) -> Result<()> {
        let path = self.dir.join(file_name);
        let file = fs::File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let mut out = BufWriter::new(file);
        crop.encode_jpeg(&mut out, JPEG_QUALITY)?;
        out.flush()
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

/// `<type>_<id>.jpg`, with anything outside [A-Za-z0-9_-] in the type replaced.
pub fn evidence_file_name(vehicle_type: &str, track_id: u32) -> String {
    let safe: String = vehicle_type
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}_{}.jpg", safe, track_id)
}

/// Crop to the box clamped to frame bounds; `None` when nothing is left.
pub fn crop_frame(frame: &Frame, bbox: &[f32; 4]) -> Option<Crop> {
    let x1 = (bbox[0].max(0.0) as usize).min(frame.width);
    let y1 = (bbox[1].max(0.0) as usize).min(frame.height);
    let x2 = (bbox[2].max(0.0) as usize).min(frame.width);
    let y2 = (bbox[3].max(0.0) as usize).min(frame.height);

    if x2 <= x1 || y2 <= y1 || frame.data.len() < frame.width * frame.height * 3 {
        return None;
    }

    let width = x2 - x1;
    let height = y2 - y1;
    let mut data = Vec::with_capacity(width * height * 3);
    for y in y1..y2 {
        let start = (y * frame.width + x1) * 3;
        data.extend_from_slice(&frame.data[start..start + width * 3]);
    }

    Some(Crop {
        data,
        width,
        height,
    })
}
