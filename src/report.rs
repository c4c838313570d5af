// src/report.rs
//
// Spreadsheet report of the session's violation log, one row per record with
// the evidence image embedded next to it. The workbook is assembled in
// memory and only then written, through a temp file + rename, so a failed
// run never leaves a partial report behind.

use crate::violation::ViolationRecord;
use anyhow::{Context, Result};
use rust_xlsxwriter::{Format, Image, ObjectMovement, Workbook};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const SHEET_NAME: &str = "Violations";
pub const HEADERS: [&str; 5] = [
    "Vehicle ID",
    "Vehicle Type",
    "Timestamp",
    "Status",
    "Evidence",
];

const EVIDENCE_COL: u16 = 4;
const IMAGE_ROW_HEIGHT: f64 = 100.0;
const IMAGE_SCALE: f64 = 1.5;
/// Smaller files cannot hold a decodable image header.
const MIN_IMAGE_BYTES: u64 = 16;

#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    /// Nothing was logged; no file written
    Empty,
    Written {
        path: PathBuf,
        rows: usize,
        images_embedded: usize,
    },
}

pub struct ReportGenerator {
    evidence_dir: PathBuf,
    output_path: PathBuf,
}

impl ReportGenerator {
    pub fn new(evidence_dir: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            evidence_dir: evidence_dir.into(),
            output_path: output_path.into(),
        }
    }

    pub fn generate(&self, records: &[ViolationRecord]) -> Result<ReportOutcome> {
        if records.is_empty() {
            warn!("No violations recorded yet, report not generated");
            return Ok(ReportOutcome::Empty);
        }

        info!("Embedding images into report...");
        let (buffer, images_embedded) = self.build_workbook(records)?;
        write_atomically(&self.output_path, &buffer)?;

        info!(
            "✅ Total {} violations reported ({} images) -> {}",
            records.len(),
            images_embedded,
            self.output_path.display()
        );

        Ok(ReportOutcome::Written {
            path: self.output_path.clone(),
            rows: records.len(),
            images_embedded,
        })
    }

    fn build_workbook(&self, records: &[ViolationRecord]) -> Result<(Vec<u8>, usize)> {
        let mut workbook = Workbook::new();
        let header_format = Format::new().set_bold();

        let worksheet = workbook.add_worksheet();
        worksheet.set_name(SHEET_NAME)?;
        worksheet.set_column_width(0, 15)?;
        worksheet.set_column_width(1, 15)?;
        worksheet.set_column_width(2, 20)?;
        worksheet.set_column_width(EVIDENCE_COL, 40)?;

        for (col, header) in HEADERS.iter().enumerate() {
            worksheet.write_string_with_format(0, col as u16, *header, &header_format)?;
        }

        let mut images_embedded = 0;
        for (idx, record) in records.iter().enumerate() {
            let row = idx as u32 + 1;
            worksheet.write_number(row, 0, record.track_id as f64)?;
            worksheet.write_string(row, 1, &record.vehicle_type)?;
            worksheet.write_string(row, 2, &record.timestamp)?;
            worksheet.write_string(row, 3, &record.status)?;

            let Some(file_name) = &record.evidence else {
                continue;
            };
            worksheet.write_string(row, EVIDENCE_COL, file_name)?;

            let image_path = self.evidence_dir.join(file_name);
            if !image_path.exists() {
                warn!("Evidence image missing: {}", image_path.display());
                continue;
            }
            let Some(image) = load_evidence_image(&image_path) else {
                continue;
            };

            let image = image
                .set_scale_width(IMAGE_SCALE)
                .set_scale_height(IMAGE_SCALE)
                .set_object_movement(ObjectMovement::MoveAndSizeWithCells);

            worksheet.set_row_height(row, IMAGE_ROW_HEIGHT)?;
            worksheet.insert_image(row, EVIDENCE_COL, &image)?;
            images_embedded += 1;
        }

        let buffer = workbook
            .save_to_buffer()
            .context("Failed to serialize workbook")?;
        Ok((buffer, images_embedded))
    }
}

/// Unreadable evidence is skipped with a warning; the row stays in the report.
fn load_evidence_image(path: &Path) -> Option<Image> {
    let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    if size < MIN_IMAGE_BYTES {
        warn!("Evidence image too small ({} bytes): {}", size, path.display());
        return None;
    }

    let format = image::ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .ok()
        .and_then(|reader| reader.format());
    if format.is_none() {
        warn!("Evidence image has no recognizable format: {}", path.display());
        return None;
    }

    match Image::new(path) {
        Ok(image) => Some(image),
        Err(e) => {
            warn!("Failed to load evidence image {}: {}", path.display(), e);
            None
        }
    }
}

/// One log line per record, for the end-of-session summary.
pub fn record_summary(record: &ViolationRecord) -> String {
    format!(
        "#{} {} {} at {} (evidence: {})",
        record.track_id,
        record.vehicle_type,
        record.status,
        record.timestamp,
        record.evidence.as_deref().unwrap_or("none")
    )
}

/// JSON copy of the log, for tooling that does not read spreadsheets.
pub fn export_json(records: &[ViolationRecord], path: &Path) -> Result<()> {
    let json = serde_json::to_vec_pretty(records)?;
    write_atomically(path, &json)?;
    info!("Violation log exported to {}", path.display());
    Ok(())
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    tmp.write_all(bytes)?;
    tmp.persist(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::violation::STATUS_ILLEGAL_PARKING;

    fn record(track_id: u32, evidence: Option<&str>) -> ViolationRecord {
        ViolationRecord {
            track_id,
            vehicle_type: "car".to_string(),
            timestamp: "2024-05-01 12:00:00".to_string(),
            status: STATUS_ILLEGAL_PARKING.to_string(),
            evidence: evidence.map(str::to_string),
            frame_index: 42,
            video_timestamp_ms: 1400.0,
        }
    }

    fn write_test_jpeg(path: &Path) {
        let img = image::RgbImage::from_pixel(16, 16, image::Rgb([200, 30, 30]));
        img.save_with_format(path, image::ImageFormat::Jpeg).unwrap();
    }

    #[test]
    fn test_empty_log_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("report.xlsx");
        let generator = ReportGenerator::new(dir.path(), &out);

        assert_eq!(generator.generate(&[]).unwrap(), ReportOutcome::Empty);
        assert!(!out.exists());
    }

    #[test]
    fn test_missing_image_still_produces_row() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("report.xlsx");
        let generator = ReportGenerator::new(dir.path(), &out);

        let outcome = generator
            .generate(&[record(1, Some("car_1.jpg"))])
            .unwrap();

        assert_eq!(
            outcome,
            ReportOutcome::Written {
                path: out.clone(),
                rows: 1,
                images_embedded: 0,
            }
        );
        let bytes = fs::read(&out).unwrap();
        assert_eq!(&bytes[..2], b"PK"); // xlsx is a zip container
    }

    #[test]
    fn test_existing_images_are_embedded() {
        let dir = tempfile::tempdir().unwrap();
        write_test_jpeg(&dir.path().join("car_1.jpg"));
        let out = dir.path().join("nested").join("report.xlsx");
        let generator = ReportGenerator::new(dir.path(), &out);

        let outcome = generator
            .generate(&[record(1, Some("car_1.jpg")), record(2, None)])
            .unwrap();

        match outcome {
            ReportOutcome::Written {
                rows,
                images_embedded,
                ..
            } => {
                assert_eq!(rows, 2);
                assert_eq!(images_embedded, 1);
            }
            ReportOutcome::Empty => panic!("expected a report"),
        }
        assert!(out.exists());
    }

    #[test]
    fn test_unreadable_images_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("car_1.jpg"), b"").unwrap();
        fs::write(dir.path().join("car_2.jpg"), b"definitely not an image file").unwrap();
        write_test_jpeg(&dir.path().join("car_3.jpg"));
        let out = dir.path().join("report.xlsx");
        let generator = ReportGenerator::new(dir.path(), &out);

        let outcome = generator
            .generate(&[
                record(1, Some("car_1.jpg")),
                record(2, Some("car_2.jpg")),
                record(3, Some("car_3.jpg")),
            ])
            .unwrap();

        assert_eq!(
            outcome,
            ReportOutcome::Written {
                path: out.clone(),
                rows: 3,
                images_embedded: 1,
            }
        );
        assert!(out.exists());
    }

    #[test]
    fn test_record_summary() {
        assert_eq!(
            record_summary(&record(7, Some("car_7.jpg"))),
            "#7 car ILLEGAL PARKING at 2024-05-01 12:00:00 (evidence: car_7.jpg)"
        );
        assert!(record_summary(&record(8, None)).ends_with("(evidence: none)"));
    }

    #[test]
    fn test_json_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("violations.json");
        export_json(&[record(3, None)], &path).unwrap();

        let value: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(value[0]["track_id"], 3);
        assert_eq!(value[0]["status"], "ILLEGAL PARKING");
        assert!(value[0]["evidence"].is_null());
    }
}
