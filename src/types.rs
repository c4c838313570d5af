// src/types.rs

use crate::detection::SemanticRole;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: ModelConfig,
    pub detection: DetectionConfig,
    pub violation: ViolationConfig,
    pub video: VideoConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// ONNX export of a YOLOv8-seg model
    pub path: String,
    pub input_size: usize,
    pub num_mask_coeffs: usize,
    /// Class names, used when the model carries no `names` metadata
    pub class_names: Vec<String>,
    pub nms_iou: f32,
    pub use_cuda: bool,
    pub num_threads: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: "best.onnx".to_string(),
            input_size: 640,
            num_mask_coeffs: 32,
            class_names: Vec::new(),
            nms_iou: 0.45,
            use_cuda: true,
            num_threads: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub confidence_threshold: f32,
    /// Boxes shorter than this (pixels) are ignored as far/spurious detections
    pub min_box_height: f32,
    /// Explicit class id -> role table; entries override name-based rules
    pub class_roles: Vec<ClassRoleEntry>,
    pub tracker: TrackerSettings,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.25,
            min_box_height: 50.0,
            class_roles: Vec::new(),
            tracker: TrackerSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassRoleEntry {
    pub id: usize,
    #[serde(default)]
    pub name: Option<String>,
    pub role: SemanticRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    pub min_iou: f32,
    pub max_coast_frames: u32,
    pub min_hits_to_confirm: u32,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            min_iou: 0.3,
            max_coast_frames: 30, // 1s at 30fps
            min_hits_to_confirm: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViolationConfig {
    /// Consecutive off-road frames tolerated before a vehicle is flagged
    pub frame_threshold: u32,
    /// Pixels a contact point must lie inside a road polygon to count as on-road
    pub road_tolerance: f32,
}

impl Default for ViolationConfig {
    fn default() -> Self {
        Self {
            frame_threshold: 15,
            road_tolerance: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub frame_width: usize,
    pub frame_height: usize,
    pub save_annotated: bool,
    pub annotated_path: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            frame_width: 1280,
            frame_height: 720,
            save_annotated: false,
            annotated_path: "output/annotated.mp4".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub evidence_dir: String,
    pub report_path: String,
    pub export_json: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            evidence_dir: "evidence".to_string(),
            report_path: "Parking_Violation_Report.xlsx".to_string(),
            export_json: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Decoded RGB frame at working resolution.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub timestamp_ms: f64,
}

impl Frame {
    pub fn blank(width: usize, height: usize) -> Self {
        Self {
            data: vec![0u8; width * height * 3],
            width,
            height,
            timestamp_ms: 0.0,
        }
    }
}
