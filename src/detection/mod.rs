// src/detection/mod.rs

mod adapter;
mod tracker;
mod types;
mod yolo_seg;

// Re-export public APIs
pub use adapter::TrackingDetector;
pub use types::*;
pub use yolo_seg::YoloSegModel;
