// src/pipeline/frame_context.rs
//
// Everything decided about one frame, in one place. The annotator renders
// from this instead of re-deriving statuses from live state.

use crate::detection::Detection;
use crate::geometry::RoadPolygon;
use crate::types::Frame;
use crate::violation::VehicleStatus;

#[derive(Debug, Clone)]
pub struct VehicleView {
    pub detection: Detection,
    pub status: VehicleStatus,
}

#[derive(Debug, Clone)]
pub struct FrameContext {
    pub frame_index: u64,
    pub frame: Frame,
    pub road_polygons: Vec<RoadPolygon>,
    pub vehicles: Vec<VehicleView>,
}

impl FrameContext {
    pub fn new(frame_index: u64, frame: Frame) -> Self {
        Self {
            frame_index,
            frame,
            road_polygons: Vec::new(),
            vehicles: Vec::new(),
        }
    }

    /// Vehicles that should be drawn: tracked and not filtered out.
    pub fn visible_vehicles(&self) -> impl Iterator<Item = &VehicleView> {
        self.vehicles
            .iter()
            .filter(|v| v.detection.track_id.is_some() && v.status != VehicleStatus::Skipped)
    }
}
