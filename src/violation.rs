// src/violation.rs
//
// Per-track off-road state machine.
//
//   CLEAN ──off-road──► ANALYZING ──counter > threshold──► VIOLATION ─► PENALIZED
//     ▲                    │
//     └──────on-road───────┘
//
// PENALIZED is absorbing for the rest of the session. The penalized set and
// the record log live together in `ViolationLedger` so that one can never be
// updated without the other.

use crate::geometry::{bottom_center, is_on_road, RoadPolygon};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::debug;

pub const STATUS_ILLEGAL_PARKING: &str = "ILLEGAL PARKING";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleStatus {
    /// Filtered out this frame (box too small); nothing changed or rendered
    Skipped,
    Clean,
    Analyzing { remaining: u32 },
    /// Threshold crossed on this frame; evidence must be captured now
    Violation,
    Penalized,
}

impl VehicleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skipped => "SKIPPED",
            Self::Clean => "Clean",
            Self::Analyzing { .. } => "Analyzing",
            Self::Violation => "VIOLATION!",
            Self::Penalized => "PENALIZED",
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Analyzing { remaining } => format!("Analyzing ({})", remaining),
            other => other.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CheckParams {
    pub min_box_height: f32,
    pub frame_threshold: u32,
    pub road_tolerance: f32,
}

/// Consecutive off-road frame counter per track id.
#[derive(Debug, Default)]
pub struct ViolationState {
    counters: HashMap<u32, u32>,
}

impl ViolationState {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn counter(&self, track_id: u32) -> Option<u32> {
        self.counters.get(&track_id).copied()
    }

    pub fn tracked_count(&self) -> usize {
        self.counters.len()
    }

    pub fn clear(&mut self) {
        self.counters.clear();
    }

    /// Advance one track by one frame. A `Violation` result obliges the
    /// caller to record it in the ledger before the next frame.
    pub fn check(
        &mut self,
        track_id: u32,
        bbox: &[f32; 4],
        roads: &[RoadPolygon],
        ledger: &ViolationLedger,
        params: &CheckParams,
    ) -> VehicleStatus {
        if ledger.is_penalized(track_id) {
            return VehicleStatus::Penalized;
        }

        if bbox[3] - bbox[1] < params.min_box_height {
            return VehicleStatus::Skipped;
        }

        let contact = bottom_center(bbox);
        let counter = self.counters.entry(track_id).or_insert(0);

        if is_on_road(contact, roads, params.road_tolerance) {
            *counter = 0;
            return VehicleStatus::Clean;
        }

        *counter += 1;
        if *counter > params.frame_threshold {
            debug!("Track {} off-road for {} frames", track_id, counter);
            VehicleStatus::Violation
        } else {
            VehicleStatus::Analyzing {
                remaining: params.frame_threshold - *counter,
            }
        }
    }
}

/// One logged violation. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViolationRecord {
    pub track_id: u32,
    pub vehicle_type: String,
    pub timestamp: String,
    pub status: String,
    /// Evidence image file name inside the evidence directory
    pub evidence: Option<String>,
    pub frame_index: u64,
    pub video_timestamp_ms: f64,
}

/// Penalized set and record log, updated together.
#[derive(Debug, Default)]
pub struct ViolationLedger {
    penalized: HashSet<u32>,
    records: Vec<ViolationRecord>,
}

impl ViolationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_penalized(&self, track_id: u32) -> bool {
        self.penalized.contains(&track_id)
    }

    /// Returns false (and changes nothing) if the track was already penalized.
    pub fn record(&mut self, record: ViolationRecord) -> bool {
        if !self.penalized.insert(record.track_id) {
            return false;
        }
        self.records.push(record);
        true
    }

    pub fn records(&self) -> &[ViolationRecord] {
        &self.records
    }

    pub fn penalized_count(&self) -> usize {
        self.penalized.len()
    }

    pub fn clear(&mut self) {
        self.penalized.clear();
        self.records.clear();
    }
}
