// src/detection/types.rs

use crate::geometry::{Point2, RoadPolygon};
use crate::types::{ClassRoleEntry, Frame};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// A tracked vehicle detection in the current frame.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4], // [x1, y1, x2, y2] in frame coordinates
    pub confidence: f32,
    pub class_id: usize,
    pub class_name: String,
    /// Owned by the tracker; `None` while the object is not (or no longer) tracked
    pub track_id: Option<u32>,
}

/// Everything the detector reports for one frame.
#[derive(Debug, Clone, Default)]
pub struct FrameDetections {
    pub vehicles: Vec<Detection>,
    pub road_polygons: Vec<RoadPolygon>,
}

/// Outcome of one detector call. `Empty` and `Failed` are deliberately
/// distinct: an empty frame still advances vehicle state, a failed one is
/// skipped entirely.
#[derive(Debug)]
pub enum DetectionOutcome {
    Detected(FrameDetections),
    Empty,
    Failed(anyhow::Error),
}

pub trait Detector {
    fn detect_and_track(&mut self, frame: &Frame, confidence: f32) -> DetectionOutcome;
}

/// Raw model output for one instance, before role resolution and tracking.
#[derive(Debug, Clone)]
pub struct Instance {
    pub bbox: [f32; 4],
    pub class_id: usize,
    pub confidence: f32,
    pub polygon: Option<Vec<Point2>>,
}

/// Something that turns a frame into raw instances (the segmentation model).
pub trait InstanceSource {
    fn infer(&mut self, frame: &Frame, confidence: f32) -> anyhow::Result<Vec<Instance>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticRole {
    Road,
    Vehicle,
    Ignore,
}

const ROAD_KEYWORDS: [&str; 2] = ["road", "yol"];
const VEHICLE_KEYWORDS: [&str; 4] = ["car", "vehicle", "truck", "bus"];
const FALLBACK_VEHICLE_IDS: [usize; 4] = [0, 1, 2, 3];

/// Class id -> (name, role), resolved once at startup.
#[derive(Debug, Clone, Default)]
pub struct ClassTable {
    names: BTreeMap<usize, String>,
    roles: BTreeMap<usize, SemanticRole>,
}

impl ClassTable {
    /// Roles come from explicit entries first, then from name keywords.
    /// When nothing resolves to a vehicle, ids 0..=3 are treated as vehicles.
    pub fn resolve(names: &BTreeMap<usize, String>, explicit: &[ClassRoleEntry]) -> Self {
        let mut table = ClassTable {
            names: names.clone(),
            roles: BTreeMap::new(),
        };

        for (&id, name) in names {
            table.roles.insert(id, role_from_name(name));
        }

        for entry in explicit {
            if let Some(name) = &entry.name {
                table.names.insert(entry.id, name.clone());
            }
            table.roles.insert(entry.id, entry.role);
        }

        if table.vehicle_ids().is_empty() {
            warn!(
                "No vehicle classes resolved, falling back to ids {:?}",
                FALLBACK_VEHICLE_IDS
            );
            for id in FALLBACK_VEHICLE_IDS {
                if table.role(id) != SemanticRole::Road {
                    table.roles.insert(id, SemanticRole::Vehicle);
                }
            }
        }

        info!(
            "Class roles: road={:?} vehicle={:?}",
            table.road_ids(),
            table.vehicle_ids()
        );
        table
    }

    pub fn role(&self, class_id: usize) -> SemanticRole {
        self.roles
            .get(&class_id)
            .copied()
            .unwrap_or(SemanticRole::Ignore)
    }

    pub fn name(&self, class_id: usize) -> String {
        self.names
            .get(&class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }

    pub fn road_ids(&self) -> Vec<usize> {
        self.ids_with(SemanticRole::Road)
    }

    pub fn vehicle_ids(&self) -> Vec<usize> {
        self.ids_with(SemanticRole::Vehicle)
    }

    fn ids_with(&self, role: SemanticRole) -> Vec<usize> {
        self.roles
            .iter()
            .filter(|(_, r)| **r == role)
            .map(|(id, _)| *id)
            .collect()
    }
}

fn role_from_name(name: &str) -> SemanticRole {
    let lower = name.to_lowercase();
    if ROAD_KEYWORDS.iter().any(|k| lower.contains(k)) {
        SemanticRole::Road
    } else if VEHICLE_KEYWORDS.iter().any(|k| lower.contains(k)) {
        SemanticRole::Vehicle
    } else {
        SemanticRole::Ignore
    }
}

/// Parse the `names` metadata Ultralytics writes into ONNX exports,
/// e.g. `{0: 'road', 1: 'car'}`.
pub fn parse_names_metadata(raw: &str) -> BTreeMap<usize, String> {
    raw.trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .split(',')
        .filter_map(|pair| {
            let (id, name) = pair.split_once(':')?;
            let id = id.trim().parse::<usize>().ok()?;
            let name = name.trim().trim_matches(|c| c == '\'' || c == '"');
            Some((id, name.to_string()))
        })
        .collect()
}

/// Names given as a plain list in config are indexed by position.
pub fn names_from_list(list: &[String]) -> BTreeMap<usize, String> {
    list.iter().cloned().enumerate().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(pairs: &[(usize, &str)]) -> BTreeMap<usize, String> {
        pairs.iter().map(|(i, n)| (*i, n.to_string())).collect()
    }

    #[test]
    fn test_roles_from_names() {
        let table = ClassTable::resolve(
            &names(&[(0, "Road"), (1, "car"), (2, "Truck"), (3, "person"), (4, "yol")]),
            &[],
        );
        assert_eq!(table.road_ids(), vec![0, 4]);
        assert_eq!(table.vehicle_ids(), vec![1, 2]);
        assert_eq!(table.role(3), SemanticRole::Ignore);
        assert_eq!(table.role(99), SemanticRole::Ignore);
    }

    #[test]
    fn test_explicit_entries_override_names() {
        let explicit = vec![
            ClassRoleEntry {
                id: 3,
                name: Some("minibus".to_string()),
                role: SemanticRole::Ignore,
            },
            ClassRoleEntry {
                id: 5,
                name: None,
                role: SemanticRole::Vehicle,
            },
        ];
        let table = ClassTable::resolve(&names(&[(0, "road"), (3, "bus")]), &explicit);
        assert_eq!(table.role(3), SemanticRole::Ignore);
        assert_eq!(table.name(3), "minibus");
        assert_eq!(table.vehicle_ids(), vec![5]);
        assert_eq!(table.name(5), "class_5");
    }

    #[test]
    fn test_fallback_vehicle_ids() {
        let table = ClassTable::resolve(&names(&[(0, "road"), (1, "a"), (2, "b")]), &[]);
        assert_eq!(table.road_ids(), vec![0]);
        assert_eq!(table.vehicle_ids(), vec![1, 2, 3]);
    }

    #[test]
    fn test_parse_names_metadata() {
        let parsed = parse_names_metadata("{0: 'road', 1: 'car', 2: \"bus\"}");
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[&0], "road");
        assert_eq!(parsed[&2], "bus");
    }

    #[test]
    fn test_parse_names_metadata_garbage() {
        assert!(parse_names_metadata("not a dict").is_empty());
    }
}
