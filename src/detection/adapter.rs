// src/detection/adapter.rs
//
// Turns raw segmentation instances into the per-frame view the violation
// logic consumes: road polygons for road classes, tracked detections for
// vehicle classes. Everything else is dropped here.

use super::tracker::{IouTracker, TrackInput};
use super::types::{
    ClassTable, Detection, DetectionOutcome, Detector, FrameDetections, InstanceSource,
    SemanticRole,
};
use crate::geometry::RoadPolygon;
use crate::types::{Frame, TrackerSettings};
use tracing::debug;

pub struct TrackingDetector<S> {
    source: S,
    classes: ClassTable,
    tracker: IouTracker,
}

impl<S: InstanceSource> TrackingDetector<S> {
    pub fn new(source: S, classes: ClassTable, tracker: TrackerSettings) -> Self {
        Self {
            source,
            classes,
            tracker: IouTracker::new(tracker),
        }
    }
}

impl<S: InstanceSource> Detector for TrackingDetector<S> {
    fn detect_and_track(&mut self, frame: &Frame, confidence: f32) -> DetectionOutcome {
        let instances = match self.source.infer(frame, confidence) {
            Ok(instances) => instances,
            Err(e) => return DetectionOutcome::Failed(e),
        };

        let mut road_polygons = Vec::new();
        let mut vehicle_instances = Vec::new();

        for instance in instances {
            match self.classes.role(instance.class_id) {
                SemanticRole::Road => {
                    if let Some(points) = instance.polygon {
                        road_polygons.push(RoadPolygon::new(points));
                    }
                }
                SemanticRole::Vehicle => vehicle_instances.push(instance),
                SemanticRole::Ignore => {}
            }
        }

        // The tracker sees every frame, including empty ones, so tracks coast.
        let inputs: Vec<TrackInput> = vehicle_instances
            .iter()
            .map(|i| TrackInput {
                bbox: i.bbox,
                class_id: i.class_id,
            })
            .collect();
        let track_ids = self.tracker.update(&inputs);

        let vehicles: Vec<Detection> = vehicle_instances
            .into_iter()
            .zip(track_ids)
            .map(|(instance, track_id)| Detection {
                bbox: instance.bbox,
                confidence: instance.confidence,
                class_id: instance.class_id,
                class_name: self.classes.name(instance.class_id),
                track_id,
            })
            .collect();

        if vehicles.is_empty() && road_polygons.is_empty() {
            return DetectionOutcome::Empty;
        }

        debug!(
            "{} vehicles, {} road polygons",
            vehicles.len(),
            road_polygons.len()
        );

        DetectionOutcome::Detected(FrameDetections {
            vehicles,
            road_polygons,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::types::Instance;
    use crate::geometry::Point2;
    use std::collections::{BTreeMap, VecDeque};

    struct ScriptedSource {
        frames: VecDeque<anyhow::Result<Vec<Instance>>>,
    }

    impl InstanceSource for ScriptedSource {
        fn infer(&mut self, _frame: &Frame, _confidence: f32) -> anyhow::Result<Vec<Instance>> {
            self.frames.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn classes() -> ClassTable {
        let names: BTreeMap<usize, String> = [(0, "road"), (1, "car"), (2, "person")]
            .iter()
            .map(|(i, n)| (*i, n.to_string()))
            .collect();
        ClassTable::resolve(&names, &[])
    }

    fn car() -> Instance {
        Instance {
            bbox: [100.0, 100.0, 200.0, 200.0],
            class_id: 1,
            confidence: 0.9,
            polygon: None,
        }
    }

    fn road() -> Instance {
        Instance {
            bbox: [0.0, 0.0, 50.0, 50.0],
            class_id: 0,
            confidence: 0.8,
            polygon: Some(vec![
                Point2::new(0.0, 0.0),
                Point2::new(50.0, 0.0),
                Point2::new(50.0, 50.0),
            ]),
        }
    }

    fn person() -> Instance {
        Instance {
            class_id: 2,
            ..car()
        }
    }

    fn detector(frames: Vec<anyhow::Result<Vec<Instance>>>) -> TrackingDetector<ScriptedSource> {
        let settings = TrackerSettings {
            min_hits_to_confirm: 1,
            ..TrackerSettings::default()
        };
        TrackingDetector::new(
            ScriptedSource {
                frames: frames.into(),
            },
            classes(),
            settings,
        )
    }

    #[test]
    fn test_roles_split_instances() {
        let mut det = detector(vec![Ok(vec![car(), road(), person()])]);
        let frame = Frame::blank(4, 4);
        match det.detect_and_track(&frame, 0.25) {
            DetectionOutcome::Detected(d) => {
                assert_eq!(d.vehicles.len(), 1);
                assert_eq!(d.vehicles[0].class_name, "car");
                assert_eq!(d.vehicles[0].track_id, Some(1));
                assert_eq!(d.road_polygons.len(), 1);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_nothing_relevant_is_empty() {
        let mut det = detector(vec![Ok(vec![person()]), Ok(Vec::new())]);
        let frame = Frame::blank(4, 4);
        assert!(matches!(
            det.detect_and_track(&frame, 0.25),
            DetectionOutcome::Empty
        ));
        assert!(matches!(
            det.detect_and_track(&frame, 0.25),
            DetectionOutcome::Empty
        ));
    }

    #[test]
    fn test_source_error_is_failed() {
        let mut det = detector(vec![Err(anyhow::anyhow!("inference blew up"))]);
        let frame = Frame::blank(4, 4);
        assert!(matches!(
            det.detect_and_track(&frame, 0.25),
            DetectionOutcome::Failed(_)
        ));
    }

    #[test]
    fn test_road_without_polygon_is_dropped() {
        let bare_road = Instance {
            polygon: None,
            ..road()
        };
        let mut det = detector(vec![Ok(vec![bare_road, car()])]);
        let frame = Frame::blank(4, 4);
        match det.detect_and_track(&frame, 0.25) {
            DetectionOutcome::Detected(d) => assert!(d.road_polygons.is_empty()),
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
