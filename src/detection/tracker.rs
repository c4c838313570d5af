// src/detection/tracker.rs
//
// IoU-based multi-object tracker that gives each vehicle a persistent id.
//
//   - Greedy IoU matching, best pairs first (fine for tens of objects)
//   - Cross-class matches are penalised once a track's class is locked
//   - Tracks coast through short detection gaps before being dropped
//   - Ids are only reported for confirmed tracks; tentative ones stay `None`

use crate::types::TrackerSettings;
use tracing::debug;

/// IoU multiplier when a detection's class differs from a confirmed track's.
const CROSS_CLASS_IOU_PENALTY: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Tentative,
    Confirmed,
}

#[derive(Debug, Clone)]
pub struct Track {
    pub id: u32,
    pub bbox: [f32; 4],
    pub class_id: usize,
    pub state: TrackState,
    pub hits: u32,
    pub frames_since_hit: u32,
}

/// Input to the tracker: one box per detection.
#[derive(Debug, Clone, Copy)]
pub struct TrackInput {
    pub bbox: [f32; 4],
    pub class_id: usize,
}

pub struct IouTracker {
    settings: TrackerSettings,
    tracks: Vec<Track>,
    next_id: u32,
}

impl IouTracker {
    pub fn new(settings: TrackerSettings) -> Self {
        Self {
            settings,
            tracks: Vec::new(),
            next_id: 1,
        }
    }

    /// Associate this frame's detections with tracks. The returned vector is
    /// index-aligned with `inputs`.
    pub fn update(&mut self, inputs: &[TrackInput]) -> Vec<Option<u32>> {
        let mut track_matched = vec![false; self.tracks.len()];
        let mut assigned: Vec<Option<usize>> = vec![None; inputs.len()];

        let mut pairs: Vec<(usize, usize, f32)> = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            for (di, input) in inputs.iter().enumerate() {
                let mut score = iou(&track.bbox, &input.bbox);
                if track.state == TrackState::Confirmed && track.class_id != input.class_id {
                    score *= CROSS_CLASS_IOU_PENALTY;
                }
                if score >= self.settings.min_iou {
                    pairs.push((ti, di, score));
                }
            }
        }
        pairs.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

        for (ti, di, _) in pairs {
            if track_matched[ti] || assigned[di].is_some() {
                continue;
            }
            track_matched[ti] = true;
            assigned[di] = Some(ti);
            self.tracks[ti].hit(&inputs[di], self.settings.min_hits_to_confirm);
        }

        for (ti, matched) in track_matched.iter().enumerate() {
            if !matched {
                self.tracks[ti].frames_since_hit += 1;
            }
        }

        for (di, input) in inputs.iter().enumerate() {
            if assigned[di].is_none() {
                let track = Track {
                    id: self.next_id,
                    bbox: input.bbox,
                    class_id: input.class_id,
                    state: if self.settings.min_hits_to_confirm <= 1 {
                        TrackState::Confirmed
                    } else {
                        TrackState::Tentative
                    },
                    hits: 1,
                    frames_since_hit: 0,
                };
                self.next_id += 1;
                assigned[di] = Some(self.tracks.len());
                self.tracks.push(track);
            }
        }

        let ids = assigned
            .iter()
            .map(|slot| {
                slot.map(|ti| &self.tracks[ti])
                    .filter(|t| t.state == TrackState::Confirmed)
                    .map(|t| t.id)
            })
            .collect();

        let max_coast = self.settings.max_coast_frames;
        let before = self.tracks.len();
        self.tracks.retain(|t| {
            t.frames_since_hit <= max_coast
                && !(t.state == TrackState::Tentative && t.frames_since_hit > 0)
        });
        if self.tracks.len() < before {
            debug!("Dropped {} stale tracks", before - self.tracks.len());
        }

        ids
    }

    #[cfg(test)]
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }
}

impl Track {
    fn hit(&mut self, input: &TrackInput, min_hits: u32) {
        self.bbox = input.bbox;
        self.hits += 1;
        self.frames_since_hit = 0;
        if self.state == TrackState::Tentative {
            self.class_id = input.class_id;
            if self.hits >= min_hits {
                self.state = TrackState::Confirmed;
                debug!("Track {} confirmed with class={}", self.id, self.class_id);
            }
        }
    }
}

pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);
    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    let union = area_a + area_b - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(x1: f32, y1: f32, x2: f32, y2: f32) -> TrackInput {
        TrackInput {
            bbox: [x1, y1, x2, y2],
            class_id: 2,
        }
    }

    #[test]
    fn test_iou_overlap() {
        let a = [0.0, 0.0, 100.0, 100.0];
        let b = [50.0, 50.0, 150.0, 150.0];
        assert!((iou(&a, &b) - 2500.0 / 17500.0).abs() < 0.01);
    }

    #[test]
    fn test_iou_no_overlap() {
        assert_eq!(iou(&[0.0, 0.0, 50.0, 50.0], &[100.0, 100.0, 200.0, 200.0]), 0.0);
    }

    #[test]
    fn test_id_reported_after_confirmation() {
        let mut tracker = IouTracker::new(TrackerSettings::default());
        let dets = vec![input(500.0, 200.0, 600.0, 300.0)];

        assert_eq!(tracker.update(&dets), vec![None]);
        assert_eq!(tracker.update(&dets), vec![None]);
        let ids = tracker.update(&dets);
        assert_eq!(ids, vec![Some(1)]);
        assert_eq!(tracker.tracks()[0].state, TrackState::Confirmed);
    }

    #[test]
    fn test_id_persists_across_small_motion() {
        let mut tracker = IouTracker::new(TrackerSettings::default());
        for i in 0..5 {
            let dx = i as f32 * 5.0;
            tracker.update(&[input(500.0 + dx, 200.0, 600.0 + dx, 300.0)]);
        }
        let ids = tracker.update(&[input(530.0, 200.0, 630.0, 300.0)]);
        assert_eq!(ids, vec![Some(1)]);
        assert_eq!(tracker.tracks().len(), 1);
    }

    #[test]
    fn test_track_coasts_through_gap() {
        let mut tracker = IouTracker::new(TrackerSettings::default());
        let dets = vec![input(500.0, 200.0, 600.0, 300.0)];
        for _ in 0..3 {
            tracker.update(&dets);
        }
        for _ in 0..10 {
            tracker.update(&[]);
        }
        assert_eq!(tracker.update(&dets), vec![Some(1)]);
    }

    #[test]
    fn test_track_dropped_after_max_coast() {
        let settings = TrackerSettings {
            max_coast_frames: 2,
            ..TrackerSettings::default()
        };
        let mut tracker = IouTracker::new(settings);
        let dets = vec![input(500.0, 200.0, 600.0, 300.0)];
        for _ in 0..3 {
            tracker.update(&dets);
        }
        for _ in 0..3 {
            tracker.update(&[]);
        }
        assert!(tracker.tracks().is_empty());
        // Reappearing object starts a fresh, unconfirmed track
        assert_eq!(tracker.update(&dets), vec![None]);
    }

    #[test]
    fn test_two_objects_get_distinct_ids() {
        let settings = TrackerSettings {
            min_hits_to_confirm: 1,
            ..TrackerSettings::default()
        };
        let mut tracker = IouTracker::new(settings);
        let ids = tracker.update(&[
            input(0.0, 0.0, 100.0, 100.0),
            input(400.0, 400.0, 500.0, 500.0),
        ]);
        assert_eq!(ids, vec![Some(1), Some(2)]);
        let ids = tracker.update(&[
            input(400.0, 400.0, 500.0, 500.0),
            input(0.0, 0.0, 100.0, 100.0),
        ]);
        assert_eq!(ids, vec![Some(2), Some(1)]);
    }
}
