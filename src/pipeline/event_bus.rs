// src/pipeline/event_bus.rs
//
// Decoupled event system. The session loop publishes what happened on a
// frame; consumers (logging, the binary's shutdown summary) drain it
// instead of reaching into session state.

use std::collections::VecDeque;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    ViolationCaptured {
        track_id: u32,
        vehicle_type: String,
        evidence: Option<String>,
        frame_index: u64,
    },

    SessionReset {
        cleared_records: usize,
    },

    FrameSkipped {
        frame_index: u64,
        reason: String,
    },
}

pub struct EventBus {
    events: VecDeque<PipelineEvent>,
    max_pending: usize,
}

impl EventBus {
    pub fn new(max_pending: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_pending),
            max_pending,
        }
    }

    pub fn publish(&mut self, event: PipelineEvent) {
        if self.events.len() >= self.max_pending {
            warn!(
                "Event bus full ({} events), dropping oldest",
                self.max_pending
            );
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn drain(&mut self) -> Vec<PipelineEvent> {
        self.events.drain(..).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.events.len()
    }
}

/// Log drained events at the level they deserve.
pub fn log_events(events: &[PipelineEvent]) {
    for event in events {
        match event {
            PipelineEvent::ViolationCaptured {
                track_id,
                vehicle_type,
                evidence,
                frame_index,
            } => info!(
                "Violation: {} {} at frame {} (evidence: {})",
                vehicle_type,
                track_id,
                frame_index,
                evidence.as_deref().unwrap_or("none")
            ),
            PipelineEvent::SessionReset { cleared_records } => {
                info!("Session reset, {} records cleared", cleared_records)
            }
            PipelineEvent::FrameSkipped {
                frame_index,
                reason,
            } => warn!("Frame {} skipped: {}", frame_index, reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skipped(i: u64) -> PipelineEvent {
        PipelineEvent::FrameSkipped {
            frame_index: i,
            reason: "test".to_string(),
        }
    }

    #[test]
    fn test_drain_returns_in_order_and_empties() {
        let mut bus = EventBus::new(8);
        bus.publish(skipped(1));
        bus.publish(PipelineEvent::SessionReset { cleared_records: 2 });
        assert_eq!(bus.pending_count(), 2);

        let events = bus.drain();
        assert_eq!(events[0], skipped(1));
        assert_eq!(events[1], PipelineEvent::SessionReset { cleared_records: 2 });
        assert_eq!(bus.pending_count(), 0);
    }

    #[test]
    fn test_full_bus_drops_oldest() {
        let mut bus = EventBus::new(2);
        for i in 0..3 {
            bus.publish(skipped(i));
        }
        assert_eq!(bus.drain(), vec![skipped(1), skipped(2)]);
    }
}
