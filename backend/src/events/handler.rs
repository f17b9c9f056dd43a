//! Scenario event scheduling
//!
//! The handler only answers "what fires at this tick". Execution needs the
//! whole scheduler (capacity checks, controller, event log) and lives in
//! [`crate::IncidentScheduler`].

use crate::events::types::{ScenarioEvent, ScheduledEvent};

/// Holds the scripted events of a run
#[derive(Debug, Clone, Default)]
pub struct ScenarioEventHandler {
    events: Vec<ScheduledEvent>,
}

impl ScenarioEventHandler {
    pub fn new(events: Vec<ScheduledEvent>) -> Self {
        Self { events }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events scheduled for `tick`, in configuration order
    pub fn events_for_tick(&self, tick: usize) -> Vec<&ScenarioEvent> {
        self.events
            .iter()
            .filter(|scheduled| scheduled.schedule.should_execute(tick))
            .map(|scheduled| &scheduled.event)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::EventSchedule;

    #[test]
    fn test_events_for_tick_keeps_configuration_order() {
        let handler = ScenarioEventHandler::new(vec![
            ScheduledEvent {
                event: ScenarioEvent::ClearLane {
                    lane_id: "E1_0".to_string(),
                },
                schedule: EventSchedule::OneTime { tick: 10 },
            },
            ScheduledEvent {
                event: ScenarioEvent::ClearAll,
                schedule: EventSchedule::Repeating {
                    start_tick: 0,
                    interval: 5,
                },
            },
        ]);

        let at_ten = handler.events_for_tick(10);
        assert_eq!(at_ten.len(), 2);
        assert_eq!(at_ten[0].event_type(), "clear_lane");
        assert_eq!(at_ten[1].event_type(), "clear_all");

        assert_eq!(handler.events_for_tick(11).len(), 0);
        assert_eq!(handler.events_for_tick(15).len(), 1);
    }
}
