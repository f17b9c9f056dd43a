//! Scenario event types
//!
//! Scenario events script incidents at fixed ticks on top of the random
//! generator: a crash on a given lane at tick 500, a clear-out every hour.
//!
//! # Design Principles
//!
//! 1. **Determinism**: events are scheduled by tick, never by wall clock
//! 2. **Same rules**: spawned incidents pass the same capacity and location
//!    checks as trigger requests
//! 3. **Logged**: every execution lands in the event log

use crate::models::IncidentKind;
use crate::scheduler::LocationHint;
use serde::{Deserialize, Serialize};

/// A scripted action against the incident set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScenarioEvent {
    /// Create an incident at a location
    ///
    /// Unset fields fall back to the scheduler configuration.
    SpawnIncident {
        location: LocationHint,
        #[serde(default)]
        kind: Option<IncidentKind>,
        #[serde(default)]
        duration_ticks: Option<usize>,
        #[serde(default)]
        position_m: Option<f64>,
    },

    /// Tear down whatever incident sits on a lane
    ClearLane { lane_id: String },

    /// Tear down every incident
    ClearAll,
}

impl ScenarioEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ScenarioEvent::SpawnIncident { .. } => "spawn_incident",
            ScenarioEvent::ClearLane { .. } => "clear_lane",
            ScenarioEvent::ClearAll => "clear_all",
        }
    }
}

/// When to execute a scenario event
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventSchedule {
    /// Execute at regular intervals starting from start_tick
    Repeating { start_tick: usize, interval: usize },

    /// Execute once at a specific tick
    OneTime { tick: usize },
}

impl EventSchedule {
    /// Check if this schedule triggers at the given tick
    ///
    /// A zero interval fires only at `start_tick`.
    pub fn should_execute(&self, tick: usize) -> bool {
        match self {
            EventSchedule::OneTime { tick: event_tick } => tick == *event_tick,
            EventSchedule::Repeating {
                start_tick,
                interval,
            } => {
                if tick < *start_tick {
                    return false;
                }
                match interval {
                    0 => tick == *start_tick,
                    step => (tick - start_tick) % step == 0,
                }
            }
        }
    }
}

/// A scenario event paired with its schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub event: ScenarioEvent,
    pub schedule: EventSchedule,
}
