//! Event logging for incident auditing and replay.
//!
//! Every lifecycle change an incident goes through is recorded as an
//! [`Event`] stamped with the tick it happened on. The log enables:
//! - Deterministic replay checks (same seed, same world ⇒ same event stream)
//! - Debugging (why did an obstacle turn into a lane block?)
//! - Auditing (was every disrupted lane restored?)
//!
//! # Event Types
//!
//! - **Creation**: incident created, applied, fallen back, or failed
//! - **Revert**: reverted, deferred for retry, or given up as unrecovered
//! - **Control**: trigger rejections, scenario events, configuration swaps
//!
//! # Example
//!
//! ```rust
//! use traffic_incident_core_rs::models::{CreationSource, Event, EventLog, IncidentId};
//! use traffic_incident_core_rs::IncidentKind;
//!
//! let mut log = EventLog::new();
//! log.log(Event::IncidentCreated {
//!     tick: 10,
//!     incident_id: IncidentId::new(),
//!     kind: IncidentKind::Obstacle,
//!     edge_id: "E1".to_string(),
//!     lane_id: "E1_0".to_string(),
//!     duration_ticks: 120,
//!     source: CreationSource::Random,
//! });
//!
//! assert_eq!(log.events_at_tick(10).len(), 1);
//! assert_eq!(log.events_for_lane("E1_0").len(), 1);
//! ```

use super::incident::{IncidentId, IncidentKind};
use serde::{Deserialize, Serialize};

/// What caused an incident to be created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationSource {
    /// Per-tick Bernoulli trial
    Random,
    /// External trigger request
    Trigger,
    /// Scripted scenario event
    Scenario,
}

/// Incident lifecycle event
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Incident created (Pending) on a resolved lane
    IncidentCreated {
        tick: usize,
        incident_id: IncidentId,
        kind: IncidentKind,
        edge_id: String,
        lane_id: String,
        duration_ticks: usize,
        source: CreationSource,
    },

    /// Incident applied to the world (Pending → Active)
    IncidentActivated {
        tick: usize,
        incident_id: IncidentId,
        kind: IncidentKind,
        lane_id: String,
    },

    /// Obstacle spawn failed; incident rewritten as a lane block
    ObstacleFallback {
        tick: usize,
        incident_id: IncidentId,
        lane_id: String,
        reason: String,
    },

    /// Apply failed; incident never became Active
    CreationFailed {
        tick: usize,
        incident_id: IncidentId,
        lane_id: String,
        reason: String,
        /// Partial work stayed in the world; the incident is Reverting
        cleanup_pending: bool,
    },

    /// Incident reverted and closed
    IncidentReverted {
        tick: usize,
        incident_id: IncidentId,
        lane_id: String,
        /// Lane or obstacle had already vanished; nothing was written back
        target_missing: bool,
    },

    /// Revert failed; retried on the next tick
    RevertDeferred {
        tick: usize,
        incident_id: IncidentId,
        lane_id: String,
        attempt: u32,
        reason: String,
    },

    /// Revert retries exhausted; incident force-closed, world may be disrupted
    IncidentUnrecovered {
        tick: usize,
        incident_id: IncidentId,
        lane_id: String,
        attempts: u32,
        reason: String,
    },

    /// Trigger request refused
    TriggerRejected {
        tick: usize,
        location: String,
        reason: String,
    },

    /// Scripted scenario event executed
    ScenarioEventExecuted {
        tick: usize,
        event_type: String,
        details: String,
    },

    /// Configuration replaced at runtime
    ConfigurationChanged { tick: usize, reseeded: bool },
}

impl Event {
    /// Get the tick when this event occurred
    pub fn tick(&self) -> usize {
        match self {
            Event::IncidentCreated { tick, .. } => *tick,
            Event::IncidentActivated { tick, .. } => *tick,
            Event::ObstacleFallback { tick, .. } => *tick,
            Event::CreationFailed { tick, .. } => *tick,
            Event::IncidentReverted { tick, .. } => *tick,
            Event::RevertDeferred { tick, .. } => *tick,
            Event::IncidentUnrecovered { tick, .. } => *tick,
            Event::TriggerRejected { tick, .. } => *tick,
            Event::ScenarioEventExecuted { tick, .. } => *tick,
            Event::ConfigurationChanged { tick, .. } => *tick,
        }
    }

    /// Get the event type as a string (for filtering/grouping)
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::IncidentCreated { .. } => "IncidentCreated",
            Event::IncidentActivated { .. } => "IncidentActivated",
            Event::ObstacleFallback { .. } => "ObstacleFallback",
            Event::CreationFailed { .. } => "CreationFailed",
            Event::IncidentReverted { .. } => "IncidentReverted",
            Event::RevertDeferred { .. } => "RevertDeferred",
            Event::IncidentUnrecovered { .. } => "IncidentUnrecovered",
            Event::TriggerRejected { .. } => "TriggerRejected",
            Event::ScenarioEventExecuted { .. } => "ScenarioEventExecuted",
            Event::ConfigurationChanged { .. } => "ConfigurationChanged",
        }
    }

    /// Incident this event concerns (if any)
    pub fn incident_id(&self) -> Option<IncidentId> {
        match self {
            Event::IncidentCreated { incident_id, .. }
            | Event::IncidentActivated { incident_id, .. }
            | Event::ObstacleFallback { incident_id, .. }
            | Event::CreationFailed { incident_id, .. }
            | Event::IncidentReverted { incident_id, .. }
            | Event::RevertDeferred { incident_id, .. }
            | Event::IncidentUnrecovered { incident_id, .. } => Some(*incident_id),
            _ => None,
        }
    }

    /// Lane this event concerns (if any)
    pub fn lane_id(&self) -> Option<&str> {
        match self {
            Event::IncidentCreated { lane_id, .. }
            | Event::IncidentActivated { lane_id, .. }
            | Event::ObstacleFallback { lane_id, .. }
            | Event::CreationFailed { lane_id, .. }
            | Event::IncidentReverted { lane_id, .. }
            | Event::RevertDeferred { lane_id, .. }
            | Event::IncidentUnrecovered { lane_id, .. } => Some(lane_id),
            _ => None,
        }
    }
}

/// Event log for storing and querying incident events
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn log(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn events_at_tick(&self, tick: usize) -> Vec<&Event> {
        self.events.iter().filter(|e| e.tick() == tick).collect()
    }

    pub fn events_of_type(&self, event_type: &str) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }

    pub fn events_for_incident(&self, incident_id: IncidentId) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.incident_id() == Some(incident_id))
            .collect()
    }

    pub fn events_for_lane(&self, lane_id: &str) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.lane_id() == Some(lane_id))
            .collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
