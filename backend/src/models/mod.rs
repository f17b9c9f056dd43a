//! Domain models for the incident controller

pub mod event;
pub mod incident;
pub mod invariant;

// Re-exports
pub use event::{CreationSource, Event, EventLog};
pub use incident::{
    CloseOutcome, Incident, IncidentId, IncidentKind, IncidentStatus, ObstaclePlacement,
    PriorState,
};
pub use invariant::InvariantViolation;
