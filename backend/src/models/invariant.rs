//! Invariant violations
//!
//! These indicate a configuration or scheduling bug, never remote flakiness.
//! They are the only failures that escape [`crate::IncidentScheduler::tick`].

use super::incident::{IncidentId, IncidentStatus};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum InvariantViolation {
    #[error("incident {id}: prior state already captured")]
    PriorStateOverwrite { id: IncidentId },

    #[error("incident {id}: illegal transition {from:?} -> {to:?}")]
    IllegalTransition {
        id: IncidentId,
        from: IncidentStatus,
        to: IncidentStatus,
    },

    #[error("incident {id}: obstacle fallback already used")]
    FallbackExhausted { id: IncidentId },

    #[error("edge '{edge_id}' reports zero lanes")]
    ZeroLaneCount { edge_id: String },

    #[error("{active} incidents active or pending, limit is {limit}")]
    ConcurrencyExceeded { active: usize, limit: usize },
}
