//! Trigger requests
//!
//! External callers (a chat front end, a scenario script, a test) ask for an
//! incident at a place instead of waiting for the random generator. A
//! request passes the same concurrency limit as random creation but skips
//! the margin eligibility filter: the caller chose the lane on purpose.

use crate::models::{IncidentKind, InvariantViolation};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Where a requested incident should happen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationHint {
    /// Exact lane id
    Lane(String),

    /// Any free lane of this edge
    Edge(String),

    /// Nearest road position to a geographic point
    Geo { lon: f64, lat: f64 },
}

impl fmt::Display for LocationHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationHint::Lane(id) => write!(f, "lane '{}'", id),
            LocationHint::Edge(id) => write!(f, "edge '{}'", id),
            LocationHint::Geo { lon, lat } => write!(f, "geo ({:.6}, {:.6})", lon, lat),
        }
    }
}

/// Fully specified incident request
///
/// # Example
/// ```
/// use traffic_incident_core_rs::{IncidentKind, IncidentRequest, LocationHint};
///
/// let request = IncidentRequest::at(LocationHint::Lane("E1_0".into()))
///     .with_kind(IncidentKind::Obstacle)
///     .with_duration(50);
/// assert_eq!(request.duration_ticks, Some(50));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRequest {
    pub location: LocationHint,
    /// `None` = draw from the configured kind mix
    #[serde(default)]
    pub kind: Option<IncidentKind>,
    /// `None` = sample from the configured duration range
    #[serde(default)]
    pub duration_ticks: Option<usize>,
    /// Obstacle position along the lane (meters)
    #[serde(default)]
    pub position_m: Option<f64>,
}

impl IncidentRequest {
    pub fn at(location: LocationHint) -> Self {
        Self {
            location,
            kind: None,
            duration_ticks: None,
            position_m: None,
        }
    }

    pub fn with_kind(mut self, kind: IncidentKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_duration(mut self, duration_ticks: usize) -> Self {
        self.duration_ticks = Some(duration_ticks);
        self
    }

    pub fn with_position(mut self, position_m: f64) -> Self {
        self.position_m = Some(position_m);
        self
    }
}

/// Why a trigger request was refused
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Rejected {
    #[error("concurrency limit of {limit} reached")]
    ConcurrencyLimit { limit: usize },

    #[error("unknown location: {0}")]
    UnknownLocation(String),

    #[error("'{0}' is junction-internal")]
    InternalEdge(String),

    #[error("lane '{0}' already hosts an incident")]
    LaneOccupied(String),

    #[error("no free lane at {0}")]
    NoEligibleLane(String),

    #[error("incident could not be applied: {0}")]
    ApplyFailed(String),

    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
}
