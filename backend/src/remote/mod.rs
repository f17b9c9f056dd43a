//! Simulation Control Protocol
//!
//! The traffic simulation runs out of process and is reached through a
//! stateful request/response protocol against live network, lane and vehicle
//! objects. This module defines that boundary:
//!
//! - [`SimulationControl`]: the protocol, one method per remote call
//! - [`RemoteError`]: what a remote call can fail with
//! - [`safe_call`]: the guarded wrapper that is the ONLY caller of the protocol
//! - [`memory`]: an in-process implementation with fault injection
//!
//! # Critical Invariants
//!
//! 1. Every call may fail (object vanished, simulation not started, bad call)
//! 2. Calls are synchronous and complete within the current tick
//! 3. Only the incident controllers mutate world state, and only through
//!    [`safe_call::SafeCall`]

pub mod memory;
pub mod safe_call;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use memory::InMemorySimulation;
pub use safe_call::{RemoteCallError, SafeCall};

/// Kind of remote object a call refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Lane,
    Edge,
    Vehicle,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Lane => write!(f, "lane"),
            ObjectKind::Edge => write!(f, "edge"),
            ObjectKind::Vehicle => write!(f, "vehicle"),
        }
    }
}

/// Failure reported by the remote simulation
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RemoteError {
    /// Referenced lane/edge/vehicle does not exist (or no longer exists)
    #[error("{kind} '{id}' not found")]
    ObjectNotFound { kind: ObjectKind, id: String },

    /// The simulation has not been started (or was already closed)
    #[error("simulation not started")]
    NotStarted,

    /// Malformed or unsupported call
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Remote rejected an argument (occupied position, bad class, ...)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl RemoteError {
    /// Shorthand for a missing object
    pub fn not_found(kind: ObjectKind, id: impl Into<String>) -> Self {
        RemoteError::ObjectNotFound {
            kind,
            id: id.into(),
        }
    }

    /// True if the failure means the object is gone
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::ObjectNotFound { .. })
    }
}

/// Stationary vehicle to insert on a lane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleSpawn {
    pub vehicle_id: String,
    pub lane_id: String,
    /// Offset from the lane start (meters)
    pub position_m: f64,
    /// Vehicle class the lane must permit
    pub vehicle_class: String,
}

/// Road coordinates resolved from a geographic point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoadPosition {
    pub edge_id: String,
    pub lane_index: usize,
    /// Offset along the lane (meters)
    pub position_m: f64,
}

impl RoadPosition {
    /// Lane id following the `<edge>_<index>` naming convention
    pub fn lane_id(&self) -> String {
        format!("{}_{}", self.edge_id, self.lane_index)
    }
}

/// Synchronous remote-control protocol of the traffic simulation
///
/// Read calls take `&self`, commands take `&mut self`. An implementation is
/// a thin adapter over the actual transport; it does not retry and does not
/// cache.
///
/// Empty `allowed` class lists follow the simulator convention of "every
/// class permitted", so a full closure is expressed through the disallowed
/// list instead. The controller never writes an empty allowed list except to
/// restore a prior empty list.
pub trait SimulationControl {
    /// All lane ids of the loaded network
    fn lane_ids(&self) -> Result<Vec<String>, RemoteError>;

    /// All edge ids of the loaded network
    fn edge_ids(&self) -> Result<Vec<String>, RemoteError>;

    fn lane_exists(&self, lane_id: &str) -> Result<bool, RemoteError>;

    fn edge_exists(&self, edge_id: &str) -> Result<bool, RemoteError>;

    fn vehicle_exists(&self, vehicle_id: &str) -> Result<bool, RemoteError>;

    /// Edge a lane belongs to
    fn lane_edge(&self, lane_id: &str) -> Result<String, RemoteError>;

    /// Lane length in meters
    fn lane_length(&self, lane_id: &str) -> Result<f64, RemoteError>;

    /// Fraction of the lane currently occupied by vehicles, in [0, 1]
    fn lane_occupancy(&self, lane_id: &str) -> Result<f64, RemoteError>;

    fn lane_max_speed(&self, lane_id: &str) -> Result<f64, RemoteError>;

    fn set_lane_max_speed(&mut self, lane_id: &str, speed: f64) -> Result<(), RemoteError>;

    fn lane_allowed_classes(&self, lane_id: &str) -> Result<Vec<String>, RemoteError>;

    fn set_lane_allowed_classes(
        &mut self,
        lane_id: &str,
        classes: &[String],
    ) -> Result<(), RemoteError>;

    fn lane_disallowed_classes(&self, lane_id: &str) -> Result<Vec<String>, RemoteError>;

    fn set_lane_disallowed_classes(
        &mut self,
        lane_id: &str,
        classes: &[String],
    ) -> Result<(), RemoteError>;

    /// Number of lanes on an edge
    fn edge_lane_count(&self, edge_id: &str) -> Result<usize, RemoteError>;

    /// Insert a vehicle that starts stationary at the given lane position
    fn insert_stationary_vehicle(&mut self, spawn: &VehicleSpawn) -> Result<(), RemoteError>;

    /// Command a vehicle to hold zero speed indefinitely
    fn hold_vehicle(&mut self, vehicle_id: &str) -> Result<(), RemoteError>;

    fn remove_vehicle(&mut self, vehicle_id: &str) -> Result<(), RemoteError>;

    /// Map a geographic point to the nearest road position
    ///
    /// Not every simulation exposes geo conversion; the default reports the
    /// call as unsupported.
    fn locate_geo(&self, lon: f64, lat: f64) -> Result<RoadPosition, RemoteError> {
        let _ = (lon, lat);
        Err(RemoteError::Protocol("geo lookup not supported".to_string()))
    }
}

/// True for junction-internal edges, which never host incidents
pub fn is_internal_edge(edge_id: &str) -> bool {
    edge_id.starts_with(':')
}

/// Lane index parsed from a `<edge>_<index>` lane id (0 when unparsable)
pub fn lane_index_from_id(lane_id: &str) -> usize {
    lane_id
        .rsplit_once('_')
        .and_then(|(_, idx)| idx.parse().ok())
        .unwrap_or(0)
}
