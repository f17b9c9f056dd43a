//! Guarded remote invocation
//!
//! [`SafeCall`] wraps every read and write the controllers issue against the
//! simulation. Each call:
//!
//! 1. Confirms the target object exists (itself a guarded remote read)
//! 2. Invokes the operation
//! 3. Converts any remote failure into a [`RemoteCallError`] carrying the
//!    operation name, the target and the underlying cause
//!
//! Nothing here panics or propagates a fault as anything but a `Result`.
//!
//! # Compound operations
//!
//! [`SafeCall::read_then_write`] performs "read old value, then write new
//! value". The read always runs first; when it fails the write is skipped,
//! so a failed compound call leaves the world untouched.
//!
//! # Example
//!
//! ```rust
//! use traffic_incident_core_rs::remote::{InMemorySimulation, SafeCall, SimulationControl};
//! use traffic_incident_core_rs::remote::safe_call::Target;
//!
//! let mut sim = InMemorySimulation::new().with_edge("E1", 2, 100.0, 13.9);
//! let mut safe = SafeCall::new(&mut sim);
//!
//! let old = safe
//!     .read_then_write(
//!         "close_lane_speed",
//!         Target::Lane("E1_0"),
//!         |s| s.lane_max_speed("E1_0"),
//!         |s, _| s.set_lane_max_speed("E1_0", 0.0),
//!     )
//!     .unwrap();
//! assert_eq!(old, 13.9);
//!
//! let missing = safe.read("max_speed", Target::Lane("nope_0"), |s| s.lane_max_speed("nope_0"));
//! assert!(missing.unwrap_err().is_not_found());
//! ```

use super::{ObjectKind, RemoteError, SimulationControl};
use std::fmt;
use thiserror::Error;

/// Object a guarded call is directed at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<'a> {
    Lane(&'a str),
    Edge(&'a str),
    Vehicle(&'a str),
    /// Whole-network queries (enumeration); no existence check
    Network,
}

impl Target<'_> {
    fn kind(&self) -> Option<ObjectKind> {
        match self {
            Target::Lane(_) => Some(ObjectKind::Lane),
            Target::Edge(_) => Some(ObjectKind::Edge),
            Target::Vehicle(_) => Some(ObjectKind::Vehicle),
            Target::Network => None,
        }
    }

    fn id(&self) -> &str {
        match self {
            Target::Lane(id) | Target::Edge(id) | Target::Vehicle(id) => id,
            Target::Network => "network",
        }
    }
}

impl fmt::Display for Target<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            Some(kind) => write!(f, "{} '{}'", kind, self.id()),
            None => write!(f, "network"),
        }
    }
}

/// Typed failure of a guarded remote call
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{operation} on {} failed: {cause}", describe_target(.target_kind, .target_id))]
pub struct RemoteCallError {
    /// Name of the logical operation (e.g. `lane_block.close_speed`)
    pub operation: &'static str,
    pub target_kind: Option<ObjectKind>,
    pub target_id: String,
    pub cause: RemoteError,
}

fn describe_target(kind: &Option<ObjectKind>, id: &str) -> String {
    match kind {
        Some(kind) => format!("{} '{}'", kind, id),
        None => "network".to_string(),
    }
}

impl RemoteCallError {
    pub fn new(operation: &'static str, target: Target<'_>, cause: RemoteError) -> Self {
        Self {
            operation,
            target_kind: target.kind(),
            target_id: target.id().to_string(),
            cause,
        }
    }

    /// True if the target (or a dependent object) no longer exists
    pub fn is_not_found(&self) -> bool {
        self.cause.is_not_found()
    }
}

/// Guarded access to a [`SimulationControl`] implementation
pub struct SafeCall<'a, S: SimulationControl + ?Sized> {
    sim: &'a mut S,
}

impl<'a, S: SimulationControl + ?Sized> SafeCall<'a, S> {
    pub fn new(sim: &'a mut S) -> Self {
        Self { sim }
    }

    /// Guarded existence check
    ///
    /// `Target::Network` always exists.
    pub fn exists(&self, target: Target<'_>) -> Result<bool, RemoteCallError> {
        let result = match target {
            Target::Lane(id) => self.sim.lane_exists(id),
            Target::Edge(id) => self.sim.edge_exists(id),
            Target::Vehicle(id) => self.sim.vehicle_exists(id),
            Target::Network => Ok(true),
        };
        result.map_err(|cause| Self::failure("exists", target, cause))
    }

    /// Guarded read
    pub fn read<T>(
        &self,
        operation: &'static str,
        target: Target<'_>,
        op: impl FnOnce(&S) -> Result<T, RemoteError>,
    ) -> Result<T, RemoteCallError> {
        self.ensure_exists(operation, target)?;
        op(&*self.sim).map_err(|cause| Self::failure(operation, target, cause))
    }

    /// Guarded command
    pub fn write<T>(
        &mut self,
        operation: &'static str,
        target: Target<'_>,
        op: impl FnOnce(&mut S) -> Result<T, RemoteError>,
    ) -> Result<T, RemoteCallError> {
        self.ensure_exists(operation, target)?;
        op(&mut *self.sim).map_err(|cause| Self::failure(operation, target, cause))
    }

    /// Guarded compound "read old value, then write new value"
    ///
    /// Returns the value read before the write. If the existence check or
    /// the read fails, the write is never attempted.
    pub fn read_then_write<R, W>(
        &mut self,
        operation: &'static str,
        target: Target<'_>,
        read: impl FnOnce(&S) -> Result<R, RemoteError>,
        write: impl FnOnce(&mut S, &R) -> Result<W, RemoteError>,
    ) -> Result<R, RemoteCallError> {
        let old = self.read(operation, target, read)?;
        write(&mut *self.sim, &old).map_err(|cause| Self::failure(operation, target, cause))?;
        Ok(old)
    }

    fn ensure_exists(
        &self,
        operation: &'static str,
        target: Target<'_>,
    ) -> Result<(), RemoteCallError> {
        let exists = self
            .exists(target)
            .map_err(|e| Self::failure(operation, target, e.cause))?;
        if exists {
            return Ok(());
        }
        match target.kind() {
            Some(kind) => Err(Self::failure(
                operation,
                target,
                RemoteError::not_found(kind, target.id()),
            )),
            None => Ok(()),
        }
    }

    fn failure(operation: &'static str, target: Target<'_>, cause: RemoteError) -> RemoteCallError {
        tracing::debug!(operation, %target, %cause, "remote call failed");
        RemoteCallError::new(operation, target, cause)
    }
}
