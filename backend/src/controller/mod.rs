//! Incident controller
//!
//! Applies and reverts a single incident against the simulation. Two
//! interchangeable strategies implement the same contract:
//!
//! - [`LaneBlockStrategy`]: max speed 0 + class restriction
//! - [`ObstacleStrategy`]: stationary held vehicle
//!
//! [`IncidentController`] picks the strategy from the incident's kind and
//! owns the Obstacle → LaneBlock fallback: when an obstacle cannot be
//! spawned the same incident is rewritten as a lane block and applied again,
//! at most once.
//!
//! # Guarantees
//!
//! - A strategy that returns `Err` from `apply` has left the world as it
//!   found it, unless the error is [`ControllerError::Stranded`].
//! - Only `InvariantViolation`s escape [`IncidentController::apply`]; every
//!   other failure ends as a closed incident with a creation-failure outcome,
//!   or as a Reverting one when apply left something behind.
//! - Reverting a Closed incident is a no-op.

pub mod lane_block;
pub mod obstacle;

pub use lane_block::LaneBlockStrategy;
pub use obstacle::{ObstacleStrategy, OBSTACLE_VEHICLE_PREFIX};

use crate::models::{CloseOutcome, Incident, IncidentKind, IncidentStatus, InvariantViolation};
use crate::remote::{RemoteCallError, SimulationControl};
use crate::rng::RngManager;
use thiserror::Error;

/// Vehicle classes known to the simulator, in spawn preference order
pub const DEFAULT_VEHICLE_CLASSES: &[&str] = &[
    "passenger",
    "bus",
    "delivery",
    "authority",
    "taxi",
    "motorcycle",
    "evehicle",
    "emergency",
    "truck",
    "trailer",
    "coach",
    "tram",
    "rail_urban",
];

/// Controller errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ControllerError {
    #[error(transparent)]
    Remote(#[from] RemoteCallError),

    #[error("obstacle spawn rejected: {reason}")]
    SpawnRejected { reason: String },

    /// Apply failed and undoing its partial work failed as well
    #[error("{cause}; cleanup also failed: {cleanup}")]
    Stranded {
        cause: RemoteCallError,
        cleanup: RemoteCallError,
    },

    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
}

/// Capability shared by every incident strategy
pub trait IncidentStrategy {
    /// Kind of incident this strategy realizes
    fn kind(&self) -> IncidentKind;

    /// Mutate the world to realize the incident
    ///
    /// Must capture the incident's prior state before the first mutation.
    /// On `Err` the world is left as it was found.
    fn apply(
        &self,
        sim: &mut dyn SimulationControl,
        incident: &mut Incident,
        rng: &mut RngManager,
    ) -> Result<(), ControllerError>;

    /// Restore the prior state
    ///
    /// Returns `true` when the target had already vanished (nothing to
    /// restore), `false` when state was written back.
    fn revert(
        &self,
        sim: &mut dyn SimulationControl,
        incident: &Incident,
    ) -> Result<bool, ControllerError>;

    /// Whether the disruption is still visible in the world
    fn is_active(
        &self,
        sim: &mut dyn SimulationControl,
        incident: &Incident,
    ) -> Result<bool, ControllerError>;
}

/// Result of [`IncidentController::apply`]
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// Incident is Active
    Activated {
        /// Why the obstacle was abandoned, if the fallback ran
        fallback_reason: Option<String>,
    },

    /// Incident never became Active
    ///
    /// Closed with [`CloseOutcome::CreationFailed`], or Reverting when
    /// `cleanup_pending` is set because apply left part of its work in the
    /// world.
    Failed {
        fallback_reason: Option<String>,
        reason: String,
        cleanup_pending: bool,
    },
}

impl ApplyOutcome {
    pub fn is_activated(&self) -> bool {
        matches!(self, ApplyOutcome::Activated { .. })
    }

    pub fn cleanup_pending(&self) -> bool {
        matches!(
            self,
            ApplyOutcome::Failed {
                cleanup_pending: true,
                ..
            }
        )
    }

    pub fn fallback_reason(&self) -> Option<&str> {
        match self {
            ApplyOutcome::Activated { fallback_reason } | ApplyOutcome::Failed { fallback_reason, .. } => {
                fallback_reason.as_deref()
            }
        }
    }
}

/// Result of a successful [`IncidentController::revert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevertOutcome {
    /// Prior state written back (or nothing had been applied)
    Restored,

    /// Lane or vehicle had already vanished; counted as reverted
    TargetMissing,

    /// Incident was already Closed; nothing happened
    AlreadyClosed,
}

/// Dispatches incidents to their strategy
#[derive(Debug, Clone)]
pub struct IncidentController {
    lane_block: LaneBlockStrategy,
    obstacle: ObstacleStrategy,
}

impl Default for IncidentController {
    fn default() -> Self {
        let classes: Vec<String> = DEFAULT_VEHICLE_CLASSES.iter().map(|c| c.to_string()).collect();
        Self::new(classes)
    }
}

impl IncidentController {
    /// Controller using `vehicle_classes` both as the obstacle spawn
    /// preference and as the list disallowed on fully closed lanes
    pub fn new(vehicle_classes: Vec<String>) -> Self {
        Self {
            lane_block: LaneBlockStrategy::new(vehicle_classes.clone()),
            obstacle: ObstacleStrategy::new(vehicle_classes),
        }
    }

    pub fn strategy(&self, kind: IncidentKind) -> &dyn IncidentStrategy {
        match kind {
            IncidentKind::LaneBlock => &self.lane_block,
            IncidentKind::Obstacle => &self.obstacle,
        }
    }

    /// Apply a Pending incident
    ///
    /// On return the incident is Active or Closed. An obstacle that cannot
    /// be spawned falls back to a lane block on the same incident.
    pub fn apply(
        &self,
        sim: &mut dyn SimulationControl,
        incident: &mut Incident,
        rng: &mut RngManager,
    ) -> Result<ApplyOutcome, InvariantViolation> {
        if incident.status() != IncidentStatus::Pending {
            return Err(InvariantViolation::IllegalTransition {
                id: incident.id(),
                from: incident.status(),
                to: IncidentStatus::Active,
            });
        }

        let first = self.strategy(incident.kind()).apply(sim, incident, rng);
        let err = match first {
            Ok(()) => {
                incident.activate()?;
                return Ok(ApplyOutcome::Activated {
                    fallback_reason: None,
                });
            }
            Err(ControllerError::Invariant(violation)) => return Err(violation),
            Err(err) => err,
        };

        if incident.kind() != IncidentKind::Obstacle {
            return Self::fail(incident, &err, None);
        }

        let fallback_reason = err.to_string();
        tracing::debug!(
            incident = %incident.id(),
            lane = incident.lane_id(),
            reason = %fallback_reason,
            "obstacle failed, falling back to lane block"
        );
        incident.rewrite_as_lane_block()?;

        match self.lane_block.apply(sim, incident, rng) {
            Ok(()) => {
                incident.activate()?;
                Ok(ApplyOutcome::Activated {
                    fallback_reason: Some(fallback_reason),
                })
            }
            Err(ControllerError::Invariant(violation)) => Err(violation),
            Err(err) => Self::fail(incident, &err, Some(fallback_reason)),
        }
    }

    /// End a failed apply
    ///
    /// Closes the incident, unless the world still carries a closed lane or
    /// a stray vehicle; then it goes to Reverting so the normal revert retry
    /// policy restores the prior state.
    fn fail(
        incident: &mut Incident,
        err: &ControllerError,
        fallback_reason: Option<String>,
    ) -> Result<ApplyOutcome, InvariantViolation> {
        let reason = err.to_string();
        let cleanup_pending =
            matches!(err, ControllerError::Stranded { .. }) || incident.stray_vehicle().is_some();

        if cleanup_pending {
            incident.begin_cleanup()?;
        } else {
            incident.close(CloseOutcome::CreationFailed {
                reason: reason.clone(),
            });
        }
        Ok(ApplyOutcome::Failed {
            fallback_reason,
            reason,
            cleanup_pending,
        })
    }

    /// Revert an incident
    ///
    /// Success closes the incident. On failure the incident stays Reverting
    /// so the caller can retry.
    pub fn revert(
        &self,
        sim: &mut dyn SimulationControl,
        incident: &mut Incident,
    ) -> Result<RevertOutcome, ControllerError> {
        match incident.status() {
            IncidentStatus::Closed => return Ok(RevertOutcome::AlreadyClosed),
            IncidentStatus::Pending => {
                incident.close(CloseOutcome::Reverted);
                return Ok(RevertOutcome::Restored);
            }
            IncidentStatus::Active | IncidentStatus::Reverting => {}
        }

        incident.begin_revert()?;
        let target_missing = self.strategy(incident.kind()).revert(sim, incident)?;
        obstacle::remove_stray_vehicle(sim, incident)?;
        incident.close(CloseOutcome::Reverted);

        Ok(if target_missing {
            RevertOutcome::TargetMissing
        } else {
            RevertOutcome::Restored
        })
    }

    /// Whether the incident's disruption is still visible in the world
    pub fn is_active(
        &self,
        sim: &mut dyn SimulationControl,
        incident: &Incident,
    ) -> Result<bool, ControllerError> {
        self.strategy(incident.kind()).is_active(sim, incident)
    }
}
