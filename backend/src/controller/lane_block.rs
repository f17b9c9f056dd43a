//! Lane block strategy
//!
//! Closes a lane by dropping its max speed to zero and restricting the
//! vehicle classes that may use it.
//!
//! Apply order:
//! 1. Read max speed, allowed and disallowed classes (no mutation yet)
//! 2. Capture them as the incident's prior state
//! 3. Write max speed = 0
//! 4. Write the class restriction; on failure write the old speed back
//!
//! If that rollback fails too the lane stays closed. The error is
//! [`ControllerError::Stranded`] and the captured prior state is kept so the
//! controller can hand the incident to the revert retry policy.
//!
//! Revert writes every captured value back. A lane that no longer exists
//! counts as reverted.

use super::{ControllerError, IncidentStrategy};
use crate::models::{Incident, IncidentKind, PriorState};
use crate::remote::safe_call::Target;
use crate::remote::{RemoteCallError, SafeCall, SimulationControl};
use crate::rng::RngManager;

/// Closes a lane in place
#[derive(Debug, Clone, Default)]
pub struct LaneBlockStrategy {
    /// Classes written to the disallowed list when a block permits nothing
    closed_classes: Vec<String>,
}

impl LaneBlockStrategy {
    pub fn new(closed_classes: Vec<String>) -> Self {
        Self { closed_classes }
    }

    pub fn closed_classes(&self) -> &[String] {
        &self.closed_classes
    }

    fn restrict_classes(
        &self,
        safe: &mut SafeCall<'_, dyn SimulationControl + '_>,
        lane: &str,
        incident: &Incident,
    ) -> Result<(), RemoteCallError> {
        let permitted = incident.allowed_classes();
        if permitted.is_empty() {
            safe.write("lane_block.close_classes", Target::Lane(lane), |s| {
                s.set_lane_disallowed_classes(lane, &self.closed_classes)
            })
        } else {
            safe.write("lane_block.restrict_classes", Target::Lane(lane), |s| {
                s.set_lane_allowed_classes(lane, permitted)
            })
        }
    }
}

impl IncidentStrategy for LaneBlockStrategy {
    fn kind(&self) -> IncidentKind {
        IncidentKind::LaneBlock
    }

    fn apply(
        &self,
        sim: &mut dyn SimulationControl,
        incident: &mut Incident,
        _rng: &mut RngManager,
    ) -> Result<(), ControllerError> {
        let lane = incident.lane_id().to_string();
        let mut safe = SafeCall::new(sim);

        let max_speed = safe.read("lane_block.read_speed", Target::Lane(&lane), |s| {
            s.lane_max_speed(&lane)
        })?;
        let allowed_classes = safe.read("lane_block.read_allowed", Target::Lane(&lane), |s| {
            s.lane_allowed_classes(&lane)
        })?;
        let disallowed_classes = safe.read("lane_block.read_disallowed", Target::Lane(&lane), |s| {
            s.lane_disallowed_classes(&lane)
        })?;

        incident.capture_prior_state(PriorState::Lane {
            max_speed,
            allowed_classes,
            disallowed_classes,
        })?;

        safe.write("lane_block.close_speed", Target::Lane(&lane), |s| {
            s.set_lane_max_speed(&lane, 0.0)
        })?;

        if let Err(err) = self.restrict_classes(&mut safe, &lane, incident) {
            let rollback = safe.write("lane_block.rollback_speed", Target::Lane(&lane), |s| {
                s.set_lane_max_speed(&lane, max_speed)
            });
            return match rollback {
                Ok(()) => Err(err.into()),
                Err(rollback_err) => {
                    tracing::warn!(
                        incident = %incident.id(),
                        lane = %lane,
                        error = %rollback_err,
                        "speed rollback failed after class restriction failure"
                    );
                    Err(ControllerError::Stranded {
                        cause: err,
                        cleanup: rollback_err,
                    })
                }
            };
        }

        Ok(())
    }

    fn revert(
        &self,
        sim: &mut dyn SimulationControl,
        incident: &Incident,
    ) -> Result<bool, ControllerError> {
        let Some(PriorState::Lane {
            max_speed,
            allowed_classes,
            disallowed_classes,
        }) = incident.prior_state()
        else {
            // Never applied: nothing to write back
            return Ok(false);
        };
        let lane = incident.lane_id();
        let mut safe = SafeCall::new(sim);

        let restored = safe
            .write("lane_block.restore_speed", Target::Lane(lane), |s| {
                s.set_lane_max_speed(lane, *max_speed)
            })
            .and_then(|_| {
                safe.write("lane_block.restore_allowed", Target::Lane(lane), |s| {
                    s.set_lane_allowed_classes(lane, allowed_classes)
                })
            })
            .and_then(|_| {
                safe.write("lane_block.restore_disallowed", Target::Lane(lane), |s| {
                    s.set_lane_disallowed_classes(lane, disallowed_classes)
                })
            });

        match restored {
            Ok(()) => Ok(false),
            Err(err) if err.is_not_found() => Ok(true),
            Err(err) => Err(err.into()),
        }
    }

    fn is_active(
        &self,
        sim: &mut dyn SimulationControl,
        incident: &Incident,
    ) -> Result<bool, ControllerError> {
        if !incident.is_active() {
            return Ok(false);
        }
        let lane = incident.lane_id();
        let safe = SafeCall::new(sim);
        match safe.read("lane_block.read_speed", Target::Lane(lane), |s| s.lane_max_speed(lane)) {
            Ok(speed) => Ok(speed == 0.0),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{InMemorySimulation, RemoteError};

    fn strategy() -> LaneBlockStrategy {
        LaneBlockStrategy::new(vec!["passenger".to_string(), "truck".to_string()])
    }

    #[test]
    fn test_full_closure_writes_disallowed_list() {
        let mut sim = InMemorySimulation::new().with_edge("E1", 2, 100.0, 13.9);
        let mut incident = Incident::new(IncidentKind::LaneBlock, "E1", "E1_0", 0, 10);
        let mut rng = RngManager::new(1);

        strategy().apply(&mut sim, &mut incident, &mut rng).unwrap();

        let lane = sim.lane("E1_0").unwrap();
        assert_eq!(lane.max_speed, 0.0);
        assert!(lane.allowed.is_empty());
        assert_eq!(lane.disallowed, vec!["passenger", "truck"]);
    }

    #[test]
    fn test_partial_closure_writes_allowed_list() {
        let mut sim = InMemorySimulation::new().with_edge("E1", 1, 100.0, 13.9);
        let mut incident = Incident::new(IncidentKind::LaneBlock, "E1", "E1_0", 0, 10)
            .with_allowed_classes(["emergency"]);
        let mut rng = RngManager::new(1);

        strategy().apply(&mut sim, &mut incident, &mut rng).unwrap();

        assert_eq!(sim.lane("E1_0").unwrap().allowed, vec!["emergency"]);
        assert!(sim.lane("E1_0").unwrap().disallowed.is_empty());
    }

    #[test]
    fn test_failed_read_leaves_lane_untouched() {
        let mut sim = InMemorySimulation::new().with_edge("E1", 1, 100.0, 13.9);
        sim.fail_next("lane_allowed_classes", RemoteError::Protocol("busy".into()));
        let mut incident = Incident::new(IncidentKind::LaneBlock, "E1", "E1_0", 0, 10);
        let mut rng = RngManager::new(1);

        let err = strategy().apply(&mut sim, &mut incident, &mut rng).unwrap_err();

        assert!(matches!(err, ControllerError::Remote(_)));
        assert!(incident.prior_state().is_none());
        assert_eq!(sim.lane("E1_0").unwrap().max_speed, 13.9);
    }

    #[test]
    fn test_revert_of_unapplied_incident_is_noop() {
        let mut sim = InMemorySimulation::new();
        let incident = Incident::new(IncidentKind::LaneBlock, "E1", "E1_0", 0, 10);
        assert!(!strategy().revert(&mut sim, &incident).unwrap());
    }
}
