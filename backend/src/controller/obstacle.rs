//! Obstacle strategy
//!
//! Spawns a stationary vehicle somewhere inside the lane and holds it at
//! zero speed. Nothing existed at that spot before, so the prior state is
//! always [`PriorState::NoObject`] and revert simply removes the vehicle.
//!
//! A vehicle that was inserted but could neither be held nor removed is
//! recorded on the incident as a stray; [`remove_stray_vehicle`] takes it
//! away once the world lets it.

use super::{ControllerError, IncidentStrategy};
use crate::models::{Incident, IncidentKind, ObstaclePlacement, PriorState};
use crate::remote::safe_call::Target;
use crate::remote::{SafeCall, SimulationControl, VehicleSpawn};
use crate::rng::RngManager;

/// Prefix of every vehicle id the obstacle strategy creates
pub const OBSTACLE_VEHICLE_PREFIX: &str = "__incident_obstacle_";

/// Spawns held vehicles as obstacles
#[derive(Debug, Clone, Default)]
pub struct ObstacleStrategy {
    /// Classes tried in order when the lane has no explicit allowed list
    class_preference: Vec<String>,
}

impl ObstacleStrategy {
    pub fn new(class_preference: Vec<String>) -> Self {
        Self { class_preference }
    }

    /// Vehicle id for an incident's obstacle
    pub fn vehicle_id(incident: &Incident) -> String {
        format!("{}{}", OBSTACLE_VEHICLE_PREFIX, incident.id().as_uuid().simple())
    }

    /// Placement window `[margin, length - margin]`, `None` if empty
    pub fn placement_window(length_m: f64, margin_m: f64) -> Option<(f64, f64)> {
        let low = margin_m.max(0.0);
        let high = length_m - low;
        (high >= low).then_some((low, high))
    }

    /// First class the lane permits
    ///
    /// An explicit allowed list wins; otherwise the first preferred class
    /// that is not disallowed.
    pub fn pick_vehicle_class(&self, allowed: &[String], disallowed: &[String]) -> Option<String> {
        if let Some(first) = allowed.first() {
            return Some(first.clone());
        }
        self.class_preference
            .iter()
            .find(|class| !disallowed.contains(class))
            .cloned()
    }
}

impl IncidentStrategy for ObstacleStrategy {
    fn kind(&self) -> IncidentKind {
        IncidentKind::Obstacle
    }

    fn apply(
        &self,
        sim: &mut dyn SimulationControl,
        incident: &mut Incident,
        rng: &mut RngManager,
    ) -> Result<(), ControllerError> {
        let lane = incident.lane_id().to_string();
        let mut safe = SafeCall::new(sim);

        let length = safe.read("obstacle.read_length", Target::Lane(&lane), |s| {
            s.lane_length(&lane)
        })?;
        let margin = incident.margin_meters();
        let Some((low, high)) = Self::placement_window(length, margin) else {
            return Err(ControllerError::SpawnRejected {
                reason: format!(
                    "lane '{}' of {:.1} m leaves no room inside a {:.1} m margin",
                    lane, length, margin
                ),
            });
        };
        let position_m = match incident.requested_position_m() {
            Some(requested) => requested.clamp(low, high),
            None => rng.uniform(low, high),
        };

        let allowed = safe.read("obstacle.read_allowed", Target::Lane(&lane), |s| {
            s.lane_allowed_classes(&lane)
        })?;
        let disallowed = safe.read("obstacle.read_disallowed", Target::Lane(&lane), |s| {
            s.lane_disallowed_classes(&lane)
        })?;
        let Some(vehicle_class) = self.pick_vehicle_class(&allowed, &disallowed) else {
            return Err(ControllerError::SpawnRejected {
                reason: format!("no vehicle class permitted on lane '{}'", lane),
            });
        };

        incident.capture_prior_state(PriorState::NoObject)?;

        let spawn = VehicleSpawn {
            vehicle_id: Self::vehicle_id(incident),
            lane_id: lane.clone(),
            position_m,
            vehicle_class: vehicle_class.clone(),
        };
        safe.write("obstacle.insert", Target::Lane(&lane), |s| {
            s.insert_stationary_vehicle(&spawn)
        })?;

        let vehicle = spawn.vehicle_id.as_str();
        if let Err(err) = safe.write("obstacle.hold", Target::Vehicle(vehicle), |s| {
            s.hold_vehicle(vehicle)
        }) {
            let removed = safe.write("obstacle.discard", Target::Vehicle(vehicle), |s| {
                s.remove_vehicle(vehicle)
            });
            return match removed {
                Ok(()) => Err(err.into()),
                Err(remove_err) if remove_err.is_not_found() => Err(err.into()),
                Err(remove_err) => {
                    tracing::warn!(
                        incident = %incident.id(),
                        vehicle,
                        error = %remove_err,
                        "could not remove obstacle after hold failure"
                    );
                    incident.record_stray_vehicle(vehicle);
                    Err(ControllerError::Stranded {
                        cause: err,
                        cleanup: remove_err,
                    })
                }
            };
        }

        incident.set_obstacle(ObstaclePlacement {
            vehicle_id: spawn.vehicle_id,
            position_m,
            vehicle_class,
        });
        Ok(())
    }

    fn revert(
        &self,
        sim: &mut dyn SimulationControl,
        incident: &Incident,
    ) -> Result<bool, ControllerError> {
        let Some(placement) = incident.obstacle() else {
            return Ok(false);
        };
        let vehicle = placement.vehicle_id.as_str();
        let mut safe = SafeCall::new(sim);
        match safe.write("obstacle.remove", Target::Vehicle(vehicle), |s| {
            s.remove_vehicle(vehicle)
        }) {
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
        let Some(placement) = incident.obstacle() else {
            return Ok(false);
        };
        let safe = SafeCall::new(sim);
        Ok(safe.exists(Target::Vehicle(&placement.vehicle_id))?)
    }
}

/// Remove the incident's stray vehicle, if any
///
/// A vehicle that is already gone counts as removed.
pub(crate) fn remove_stray_vehicle(
    sim: &mut dyn SimulationControl,
    incident: &mut Incident,
) -> Result<(), ControllerError> {
    let Some(vehicle) = incident.stray_vehicle().map(str::to_string) else {
        return Ok(());
    };
    let mut safe = SafeCall::new(sim);
    match safe.write("obstacle.remove_stray", Target::Vehicle(&vehicle), |s| {
        s.remove_vehicle(&vehicle)
    }) {
        Ok(()) => {}
        Err(err) if err.is_not_found() => {}
        Err(err) => return Err(err.into()),
    }
    incident.clear_stray_vehicle();
    Ok(())
}
