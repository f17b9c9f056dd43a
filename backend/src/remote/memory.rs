//! In-process simulation backend
//!
//! A small, fully deterministic stand-in for the remote traffic simulation.
//! It keeps lanes, edges and vehicles in ordered maps and implements
//! [`SimulationControl`] with the same failure modes the real protocol has.
//!
//! Faults can be scripted per operation name (the trait method name, e.g.
//! `"set_lane_allowed_classes"`): for the next call, for the n-th call from
//! now, or for every call until cleared. Network topology can be changed at runtime to model
//! lanes disappearing mid-run.
//!
//! # Example
//!
//! ```rust
//! use traffic_incident_core_rs::remote::{InMemorySimulation, RemoteError, SimulationControl};
//!
//! let mut sim = InMemorySimulation::new().with_edge("E1", 2, 120.0, 13.9);
//! sim.fail_next("set_lane_max_speed", RemoteError::Protocol("busy".into()));
//!
//! assert!(sim.set_lane_max_speed("E1_0", 0.0).is_err());
//! assert!(sim.set_lane_max_speed("E1_0", 0.0).is_ok());
//! ```

use super::{ObjectKind, RemoteError, RoadPosition, SimulationControl, VehicleSpawn};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Minimum spacing between stationary vehicles on one lane (meters)
const DEFAULT_MIN_GAP_M: f64 = 7.5;

/// Live attributes of one lane
#[derive(Debug, Clone, PartialEq)]
pub struct LaneState {
    pub edge_id: String,
    pub length_m: f64,
    pub max_speed: f64,
    /// Empty = every class permitted
    pub allowed: Vec<String>,
    pub disallowed: Vec<String>,
    pub occupancy: f64,
}

/// A vehicle inserted through the protocol
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleState {
    pub lane_id: String,
    pub position_m: f64,
    pub vehicle_class: String,
    pub held: bool,
}

#[derive(Debug, Default)]
struct FaultPlan {
    /// Scripted outcomes per call; `None` lets that call through
    once: HashMap<String, VecDeque<Option<RemoteError>>>,
    always: HashMap<String, RemoteError>,
}

impl FaultPlan {
    fn take(&mut self, op: &str) -> Option<RemoteError> {
        if let Some(err) = self.always.get(op) {
            return Some(err.clone());
        }
        self.once.get_mut(op).and_then(|queue| queue.pop_front()).flatten()
    }
}

/// Deterministic in-memory implementation of [`SimulationControl`]
#[derive(Debug)]
pub struct InMemorySimulation {
    started: bool,
    lanes: BTreeMap<String, LaneState>,
    edges: BTreeMap<String, Vec<String>>,
    vehicles: BTreeMap<String, VehicleState>,
    geo_anchors: Vec<(f64, f64, RoadPosition)>,
    min_gap_m: f64,
    faults: RefCell<FaultPlan>,
}

impl Default for InMemorySimulation {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySimulation {
    /// Empty, started simulation
    pub fn new() -> Self {
        Self {
            started: true,
            lanes: BTreeMap::new(),
            edges: BTreeMap::new(),
            vehicles: BTreeMap::new(),
            geo_anchors: Vec::new(),
            min_gap_m: DEFAULT_MIN_GAP_M,
            faults: RefCell::new(FaultPlan::default()),
        }
    }

    /// Add an edge with `lane_count` identical lanes named `<edge>_<i>`
    pub fn with_edge(mut self, edge_id: &str, lane_count: usize, length_m: f64, max_speed: f64) -> Self {
        for idx in 0..lane_count {
            self.insert_lane(
                &format!("{}_{}", edge_id, idx),
                LaneState {
                    edge_id: edge_id.to_string(),
                    length_m,
                    max_speed,
                    allowed: Vec::new(),
                    disallowed: Vec::new(),
                    occupancy: 0.0,
                },
            );
        }
        self.edges.entry(edge_id.to_string()).or_default();
        self
    }

    /// Add a single lane with explicit attributes
    pub fn with_lane(mut self, lane_id: &str, state: LaneState) -> Self {
        self.insert_lane(lane_id, state);
        self
    }

    /// Register a geographic anchor used by [`SimulationControl::locate_geo`]
    pub fn with_geo_anchor(mut self, lon: f64, lat: f64, position: RoadPosition) -> Self {
        self.geo_anchors.push((lon, lat, position));
        self
    }

    /// Minimum spacing enforced between inserted vehicles on a lane
    pub fn with_min_vehicle_gap(mut self, gap_m: f64) -> Self {
        self.min_gap_m = gap_m;
        self
    }

    /// Mark the simulation as not started; every call fails with `NotStarted`
    pub fn stopped(mut self) -> Self {
        self.started = false;
        self
    }

    pub fn set_started(&mut self, started: bool) {
        self.started = started;
    }

    pub fn insert_lane(&mut self, lane_id: &str, state: LaneState) {
        let lanes = self.edges.entry(state.edge_id.clone()).or_default();
        if !lanes.iter().any(|l| l == lane_id) {
            lanes.push(lane_id.to_string());
        }
        self.lanes.insert(lane_id.to_string(), state);
    }

    /// Remove a lane from the network at runtime
    ///
    /// Vehicles on the lane go with it; an edge left without lanes vanishes.
    pub fn remove_lane(&mut self, lane_id: &str) -> Option<LaneState> {
        let state = self.lanes.remove(lane_id)?;
        if let Some(lanes) = self.edges.get_mut(&state.edge_id) {
            lanes.retain(|l| l != lane_id);
            if lanes.is_empty() {
                self.edges.remove(&state.edge_id);
            }
        }
        self.vehicles.retain(|_, v| v.lane_id != lane_id);
        Some(state)
    }

    /// Remove a vehicle behind the controller's back
    pub fn despawn_vehicle(&mut self, vehicle_id: &str) -> Option<VehicleState> {
        self.vehicles.remove(vehicle_id)
    }

    pub fn lane(&self, lane_id: &str) -> Option<&LaneState> {
        self.lanes.get(lane_id)
    }

    pub fn lane_mut(&mut self, lane_id: &str) -> Option<&mut LaneState> {
        self.lanes.get_mut(lane_id)
    }

    pub fn vehicle(&self, vehicle_id: &str) -> Option<&VehicleState> {
        self.vehicles.get(vehicle_id)
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    /// Fail the next call of `op` with `err`
    pub fn fail_next(&mut self, op: &str, err: RemoteError) {
        self.faults
            .get_mut()
            .once
            .entry(op.to_string())
            .or_default()
            .push_back(Some(err));
    }

    /// Let the next `n - 1` calls of `op` through and fail the n-th with `err`
    pub fn fail_nth(&mut self, op: &str, n: usize, err: RemoteError) {
        let queue = self.faults.get_mut().once.entry(op.to_string()).or_default();
        queue.extend(std::iter::repeat_with(|| None).take(n.saturating_sub(1)));
        queue.push_back(Some(err));
    }

    /// Fail every call of `op` with `err` until [`Self::clear_faults`]
    pub fn fail_always(&mut self, op: &str, err: RemoteError) {
        self.faults.get_mut().always.insert(op.to_string(), err);
    }

    pub fn clear_faults(&mut self) {
        *self.faults.get_mut() = FaultPlan::default();
    }

    fn guard(&self, op: &str) -> Result<(), RemoteError> {
        if !self.started {
            return Err(RemoteError::NotStarted);
        }
        match self.faults.borrow_mut().take(op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn lane_ref(&self, lane_id: &str) -> Result<&LaneState, RemoteError> {
        self.lanes
            .get(lane_id)
            .ok_or_else(|| RemoteError::not_found(ObjectKind::Lane, lane_id))
    }

    fn lane_ref_mut(&mut self, lane_id: &str) -> Result<&mut LaneState, RemoteError> {
        self.lanes
            .get_mut(lane_id)
            .ok_or_else(|| RemoteError::not_found(ObjectKind::Lane, lane_id))
    }

    fn class_permitted(lane: &LaneState, class: &str) -> bool {
        let allowed = lane.allowed.is_empty() || lane.allowed.iter().any(|c| c == class);
        allowed && !lane.disallowed.iter().any(|c| c == class)
    }
}

impl SimulationControl for InMemorySimulation {
    fn lane_ids(&self) -> Result<Vec<String>, RemoteError> {
        self.guard("lane_ids")?;
        Ok(self.lanes.keys().cloned().collect())
    }

    fn edge_ids(&self) -> Result<Vec<String>, RemoteError> {
        self.guard("edge_ids")?;
        Ok(self.edges.keys().cloned().collect())
    }

    fn lane_exists(&self, lane_id: &str) -> Result<bool, RemoteError> {
        self.guard("lane_exists")?;
        Ok(self.lanes.contains_key(lane_id))
    }

    fn edge_exists(&self, edge_id: &str) -> Result<bool, RemoteError> {
        self.guard("edge_exists")?;
        Ok(self.edges.contains_key(edge_id))
    }

    fn vehicle_exists(&self, vehicle_id: &str) -> Result<bool, RemoteError> {
        self.guard("vehicle_exists")?;
        Ok(self.vehicles.contains_key(vehicle_id))
    }

    fn lane_edge(&self, lane_id: &str) -> Result<String, RemoteError> {
        self.guard("lane_edge")?;
        Ok(self.lane_ref(lane_id)?.edge_id.clone())
    }

    fn lane_length(&self, lane_id: &str) -> Result<f64, RemoteError> {
        self.guard("lane_length")?;
        Ok(self.lane_ref(lane_id)?.length_m)
    }

    fn lane_occupancy(&self, lane_id: &str) -> Result<f64, RemoteError> {
        self.guard("lane_occupancy")?;
        Ok(self.lane_ref(lane_id)?.occupancy)
    }

    fn lane_max_speed(&self, lane_id: &str) -> Result<f64, RemoteError> {
        self.guard("lane_max_speed")?;
        Ok(self.lane_ref(lane_id)?.max_speed)
    }

    fn set_lane_max_speed(&mut self, lane_id: &str, speed: f64) -> Result<(), RemoteError> {
        self.guard("set_lane_max_speed")?;
        if !speed.is_finite() || speed < 0.0 {
            return Err(RemoteError::InvalidArgument(format!("speed {}", speed)));
        }
        self.lane_ref_mut(lane_id)?.max_speed = speed;
        Ok(())
    }

    fn lane_allowed_classes(&self, lane_id: &str) -> Result<Vec<String>, RemoteError> {
        self.guard("lane_allowed_classes")?;
        Ok(self.lane_ref(lane_id)?.allowed.clone())
    }

    fn set_lane_allowed_classes(
        &mut self,
        lane_id: &str,
        classes: &[String],
    ) -> Result<(), RemoteError> {
        self.guard("set_lane_allowed_classes")?;
        self.lane_ref_mut(lane_id)?.allowed = classes.to_vec();
        Ok(())
    }

    fn lane_disallowed_classes(&self, lane_id: &str) -> Result<Vec<String>, RemoteError> {
        self.guard("lane_disallowed_classes")?;
        Ok(self.lane_ref(lane_id)?.disallowed.clone())
    }

    fn set_lane_disallowed_classes(
        &mut self,
        lane_id: &str,
        classes: &[String],
    ) -> Result<(), RemoteError> {
        self.guard("set_lane_disallowed_classes")?;
        self.lane_ref_mut(lane_id)?.disallowed = classes.to_vec();
        Ok(())
    }

    fn edge_lane_count(&self, edge_id: &str) -> Result<usize, RemoteError> {
        self.guard("edge_lane_count")?;
        self.edges
            .get(edge_id)
            .map(|lanes| lanes.len())
            .ok_or_else(|| RemoteError::not_found(ObjectKind::Edge, edge_id))
    }

    fn insert_stationary_vehicle(&mut self, spawn: &VehicleSpawn) -> Result<(), RemoteError> {
        self.guard("insert_stationary_vehicle")?;
        if self.vehicles.contains_key(&spawn.vehicle_id) {
            return Err(RemoteError::InvalidArgument(format!(
                "vehicle '{}' already exists",
                spawn.vehicle_id
            )));
        }
        let lane = self.lane_ref(&spawn.lane_id)?;
        if !(0.0..=lane.length_m).contains(&spawn.position_m) {
            return Err(RemoteError::InvalidArgument(format!(
                "position {} outside lane of length {}",
                spawn.position_m, lane.length_m
            )));
        }
        if !Self::class_permitted(lane, &spawn.vehicle_class) {
            return Err(RemoteError::InvalidArgument(format!(
                "class '{}' not permitted on lane '{}'",
                spawn.vehicle_class, spawn.lane_id
            )));
        }
        let occupied = self.vehicles.values().any(|v| {
            v.lane_id == spawn.lane_id && (v.position_m - spawn.position_m).abs() < self.min_gap_m
        });
        if occupied {
            return Err(RemoteError::InvalidArgument(format!(
                "position {} on lane '{}' is occupied",
                spawn.position_m, spawn.lane_id
            )));
        }

        self.vehicles.insert(
            spawn.vehicle_id.clone(),
            VehicleState {
                lane_id: spawn.lane_id.clone(),
                position_m: spawn.position_m,
                vehicle_class: spawn.vehicle_class.clone(),
                held: false,
            },
        );
        Ok(())
    }

    fn hold_vehicle(&mut self, vehicle_id: &str) -> Result<(), RemoteError> {
        self.guard("hold_vehicle")?;
        let vehicle = self
            .vehicles
            .get_mut(vehicle_id)
            .ok_or_else(|| RemoteError::not_found(ObjectKind::Vehicle, vehicle_id))?;
        vehicle.held = true;
        Ok(())
    }

    fn remove_vehicle(&mut self, vehicle_id: &str) -> Result<(), RemoteError> {
        self.guard("remove_vehicle")?;
        self.vehicles
            .remove(vehicle_id)
            .map(|_| ())
            .ok_or_else(|| RemoteError::not_found(ObjectKind::Vehicle, vehicle_id))
    }

    fn locate_geo(&self, lon: f64, lat: f64) -> Result<RoadPosition, RemoteError> {
        self.guard("locate_geo")?;
        if self.geo_anchors.is_empty() {
            return Err(RemoteError::Protocol("geo lookup not supported".to_string()));
        }
        let dist = |a_lon: f64, a_lat: f64| (a_lon - lon).powi(2) + (a_lat - lat).powi(2);
        self.geo_anchors
            .iter()
            .min_by(|a, b| dist(a.0, a.1).total_cmp(&dist(b.0, b.1)))
            .map(|(_, _, pos)| pos.clone())
            .ok_or_else(|| RemoteError::Protocol("geo lookup failed".to_string()))
    }
}
