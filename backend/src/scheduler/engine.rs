//! Scheduler engine - the incident tick loop
//!
//! [`IncidentScheduler`] owns the simulation handle, the tracked incidents,
//! the RNG and the event log. Each call to [`IncidentScheduler::tick`] runs
//! the same fixed sequence, so a run is fully reproducible from its seed and
//! the world it drives.

use super::config::SchedulerConfig;
use super::selection::{choose_lane, eligible_lanes};
use super::trigger::{IncidentRequest, LocationHint, Rejected};
use crate::controller::{ApplyOutcome, ControllerError, IncidentController, RevertOutcome};
use crate::events::{ScenarioEvent, ScenarioEventHandler};
use crate::impact::{EdgeImpactAccumulator, ImpactEstimator};
use crate::models::{
    CloseOutcome, CreationSource, Event, EventLog, Incident, IncidentId, IncidentKind,
    IncidentStatus, InvariantViolation,
};
use crate::remote::safe_call::Target;
use crate::remote::{is_internal_edge, SafeCall, SimulationControl};
use crate::rng::RngManager;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use thiserror::Error;

// ============================================================================
// Errors and Reports
// ============================================================================

/// Failures that escape the scheduler
///
/// Remote flakiness never appears here; it is reported as [`TickWarning`]s.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SchedulerError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),
}

/// Non-fatal problem observed during a tick
#[derive(Debug, Clone, PartialEq)]
pub enum TickWarning {
    /// Incident could not be applied
    ///
    /// Closed, unless `cleanup_pending`: then apply left part of its work in
    /// the world and the incident is reverted like an expired one.
    CreationFailed {
        incident_id: IncidentId,
        lane_id: String,
        reason: String,
        cleanup_pending: bool,
    },

    /// An obstacle vehicle could not be removed after a failed placement;
    /// it is taken away when the incident reverts
    StrayVehicle {
        incident_id: IncidentId,
        lane_id: String,
        vehicle_id: String,
    },

    /// Revert failed; retried next tick
    RevertDeferred {
        incident_id: IncidentId,
        lane_id: String,
        attempt: u32,
        reason: String,
    },

    /// Revert retries exhausted; the lane may still be disrupted
    Unrecovered {
        incident_id: IncidentId,
        lane_id: String,
        attempts: u32,
        reason: String,
    },

    /// A network query failed (lane enumeration, lane inspection, lane counts)
    RemoteQuery { operation: String, reason: String },

    /// A scripted event could not be carried out
    ScenarioEventFailed { event_type: String, reason: String },
}

impl TickWarning {
    pub fn incident_id(&self) -> Option<IncidentId> {
        match self {
            TickWarning::CreationFailed { incident_id, .. }
            | TickWarning::StrayVehicle { incident_id, .. }
            | TickWarning::RevertDeferred { incident_id, .. }
            | TickWarning::Unrecovered { incident_id, .. } => Some(*incident_id),
            _ => None,
        }
    }
}

impl fmt::Display for TickWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TickWarning::CreationFailed {
                incident_id,
                lane_id,
                reason,
                cleanup_pending,
            } => {
                write!(f, "incident {} on '{}' not created: {}", incident_id, lane_id, reason)?;
                if *cleanup_pending {
                    f.write_str(" (reverting leftovers)")?;
                }
                Ok(())
            }
            TickWarning::StrayVehicle {
                incident_id,
                lane_id,
                vehicle_id,
            } => write!(
                f,
                "incident {} left vehicle '{}' on '{}' until revert",
                incident_id, vehicle_id, lane_id
            ),
            TickWarning::RevertDeferred {
                incident_id,
                lane_id,
                attempt,
                reason,
            } => write!(
                f,
                "incident {} on '{}' revert attempt {} failed: {}",
                incident_id, lane_id, attempt, reason
            ),
            TickWarning::Unrecovered {
                incident_id,
                lane_id,
                attempts,
                reason,
            } => write!(
                f,
                "incident {} on '{}' abandoned after {} failed reverts: {}",
                incident_id, lane_id, attempts, reason
            ),
            TickWarning::RemoteQuery { operation, reason } => {
                write!(f, "{} failed: {}", operation, reason)
            }
            TickWarning::ScenarioEventFailed { event_type, reason } => {
                write!(f, "scenario event '{}' failed: {}", event_type, reason)
            }
        }
    }
}

/// Result of a single tick
#[derive(Debug, Clone)]
pub struct TickReport {
    /// Tick number
    pub tick: usize,

    /// Snapshot of every Active incident after the tick
    pub active: Vec<Incident>,

    /// Impact score per disrupted edge, in [0, 1]
    pub edge_impacts: BTreeMap<String, f64>,

    /// Incidents that became Active this tick
    pub created: Vec<IncidentId>,

    /// Incidents that reached Closed this tick (reverted or abandoned)
    pub closed: Vec<IncidentId>,

    pub warnings: Vec<TickWarning>,
}

/// Result of a clear operation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClearReport {
    /// Incidents reverted or abandoned
    pub closed: Vec<IncidentId>,

    /// Incidents whose revert failed; they stay Reverting and are retried on
    /// the next tick
    pub retrying: Vec<IncidentId>,

    pub warnings: Vec<TickWarning>,
}

impl ClearReport {
    pub fn is_complete(&self) -> bool {
        self.retrying.is_empty()
    }
}

/// What one pass over the incidents produced
#[derive(Debug, Default)]
struct PassLog {
    created: Vec<IncidentId>,
    closed: Vec<IncidentId>,
    retrying: Vec<IncidentId>,
    warnings: Vec<TickWarning>,
}

// ============================================================================
// Scheduler
// ============================================================================

/// Owns the incident set and drives it tick by tick
///
/// # Determinism
///
/// All randomness (creation trials, kinds, lanes, durations, obstacle
/// positions, incident ids) comes from one seeded xorshift64* generator.
/// Same seed + same world = same incidents.
///
/// # Example
///
/// ```rust
/// use traffic_incident_core_rs::remote::InMemorySimulation;
/// use traffic_incident_core_rs::{IncidentScheduler, SchedulerConfig};
///
/// let sim = InMemorySimulation::new().with_edge("E1", 2, 200.0, 13.9);
/// let config = SchedulerConfig {
///     spawn_probability_per_tick: 1.0,
///     max_concurrent: 1,
///     ..Default::default()
/// };
/// let mut scheduler = IncidentScheduler::new(sim, config).unwrap();
///
/// let report = scheduler.tick(1).unwrap();
/// assert_eq!(report.active.len(), 1);
/// assert_eq!(scheduler.sim().lane(report.active[0].lane_id()).unwrap().max_speed, 0.0);
/// ```
pub struct IncidentScheduler<S: SimulationControl> {
    /// Remote simulation handle
    sim: S,

    config: SchedulerConfig,

    controller: IncidentController,

    estimator: ImpactEstimator,

    scenario: ScenarioEventHandler,

    /// Deterministic RNG
    rng: RngManager,

    /// Tracked incidents in creation order; Closed ones are dropped at the
    /// end of every pass
    incidents: Vec<Incident>,

    event_log: EventLog,

    /// Last tick passed to `tick`; trigger requests start here
    current_tick: usize,
}

impl<S: SimulationControl> IncidentScheduler<S> {
    /// Create a scheduler driving `sim`
    ///
    /// # Errors
    /// `SchedulerError::InvalidConfig` if the configuration does not validate.
    pub fn new(sim: S, config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;

        Ok(Self {
            controller: IncidentController::new(config.vehicle_class_preference.clone()),
            estimator: ImpactEstimator::new(config.severity),
            scenario: ScenarioEventHandler::new(config.scenario_events.clone()),
            rng: RngManager::new(config.rng_seed),
            sim,
            config,
            incidents: Vec::new(),
            event_log: EventLog::new(),
            current_tick: 0,
        })
    }

    /// Replace the configuration at runtime
    ///
    /// Tracked incidents keep the parameters they were created with. The RNG
    /// is reseeded only when the seed changes. If the new limit is below the
    /// current number of open incidents, no new ones are created until enough
    /// have expired.
    pub fn configure(&mut self, config: SchedulerConfig) -> Result<(), SchedulerError> {
        if let Err(err) = config.validate() {
            tracing::warn!(error = %err, "rejected scheduler configuration");
            return Err(err);
        }

        let reseeded = config.rng_seed != self.config.rng_seed;
        if reseeded {
            self.rng = RngManager::new(config.rng_seed);
        }
        self.controller = IncidentController::new(config.vehicle_class_preference.clone());
        self.estimator = ImpactEstimator::new(config.severity);
        self.scenario = ScenarioEventHandler::new(config.scenario_events.clone());
        self.config = config;

        self.event_log.log(Event::ConfigurationChanged {
            tick: self.current_tick,
            reseeded,
        });
        Ok(())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn current_tick(&self) -> usize {
        self.current_tick
    }

    pub fn sim(&self) -> &S {
        &self.sim
    }

    /// Mutable access to the simulation handle (topology changes, fault
    /// injection). Incidents are not re-validated afterwards.
    pub fn sim_mut(&mut self) -> &mut S {
        &mut self.sim
    }

    pub fn into_sim(self) -> S {
        self.sim
    }

    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    /// Every tracked (not yet Closed) incident, in creation order
    pub fn incidents(&self) -> &[Incident] {
        &self.incidents
    }

    pub fn active_incidents(&self) -> Vec<&Incident> {
        self.incidents.iter().filter(|i| i.is_active()).collect()
    }

    pub fn incident(&self, id: IncidentId) -> Option<&Incident> {
        self.incidents.iter().find(|i| i.id() == id)
    }

    /// Incidents counting toward the concurrency limit (Active ∪ Pending)
    pub fn open_incident_count(&self) -> usize {
        self.incidents
            .iter()
            .filter(|i| i.counts_toward_limit())
            .count()
    }

    /// Current RNG state (for replay checks)
    pub fn rng_state(&self) -> u64 {
        self.rng.get_state()
    }

    // ========================================================================
    // Tick Loop
    // ========================================================================

    /// Execute one scheduler tick
    ///
    /// 1. Expire: revert every due Active incident and retry every Reverting one
    /// 2. Run scenario events scheduled for this tick
    /// 3. Random creation: one Bernoulli trial if below the concurrency limit
    /// 4. Check the concurrency invariant
    /// 5. Score edge impacts and build the report
    ///
    /// # Errors
    /// Only invariant violations. Remote failures become warnings in the
    /// returned report.
    pub fn tick(&mut self, tick: usize) -> Result<TickReport, SchedulerError> {
        self.current_tick = tick;
        let mut pass = PassLog::default();

        // STEP 1: EXPIRE
        for idx in 0..self.incidents.len() {
            let incident = &self.incidents[idx];
            let due = match incident.status() {
                IncidentStatus::Active => incident.is_due(tick),
                IncidentStatus::Reverting => true,
                IncidentStatus::Pending | IncidentStatus::Closed => false,
            };
            if due {
                self.teardown(idx, tick, &mut pass)?;
            }
        }
        self.incidents.retain(|i| !i.is_closed());
        let open_after_expiry = self.open_incident_count();

        // STEP 2: SCENARIO EVENTS
        let scripted: Vec<ScenarioEvent> = self
            .scenario
            .events_for_tick(tick)
            .into_iter()
            .cloned()
            .collect();
        for event in scripted {
            self.run_scenario_event(event, tick, &mut pass)?;
        }

        // STEP 3: RANDOM CREATION
        if self.open_incident_count() < self.config.max_concurrent
            && self.rng.chance(self.config.spawn_probability_per_tick)
        {
            self.create_random(tick, &mut pass)?;
        }

        // STEP 4: CONCURRENCY INVARIANT
        let open = self.open_incident_count();
        let limit = self.config.max_concurrent;
        if open > limit.max(open_after_expiry) {
            return Err(InvariantViolation::ConcurrencyExceeded {
                active: open,
                limit,
            }
            .into());
        }
        self.incidents.retain(|i| !i.is_closed());

        // STEP 5: REPORT
        let edge_impacts = self.edge_impacts(&mut pass.warnings)?;
        Ok(TickReport {
            tick,
            active: self.incidents.iter().filter(|i| i.is_active()).cloned().collect(),
            edge_impacts,
            created: pass.created,
            closed: pass.closed,
            warnings: pass.warnings,
        })
    }

    // ========================================================================
    // Clearing
    // ========================================================================

    /// Revert every tracked incident regardless of its remaining duration
    ///
    /// Incidents whose revert fails stay Reverting and are retried on the
    /// next tick (subject to the retry limit).
    pub fn force_clear_all(&mut self) -> Result<ClearReport, SchedulerError> {
        self.clear_where(|_| true)
    }

    /// Revert one incident by id (empty report if it is not tracked)
    pub fn clear_incident(&mut self, id: IncidentId) -> Result<ClearReport, SchedulerError> {
        self.clear_where(|i| i.id() == id)
    }

    /// Revert whatever incident sits on `lane_id`
    pub fn clear_lane(&mut self, lane_id: &str) -> Result<ClearReport, SchedulerError> {
        self.clear_where(|i| i.lane_id() == lane_id)
    }

    fn clear_where(
        &mut self,
        matches: impl Fn(&Incident) -> bool,
    ) -> Result<ClearReport, SchedulerError> {
        let tick = self.current_tick;
        let mut pass = PassLog::default();
        self.clear_matching(matches, tick, &mut pass)?;
        self.incidents.retain(|i| !i.is_closed());
        Ok(ClearReport {
            closed: pass.closed,
            retrying: pass.retrying,
            warnings: pass.warnings,
        })
    }

    /// Tear down every tracked incident matching `matches`; returns how many
    /// were attempted
    fn clear_matching(
        &mut self,
        matches: impl Fn(&Incident) -> bool,
        tick: usize,
        pass: &mut PassLog,
    ) -> Result<usize, SchedulerError> {
        let mut attempted = 0;
        for idx in 0..self.incidents.len() {
            let incident = &self.incidents[idx];
            if incident.is_closed() || !matches(incident) {
                continue;
            }
            attempted += 1;
            self.teardown(idx, tick, pass)?;
        }
        Ok(attempted)
    }

    /// Revert one incident, applying the retry / force-close policy
    fn teardown(&mut self, idx: usize, tick: usize, pass: &mut PassLog) -> Result<(), SchedulerError> {
        let incident = &mut self.incidents[idx];
        let id = incident.id();
        let lane_id = incident.lane_id().to_string();

        match self.controller.revert(&mut self.sim, incident) {
            Ok(RevertOutcome::AlreadyClosed) => {}
            Ok(outcome) => {
                let target_missing = outcome == RevertOutcome::TargetMissing;
                tracing::debug!(incident = %id, lane = %lane_id, target_missing, "incident reverted");
                self.event_log.log(Event::IncidentReverted {
                    tick,
                    incident_id: id,
                    lane_id,
                    target_missing,
                });
                pass.closed.push(id);
            }
            Err(ControllerError::Invariant(violation)) => return Err(violation.into()),
            Err(err) => {
                let reason = err.to_string();
                let attempts = incident.record_revert_failure();

                if attempts > self.config.max_revert_retries {
                    incident.close(CloseOutcome::Unrecovered {
                        reason: reason.clone(),
                    });
                    tracing::warn!(
                        incident = %id,
                        lane = %lane_id,
                        attempts,
                        error = %reason,
                        "incident could not be reverted and was force-closed"
                    );
                    self.event_log.log(Event::IncidentUnrecovered {
                        tick,
                        incident_id: id,
                        lane_id: lane_id.clone(),
                        attempts,
                        reason: reason.clone(),
                    });
                    pass.warnings.push(TickWarning::Unrecovered {
                        incident_id: id,
                        lane_id,
                        attempts,
                        reason,
                    });
                    pass.closed.push(id);
                } else {
                    tracing::debug!(incident = %id, lane = %lane_id, attempts, error = %reason, "revert deferred");
                    self.event_log.log(Event::RevertDeferred {
                        tick,
                        incident_id: id,
                        lane_id: lane_id.clone(),
                        attempt: attempts,
                        reason: reason.clone(),
                    });
                    pass.warnings.push(TickWarning::RevertDeferred {
                        incident_id: id,
                        lane_id,
                        attempt: attempts,
                        reason,
                    });
                    pass.retrying.push(id);
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Creation
    // ========================================================================

    fn create_random(&mut self, tick: usize, pass: &mut PassLog) -> Result<(), SchedulerError> {
        let kind = self.config.kind_mix.pick(&mut self.rng);

        let candidates = match &self.config.candidate_lanes {
            Some(lanes) => lanes.clone(),
            None => {
                let safe = SafeCall::new(&mut self.sim);
                match safe.read("scheduler.lane_ids", Target::Network, |s| s.lane_ids()) {
                    Ok(lanes) => lanes,
                    Err(err) => {
                        pass.warnings.push(TickWarning::RemoteQuery {
                            operation: err.operation.to_string(),
                            reason: err.to_string(),
                        });
                        return Ok(());
                    }
                }
            }
        };

        let occupied: HashSet<String> = self
            .incidents
            .iter()
            .filter(|i| !i.is_closed())
            .map(|i| i.lane_id().to_string())
            .collect();
        let mut failures = Vec::new();
        let eligible = eligible_lanes(
            &mut self.sim,
            &candidates,
            &occupied,
            self.config.margin_meters,
            &self.config.allowed_classes,
            &mut failures,
        );
        let pick = choose_lane(
            &mut self.sim,
            &mut self.rng,
            &self.config.lane_selection,
            &eligible,
            &mut failures,
        );
        pass.warnings.extend(failures.into_iter().map(|err| TickWarning::RemoteQuery {
            operation: err.operation.to_string(),
            reason: err.to_string(),
        }));
        let Some(pick) = pick else {
            tracing::debug!(tick, candidates = candidates.len(), "no eligible lane for a new incident");
            return Ok(());
        };

        let lane = &eligible[pick];
        let duration = self.config.duration_range.sample(&mut self.rng);
        let incident = self.new_incident(
            kind,
            lane.edge_id.clone(),
            lane.lane_id.clone(),
            tick,
            duration,
            None,
        );
        self.launch(incident, CreationSource::Random, tick, pass)?;
        Ok(())
    }

    fn new_incident(
        &mut self,
        kind: IncidentKind,
        edge_id: String,
        lane_id: String,
        tick: usize,
        duration_ticks: usize,
        position_m: Option<f64>,
    ) -> Incident {
        Incident::new(kind, edge_id, lane_id, tick, duration_ticks)
            .with_id(IncidentId::from_rng(&mut self.rng))
            .with_margin(self.config.margin_meters)
            .with_allowed_classes(self.config.blocked_lane_classes.iter().cloned())
            .with_requested_position(position_m)
    }

    /// Log, apply and (on success) track a freshly created incident
    fn launch(
        &mut self,
        mut incident: Incident,
        source: CreationSource,
        tick: usize,
        pass: &mut PassLog,
    ) -> Result<ApplyOutcome, InvariantViolation> {
        let id = incident.id();
        self.event_log.log(Event::IncidentCreated {
            tick,
            incident_id: id,
            kind: incident.kind(),
            edge_id: incident.edge_id().to_string(),
            lane_id: incident.lane_id().to_string(),
            duration_ticks: incident.duration_ticks(),
            source,
        });

        let outcome = self.controller.apply(&mut self.sim, &mut incident, &mut self.rng)?;

        if let Some(reason) = outcome.fallback_reason() {
            self.event_log.log(Event::ObstacleFallback {
                tick,
                incident_id: id,
                lane_id: incident.lane_id().to_string(),
                reason: reason.to_string(),
            });
        }

        match &outcome {
            ApplyOutcome::Activated { .. } => {
                tracing::debug!(
                    incident = %id,
                    kind = %incident.kind(),
                    lane = incident.lane_id(),
                    until = incident.end_tick(),
                    "incident active"
                );
                self.event_log.log(Event::IncidentActivated {
                    tick,
                    incident_id: id,
                    kind: incident.kind(),
                    lane_id: incident.lane_id().to_string(),
                });
                if let Some(vehicle) = incident.stray_vehicle() {
                    pass.warnings.push(TickWarning::StrayVehicle {
                        incident_id: id,
                        lane_id: incident.lane_id().to_string(),
                        vehicle_id: vehicle.to_string(),
                    });
                }
                pass.created.push(id);
                self.incidents.push(incident);
            }
            ApplyOutcome::Failed {
                reason,
                cleanup_pending,
                ..
            } => {
                if *cleanup_pending {
                    tracing::warn!(incident = %id, lane = incident.lane_id(), error = %reason, "incident creation failed with leftovers in the world");
                } else {
                    tracing::debug!(incident = %id, lane = incident.lane_id(), error = %reason, "incident creation failed");
                }
                self.event_log.log(Event::CreationFailed {
                    tick,
                    incident_id: id,
                    lane_id: incident.lane_id().to_string(),
                    reason: reason.clone(),
                    cleanup_pending: *cleanup_pending,
                });
                pass.warnings.push(TickWarning::CreationFailed {
                    incident_id: id,
                    lane_id: incident.lane_id().to_string(),
                    reason: reason.clone(),
                    cleanup_pending: *cleanup_pending,
                });
                // Reverting: the expire pass restores the prior state
                if *cleanup_pending {
                    self.incidents.push(incident);
                }
            }
        }
        Ok(outcome)
    }

    // ========================================================================
    // Trigger Requests
    // ========================================================================

    /// Create an incident at a location, applied immediately
    ///
    /// The incident starts at the last tick seen by [`Self::tick`]. Kind and
    /// duration come from the configuration.
    pub fn request_incident_at(&mut self, location: LocationHint) -> Result<IncidentId, Rejected> {
        self.request_incident(IncidentRequest::at(location))
    }

    /// Create an incident with explicit overrides, applied immediately
    pub fn request_incident(&mut self, request: IncidentRequest) -> Result<IncidentId, Rejected> {
        let tick = self.current_tick;
        let mut pass = PassLog::default();
        self.submit_request(&request, CreationSource::Trigger, tick, &mut pass)
    }

    fn submit_request(
        &mut self,
        request: &IncidentRequest,
        source: CreationSource,
        tick: usize,
        pass: &mut PassLog,
    ) -> Result<IncidentId, Rejected> {
        let result = self.try_submit(request, source, tick, pass);
        if let Err(rejection) = &result {
            if !matches!(rejection, Rejected::Invariant(_)) {
                tracing::debug!(location = %request.location, reason = %rejection, "incident request rejected");
                self.event_log.log(Event::TriggerRejected {
                    tick,
                    location: request.location.to_string(),
                    reason: rejection.to_string(),
                });
            }
        }
        result
    }

    fn try_submit(
        &mut self,
        request: &IncidentRequest,
        source: CreationSource,
        tick: usize,
        pass: &mut PassLog,
    ) -> Result<IncidentId, Rejected> {
        let limit = self.config.max_concurrent;
        if self.open_incident_count() >= limit {
            return Err(Rejected::ConcurrencyLimit { limit });
        }

        let (edge_id, lane_id, located_at) = self.resolve_location(&request.location)?;
        let position_m = request.position_m.or(located_at);
        let kind = request
            .kind
            .unwrap_or_else(|| self.config.kind_mix.pick(&mut self.rng));
        let duration = request
            .duration_ticks
            .unwrap_or_else(|| self.config.duration_range.sample(&mut self.rng));

        let incident = self.new_incident(kind, edge_id, lane_id, tick, duration, position_m);
        let id = incident.id();
        match self.launch(incident, source, tick, pass)? {
            ApplyOutcome::Activated { .. } => Ok(id),
            ApplyOutcome::Failed { reason, .. } => Err(Rejected::ApplyFailed(reason)),
        }
    }

    /// Resolve a hint to `(edge, lane, position)`
    fn resolve_location(
        &mut self,
        location: &LocationHint,
    ) -> Result<(String, String, Option<f64>), Rejected> {
        let unknown = |detail: String| Rejected::UnknownLocation(format!("{} ({})", location, detail));
        let safe = SafeCall::new(&mut self.sim);

        let (lane_id, position_m) = match location {
            LocationHint::Lane(lane) => (lane.clone(), None),
            LocationHint::Edge(edge) => {
                if is_internal_edge(edge) {
                    return Err(Rejected::InternalEdge(edge.clone()));
                }
                let lanes = safe
                    .read("trigger.edge_lanes", Target::Edge(edge), |s| s.lane_ids())
                    .map_err(|e| unknown(e.cause.to_string()))?;
                let free: Vec<String> = lanes
                    .into_iter()
                    .filter(|lane| !lane_taken(&self.incidents, lane))
                    .filter(|lane| {
                        safe.read("trigger.lane_edge", Target::Lane(lane.as_str()), |s| {
                            s.lane_edge(lane)
                        })
                        .is_ok_and(|owner| owner == *edge)
                    })
                    .collect();
                if free.is_empty() {
                    return Err(Rejected::NoEligibleLane(location.to_string()));
                }
                let pick = self.rng.index(free.len());
                (free[pick].clone(), None)
            }
            LocationHint::Geo { lon, lat } => {
                let road = safe
                    .read("trigger.locate_geo", Target::Network, |s| s.locate_geo(*lon, *lat))
                    .map_err(|e| unknown(e.cause.to_string()))?;
                (road.lane_id(), Some(road.position_m))
            }
        };

        let edge_id = safe
            .read("trigger.lane_edge", Target::Lane(&lane_id), |s| s.lane_edge(&lane_id))
            .map_err(|e| unknown(e.cause.to_string()))?;
        if is_internal_edge(&edge_id) || is_internal_edge(&lane_id) {
            return Err(Rejected::InternalEdge(lane_id));
        }
        if lane_taken(&self.incidents, &lane_id) {
            return Err(Rejected::LaneOccupied(lane_id));
        }
        Ok((edge_id, lane_id, position_m))
    }

    // ========================================================================
    // Scenario Events
    // ========================================================================

    fn run_scenario_event(
        &mut self,
        event: ScenarioEvent,
        tick: usize,
        pass: &mut PassLog,
    ) -> Result<(), SchedulerError> {
        let details = match &event {
            ScenarioEvent::SpawnIncident {
                location,
                kind,
                duration_ticks,
                position_m,
            } => {
                let request = IncidentRequest {
                    location: location.clone(),
                    kind: *kind,
                    duration_ticks: *duration_ticks,
                    position_m: *position_m,
                };
                match self.submit_request(&request, CreationSource::Scenario, tick, pass) {
                    Ok(id) => format!("incident {} at {}", id, location),
                    Err(Rejected::Invariant(violation)) => return Err(violation.into()),
                    Err(rejection) => {
                        pass.warnings.push(TickWarning::ScenarioEventFailed {
                            event_type: event.event_type().to_string(),
                            reason: rejection.to_string(),
                        });
                        format!("rejected at {}: {}", location, rejection)
                    }
                }
            }
            ScenarioEvent::ClearLane { lane_id } => {
                let count = self.clear_matching(|i| i.lane_id() == lane_id, tick, pass)?;
                format!("{} incident(s) cleared on lane '{}'", count, lane_id)
            }
            ScenarioEvent::ClearAll => {
                let count = self.clear_matching(|_| true, tick, pass)?;
                format!("{} incident(s) cleared", count)
            }
        };

        self.event_log.log(Event::ScenarioEventExecuted {
            tick,
            event_type: event.event_type().to_string(),
            details,
        });
        Ok(())
    }

    // ========================================================================
    // Impact
    // ========================================================================

    /// Score every edge hosting an Active or Reverting incident
    fn edge_impacts(
        &mut self,
        warnings: &mut Vec<TickWarning>,
    ) -> Result<BTreeMap<String, f64>, SchedulerError> {
        let mut accumulator = EdgeImpactAccumulator::new();
        for incident in &self.incidents {
            if matches!(
                incident.status(),
                IncidentStatus::Active | IncidentStatus::Reverting
            ) {
                accumulator.add(incident.edge_id(), incident.kind());
            }
        }
        if accumulator.is_empty() {
            return Ok(BTreeMap::new());
        }

        let safe = SafeCall::new(&mut self.sim);
        let scores = accumulator.finish(&self.estimator, |edge| {
            match safe.read("impact.edge_lane_count", Target::Edge(edge), |s| {
                s.edge_lane_count(edge)
            }) {
                Ok(count) => Some(count),
                Err(err) if err.is_not_found() => None,
                Err(err) => {
                    warnings.push(TickWarning::RemoteQuery {
                        operation: err.operation.to_string(),
                        reason: err.to_string(),
                    });
                    None
                }
            }
        })?;
        Ok(scores)
    }
}

fn lane_taken(incidents: &[Incident], lane_id: &str) -> bool {
    incidents
        .iter()
        .any(|i| !i.is_closed() && i.lane_id() == lane_id)
}

impl<S: SimulationControl> fmt::Debug for IncidentScheduler<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncidentScheduler")
            .field("current_tick", &self.current_tick)
            .field("tracked_incidents", &self.incidents.len())
            .field("open_incidents", &self.open_incident_count())
            .field("event_count", &self.event_log.len())
            .finish()
    }
}
