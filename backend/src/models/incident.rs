//! Incident model
//!
//! An incident is a synthetic disruption injected into one lane:
//! - Kind (lane block or stationary obstacle)
//! - Location (edge + lane), resolved once at creation
//! - Scheduling window (start tick + duration in ticks)
//! - Prior state: the lane attributes overridden while the incident is live
//! - Status (Pending → Active → Reverting → Closed)
//!
//! CRITICAL: `prior_state` is captured exactly once per strategy attempt and
//! is what revert writes back. Nothing may replace it while the incident is
//! Active.

use super::invariant::InvariantViolation;
use crate::rng::RngManager;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable incident identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IncidentId(Uuid);

impl IncidentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Identifier drawn from a seeded generator, reproducible across runs
    pub fn from_rng(rng: &mut RngManager) -> Self {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&rng.next().to_be_bytes());
        bytes[8..].copy_from_slice(&rng.next().to_be_bytes());
        Self(uuid::Builder::from_random_bytes(bytes).into_uuid())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Short form used in generated remote object ids
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..12].to_string()
    }
}

impl Default for IncidentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IncidentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for IncidentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(IncidentId)
    }
}

/// How the incident disrupts the lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    /// Lane closed: max speed 0, vehicle classes restricted
    LaneBlock,

    /// Stalled vehicle held at zero speed on the lane
    Obstacle,
}

impl IncidentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentKind::LaneBlock => "lane_block",
            IncidentKind::Obstacle => "obstacle",
        }
    }
}

impl fmt::Display for IncidentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Incident lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IncidentStatus {
    /// Created, not yet applied to the world
    Pending,

    /// Applied; the world is disrupted
    Active,

    /// Revert started (or failed and awaits retry)
    Reverting,

    /// Finished; see [`CloseOutcome`] for how
    Closed,
}

/// Snapshot of everything an incident overrides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PriorState {
    /// Lane attributes before a lane block
    Lane {
        max_speed: f64,
        /// Empty = every class was permitted
        allowed_classes: Vec<String>,
        disallowed_classes: Vec<String>,
    },

    /// Nothing existed at the obstacle position; revert only removes the vehicle
    NoObject,
}

/// Where an obstacle vehicle was placed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObstaclePlacement {
    pub vehicle_id: String,
    pub position_m: f64,
    pub vehicle_class: String,
}

/// Why an incident reached Closed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CloseOutcome {
    /// Reverted normally; the world is restored
    Reverted,

    /// Apply failed; the incident never became Active
    CreationFailed { reason: String },

    /// Revert retries exhausted; the world may still be disrupted
    Unrecovered { reason: String },
}

/// A synthetic traffic incident
///
/// # Example
/// ```
/// use traffic_incident_core_rs::{Incident, IncidentKind, IncidentStatus};
///
/// let incident = Incident::new(IncidentKind::LaneBlock, "E1", "E1_0", 10, 100)
///     .with_margin(5.0);
///
/// assert_eq!(incident.status(), IncidentStatus::Pending);
/// assert_eq!(incident.end_tick(), 110);
/// assert!(!incident.is_due(109));
/// assert!(incident.is_due(110));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    id: IncidentId,
    kind: IncidentKind,
    edge_id: String,
    lane_id: String,
    start_tick: usize,
    duration_ticks: usize,

    /// Classes still permitted while blocked (empty = fully closed)
    allowed_classes: Vec<String>,

    /// Minimum distance from either lane end for placement (meters)
    margin_meters: f64,

    /// Requested obstacle position (meters), if the creator chose one
    requested_position_m: Option<f64>,

    prior_state: Option<PriorState>,
    status: IncidentStatus,
    obstacle: Option<ObstaclePlacement>,

    /// Obstacle vehicle a failed placement could not remove; survives the
    /// lane block fallback so revert can take it away
    stray_vehicle: Option<String>,

    fallback_used: bool,
    revert_attempts: u32,
    outcome: Option<CloseOutcome>,
}

impl Incident {
    /// Create a Pending incident
    pub fn new(
        kind: IncidentKind,
        edge_id: impl Into<String>,
        lane_id: impl Into<String>,
        start_tick: usize,
        duration_ticks: usize,
    ) -> Self {
        Self {
            id: IncidentId::new(),
            kind,
            edge_id: edge_id.into(),
            lane_id: lane_id.into(),
            start_tick,
            duration_ticks,
            allowed_classes: Vec::new(),
            margin_meters: 0.0,
            requested_position_m: None,
            prior_state: None,
            status: IncidentStatus::Pending,
            obstacle: None,
            stray_vehicle: None,
            fallback_used: false,
            revert_attempts: 0,
            outcome: None,
        }
    }

    pub fn with_id(mut self, id: IncidentId) -> Self {
        self.id = id;
        self
    }

    /// Set the classes still permitted while blocked (sorted, deduplicated)
    pub fn with_allowed_classes<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut classes: Vec<String> = classes.into_iter().map(Into::into).collect();
        classes.sort();
        classes.dedup();
        self.allowed_classes = classes;
        self
    }

    pub fn with_margin(mut self, margin_meters: f64) -> Self {
        self.margin_meters = margin_meters.max(0.0);
        self
    }

    pub fn with_requested_position(mut self, position_m: Option<f64>) -> Self {
        self.requested_position_m = position_m;
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn id(&self) -> IncidentId {
        self.id
    }

    pub fn kind(&self) -> IncidentKind {
        self.kind
    }

    pub fn edge_id(&self) -> &str {
        &self.edge_id
    }

    pub fn lane_id(&self) -> &str {
        &self.lane_id
    }

    pub fn start_tick(&self) -> usize {
        self.start_tick
    }

    pub fn duration_ticks(&self) -> usize {
        self.duration_ticks
    }

    pub fn end_tick(&self) -> usize {
        self.start_tick.saturating_add(self.duration_ticks)
    }

    pub fn allowed_classes(&self) -> &[String] {
        &self.allowed_classes
    }

    pub fn margin_meters(&self) -> f64 {
        self.margin_meters
    }

    pub fn requested_position_m(&self) -> Option<f64> {
        self.requested_position_m
    }

    pub fn prior_state(&self) -> Option<&PriorState> {
        self.prior_state.as_ref()
    }

    pub fn status(&self) -> IncidentStatus {
        self.status
    }

    pub fn obstacle(&self) -> Option<&ObstaclePlacement> {
        self.obstacle.as_ref()
    }

    pub fn stray_vehicle(&self) -> Option<&str> {
        self.stray_vehicle.as_deref()
    }

    pub fn fallback_used(&self) -> bool {
        self.fallback_used
    }

    pub fn revert_attempts(&self) -> u32 {
        self.revert_attempts
    }

    pub fn outcome(&self) -> Option<&CloseOutcome> {
        self.outcome.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.status == IncidentStatus::Active
    }

    pub fn is_closed(&self) -> bool {
        self.status == IncidentStatus::Closed
    }

    /// Pending and Active incidents count toward the concurrency limit
    pub fn counts_toward_limit(&self) -> bool {
        matches!(self.status, IncidentStatus::Pending | IncidentStatus::Active)
    }

    /// True once `tick - start_tick >= duration_ticks`
    pub fn is_due(&self, tick: usize) -> bool {
        tick.saturating_sub(self.start_tick) >= self.duration_ticks
    }

    // ========================================================================
    // Lifecycle (driven by the controller)
    // ========================================================================

    /// Record the pre-mutation snapshot
    ///
    /// Allowed once per strategy attempt, and only while Pending.
    pub fn capture_prior_state(&mut self, state: PriorState) -> Result<(), InvariantViolation> {
        if self.status != IncidentStatus::Pending || self.prior_state.is_some() {
            return Err(InvariantViolation::PriorStateOverwrite { id: self.id });
        }
        self.prior_state = Some(state);
        Ok(())
    }

    pub fn set_obstacle(&mut self, placement: ObstaclePlacement) {
        self.obstacle = Some(placement);
    }

    pub fn record_stray_vehicle(&mut self, vehicle_id: impl Into<String>) {
        self.stray_vehicle = Some(vehicle_id.into());
    }

    pub fn clear_stray_vehicle(&mut self) {
        self.stray_vehicle = None;
    }

    /// Obstacle → LaneBlock fallback: same id, new kind, fresh prior state
    pub fn rewrite_as_lane_block(&mut self) -> Result<(), InvariantViolation> {
        if self.status != IncidentStatus::Pending {
            return Err(self.illegal(IncidentStatus::Pending));
        }
        if self.fallback_used {
            return Err(InvariantViolation::FallbackExhausted { id: self.id });
        }
        self.kind = IncidentKind::LaneBlock;
        self.fallback_used = true;
        self.prior_state = None;
        self.obstacle = None;
        Ok(())
    }

    /// Pending → Active
    pub fn activate(&mut self) -> Result<(), InvariantViolation> {
        if self.status != IncidentStatus::Pending {
            return Err(self.illegal(IncidentStatus::Active));
        }
        self.status = IncidentStatus::Active;
        Ok(())
    }

    /// Active/Reverting → Reverting
    pub fn begin_revert(&mut self) -> Result<(), InvariantViolation> {
        match self.status {
            IncidentStatus::Active | IncidentStatus::Reverting => {
                self.status = IncidentStatus::Reverting;
                Ok(())
            }
            _ => Err(self.illegal(IncidentStatus::Reverting)),
        }
    }

    /// Pending → Reverting
    ///
    /// Apply failed but left something behind in the world; the incident is
    /// handed to the revert retry policy instead of being closed.
    pub fn begin_cleanup(&mut self) -> Result<(), InvariantViolation> {
        if self.status != IncidentStatus::Pending {
            return Err(self.illegal(IncidentStatus::Reverting));
        }
        self.status = IncidentStatus::Reverting;
        Ok(())
    }

    /// Count a failed revert attempt; returns the new total
    pub fn record_revert_failure(&mut self) -> u32 {
        self.revert_attempts += 1;
        self.revert_attempts
    }

    /// Any state → Closed
    ///
    /// Closing an already Closed incident keeps the first outcome.
    pub fn close(&mut self, outcome: CloseOutcome) {
        if self.status == IncidentStatus::Closed {
            return;
        }
        self.status = IncidentStatus::Closed;
        self.outcome = Some(outcome);
    }

    fn illegal(&self, to: IncidentStatus) -> InvariantViolation {
        InvariantViolation::IllegalTransition {
            id: self.id,
            from: self.status,
            to,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lane_prior() -> PriorState {
        PriorState::Lane {
            max_speed: 13.9,
            allowed_classes: vec![],
            disallowed_classes: vec![],
        }
    }

    #[test]
    fn test_prior_state_captured_once() {
        let mut incident = Incident::new(IncidentKind::LaneBlock, "E1", "E1_0", 0, 10);
        incident.capture_prior_state(lane_prior()).unwrap();
        assert!(matches!(
            incident.capture_prior_state(lane_prior()),
            Err(InvariantViolation::PriorStateOverwrite { .. })
        ));
    }

    #[test]
    fn test_prior_state_not_overwritten_while_active() {
        let mut incident = Incident::new(IncidentKind::LaneBlock, "E1", "E1_0", 0, 10);
        incident.activate().unwrap();
        assert!(incident.capture_prior_state(lane_prior()).is_err());
    }

    #[test]
    fn test_fallback_only_once() {
        let mut incident = Incident::new(IncidentKind::Obstacle, "E1", "E1_0", 0, 10);
        incident.capture_prior_state(PriorState::NoObject).unwrap();
        incident.rewrite_as_lane_block().unwrap();
        assert_eq!(incident.kind(), IncidentKind::LaneBlock);
        assert!(incident.prior_state().is_none());
        assert!(matches!(
            incident.rewrite_as_lane_block(),
            Err(InvariantViolation::FallbackExhausted { .. })
        ));
    }

    #[test]
    fn test_stray_vehicle_survives_fallback() {
        let mut incident = Incident::new(IncidentKind::Obstacle, "E1", "E1_0", 0, 10);
        incident.capture_prior_state(PriorState::NoObject).unwrap();
        incident.record_stray_vehicle("veh");
        incident.rewrite_as_lane_block().unwrap();
        assert_eq!(incident.stray_vehicle(), Some("veh"));
    }

    #[test]
    fn test_cleanup_only_from_pending() {
        let mut incident = Incident::new(IncidentKind::LaneBlock, "E1", "E1_0", 0, 10);
        incident.begin_cleanup().unwrap();
        assert_eq!(incident.status(), IncidentStatus::Reverting);
        assert!(!incident.counts_toward_limit());
        assert!(incident.begin_cleanup().is_err());
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut incident = Incident::new(IncidentKind::LaneBlock, "E1", "E1_0", 5, 10);
        assert!(incident.counts_toward_limit());
        assert!(incident.begin_revert().is_err(), "Pending cannot revert");

        incident.activate().unwrap();
        assert!(incident.activate().is_err());
        incident.begin_revert().unwrap();
        assert!(!incident.counts_toward_limit());
        incident.begin_revert().unwrap();

        incident.close(CloseOutcome::Reverted);
        incident.close(CloseOutcome::Unrecovered {
            reason: "late".into(),
        });
        assert_eq!(incident.outcome(), Some(&CloseOutcome::Reverted));
    }

    #[test]
    fn test_allowed_classes_sorted_and_deduplicated() {
        let incident = Incident::new(IncidentKind::LaneBlock, "E1", "E1_0", 0, 1)
            .with_allowed_classes(["emergency", "bus", "emergency"]);
        assert_eq!(incident.allowed_classes(), &["bus", "emergency"]);
    }

    #[test]
    fn test_seeded_ids_are_reproducible() {
        let a = IncidentId::from_rng(&mut RngManager::new(9));
        let b = IncidentId::from_rng(&mut RngManager::new(9));
        assert_eq!(a, b);
        assert_eq!(a.as_uuid().get_version_num(), 4);
    }

    #[test]
    fn test_id_roundtrips_through_display() {
        let id = IncidentId::new();
        let parsed: IncidentId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert_eq!(id.short().len(), 12);
    }
}
