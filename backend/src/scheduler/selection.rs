//! Lane eligibility and selection
//!
//! A lane is eligible for a random incident when:
//! - it belongs to a regular (non-internal) edge
//! - no tracked incident sits on it
//! - it is longer than twice the margin
//! - it permits at least one of the configured classes
//!
//! Lanes that have vanished are skipped silently. Other inspection failures
//! skip the lane too and are handed back to the caller to report.

use super::config::LaneSelection;
use crate::remote::safe_call::Target;
use crate::remote::{is_internal_edge, RemoteCallError, SafeCall, SimulationControl};
use crate::rng::RngManager;
use std::collections::HashSet;

/// An eligible lane with the attributes selection needs
#[derive(Debug, Clone, PartialEq)]
pub struct LaneCandidate {
    pub lane_id: String,
    pub edge_id: String,
    pub length_m: f64,
}

/// True if the lane permits at least one of `wanted` (empty = anything)
pub fn permits_any(allowed: &[String], disallowed: &[String], wanted: &[String]) -> bool {
    if wanted.is_empty() {
        return true;
    }
    wanted.iter().any(|class| {
        let allowed_ok = allowed.is_empty() || allowed.contains(class);
        allowed_ok && !disallowed.contains(class)
    })
}

/// Filter `candidates` down to eligible lanes, preserving order
///
/// Remote failures other than a missing lane are pushed onto `failures`.
pub fn eligible_lanes(
    sim: &mut dyn SimulationControl,
    candidates: &[String],
    occupied: &HashSet<String>,
    margin_meters: f64,
    wanted_classes: &[String],
    failures: &mut Vec<RemoteCallError>,
) -> Vec<LaneCandidate> {
    let safe = SafeCall::new(sim);
    candidates
        .iter()
        .filter(|lane| !occupied.contains(*lane))
        .filter_map(|lane| match inspect(&safe, lane, margin_meters, wanted_classes) {
            Ok(candidate) => candidate,
            Err(err) if err.is_not_found() => None,
            Err(err) => {
                tracing::debug!(lane = %lane, error = %err, "skipping lane that could not be inspected");
                failures.push(err);
                None
            }
        })
        .collect()
}

fn inspect(
    safe: &SafeCall<'_, dyn SimulationControl + '_>,
    lane: &str,
    margin_meters: f64,
    wanted_classes: &[String],
) -> Result<Option<LaneCandidate>, RemoteCallError> {
    let edge_id = safe.read("selection.lane_edge", Target::Lane(lane), |s| s.lane_edge(lane))?;
    if is_internal_edge(&edge_id) {
        return Ok(None);
    }
    let length_m = safe.read("selection.lane_length", Target::Lane(lane), |s| s.lane_length(lane))?;
    if length_m - 2.0 * margin_meters <= 0.0 {
        return Ok(None);
    }
    if !wanted_classes.is_empty() {
        let allowed = safe.read("selection.allowed", Target::Lane(lane), |s| {
            s.lane_allowed_classes(lane)
        })?;
        let disallowed = safe.read("selection.disallowed", Target::Lane(lane), |s| {
            s.lane_disallowed_classes(lane)
        })?;
        if !permits_any(&allowed, &disallowed, wanted_classes) {
            return Ok(None);
        }
    }
    Ok(Some(LaneCandidate {
        lane_id: lane.to_string(),
        edge_id,
        length_m,
    }))
}

/// Pick one lane index according to `selection`
///
/// When every weight is zero the pick falls back to uniform. Returns `None`
/// only for an empty slice. An occupancy that cannot be read weighs zero;
/// the failure is pushed onto `failures` unless the lane has vanished.
pub fn choose_lane(
    sim: &mut dyn SimulationControl,
    rng: &mut RngManager,
    selection: &LaneSelection,
    lanes: &[LaneCandidate],
    failures: &mut Vec<RemoteCallError>,
) -> Option<usize> {
    if lanes.is_empty() {
        return None;
    }
    let weights: Vec<f64> = match selection {
        LaneSelection::Uniform => return Some(rng.index(lanes.len())),
        LaneSelection::ByLength => lanes.iter().map(|l| l.length_m).collect(),
        LaneSelection::ByOccupancy => {
            let safe = SafeCall::new(sim);
            lanes
                .iter()
                .map(|l| {
                    match safe.read("selection.occupancy", Target::Lane(&l.lane_id), |s| {
                        s.lane_occupancy(&l.lane_id)
                    }) {
                        Ok(occupancy) => occupancy,
                        Err(err) => {
                            if !err.is_not_found() {
                                failures.push(err);
                            }
                            0.0
                        }
                    }
                })
                .collect()
        }
        LaneSelection::Weighted {
            weights,
            default_weight,
        } => lanes
            .iter()
            .map(|l| weights.get(&l.lane_id).copied().unwrap_or(*default_weight))
            .collect(),
    };
    Some(
        rng.weighted_index(&weights)
            .unwrap_or_else(|| rng.index(lanes.len())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::LaneState;
    use crate::remote::{InMemorySimulation, RemoteError};

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_permits_any() {
        let wanted = strings(&["bus"]);
        assert!(permits_any(&[], &[], &wanted));
        assert!(permits_any(&strings(&["bus", "taxi"]), &[], &wanted));
        assert!(!permits_any(&strings(&["tram"]), &[], &wanted));
        assert!(!permits_any(&[], &strings(&["bus"]), &wanted));
        assert!(permits_any(&strings(&["tram"]), &[], &[]));
    }

    #[test]
    fn test_eligibility_filters() {
        let mut sim = InMemorySimulation::new()
            .with_edge("E1", 2, 100.0, 13.9)
            .with_edge("SHORT", 1, 15.0, 13.9)
            .with_edge(":J1", 1, 30.0, 8.0)
            .with_lane(
                "TRAM_0",
                LaneState {
                    edge_id: "TRAM".to_string(),
                    length_m: 100.0,
                    max_speed: 13.9,
                    allowed: strings(&["tram"]),
                    disallowed: Vec::new(),
                    occupancy: 0.0,
                },
            );
        let candidates = sim.lane_ids().unwrap();
        let occupied: HashSet<String> = ["E1_1".to_string()].into_iter().collect();

        let mut failures = Vec::new();
        let eligible = eligible_lanes(
            &mut sim,
            &candidates,
            &occupied,
            10.0,
            &strings(&["passenger"]),
            &mut failures,
        );
        let ids: Vec<&str> = eligible.iter().map(|c| c.lane_id.as_str()).collect();

        assert_eq!(ids, vec!["E1_0"]);
        assert!(failures.is_empty());
    }

    #[test]
    fn test_unknown_lanes_are_skipped() {
        let mut sim = InMemorySimulation::new().with_edge("E1", 1, 100.0, 13.9);
        let mut failures = Vec::new();
        let eligible = eligible_lanes(
            &mut sim,
            &strings(&["GHOST_0", "E1_0"]),
            &HashSet::new(),
            10.0,
            &[],
            &mut failures,
        );
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].edge_id, "E1");
        assert!(failures.is_empty());
    }

    #[test]
    fn test_inspection_failures_are_returned() {
        let mut sim = InMemorySimulation::new().with_edge("E1", 2, 100.0, 13.9);
        sim.fail_next("lane_length", RemoteError::Protocol("timeout".into()));
        let mut failures = Vec::new();

        let eligible = eligible_lanes(
            &mut sim,
            &strings(&["E1_0", "E1_1"]),
            &HashSet::new(),
            10.0,
            &[],
            &mut failures,
        );

        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].lane_id, "E1_1");
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].operation, "selection.lane_length");
    }

    #[test]
    fn test_occupancy_failure_weighs_zero_and_is_returned() {
        let mut sim = InMemorySimulation::new().with_edge("A", 2, 50.0, 10.0);
        sim.lane_mut("A_0").unwrap().occupancy = 0.9;
        sim.lane_mut("A_1").unwrap().occupancy = 0.4;
        sim.fail_next("lane_occupancy", RemoteError::Protocol("timeout".into()));
        let mut rng = RngManager::new(5);
        let lanes: Vec<LaneCandidate> = ["A_0", "A_1"]
            .iter()
            .map(|id| LaneCandidate {
                lane_id: id.to_string(),
                edge_id: "A".to_string(),
                length_m: 50.0,
            })
            .collect();
        let mut failures = Vec::new();

        let pick = choose_lane(&mut sim, &mut rng, &LaneSelection::ByOccupancy, &lanes, &mut failures);

        assert_eq!(pick, Some(1));
        assert_eq!(failures.len(), 1);
    }

    #[test]
    fn test_weighted_selection_respects_zero_weights() {
        let mut sim = InMemorySimulation::new();
        let mut rng = RngManager::new(11);
        let lanes = vec![
            LaneCandidate {
                lane_id: "A_0".to_string(),
                edge_id: "A".to_string(),
                length_m: 50.0,
            },
            LaneCandidate {
                lane_id: "B_0".to_string(),
                edge_id: "B".to_string(),
                length_m: 50.0,
            },
        ];
        let selection = LaneSelection::Weighted {
            weights: [("B_0".to_string(), 1.0)].into_iter().collect(),
            default_weight: 0.0,
        };

        for _ in 0..50 {
            assert_eq!(
                choose_lane(&mut sim, &mut rng, &selection, &lanes, &mut Vec::new()),
                Some(1)
            );
        }
    }

    #[test]
    fn test_all_zero_weights_fall_back_to_uniform() {
        let mut sim = InMemorySimulation::new().with_edge("A", 1, 50.0, 10.0);
        let mut rng = RngManager::new(5);
        let lanes = vec![LaneCandidate {
            lane_id: "A_0".to_string(),
            edge_id: "A".to_string(),
            length_m: 50.0,
        }];
        let mut failures = Vec::new();
        assert_eq!(
            choose_lane(&mut sim, &mut rng, &LaneSelection::ByOccupancy, &lanes, &mut failures),
            Some(0)
        );
        assert_eq!(
            choose_lane(&mut sim, &mut rng, &LaneSelection::Uniform, &[], &mut failures),
            None
        );
        assert!(failures.is_empty());
    }
}
