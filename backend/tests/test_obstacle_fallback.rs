//! Obstacle strategy and fallback tests
//!
//! An obstacle that cannot be placed becomes a lane block on the SAME
//! incident. A failed placement never leaves a stray vehicle behind.

use traffic_incident_core_rs::controller::{ObstacleStrategy, OBSTACLE_VEHICLE_PREFIX};
use traffic_incident_core_rs::remote::{InMemorySimulation, RemoteError};
use traffic_incident_core_rs::{
    ApplyOutcome, CloseOutcome, Incident, IncidentController, IncidentKind, IncidentStatus,
    IncidentStrategy, PriorState, RevertOutcome, RngManager,
};

fn obstacle(lane_id: &str, margin: f64) -> Incident {
    let edge = lane_id.rsplit_once('_').map(|(e, _)| e).unwrap_or(lane_id);
    Incident::new(IncidentKind::Obstacle, edge, lane_id, 0, 30).with_margin(margin)
}

#[test]
fn test_obstacle_spawns_held_vehicle_inside_margins() {
    let mut sim = InMemorySimulation::new().with_edge("E1", 1, 100.0, 13.9);
    let controller = IncidentController::default();
    let mut rng = RngManager::new(8);
    let mut incident = obstacle("E1_0", 10.0);

    let outcome = controller.apply(&mut sim, &mut incident, &mut rng).unwrap();

    assert_eq!(outcome, ApplyOutcome::Activated { fallback_reason: None });
    assert_eq!(incident.kind(), IncidentKind::Obstacle);
    assert_eq!(incident.prior_state(), Some(&PriorState::NoObject));

    let placement = incident.obstacle().unwrap().clone();
    assert!(placement.vehicle_id.starts_with(OBSTACLE_VEHICLE_PREFIX));
    assert!((10.0..=90.0).contains(&placement.position_m));

    let vehicle = sim.vehicle(&placement.vehicle_id).unwrap();
    assert!(vehicle.held);
    assert_eq!(vehicle.lane_id, "E1_0");
    assert_eq!(vehicle.vehicle_class, "passenger");
    assert_eq!(sim.lane("E1_0").unwrap().max_speed, 13.9);

    assert_eq!(
        controller.revert(&mut sim, &mut incident).unwrap(),
        RevertOutcome::Restored
    );
    assert_eq!(sim.vehicle_count(), 0);
}

#[test]
fn test_short_lane_falls_back_to_lane_block() {
    let mut sim = InMemorySimulation::new().with_edge("SHORT", 1, 8.0, 13.9);
    let controller = IncidentController::default();
    let mut rng = RngManager::new(8);
    let mut incident = obstacle("SHORT_0", 5.0);
    let id = incident.id();

    let outcome = controller.apply(&mut sim, &mut incident, &mut rng).unwrap();

    assert!(outcome.is_activated());
    assert!(outcome.fallback_reason().unwrap().contains("margin"));
    assert_eq!(incident.id(), id);
    assert_eq!(incident.kind(), IncidentKind::LaneBlock);
    assert_eq!(incident.status(), IncidentStatus::Active);
    assert!(incident.fallback_used());
    assert!(incident.obstacle().is_none());
    assert!(matches!(incident.prior_state(), Some(PriorState::Lane { .. })));
    assert_eq!(sim.lane("SHORT_0").unwrap().max_speed, 0.0);
    assert_eq!(sim.vehicle_count(), 0);
}

#[test]
fn test_hold_failure_removes_vehicle_then_falls_back() {
    let mut sim = InMemorySimulation::new().with_edge("E1", 1, 100.0, 13.9);
    sim.fail_next("hold_vehicle", RemoteError::Protocol("stop rejected".to_string()));
    let controller = IncidentController::default();
    let mut rng = RngManager::new(8);
    let mut incident = obstacle("E1_0", 10.0);

    let outcome = controller.apply(&mut sim, &mut incident, &mut rng).unwrap();

    assert!(outcome.is_activated());
    assert!(outcome.fallback_reason().is_some());
    assert_eq!(sim.vehicle_count(), 0);
    assert_eq!(incident.kind(), IncidentKind::LaneBlock);
    assert_eq!(sim.lane("E1_0").unwrap().max_speed, 0.0);
}

#[test]
fn test_both_strategies_failing_closes_incident() {
    let mut sim = InMemorySimulation::new().with_edge("SHORT", 1, 8.0, 13.9);
    sim.fail_always("set_lane_max_speed", RemoteError::Protocol("read-only".to_string()));
    let controller = IncidentController::default();
    let mut rng = RngManager::new(8);
    let mut incident = obstacle("SHORT_0", 5.0);

    let outcome = controller.apply(&mut sim, &mut incident, &mut rng).unwrap();

    match &outcome {
        ApplyOutcome::Failed {
            fallback_reason,
            reason,
            cleanup_pending,
        } => {
            assert!(!cleanup_pending);
            assert!(fallback_reason.is_some());
            assert!(reason.contains("read-only"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(incident.status(), IncidentStatus::Closed);
    assert!(matches!(
        incident.outcome(),
        Some(CloseOutcome::CreationFailed { .. })
    ));
    assert_eq!(sim.lane("SHORT_0").unwrap().max_speed, 13.9);
    assert_eq!(sim.vehicle_count(), 0);
}

#[test]
fn test_requested_position_is_clamped_into_window() {
    let mut sim = InMemorySimulation::new().with_edge("E1", 1, 100.0, 13.9);
    let controller = IncidentController::default();
    let mut rng = RngManager::new(8);
    let mut incident = obstacle("E1_0", 10.0).with_requested_position(Some(500.0));

    controller.apply(&mut sim, &mut incident, &mut rng).unwrap();

    assert_eq!(incident.obstacle().unwrap().position_m, 90.0);
}

#[test]
fn test_lane_restricted_to_trams_spawns_tram() {
    let mut sim = InMemorySimulation::new().with_edge("T1", 1, 100.0, 13.9);
    sim.lane_mut("T1_0").unwrap().allowed = vec!["tram".to_string()];
    let strategy = ObstacleStrategy::new(vec!["passenger".to_string()]);
    let mut rng = RngManager::new(8);
    let mut incident = obstacle("T1_0", 10.0);

    strategy.apply(&mut sim, &mut incident, &mut rng).unwrap();

    assert_eq!(incident.obstacle().unwrap().vehicle_class, "tram");
}

#[test]
fn test_vehicle_gone_before_revert_counts_as_reverted() {
    let mut sim = InMemorySimulation::new().with_edge("E1", 1, 100.0, 13.9);
    let controller = IncidentController::default();
    let mut rng = RngManager::new(8);
    let mut incident = obstacle("E1_0", 10.0);
    controller.apply(&mut sim, &mut incident, &mut rng).unwrap();

    let vehicle_id = incident.obstacle().unwrap().vehicle_id.clone();
    sim.despawn_vehicle(&vehicle_id);

    assert!(!controller.is_active(&mut sim, &incident).unwrap());
    assert_eq!(
        controller.revert(&mut sim, &mut incident).unwrap(),
        RevertOutcome::TargetMissing
    );
    assert_eq!(incident.status(), IncidentStatus::Closed);
}

#[test]
fn test_undiscardable_vehicle_is_removed_on_revert() {
    let mut sim = InMemorySimulation::new().with_edge("E1", 1, 100.0, 13.9);
    sim.fail_next("hold_vehicle", RemoteError::Protocol("stop rejected".to_string()));
    sim.fail_next("remove_vehicle", RemoteError::Protocol("busy".to_string()));
    let controller = IncidentController::default();
    let mut rng = RngManager::new(8);
    let mut incident = obstacle("E1_0", 10.0);

    let outcome = controller.apply(&mut sim, &mut incident, &mut rng).unwrap();

    assert!(outcome.is_activated());
    assert!(outcome.fallback_reason().unwrap().contains("cleanup also failed"));
    assert_eq!(incident.kind(), IncidentKind::LaneBlock);
    let stray = incident.stray_vehicle().unwrap().to_string();
    assert!(stray.starts_with(OBSTACLE_VEHICLE_PREFIX));
    assert!(sim.vehicle(&stray).is_some());

    assert_eq!(
        controller.revert(&mut sim, &mut incident).unwrap(),
        RevertOutcome::Restored
    );
    assert_eq!(sim.vehicle_count(), 0);
    assert!(incident.stray_vehicle().is_none());
    assert_eq!(sim.lane("E1_0").unwrap().max_speed, 13.9);
}

#[test]
fn test_failed_fallback_with_stray_vehicle_stays_reverting() {
    let mut sim = InMemorySimulation::new().with_edge("E1", 1, 100.0, 13.9);
    sim.fail_next("hold_vehicle", RemoteError::Protocol("stop rejected".to_string()));
    sim.fail_next("remove_vehicle", RemoteError::Protocol("busy".to_string()));
    sim.fail_next("set_lane_max_speed", RemoteError::Protocol("read-only".to_string()));
    let controller = IncidentController::default();
    let mut rng = RngManager::new(8);
    let mut incident = obstacle("E1_0", 10.0);

    let outcome = controller.apply(&mut sim, &mut incident, &mut rng).unwrap();

    assert!(outcome.cleanup_pending());
    assert_eq!(incident.status(), IncidentStatus::Reverting);
    assert_eq!(sim.vehicle_count(), 1);

    controller.revert(&mut sim, &mut incident).unwrap();
    assert_eq!(sim.vehicle_count(), 0);
    assert_eq!(incident.status(), IncidentStatus::Closed);
}
