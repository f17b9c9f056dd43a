//! Trigger request tests
//!
//! Requests resolve a location hint to one lane, pass the concurrency and
//! occupancy checks, and are applied immediately. Every rejection is typed
//! and logged.

use traffic_incident_core_rs::remote::memory::LaneState;
use traffic_incident_core_rs::remote::{InMemorySimulation, RemoteError, RoadPosition};
use traffic_incident_core_rs::{
    CreationSource, Event, IncidentKind, IncidentRequest, IncidentScheduler, LocationHint,
    Rejected, SchedulerConfig,
};

fn scheduler_with(sim: InMemorySimulation) -> IncidentScheduler<InMemorySimulation> {
    let config = SchedulerConfig {
        spawn_probability_per_tick: 0.0,
        max_concurrent: 5,
        ..Default::default()
    };
    IncidentScheduler::new(sim, config).unwrap()
}

fn network() -> InMemorySimulation {
    InMemorySimulation::new()
        .with_edge("E1", 2, 200.0, 13.9)
        .with_edge("E2", 1, 15.0, 8.3)
        .with_edge(":J1", 1, 10.0, 8.0)
        .with_geo_anchor(
            37.61,
            55.75,
            RoadPosition {
                edge_id: "E1".to_string(),
                lane_index: 1,
                position_m: 42.0,
            },
        )
}

fn lane(id: &str) -> LocationHint {
    LocationHint::Lane(id.to_string())
}

#[test]
fn test_lane_request_applies_immediately() {
    let mut s = scheduler_with(network());
    s.tick(7).unwrap();

    let id = s.request_incident_at(lane("E1_0")).unwrap();

    let incident = s.incident(id).unwrap();
    assert!(incident.is_active());
    assert_eq!(incident.start_tick(), 7);
    assert_eq!(incident.edge_id(), "E1");
    assert_eq!(s.sim().lane("E1_0").unwrap().max_speed, 0.0);

    let created = s.event_log().events_of_type("IncidentCreated");
    assert!(matches!(
        created.as_slice(),
        [Event::IncidentCreated {
            source: CreationSource::Trigger,
            ..
        }]
    ));
}

#[test]
fn test_unknown_lane_is_rejected_and_logged() {
    let mut s = scheduler_with(network());

    let err = s.request_incident_at(lane("NOPE_0")).unwrap_err();

    assert!(matches!(err, Rejected::UnknownLocation(_)));
    assert!(s.incidents().is_empty());
    assert_eq!(s.event_log().events_of_type("TriggerRejected").len(), 1);
}

#[test]
fn test_internal_lane_is_rejected() {
    let mut s = scheduler_with(network());
    let err = s.request_incident_at(lane(":J1_0")).unwrap_err();
    assert!(matches!(err, Rejected::InternalEdge(_)));
    assert_eq!(s.sim().lane(":J1_0").unwrap().max_speed, 8.0);
}

#[test]
fn test_occupied_lane_is_rejected() {
    let mut s = scheduler_with(network());
    s.request_incident_at(lane("E1_0")).unwrap();

    let err = s.request_incident_at(lane("E1_0")).unwrap_err();
    assert_eq!(err, Rejected::LaneOccupied("E1_0".to_string()));
    assert_eq!(s.incidents().len(), 1);
}

#[test]
fn test_trigger_skips_margin_filter() {
    let mut s = scheduler_with(network());
    let id = s
        .request_incident(
            IncidentRequest::at(lane("E2_0"))
                .with_kind(IncidentKind::LaneBlock)
                .with_duration(10),
        )
        .unwrap();
    assert_eq!(s.incident(id).unwrap().lane_id(), "E2_0");
}

#[test]
fn test_edge_request_fills_free_lanes_then_rejects() {
    let mut s = scheduler_with(network());

    let first = s.request_incident_at(LocationHint::Edge("E1".to_string())).unwrap();
    let second = s.request_incident_at(LocationHint::Edge("E1".to_string())).unwrap();
    let third = s.request_incident_at(LocationHint::Edge("E1".to_string()));

    let mut lanes = vec![
        s.incident(first).unwrap().lane_id().to_string(),
        s.incident(second).unwrap().lane_id().to_string(),
    ];
    lanes.sort();
    assert_eq!(lanes, vec!["E1_0", "E1_1"]);
    assert!(matches!(third.unwrap_err(), Rejected::NoEligibleLane(_)));
}

#[test]
fn test_edge_request_finds_lanes_after_a_gap() {
    let mut sim = InMemorySimulation::new().with_edge("E3", 3, 200.0, 13.9);
    sim.remove_lane("E3_1");
    let mut s = scheduler_with(sim);
    s.request_incident_at(lane("E3_0")).unwrap();

    let id = s.request_incident_at(LocationHint::Edge("E3".to_string())).unwrap();

    assert_eq!(s.incident(id).unwrap().lane_id(), "E3_2");
}

#[test]
fn test_edge_request_rejects_internal_and_unknown_edges() {
    let mut s = scheduler_with(network());
    assert_eq!(
        s.request_incident_at(LocationHint::Edge(":J1".to_string())).unwrap_err(),
        Rejected::InternalEdge(":J1".to_string())
    );
    assert!(matches!(
        s.request_incident_at(LocationHint::Edge("E404".to_string())).unwrap_err(),
        Rejected::UnknownLocation(_)
    ));
}

#[test]
fn test_geo_request_places_obstacle_at_resolved_position() {
    let mut s = scheduler_with(network());

    let id = s
        .request_incident(
            IncidentRequest::at(LocationHint::Geo {
                lon: 37.6101,
                lat: 55.7499,
            })
            .with_kind(IncidentKind::Obstacle),
        )
        .unwrap();

    let incident = s.incident(id).unwrap();
    assert_eq!(incident.lane_id(), "E1_1");
    assert_eq!(incident.kind(), IncidentKind::Obstacle);
    assert_eq!(incident.obstacle().unwrap().position_m, 42.0);
}

#[test]
fn test_geo_request_without_geo_support_is_unknown() {
    let sim = InMemorySimulation::new().with_edge("E1", 1, 100.0, 13.9);
    let mut s = scheduler_with(sim);

    let err = s
        .request_incident_at(LocationHint::Geo { lon: 0.0, lat: 0.0 })
        .unwrap_err();

    assert!(matches!(err, Rejected::UnknownLocation(_)));
}

#[test]
fn test_apply_failure_is_reported_and_not_tracked() {
    let mut sim = network();
    sim.fail_always("set_lane_max_speed", RemoteError::Protocol("locked".to_string()));
    let mut s = scheduler_with(sim);

    let err = s
        .request_incident(IncidentRequest::at(lane("E1_0")).with_kind(IncidentKind::LaneBlock))
        .unwrap_err();

    match err {
        Rejected::ApplyFailed(reason) => assert!(reason.contains("locked")),
        other => panic!("expected apply failure, got {:?}", other),
    }
    assert!(s.incidents().is_empty());
    assert_eq!(s.event_log().events_of_type("CreationFailed").len(), 1);
}

#[test]
fn test_blocked_lane_classes_keep_lane_open_for_some_traffic() {
    let sim = network().with_lane(
        "BUS_0",
        LaneState {
            edge_id: "BUS".to_string(),
            length_m: 100.0,
            max_speed: 13.9,
            allowed: Vec::new(),
            disallowed: Vec::new(),
            occupancy: 0.0,
        },
    );
    let config = SchedulerConfig {
        spawn_probability_per_tick: 0.0,
        blocked_lane_classes: vec!["emergency".to_string()],
        ..Default::default()
    };
    let mut s = IncidentScheduler::new(sim, config).unwrap();

    s.request_incident(IncidentRequest::at(lane("BUS_0")).with_kind(IncidentKind::LaneBlock))
        .unwrap();

    let blocked = s.sim().lane("BUS_0").unwrap();
    assert_eq!(blocked.allowed, vec!["emergency"]);
    assert!(blocked.disallowed.is_empty());

    s.force_clear_all().unwrap();
    assert!(s.sim().lane("BUS_0").unwrap().allowed.is_empty());
}
