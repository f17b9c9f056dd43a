//! Scenario event tests
//!
//! Scripted events run after expiry and before random creation, obey the
//! same capacity and location rules as trigger requests, and are logged.

use traffic_incident_core_rs::remote::InMemorySimulation;
use traffic_incident_core_rs::{
    CreationSource, Event, EventSchedule, IncidentKind, IncidentScheduler, LocationHint,
    ScenarioEvent, ScheduledEvent, SchedulerConfig, TickWarning,
};

fn network() -> InMemorySimulation {
    InMemorySimulation::new()
        .with_edge("E1", 2, 200.0, 13.9)
        .with_edge("E2", 1, 120.0, 8.3)
}

#[test]
fn test_scripted_spawn_and_clear_from_json() {
    let config = SchedulerConfig::from_json_str(
        r#"{
            "spawn_probability_per_tick": 0.0,
            "scenario_events": [
                {
                    "event": {
                        "type": "spawn_incident",
                        "location": {"lane": "E1_0"},
                        "kind": "lane_block",
                        "duration_ticks": 100
                    },
                    "schedule": {"tick": 3}
                },
                {
                    "event": {"type": "clear_all"},
                    "schedule": {"tick": 5}
                }
            ]
        }"#,
    )
    .unwrap();
    let mut s = IncidentScheduler::new(network(), config).unwrap();

    for tick in 0..3 {
        assert!(s.tick(tick).unwrap().created.is_empty());
    }

    let report = s.tick(3).unwrap();
    assert_eq!(report.created.len(), 1);
    assert_eq!(report.active[0].lane_id(), "E1_0");
    assert_eq!(report.active[0].start_tick(), 3);
    assert_eq!(s.sim().lane("E1_0").unwrap().max_speed, 0.0);

    s.tick(4).unwrap();
    let report = s.tick(5).unwrap();
    assert_eq!(report.closed.len(), 1);
    assert!(report.active.is_empty());
    assert_eq!(s.sim().lane("E1_0").unwrap().max_speed, 13.9);

    let executed = s.event_log().events_of_type("ScenarioEventExecuted");
    assert_eq!(executed.len(), 2);
    assert!(matches!(
        s.event_log().events_of_type("IncidentCreated").as_slice(),
        [Event::IncidentCreated {
            source: CreationSource::Scenario,
            tick: 3,
            ..
        }]
    ));
}

#[test]
fn test_repeating_spawn_hits_concurrency_limit() {
    let config = SchedulerConfig {
        spawn_probability_per_tick: 0.0,
        max_concurrent: 2,
        scenario_events: vec![ScheduledEvent {
            event: ScenarioEvent::SpawnIncident {
                location: LocationHint::Edge("E1".to_string()),
                kind: Some(IncidentKind::LaneBlock),
                duration_ticks: Some(1_000),
                position_m: None,
            },
            schedule: EventSchedule::Repeating {
                start_tick: 10,
                interval: 10,
            },
        }],
        ..Default::default()
    };
    let mut s = IncidentScheduler::new(network(), config).unwrap();

    let mut created = 0;
    let mut rejected = Vec::new();
    for tick in 0..=40 {
        let report = s.tick(tick).unwrap();
        created += report.created.len();
        rejected.extend(report.warnings.into_iter().filter_map(|w| match w {
            TickWarning::ScenarioEventFailed { event_type, reason } => Some((event_type, reason)),
            _ => None,
        }));
    }

    assert_eq!(created, 2);
    assert_eq!(rejected.len(), 2);
    for (event_type, reason) in &rejected {
        assert_eq!(event_type, "spawn_incident");
        assert!(reason.contains("concurrency limit"));
    }
    assert_eq!(s.event_log().events_of_type("ScenarioEventExecuted").len(), 4);
}

#[test]
fn test_clear_lane_event_leaves_other_incidents() {
    let spawn = |lane: &str| ScheduledEvent {
        event: ScenarioEvent::SpawnIncident {
            location: LocationHint::Lane(lane.to_string()),
            kind: Some(IncidentKind::LaneBlock),
            duration_ticks: Some(500),
            position_m: None,
        },
        schedule: EventSchedule::OneTime { tick: 1 },
    };
    let config = SchedulerConfig {
        spawn_probability_per_tick: 0.0,
        scenario_events: vec![
            spawn("E1_0"),
            spawn("E2_0"),
            ScheduledEvent {
                event: ScenarioEvent::ClearLane {
                    lane_id: "E2_0".to_string(),
                },
                schedule: EventSchedule::OneTime { tick: 2 },
            },
        ],
        ..Default::default()
    };
    let mut s = IncidentScheduler::new(network(), config).unwrap();

    assert_eq!(s.tick(1).unwrap().created.len(), 2);
    let report = s.tick(2).unwrap();

    assert_eq!(report.closed.len(), 1);
    assert_eq!(report.active.len(), 1);
    assert_eq!(report.active[0].lane_id(), "E1_0");
    assert_eq!(s.sim().lane("E2_0").unwrap().max_speed, 8.3);
}

#[test]
fn test_scenario_spawn_on_unknown_lane_warns() {
    let config = SchedulerConfig {
        spawn_probability_per_tick: 0.0,
        scenario_events: vec![ScheduledEvent {
            event: ScenarioEvent::SpawnIncident {
                location: LocationHint::Lane("GHOST_0".to_string()),
                kind: None,
                duration_ticks: None,
                position_m: None,
            },
            schedule: EventSchedule::OneTime { tick: 0 },
        }],
        ..Default::default()
    };
    let mut s = IncidentScheduler::new(network(), config).unwrap();

    let report = s.tick(0).unwrap();

    assert!(report.created.is_empty());
    assert!(matches!(
        report.warnings.as_slice(),
        [TickWarning::ScenarioEventFailed { .. }]
    ));
    assert_eq!(s.event_log().events_of_type("TriggerRejected").len(), 1);
}

#[test]
fn test_zero_interval_in_config_is_rejected() {
    let result = SchedulerConfig::from_json_str(
        r#"{"scenario_events": [
            {"event": {"type": "clear_all"}, "schedule": {"start_tick": 0, "interval": 0}}
        ]}"#,
    );
    assert!(result.is_err());
}
