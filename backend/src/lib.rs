//! Traffic Incident Core - Rust Engine
//!
//! Injects deterministic, reversible traffic incidents into a running
//! traffic simulation and scores their impact on the road network.
//!
//! # Architecture
//!
//! - **remote**: Simulation control protocol and guarded remote calls
//! - **models**: Domain types (Incident, Event, invariant violations)
//! - **controller**: Incident strategies (lane block, obstacle) and fallback
//! - **impact**: Per-edge impact scoring
//! - **events**: Scripted scenario events
//! - **scheduler**: Tick loop, lane selection, trigger requests
//! - **rng**: Deterministic random number generation
//!
//! # Critical Invariants
//!
//! 1. Every incident fully reverts what it changed (or is reported as
//!    unrecovered)
//! 2. All randomness is deterministic (seeded RNG)
//! 3. Remote failures never panic; they surface as typed results
//! 4. FFI boundary is minimal and safe
//!
//! # Example
//!
//! ```rust
//! use traffic_incident_core_rs::remote::InMemorySimulation;
//! use traffic_incident_core_rs::{IncidentKind, IncidentRequest, IncidentScheduler, LocationHint, SchedulerConfig};
//!
//! let sim = InMemorySimulation::new().with_edge("E1", 3, 150.0, 13.9);
//! let config = SchedulerConfig {
//!     spawn_probability_per_tick: 0.0,
//!     ..Default::default()
//! };
//! let mut scheduler = IncidentScheduler::new(sim, config).unwrap();
//!
//! let id = scheduler
//!     .request_incident(
//!         IncidentRequest::at(LocationHint::Lane("E1_1".into()))
//!             .with_kind(IncidentKind::LaneBlock)
//!             .with_duration(5),
//!     )
//!     .unwrap();
//!
//! let report = scheduler.tick(1).unwrap();
//! assert!((report.edge_impacts["E1"] - 0.8 / 3.0).abs() < 1e-9);
//!
//! let report = scheduler.tick(5).unwrap();
//! assert_eq!(report.closed, vec![id]);
//! assert_eq!(scheduler.sim().lane("E1_1").unwrap().max_speed, 13.9);
//! ```

// Module declarations
pub mod controller;
pub mod events;
pub mod impact;
pub mod models;
pub mod remote;
pub mod rng;
pub mod scheduler;

// Re-exports for convenience
pub use controller::{
    ApplyOutcome, ControllerError, IncidentController, IncidentStrategy, RevertOutcome,
    DEFAULT_VEHICLE_CLASSES,
};
pub use events::{EventSchedule, ScenarioEvent, ScheduledEvent};
pub use impact::{ImpactEstimator, SeverityWeights};
pub use models::{
    event::{CreationSource, Event, EventLog},
    incident::{CloseOutcome, Incident, IncidentId, IncidentKind, IncidentStatus, PriorState},
    invariant::InvariantViolation,
};
pub use remote::{RemoteCallError, RemoteError, SafeCall, SimulationControl};
pub use rng::RngManager;
pub use scheduler::{
    ClearReport, DurationRange, IncidentRequest, IncidentScheduler, KindMix, LaneSelection,
    LocationHint, Rejected, SchedulerConfig, SchedulerError, TickReport, TickWarning,
};

// FFI module (when feature enabled)
#[cfg(feature = "pyo3")]
pub mod ffi;

// PyO3 exports (when feature enabled)
#[cfg(feature = "pyo3")]
use pyo3::prelude::*;

#[cfg(feature = "pyo3")]
#[pymodule]
fn traffic_incident_core_rs(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<ffi::scheduler::PyIncidentScheduler>()?;
    Ok(())
}
