//! Incident scheduling
//!
//! The scheduler decides when and where incidents happen and when they end:
//! - [`config`]: runtime configuration and validation
//! - [`selection`]: lane eligibility and weighted lane choice
//! - [`trigger`]: on-demand incident requests
//! - [`engine`]: the tick loop tying it all together

pub mod config;
pub mod engine;
pub mod selection;
pub mod trigger;

pub use config::{DurationRange, KindMix, LaneSelection, SchedulerConfig};
pub use engine::{ClearReport, IncidentScheduler, SchedulerError, TickReport, TickWarning};
pub use selection::LaneCandidate;
pub use trigger::{IncidentRequest, LocationHint, Rejected};
