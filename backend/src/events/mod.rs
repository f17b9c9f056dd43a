//! Scripted scenario events

pub mod handler;
pub mod types;

pub use handler::ScenarioEventHandler;
pub use types::{EventSchedule, ScenarioEvent, ScheduledEvent};
