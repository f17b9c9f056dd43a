//! Scheduler configuration
//!
//! Every field has a default, so a configuration can be as small as `{}`.
//! Loading from JSON validates before returning.
//!
//! # Example
//!
//! ```rust
//! use traffic_incident_core_rs::SchedulerConfig;
//!
//! let config = SchedulerConfig::from_json_str(r#"{
//!     "max_concurrent": 2,
//!     "spawn_probability_per_tick": 0.01,
//!     "duration_range": {"min_ticks": 50, "max_ticks": 80},
//!     "kind_mix": {"lane_block": 1.0, "obstacle": 3.0},
//!     "lane_selection": {"mode": "by_length"}
//! }"#).unwrap();
//!
//! assert_eq!(config.max_concurrent, 2);
//! assert_eq!(config.margin_meters, 10.0);
//! ```

use super::engine::SchedulerError;
use crate::controller::DEFAULT_VEHICLE_CLASSES;
use crate::events::{EventSchedule, ScheduledEvent};
use crate::impact::SeverityWeights;
use crate::models::IncidentKind;
use crate::rng::RngManager;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Inclusive range of incident durations (ticks)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationRange {
    pub min_ticks: usize,
    pub max_ticks: usize,
}

impl Default for DurationRange {
    fn default() -> Self {
        Self {
            min_ticks: 100,
            max_ticks: 300,
        }
    }
}

impl DurationRange {
    pub fn sample(&self, rng: &mut RngManager) -> usize {
        rng.range_inclusive(self.min_ticks as u64, self.max_ticks as u64) as usize
    }
}

/// Relative weights of the two incident kinds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KindMix {
    pub lane_block: f64,
    pub obstacle: f64,
}

impl Default for KindMix {
    fn default() -> Self {
        Self::only(IncidentKind::LaneBlock)
    }
}

impl KindMix {
    /// Mix that always yields `kind`
    pub fn only(kind: IncidentKind) -> Self {
        match kind {
            IncidentKind::LaneBlock => Self {
                lane_block: 1.0,
                obstacle: 0.0,
            },
            IncidentKind::Obstacle => Self {
                lane_block: 0.0,
                obstacle: 1.0,
            },
        }
    }

    /// Draw a kind; LaneBlock if both weights are zero
    pub fn pick(&self, rng: &mut RngManager) -> IncidentKind {
        match rng.weighted_index(&[self.lane_block, self.obstacle]) {
            Some(1) => IncidentKind::Obstacle,
            _ => IncidentKind::LaneBlock,
        }
    }
}

/// Distribution used to pick among eligible lanes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LaneSelection {
    /// Every eligible lane equally likely
    #[default]
    Uniform,

    /// Proportional to lane length
    ByLength,

    /// Proportional to current occupancy (busy lanes crash more)
    ByOccupancy,

    /// Explicit per-lane weights; unlisted lanes get `default_weight`
    Weighted {
        weights: BTreeMap<String, f64>,
        #[serde(default)]
        default_weight: f64,
    },
}

/// Complete scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum incidents Active or Pending at once
    pub max_concurrent: usize,

    /// Bernoulli probability of creating an incident on a tick
    pub spawn_probability_per_tick: f64,

    /// Sampled uniformly for every random incident
    pub duration_range: DurationRange,

    /// Minimum distance from either lane end (meters)
    pub margin_meters: f64,

    /// Lanes qualify only if they permit one of these classes (empty = any lane)
    pub allowed_classes: Vec<String>,

    /// Classes still permitted on a blocked lane (empty = fully closed)
    pub blocked_lane_classes: Vec<String>,

    pub kind_mix: KindMix,

    pub severity: SeverityWeights,

    pub lane_selection: LaneSelection,

    /// Failed revert retries before an incident is force-closed
    pub max_revert_retries: u32,

    /// RNG seed for deterministic runs
    pub rng_seed: u64,

    /// Lanes considered for random incidents (None = the whole network)
    pub candidate_lanes: Option<Vec<String>>,

    /// Obstacle spawn class preference; also disallowed on fully closed lanes
    pub vehicle_class_preference: Vec<String>,

    pub scenario_events: Vec<ScheduledEvent>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            spawn_probability_per_tick: 0.002,
            duration_range: DurationRange::default(),
            margin_meters: 10.0,
            allowed_classes: Vec::new(),
            blocked_lane_classes: Vec::new(),
            kind_mix: KindMix::default(),
            severity: SeverityWeights::default(),
            lane_selection: LaneSelection::default(),
            max_revert_retries: 3,
            rng_seed: 42,
            candidate_lanes: None,
            vehicle_class_preference: DEFAULT_VEHICLE_CLASSES
                .iter()
                .map(|c| c.to_string())
                .collect(),
            scenario_events: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self, SchedulerError> {
        let config: SchedulerConfig = serde_json::from_str(json)
            .map_err(|e| SchedulerError::InvalidConfig(format!("malformed configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field for a usable value
    pub fn validate(&self) -> Result<(), SchedulerError> {
        let invalid = |msg: String| -> Result<(), SchedulerError> { Err(SchedulerError::InvalidConfig(msg)) };

        let p = self.spawn_probability_per_tick;
        if !p.is_finite() || !(0.0..=1.0).contains(&p) {
            return invalid(format!("spawn_probability_per_tick must be in [0, 1], got {}", p));
        }

        let range = self.duration_range;
        if range.min_ticks == 0 {
            return invalid("duration_range.min_ticks must be at least 1".to_string());
        }
        if range.min_ticks > range.max_ticks {
            return invalid(format!(
                "duration_range is empty: {} > {}",
                range.min_ticks, range.max_ticks
            ));
        }

        if !self.margin_meters.is_finite() || self.margin_meters < 0.0 {
            return invalid(format!("margin_meters must be >= 0, got {}", self.margin_meters));
        }

        let mix = self.kind_mix;
        let mix_ok = |w: f64| w.is_finite() && w >= 0.0;
        if !mix_ok(mix.lane_block) || !mix_ok(mix.obstacle) || mix.lane_block + mix.obstacle <= 0.0 {
            return invalid(format!(
                "kind_mix weights must be >= 0 with a positive total, got {:?}",
                mix
            ));
        }

        self.severity.validate().map_err(SchedulerError::InvalidConfig)?;

        if let LaneSelection::Weighted {
            weights,
            default_weight,
        } = &self.lane_selection
        {
            let bad = weights
                .iter()
                .map(|(lane, w)| (lane.as_str(), *w))
                .chain(std::iter::once(("<default>", *default_weight)))
                .find(|(_, w)| !w.is_finite() || *w < 0.0);
            if let Some((lane, w)) = bad {
                return invalid(format!("lane weight for '{}' must be >= 0, got {}", lane, w));
            }
        }

        if self.vehicle_class_preference.is_empty() {
            return invalid("vehicle_class_preference must not be empty".to_string());
        }

        for scheduled in &self.scenario_events {
            if let EventSchedule::Repeating { interval: 0, .. } = scheduled.schedule {
                return invalid(format!(
                    "repeating '{}' event needs a positive interval",
                    scheduled.event.event_type()
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SchedulerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_concurrent, 3);
        assert_eq!(config.duration_range, DurationRange { min_ticks: 100, max_ticks: 300 });
    }

    #[test]
    fn test_empty_json_yields_defaults() {
        let config = SchedulerConfig::from_json_str("{}").unwrap();
        assert_eq!(config, SchedulerConfig::default());
    }

    #[test]
    fn test_rejects_probability_out_of_range() {
        let config = SchedulerConfig {
            spawn_probability_per_tick: 1.5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SchedulerError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_inverted_duration_range() {
        let config = SchedulerConfig {
            duration_range: DurationRange {
                min_ticks: 10,
                max_ticks: 5,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_kind_mix() {
        let config = SchedulerConfig {
            kind_mix: KindMix {
                lane_block: 0.0,
                obstacle: 0.0,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_json_is_invalid_config() {
        let err = SchedulerConfig::from_json_str("{\"max_concurrent\": \"many\"}").unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidConfig(_)));
    }

    #[test]
    fn test_weighted_selection_json() {
        let config = SchedulerConfig::from_json_str(
            r#"{"lane_selection": {"mode": "weighted", "weights": {"E1_0": 2.0}}}"#,
        )
        .unwrap();
        match config.lane_selection {
            LaneSelection::Weighted {
                weights,
                default_weight,
            } => {
                assert_eq!(weights["E1_0"], 2.0);
                assert_eq!(default_weight, 0.0);
            }
            other => panic!("unexpected selection {:?}", other),
        }
    }

    #[test]
    fn test_kind_mix_only() {
        let mut rng = RngManager::new(3);
        let mix = KindMix::only(IncidentKind::Obstacle);
        for _ in 0..20 {
            assert_eq!(mix.pick(&mut rng), IncidentKind::Obstacle);
        }
    }
}
