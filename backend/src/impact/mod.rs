//! Impact estimation
//!
//! Scores how badly an edge is degraded by the incidents sitting on it.
//!
//! ```text
//! fraction = min(1, affected_lanes / lane_count)
//! impact   = clamp(fraction × weight(heaviest kind on edge), 0, 1)
//! ```
//!
//! Several incidents on one edge combine by summing affected lanes BEFORE the
//! fraction is taken; impacts are never added together.

use crate::models::{IncidentKind, InvariantViolation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-kind severity multiplier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityWeights {
    pub lane_block: f64,
    /// Heavier by default: a stalled vehicle also causes spillback
    pub obstacle: f64,
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            lane_block: 0.8,
            obstacle: 1.0,
        }
    }
}

impl SeverityWeights {
    pub fn weight(&self, kind: IncidentKind) -> f64 {
        match kind {
            IncidentKind::LaneBlock => self.lane_block,
            IncidentKind::Obstacle => self.obstacle,
        }
    }

    /// Weights must be finite and non-negative
    pub fn validate(&self) -> Result<(), String> {
        for (name, w) in [("lane_block", self.lane_block), ("obstacle", self.obstacle)] {
            if !w.is_finite() || w < 0.0 {
                return Err(format!("severity weight '{}' must be finite and >= 0, got {}", name, w));
            }
        }
        Ok(())
    }
}

/// Pure impact scoring
#[derive(Debug, Clone, Default)]
pub struct ImpactEstimator {
    weights: SeverityWeights,
}

impl ImpactEstimator {
    pub fn new(weights: SeverityWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &SeverityWeights {
        &self.weights
    }

    /// Impact of `affected_lane_count` lanes of `kind` on an edge
    ///
    /// # Errors
    /// `lane_count == 0` is an invariant violation: every real edge has a lane.
    ///
    /// # Example
    /// ```
    /// use traffic_incident_core_rs::{ImpactEstimator, IncidentKind};
    ///
    /// let estimator = ImpactEstimator::default();
    /// let score = estimator.impact("E1", IncidentKind::LaneBlock, 4, 1).unwrap();
    /// assert!((score - 0.2).abs() < 1e-12);
    /// assert!(estimator.impact("E1", IncidentKind::LaneBlock, 0, 1).is_err());
    /// ```
    pub fn impact(
        &self,
        edge_id: &str,
        kind: IncidentKind,
        lane_count: usize,
        affected_lane_count: usize,
    ) -> Result<f64, InvariantViolation> {
        let fraction = affected_fraction(edge_id, lane_count, affected_lane_count)?;
        Ok(clamp_unit(fraction * self.weights.weight(kind)))
    }

    /// Combined impact of several incidents on one edge
    ///
    /// `kinds` holds one entry per affected lane. Returns 0.0 when empty.
    pub fn combined_impact(
        &self,
        edge_id: &str,
        lane_count: usize,
        kinds: &[IncidentKind],
    ) -> Result<f64, InvariantViolation> {
        let fraction = affected_fraction(edge_id, lane_count, kinds.len())?;
        let weight = kinds
            .iter()
            .map(|k| self.weights.weight(*k))
            .fold(0.0_f64, f64::max);
        Ok(clamp_unit(fraction * weight))
    }
}

fn affected_fraction(
    edge_id: &str,
    lane_count: usize,
    affected_lane_count: usize,
) -> Result<f64, InvariantViolation> {
    if lane_count == 0 {
        return Err(InvariantViolation::ZeroLaneCount {
            edge_id: edge_id.to_string(),
        });
    }
    Ok((affected_lane_count as f64 / lane_count as f64).min(1.0))
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

/// Collects incidents per edge and scores every edge at once
#[derive(Debug, Clone, Default)]
pub struct EdgeImpactAccumulator {
    edges: BTreeMap<String, Vec<IncidentKind>>,
}

impl EdgeImpactAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one affected lane on `edge_id`
    pub fn add(&mut self, edge_id: &str, kind: IncidentKind) {
        self.edges.entry(edge_id.to_string()).or_default().push(kind);
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Score every recorded edge
    ///
    /// `lane_count` returns `None` for edges that vanished from the network;
    /// those are left out of the result.
    pub fn finish(
        self,
        estimator: &ImpactEstimator,
        mut lane_count: impl FnMut(&str) -> Option<usize>,
    ) -> Result<BTreeMap<String, f64>, InvariantViolation> {
        let mut scores = BTreeMap::new();
        for (edge_id, kinds) in self.edges {
            let Some(count) = lane_count(&edge_id) else {
                continue;
            };
            let score = estimator.combined_impact(&edge_id, count, &kinds)?;
            scores.insert(edge_id, score);
        }
        Ok(scores)
    }
}
