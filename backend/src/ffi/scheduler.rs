//! PyO3 wrapper for IncidentScheduler
//!
//! The Python side owns the simulation loop: it advances the traffic
//! simulation one step, then calls `tick(step)` here.

use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList};

use super::adapter::PySimulationAdapter;
use crate::models::{Event, Incident, IncidentKind};
use crate::scheduler::{
    ClearReport, IncidentRequest, IncidentScheduler, LocationHint, SchedulerConfig, TickReport,
    TickWarning,
};

/// Python wrapper for the incident scheduler
///
/// # Example (from Python)
///
/// ```python
/// from traffic_incident_core_rs import IncidentScheduler
///
/// scheduler = IncidentScheduler(traci_adapter, '{"max_concurrent": 2}')
/// for step in range(3600):
///     traci.simulationStep()
///     report = scheduler.tick(step)
///     for edge, score in report["edge_impacts"].items():
///         print(edge, score)
/// scheduler.force_clear_all()
/// ```
#[pyclass(name = "IncidentScheduler")]
pub struct PyIncidentScheduler {
    inner: IncidentScheduler<PySimulationAdapter>,
}

#[pymethods]
impl PyIncidentScheduler {
    /// Create a scheduler over a Python simulation object
    ///
    /// # Errors
    ///
    /// Raises ValueError if the JSON configuration is malformed or invalid.
    #[new]
    #[pyo3(signature = (simulation, config_json=None))]
    fn new(simulation: Py<PyAny>, config_json: Option<&str>) -> PyResult<Self> {
        let config = parse_config(config_json)?;
        let inner = IncidentScheduler::new(PySimulationAdapter::new(simulation), config)
            .map_err(|e| PyValueError::new_err(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Replace the configuration (JSON string)
    fn configure(&mut self, config_json: &str) -> PyResult<()> {
        let config = parse_config(Some(config_json))?;
        self.inner
            .configure(config)
            .map_err(|e| PyValueError::new_err(e.to_string()))
    }

    /// Execute one scheduler tick
    ///
    /// Returns a dict with `tick`, `active`, `edge_impacts`, `created`,
    /// `closed` and `warnings`.
    fn tick<'py>(&mut self, py: Python<'py>, tick: usize) -> PyResult<Bound<'py, PyDict>> {
        let report = self
            .inner
            .tick(tick)
            .map_err(|e| PyRuntimeError::new_err(format!("tick {} failed: {}", tick, e)))?;
        tick_report_to_py(py, &report)
    }

    fn current_tick(&self) -> usize {
        self.inner.current_tick()
    }

    /// Revert every tracked incident now
    fn force_clear_all<'py>(&mut self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
        let report = self
            .inner
            .force_clear_all()
            .map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
        clear_report_to_py(py, &report)
    }

    /// Revert whatever incident sits on a lane
    fn clear_lane<'py>(&mut self, py: Python<'py>, lane_id: &str) -> PyResult<Bound<'py, PyDict>> {
        let report = self
            .inner
            .clear_lane(lane_id)
            .map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
        clear_report_to_py(py, &report)
    }

    /// Request an incident on a lane; returns the incident id
    ///
    /// Raises ValueError if the request is rejected.
    #[pyo3(signature = (lane_id, kind=None, duration_ticks=None))]
    fn request_incident_at_lane(
        &mut self,
        lane_id: String,
        kind: Option<&str>,
        duration_ticks: Option<usize>,
    ) -> PyResult<String> {
        self.submit(LocationHint::Lane(lane_id), kind, duration_ticks)
    }

    /// Request an incident on any free lane of an edge
    #[pyo3(signature = (edge_id, kind=None, duration_ticks=None))]
    fn request_incident_at_edge(
        &mut self,
        edge_id: String,
        kind: Option<&str>,
        duration_ticks: Option<usize>,
    ) -> PyResult<String> {
        self.submit(LocationHint::Edge(edge_id), kind, duration_ticks)
    }

    /// Request an incident at the road position nearest to a point
    #[pyo3(signature = (lon, lat, kind=None, duration_ticks=None))]
    fn request_incident_at_geo(
        &mut self,
        lon: f64,
        lat: f64,
        kind: Option<&str>,
        duration_ticks: Option<usize>,
    ) -> PyResult<String> {
        self.submit(LocationHint::Geo { lon, lat }, kind, duration_ticks)
    }

    /// Snapshot of every Active incident
    fn active_incidents<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyList>> {
        let list = PyList::empty(py);
        for incident in self.inner.active_incidents() {
            list.append(incident_to_py(py, incident)?)?;
        }
        Ok(list)
    }

    /// All logged events as dicts (`event_type`, `tick`, `incident_id`, `lane_id`)
    fn events<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyList>> {
        let list = PyList::empty(py);
        for event in self.inner.event_log().events() {
            list.append(event_to_py(py, event)?)?;
        }
        Ok(list)
    }
}

impl PyIncidentScheduler {
    fn submit(
        &mut self,
        location: LocationHint,
        kind: Option<&str>,
        duration_ticks: Option<usize>,
    ) -> PyResult<String> {
        let mut request = IncidentRequest::at(location);
        if let Some(kind) = kind {
            request = request.with_kind(parse_kind(kind)?);
        }
        if let Some(duration) = duration_ticks {
            request = request.with_duration(duration);
        }
        self.inner
            .request_incident(request)
            .map(|id| id.to_string())
            .map_err(|e| PyValueError::new_err(e.to_string()))
    }
}

// ========================================================================
// Conversions
// ========================================================================

fn parse_config(json: Option<&str>) -> PyResult<SchedulerConfig> {
    match json {
        Some(json) => {
            SchedulerConfig::from_json_str(json).map_err(|e| PyValueError::new_err(e.to_string()))
        }
        None => Ok(SchedulerConfig::default()),
    }
}

fn parse_kind(kind: &str) -> PyResult<IncidentKind> {
    match kind {
        "lane_block" => Ok(IncidentKind::LaneBlock),
        "obstacle" => Ok(IncidentKind::Obstacle),
        other => Err(PyValueError::new_err(format!(
            "unknown incident kind '{}' (expected 'lane_block' or 'obstacle')",
            other
        ))),
    }
}

fn incident_to_py<'py>(py: Python<'py>, incident: &Incident) -> PyResult<Bound<'py, PyDict>> {
    let dict = PyDict::new(py);
    dict.set_item("id", incident.id().to_string())?;
    dict.set_item("kind", incident.kind().as_str())?;
    dict.set_item("edge_id", incident.edge_id())?;
    dict.set_item("lane_id", incident.lane_id())?;
    dict.set_item("start_tick", incident.start_tick())?;
    dict.set_item("duration_ticks", incident.duration_ticks())?;
    dict.set_item("end_tick", incident.end_tick())?;
    dict.set_item("fallback_used", incident.fallback_used())?;
    if let Some(obstacle) = incident.obstacle() {
        dict.set_item("obstacle_vehicle_id", obstacle.vehicle_id.as_str())?;
        dict.set_item("obstacle_position_m", obstacle.position_m)?;
    }
    Ok(dict)
}

fn warnings_to_py<'py>(py: Python<'py>, warnings: &[TickWarning]) -> PyResult<Bound<'py, PyList>> {
    let list = PyList::empty(py);
    for warning in warnings {
        list.append(warning.to_string())?;
    }
    Ok(list)
}

fn tick_report_to_py<'py>(py: Python<'py>, report: &TickReport) -> PyResult<Bound<'py, PyDict>> {
    let dict = PyDict::new(py);
    dict.set_item("tick", report.tick)?;

    let active = PyList::empty(py);
    for incident in &report.active {
        active.append(incident_to_py(py, incident)?)?;
    }
    dict.set_item("active", active)?;

    let impacts = PyDict::new(py);
    for (edge, score) in &report.edge_impacts {
        impacts.set_item(edge, *score)?;
    }
    dict.set_item("edge_impacts", impacts)?;

    let ids = |ids: &[crate::models::IncidentId]| -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    };
    dict.set_item("created", ids(&report.created))?;
    dict.set_item("closed", ids(&report.closed))?;
    dict.set_item("warnings", warnings_to_py(py, &report.warnings)?)?;
    Ok(dict)
}

fn clear_report_to_py<'py>(py: Python<'py>, report: &ClearReport) -> PyResult<Bound<'py, PyDict>> {
    let dict = PyDict::new(py);
    let ids = |ids: &[crate::models::IncidentId]| -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    };
    dict.set_item("closed", ids(&report.closed))?;
    dict.set_item("retrying", ids(&report.retrying))?;
    dict.set_item("warnings", warnings_to_py(py, &report.warnings)?)?;
    Ok(dict)
}

fn event_to_py<'py>(py: Python<'py>, event: &Event) -> PyResult<Bound<'py, PyDict>> {
    let dict = PyDict::new(py);
    dict.set_item("event_type", event.event_type())?;
    dict.set_item("tick", event.tick())?;
    dict.set_item("incident_id", event.incident_id().map(|id| id.to_string()))?;
    dict.set_item("lane_id", event.lane_id())?;
    Ok(dict)
}
