//! Python-backed simulation handle
//!
//! Wraps a Python object exposing the remote-control protocol (usually a thin
//! class around a TraCI connection) and implements [`SimulationControl`] by
//! calling its methods under the GIL. Method names and arguments mirror the
//! trait one to one.
//!
//! Python exceptions are mapped as follows:
//! - `KeyError` -> object not found
//! - `ValueError` -> invalid argument
//! - `ConnectionError` -> simulation not started
//! - anything else (including a missing method) -> protocol error

use pyo3::exceptions::{PyConnectionError, PyKeyError, PyValueError};
use pyo3::prelude::*;

use crate::remote::{ObjectKind, RemoteError, RoadPosition, SimulationControl, VehicleSpawn};

/// [`SimulationControl`] over a Python object
pub struct PySimulationAdapter {
    target: Py<PyAny>,
}

impl PySimulationAdapter {
    pub fn new(target: Py<PyAny>) -> Self {
        Self { target }
    }

    /// Call into Python and extract the result
    fn query<T>(
        &self,
        subject: Option<(ObjectKind, &str)>,
        call: impl for<'py> FnOnce(&Bound<'py, PyAny>) -> PyResult<Bound<'py, PyAny>>,
    ) -> Result<T, RemoteError>
    where
        T: for<'py> FromPyObject<'py>,
    {
        Python::with_gil(|py| {
            call(self.target.bind(py))
                .and_then(|value| value.extract::<T>())
                .map_err(|err| to_remote_error(py, err, subject))
        })
    }

    /// Call into Python, ignoring the return value
    fn command(
        &self,
        subject: Option<(ObjectKind, &str)>,
        call: impl for<'py> FnOnce(&Bound<'py, PyAny>) -> PyResult<Bound<'py, PyAny>>,
    ) -> Result<(), RemoteError> {
        Python::with_gil(|py| {
            call(self.target.bind(py))
                .map(|_| ())
                .map_err(|err| to_remote_error(py, err, subject))
        })
    }
}

fn to_remote_error(py: Python<'_>, err: PyErr, subject: Option<(ObjectKind, &str)>) -> RemoteError {
    if err.is_instance_of::<PyKeyError>(py) {
        if let Some((kind, id)) = subject {
            return RemoteError::not_found(kind, id);
        }
    }
    if err.is_instance_of::<PyValueError>(py) {
        return RemoteError::InvalidArgument(err.value(py).to_string());
    }
    if err.is_instance_of::<PyConnectionError>(py) {
        return RemoteError::NotStarted;
    }
    RemoteError::Protocol(err.to_string())
}

impl SimulationControl for PySimulationAdapter {
    fn lane_ids(&self) -> Result<Vec<String>, RemoteError> {
        self.query(None, |t| t.call_method0("lane_ids"))
    }

    fn edge_ids(&self) -> Result<Vec<String>, RemoteError> {
        self.query(None, |t| t.call_method0("edge_ids"))
    }

    fn lane_exists(&self, lane_id: &str) -> Result<bool, RemoteError> {
        self.query(None, |t| t.call_method1("lane_exists", (lane_id,)))
    }

    fn edge_exists(&self, edge_id: &str) -> Result<bool, RemoteError> {
        self.query(None, |t| t.call_method1("edge_exists", (edge_id,)))
    }

    fn vehicle_exists(&self, vehicle_id: &str) -> Result<bool, RemoteError> {
        self.query(None, |t| t.call_method1("vehicle_exists", (vehicle_id,)))
    }

    fn lane_edge(&self, lane_id: &str) -> Result<String, RemoteError> {
        self.query(Some((ObjectKind::Lane, lane_id)), |t| {
            t.call_method1("lane_edge", (lane_id,))
        })
    }

    fn lane_length(&self, lane_id: &str) -> Result<f64, RemoteError> {
        self.query(Some((ObjectKind::Lane, lane_id)), |t| {
            t.call_method1("lane_length", (lane_id,))
        })
    }

    fn lane_occupancy(&self, lane_id: &str) -> Result<f64, RemoteError> {
        self.query(Some((ObjectKind::Lane, lane_id)), |t| {
            t.call_method1("lane_occupancy", (lane_id,))
        })
    }

    fn lane_max_speed(&self, lane_id: &str) -> Result<f64, RemoteError> {
        self.query(Some((ObjectKind::Lane, lane_id)), |t| {
            t.call_method1("lane_max_speed", (lane_id,))
        })
    }

    fn set_lane_max_speed(&mut self, lane_id: &str, speed: f64) -> Result<(), RemoteError> {
        self.command(Some((ObjectKind::Lane, lane_id)), |t| {
            t.call_method1("set_lane_max_speed", (lane_id, speed))
        })
    }

    fn lane_allowed_classes(&self, lane_id: &str) -> Result<Vec<String>, RemoteError> {
        self.query(Some((ObjectKind::Lane, lane_id)), |t| {
            t.call_method1("lane_allowed_classes", (lane_id,))
        })
    }

    fn set_lane_allowed_classes(
        &mut self,
        lane_id: &str,
        classes: &[String],
    ) -> Result<(), RemoteError> {
        self.command(Some((ObjectKind::Lane, lane_id)), |t| {
            t.call_method1("set_lane_allowed_classes", (lane_id, classes.to_vec()))
        })
    }

    fn lane_disallowed_classes(&self, lane_id: &str) -> Result<Vec<String>, RemoteError> {
        self.query(Some((ObjectKind::Lane, lane_id)), |t| {
            t.call_method1("lane_disallowed_classes", (lane_id,))
        })
    }

    fn set_lane_disallowed_classes(
        &mut self,
        lane_id: &str,
        classes: &[String],
    ) -> Result<(), RemoteError> {
        self.command(Some((ObjectKind::Lane, lane_id)), |t| {
            t.call_method1("set_lane_disallowed_classes", (lane_id, classes.to_vec()))
        })
    }

    fn edge_lane_count(&self, edge_id: &str) -> Result<usize, RemoteError> {
        self.query(Some((ObjectKind::Edge, edge_id)), |t| {
            t.call_method1("edge_lane_count", (edge_id,))
        })
    }

    fn insert_stationary_vehicle(&mut self, spawn: &VehicleSpawn) -> Result<(), RemoteError> {
        self.command(Some((ObjectKind::Lane, &spawn.lane_id)), |t| {
            t.call_method1(
                "insert_stationary_vehicle",
                (
                    spawn.vehicle_id.as_str(),
                    spawn.lane_id.as_str(),
                    spawn.position_m,
                    spawn.vehicle_class.as_str(),
                ),
            )
        })
    }

    fn hold_vehicle(&mut self, vehicle_id: &str) -> Result<(), RemoteError> {
        self.command(Some((ObjectKind::Vehicle, vehicle_id)), |t| {
            t.call_method1("hold_vehicle", (vehicle_id,))
        })
    }

    fn remove_vehicle(&mut self, vehicle_id: &str) -> Result<(), RemoteError> {
        self.command(Some((ObjectKind::Vehicle, vehicle_id)), |t| {
            t.call_method1("remove_vehicle", (vehicle_id,))
        })
    }

    /// Expects `(edge_id, lane_index, position_m)` back from Python
    fn locate_geo(&self, lon: f64, lat: f64) -> Result<RoadPosition, RemoteError> {
        let (edge_id, lane_index, position_m): (String, usize, f64) =
            self.query(None, |t| t.call_method1("locate_geo", (lon, lat)))?;
        Ok(RoadPosition {
            edge_id,
            lane_index,
            position_m,
        })
    }
}
