//! Python bindings
//!
//! - [`adapter`]: drives the simulation through a Python object
//! - [`scheduler`]: exposes the scheduler as a Python class

pub mod adapter;
pub mod scheduler;
