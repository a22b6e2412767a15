//! Python bindings (`pyo3` feature)

pub mod market;
