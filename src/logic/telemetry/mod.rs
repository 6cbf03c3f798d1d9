//! Telemetry Module - per-race CSV ingestion and aggregation
//!
//! Reads the season's raw car telemetry (McCar) and driver biometrics
//! (McDriver) exports, reduces each race to one row of summary statistics
//! per driver, and left-joins the two sources into the feature frame the
//! detection engines consume.

pub mod loader;

pub use loader::{load_driver_telemetry, MergedTelemetry};
