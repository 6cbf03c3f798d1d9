//! Logic Module - Scoring Engines
//!
//! One directory per engine:
//! - `frame` / `stats` - named-column matrices and shared statistics
//! - `model/` - base detectors (IsolationForest, OneClassSVM, KNN, PCA) + GBDT
//! - `ensemble/` - detector fusion, voting, severity levels
//! - `classifier/` - supervised refinement on ensemble pseudo-labels
//! - `telemetry/` - CSV loading and car/bio merging
//! - `health` / `pipeline` - report assembly and the per-driver driver loop

pub mod frame;
pub mod stats;
pub mod types;

pub mod model;

pub mod ensemble;
pub mod classifier;

pub mod telemetry;

pub mod health;
pub mod pipeline;
