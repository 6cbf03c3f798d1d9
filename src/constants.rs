//! Central Configuration Constants
//!
//! Single source of truth for pipeline defaults.
//! To change data locations or training floors, only edit this file.

use std::path::PathBuf;

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name
pub const APP_NAME: &str = "F1 Anomaly Pipeline";

/// Default per-race car telemetry directory (McCar aggregates)
pub const DEFAULT_CAR_DATA_DIR: &str = "f1data/McCar/2024";

/// Default per-race biometric directory (McDriver aggregates)
pub const DEFAULT_BIO_DATA_DIR: &str = "f1data/McDriver/2024";

/// Default output directory (report + persisted classifier bundles)
pub const DEFAULT_OUTPUT_DIR: &str = "pipeline/output";

/// Output report file name
pub const REPORT_FILE: &str = "anomaly_scores.json";

/// Seed shared by every stochastic component (subsampling, SGD shuffling)
pub const RANDOM_SEED: u64 = 42;

/// Minimum races required to run the pipeline for a driver
pub const MIN_RACES: usize = 3;

/// Minimum matched feature columns required to score a vehicle system
pub const MIN_SYSTEM_FEATURES: usize = 2;

/// Minimum samples needed to attempt classifier training
pub const MIN_TRAIN_SAMPLES: usize = 6;

/// Minimum number of distinct severity classes to train
pub const MIN_CLASSES: usize = 2;

// ============================================
// Helper functions to read from env with fallback
// ============================================

/// Get car telemetry directory from environment or use default
pub fn get_car_data_dir() -> PathBuf {
    std::env::var("F1_CAR_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CAR_DATA_DIR))
}

/// Get biometric directory from environment or use default
pub fn get_bio_data_dir() -> PathBuf {
    std::env::var("F1_BIO_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_BIO_DATA_DIR))
}

/// Get output directory from environment or use default
pub fn get_output_dir() -> PathBuf {
    std::env::var("F1_OUTPUT_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_OUTPUT_DIR))
}
