//! F1 Anomaly Pipeline - Main Entry Point
//!
//! Offline batch job: loads per-race telemetry aggregates, scores every
//! vehicle system of every driver through the detection ensemble and the
//! severity classifier, and writes `anomaly_scores.json`.

mod constants;
mod logic;

use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("{} v{}", constants::APP_NAME, constants::APP_VERSION);

    let config = logic::pipeline::PipelineConfig::from_env();
    match logic::pipeline::run(&config) {
        Ok(report) => {
            log::info!("Drivers scored: {}", report.drivers.len());
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("Pipeline failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
