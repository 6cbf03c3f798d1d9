//! Pipeline Orchestrator - per-driver, per-system scoring loop
//!
//! Ties the stages together: load and merge a driver's season, group the
//! telemetry columns into vehicle systems, run the detection ensemble and
//! the severity classifier per system, fold everything into per-race health
//! entries, and write the report JSON.
//!
//! A failing system or driver is logged and skipped; the report is written
//! with whatever survived.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::constants::{
    get_bio_data_dir, get_car_data_dir, get_output_dir, MIN_RACES, MIN_SYSTEM_FEATURES,
    RANDOM_SEED, REPORT_FILE,
};
use crate::logic::classifier::{ClassifierOutput, ClassifierPipeline};
use crate::logic::ensemble::aggregate::{SCORE_MEAN, VOTED_ANOMALY, VOTING_SCORE};
use crate::logic::ensemble::{
    severity_from_votes, AnomalyEnsemble, AnomalyStatistics, ANOMALY_SUFFIX, MODEL_NAMES,
    SCORE_SUFFIX,
};
use crate::logic::frame::Frame;
use crate::logic::health::{
    health_score, round_to, DriverReport, RaceHealth, Report, ReportMetadata,
    SeverityProbabilities, SystemEntry,
};
use crate::logic::telemetry::{load_driver_telemetry, MergedTelemetry};
use crate::logic::types::{ModelWeights, Severity};

// ============================================================================
// ROSTER AND SYSTEM GROUPINGS
// ============================================================================

pub struct DriverInfo {
    pub code: &'static str,
    pub name: &'static str,
    pub number: u32,
}

pub const DRIVERS: [DriverInfo; 2] = [
    DriverInfo {
        code: "NOR",
        name: "Lando Norris",
        number: 4,
    },
    DriverInfo {
        code: "PIA",
        name: "Oscar Piastri",
        number: 81,
    },
];

/// Vehicle system groupings: each system owns the telemetry channels whose
/// aggregate columns start with one of its prefixes. Channels may belong to
/// more than one system (Speed feeds both Brakes and Suspension).
pub const SYSTEM_FEATURES: [(&str, &[&str]); 6] = [
    ("Power Unit", &["RPM", "nGear"]),
    ("Brakes", &["Brake", "Speed"]),
    ("Drivetrain", &["Throttle", "DRS"]),
    ("Suspension", &["Speed", "Distance"]),
    (
        "Thermal",
        &["HeartRate_bpm", "CockpitTemp_C", "AirTemp_C", "TrackTemp_C"],
    ),
    ("Electronics", &["DRS", "RPM", "nGear"]),
];

fn system_prefixes(system: &str) -> &'static [&'static str] {
    SYSTEM_FEATURES
        .iter()
        .find(|(name, _)| *name == system)
        .map(|(_, prefixes)| *prefixes)
        .unwrap_or(&[])
}

// ============================================================================
// CONFIG
// ============================================================================

pub struct PipelineConfig {
    pub car_data_dir: PathBuf,
    pub bio_data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub seed: u64,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self {
            car_data_dir: get_car_data_dir(),
            bio_data_dir: get_bio_data_dir(),
            output_dir: get_output_dir(),
            seed: RANDOM_SEED,
        }
    }
}

// ============================================================================
// PER-SYSTEM SCORING
// ============================================================================

/// One system's scored season: the subset frame with all detector and
/// aggregate columns attached, plus the quantile severity per race.
struct SystemResult {
    system: &'static str,
    feature_cols: Vec<String>,
    frame: Frame,
    levels: Vec<Severity>,
}

/// Resolve each system's channel prefixes against the merged columns,
/// deduplicated in first-match order. Systems with no matching columns
/// are dropped.
fn system_column_map(frame: &Frame) -> Vec<(&'static str, Vec<String>)> {
    SYSTEM_FEATURES
        .iter()
        .filter_map(|(system, prefixes)| {
            let mut cols: Vec<String> = Vec::new();
            for prefix in *prefixes {
                for col in frame.columns() {
                    if col.starts_with(prefix) && !cols.iter().any(|c| c == col) {
                        cols.push(col.clone());
                    }
                }
            }
            if cols.is_empty() {
                None
            } else {
                Some((*system, cols))
            }
        })
        .collect()
}

fn run_ensemble_per_system(merged: &MergedTelemetry, seed: u64) -> Vec<SystemResult> {
    if merged.n_races() < MIN_RACES {
        log::warn!(
            "Not enough data for ensemble ({} races, need >= {})",
            merged.n_races(),
            MIN_RACES
        );
        return Vec::new();
    }

    let ensemble = AnomalyEnsemble::new(seed);
    let aggregator = AnomalyStatistics::default();

    let mut results = Vec::new();
    for (system, feature_cols) in system_column_map(&merged.frame) {
        if feature_cols.len() < MIN_SYSTEM_FEATURES {
            log::info!("Skipping {}: only {} feature(s)", system, feature_cols.len());
            continue;
        }

        let mut subset = merged.frame.select(&feature_cols);
        subset.sanitize_non_finite();
        let scaled = subset.standard_scaled();

        ensemble.run_detectors(&mut subset, &scaled);
        let levels = aggregator.anomaly_insights(&mut subset);

        let anomalies = subset
            .column_vec(VOTED_ANOMALY)
            .map(|v| v.iter().filter(|&&x| x == 1.0).count())
            .unwrap_or(0);
        log::info!(
            "  {}: {} features, {}/{} anomalies",
            system,
            feature_cols.len(),
            anomalies,
            subset.n_rows()
        );

        results.push(SystemResult {
            system,
            feature_cols,
            frame: subset,
            levels,
        });
    }
    results
}

/// Supervised stage: train per-system classifiers on the ensemble levels
/// and keep the outputs aligned with `results` by index. Bundles persist
/// under the `classifiers/` subdirectory of the output dir.
fn run_classifier_per_system(
    results: &[SystemResult],
    driver_code: &str,
    output_dir: &Path,
) -> Vec<ClassifierOutput> {
    let pipeline = ClassifierPipeline::new(&output_dir.join("classifiers"));
    results
        .iter()
        .map(|result| {
            pipeline.train_and_predict(
                driver_code,
                result.system,
                &result.frame,
                &result.feature_cols,
                &result.levels,
            )
        })
        .collect()
}

// ============================================================================
// HEALTH ASSEMBLY
// ============================================================================

fn compute_system_health(
    merged: &MergedTelemetry,
    results: &[SystemResult],
    classified: &[ClassifierOutput],
) -> Vec<RaceHealth> {
    // Every *_Anomaly column counts as a voter here, including the fused
    // Voted_Anomaly flag, so total_models is 5 when all detectors ran
    let anomaly_cols: Vec<Vec<String>> = results
        .iter()
        .map(|r| {
            r.frame
                .columns()
                .iter()
                .filter(|c| c.ends_with(ANOMALY_SUFFIX))
                .cloned()
                .collect()
        })
        .collect();
    let score_cols: Vec<Vec<String>> = results
        .iter()
        .map(|r| {
            r.frame
                .columns()
                .iter()
                .filter(|c| c.ends_with(SCORE_SUFFIX))
                .cloned()
                .collect()
        })
        .collect();

    merged
        .races
        .iter()
        .enumerate()
        .map(|(i, race)| {
            let mut systems = std::collections::BTreeMap::new();

            for (r_idx, result) in results.iter().enumerate() {
                if i >= result.frame.n_rows() {
                    continue;
                }

                let score_mean = result.frame.value(i, SCORE_MEAN).unwrap_or(0.0);
                let voting = result.frame.value(i, VOTING_SCORE).unwrap_or(0.0);

                let vote_count = anomaly_cols[r_idx]
                    .iter()
                    .filter(|c| result.frame.value(i, c) == Some(1.0))
                    .count();
                let total_models = anomaly_cols[r_idx].len();

                // First maximum wins on ties; normalized scores collapse to
                // identical values often enough for the order to matter
                let mut top_model = String::new();
                let mut top_score = f64::NEG_INFINITY;
                for col in &score_cols[r_idx] {
                    let v = result.frame.value(i, col).unwrap_or(0.0);
                    if v > top_score {
                        top_score = v;
                        top_model = col.trim_end_matches(SCORE_SUFFIX).to_string();
                    }
                }

                let mut features = std::collections::BTreeMap::new();
                for prefix in system_prefixes(result.system) {
                    for col in merged.frame.columns() {
                        if col.starts_with(prefix) && col.ends_with("_mean") {
                            if let Some(v) = merged.frame.value(i, col) {
                                features.insert(prefix.to_string(), round_to(v, 1));
                            }
                        }
                    }
                }

                let classifier = &classified[r_idx];
                let classifier_severity = classifier
                    .severity
                    .get(i)
                    .copied()
                    .unwrap_or(result.levels[i]);

                systems.insert(
                    result.system.to_string(),
                    SystemEntry {
                        health: health_score(score_mean),
                        level: result.levels[i],
                        vote_severity: severity_from_votes(vote_count, total_models),
                        score_mean: round_to(score_mean, 4),
                        voting_score: round_to(voting, 3),
                        vote_count,
                        total_models,
                        top_model,
                        features,
                        classifier_severity,
                        classifier_confidence: round_to(
                            classifier.confidence.get(i).copied().unwrap_or(0.0),
                            4,
                        ),
                        severity_probabilities: classifier
                            .probabilities
                            .get(i)
                            .map(SeverityProbabilities::from_array)
                            .unwrap_or_default(),
                        maintenance_action: classifier_severity.maintenance_action(),
                    },
                );
            }

            RaceHealth {
                race: race.clone(),
                systems,
            }
        })
        .collect()
}

// ============================================================================
// DRIVER LOOP
// ============================================================================

fn run_driver(config: &PipelineConfig, driver: &DriverInfo) -> Option<DriverReport> {
    log::info!("{}", "=".repeat(60));
    log::info!("Processing {} (#{})", driver.name, driver.number);
    log::info!("{}", "=".repeat(60));

    let merged = load_driver_telemetry(&config.car_data_dir, &config.bio_data_dir, driver.code);
    if merged.n_races() == 0 {
        log::warn!("No data for {}", driver.code);
        return None;
    }
    log::info!(
        "Loaded {} races, {} features",
        merged.n_races(),
        merged.frame.n_cols()
    );

    let results = run_ensemble_per_system(&merged, config.seed);

    log::info!("Running severity classifier...");
    let classified = run_classifier_per_system(&results, driver.code, &config.output_dir);

    let races = compute_system_health(&merged, &results, &classified);
    let (overall_health, overall_level, last_race) = DriverReport::summarize_latest(&races);

    Some(DriverReport {
        driver: driver.name.to_string(),
        number: driver.number,
        code: driver.code.to_string(),
        overall_health,
        overall_level,
        last_race,
        race_count: races.len(),
        races,
    })
}

/// Full pipeline over the roster. Writes the report JSON and returns it.
pub fn run(config: &PipelineConfig) -> io::Result<Report> {
    log::info!("Car telemetry dir: {}", config.car_data_dir.display());
    log::info!("Biometrics dir:    {}", config.bio_data_dir.display());

    let drivers: Vec<DriverReport> = DRIVERS
        .iter()
        .filter_map(|d| run_driver(config, d))
        .collect();

    let report = Report {
        drivers,
        metadata: ReportMetadata {
            systems: SYSTEM_FEATURES.iter().map(|(s, _)| s.to_string()).collect(),
            models: MODEL_NAMES.iter().map(|m| m.to_string()).collect(),
            model_weights: ModelWeights::default(),
        },
    };

    fs::create_dir_all(&config.output_dir)?;
    let path = config.output_dir.join(REPORT_FILE);
    let json = serde_json::to_string_pretty(&report)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    fs::write(&path, json)?;

    log::info!("Output written to {}", path.display());
    for d in &report.drivers {
        log::info!(
            "  {}: {}% ({}) over {} races",
            d.driver,
            d.overall_health,
            d.overall_level.as_str(),
            d.race_count
        );
    }
    Ok(report)
}

// ============================================================================
// TESTS
// ============================================================================
