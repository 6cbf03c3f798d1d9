//! Health Report - JSON schema consumed by the Fleet Overview UI
//!
//! Per-driver, per-race, per-system health entries plus the report
//! envelope. Scores are rounded here so the emitted JSON is stable and
//! diff-friendly across runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::logic::types::{MaintenanceAction, ModelWeights, Severity};

/// Health floor: even a fully anomalous system never reports below this.
const MIN_HEALTH: i64 = 10;
const MAX_HEALTH: i64 = 100;

/// Health percentage from the mean ensemble score, truncated then clamped.
pub fn health_score(score_mean: f64) -> i64 {
    ((100.0 - score_mean * 80.0) as i64).clamp(MIN_HEALTH, MAX_HEALTH)
}

/// Round half-to-even, matching the values the upstream report carries.
pub fn round_to(value: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    let scaled = value * factor;
    let floor = scaled.floor();
    let rounded = if ((scaled - floor) - 0.5).abs() < 1e-9 {
        if floor.rem_euclid(2.0) == 0.0 {
            floor
        } else {
            floor + 1.0
        }
    } else {
        scaled.round()
    };
    rounded / factor
}

// ============================================================================
// REPORT SCHEMA
// ============================================================================

/// Classifier probability per severity class, in a fixed key order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeverityProbabilities {
    pub normal: f64,
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl SeverityProbabilities {
    /// From a label-ordered probability array, rounded for the report.
    pub fn from_array(probs: &[f64; 5]) -> Self {
        Self {
            normal: round_to(probs[0], 4),
            low: round_to(probs[1], 4),
            medium: round_to(probs[2], 4),
            high: round_to(probs[3], 4),
            critical: round_to(probs[4], 4),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemEntry {
    pub health: i64,
    /// Quantile-based severity from the aggregator.
    pub level: Severity,
    /// Independent vote-count severity; may disagree with `level`.
    pub vote_severity: Severity,
    pub score_mean: f64,
    pub voting_score: f64,
    pub vote_count: usize,
    pub total_models: usize,
    pub top_model: String,
    /// Raw per-channel mean values behind this system's score.
    pub features: BTreeMap<String, f64>,
    pub classifier_severity: Severity,
    pub classifier_confidence: f64,
    pub severity_probabilities: SeverityProbabilities,
    pub maintenance_action: MaintenanceAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceHealth {
    pub race: String,
    pub systems: BTreeMap<String, SystemEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverReport {
    pub driver: String,
    pub number: u32,
    pub code: String,
    pub overall_health: i64,
    pub overall_level: Severity,
    pub last_race: String,
    pub races: Vec<RaceHealth>,
    pub race_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub systems: Vec<String>,
    pub models: Vec<String>,
    pub model_weights: ModelWeights,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub drivers: Vec<DriverReport>,
    pub metadata: ReportMetadata,
}

impl DriverReport {
    /// Overall health and level from the latest race: mean system health,
    /// worst system level.
    pub fn summarize_latest(races: &[RaceHealth]) -> (i64, Severity, String) {
        let latest = match races.last() {
            Some(r) => r,
            None => return (0, Severity::Normal, String::new()),
        };
        let healths: Vec<i64> = latest.systems.values().map(|s| s.health).collect();
        let overall_health = if healths.is_empty() {
            0
        } else {
            (healths.iter().sum::<i64>() as f64 / healths.len() as f64) as i64
        };
        let overall_level = latest
            .systems
            .values()
            .map(|s| s.level)
            .max()
            .unwrap_or(Severity::Normal);
        (overall_health, overall_level, latest.race.clone())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_score_clamping() {
        assert_eq!(health_score(0.0), 100);
        assert_eq!(health_score(0.5), 60);
        assert_eq!(health_score(2.0), 10);
        assert_eq!(health_score(-1.0), 100);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(0.123456, 4), 0.1235);
        assert_eq!(round_to(0.1, 3), 0.1);
    }

    #[test]
    fn test_round_to_ties_go_to_even() {
        assert_eq!(round_to(0.04445, 4), 0.0444);
        assert_eq!(round_to(2.5, 0), 2.0);
        assert_eq!(round_to(3.5, 0), 4.0);
        assert_eq!(round_to(0.00025, 4), 0.0002);
    }

    #[test]
    fn test_probabilities_key_order_and_rounding() {
        let p = SeverityProbabilities::from_array(&[0.55555, 0.2, 0.1, 0.1, 0.04445]);
        assert_eq!(p.normal, 0.5556);
        assert_eq!(p.critical, 0.0444);

        let json = serde_json::to_string(&p).unwrap();
        let normal_pos = json.find("normal").unwrap();
        let critical_pos = json.find("critical").unwrap();
        assert!(normal_pos < critical_pos);
    }

    #[test]
    fn test_summarize_latest() {
        let mut systems = BTreeMap::new();
        for (name, health, level) in [
            ("Power Unit", 90, Severity::Normal),
            ("Brakes", 40, Severity::High),
        ] {
            systems.insert(
                name.to_string(),
                SystemEntry {
                    health,
                    level,
                    vote_severity: Severity::Normal,
                    score_mean: 0.0,
                    voting_score: 0.0,
                    vote_count: 0,
                    total_models: 4,
                    top_model: String::new(),
                    features: BTreeMap::new(),
                    classifier_severity: level,
                    classifier_confidence: 0.0,
                    severity_probabilities: SeverityProbabilities::default(),
                    maintenance_action: level.maintenance_action(),
                },
            );
        }
        let races = vec![RaceHealth {
            race: "Abu Dhabi".to_string(),
            systems,
        }];
        let (health, level, last) = DriverReport::summarize_latest(&races);
        assert_eq!(health, 65);
        assert_eq!(level, Severity::High);
        assert_eq!(last, "Abu Dhabi");
    }

    #[test]
    fn test_summarize_empty_season() {
        let (health, level, last) = DriverReport::summarize_latest(&[]);
        assert_eq!(health, 0);
        assert_eq!(level, Severity::Normal);
        assert!(last.is_empty());
    }

    #[test]
    fn test_severity_serializes_lowercase() {
        let entry = serde_json::to_value(Severity::Critical).unwrap();
        assert_eq!(entry, serde_json::json!("critical"));
    }
}
