//! Shared Types - Severity levels, maintenance actions, model weights
//!
//! Kept in one place so the aggregator, classifier and report builder all
//! agree on the five-class label space and its ordering.

use serde::{Deserialize, Serialize};

// ============================================================================
// SEVERITY
// ============================================================================

/// Five-level severity scale. Ordering matters: `Critical` is the worst,
/// so `max()` across systems picks the most severe level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Normal,
    Low,
    Medium,
    High,
    Critical,
}

/// All classes in label-integer order (normal=0 .. critical=4).
pub const SEVERITY_CLASSES: [Severity; 5] = [
    Severity::Normal,
    Severity::Low,
    Severity::Medium,
    Severity::High,
    Severity::Critical,
];

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Normal => "normal",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Label integer used by the classifier (normal=0 .. critical=4).
    pub fn as_label(&self) -> usize {
        *self as usize
    }

    /// Inverse of `as_label`. Out-of-range values map to `Normal`,
    /// matching the pseudo-label NaN handling.
    pub fn from_label(label: usize) -> Severity {
        SEVERITY_CLASSES.get(label).copied().unwrap_or(Severity::Normal)
    }

    /// Maintenance recommendation for the preventative scheduling UI.
    pub fn maintenance_action(&self) -> MaintenanceAction {
        match self {
            Severity::Critical => MaintenanceAction::AlertAndRemediate,
            Severity::High => MaintenanceAction::Alert,
            Severity::Medium => MaintenanceAction::LogAndMonitor,
            Severity::Low => MaintenanceAction::Log,
            Severity::Normal => MaintenanceAction::None,
        }
    }
}

// ============================================================================
// MAINTENANCE ACTION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceAction {
    AlertAndRemediate,
    Alert,
    LogAndMonitor,
    Log,
    None,
}

// ============================================================================
// MODEL WEIGHTS
// ============================================================================

/// Fixed reliability weights for score fusion. Explicit structure (not a
/// module-level global) so tests can pass custom weights to the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelWeights {
    #[serde(rename = "IsolationForest")]
    pub isolation_forest: f64,
    #[serde(rename = "Autoencoder")]
    pub autoencoder: f64,
    #[serde(rename = "OneClassSVM")]
    pub one_class_svm: f64,
    #[serde(rename = "KNN")]
    pub knn: f64,
}

impl Default for ModelWeights {
    fn default() -> Self {
        Self {
            isolation_forest: 1.0,
            autoencoder: 0.9,
            one_class_svm: 0.6,
            knn: 0.8,
        }
    }
}

impl ModelWeights {
    /// Weight for a model column prefix. Unknown models get 0.5.
    pub fn get(&self, model: &str) -> f64 {
        match model {
            "IsolationForest" => self.isolation_forest,
            "Autoencoder" => self.autoencoder,
            "OneClassSVM" => self.one_class_svm,
            "KNN" => self.knn,
            _ => 0.5,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_label_roundtrip() {
        for (i, sev) in SEVERITY_CLASSES.iter().enumerate() {
            assert_eq!(sev.as_label(), i);
            assert_eq!(Severity::from_label(i), *sev);
        }
        assert_eq!(Severity::from_label(99), Severity::Normal);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Low > Severity::Normal);
        let worst = [Severity::Low, Severity::High, Severity::Medium]
            .into_iter()
            .max()
            .unwrap();
        assert_eq!(worst, Severity::High);
    }

    #[test]
    fn test_maintenance_actions() {
        assert_eq!(
            Severity::Critical.maintenance_action(),
            MaintenanceAction::AlertAndRemediate
        );
        assert_eq!(Severity::Normal.maintenance_action(), MaintenanceAction::None);
    }

    #[test]
    fn test_default_weights() {
        let w = ModelWeights::default();
        assert_eq!(w.get("IsolationForest"), 1.0);
        assert_eq!(w.get("OneClassSVM"), 0.6);
        assert_eq!(w.get("SomethingElse"), 0.5);
    }
}
