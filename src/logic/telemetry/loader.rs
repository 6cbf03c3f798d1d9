//! Race Telemetry Loader
//!
//! One row per race: high-rate lap telemetry collapses to mean/max/std
//! aggregates per channel, plus duty-cycle percentages for the boolean-ish
//! channels (brake application, DRS activation). A race missing from the
//! biometric directory joins as zeros rather than dropping the row.
//!
//! Malformed files are logged and skipped; a partially readable season is
//! better than none.

use std::fs;
use std::io;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::logic::frame::Frame;
use crate::logic::stats;

static CAR_FILE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^2024_(.+)_Grand_Prix_Race\.csv$").expect("static regex"));

static BIO_FILE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^2024_(.+)_Grand_Prix_Race_biometrics\.csv$").expect("static regex"));

/// Car channels aggregated as mean/max/std.
const CAR_STAT_CHANNELS: [&str; 5] = ["RPM", "Speed", "Throttle", "nGear", "Distance"];

/// Biometric channels aggregated as mean/max.
const BIO_STAT_CHANNELS: [&str; 5] = [
    "HeartRate_bpm",
    "CockpitTemp_C",
    "BattleIntensity",
    "AirTemp_C",
    "TrackTemp_C",
];

/// DRS channel values >= 10 mean the flap is open.
const DRS_OPEN_THRESHOLD: f64 = 10.0;

// ============================================================================
// CSV PARSING
// ============================================================================

struct CsvTable {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl CsvTable {
    fn column_index(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }

    /// Numeric view of one column over the given row subset, silently
    /// dropping unparseable cells (pandas `to_numeric(errors="coerce")`).
    fn numeric_column(&self, name: &str, rows: &[usize]) -> Option<Vec<f64>> {
        let idx = self.column_index(name)?;
        Some(
            rows.iter()
                .filter_map(|&r| parse_numeric(self.rows[r].get(idx)?))
                .collect(),
        )
    }
}

fn parse_numeric(cell: &str) -> Option<f64> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Split one CSV line, honouring double-quoted fields.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for ch in line.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    fields.push(current);
    fields
}

fn read_csv(path: &Path) -> io::Result<CsvTable> {
    let content = fs::read_to_string(path)?;
    let mut lines = content.lines().filter(|l| !l.trim().is_empty());

    let header = match lines.next() {
        Some(line) => split_csv_line(line),
        None => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{}: empty file", path.display()),
            ))
        }
    };

    let rows = lines.map(split_csv_line).collect();
    Ok(CsvTable { header, rows })
}

// ============================================================================
// PER-RACE AGGREGATION
// ============================================================================

/// One race reduced to named summary statistics, insertion-ordered.
struct RaceAggregates {
    race: String,
    values: Vec<(String, f64)>,
}

impl RaceAggregates {
    fn new(race: String) -> Self {
        Self {
            race,
            values: Vec::new(),
        }
    }

    fn push(&mut self, name: String, value: f64) {
        self.values.push((name, value));
    }

    fn get(&self, name: &str) -> Option<f64> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }
}

/// Row indices belonging to one driver. A table without a Driver column
/// keeps every row (single-driver biometric exports).
fn driver_rows(table: &CsvTable, driver_code: &str, require_column: bool) -> Vec<usize> {
    match table.column_index("Driver") {
        Some(idx) => (0..table.rows.len())
            .filter(|&r| table.rows[r].get(idx).map(|c| c.trim()) == Some(driver_code))
            .collect(),
        None if require_column => Vec::new(),
        None => (0..table.rows.len()).collect(),
    }
}

fn aggregate_car_race(table: &CsvTable, race: String, driver_code: &str) -> Option<RaceAggregates> {
    let rows = driver_rows(table, driver_code, true);
    if rows.is_empty() {
        return None;
    }

    let mut agg = RaceAggregates::new(race);
    for channel in CAR_STAT_CHANNELS {
        if let Some(vals) = table.numeric_column(channel, &rows) {
            let (mean, max, std) = if vals.is_empty() {
                (0.0, 0.0, 0.0)
            } else {
                let max = vals.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                (stats::mean(&vals), max, stats::std_dev(&vals))
            };
            agg.push(format!("{}_mean", channel), mean);
            agg.push(format!("{}_max", channel), max);
            agg.push(format!("{}_std", channel), std);
        }
    }

    // Brake is logged as a boolean flag; report the applied fraction
    if let Some(idx) = table.column_index("Brake") {
        let applied = rows
            .iter()
            .filter(|&&r| {
                matches!(
                    table.rows[r].get(idx).map(|c| c.trim()),
                    Some("True") | Some("1") | Some("true")
                )
            })
            .count();
        agg.push("Brake_pct".to_string(), applied as f64 / rows.len() as f64 * 100.0);
    }

    // DRS is a status code; unparseable cells count as closed
    if let Some(idx) = table.column_index("DRS") {
        let open = rows
            .iter()
            .filter(|&&r| {
                table.rows[r]
                    .get(idx)
                    .and_then(|c| parse_numeric(c))
                    .unwrap_or(0.0)
                    >= DRS_OPEN_THRESHOLD
            })
            .count();
        agg.push("DRS_pct".to_string(), open as f64 / rows.len() as f64 * 100.0);
    }

    if let Some(tl) = table.numeric_column("TyreLife", &rows) {
        let max = if tl.is_empty() {
            0.0
        } else {
            tl.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
        };
        agg.push("TyreLife_max".to_string(), max);
    }

    agg.push("samples".to_string(), rows.len() as f64);
    Some(agg)
}

fn aggregate_bio_race(table: &CsvTable, race: String, driver_code: &str) -> Option<RaceAggregates> {
    let rows = driver_rows(table, driver_code, false);
    if rows.is_empty() {
        return None;
    }

    let mut agg = RaceAggregates::new(race);
    for channel in BIO_STAT_CHANNELS {
        if let Some(vals) = table.numeric_column(channel, &rows) {
            let (mean, max) = if vals.is_empty() {
                (0.0, 0.0)
            } else {
                let max = vals.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                (stats::mean(&vals), max)
            };
            agg.push(format!("{}_mean", channel), mean);
            agg.push(format!("{}_max", channel), max);
        }
    }
    agg.push("bio_samples".to_string(), rows.len() as f64);
    Some(agg)
}

// ============================================================================
// DIRECTORY SCANNING
// ============================================================================

fn scan_races<F>(dir: &Path, pattern: &Regex, mut aggregate: F) -> Vec<RaceAggregates>
where
    F: FnMut(&CsvTable, String) -> Option<RaceAggregates>,
{
    if !dir.is_dir() {
        log::warn!("Telemetry directory not found: {}", dir.display());
        return Vec::new();
    }

    let mut files: Vec<_> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect(),
        Err(e) => {
            log::warn!("Cannot read {}: {}", dir.display(), e);
            return Vec::new();
        }
    };
    files.sort();

    let mut races = Vec::new();
    for path in files {
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => continue,
        };
        let race = match pattern.captures(name) {
            Some(caps) => caps[1].replace('_', " "),
            None => continue,
        };
        match read_csv(&path) {
            Ok(table) => {
                if let Some(agg) = aggregate(&table, race) {
                    races.push(agg);
                }
            }
            Err(e) => log::warn!("Error loading {}: {}", name, e),
        }
    }
    races
}

// ============================================================================
// MERGE
// ============================================================================

/// A driver's full season, ready for the detection engines.
pub struct MergedTelemetry {
    pub driver: String,
    /// Race names in chronological (file sort) order, one frame row each.
    pub races: Vec<String>,
    pub frame: Frame,
}

impl MergedTelemetry {
    pub fn n_races(&self) -> usize {
        self.races.len()
    }
}

/// Left join on race name: car races define the rows, biometric aggregates
/// attach where a matching race exists and fill with 0 where it doesn't.
fn merge_races(driver: String, car: Vec<RaceAggregates>, bio: Vec<RaceAggregates>) -> MergedTelemetry {
    let races: Vec<String> = car.iter().map(|r| r.race.clone()).collect();

    // Column union in first-seen order
    let mut columns: Vec<String> = Vec::new();
    for agg in car.iter().chain(bio.iter()) {
        for (name, _) in &agg.values {
            if !columns.iter().any(|c| c == name) {
                columns.push(name.clone());
            }
        }
    }

    let pairs: Vec<(String, Vec<f64>)> = columns
        .iter()
        .map(|col| {
            let values = car
                .iter()
                .map(|car_race| {
                    car_race.get(col).unwrap_or_else(|| {
                        bio.iter()
                            .find(|b| b.race == car_race.race)
                            .and_then(|b| b.get(col))
                            .unwrap_or(0.0)
                    })
                })
                .collect();
            (col.clone(), values)
        })
        .collect();

    let frame = Frame::from_columns(pairs).unwrap_or_else(|e| {
        log::error!("Telemetry frame construction failed: {}", e);
        Frame::empty(races.len())
    });

    MergedTelemetry {
        driver,
        races,
        frame,
    }
}

/// Load and merge a driver's season from the car and biometric directories.
pub fn load_driver_telemetry(
    car_dir: &Path,
    bio_dir: &Path,
    driver_code: &str,
) -> MergedTelemetry {
    let car = scan_races(car_dir, &CAR_FILE_PATTERN, |table, race| {
        aggregate_car_race(table, race, driver_code)
    });
    let bio = scan_races(bio_dir, &BIO_FILE_PATTERN, |table, race| {
        aggregate_bio_race(table, race, driver_code)
    });

    log::info!(
        "{}: {} car races, {} biometric races",
        driver_code,
        car.len(),
        bio.len()
    );
    merge_races(driver_code.to_string(), car, bio)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_car_csv(dir: &Path, race: &str, body: &str) {
        let name = format!("2024_{}_Grand_Prix_Race.csv", race);
        fs::write(dir.join(name), body).unwrap();
    }

    fn write_bio_csv(dir: &Path, race: &str, body: &str) {
        let name = format!("2024_{}_Grand_Prix_Race_biometrics.csv", race);
        fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn test_car_aggregation_stats() {
        let dir = tempfile::tempdir().unwrap();
        write_car_csv(
            dir.path(),
            "Monaco",
            "Driver,RPM,Speed,Brake,DRS,TyreLife\n\
             NOR,10000,200,True,0,5\n\
             NOR,11000,210,False,12,6\n\
             NOR,12000,220,True,14,7\n\
             PIA,9000,190,False,0,3\n",
        );

        let merged = load_driver_telemetry(dir.path(), Path::new("/nonexistent"), "NOR");
        assert_eq!(merged.races, vec!["Monaco"]);
        let f = &merged.frame;
        assert_eq!(f.value(0, "RPM_mean"), Some(11000.0));
        assert_eq!(f.value(0, "RPM_max"), Some(12000.0));
        assert!((f.value(0, "RPM_std").unwrap() - 1000.0).abs() < 1e-9);
        // 2 of 3 NOR rows braking, 2 of 3 with DRS >= 10
        assert!((f.value(0, "Brake_pct").unwrap() - 200.0 / 3.0).abs() < 1e-9);
        assert!((f.value(0, "DRS_pct").unwrap() - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(f.value(0, "TyreLife_max"), Some(7.0));
        assert_eq!(f.value(0, "samples"), Some(3.0));
    }

    #[test]
    fn test_driver_filter_excludes_other_driver() {
        let dir = tempfile::tempdir().unwrap();
        write_car_csv(
            dir.path(),
            "Spain",
            "Driver,RPM\nPIA,9000\nPIA,9100\n",
        );
        let merged = load_driver_telemetry(dir.path(), Path::new("/nonexistent"), "NOR");
        assert_eq!(merged.n_races(), 0);
    }

    #[test]
    fn test_non_race_files_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_car_csv(dir.path(), "Monza", "Driver,RPM\nNOR,10500\n");
        fs::write(dir.path().join("2024_Monza_Qualifying.csv"), "Driver,RPM\nNOR,11000\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "not telemetry").unwrap();

        let merged = load_driver_telemetry(dir.path(), Path::new("/nonexistent"), "NOR");
        assert_eq!(merged.races, vec!["Monza"]);
    }

    #[test]
    fn test_merge_left_join_zero_fills_missing_bio() {
        let car_dir = tempfile::tempdir().unwrap();
        let bio_dir = tempfile::tempdir().unwrap();
        write_car_csv(car_dir.path(), "Monaco", "Driver,RPM\nNOR,10000\n");
        write_car_csv(car_dir.path(), "Spain", "Driver,RPM\nNOR,11000\n");
        // Biometrics only for Monaco
        write_bio_csv(
            bio_dir.path(),
            "Monaco",
            "Driver,HeartRate_bpm\nNOR,150\nNOR,160\n",
        );

        let merged = load_driver_telemetry(car_dir.path(), bio_dir.path(), "NOR");
        assert_eq!(merged.races, vec!["Monaco", "Spain"]);
        assert_eq!(merged.frame.value(0, "HeartRate_bpm_mean"), Some(155.0));
        assert_eq!(merged.frame.value(0, "HeartRate_bpm_max"), Some(160.0));
        assert_eq!(merged.frame.value(1, "HeartRate_bpm_mean"), Some(0.0));
        assert_eq!(merged.frame.value(0, "bio_samples"), Some(2.0));
    }

    #[test]
    fn test_bio_without_driver_column_keeps_all_rows() {
        let car_dir = tempfile::tempdir().unwrap();
        let bio_dir = tempfile::tempdir().unwrap();
        write_car_csv(car_dir.path(), "Monaco", "Driver,RPM\nNOR,10000\n");
        write_bio_csv(bio_dir.path(), "Monaco", "HeartRate_bpm\n140\n150\n");

        let merged = load_driver_telemetry(car_dir.path(), bio_dir.path(), "NOR");
        assert_eq!(merged.frame.value(0, "HeartRate_bpm_mean"), Some(145.0));
    }

    #[test]
    fn test_unparseable_cells_are_coerced_away() {
        let dir = tempfile::tempdir().unwrap();
        write_car_csv(
            dir.path(),
            "Monaco",
            "Driver,RPM,Speed\nNOR,10000,200\nNOR,n/a,202\nNOR,12000,\n",
        );
        let merged = load_driver_telemetry(dir.path(), Path::new("/nonexistent"), "NOR");
        assert_eq!(merged.frame.value(0, "RPM_mean"), Some(11000.0));
        assert_eq!(merged.frame.value(0, "Speed_mean"), Some(201.0));
        // Sample count is rows, not parseable values
        assert_eq!(merged.frame.value(0, "samples"), Some(3.0));
    }

    #[test]
    fn test_missing_directory_yields_empty_season() {
        let merged = load_driver_telemetry(
            Path::new("/nonexistent/car"),
            Path::new("/nonexistent/bio"),
            "NOR",
        );
        assert_eq!(merged.n_races(), 0);
    }

    #[test]
    fn test_quoted_fields() {
        let fields = split_csv_line("NOR,\"Monaco, Monte Carlo\",200");
        assert_eq!(fields, vec!["NOR", "Monaco, Monte Carlo", "200"]);
    }
}
