// Run configuration.
//
// Every column list, year bound and model setting the pipeline uses lives
// here. `Config::default()` is the production setup (Swedish 1 km grid,
// 2015-2024, RegSO/kommun rollups); a TOML file may override any subset.
use crate::error::ConfigError;
use crate::lags::Signal;
use crate::types::Cohort;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ingest: IngestConfig,
    pub columns: ColumnNames,
    pub cohorts: CohortDefinitions,
    pub density_scale: f64,
    pub lags: LagConfig,
    pub models: ModelConfig,
    pub forecast: ForecastConfig,
    pub output: OutputConfig,
    pub segments: SegmentConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ingest: IngestConfig::default(),
            columns: ColumnNames::default(),
            cohorts: CohortDefinitions::default(),
            density_scale: 1000.0,
            lags: LagConfig::default(),
            models: ModelConfig::default(),
            forecast: ForecastConfig::default(),
            output: OutputConfig::default(),
            segments: SegmentConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub data_dir: PathBuf,
    pub file_prefix: String,
    pub start_year: i32,
    pub end_year: i32,
    pub assignment_file: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            data_dir: PathBuf::from("data"),
            file_prefix: "befolkning_1km_".to_string(),
            start_year: 2015,
            end_year: 2024,
            assignment_file: "RegSO_2025_Link.csv".to_string(),
        }
    }
}

impl IngestConfig {
    pub fn years(&self) -> std::ops::RangeInclusive<i32> {
        self.start_year..=self.end_year
    }

    pub fn year_path(&self, year: i32) -> PathBuf {
        self.data_dir.join(format!("{}{}.csv", self.file_prefix, year))
    }

    pub fn assignment_path(&self) -> PathBuf {
        self.data_dir.join(&self.assignment_file)
    }
}

/// Source column names of the grid and assignment tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnNames {
    pub grid_id: String,
    pub area: String,
    pub population: String,
    pub regso_code: String,
    pub regso_name: String,
    pub kommun_code: String,
    pub kommun_name: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        ColumnNames {
            grid_id: "rutid_inspire".to_string(),
            area: "rutstorl".to_string(),
            population: "beftotalt".to_string(),
            regso_code: "regsokod".to_string(),
            regso_name: "regsonamn".to_string(),
            kommun_code: "kommunkod".to_string(),
            kommun_name: "kommunnamn".to_string(),
        }
    }
}

/// Age-band columns folded into each cohort. The three lists must be disjoint
/// and together cover every band of the grid table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CohortDefinitions {
    pub kids: Vec<String>,
    pub adults: Vec<String>,
    pub seniors: Vec<String>,
}

impl Default for CohortDefinitions {
    fn default() -> Self {
        let owned = |cols: &[&str]| cols.iter().map(|c| c.to_string()).collect();
        CohortDefinitions {
            kids: owned(&["ald0_5", "ald5_10", "ald10_15", "ald15_20"]),
            adults: owned(&[
                "ald20_25", "ald25_30", "ald30_35", "ald35_40", "ald40_45", "ald45_50",
                "ald50_55", "ald55_60", "ald60_65",
            ]),
            seniors: owned(&[
                "ald65_70", "ald70_75", "ald75_80", "ald80_85", "ald85_90", "ald90_95",
                "ald95_100", "ald100w",
            ]),
        }
    }
}

impl CohortDefinitions {
    pub fn bands(&self, cohort: Cohort) -> &[String] {
        match cohort {
            Cohort::Kids => &self.kids,
            Cohort::Adults => &self.adults,
            Cohort::Seniors => &self.seniors,
        }
    }

    /// Every band in cohort order (kids, adults, seniors).
    pub fn all_bands(&self) -> Vec<String> {
        Cohort::ALL
            .iter()
            .flat_map(|c| self.bands(*c).iter().cloned())
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut owner: HashMap<&str, Cohort> = HashMap::new();
        for cohort in Cohort::ALL {
            let bands = self.bands(cohort);
            if bands.is_empty() {
                return Err(ConfigError::EmptyCohort(cohort.to_string()));
            }
            for band in bands {
                if let Some(first) = owner.insert(band.as_str(), cohort) {
                    return Err(ConfigError::OverlappingCohorts {
                        band: band.clone(),
                        first: first.to_string(),
                        second: cohort.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LagConfig {
    pub window: usize,
    /// Years between the newest lag in a training row and its target.
    pub horizon: usize,
    pub signals: Vec<String>,
}

impl Default for LagConfig {
    fn default() -> Self {
        LagConfig {
            window: 4,
            horizon: 2,
            signals: Signal::PRODUCTION
                .iter()
                .map(|s| s.as_ref().to_string())
                .collect(),
        }
    }
}

/// Hyperparameters of one cohort's boosted tree ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoosterParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_child_weight: f64,
    pub lambda: f64,
    pub subsample: f64,
    pub seed: u64,
}

impl Default for BoosterParams {
    fn default() -> Self {
        BoosterParams {
            n_estimators: 200,
            learning_rate: 0.05,
            max_depth: 6,
            min_child_weight: 1.0,
            lambda: 1.0,
            subsample: 1.0,
            seed: 42,
        }
    }
}

impl BoosterParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_estimators == 0 {
            return Err(ConfigError::InvalidParameter(
                "n_estimators must be positive".to_string(),
            ));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(ConfigError::InvalidParameter(format!(
                "learning_rate must be in (0, 1], got {}",
                self.learning_rate
            )));
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return Err(ConfigError::InvalidParameter(format!(
                "subsample must be in (0, 1], got {}",
                self.subsample
            )));
        }
        if self.lambda < 0.0 || self.min_child_weight < 0.0 {
            return Err(ConfigError::InvalidParameter(
                "lambda and min_child_weight must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub kids: BoosterParams,
    pub adults: BoosterParams,
    pub seniors: BoosterParams,
}

impl ModelConfig {
    pub fn for_cohort(&self, cohort: Cohort) -> &BoosterParams {
        match cohort {
            Cohort::Kids => &self.kids,
            Cohort::Adults => &self.adults,
            Cohort::Seniors => &self.seniors,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Most recent observed year; its rows feed the prediction and it is the
    /// percent-change baseline.
    pub prediction_year: i32,
    /// Hold out the newest training year and log its MSE instead of training
    /// on every row.
    pub evaluate: bool,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        ForecastConfig {
            prediction_year: 2024,
            evaluate: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dataset_file: String,
    pub predictions_file: String,
    pub summary_file: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            dataset_file: "befolkning_1km_regso_kommun_aggregated.csv".to_string(),
            predictions_file: "population_predictions_kommun.csv".to_string(),
            summary_file: "summary.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    pub top_n: usize,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        SegmentConfig { top_n: 20 }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        toml::from_str(&text).map_err(|e| ConfigError::Unreadable {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn output_path(&self, file: &str) -> PathBuf {
        self.ingest.data_dir.join(file)
    }

    /// Parsed lag signals, in configured order.
    pub fn signals(&self) -> Result<Vec<Signal>, ConfigError> {
        if self.lags.signals.is_empty() {
            return Err(ConfigError::NoSignals);
        }
        let mut parsed: Vec<Signal> = Vec::with_capacity(self.lags.signals.len());
        for name in &self.lags.signals {
            let signal: Signal = name
                .parse()
                .map_err(|_| ConfigError::UnknownSignal(name.clone()))?;
            if parsed.contains(&signal) {
                return Err(ConfigError::DuplicateSignal(name.clone()));
            }
            parsed.push(signal);
        }
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let (start, end) = (self.ingest.start_year, self.ingest.end_year);
        if start > end {
            return Err(ConfigError::EmptyYearRange { start, end });
        }
        let year = self.forecast.prediction_year;
        if !(start..=end).contains(&year) {
            return Err(ConfigError::PredictionYearOutOfRange { year, start, end });
        }
        if !(self.density_scale > 0.0) {
            return Err(ConfigError::InvalidParameter(format!(
                "density_scale must be positive, got {}",
                self.density_scale
            )));
        }
        if self.lags.window == 0 || self.lags.horizon == 0 {
            return Err(ConfigError::InvalidParameter(
                "lag window and horizon must be at least 1".to_string(),
            ));
        }
        self.cohorts.validate()?;
        self.signals()?;
        for cohort in Cohort::ALL {
            self.models.for_cohort(cohort).validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.signals().unwrap().len(), 14);
        assert_eq!(config.cohorts.all_bands().len(), 21);
    }

    #[test]
    fn overlapping_cohorts_are_rejected() {
        let mut config = Config::default();
        config.cohorts.adults.push("ald15_20".to_string());
        assert_eq!(
            config.validate(),
            Err(ConfigError::OverlappingCohorts {
                band: "ald15_20".to_string(),
                first: "kids".to_string(),
                second: "adults".to_string(),
            })
        );
    }

    #[test]
    fn unknown_and_duplicate_signals_are_rejected() {
        let mut config = Config::default();
        config.lags.signals = vec!["beftotalt".to_string(), "bogus".to_string()];
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnknownSignal("bogus".to_string()))
        );

        config.lags.signals = vec!["beftotalt".to_string(), "beftotalt".to_string()];
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateSignal("beftotalt".to_string()))
        );
    }

    #[test]
    fn prediction_year_must_be_ingested() {
        let mut config = Config::default();
        config.forecast.prediction_year = 2025;
        assert_eq!(
            config.validate(),
            Err(ConfigError::PredictionYearOutOfRange {
                year: 2025,
                start: 2015,
                end: 2024
            })
        );
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let text = r#"
            density_scale = 500.0

            [ingest]
            start_year = 2020
            end_year = 2023

            [lags]
            window = 2

            [models.kids]
            n_estimators = 50

            [forecast]
            prediction_year = 2023
            evaluate = true
        "#;
        let config: Config = toml::from_str(text).unwrap();
        assert_eq!(config.ingest.start_year, 2020);
        assert_eq!(config.ingest.file_prefix, "befolkning_1km_");
        assert_eq!(config.lags.window, 2);
        assert_eq!(config.lags.horizon, 2);
        assert_eq!(config.models.kids.n_estimators, 50);
        assert_eq!(config.models.kids.learning_rate, 0.05);
        assert_eq!(config.models.adults.n_estimators, 200);
        assert!(config.forecast.evaluate);
        assert_eq!(config.validate(), Ok(()));
    }
}
