use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use tabled::Tabled;

/// One grid square in one year, as read from the yearly census table.
#[derive(Debug, Clone, PartialEq)]
pub struct GridCellRecord {
    pub grid_id: String,
    pub year: i32,
    pub area: f64,
    pub population: f64,
    /// Age-band counts, ordered like `GridTable::band_names`.
    pub bands: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridIdKind {
    Numeric,
    Text,
}

impl GridIdKind {
    pub fn infer<'a>(ids: impl IntoIterator<Item = &'a str>) -> Self {
        let mut saw_any = false;
        for id in ids {
            saw_any = true;
            if id.trim().parse::<i64>().is_err() {
                return GridIdKind::Text;
            }
        }
        if saw_any {
            GridIdKind::Numeric
        } else {
            GridIdKind::Text
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GridIdKind::Numeric => "numeric",
            GridIdKind::Text => "text",
        }
    }
}

/// Longitudinal grid table: every loaded year appended in year order.
#[derive(Debug, Clone, Default)]
pub struct GridTable {
    pub band_names: Vec<String>,
    pub rows: Vec<GridCellRecord>,
    pub id_kind: Option<GridIdKind>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionAssignment {
    pub grid_id: String,
    pub regso_code: String,
    pub regso_name: String,
    pub kommun_code: String,
    pub kommun_name: String,
}

/// Administrative rollup tier above the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Level {
    Regso,
    Kommun,
}

impl Level {
    pub fn code(self, region: &RegionAssignment) -> &str {
        match self {
            Level::Regso => &region.regso_code,
            Level::Kommun => &region.kommun_code,
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Cohort {
    Kids,
    Adults,
    Seniors,
}

impl Cohort {
    pub const ALL: [Cohort; 3] = [Cohort::Kids, Cohort::Adults, Cohort::Seniors];
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CohortTotals {
    pub kids: f64,
    pub adults: f64,
    pub seniors: f64,
}

impl CohortTotals {
    pub fn get(&self, cohort: Cohort) -> f64 {
        match cohort {
            Cohort::Kids => self.kids,
            Cohort::Adults => self.adults,
            Cohort::Seniors => self.seniors,
        }
    }

    pub fn set(&mut self, cohort: Cohort, value: f64) {
        match cohort {
            Cohort::Kids => self.kids = value,
            Cohort::Adults => self.adults = value,
            Cohort::Seniors => self.seniors = value,
        }
    }

    pub fn total(&self) -> f64 {
        self.kids + self.adults + self.seniors
    }

    pub fn add(&mut self, other: &CohortTotals) {
        self.kids += other.kids;
        self.adults += other.adults;
        self.seniors += other.seniors;
    }
}

/// Grid cell joined with its regions, reduced to cohorts and carrying the
/// density-normalized rollups of both administrative levels.
///
/// Serialized with the census column names (`rutid_inspire`, `beftotalt`,
/// `rutstorl_kommun_sum`, ...) so the saved dataset keeps the source schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    #[serde(rename = "rutid_inspire")]
    pub grid_id: String,
    pub year: i32,
    #[serde(rename = "rutstorl")]
    pub area: f64,
    #[serde(rename = "beftotalt")]
    pub population: f64,
    #[serde(rename = "regsokod")]
    pub regso_code: String,
    #[serde(rename = "regsonamn")]
    pub regso_name: String,
    #[serde(rename = "kommunkod")]
    pub kommun_code: String,
    #[serde(rename = "kommunnamn")]
    pub kommun_name: String,
    pub kids_population: f64,
    pub adult_population: f64,
    pub senior_population: f64,
    #[serde(rename = "rutstorl_kommun_sum")]
    pub area_kommun_sum: f64,
    #[serde(rename = "beftotalt_kommun_sum")]
    pub population_kommun_sum: f64,
    pub kids_population_kommun_sum: f64,
    pub adult_population_kommun_sum: f64,
    pub senior_population_kommun_sum: f64,
    #[serde(rename = "rutstorl_regso_sum")]
    pub area_regso_sum: f64,
    #[serde(rename = "beftotalt_regso_sum")]
    pub population_regso_sum: f64,
    pub kids_population_regso_sum: f64,
    pub adult_population_regso_sum: f64,
    pub senior_population_regso_sum: f64,
}

impl EnrichedRecord {
    pub fn cohorts(&self) -> CohortTotals {
        CohortTotals {
            kids: self.kids_population,
            adults: self.adult_population,
            seniors: self.senior_population,
        }
    }

    pub fn rollup_cohorts(&self, level: Level) -> CohortTotals {
        match level {
            Level::Kommun => CohortTotals {
                kids: self.kids_population_kommun_sum,
                adults: self.adult_population_kommun_sum,
                seniors: self.senior_population_kommun_sum,
            },
            Level::Regso => CohortTotals {
                kids: self.kids_population_regso_sum,
                adults: self.adult_population_regso_sum,
                seniors: self.senior_population_regso_sum,
            },
        }
    }

    pub fn rollup_population(&self, level: Level) -> f64 {
        match level {
            Level::Kommun => self.population_kommun_sum,
            Level::Regso => self.population_regso_sum,
        }
    }
}

/// One (level, region, year) group of summed and density-normalized counters.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedRegionYear {
    pub level: Level,
    pub region_code: String,
    pub year: i32,
    pub cells: usize,
    pub area_sum: f64,
    pub population_sum: f64,
    pub band_sums: Vec<f64>,
    pub population_density: f64,
    pub band_density: Vec<f64>,
}

/// Per-cell prediction for the forecast year.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRow {
    pub grid_id: String,
    pub kommun_name: String,
    pub input_year: i32,
    pub forecast_year: i32,
    pub predicted: CohortTotals,
}

/// Municipality-level forecast compared against the baseline year.
///
/// Change columns are empty when the baseline cohort total is zero or the
/// municipality has no predicted cells. Name, population and area keep the
/// census column names read by the plotting scripts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionPrediction {
    #[serde(rename = "kommunnamn")]
    pub kommun_name: String,
    pub baseline_year: i32,
    pub forecast_year: i32,
    #[serde(rename = "beftotalt")]
    pub population: f64,
    #[serde(rename = "rutstorl")]
    pub area: f64,
    pub kids_population: f64,
    pub adult_population: f64,
    pub senior_population: f64,
    pub kids_population_pred: Option<f64>,
    pub adult_population_pred: Option<f64>,
    pub senior_population_pred: Option<f64>,
    pub kids_population_increase_p: Option<f64>,
    pub adult_population_increase_p: Option<f64>,
    pub senior_population_increase_p: Option<f64>,
}

impl RegionPrediction {
    pub fn change(&self, cohort: Cohort) -> Option<f64> {
        match cohort {
            Cohort::Kids => self.kids_population_increase_p,
            Cohort::Adults => self.adult_population_increase_p,
            Cohort::Seniors => self.senior_population_increase_p,
        }
    }
}

#[derive(Debug, Tabled, Clone)]
pub struct PredictionPreviewRow {
    #[tabled(rename = "Municipality")]
    pub kommun_name: String,
    #[tabled(rename = "Population")]
    pub population: String,
    #[tabled(rename = "Kids %")]
    pub kids: String,
    #[tabled(rename = "Adults %")]
    pub adults: String,
    #[tabled(rename = "Seniors %")]
    pub seniors: String,
}

#[derive(Debug, Tabled, Clone)]
pub struct QuadrantRow {
    #[tabled(rename = "Municipality")]
    pub kommun_name: String,
    #[tabled(rename = "Population")]
    pub population: String,
    #[tabled(rename = "Change %")]
    pub change: String,
    #[tabled(rename = "Quadrant")]
    pub quadrant: String,
}

/// Stage counts of the latest run. Dataset fields are `None` when only the
/// forecast stage ran and no earlier summary was available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub generated_at: String,
    pub years: (i32, i32),
    pub grid_rows: Option<usize>,
    pub skipped_rows: Option<usize>,
    pub band_mismatches: Option<usize>,
    pub incomplete_assignments: Option<usize>,
    pub unmatched_rows: Option<usize>,
    pub zero_area_groups: Option<usize>,
    pub missing_rollup_rows: Option<usize>,
    pub enriched_rows: Option<usize>,
    pub training_rows: Option<usize>,
    pub insufficient_history_rows: Option<usize>,
    pub predicted_cells: Option<usize>,
    pub municipalities: Option<usize>,
    pub zero_baselines: Option<usize>,
    pub unpredicted_municipalities: Option<usize>,
    pub holdout_mse: Vec<(Cohort, f64)>,
}

impl RunSummary {
    /// Fill dataset-stage counts this summary lacks from an earlier one.
    pub fn carry_dataset_counts(&mut self, previous: &RunSummary) {
        let carry = |own: &mut Option<usize>, old: Option<usize>| {
            if own.is_none() {
                *own = old;
            }
        };
        carry(&mut self.grid_rows, previous.grid_rows);
        carry(&mut self.skipped_rows, previous.skipped_rows);
        carry(&mut self.band_mismatches, previous.band_mismatches);
        carry(&mut self.incomplete_assignments, previous.incomplete_assignments);
        carry(&mut self.unmatched_rows, previous.unmatched_rows);
        carry(&mut self.zero_area_groups, previous.zero_area_groups);
        carry(&mut self.missing_rollup_rows, previous.missing_rollup_rows);
        carry(&mut self.enriched_rows, previous.enriched_rows);
    }
}
