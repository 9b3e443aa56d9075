// Per-cell lag windows over the enriched table.
//
// Training rows pair a target year with the signal values `horizon` to
// `horizon + window - 1` years earlier. Prediction rows take the newest
// `window` observations as-is, so the same feature columns describe a
// forecast `horizon` years past the prediction year.
use crate::types::{EnrichedRecord, Level};
use log::{debug, warn};
use rayon::prelude::*;
use std::collections::BTreeMap;
use strum_macros::{AsRefStr, Display, EnumString};

/// Per-row value of an enriched record usable as a lag feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
pub enum Signal {
    #[strum(serialize = "beftotalt")]
    Population,
    #[strum(serialize = "rutstorl_kommun_sum")]
    KommunArea,
    #[strum(serialize = "beftotalt_kommun_sum")]
    KommunPopulation,
    #[strum(serialize = "rutstorl_regso_sum")]
    RegsoArea,
    #[strum(serialize = "beftotalt_regso_sum")]
    RegsoPopulation,
    #[strum(serialize = "kids_population")]
    Kids,
    #[strum(serialize = "adult_population")]
    Adults,
    #[strum(serialize = "senior_population")]
    Seniors,
    #[strum(serialize = "kids_population_kommun_sum")]
    KommunKids,
    #[strum(serialize = "adult_population_kommun_sum")]
    KommunAdults,
    #[strum(serialize = "senior_population_kommun_sum")]
    KommunSeniors,
    #[strum(serialize = "kids_population_regso_sum")]
    RegsoKids,
    #[strum(serialize = "adult_population_regso_sum")]
    RegsoAdults,
    #[strum(serialize = "senior_population_regso_sum")]
    RegsoSeniors,
}

impl Signal {
    pub const PRODUCTION: [Signal; 14] = [
        Signal::Population,
        Signal::KommunArea,
        Signal::KommunPopulation,
        Signal::RegsoArea,
        Signal::RegsoPopulation,
        Signal::Kids,
        Signal::Adults,
        Signal::Seniors,
        Signal::KommunKids,
        Signal::KommunAdults,
        Signal::KommunSeniors,
        Signal::RegsoKids,
        Signal::RegsoAdults,
        Signal::RegsoSeniors,
    ];

    pub fn value(self, r: &EnrichedRecord) -> f64 {
        match self {
            Signal::Population => r.population,
            Signal::KommunArea => r.area_kommun_sum,
            Signal::KommunPopulation => r.rollup_population(Level::Kommun),
            Signal::RegsoArea => r.area_regso_sum,
            Signal::RegsoPopulation => r.rollup_population(Level::Regso),
            Signal::Kids => r.kids_population,
            Signal::Adults => r.adult_population,
            Signal::Seniors => r.senior_population,
            Signal::KommunKids => r.kids_population_kommun_sum,
            Signal::KommunAdults => r.adult_population_kommun_sum,
            Signal::KommunSeniors => r.senior_population_kommun_sum,
            Signal::RegsoKids => r.kids_population_regso_sum,
            Signal::RegsoAdults => r.adult_population_regso_sum,
            Signal::RegsoSeniors => r.senior_population_regso_sum,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LagSpec {
    pub signals: Vec<Signal>,
    pub window: usize,
    pub horizon: usize,
}

impl LagSpec {
    /// Lag labels, `horizon ..= horizon + window - 1`.
    pub fn labels(&self) -> impl Iterator<Item = usize> + '_ {
        self.horizon..self.horizon + self.window
    }

    /// Column names, signal-major then lag.
    pub fn feature_names(&self) -> Vec<String> {
        self.signals
            .iter()
            .flat_map(|s| self.labels().map(move |k| format!("{}_lag_{}", s, k)))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LagMode {
    Training,
    Prediction { year: i32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LaggedFeatureRow {
    pub record: EnrichedRecord,
    /// One value per `LagTable::feature_names` entry.
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LagTable {
    pub feature_names: Vec<String>,
    pub rows: Vec<LaggedFeatureRow>,
}

impl LagTable {
    pub fn years(&self) -> impl Iterator<Item = i32> + '_ {
        self.rows.iter().map(|r| r.record.year)
    }
}

#[derive(Debug, Clone)]
pub struct LagOutcome {
    pub table: LagTable,
    /// Rows dropped for lacking a full window of history.
    pub insufficient_history: usize,
}

/// Build the lag table for `mode`.
///
/// Rows are grouped by grid id and ordered by year before shifting; the
/// incoming row order is irrelevant. Output is sorted by (grid id, year).
pub fn build_lags(records: &[EnrichedRecord], spec: &LagSpec, mode: LagMode) -> LagOutcome {
    let mut by_cell: BTreeMap<&str, Vec<&EnrichedRecord>> = BTreeMap::new();
    for r in records {
        by_cell.entry(r.grid_id.as_str()).or_default().push(r);
    }

    let shifts: Vec<usize> = match mode {
        LagMode::Training => spec.labels().collect(),
        LagMode::Prediction { .. } => (0..spec.window).collect(),
    };

    let per_cell: Vec<(Vec<LaggedFeatureRow>, usize)> = by_cell
        .into_par_iter()
        .map(|(_, mut seq)| {
            seq.sort_by_key(|r| r.year);
            let mut rows = Vec::new();
            let mut short = 0usize;
            for (pos, record) in seq.iter().enumerate() {
                if let LagMode::Prediction { year } = mode {
                    if record.year != year {
                        continue;
                    }
                }
                let Some(&deepest) = shifts.last() else {
                    continue;
                };
                if pos < deepest {
                    short += 1;
                    continue;
                }
                let mut values = Vec::with_capacity(spec.signals.len() * shifts.len());
                for signal in &spec.signals {
                    for &k in &shifts {
                        values.push(signal.value(seq[pos - k]));
                    }
                }
                rows.push(LaggedFeatureRow {
                    record: (*record).clone(),
                    values,
                });
            }
            (rows, short)
        })
        .collect();

    let mut rows = Vec::new();
    let mut insufficient_history = 0;
    for (cell_rows, short) in per_cell {
        rows.extend(cell_rows);
        insufficient_history += short;
    }

    if insufficient_history > 0 {
        warn!(
            "{} rows dropped for lacking {} years of history ({:?})",
            insufficient_history,
            shifts.last().map_or(0, |d| d + 1),
            mode
        );
    }
    debug!("built {} lagged rows ({:?})", rows.len(), mode);

    LagOutcome {
        table: LagTable {
            feature_names: spec.feature_names(),
            rows,
        },
        insufficient_history,
    }
}
