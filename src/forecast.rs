// One boosted model per cohort, trained on lagged grid rows.
use crate::booster::BoostedTrees;
use crate::config::{BoosterParams, ModelConfig};
use crate::error::{PipelineError, Result};
use crate::lags::{LagTable, LaggedFeatureRow};
use crate::types::{Cohort, CohortTotals, PredictionRow};
use crate::util::mean_squared_error;
use log::info;
use rayon::prelude::*;

/// A fitted cohort model bound to the exact feature list it was trained on.
#[derive(Debug, Clone)]
pub struct ForecastModel {
    pub cohort: Cohort,
    pub feature_names: Vec<String>,
    pub training_rows: usize,
    regressor: BoostedTrees,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HoldoutReport {
    pub cohort: Cohort,
    pub test_year: i32,
    pub train_rows: usize,
    pub test_rows: usize,
    pub mse: f64,
}

/// Borrowed view of one feature row: the names it exposes and their values.
#[derive(Debug, Clone, Copy)]
pub struct FeatureRow<'a> {
    pub names: &'a [String],
    pub values: &'a [f64],
}

impl<'a> FeatureRow<'a> {
    pub fn of(table: &'a LagTable, row: &'a LaggedFeatureRow) -> Self {
        FeatureRow {
            names: &table.feature_names,
            values: &row.values,
        }
    }
}

fn target(row: &LaggedFeatureRow, cohort: Cohort) -> f64 {
    row.record.cohorts().get(cohort)
}

fn fit(
    table: &LagTable,
    rows: &[&LaggedFeatureRow],
    cohort: Cohort,
    params: &BoosterParams,
    partition: &'static str,
) -> Result<ForecastModel> {
    if rows.is_empty() {
        return Err(PipelineError::EmptyTraining {
            cohort: cohort.to_string(),
            partition,
        });
    }
    let x: Vec<Vec<f64>> = rows.iter().map(|r| r.values.clone()).collect();
    let y: Vec<f64> = rows.iter().map(|r| target(r, cohort)).collect();
    let regressor = BoostedTrees::fit(params, &x, &y);
    info!(
        "trained {} model on {} rows, {} features, {} trees",
        cohort,
        rows.len(),
        table.feature_names.len(),
        regressor.n_trees()
    );
    Ok(ForecastModel {
        cohort,
        feature_names: table.feature_names.clone(),
        training_rows: rows.len(),
        regressor,
    })
}

/// Train on every row of `table`.
pub fn train_full(
    table: &LagTable,
    cohort: Cohort,
    params: &BoosterParams,
) -> Result<ForecastModel> {
    let rows: Vec<&LaggedFeatureRow> = table.rows.iter().collect();
    fit(table, &rows, cohort, params, "all years")
}

/// Train on every year but the newest and report the error on that newest
/// year.
pub fn train_with_holdout(
    table: &LagTable,
    cohort: Cohort,
    params: &BoosterParams,
) -> Result<(ForecastModel, HoldoutReport)> {
    let test_year = table.years().max().ok_or_else(|| PipelineError::EmptyTraining {
        cohort: cohort.to_string(),
        partition: "all years",
    })?;
    let (test, train): (Vec<&LaggedFeatureRow>, Vec<&LaggedFeatureRow>) =
        table.rows.iter().partition(|r| r.record.year == test_year);
    let model = fit(table, &train, cohort, params, "years before the holdout")?;

    let actual: Vec<f64> = test.iter().map(|r| target(r, cohort)).collect();
    let predicted: Vec<f64> = test
        .iter()
        .map(|r| model.regressor.predict(&r.values))
        .collect();
    let report = HoldoutReport {
        cohort,
        test_year,
        train_rows: train.len(),
        test_rows: test.len(),
        mse: mean_squared_error(&actual, &predicted),
    };
    info!(
        "{} holdout {}: mean squared error {:.4} over {} rows",
        cohort, test_year, report.mse, report.test_rows
    );
    Ok((model, report))
}

#[derive(Debug, Clone)]
pub struct CohortModels {
    pub models: Vec<ForecastModel>,
    pub holdout: Vec<HoldoutReport>,
}

impl CohortModels {
    pub fn get(&self, cohort: Cohort) -> Option<&ForecastModel> {
        self.models.iter().find(|m| m.cohort == cohort)
    }
}

/// Train the three cohort models independently and in parallel.
pub fn train_all(table: &LagTable, models: &ModelConfig, evaluate: bool) -> Result<CohortModels> {
    let trained: Vec<(ForecastModel, Option<HoldoutReport>)> = Cohort::ALL
        .par_iter()
        .map(|&cohort| {
            let params = models.for_cohort(cohort);
            if evaluate {
                train_with_holdout(table, cohort, params).map(|(m, r)| (m, Some(r)))
            } else {
                train_full(table, cohort, params).map(|m| (m, None))
            }
        })
        .collect::<Result<_>>()?;

    let mut out = CohortModels {
        models: Vec::with_capacity(3),
        holdout: Vec::new(),
    };
    for (model, report) in trained {
        out.models.push(model);
        out.holdout.extend(report);
    }
    Ok(out)
}

/// Predict one value. The row must expose exactly the model's features, in
/// the same order.
pub fn predict(model: &ForecastModel, row: FeatureRow<'_>) -> Result<f64> {
    if row.names != model.feature_names.as_slice() || row.values.len() != row.names.len() {
        let missing: Vec<String> = model
            .feature_names
            .iter()
            .filter(|f| !row.names.contains(f))
            .cloned()
            .collect();
        let unexpected: Vec<String> = row
            .names
            .iter()
            .filter(|f| !model.feature_names.contains(f))
            .cloned()
            .collect();
        let reordered = missing.is_empty() && unexpected.is_empty();
        return Err(PipelineError::FeatureMismatch {
            cohort: model.cohort.to_string(),
            missing,
            unexpected,
            reordered,
        });
    }
    Ok(model.regressor.predict(row.values))
}

/// Predict all three cohorts for every row of a prediction-mode lag table.
pub fn predict_table(
    models: &CohortModels,
    table: &LagTable,
    forecast_year: i32,
) -> Result<Vec<PredictionRow>> {
    table
        .rows
        .iter()
        .map(|row| {
            let mut predicted = CohortTotals::default();
            for model in &models.models {
                predicted.set(model.cohort, predict(model, FeatureRow::of(table, row))?);
            }
            Ok(PredictionRow {
                grid_id: row.record.grid_id.clone(),
                kommun_name: row.record.kommun_name.clone(),
                input_year: row.record.year,
                forecast_year,
                predicted,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lags::tests::record;
    use crate::lags::{build_lags, LagMode, LagSpec, Signal};

    fn quick() -> BoosterParams {
        BoosterParams {
            n_estimators: 30,
            learning_rate: 0.3,
            max_depth: 2,
            ..BoosterParams::default()
        }
    }

    fn history() -> Vec<crate::types::EnrichedRecord> {
        let mut records = Vec::new();
        for (cell, base) in [("a", 100.0), ("b", 300.0), ("c", 50.0)] {
            for i in 0..6 {
                records.push(record(cell, 2015 + i, base + 10.0 * i as f64));
            }
        }
        records
    }

    fn spec() -> LagSpec {
        LagSpec {
            signals: vec![Signal::Population, Signal::Kids],
            window: 2,
            horizon: 1,
        }
    }

    #[test]
    fn holdout_splits_on_the_newest_year() {
        let table = build_lags(&history(), &spec(), LagMode::Training).table;
        let (model, report) = train_with_holdout(&table, Cohort::Kids, &quick()).unwrap();
        assert_eq!(report.test_year, 2020);
        assert_eq!(report.test_rows, 3);
        assert_eq!(report.train_rows, 9);
        assert_eq!(model.training_rows, 9);
        assert!(report.mse.is_finite());
    }

    #[test]
    fn full_training_uses_every_row() {
        let table = build_lags(&history(), &spec(), LagMode::Training).table;
        let models = train_all(&table, &ModelConfig::default(), false).unwrap();
        assert_eq!(models.models.len(), 3);
        assert!(models.holdout.is_empty());
        for cohort in Cohort::ALL {
            let m = models.get(cohort).unwrap();
            assert_eq!(m.training_rows, 12);
            assert_eq!(m.feature_names, table.feature_names);
        }
    }

    #[test]
    fn empty_table_is_an_error() {
        let table = LagTable {
            feature_names: spec().feature_names(),
            rows: Vec::new(),
        };
        assert!(matches!(
            train_full(&table, Cohort::Adults, &quick()),
            Err(PipelineError::EmptyTraining { .. })
        ));
        assert!(train_with_holdout(&table, Cohort::Adults, &quick()).is_err());
    }

    #[test]
    fn predict_rejects_missing_extra_and_reordered_features() {
        let table = build_lags(&history(), &spec(), LagMode::Training).table;
        let model = train_full(&table, Cohort::Seniors, &quick()).unwrap();
        let values = table.rows[0].values.clone();

        let ok = predict(&model, FeatureRow::of(&table, &table.rows[0])).unwrap();
        assert!(ok.is_finite());

        let names = table.feature_names[..3].to_vec();
        let row = FeatureRow {
            names: &names,
            values: &values[..3],
        };
        match predict(&model, row).unwrap_err() {
            PipelineError::FeatureMismatch { missing, .. } => {
                assert_eq!(missing, vec!["kids_population_lag_2".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }

        let mut extra = table.feature_names.clone();
        extra.push("beftotalt_lag_3".to_string());
        let mut extra_values = values.clone();
        extra_values.push(1.0);
        let row = FeatureRow {
            names: &extra,
            values: &extra_values,
        };
        match predict(&model, row).unwrap_err() {
            PipelineError::FeatureMismatch { unexpected, .. } => {
                assert_eq!(unexpected, vec!["beftotalt_lag_3".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }

        let mut swapped = table.feature_names.clone();
        swapped.swap(0, 1);
        let row = FeatureRow {
            names: &swapped,
            values: &values,
        };
        let err = predict(&model, row).unwrap_err();
        assert!(matches!(err, PipelineError::FeatureMismatch { reordered: true, .. }));
    }

    #[test]
    fn prediction_table_uses_the_training_schema() {
        let records = history();
        let training = build_lags(&records, &spec(), LagMode::Training).table;
        let models = train_all(&training, &ModelConfig::default(), false).unwrap();
        let input = build_lags(&records, &spec(), LagMode::Prediction { year: 2020 }).table;
        let predictions = predict_table(&models, &input, 2021).unwrap();

        assert_eq!(predictions.len(), 3);
        for p in &predictions {
            assert_eq!(p.input_year, 2020);
            assert_eq!(p.forecast_year, 2021);
            assert!(p.predicted.total().is_finite());
        }
    }
}
