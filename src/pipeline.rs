// Stage orchestration.
//
// Every stage returns owned data plus a report of what it dropped. Files are
// only written by the `write_*` helpers, which callers invoke after the last
// fallible stage has succeeded.
use crate::change::{compute_change, ChangeOutcome};
use crate::cohorts::CohortReducer;
use crate::config::Config;
use crate::density::{enrich, EnrichmentReport};
use crate::error::{PipelineError, Result};
use crate::forecast::{predict_table, train_all, HoldoutReport};
use crate::lags::{build_lags, LagMode, LagSpec};
use crate::loader::{load_assignments, load_grid, AssignmentReport, LoadReport};
use crate::output::{write_csv, write_json, StagedBatch};
use crate::regions::{attach, resolve, JoinReport};
use crate::types::{EnrichedRecord, RunSummary};
use log::{info, warn};
use std::fs;
use std::path::Path;

#[derive(Debug)]
pub struct DatasetOutcome {
    pub records: Vec<EnrichedRecord>,
    pub load: LoadReport,
    pub assignments: AssignmentReport,
    pub join: JoinReport,
    pub enrichment: EnrichmentReport,
}

/// Ingest every year, attach regions, roll up and reduce to cohorts.
pub fn build_dataset(config: &Config) -> Result<DatasetOutcome> {
    config.validate()?;
    let bands = config.cohorts.all_bands();
    let (table, load) = load_grid(&config.ingest, &config.columns, &bands)?;
    let reducer = CohortReducer::new(&table.band_names, &config.cohorts)?;
    let (links, assignments) =
        load_assignments(&config.ingest.assignment_path(), &config.columns)?;

    let (rows, join) = resolve(attach(table.rows, &links));
    let enriched = enrich(&rows, &reducer, config.density_scale);
    info!(
        "enriched dataset: {} rows over {} years",
        enriched.records.len(),
        config.ingest.years().count()
    );
    Ok(DatasetOutcome {
        records: enriched.records,
        load,
        assignments,
        join,
        enrichment: enriched.report,
    })
}

#[derive(Debug)]
pub struct ForecastOutcome {
    pub change: ChangeOutcome,
    pub training_rows: usize,
    pub insufficient_history: usize,
    pub predicted_cells: usize,
    pub forecast_year: i32,
    pub holdout: Vec<HoldoutReport>,
}

/// Lag, train one model per cohort, predict from the prediction year and
/// compare per municipality against that same year.
pub fn forecast(config: &Config, records: &[EnrichedRecord]) -> Result<ForecastOutcome> {
    config.validate()?;
    let spec = LagSpec {
        signals: config.signals()?,
        window: config.lags.window,
        horizon: config.lags.horizon,
    };
    let year = config.forecast.prediction_year;

    let training = build_lags(records, &spec, LagMode::Training);
    let models = train_all(&training.table, &config.models, config.forecast.evaluate)?;

    let input = build_lags(records, &spec, LagMode::Prediction { year });
    if input.table.rows.is_empty() {
        return Err(PipelineError::NothingToPredict(year));
    }
    let forecast_year = year + spec.horizon as i32;
    let cells = predict_table(&models, &input.table, forecast_year)?;
    info!(
        "predicted {} cells for {} from {} inputs",
        cells.len(),
        forecast_year,
        year
    );

    let change = compute_change(&cells, records, year);
    Ok(ForecastOutcome {
        change,
        training_rows: training.table.rows.len(),
        insufficient_history: training.insufficient_history + input.insufficient_history,
        predicted_cells: cells.len(),
        forecast_year,
        holdout: models.holdout,
    })
}

pub fn summarize(
    config: &Config,
    dataset: Option<&DatasetOutcome>,
    forecast: Option<&ForecastOutcome>,
) -> RunSummary {
    RunSummary {
        generated_at: chrono::Utc::now().to_rfc3339(),
        years: (config.ingest.start_year, config.ingest.end_year),
        grid_rows: dataset.map(|d| d.load.loaded_rows),
        skipped_rows: dataset.map(|d| d.load.skipped()),
        band_mismatches: dataset.map(|d| d.load.band_mismatches),
        incomplete_assignments: dataset.map(|d| d.assignments.incomplete_rows),
        unmatched_rows: dataset.map(|d| d.join.unmatched),
        zero_area_groups: dataset.map(|d| d.enrichment.zero_area_groups),
        missing_rollup_rows: dataset.map(|d| d.enrichment.missing_rollup_rows),
        enriched_rows: dataset.map(|d| d.records.len()),
        training_rows: forecast.map(|f| f.training_rows),
        insufficient_history_rows: forecast.map(|f| f.insufficient_history),
        predicted_cells: forecast.map(|f| f.predicted_cells),
        municipalities: forecast.map(|f| f.change.rows.len()),
        zero_baselines: forecast.map(|f| f.change.zero_baselines),
        unpredicted_municipalities: forecast.map(|f| f.change.unpredicted),
        holdout_mse: forecast
            .map(|f| f.holdout.iter().map(|h| (h.cohort, h.mse)).collect())
            .unwrap_or_default(),
    }
}

/// Earlier summary at `path`, if one exists and parses.
fn read_summary(path: &Path) -> Option<RunSummary> {
    let text = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&text) {
        Ok(summary) => Some(summary),
        Err(e) => {
            warn!("ignoring unreadable summary {}: {}", path.display(), e);
            None
        }
    }
}

pub fn write_dataset(config: &Config, dataset: &DatasetOutcome) -> Result<()> {
    let path = config.output_path(&config.output.dataset_file);
    write_csv(&path, &dataset.records)?;
    info!("dataset saved to {}", path.display());
    Ok(())
}

pub fn write_predictions(config: &Config, forecast: &ForecastOutcome) -> Result<()> {
    let path = config.output_path(&config.output.predictions_file);
    write_csv(&path, &forecast.change.rows)?;
    info!("predictions saved to {}", path.display());
    Ok(())
}

/// Write `summary`, keeping dataset counts from the summary already on disk
/// when this run did not build the dataset.
pub fn write_summary(config: &Config, mut summary: RunSummary) -> Result<()> {
    let path = config.output_path(&config.output.summary_file);
    if summary.grid_rows.is_none() {
        if let Some(previous) = read_summary(&path) {
            summary.carry_dataset_counts(&previous);
        }
    }
    write_json(&path, &summary)
}

/// Full run. Every output is staged first and only renamed into place once
/// all of them were written; any failure leaves no output behind.
pub fn run(config: &Config) -> Result<(DatasetOutcome, ForecastOutcome)> {
    let dataset = build_dataset(config)?;
    let forecast = forecast(config, &dataset.records)?;

    let summary = summarize(config, Some(&dataset), Some(&forecast));
    let mut batch = StagedBatch::default();
    batch.csv(&config.output_path(&config.output.dataset_file), &dataset.records)?;
    batch.csv(
        &config.output_path(&config.output.predictions_file),
        &forecast.change.rows,
    )?;
    batch.json(&config.output_path(&config.output.summary_file), &summary)?;
    batch.commit()?;
    info!(
        "dataset, predictions and summary saved under {}",
        config.ingest.data_dir.display()
    );
    Ok((dataset, forecast))
}
