// Entry point and high-level CLI flow.
//
// - `dataset` ingests the yearly grid tables and writes the enriched,
//   cohort-reduced dataset.
// - `forecast` reads that dataset back, trains the cohort models and writes
//   the municipality predictions.
// - `run` does both in one pass and only writes once everything succeeded.
// - `segments` prints the quadrant and overlap breakdown of saved predictions.
mod booster;
mod change;
mod cohorts;
mod config;
mod density;
mod error;
mod forecast;
mod lags;
mod loader;
mod output;
mod pipeline;
mod regions;
mod segments;
mod types;
mod util;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::Config;
use pipeline::{DatasetOutcome, ForecastOutcome};
use std::path::PathBuf;
use types::{Cohort, PredictionPreviewRow, RegionPrediction};
use util::{format_int, format_number, format_opt};

#[derive(Parser)]
#[command(name = "rust_popforecast", about = "Grid population roll-up and cohort forecast")]
struct Cli {
    /// TOML file overriding the built-in configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory holding the yearly grid tables and outputs
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the enriched multi-year dataset
    Dataset,
    /// Train cohort models on the saved dataset and write predictions
    Forecast {
        /// Hold out the newest training year and report its error
        #[arg(long)]
        evaluate: bool,
    },
    /// Build the dataset and forecast in one pass
    Run {
        #[arg(long)]
        evaluate: bool,
    },
    /// Quadrant and overlap breakdown of saved predictions
    Segments {
        /// Number of most populous municipalities to classify
        #[arg(long)]
        top: Option<usize>,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.ingest.data_dir = dir.clone();
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn print_dataset(dataset: &DatasetOutcome) {
    println!(
        "Processing dataset... ({} rows read, {} loaded, {} enriched)",
        format_int(dataset.load.total_rows),
        format_int(dataset.load.loaded_rows),
        format_int(dataset.records.len())
    );
    if dataset.load.skipped() > 0 {
        println!(
            "Note: {} rows skipped due to parse/validation errors.",
            format_int(dataset.load.skipped())
        );
    }
    if dataset.assignments.incomplete_rows > 0 {
        println!(
            "Note: {} incomplete region assignment rows skipped.",
            format_int(dataset.assignments.incomplete_rows)
        );
    }
    if dataset.join.unmatched > 0 {
        println!(
            "Note: {} rows ({} grid cells) without a region assignment were dropped.",
            format_int(dataset.join.unmatched),
            format_int(dataset.join.unmatched_ids.len())
        );
    }
    println!();
}

fn preview_rows(rows: &[RegionPrediction]) -> Vec<PredictionPreviewRow> {
    let mut sorted: Vec<&RegionPrediction> = rows.iter().collect();
    sorted.sort_by(|a, b| b.population.total_cmp(&a.population));
    sorted
        .into_iter()
        .map(|r| PredictionPreviewRow {
            kommun_name: r.kommun_name.clone(),
            population: format_number(r.population, 0),
            kids: format_opt(r.kids_population_increase_p, 2),
            adults: format_opt(r.adult_population_increase_p, 2),
            seniors: format_opt(r.senior_population_increase_p, 2),
        })
        .collect()
}

fn print_forecast(config: &Config, forecast: &ForecastOutcome) {
    for h in &forecast.holdout {
        println!(
            "Holdout {} ({}): MSE {}",
            h.cohort,
            h.test_year,
            format_number(h.mse, 4)
        );
    }
    println!(
        "Forecast {} -> {} ({} cells, {} municipalities)\n",
        config.forecast.prediction_year,
        forecast.forecast_year,
        format_int(forecast.predicted_cells),
        format_int(forecast.change.rows.len())
    );
    output::preview_table_rows(&preview_rows(&forecast.change.rows), 10);
    println!(
        "(Full table exported to {})\n",
        config.output_path(&config.output.predictions_file).display()
    );
}

fn handle_segments(config: &Config, top: usize) -> anyhow::Result<()> {
    let path = config.output_path(&config.output.predictions_file);
    let rows: Vec<RegionPrediction> = loader::read_rows(&path)
        .with_context(|| format!("reading predictions from {}", path.display()))?;

    for cohort in Cohort::ALL {
        println!("Strategic quadrants: {} (top {} by population)\n", cohort, top);
        let classified = segments::quadrants(&rows, cohort, top);
        output::preview_table_rows(&segments::quadrant_rows(&classified, cohort), top);
    }

    let overlap = segments::overlaps(&rows);
    println!(
        "High-growth overlap (median thresholds: kids {}, adults {}, seniors {})\n",
        format_number(overlap.thresholds[0], 2),
        format_number(overlap.thresholds[1], 2),
        format_number(overlap.thresholds[2], 2)
    );
    for (label, members) in overlap.segments() {
        println!("{:>17}: {} {}", label, members.len(), members.join(", "));
    }
    println!();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let filters = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    pretty_env_logger::formatted_builder()
        .parse_filters(&filters)
        .init();

    let cli = Cli::parse();
    let mut config = load_config(&cli)?;

    match cli.command {
        Commands::Dataset => {
            let dataset = pipeline::build_dataset(&config)?;
            pipeline::write_dataset(&config, &dataset)?;
            pipeline::write_summary(&config, pipeline::summarize(&config, Some(&dataset), None))?;
            print_dataset(&dataset);
        }
        Commands::Forecast { evaluate } => {
            config.forecast.evaluate |= evaluate;
            let path = config.output_path(&config.output.dataset_file);
            let records = loader::read_enriched(&path)
                .with_context(|| format!("reading dataset from {}", path.display()))?;
            let forecast = pipeline::forecast(&config, &records)?;
            pipeline::write_predictions(&config, &forecast)?;
            pipeline::write_summary(&config, pipeline::summarize(&config, None, Some(&forecast)))?;
            print_forecast(&config, &forecast);
        }
        Commands::Run { evaluate } => {
            config.forecast.evaluate |= evaluate;
            let (dataset, forecast) = pipeline::run(&config)?;
            print_dataset(&dataset);
            print_forecast(&config, &forecast);
        }
        Commands::Segments { top } => {
            handle_segments(&config, top.unwrap_or(config.segments.top_n))?;
        }
    }
    Ok(())
}
