// Error types shared by every pipeline stage.
//
// Only structural problems are errors here. Recoverable data-quality issues
// (unmatched grid cells, zero denominators, short histories) are reported as
// counts in each stage's report struct and logged as warnings instead.
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Problems reading the yearly grid tables or the region assignment table.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("source file for {year} not found: {path}")]
    MissingYear { year: i32, path: PathBuf },

    #[error("source file not found: {0}")]
    MissingFile(PathBuf),

    #[error("{path}: missing required column `{column}`")]
    MissingColumn { path: PathBuf, column: String },

    #[error("grid id column in {year} is {found}, earlier years were {expected}")]
    GridIdKindMismatch {
        year: i32,
        expected: &'static str,
        found: &'static str,
    },

    #[error("grid id `{0}` has more than one region assignment")]
    DuplicateAssignment(String),

    #[error("no grid cells loaded for years {start}..={end}")]
    Empty { start: i32, end: i32 },

    #[error("{path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Invalid configuration, detected before any stage runs.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("year range is empty: {start}..={end}")]
    EmptyYearRange { start: i32, end: i32 },

    #[error("prediction year {year} is outside the ingested range {start}..={end}")]
    PredictionYearOutOfRange { year: i32, start: i32, end: i32 },

    #[error("cohort `{0}` has no age bands")]
    EmptyCohort(String),

    #[error("age band `{band}` is assigned to both `{first}` and `{second}`")]
    OverlappingCohorts {
        band: String,
        first: String,
        second: String,
    },

    #[error("age band `{0}` is not present in the grid table")]
    UnknownBand(String),

    #[error("age band `{0}` is not assigned to any cohort")]
    UnassignedBand(String),

    #[error("unknown lag signal `{0}`")]
    UnknownSignal(String),

    #[error("lag signal `{0}` is listed twice")]
    DuplicateSignal(String),

    #[error("lag signal list is empty")]
    NoSignals,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("could not read config {path}: {message}")]
    Unreadable { path: PathBuf, message: String },
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The feature row handed to a model does not match the feature list it was
    /// trained with.
    #[error("feature mismatch for {cohort} model: missing {missing:?}, unexpected {unexpected:?}, order differs: {reordered}")]
    FeatureMismatch {
        cohort: String,
        missing: Vec<String>,
        unexpected: Vec<String>,
        reordered: bool,
    },

    #[error("no training rows for {cohort} ({partition})")]
    EmptyTraining {
        cohort: String,
        partition: &'static str,
    },

    #[error("no rows to predict for year {0}")]
    NothingToPredict(i32),

    #[error("{path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_item() {
        let err = ConfigError::OverlappingCohorts {
            band: "ald15_20".to_string(),
            first: "kids".to_string(),
            second: "adults".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "age band `ald15_20` is assigned to both `kids` and `adults`"
        );

        let err = IngestError::GridIdKindMismatch {
            year: 2019,
            expected: "numeric",
            found: "text",
        };
        assert_eq!(
            err.to_string(),
            "grid id column in 2019 is text, earlier years were numeric"
        );
    }

    #[test]
    fn ingest_errors_convert_into_pipeline_errors() {
        let err: PipelineError = IngestError::Empty {
            start: 2015,
            end: 2024,
        }
        .into();
        assert!(matches!(err, PipelineError::Ingest(_)));
        assert_eq!(err.to_string(), "no grid cells loaded for years 2015..=2024");
    }
}
