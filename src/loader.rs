use crate::config::{ColumnNames, IngestConfig};
use crate::error::IngestError;
use crate::types::{EnrichedRecord, GridCellRecord, GridIdKind, GridTable, RegionAssignment};
use crate::util::parse_f64_safe;
use csv::{ReaderBuilder, StringRecord};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub total_rows: usize,
    pub loaded_rows: usize,
    pub parse_errors: usize,
    pub non_positive_area: usize,
    pub band_mismatches: usize,
}

impl LoadReport {
    pub fn skipped(&self) -> usize {
        self.parse_errors + self.non_positive_area
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignmentReport {
    pub total_rows: usize,
    pub loaded_rows: usize,
    /// Rows missing a grid id, RegSO code or kommun code.
    pub incomplete_rows: usize,
}

fn column_index(
    headers: &StringRecord,
    name: &str,
    path: &Path,
) -> Result<usize, IngestError> {
    headers
        .iter()
        .position(|h| h.trim() == name)
        .ok_or_else(|| IngestError::MissingColumn {
            path: path.to_path_buf(),
            column: name.to_string(),
        })
}

fn open(path: &Path) -> Result<csv::Reader<std::fs::File>, IngestError> {
    if !path.exists() {
        return Err(IngestError::MissingFile(path.to_path_buf()));
    }
    ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|source| IngestError::Csv {
            path: path.to_path_buf(),
            source,
        })
}

/// Load every configured year into one longitudinal table.
///
/// Years are appended in ascending order without deduplication. Rows with
/// unparsable counts or a non-positive area are skipped and counted.
pub fn load_grid(
    ingest: &IngestConfig,
    columns: &ColumnNames,
    band_names: &[String],
) -> Result<(GridTable, LoadReport), IngestError> {
    let mut table = GridTable {
        band_names: band_names.to_vec(),
        rows: Vec::new(),
        id_kind: None,
    };
    let mut report = LoadReport::default();

    for year in ingest.years() {
        let path = ingest.year_path(year);
        if !path.exists() {
            return Err(IngestError::MissingYear { year, path });
        }
        let before = table.rows.len();
        let kind = load_year(&path, year, columns, &mut table, &mut report)?;
        match table.id_kind {
            None => table.id_kind = kind,
            Some(expected) => {
                if let Some(found) = kind {
                    if found != expected {
                        return Err(IngestError::GridIdKindMismatch {
                            year,
                            expected: expected.as_str(),
                            found: found.as_str(),
                        });
                    }
                }
            }
        }
        info!(
            "loaded {} grid cells for {} from {}",
            table.rows.len() - before,
            year,
            path.display()
        );
    }

    if table.rows.is_empty() {
        return Err(IngestError::Empty {
            start: ingest.start_year,
            end: ingest.end_year,
        });
    }
    report.loaded_rows = table.rows.len();
    Ok((table, report))
}

fn load_year(
    path: &Path,
    year: i32,
    columns: &ColumnNames,
    table: &mut GridTable,
    report: &mut LoadReport,
) -> Result<Option<GridIdKind>, IngestError> {
    let mut rdr = open(path)?;
    let csv_err = |source: csv::Error| IngestError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let headers = rdr.headers().map_err(csv_err)?.clone();
    let id_col = column_index(&headers, &columns.grid_id, path)?;
    let area_col = column_index(&headers, &columns.area, path)?;
    let pop_col = column_index(&headers, &columns.population, path)?;
    let band_cols = table
        .band_names
        .iter()
        .map(|b| column_index(&headers, b, path))
        .collect::<Result<Vec<_>, _>>()?;

    let mut ids: Vec<String> = Vec::new();
    for result in rdr.records() {
        report.total_rows += 1;
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                debug!("{}: unreadable row: {}", path.display(), e);
                report.parse_errors += 1;
                continue;
            }
        };
        let grid_id = match record.get(id_col).map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                report.parse_errors += 1;
                continue;
            }
        };
        let (Some(area), Some(population)) = (
            parse_f64_safe(record.get(area_col)),
            parse_f64_safe(record.get(pop_col)),
        ) else {
            report.parse_errors += 1;
            continue;
        };
        if area <= 0.0 {
            report.non_positive_area += 1;
            continue;
        }
        let Some(bands) = band_cols
            .iter()
            .map(|&c| parse_f64_safe(record.get(c)))
            .collect::<Option<Vec<f64>>>()
        else {
            report.parse_errors += 1;
            continue;
        };
        // Published counts are rounded per band, so only flag large gaps.
        let band_total: f64 = bands.iter().sum();
        if (band_total - population).abs() > 0.5 * bands.len() as f64 {
            report.band_mismatches += 1;
            debug!(
                "{} {}: age bands sum to {} but total is {}",
                grid_id, year, band_total, population
            );
        }
        ids.push(grid_id.clone());
        table.rows.push(GridCellRecord {
            grid_id,
            year,
            area,
            population,
            bands,
        });
    }

    if ids.is_empty() {
        return Ok(None);
    }
    Ok(Some(GridIdKind::infer(ids.iter().map(String::as_str))))
}

/// Read the static grid id → region table. Incomplete rows are skipped and
/// counted; their cells then behave like unassigned ones.
pub fn load_assignments(
    path: &Path,
    columns: &ColumnNames,
) -> Result<(Vec<RegionAssignment>, AssignmentReport), IngestError> {
    let mut rdr = open(path)?;
    let headers = rdr
        .headers()
        .map_err(|source| IngestError::Csv {
            path: path.to_path_buf(),
            source,
        })?
        .clone();
    let cols = [
        &columns.grid_id,
        &columns.regso_code,
        &columns.regso_name,
        &columns.kommun_code,
        &columns.kommun_name,
    ]
    .iter()
    .map(|name| column_index(&headers, name, path))
    .collect::<Result<Vec<_>, _>>()?;

    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    let mut report = AssignmentReport::default();
    for result in rdr.records() {
        report.total_rows += 1;
        let record = result.map_err(|source| IngestError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        let field = |i: usize| record.get(cols[i]).unwrap_or("").trim().to_string();
        let assignment = RegionAssignment {
            grid_id: field(0),
            regso_code: field(1),
            regso_name: field(2),
            kommun_code: field(3),
            kommun_name: field(4),
        };
        if assignment.grid_id.is_empty()
            || assignment.regso_code.is_empty()
            || assignment.kommun_code.is_empty()
        {
            report.incomplete_rows += 1;
            continue;
        }
        if !seen.insert(assignment.grid_id.clone()) {
            return Err(IngestError::DuplicateAssignment(assignment.grid_id));
        }
        out.push(assignment);
    }
    report.loaded_rows = out.len();
    info!("loaded {} region assignments from {}", out.len(), path.display());
    if report.incomplete_rows > 0 {
        warn!(
            "{}: {} assignment rows lack a grid id or region code and were skipped",
            path.display(),
            report.incomplete_rows
        );
    }
    Ok((out, report))
}

/// Read a table previously written with `output::write_csv`.
pub fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, IngestError> {
    let mut rdr = open(path)?;
    rdr.deserialize::<T>()
        .map(|r| {
            r.map_err(|source| IngestError::Csv {
                path: path.to_path_buf(),
                source,
            })
        })
        .collect()
}

pub fn read_enriched(path: &Path) -> Result<Vec<EnrichedRecord>, IngestError> {
    read_rows(path)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    pub(crate) fn bands() -> Vec<String> {
        vec!["a0".to_string(), "a1".to_string(), "a2".to_string()]
    }

    pub(crate) fn ingest(dir: &Path, start: i32, end: i32) -> IngestConfig {
        IngestConfig {
            data_dir: dir.to_path_buf(),
            file_prefix: "grid_".to_string(),
            start_year: start,
            end_year: end,
            assignment_file: "link.csv".to_string(),
        }
    }

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn concatenates_years_in_order_and_skips_bad_rows() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "grid_2020.csv",
            "rutid_inspire,rutstorl,beftotalt,a0,a1,a2,geometry\n\
             10,1000,6,1,2,3,POLYGON\n\
             11,0,6,1,2,3,POLYGON\n\
             12,1000,x,1,2,3,POLYGON\n",
        );
        write(
            dir.path(),
            "grid_2021.csv",
            "rutid_inspire,rutstorl,beftotalt,a0,a1,a2\n\
             10,1000,7,1,3,3\n\
             13,1000,1,1,0,0\n",
        );
        let (table, report) =
            load_grid(&ingest(dir.path(), 2020, 2021), &ColumnNames::default(), &bands())
                .unwrap();

        let keys: Vec<(&str, i32)> = table
            .rows
            .iter()
            .map(|r| (r.grid_id.as_str(), r.year))
            .collect();
        assert_eq!(keys, vec![("10", 2020), ("10", 2021), ("13", 2021)]);
        assert_eq!(table.id_kind, Some(GridIdKind::Numeric));
        assert_eq!(report.total_rows, 5);
        assert_eq!(report.parse_errors, 1);
        assert_eq!(report.non_positive_area, 1);
        assert_eq!(report.loaded_rows, 3);
        assert_eq!(table.rows[1].bands, vec![1.0, 3.0, 3.0]);
    }

    #[test]
    fn missing_year_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "grid_2020.csv",
            "rutid_inspire,rutstorl,beftotalt,a0,a1,a2\n10,1000,6,1,2,3\n",
        );
        let err = load_grid(&ingest(dir.path(), 2020, 2021), &ColumnNames::default(), &bands())
            .unwrap_err();
        assert!(matches!(err, IngestError::MissingYear { year: 2021, .. }));
    }

    #[test]
    fn grid_id_kind_change_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "grid_2020.csv",
            "rutid_inspire,rutstorl,beftotalt,a0,a1,a2\n10,1000,6,1,2,3\n",
        );
        write(
            dir.path(),
            "grid_2021.csv",
            "rutid_inspire,rutstorl,beftotalt,a0,a1,a2\nE10N20,1000,6,1,2,3\n",
        );
        let err = load_grid(&ingest(dir.path(), 2020, 2021), &ColumnNames::default(), &bands())
            .unwrap_err();
        assert!(matches!(
            err,
            IngestError::GridIdKindMismatch {
                year: 2021,
                expected: "numeric",
                found: "text"
            }
        ));
    }

    #[test]
    fn missing_band_column_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "grid_2020.csv",
            "rutid_inspire,rutstorl,beftotalt,a0,a1\n10,1000,3,1,2\n",
        );
        let err = load_grid(&ingest(dir.path(), 2020, 2020), &ColumnNames::default(), &bands())
            .unwrap_err();
        assert!(matches!(err, IngestError::MissingColumn { ref column, .. } if column == "a2"));
    }

    #[test]
    fn duplicate_assignment_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "link.csv",
            "rutid_inspire,regsokod,regsonamn,kommunkod,kommunnamn\n\
             10,R1,North,K1,Alpha\n\
             10,R2,South,K1,Alpha\n",
        );
        let err = load_assignments(&path, &ColumnNames::default()).unwrap_err();
        assert!(matches!(err, IngestError::DuplicateAssignment(ref id) if id == "10"));
    }

    #[test]
    fn incomplete_assignments_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "link.csv",
            "rutid_inspire,regsokod,regsonamn,kommunkod,kommunnamn\n\
             10,R1,North,K1,Alpha\n\
             11,,North,K1,Alpha\n\
             12,R2,South,,Alpha\n\
             ,R3,East,K2,Beta\n",
        );
        let (assignments, report) = load_assignments(&path, &ColumnNames::default()).unwrap();
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].grid_id, "10");
        assert_eq!(
            report,
            AssignmentReport {
                total_rows: 4,
                loaded_rows: 1,
                incomplete_rows: 3,
            }
        );
    }
}
