use crate::error::{PipelineError, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tabled::{settings::Style, Table, Tabled};

/// Sibling path the data is staged in before being renamed over `path`.
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    path.with_file_name(name)
}

/// A fully written file waiting next to its destination.
#[derive(Debug)]
pub struct Staged {
    staged: PathBuf,
    path: PathBuf,
}

/// Files staged for one run. Nothing reaches its destination until
/// `commit` is called; dropping the batch uncommitted removes every staged
/// file.
#[derive(Debug, Default)]
pub struct StagedBatch {
    files: Vec<Staged>,
}

impl StagedBatch {
    pub fn csv<T: Serialize>(&mut self, path: &Path, rows: &[T]) -> Result<()> {
        self.files.push(stage_csv(path, rows)?);
        Ok(())
    }

    pub fn json<T: Serialize>(&mut self, path: &Path, value: &T) -> Result<()> {
        self.files.push(stage_json(path, value)?);
        Ok(())
    }

    /// Rename every staged file into place, in staging order.
    pub fn commit(mut self) -> Result<()> {
        let files = std::mem::take(&mut self.files);
        let mut pending = files.into_iter();
        while let Some(file) = pending.next() {
            if let Err(e) = fs::rename(&file.staged, &file.path) {
                let _ = fs::remove_file(&file.staged);
                self.files.extend(pending);
                return Err(PipelineError::Io(e));
            }
        }
        Ok(())
    }
}

impl Drop for StagedBatch {
    fn drop(&mut self) {
        for file in &self.files {
            let _ = fs::remove_file(&file.staged);
        }
    }
}

fn stage_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<Staged> {
    let staged = staging_path(path);
    let csv_err = |source: csv::Error| PipelineError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let written = (|| -> Result<()> {
        let mut wtr = csv::Writer::from_path(&staged).map_err(csv_err)?;
        for r in rows {
            wtr.serialize(r).map_err(csv_err)?;
        }
        wtr.flush()?;
        Ok(())
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(&staged);
        return Err(e);
    }
    Ok(Staged {
        staged,
        path: path.to_path_buf(),
    })
}

fn stage_json<T: Serialize>(path: &Path, value: &T) -> Result<Staged> {
    let staged = staging_path(path);
    let s = serde_json::to_string_pretty(value)?;
    fs::write(&staged, s)?;
    Ok(Staged {
        staged,
        path: path.to_path_buf(),
    })
}

/// Write rows as CSV. The destination only appears once every row is written.
pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut batch = StagedBatch::default();
    batch.csv(path, rows)?;
    batch.commit()
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut batch = StagedBatch::default();
    batch.json(path, value)?;
    batch.commit()
}

pub fn preview_table_rows<T>(rows: &[T], max_rows: usize)
where
    T: Tabled + Clone,
{
    let slice: Vec<T> = rows.iter().cloned().take(max_rows).collect();
    if slice.is_empty() {
        println!("(no rows)\n");
        return;
    }
    let table_str = Table::new(slice).with(Style::markdown()).to_string();
    println!("{}\n", table_str);
}
