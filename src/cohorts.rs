// Age bands → kids / adults / seniors.
use crate::config::CohortDefinitions;
use crate::error::ConfigError;
use crate::types::{Cohort, CohortTotals};

/// Band-index lookup for the three cohorts, resolved once against the grid
/// table's band order.
#[derive(Debug, Clone)]
pub struct CohortReducer {
    indices: [Vec<usize>; 3],
}

impl CohortReducer {
    /// Every band must belong to exactly one cohort, otherwise the cohort
    /// totals would no longer add up to the population.
    pub fn new(
        band_names: &[String],
        definitions: &CohortDefinitions,
    ) -> Result<Self, ConfigError> {
        definitions.validate()?;
        let mut covered = vec![false; band_names.len()];
        let mut resolve = |cohort: Cohort| -> Result<Vec<usize>, ConfigError> {
            definitions
                .bands(cohort)
                .iter()
                .map(|band| {
                    let idx = band_names
                        .iter()
                        .position(|b| b == band)
                        .ok_or_else(|| ConfigError::UnknownBand(band.clone()))?;
                    covered[idx] = true;
                    Ok(idx)
                })
                .collect()
        };
        let indices = [
            resolve(Cohort::Kids)?,
            resolve(Cohort::Adults)?,
            resolve(Cohort::Seniors)?,
        ];
        if let Some(pos) = covered.iter().position(|c| !c) {
            return Err(ConfigError::UnassignedBand(band_names[pos].clone()));
        }
        Ok(CohortReducer { indices })
    }

    /// Row-wise sum of each cohort's bands.
    pub fn reduce(&self, bands: &[f64]) -> CohortTotals {
        let sum = |idx: &[usize]| idx.iter().map(|&i| bands[i]).sum::<f64>();
        CohortTotals {
            kids: sum(&self.indices[0]),
            adults: sum(&self.indices[1]),
            seniors: sum(&self.indices[2]),
        }
    }
}
