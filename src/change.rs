// Municipality totals of the per-cell forecast against the baseline year.
use crate::types::{Cohort, CohortTotals, EnrichedRecord, PredictionRow, RegionPrediction};
use crate::util::percent_change;
use log::warn;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct ChangeOutcome {
    /// One row per municipality present in the baseline year, sorted by name.
    pub rows: Vec<RegionPrediction>,
    /// (municipality, cohort) pairs whose baseline total was zero.
    pub zero_baselines: usize,
    /// Municipalities with baseline data but no predicted cells.
    pub unpredicted: usize,
}

#[derive(Default)]
struct Baseline {
    population: f64,
    area: f64,
    cohorts: CohortTotals,
}

pub fn compute_change(
    predictions: &[PredictionRow],
    baseline_records: &[EnrichedRecord],
    baseline_year: i32,
) -> ChangeOutcome {
    let mut predicted: BTreeMap<&str, CohortTotals> = BTreeMap::new();
    let mut forecast_year = baseline_year;
    for p in predictions {
        predicted
            .entry(p.kommun_name.as_str())
            .or_default()
            .add(&p.predicted);
        forecast_year = p.forecast_year;
    }

    let mut baseline: BTreeMap<&str, Baseline> = BTreeMap::new();
    for r in baseline_records.iter().filter(|r| r.year == baseline_year) {
        let acc = baseline.entry(r.kommun_name.as_str()).or_default();
        acc.population += r.population;
        acc.area += r.area;
        acc.cohorts.add(&r.cohorts());
    }

    let mut zero_baselines = 0usize;
    let mut unpredicted = 0usize;
    let mut rows = Vec::with_capacity(baseline.len());
    for (name, base) in baseline {
        let pred = predicted.get(name).copied();
        if pred.is_none() {
            unpredicted += 1;
        }
        let mut change = [None; 3];
        for (slot, cohort) in change.iter_mut().zip(Cohort::ALL) {
            let Some(pred) = pred else { continue };
            if base.cohorts.get(cohort) == 0.0 {
                zero_baselines += 1;
                continue;
            }
            *slot = percent_change(pred.get(cohort), base.cohorts.get(cohort));
        }
        rows.push(RegionPrediction {
            kommun_name: name.to_string(),
            baseline_year,
            forecast_year,
            population: base.population,
            area: base.area,
            kids_population: base.cohorts.kids,
            adult_population: base.cohorts.adults,
            senior_population: base.cohorts.seniors,
            kids_population_pred: pred.map(|p| p.kids),
            adult_population_pred: pred.map(|p| p.adults),
            senior_population_pred: pred.map(|p| p.seniors),
            kids_population_increase_p: change[0],
            adult_population_increase_p: change[1],
            senior_population_increase_p: change[2],
        });
    }

    if zero_baselines > 0 {
        warn!(
            "{} municipality cohorts have a zero {} baseline; their change is left empty",
            zero_baselines, baseline_year
        );
    }
    if unpredicted > 0 {
        warn!("{} municipalities have no predicted cells", unpredicted);
    }
    ChangeOutcome {
        rows,
        zero_baselines,
        unpredicted,
    }
}
