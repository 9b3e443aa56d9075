// Market segmentation of the municipality forecast: population/growth
// quadrants and overlap of high-growth cohorts.
use crate::types::{Cohort, QuadrantRow, RegionPrediction};
use crate::util::{format_number, format_opt, mean, median};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Quadrant {
    #[strum(serialize = "Golden Market")]
    GoldenMarket,
    #[strum(serialize = "Future Hub")]
    FutureHub,
    #[strum(serialize = "Mature/Declining")]
    MatureDeclining,
    #[strum(serialize = "Shrinking")]
    Shrinking,
}

impl Quadrant {
    pub fn classify(above_mean_population: bool, growing: bool) -> Self {
        match (above_mean_population, growing) {
            (true, true) => Quadrant::GoldenMarket,
            (false, true) => Quadrant::FutureHub,
            (true, false) => Quadrant::MatureDeclining,
            (false, false) => Quadrant::Shrinking,
        }
    }
}

/// Classify the `top_n` most populous municipalities against their mean
/// population and zero change of `cohort`. Sorted by population, largest
/// first. Municipalities without a defined change count as not growing.
pub fn quadrants(
    rows: &[RegionPrediction],
    cohort: Cohort,
    top_n: usize,
) -> Vec<(Quadrant, RegionPrediction)> {
    let mut top: Vec<&RegionPrediction> = rows.iter().collect();
    top.sort_by(|a, b| {
        b.population
            .partial_cmp(&a.population)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.kommun_name.cmp(&b.kommun_name))
    });
    top.truncate(top_n);
    let population_mean = mean(&top.iter().map(|r| r.population).collect::<Vec<_>>());

    top.into_iter()
        .map(|r| {
            let growing = r.change(cohort).is_some_and(|c| c >= 0.0);
            (
                Quadrant::classify(r.population >= population_mean, growing),
                r.clone(),
            )
        })
        .collect()
}

pub fn quadrant_rows(
    classified: &[(Quadrant, RegionPrediction)],
    cohort: Cohort,
) -> Vec<QuadrantRow> {
    classified
        .iter()
        .map(|(q, r)| QuadrantRow {
            kommun_name: r.kommun_name.clone(),
            population: format_number(r.population, 0),
            change: format_opt(r.change(cohort), 2),
            quadrant: q.to_string(),
        })
        .collect()
}

/// The seven regions of a three-set Venn diagram over kids / adults /
/// seniors high-growth sets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlapReport {
    pub kids_only: Vec<String>,
    pub adults_only: Vec<String>,
    pub seniors_only: Vec<String>,
    pub kids_adults: Vec<String>,
    pub kids_seniors: Vec<String>,
    pub adults_seniors: Vec<String>,
    pub all_three: Vec<String>,
    /// Median change per cohort among growing municipalities.
    pub thresholds: [f64; 3],
}

impl OverlapReport {
    pub fn segments(&self) -> [(&'static str, &[String]); 7] {
        [
            ("kids only", self.kids_only.as_slice()),
            ("adults only", self.adults_only.as_slice()),
            ("seniors only", self.seniors_only.as_slice()),
            ("kids & adults", self.kids_adults.as_slice()),
            ("kids & seniors", self.kids_seniors.as_slice()),
            ("adults & seniors", self.adults_seniors.as_slice()),
            ("all three", self.all_three.as_slice()),
        ]
    }
}

/// Municipalities growing in at least one cohort are split, per cohort, at
/// that cohort's median change; those strictly above form the high-growth set.
pub fn overlaps(rows: &[RegionPrediction]) -> OverlapReport {
    let growing: Vec<&RegionPrediction> = rows
        .iter()
        .filter(|r| Cohort::ALL.iter().any(|&c| r.change(c).is_some_and(|v| v > 0.0)))
        .collect();

    let mut thresholds = [0.0; 3];
    let mut sets: [BTreeSet<&str>; 3] = Default::default();
    for (i, cohort) in Cohort::ALL.into_iter().enumerate() {
        let values: Vec<f64> = growing.iter().filter_map(|r| r.change(cohort)).collect();
        thresholds[i] = median(values);
        sets[i] = growing
            .iter()
            .filter(|r| r.change(cohort).is_some_and(|v| v > thresholds[i]))
            .map(|r| r.kommun_name.as_str())
            .collect();
    }

    let mut report = OverlapReport {
        thresholds,
        ..OverlapReport::default()
    };
    for r in &growing {
        let name = r.kommun_name.as_str();
        let member = [sets[0].contains(name), sets[1].contains(name), sets[2].contains(name)];
        let bucket = match member {
            [true, false, false] => &mut report.kids_only,
            [false, true, false] => &mut report.adults_only,
            [false, false, true] => &mut report.seniors_only,
            [true, true, false] => &mut report.kids_adults,
            [true, false, true] => &mut report.kids_seniors,
            [false, true, true] => &mut report.adults_seniors,
            [true, true, true] => &mut report.all_three,
            [false, false, false] => continue,
        };
        bucket.push(name.to_string());
    }
    for members in [
        &mut report.kids_only,
        &mut report.adults_only,
        &mut report.seniors_only,
        &mut report.kids_adults,
        &mut report.kids_seniors,
        &mut report.adults_seniors,
        &mut report.all_three,
    ] {
        members.sort();
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kommun(name: &str, population: f64, change: [Option<f64>; 3]) -> RegionPrediction {
        RegionPrediction {
            kommun_name: name.to_string(),
            baseline_year: 2024,
            forecast_year: 2026,
            population,
            area: 1.0,
            kids_population: 0.0,
            adult_population: 0.0,
            senior_population: 0.0,
            kids_population_pred: None,
            adult_population_pred: None,
            senior_population_pred: None,
            kids_population_increase_p: change[0],
            adult_population_increase_p: change[1],
            senior_population_increase_p: change[2],
        }
    }

    #[test]
    fn quadrants_split_on_mean_population_and_zero_growth() {
        let rows = vec![
            kommun("Big", 1000.0, [Some(2.0), None, None]),
            kommun("Mid", 400.0, [Some(-1.0), None, None]),
            kommun("Small", 100.0, [Some(0.0), None, None]),
            kommun("Tiny", 10.0, [Some(5.0), None, None]),
            kommun("Large", 900.0, [None, None, None]),
        ];
        let out = quadrants(&rows, Cohort::Kids, 4);
        // top 4: Big, Large, Mid, Small; mean 600
        let got: Vec<(&str, Quadrant)> = out
            .iter()
            .map(|(q, r)| (r.kommun_name.as_str(), *q))
            .collect();
        assert_eq!(
            got,
            vec![
                ("Big", Quadrant::GoldenMarket),
                ("Large", Quadrant::MatureDeclining),
                ("Mid", Quadrant::Shrinking),
                ("Small", Quadrant::FutureHub),
            ]
        );
        let table = quadrant_rows(&out, Cohort::Kids);
        assert_eq!(table[0].quadrant, "Golden Market");
        assert_eq!(table[1].change, "n/a");
    }

    #[test]
    fn overlaps_use_median_of_growing_regions() {
        let rows = vec![
            kommun("A", 1.0, [Some(10.0), Some(10.0), Some(10.0)]),
            kommun("B", 1.0, [Some(5.0), Some(1.0), Some(-1.0)]),
            kommun("C", 1.0, [Some(1.0), Some(6.0), Some(4.0)]),
            kommun("D", 1.0, [Some(-3.0), Some(-3.0), Some(-3.0)]),
        ];
        let report = overlaps(&rows);
        // growing: A, B, C. medians: kids 5, adults 6, seniors 4
        assert_eq!(report.thresholds, [5.0, 6.0, 4.0]);
        assert_eq!(report.all_three, vec!["A".to_string()]);
        assert!(report.kids_only.is_empty());
        assert!(report.adults_only.is_empty());
        let total: usize = report.segments().iter().map(|(_, m)| m.len()).sum();
        assert_eq!(total, 1);
    }
}
