// Grid → RegSO / kommun rollups, normalized to density per `density_scale`
// area units, and merged back onto every grid row.
use crate::cohorts::CohortReducer;
use crate::types::{AggregatedRegionYear, EnrichedRecord, GridCellRecord, Level, RegionAssignment};
use log::{debug, info, warn};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct AggregationOutcome {
    /// Sorted by (region code, year).
    pub groups: Vec<AggregatedRegionYear>,
    /// Groups left out because their summed area was zero.
    pub zero_area_groups: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrichmentReport {
    pub input_rows: usize,
    pub zero_area_groups: usize,
    /// Rows whose (region, year) key was missing from a rollup.
    pub missing_rollup_rows: usize,
    pub output_rows: usize,
}

/// Sum area, population and every band per (region code, year) of `level`,
/// then divide everything but area by `area_sum / density_scale`.
pub fn aggregate(
    rows: &[(GridCellRecord, RegionAssignment)],
    level: Level,
    density_scale: f64,
) -> AggregationOutcome {
    #[derive(Default)]
    struct Acc {
        cells: usize,
        area: f64,
        population: f64,
        bands: Vec<f64>,
    }

    let mut map: BTreeMap<(String, i32), Acc> = BTreeMap::new();
    for (cell, region) in rows {
        let acc = map
            .entry((level.code(region).to_string(), cell.year))
            .or_insert_with(|| Acc {
                bands: vec![0.0; cell.bands.len()],
                ..Acc::default()
            });
        acc.cells += 1;
        acc.area += cell.area;
        acc.population += cell.population;
        for (sum, v) in acc.bands.iter_mut().zip(&cell.bands) {
            *sum += v;
        }
    }

    let mut outcome = AggregationOutcome::default();
    for ((region_code, year), acc) in map {
        let denom = acc.area / density_scale;
        if denom == 0.0 || !denom.is_finite() {
            outcome.zero_area_groups += 1;
            warn!(
                "{} {} {}: summed area is zero, group excluded from rollup",
                level, region_code, year
            );
            continue;
        }
        debug!(
            "{} {} {}: {} cells, {} people over {} area units",
            level, region_code, year, acc.cells, acc.population, acc.area
        );
        outcome.groups.push(AggregatedRegionYear {
            level,
            region_code,
            year,
            cells: acc.cells,
            area_sum: acc.area,
            population_sum: acc.population,
            population_density: acc.population / denom,
            band_density: acc.bands.iter().map(|b| b / denom).collect(),
            band_sums: acc.bands,
        });
    }
    outcome
}

/// Keyed lookup into one level's aggregated groups.
pub struct RollupIndex<'a> {
    level: Level,
    by_key: BTreeMap<(&'a str, i32), &'a AggregatedRegionYear>,
}

impl<'a> RollupIndex<'a> {
    pub fn new(level: Level, groups: &'a [AggregatedRegionYear]) -> Self {
        let by_key = groups
            .iter()
            .map(|g| ((g.region_code.as_str(), g.year), g))
            .collect();
        RollupIndex { level, by_key }
    }

    pub fn get(&self, region: &RegionAssignment, year: i32) -> Option<&'a AggregatedRegionYear> {
        self.by_key.get(&(self.level.code(region), year)).copied()
    }
}

pub struct EnrichmentOutcome {
    pub records: Vec<EnrichedRecord>,
    pub report: EnrichmentReport,
}

/// Build both rollups, merge them onto each row and reduce every level to
/// cohorts. Output order follows `rows`.
pub fn enrich(
    rows: &[(GridCellRecord, RegionAssignment)],
    reducer: &CohortReducer,
    density_scale: f64,
) -> EnrichmentOutcome {
    let regso = aggregate(rows, Level::Regso, density_scale);
    let kommun = aggregate(rows, Level::Kommun, density_scale);
    info!(
        "aggregated {} regso and {} kommun region-years",
        regso.groups.len(),
        kommun.groups.len()
    );

    let regso_index = RollupIndex::new(Level::Regso, &regso.groups);
    let kommun_index = RollupIndex::new(Level::Kommun, &kommun.groups);

    let mut missing_rollup_rows = 0usize;
    let mut records = Vec::with_capacity(rows.len());
    for (cell, region) in rows {
        let (Some(k), Some(r)) = (
            kommun_index.get(region, cell.year),
            regso_index.get(region, cell.year),
        ) else {
            missing_rollup_rows += 1;
            continue;
        };
        let grid = reducer.reduce(&cell.bands);
        let kc = reducer.reduce(&k.band_density);
        let rc = reducer.reduce(&r.band_density);
        records.push(EnrichedRecord {
            grid_id: cell.grid_id.clone(),
            year: cell.year,
            area: cell.area,
            population: cell.population,
            regso_code: region.regso_code.clone(),
            regso_name: region.regso_name.clone(),
            kommun_code: region.kommun_code.clone(),
            kommun_name: region.kommun_name.clone(),
            kids_population: grid.kids,
            adult_population: grid.adults,
            senior_population: grid.seniors,
            area_kommun_sum: k.area_sum,
            population_kommun_sum: k.population_density,
            kids_population_kommun_sum: kc.kids,
            adult_population_kommun_sum: kc.adults,
            senior_population_kommun_sum: kc.seniors,
            area_regso_sum: r.area_sum,
            population_regso_sum: r.population_density,
            kids_population_regso_sum: rc.kids,
            adult_population_regso_sum: rc.adults,
            senior_population_regso_sum: rc.seniors,
        });
    }
    if missing_rollup_rows > 0 {
        warn!(
            "{} rows had no rollup for their region and year and were dropped",
            missing_rollup_rows
        );
    }

    let report = EnrichmentReport {
        input_rows: rows.len(),
        zero_area_groups: regso.zero_area_groups + kommun.zero_area_groups,
        missing_rollup_rows,
        output_rows: records.len(),
    };
    EnrichmentOutcome { records, report }
}
