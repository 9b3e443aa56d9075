// Grid cell → administrative region join.
use crate::types::{GridCellRecord, RegionAssignment};
use log::warn;
use std::collections::{BTreeSet, HashMap};

/// A grid row after the left join; `region` is `None` when the grid id has no
/// assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedRecord {
    pub cell: GridCellRecord,
    pub region: Option<RegionAssignment>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinReport {
    pub total: usize,
    pub unmatched: usize,
    /// Distinct grid ids without an assignment, sorted.
    pub unmatched_ids: Vec<String>,
}

/// Left outer join on grid id. Row count and order of `rows` are preserved.
pub fn attach(rows: Vec<GridCellRecord>, assignments: &[RegionAssignment]) -> Vec<MappedRecord> {
    let index: HashMap<&str, &RegionAssignment> = assignments
        .iter()
        .map(|a| (a.grid_id.as_str(), a))
        .collect();
    rows.into_iter()
        .map(|cell| {
            let region = index.get(cell.grid_id.as_str()).map(|a| (*a).clone());
            MappedRecord { cell, region }
        })
        .collect()
}

/// Drop rows without an assignment, returning the survivors and how many were
/// lost.
pub fn resolve(
    mapped: Vec<MappedRecord>,
) -> (Vec<(GridCellRecord, RegionAssignment)>, JoinReport) {
    let total = mapped.len();
    let mut unmatched_ids = BTreeSet::new();
    let mut kept = Vec::with_capacity(total);
    for record in mapped {
        match record.region {
            Some(region) => kept.push((record.cell, region)),
            None => {
                unmatched_ids.insert(record.cell.grid_id);
            }
        }
    }
    let report = JoinReport {
        total,
        unmatched: total - kept.len(),
        unmatched_ids: unmatched_ids.into_iter().collect(),
    };
    if report.unmatched > 0 {
        warn!(
            "{} of {} grid rows ({} distinct cells) have no region assignment and were dropped",
            report.unmatched,
            report.total,
            report.unmatched_ids.len()
        );
    }
    (kept, report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(id: &str, year: i32) -> GridCellRecord {
        GridCellRecord {
            grid_id: id.to_string(),
            year,
            area: 1_000_000.0,
            population: 3.0,
            bands: vec![1.0, 1.0, 1.0],
        }
    }

    fn assignment(id: &str, regso: &str, kommun: &str) -> RegionAssignment {
        RegionAssignment {
            grid_id: id.to_string(),
            regso_code: regso.to_string(),
            regso_name: format!("{regso} name"),
            kommun_code: kommun.to_string(),
            kommun_name: format!("{kommun} name"),
        }
    }

    #[test]
    fn attach_preserves_rows_and_order() {
        let rows = vec![cell("b", 2020), cell("x", 2020), cell("a", 2020), cell("b", 2021)];
        let links = vec![assignment("a", "R1", "K1"), assignment("b", "R2", "K1")];
        let mapped = attach(rows.clone(), &links);

        assert_eq!(mapped.len(), rows.len());
        let ids: Vec<&str> = mapped.iter().map(|m| m.cell.grid_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "x", "a", "b"]);
        assert_eq!(mapped[1].region, None);
        assert_eq!(mapped[3].region.as_ref().unwrap().regso_code, "R2");
    }

    #[test]
    fn resolve_drops_exactly_the_unassigned_rows() {
        let rows = vec![
            cell("a", 2020),
            cell("x", 2020),
            cell("a", 2021),
            cell("x", 2021),
            cell("y", 2021),
        ];
        let links = vec![assignment("a", "R1", "K1")];
        let (kept, report) = resolve(attach(rows, &links));

        assert_eq!(kept.len(), 2);
        assert_eq!(report.total, 5);
        assert_eq!(report.unmatched, 3);
        assert_eq!(report.unmatched_ids, vec!["x".to_string(), "y".to_string()]);
        assert_eq!(kept.len(), report.total - report.unmatched);
    }
}
