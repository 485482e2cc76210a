//! Cost aggregation and reserved-instance fee re-allocation.

use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use super::resolver::TagResolver;
use crate::athena::ResultRow;

/// Aggregated costs keyed by composite `service,label…` group.
#[derive(Debug, Default)]
pub struct CostSummary {
    /// Per-group sums; BTreeMap gives the report its lexicographic order.
    pub tag_costs: BTreeMap<String, f64>,
    /// Running total across all rows.
    pub total: f64,
    /// Rows skipped because their cost cell would not parse.
    pub skipped_rows: usize,
}

/// Sum row costs per composite group key.
///
/// Each row contributes its `cost` under `service` joined with the
/// resolver's axis labels. Unparsable costs are warned about and skipped;
/// they never fail the run.
pub fn aggregate(rows: &[ResultRow], resolver: &TagResolver) -> CostSummary {
    let mut summary = CostSummary::default();
    for row in rows {
        let cost = match row.get("cost").map(String::as_str).unwrap_or("").parse::<f64>() {
            Ok(cost) => cost,
            Err(_) => {
                warn!("failed to parse row cost, skipping row");
                summary.skipped_rows += 1;
                continue;
            }
        };
        let mut parts = vec![row.get("service").cloned().unwrap_or_default()];
        parts.extend(resolver.labels(row));
        *summary.tag_costs.entry(parts.join(",")).or_insert(0.0) += cost;
        summary.total += cost;
    }
    summary
}

/// Decorate RI usage rows with synthetic costs proportional to usage.
///
/// `ri_cost` rows carry per-service fees; each usage row receives
/// `share_of_service_usage × service_fee` as its `cost`, written through an
/// exact round-trip scientific formatter so the aggregation parser recovers
/// the value bit-for-bit. Returns the decorated rows for appending to the
/// primary result stream.
pub fn allocate_ri_costs(ri_cost: &[ResultRow], ri_usage: Vec<ResultRow>) -> Vec<ResultRow> {
    let mut fee_per_service: HashMap<String, f64> = HashMap::new();
    for row in ri_cost {
        let Some(service) = row.get("service") else {
            continue;
        };
        match row.get("cost").map(String::as_str).unwrap_or("").parse::<f64>() {
            Ok(fee) => {
                fee_per_service.insert(service.clone(), fee);
            }
            Err(_) => warn!(service = %service, "failed to parse RI fee, skipping service"),
        }
    }

    let mut usage_per_service: HashMap<String, f64> = HashMap::new();
    for row in &ri_usage {
        if let (Some(service), Some(usage)) = (row.get("service"), usage_amount(row)) {
            *usage_per_service.entry(service.clone()).or_insert(0.0) += usage;
        }
    }

    let mut decorated = ri_usage;
    for row in &mut decorated {
        let Some(usage) = usage_amount(row) else {
            continue;
        };
        let Some(service) = row.get("service").cloned() else {
            continue;
        };
        let total_usage = usage_per_service.get(&service).copied().unwrap_or(0.0);
        let fee = fee_per_service.get(&service).copied().unwrap_or(0.0);
        if total_usage > 0.0 {
            let cost = (usage / total_usage) * fee;
            row.insert("cost".to_string(), format!("{cost:E}"));
        }
    }
    decorated
}

/// A row's usage: positive `normalized_amount` if present, else positive
/// `amount`, else nothing.
fn usage_amount(row: &ResultRow) -> Option<f64> {
    for column in ["normalized_amount", "amount"] {
        if let Ok(value) = row.get(column).map(String::as_str).unwrap_or("").parse::<f64>() {
            if value > 0.0 {
                return Some(value);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, TagAxis};
    use indexmap::IndexMap;

    fn resolver(tags: &[&str]) -> TagResolver {
        TagResolver::new(&Config {
            tagmap: vec![TagAxis {
                name: "Team".to_string(),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                map: vec![],
            }],
            tagblacklist: Default::default(),
            sql: IndexMap::new(),
        })
    }

    fn row(cells: &[(&str, &str)]) -> ResultRow {
        cells
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_aggregate_sums_per_group_and_total() {
        let rows = vec![
            row(&[("service", "EC2"), ("cost", "1.5"), ("team", "data")]),
            row(&[("service", "EC2"), ("cost", "2.5"), ("team", "data")]),
            row(&[("service", "S3"), ("cost", "4.0"), ("team", "ops")]),
        ];
        let summary = aggregate(&rows, &resolver(&["team"]));
        assert_eq!(summary.tag_costs["EC2,data"], 4.0);
        assert_eq!(summary.tag_costs["S3,ops"], 4.0);
        assert_eq!(summary.total, 8.0);
        assert_eq!(summary.skipped_rows, 0);

        let per_key: f64 = summary.tag_costs.values().sum();
        assert!((per_key - summary.total).abs() < f64::EPSILON * 8.0);
    }

    #[test]
    fn test_unparsable_cost_skips_the_row() {
        let rows = vec![
            row(&[("service", "EC2"), ("cost", "not-a-number"), ("team", "x")]),
            row(&[("service", "EC2"), ("team", "x")]),
            row(&[("service", "EC2"), ("cost", "1.0"), ("team", "x")]),
        ];
        let summary = aggregate(&rows, &resolver(&["team"]));
        assert_eq!(summary.total, 1.0);
        assert_eq!(summary.skipped_rows, 2);
    }

    #[test]
    fn test_untagged_rows_group_under_untagged() {
        let rows = vec![row(&[("service", "EC2"), ("cost", "3.0")])];
        let summary = aggregate(&rows, &resolver(&["team"]));
        assert_eq!(summary.tag_costs["EC2,Untagged"], 3.0);
    }

    #[test]
    fn test_ri_allocation_preserves_the_service_fee() {
        let ri_cost = vec![row(&[("service", "EC2"), ("cost", "100.0")])];
        let ri_usage = vec![
            row(&[
                ("service", "EC2"),
                ("normalized_amount", "30"),
                ("amount", "1"),
                ("team", "data"),
            ]),
            row(&[
                ("service", "EC2"),
                ("normalized_amount", "70"),
                ("amount", "1"),
                ("team", "ops"),
            ]),
        ];
        let decorated = allocate_ri_costs(&ri_cost, ri_usage);
        assert_eq!(decorated.len(), 2);

        let costs: Vec<f64> = decorated
            .iter()
            .map(|r| r["cost"].parse::<f64>().unwrap())
            .collect();
        assert_eq!(costs, vec![30.0, 70.0]);

        // Appended to the primary stream, each lands in its tag group.
        let summary = aggregate(&decorated, &resolver(&["team"]));
        assert_eq!(summary.tag_costs["EC2,data"], 30.0);
        assert_eq!(summary.tag_costs["EC2,ops"], 70.0);
        assert_eq!(summary.total, 100.0);
    }

    #[test]
    fn test_ri_allocation_prefers_normalized_amount() {
        let ri_cost = vec![row(&[("service", "EC2"), ("cost", "90.0")])];
        let ri_usage = vec![
            row(&[("service", "EC2"), ("normalized_amount", "1"), ("amount", "100")]),
            row(&[("service", "EC2"), ("normalized_amount", "2"), ("amount", "100")]),
        ];
        let decorated = allocate_ri_costs(&ri_cost, ri_usage);
        let costs: Vec<f64> = decorated
            .iter()
            .map(|r| r["cost"].parse::<f64>().unwrap())
            .collect();
        assert_eq!(costs, vec![30.0, 60.0]);
    }

    #[test]
    fn test_ri_allocation_falls_back_to_amount() {
        let ri_cost = vec![row(&[("service", "RDS"), ("cost", "10.0")])];
        let ri_usage = vec![
            row(&[("service", "RDS"), ("normalized_amount", "0"), ("amount", "4")]),
            row(&[("service", "RDS"), ("normalized_amount", ""), ("amount", "6")]),
        ];
        let decorated = allocate_ri_costs(&ri_cost, ri_usage);
        let costs: Vec<f64> = decorated
            .iter()
            .map(|r| r["cost"].parse::<f64>().unwrap())
            .collect();
        assert_eq!(costs, vec![4.0, 6.0]);
    }

    #[test]
    fn test_rows_without_usage_get_no_cost() {
        let ri_cost = vec![row(&[("service", "EC2"), ("cost", "100.0")])];
        let ri_usage = vec![
            row(&[("service", "EC2"), ("normalized_amount", "0"), ("amount", "0")]),
            row(&[("service", "EC2"), ("normalized_amount", "5"), ("amount", "0")]),
        ];
        let decorated = allocate_ri_costs(&ri_cost, ri_usage);
        assert!(!decorated[0].contains_key("cost"));
        assert_eq!(decorated[1]["cost"].parse::<f64>().unwrap(), 100.0);
    }

    #[test]
    fn test_synthetic_costs_round_trip_exactly() {
        let ri_cost = vec![row(&[("service", "EC2"), ("cost", "100.0")])];
        let ri_usage = vec![
            row(&[("service", "EC2"), ("normalized_amount", "1"), ("team", "a")]),
            row(&[("service", "EC2"), ("normalized_amount", "2"), ("team", "b")]),
            row(&[("service", "EC2"), ("normalized_amount", "4"), ("team", "c")]),
        ];
        let decorated = allocate_ri_costs(&ri_cost, ri_usage);
        let total: f64 = decorated
            .iter()
            .map(|r| r["cost"].parse::<f64>().unwrap())
            .sum();
        let expected = (1.0 / 7.0) * 100.0 + (2.0 / 7.0) * 100.0 + (4.0 / 7.0) * 100.0;
        assert_eq!(total, expected);
    }
}
