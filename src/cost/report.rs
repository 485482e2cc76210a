//! Stable-ordered CSV report emission.

use std::io::Write;

use super::aggregate::CostSummary;

/// Round to two decimal places.
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Write the cost report.
///
/// Header names the service, each tag axis, and the amount; group rows
/// follow in lexicographic key order with two-decimal amounts, eliding
/// groups that round to a cent or less; a separator and rounded total
/// close the report. Output is byte-deterministic for a given summary.
pub fn write_report<W: Write>(
    out: &mut W,
    summary: &CostSummary,
    axis_names: &[String],
) -> std::io::Result<()> {
    let mut header = String::from("\"service\",");
    for name in axis_names {
        header.push_str(&format!("\"{name}\","));
    }
    header.push_str("\"amount\"");
    writeln!(out, "{header}")?;

    for (key, value) in &summary.tag_costs {
        let rounded = round2(*value);
        if rounded > 0.01 {
            writeln!(out, "{key},{rounded:.2}")?;
        }
    }

    writeln!(out, "---------------------")?;
    writeln!(out, "Total: {:.2}", round2(summary.total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn summary(entries: &[(&str, f64)], total: f64) -> CostSummary {
        CostSummary {
            tag_costs: entries
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<BTreeMap<_, _>>(),
            total,
            skipped_rows: 0,
        }
    }

    fn render(summary: &CostSummary, axes: &[&str]) -> String {
        let axes: Vec<String> = axes.iter().map(|a| a.to_string()).collect();
        let mut out = Vec::new();
        write_report(&mut out, summary, &axes).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_report_layout() {
        let report = render(
            &summary(&[("EC2,data", 30.004), ("S3,ops", 1.5)], 31.504),
            &["Team"],
        );
        assert_eq!(
            report,
            "\"service\",\"Team\",\"amount\"\n\
             EC2,data,30.00\n\
             S3,ops,1.50\n\
             ---------------------\n\
             Total: 31.50\n"
        );
    }

    #[test]
    fn test_rows_at_or_below_a_cent_are_elided() {
        let report = render(
            &summary(&[("EC2,a", 0.004), ("EC2,b", 0.01), ("EC2,c", 0.02)], 0.034),
            &["Team"],
        );
        assert!(!report.contains("EC2,a"));
        assert!(!report.contains("EC2,b"));
        assert!(report.contains("EC2,c,0.02"));
        assert!(report.contains("Total: 0.03"));
    }

    #[test]
    fn test_keys_emit_in_lexicographic_order() {
        let report = render(
            &summary(&[("S3,b", 2.0), ("EC2,z", 1.0), ("EC2,a", 3.0)], 6.0),
            &["Team"],
        );
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines[1], "EC2,a,3.00");
        assert_eq!(lines[2], "EC2,z,1.00");
        assert_eq!(lines[3], "S3,b,2.00");
    }

    #[test]
    fn test_multiple_axes_widen_the_header() {
        let report = render(&summary(&[], 0.0), &["Team", "Env"]);
        assert!(report.starts_with("\"service\",\"Team\",\"Env\",\"amount\"\n"));
    }

    #[test]
    fn test_report_is_deterministic() {
        let summary = summary(&[("EC2,a", 1.0), ("S3,b", 2.0)], 3.0);
        assert_eq!(render(&summary, &["Team"]), render(&summary, &["Team"]));
    }
}
