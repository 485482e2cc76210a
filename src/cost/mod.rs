//! Tag attribution engine.
//!
//! Runs the tagmap query (and, when enabled, the RI cost/usage queries),
//! resolves tag groups per row, aggregates, and writes the report.

mod aggregate;
mod report;
mod resolver;

pub use aggregate::{aggregate, allocate_ri_costs, CostSummary};
pub use report::write_report;
pub use resolver::{TagResolver, UNTAGGED};

use std::io::Write;

use snafu::prelude::*;
use tracing::info;

use crate::athena::{substitute_params, QueryDriver};
use crate::config::Config;
use crate::error::{CostError, ReportSnafu};

/// One costbytag invocation.
pub struct CostByTag {
    config: Config,
    database: String,
    table: String,
    include_ri: bool,
}

impl CostByTag {
    pub fn new(config: Config, database: String, table: String, include_ri: bool) -> Self {
        Self {
            config,
            database,
            table,
            include_ri,
        }
    }

    /// Query, aggregate, and write the report to `out`.
    pub async fn run<W: Write>(&self, driver: &QueryDriver, out: &mut W) -> Result<(), CostError> {
        let tags = self.config.tags_clause();
        let sql = substitute_params(
            self.config.sql("tagmap")?,
            &[
                ("**TAGS**", tags.as_str()),
                ("**DB**", &self.database),
                ("**TABLE**", &self.table),
            ],
        );
        let mut rows = driver.run(&self.database, &sql).await?;
        info!(rows = rows.len(), "fetched tagmap rows");

        if self.include_ri {
            let sql = substitute_params(
                self.config.sql("ricost")?,
                &[("**DB**", self.database.as_str()), ("**TABLE**", &self.table)],
            );
            let ri_cost = driver.run(&self.database, &sql).await?;

            let sql = substitute_params(
                self.config.sql("riusage")?,
                &[
                    ("**TAGS**", tags.as_str()),
                    ("**DB**", &self.database),
                    ("**TABLE**", &self.table),
                ],
            );
            let ri_usage = driver.run(&self.database, &sql).await?;
            info!(
                services = ri_cost.len(),
                usage_rows = ri_usage.len(),
                "re-allocating RI fees"
            );
            rows.extend(allocate_ri_costs(&ri_cost, ri_usage));
        }

        let resolver = TagResolver::new(&self.config);
        let summary = aggregate(&rows, &resolver);
        if summary.skipped_rows > 0 {
            info!(skipped = summary.skipped_rows, "rows skipped during aggregation");
        }
        write_report(out, &summary, &resolver.axis_names()).context(ReportSnafu)
    }
}
