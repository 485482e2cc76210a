//! Athena query driver: submit, poll to completion, paginate results.
//!
//! Results come back as label → string-value maps, decoded positionally
//! against the header row the engine returns first. Rows with any absent
//! cell are dropped (and counted); downstream they contribute nothing.

use std::collections::HashMap;
use std::time::Duration;

use aws_config::SdkConfig;
use aws_sdk_athena::types::{QueryExecutionContext, QueryExecutionState, ResultConfiguration};
use snafu::prelude::*;
use tracing::{debug, warn};

use crate::convert::CurColumn;
use crate::error::{
    CallerIdentitySnafu, FailedSnafu, NoExecutionIdSnafu, PollSnafu, QueryError, ResultsSnafu,
    StartSnafu,
};

/// Status poll cadence.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// One decoded result row.
pub type ResultRow = HashMap<String, String>;

/// Driver for parameterized queries against one database's engine.
pub struct QueryDriver {
    client: aws_sdk_athena::Client,
    result_location: String,
}

impl QueryDriver {
    /// Build a driver. Without an override, the result location is the
    /// account's conventional bucket,
    /// `s3://aws-athena-query-results-<account>-<region>/`.
    pub async fn new(
        config: &SdkConfig,
        region: &str,
        result_location: Option<String>,
    ) -> Result<Self, QueryError> {
        let result_location = match result_location {
            Some(location) => location,
            None => {
                let sts = aws_sdk_sts::Client::new(config);
                let identity = sts
                    .get_caller_identity()
                    .send()
                    .await
                    .context(CallerIdentitySnafu)?;
                let account = identity.account().unwrap_or_default();
                format!("s3://aws-athena-query-results-{account}-{region}/")
            }
        };
        Ok(Self {
            client: aws_sdk_athena::Client::new(config),
            result_location,
        })
    }

    /// Run `sql` against `database` and return the decoded rows.
    pub async fn run(&self, database: &str, sql: &str) -> Result<Vec<ResultRow>, QueryError> {
        let started = self
            .client
            .start_query_execution()
            .query_string(sql)
            .query_execution_context(
                QueryExecutionContext::builder().database(database).build(),
            )
            .result_configuration(
                ResultConfiguration::builder()
                    .output_location(&self.result_location)
                    .build(),
            )
            .send()
            .await
            .context(StartSnafu)?;
        let query_id = started
            .query_execution_id()
            .context(NoExecutionIdSnafu)?
            .to_string();
        debug!(query_id, database, "started query");

        self.poll_to_completion(&query_id).await?;
        self.fetch_results(&query_id).await
    }

    /// Poll every 2 seconds while the query is queued or running; error on
    /// any terminal state other than SUCCEEDED.
    async fn poll_to_completion(&self, query_id: &str) -> Result<(), QueryError> {
        loop {
            let output = self
                .client
                .get_query_execution()
                .query_execution_id(query_id)
                .send()
                .await
                .context(PollSnafu {
                    query_id: query_id.to_string(),
                })?;
            let status = output.query_execution().and_then(|q| q.status());
            let state = status.and_then(|s| s.state());
            match state {
                Some(QueryExecutionState::Queued) | Some(QueryExecutionState::Running) => {
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Some(QueryExecutionState::Succeeded) => return Ok(()),
                other => {
                    let reason = status
                        .and_then(|s| s.state_change_reason())
                        .unwrap_or("")
                        .to_string();
                    return FailedSnafu {
                        query_id: query_id.to_string(),
                        state: other.map_or("UNKNOWN".to_string(), |s| s.as_str().to_string()),
                        reason,
                    }
                    .fail();
                }
            }
        }
    }

    async fn fetch_results(&self, query_id: &str) -> Result<Vec<ResultRow>, QueryError> {
        let mut header: Vec<String> = Vec::new();
        let mut rows = Vec::new();
        let mut dropped = 0usize;

        let mut pages = self
            .client
            .get_query_results()
            .query_execution_id(query_id)
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.context(ResultsSnafu {
                query_id: query_id.to_string(),
            })?;
            let Some(result_set) = page.result_set() else {
                continue;
            };
            for raw_row in result_set.rows() {
                let data = raw_row.data();
                if header.is_empty() {
                    // The engine returns column labels as the first row.
                    header = data
                        .iter()
                        .map(|d| d.var_char_value().unwrap_or("").to_string())
                        .collect();
                    continue;
                }
                let mut row = ResultRow::new();
                let mut absent = false;
                for (index, datum) in data.iter().enumerate() {
                    if index >= header.len() {
                        break;
                    }
                    match datum.var_char_value() {
                        Some(value) => {
                            row.insert(header[index].clone(), value.to_string());
                        }
                        None => {
                            absent = true;
                            break;
                        }
                    }
                }
                if absent || row.is_empty() {
                    dropped += 1;
                    continue;
                }
                rows.push(row);
            }
        }
        if dropped > 0 {
            warn!(query_id, dropped, "dropped result rows with absent cells");
        }
        debug!(query_id, rows = rows.len(), "fetched query results");
        Ok(rows)
    }
}

/// Substitute literal tokens into a SQL template with global replacement.
/// Tokens absent from `params` are left intact.
pub fn substitute_params(sql: &str, params: &[(&str, &str)]) -> String {
    let mut sql = sql.to_string();
    for (token, value) in params {
        sql = sql.replace(token, value);
    }
    sql
}

/// Render the `**COLUMNS**` clause of a CREATE TABLE template:
/// backtick-quoted names, one column per line, no trailing comma.
pub fn columns_clause(columns: &[CurColumn]) -> String {
    columns
        .iter()
        .map(|column| format!("`{}` {}", column.name, column.column_type))
        .collect::<Vec<_>>()
        .join(",\n")
}

/// Render a CREATE TABLE statement for the converted dataset.
pub fn render_create_table(
    template: &str,
    db_name: &str,
    columns: &[CurColumn],
    s3_path: &str,
    date: &str,
) -> String {
    let clause = columns_clause(columns);
    substitute_params(
        template,
        &[
            ("**DBNAME**", db_name),
            ("**DATE**", date),
            ("**COLUMNS**", &clause),
            ("**S3**", s3_path),
        ],
    )
}
