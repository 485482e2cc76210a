//! Destination cleanup: delete objects not produced by the current run.

use std::collections::HashSet;

use snafu::prelude::*;
use tracing::{debug, info};

use crate::error::{ConvertError, GcSnafu};
use crate::storage::BucketSession;

/// Remove every object under `dest_path/` whose key is not in `live`.
///
/// Runs only after all shard pipelines have completed, so the live set is
/// final. Failures here leave the converted data intact.
pub async fn clean_destination(
    dest: &BucketSession,
    dest_path: &str,
    live: &HashSet<String>,
) -> Result<(), ConvertError> {
    let prefix = format!("{dest_path}/");
    let listed = dest.list(&prefix).await.context(GcSnafu)?;
    let stale = stale_keys(listed, live);
    if stale.is_empty() {
        debug!(prefix, "destination prefix is clean");
        return Ok(());
    }
    info!(prefix, count = stale.len(), "deleting stale destination objects");
    dest.delete(&stale).await.context(GcSnafu)
}

fn stale_keys(listed: Vec<String>, live: &HashSet<String>) -> Vec<String> {
    listed
        .into_iter()
        .filter(|key| !live.contains(key))
        .collect()
}
