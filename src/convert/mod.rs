//! CUR conversion engine.
//!
//! Drives the manifest-described monthly report through a bounded pool of
//! per-shard download → transcode → upload workers, then garbage-collects
//! stale objects at the destination prefix.

mod gc;
pub mod manifest;
mod transcode;

pub use manifest::{ColumnSchema, CurColumn, Manifest};
pub use transcode::{Transcoder, ROW_GROUP_SIZE};

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, Months, NaiveDate};
use snafu::prelude::*;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::aws::RoleSpec;
use crate::error::{
    ConcurrencySnafu, ConfigError, ConvertError, DestSnafu, InvalidMonthSnafu, ManifestError,
    ManifestSnafu, SourceSnafu, TaskJoinSnafu, TempFileSnafu,
};
use crate::storage::{BucketSession, EnvelopeCipher};

/// Shards converted in parallel unless overridden.
pub const DEFAULT_CONCURRENCY: usize = 30;

/// Configured converter for one monthly CUR.
pub struct CurConverter {
    source_bucket: String,
    manifest_key: String,
    dest_bucket: String,
    dest_path: String,
    source_role: Option<RoleSpec>,
    dest_role: Option<RoleSpec>,
    kms_key: Option<String>,
    temp_dir: PathBuf,
    concurrency: usize,
}

/// Outcome of a conversion run.
#[derive(Debug)]
pub struct Conversion {
    /// Emitted columns, typed for table DDL.
    pub columns: Vec<CurColumn>,
    /// `s3://bucket/destPath/` URI of the converted dataset.
    pub dataset_uri: String,
    /// Number of shards converted (equals the live set size).
    pub shards: usize,
    /// Total data rows written across all shards.
    pub rows: u64,
}

impl CurConverter {
    pub fn new(
        source_bucket: impl Into<String>,
        manifest_key: impl Into<String>,
        dest_bucket: impl Into<String>,
        dest_path: impl Into<String>,
    ) -> Self {
        Self {
            source_bucket: source_bucket.into(),
            manifest_key: manifest_key.into(),
            dest_bucket: dest_bucket.into(),
            dest_path: dest_path.into(),
            source_role: None,
            dest_role: None,
            kms_key: None,
            temp_dir: std::env::temp_dir(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Role to assume for source-side downloads.
    pub fn with_source_role(mut self, role: Option<RoleSpec>) -> Self {
        self.source_role = role;
        self
    }

    /// Role to assume for destination-side uploads.
    pub fn with_dest_role(mut self, role: Option<RoleSpec>) -> Self {
        self.dest_role = role;
        self
    }

    /// KMS master key for envelope-encrypting uploads.
    pub fn with_kms_key(mut self, key: Option<String>) -> Self {
        self.kms_key = key;
        self
    }

    /// Directory for downloaded and transcoded temp files.
    pub fn with_temp_dir(mut self, dir: PathBuf) -> Self {
        self.temp_dir = dir;
        self
    }

    /// Number of shards processed concurrently (1–1000).
    pub fn with_concurrency(mut self, concurrency: usize) -> Result<Self, ConvertError> {
        ensure!(
            (1..=1000).contains(&concurrency),
            ConcurrencySnafu { value: concurrency }
        );
        self.concurrency = concurrency;
        Ok(self)
    }

    /// Convert the report: parse the manifest, run the shard pool, then
    /// clean the destination prefix.
    pub async fn run(&self) -> Result<Conversion, ConvertError> {
        let source = BucketSession::open(&self.source_bucket, self.source_role.as_ref())
            .await
            .context(SourceSnafu)?;
        let dest = BucketSession::open(&self.dest_bucket, self.dest_role.as_ref())
            .await
            .context(DestSnafu)?;
        let cipher = self
            .kms_key
            .as_ref()
            .map(|key| Arc::new(EnvelopeCipher::new(dest.config(), key)));

        let manifest = self.fetch_manifest(&source).await?;
        let schema = ColumnSchema::from_manifest(&manifest);
        info!(
            columns = schema.emitted().count(),
            shards = manifest.report_keys.len(),
            "parsed CUR manifest"
        );

        let (live, rows) = self
            .run_shards(source, dest.clone(), cipher, &schema, manifest.report_keys)
            .await?;
        gc::clean_destination(&dest, &self.dest_path, &live).await?;

        Ok(Conversion {
            columns: schema.cur_columns(),
            dataset_uri: format!("s3://{}/{}/", self.dest_bucket, self.dest_path),
            shards: live.len(),
            rows,
        })
    }

    async fn fetch_manifest(&self, source: &BucketSession) -> Result<Manifest, ConvertError> {
        let bytes = source
            .download(&self.manifest_key)
            .await
            .map_err(|source_err| {
                if source_err.is_not_found() {
                    ManifestError::NotFound {
                        bucket: self.source_bucket.clone(),
                        key: self.manifest_key.clone(),
                    }
                } else {
                    ManifestError::Fetch {
                        bucket: self.source_bucket.clone(),
                        key: self.manifest_key.clone(),
                        source: source_err,
                    }
                }
            })
            .context(ManifestSnafu)?;
        Manifest::from_slice(&bytes, &self.source_bucket, &self.manifest_key)
            .context(ManifestSnafu)
    }

    /// Run the bounded shard pool. The first error wins; in-flight workers
    /// finish and later errors are logged and discarded.
    async fn run_shards(
        &self,
        source: BucketSession,
        dest: BucketSession,
        cipher: Option<Arc<EnvelopeCipher>>,
        schema: &ColumnSchema,
        report_keys: Vec<String>,
    ) -> Result<(HashSet<String>, u64), ConvertError> {
        let transcoder = Arc::new(Transcoder::new(schema));
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut workers: JoinSet<Result<(String, u64), ConvertError>> = JoinSet::new();

        for key in report_keys {
            let semaphore = semaphore.clone();
            let source = source.clone();
            let dest = dest.clone();
            let cipher = cipher.clone();
            let transcoder = transcoder.clone();
            let temp_dir = self.temp_dir.clone();
            let dest_path = self.dest_path.clone();
            workers.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                process_shard(&source, &dest, cipher.as_deref(), &transcoder, &temp_dir, &dest_path, &key)
                    .await
            });
        }

        let mut live = HashSet::new();
        let mut rows = 0u64;
        let mut first_error: Option<ConvertError> = None;
        while let Some(joined) = workers.join_next().await {
            match joined.context(TaskJoinSnafu) {
                Ok(Ok((dest_key, shard_rows))) => {
                    live.insert(dest_key);
                    rows += shard_rows;
                }
                Ok(Err(error)) | Err(error) => {
                    if first_error.is_none() {
                        first_error = Some(error);
                    } else {
                        warn!(error = %error, "shard failure after run was already failed");
                    }
                }
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok((live, rows)),
        }
    }
}

/// Download, transcode and upload one shard, unlinking temp files on success.
async fn process_shard(
    source: &BucketSession,
    dest: &BucketSession,
    cipher: Option<&EnvelopeCipher>,
    transcoder: &Arc<Transcoder>,
    temp_dir: &Path,
    dest_path: &str,
    key: &str,
) -> Result<(String, u64), ConvertError> {
    let basename = key.rsplit('/').next().unwrap_or(key);
    let gzip_path = temp_dir.join(basename);
    source
        .download_to_file(key, &gzip_path)
        .await
        .context(SourceSnafu)?;

    // "shard-1.csv.gz" -> "shard-1.parquet"
    let stem = basename.split('.').next().unwrap_or(basename);
    let parquet_path = temp_dir.join(format!("{stem}.parquet"));
    let rows = {
        let transcoder = transcoder.clone();
        let gzip = gzip_path.clone();
        let parquet = parquet_path.clone();
        tokio::task::spawn_blocking(move || transcoder.transcode(&gzip, &parquet))
            .await
            .context(TaskJoinSnafu)??
    };

    let dest_key = format!("{dest_path}/{stem}.parquet");
    dest.upload_file(&dest_key, &parquet_path, cipher)
        .await
        .context(DestSnafu)?;

    tokio::fs::remove_file(&gzip_path).await.context(TempFileSnafu {
        path: gzip_path.clone(),
    })?;
    tokio::fs::remove_file(&parquet_path)
        .await
        .context(TempFileSnafu {
            path: parquet_path.clone(),
        })?;
    debug!(shard = key, rows, "converted shard");
    Ok((dest_key, rows))
}

/// The month window for a conversion: the `YYYYMM` label and the
/// `YYYYMM01-YYYYMM01` segment embedded in the manifest key.
pub fn month_window(month: Option<&str>) -> Result<(String, String), ConfigError> {
    let start: NaiveDate = match month {
        Some(value) => NaiveDate::parse_from_str(&format!("{value}01"), "%Y%m%d")
            .ok()
            .context(InvalidMonthSnafu { value })?,
        None => Local::now().date_naive(),
    };
    let end = start
        .checked_add_months(Months::new(1))
        .context(InvalidMonthSnafu {
            value: month.unwrap_or_default(),
        })?;
    let label = start.format("%Y%m").to_string();
    let segment = format!("{}01-{}01", label, end.format("%Y%m"));
    Ok((label, segment))
}

/// Manifest key convention: `<reportPath>/<window>/<reportName>-Manifest.json`.
pub fn manifest_key(report_path: &str, window: &str, report_name: &str) -> String {
    format!("{report_path}/{window}/{report_name}-Manifest.json")
}

/// Destination path for a month: `parquet-cur/YYYYMM` unless overridden,
/// in which case the month is appended to the override.
pub fn dest_path_for_month(dest_path: Option<&str>, month_label: &str) -> String {
    match dest_path {
        Some(path) if !path.is_empty() => format!("{path}/{month_label}"),
        _ => format!("parquet-cur/{month_label}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrency_bounds() {
        let converter = CurConverter::new("src", "m.json", "dst", "p");
        assert!(matches!(
            converter.with_concurrency(0),
            Err(ConvertError::Concurrency { value: 0 })
        ));
        let converter = CurConverter::new("src", "m.json", "dst", "p");
        assert!(matches!(
            converter.with_concurrency(1001),
            Err(ConvertError::Concurrency { value: 1001 })
        ));
        let converter = CurConverter::new("src", "m.json", "dst", "p");
        assert!(converter.with_concurrency(1000).is_ok());
    }

    #[test]
    fn test_month_window_formats_the_cur_segment() {
        let (label, segment) = month_window(Some("202401")).unwrap();
        assert_eq!(label, "202401");
        assert_eq!(segment, "20240101-20240201");

        let (label, segment) = month_window(Some("202412")).unwrap();
        assert_eq!(label, "202412");
        assert_eq!(segment, "20241201-20250101");
    }

    #[test]
    fn test_month_window_rejects_garbage() {
        assert!(matches!(
            month_window(Some("24-01")),
            Err(ConfigError::InvalidMonth { .. })
        ));
        assert!(matches!(
            month_window(Some("202413")),
            Err(ConfigError::InvalidMonth { .. })
        ));
    }

    #[test]
    fn test_manifest_key_convention() {
        assert_eq!(
            manifest_key("report/cur", "20240101-20240201", "myreport"),
            "report/cur/20240101-20240201/myreport-Manifest.json"
        );
    }

    #[test]
    fn test_dest_path_defaults_and_appends_month() {
        assert_eq!(dest_path_for_month(None, "202401"), "parquet-cur/202401");
        assert_eq!(dest_path_for_month(Some(""), "202401"), "parquet-cur/202401");
        assert_eq!(
            dest_path_for_month(Some("converted"), "202401"),
            "converted/202401"
        );
    }
}
