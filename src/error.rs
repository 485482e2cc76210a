//! Error types for the curvert conversion and attribution engines.

use std::path::PathBuf;

use snafu::prelude::*;

use aws_sdk_athena::operation::get_query_execution::GetQueryExecutionError;
use aws_sdk_athena::operation::get_query_results::GetQueryResultsError;
use aws_sdk_athena::operation::start_query_execution::StartQueryExecutionError;
use aws_sdk_kms::operation::generate_data_key::GenerateDataKeyError;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::delete_objects::DeleteObjectsError;
use aws_sdk_s3::operation::get_bucket_location::GetBucketLocationError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Error;
use aws_sdk_s3::operation::put_object::PutObjectError;
use aws_sdk_s3::primitives::ByteStreamError;
use aws_sdk_sts::operation::assume_role::AssumeRoleError;
use aws_sdk_sts::operation::get_caller_identity::GetCallerIdentityError;

// ============ Config Errors ============

/// Errors that can occur while loading the attribution configuration.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[snafu(display("failed to read config file {}: {source}", path.display()))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to decode the configuration file.
    #[snafu(display("failed to decode config file {}: {source}", path.display()))]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// A named SQL template is missing.
    #[snafu(display("config has no sql template named '{name}'"))]
    MissingSql { name: String },

    /// The configuration declares no tag axes.
    #[snafu(display("config declares no tagmap entries"))]
    EmptyTagMap,

    /// The month flag is not a YYYYMM value.
    #[snafu(display("month must be YYYYMM, got '{value}'"))]
    InvalidMonth { value: String },
}

// ============ Storage Errors ============

/// Errors that can occur during S3 operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Failed to resolve the bucket's home region.
    #[snafu(display("failed to locate bucket {bucket}: {source}"))]
    BucketLocation {
        bucket: String,
        source: SdkError<GetBucketLocationError>,
    },

    /// Object download failed.
    #[snafu(display("failed to download object, bucket: {bucket}, key: {key}: {source}"))]
    Download {
        bucket: String,
        key: String,
        source: SdkError<GetObjectError>,
    },

    /// Reading a downloaded object body failed.
    #[snafu(display("failed reading object body, bucket: {bucket}, key: {key}: {source}"))]
    DownloadBody {
        bucket: String,
        key: String,
        source: ByteStreamError,
    },

    /// Object upload failed.
    #[snafu(display("failed to upload object, bucket: {bucket}, key: {key}: {source}"))]
    Upload {
        bucket: String,
        key: String,
        source: SdkError<PutObjectError>,
    },

    /// Listing a destination prefix failed.
    #[snafu(display("failed to list {prefix} in bucket {bucket}: {source}"))]
    List {
        bucket: String,
        prefix: String,
        source: SdkError<ListObjectsV2Error>,
    },

    /// Batch delete failed.
    #[snafu(display("failed to delete {count} objects in bucket {bucket}: {source}"))]
    Delete {
        bucket: String,
        count: usize,
        source: SdkError<DeleteObjectsError>,
    },

    /// A delete request could not be assembled.
    #[snafu(display("failed to build delete request: {source}"))]
    DeleteRequest {
        source: aws_sdk_s3::error::BuildError,
    },

    /// Role assumption was denied or failed.
    #[snafu(display("failed to assume role {role_arn}: {source}"))]
    AssumeRole {
        role_arn: String,
        source: SdkError<AssumeRoleError>,
    },

    /// STS returned no credentials for an assumed role.
    #[snafu(display("assumed role {role_arn} returned no credentials"))]
    NoCredentials { role_arn: String },

    /// Reading the MFA token from stdin failed.
    #[snafu(display("failed to read MFA token: {source}"))]
    MfaToken { source: std::io::Error },

    /// KMS data key generation failed.
    #[snafu(display("failed to generate data key under {key_id}: {source}"))]
    GenerateDataKey {
        key_id: String,
        source: SdkError<GenerateDataKeyError>,
    },

    /// KMS returned an incomplete data key.
    #[snafu(display("KMS returned an incomplete data key for {key_id}"))]
    IncompleteDataKey { key_id: String },

    /// Envelope encryption failed.
    #[snafu(display("envelope encryption failed: {message}"))]
    Encrypt { message: String },

    /// Local file IO during transfer.
    #[snafu(display("IO error on {}: {source}", path.display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl StorageError {
    /// Check if this error represents a missing object (NoSuchKey / 404).
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::Download { source, .. } => source
                .as_service_error()
                .is_some_and(|e| e.is_no_such_key()),
            _ => false,
        }
    }
}

// ============ Manifest Errors ============

/// Errors that can occur while fetching and decoding the CUR manifest.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ManifestError {
    /// The manifest object does not exist.
    #[snafu(display("CUR manifest not found, bucket: {bucket}, key: {key}"))]
    NotFound { bucket: String, key: String },

    /// Downloading the manifest failed for a reason other than absence.
    #[snafu(display("failed to download manifest, bucket: {bucket}, key: {key}: {source}"))]
    Fetch {
        bucket: String,
        key: String,
        source: StorageError,
    },

    /// The manifest body is not the expected JSON shape.
    #[snafu(display("failed to parse manifest, bucket: {bucket}, key: {key}: {source}"))]
    Invalid {
        bucket: String,
        key: String,
        source: serde_json::Error,
    },
}

// ============ Conversion Errors ============

/// Errors that can occur during CUR-to-Parquet conversion.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConvertError {
    /// Manifest fetch or decode failed.
    #[snafu(display("error parsing CUR manifest: {source}"))]
    Manifest { source: ManifestError },

    /// Source-side object IO failed.
    #[snafu(display("error downloading CUR shard: {source}"))]
    Source { source: StorageError },

    /// A shard's gzip or CSV stream is corrupt.
    #[snafu(display("corrupt CUR shard {}: {source}", path.display()))]
    ShardCorrupt { path: PathBuf, source: csv::Error },

    /// A shard's header width disagrees with the manifest.
    #[snafu(display(
        "shard {} has {actual} columns, manifest expects {expected}", path.display()
    ))]
    ColumnMismatch {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },

    /// Assembling an Arrow batch failed.
    #[snafu(display("failed to assemble record batch: {source}"))]
    Batch { source: arrow::error::ArrowError },

    /// Parquet encoding failed.
    #[snafu(display("failed to encode parquet {}: {source}", path.display()))]
    Encode {
        path: PathBuf,
        source: parquet::errors::ParquetError,
    },

    /// Destination-side object IO failed.
    #[snafu(display("error uploading converted shard: {source}"))]
    Dest { source: StorageError },

    /// Post-conversion cleanup failed; converted data is intact.
    #[snafu(display("cleanup of destination prefix failed: {source}"))]
    Gc { source: StorageError },

    /// Temp-file IO failed.
    #[snafu(display("IO error on {}: {source}", path.display()))]
    TempFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A shard worker panicked.
    #[snafu(display("shard task failed: {source}"))]
    TaskJoin { source: tokio::task::JoinError },

    /// The concurrency setting is out of range.
    #[snafu(display("file concurrency must be between 1-1000, got {value}"))]
    Concurrency { value: usize },
}

// ============ Query Errors ============

/// Errors that can occur while driving Athena queries.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum QueryError {
    /// Query submission failed.
    #[snafu(display("failed to start query: {source}"))]
    Start {
        source: SdkError<StartQueryExecutionError>,
    },

    /// The engine acknowledged the query without an execution id.
    #[snafu(display("query submission returned no execution id"))]
    NoExecutionId,

    /// Polling execution status failed.
    #[snafu(display("failed to poll query {query_id}: {source}"))]
    Poll {
        query_id: String,
        source: SdkError<GetQueryExecutionError>,
    },

    /// The query reached a non-SUCCEEDED terminal state.
    #[snafu(display("query {query_id} finished in state {state}: {reason}"))]
    Failed {
        query_id: String,
        state: String,
        reason: String,
    },

    /// Fetching result pages failed.
    #[snafu(display("failed to fetch results for query {query_id}: {source}"))]
    Results {
        query_id: String,
        source: SdkError<GetQueryResultsError>,
    },

    /// Resolving the caller account for the default result location failed.
    #[snafu(display("failed to resolve caller identity: {source}"))]
    CallerIdentity {
        source: SdkError<GetCallerIdentityError>,
    },
}

// ============ Attribution Errors ============

/// Errors that can occur in the tag attribution engine.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CostError {
    /// Configuration error.
    #[snafu(display("configuration error: {source}"))]
    Config { source: ConfigError },

    /// Query error.
    #[snafu(display("query error: {source}"))]
    Query { source: QueryError },

    /// Writing the report failed.
    #[snafu(display("failed to write report: {source}"))]
    Report { source: std::io::Error },
}

// ============ Top-level Errors ============

/// Top-level run errors surfaced to the CLI.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RunError {
    /// Configuration error.
    #[snafu(display("configuration error: {source}"))]
    RunConfig { source: ConfigError },

    /// Conversion error.
    #[snafu(display("conversion failed: {source}"))]
    RunConvert { source: ConvertError },

    /// Storage or credential error.
    #[snafu(display("storage error: {source}"))]
    RunStorage { source: StorageError },

    /// Attribution error.
    #[snafu(display("cost attribution failed: {source}"))]
    RunCost { source: CostError },
}

impl From<ConfigError> for RunError {
    fn from(source: ConfigError) -> Self {
        RunError::RunConfig { source }
    }
}

impl From<ConvertError> for RunError {
    fn from(source: ConvertError) -> Self {
        RunError::RunConvert { source }
    }
}

impl From<StorageError> for RunError {
    fn from(source: StorageError) -> Self {
        RunError::RunStorage { source }
    }
}

impl From<CostError> for RunError {
    fn from(source: CostError) -> Self {
        RunError::RunCost { source }
    }
}

impl From<QueryError> for CostError {
    fn from(source: QueryError) -> Self {
        CostError::Query { source }
    }
}

impl From<ConfigError> for CostError {
    fn from(source: ConfigError) -> Self {
        CostError::Config { source }
    }
}
