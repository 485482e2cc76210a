//! Curvert: converts the AWS Cost and Usage Report to Parquet and
//! attributes cost to tag groups through Athena.
//!
//! This crate handles:
//! - Parsing the monthly CUR manifest and deriving a typed column schema
//! - Streaming gzipped CSV shards to Parquet with bounded concurrency
//! - Envelope-encrypted uploads and destination garbage collection
//! - Driving parameterized Athena queries to completion
//! - Resolving tag groups per row and aggregating cost, with optional
//!   reserved-instance fee re-allocation

pub mod athena;
pub mod aws;
pub mod config;
pub mod convert;
pub mod cost;
pub mod error;
pub mod storage;

// Re-export commonly used items
pub use athena::QueryDriver;
pub use config::Config;
pub use convert::{CurConverter, DEFAULT_CONCURRENCY};
pub use cost::CostByTag;
pub use error::RunError;
