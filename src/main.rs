//! Curvert CLI: CUR conversion and cost-by-tag attribution.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use curvert::aws::RoleSpec;
use curvert::convert::{dest_path_for_month, manifest_key, month_window, DEFAULT_CONCURRENCY};
use curvert::{Config, CostByTag, CurConverter, QueryDriver, RunError};

/// Curvert - AWS CUR conversion and cost attribution
#[derive(Parser, Debug)]
#[command(name = "curvert")]
#[command(about = "Converts the AWS CUR to Parquet and attributes cost to tag groups")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download, convert and re-upload the monthly CUR as Parquet
    Convert(ConvertArgs),
    /// Attribute per-service cost to tag groups via Athena
    Costbytag(CostByTagArgs),
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Source bucket which contains the CUR
    #[arg(long = "sourceBucket")]
    source_bucket: String,

    /// Destination bucket; defaults to the source bucket
    #[arg(long = "destBucket")]
    dest_bucket: Option<String>,

    /// Destination path for converted CUR; defaults to parquet-cur/YYYYMM
    #[arg(long = "destPath")]
    dest_path: Option<String>,

    /// CUR report path, as defined when creating the AWS report
    #[arg(long = "reportPath", default_value = "")]
    report_path: String,

    /// CUR report name, as defined when creating the AWS report
    #[arg(long = "reportName")]
    report_name: String,

    /// Month of CUR to convert, YYYYMM; defaults to the current month
    #[arg(long)]
    month: Option<String>,

    /// Role ARN to assume when downloading the CUR
    #[arg(long = "sourceRole")]
    source_role: Option<String>,

    /// External ID used when assuming the source role
    #[arg(long = "sourceExternalID")]
    source_external_id: Option<String>,

    /// Role ARN to assume when uploading converted files
    #[arg(long = "destRole")]
    dest_role: Option<String>,

    /// External ID used when assuming the destination role
    #[arg(long = "destExternalID")]
    dest_external_id: Option<String>,

    /// KMS master key for envelope-encrypting uploads
    #[arg(long = "kmsKey")]
    kms_key: Option<String>,

    /// Shards converted concurrently (1-1000)
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Directory for temporary shard files
    #[arg(long = "tmpDir")]
    tmp_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct CostByTagArgs {
    /// Reporting window start, YYYYMMDD (informational)
    #[arg(long = "startDate")]
    start_date: Option<String>,

    /// Reporting window end, YYYYMMDD (informational)
    #[arg(long = "endDate")]
    end_date: Option<String>,

    /// Athena database to use
    #[arg(long, default_value = "cur")]
    database: String,

    /// Athena table to query
    #[arg(long)]
    table: String,

    /// Region the Athena database and table exist in
    #[arg(long, default_value = "us-east-1")]
    region: String,

    /// Role ARN to assume when querying Athena
    #[arg(long = "roleArn")]
    role_arn: Option<String>,

    /// External ID used when assuming the role
    #[arg(long = "externalID")]
    external_id: Option<String>,

    /// MFA serial or ARN; prompts for a token code
    #[arg(long = "mfaSerial")]
    mfa_serial: Option<String>,

    /// Athena results location override
    #[arg(long = "resultsLocation")]
    results_location: Option<String>,

    /// JSON tag configuration file
    #[arg(long)]
    config: PathBuf,

    /// Re-allocate reserved-instance fees across consumers by usage
    #[arg(long)]
    riusage: bool,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Convert(args) => run_convert(args).await,
        Command::Costbytag(args) => run_costbytag(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_convert(args: ConvertArgs) -> Result<(), RunError> {
    let (month_label, window) = month_window(args.month.as_deref())?;
    let manifest = manifest_key(&args.report_path, &window, &args.report_name);
    let dest_path = dest_path_for_month(args.dest_path.as_deref(), &month_label);
    let dest_bucket = args.dest_bucket.unwrap_or_else(|| args.source_bucket.clone());

    info!(
        source = %args.source_bucket,
        dest = %dest_bucket,
        manifest = %manifest,
        "starting CUR conversion"
    );

    let mut converter = CurConverter::new(&args.source_bucket, &manifest, &dest_bucket, &dest_path)
        .with_source_role(RoleSpec::from_options(
            args.source_role,
            args.source_external_id,
            None,
        ))
        .with_dest_role(RoleSpec::from_options(
            args.dest_role,
            args.dest_external_id,
            None,
        ))
        .with_kms_key(args.kms_key)
        .with_concurrency(args.concurrency)?;
    if let Some(tmp_dir) = args.tmp_dir {
        converter = converter.with_temp_dir(tmp_dir);
    }

    let conversion = converter.run().await?;
    info!(
        shards = conversion.shards,
        rows = conversion.rows,
        columns = conversion.columns.len(),
        dataset = %conversion.dataset_uri,
        "conversion complete"
    );
    Ok(())
}

async fn run_costbytag(args: CostByTagArgs) -> Result<(), RunError> {
    let config = Config::from_file(&args.config)?;
    if args.start_date.is_some() || args.end_date.is_some() {
        info!(
            start = args.start_date.as_deref().unwrap_or(""),
            end = args.end_date.as_deref().unwrap_or(""),
            "reporting window"
        );
    }

    let base = curvert::aws::base_config(&args.region).await;
    let session = match RoleSpec::from_options(args.role_arn, args.external_id, args.mfa_serial) {
        Some(role) => curvert::aws::assumed_config(&base, &role).await?,
        None => base,
    };
    let driver = QueryDriver::new(&session, &args.region, args.results_location)
        .await
        .map_err(|source| curvert::error::CostError::Query { source })?;

    let job = CostByTag::new(config, args.database, args.table, args.riusage);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    job.run(&driver, &mut out).await?;
    Ok(())
}
