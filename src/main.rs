//! Command-line entry point: one query in, one CSV out.
//!
//! Flags select the query and the output; credentials and the storage token
//! come from the environment (a `.env` file is honored). Exit code 1 on any
//! failed run, with the first error printed to stderr.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use datacloud_export::config::{CredentialConfig, ExportConfig, StorageConfig, ENV_DATASPACE};
use datacloud_export::{ExportError, ExportRunner};

/// Streams the complete result of one Data Cloud SQL query to a CSV file,
/// optionally publishing the file to object storage.
#[derive(Debug, Parser)]
#[command(name = "datacloud-export", version, about)]
struct Cli {
    /// Query text to export.
    #[arg(long, conflicts_with = "query_file")]
    query: Option<String>,

    /// File containing the query text.
    #[arg(long)]
    query_file: Option<PathBuf>,

    /// Output CSV path.
    #[arg(long, short = 'o', default_value = "export.csv")]
    output: PathBuf,

    /// Logical namespace the query runs against (falls back to DC_DATASPACE).
    #[arg(long)]
    dataspace: Option<String>,

    /// Cap on exported rows.
    #[arg(long)]
    limit: Option<u64>,

    /// Bucket to publish the finished file to (requires GCS_ACCESS_TOKEN).
    #[arg(long, requires = "destination")]
    bucket: Option<String>,

    /// Object path within the bucket.
    #[arg(long, requires = "bucket")]
    destination: Option<String>,

    /// Request a public-read ACL on the uploaded object.
    #[arg(long)]
    make_public: bool,

    /// Skip the upload even when a bucket is configured.
    #[arg(long)]
    skip_upload: bool,
}

#[tokio::main]
async fn main() {
    // Load .env before the filter is read so RUST_LOG can live there too.
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ExportError> {
    let cli = Cli::parse();
    let config = build_config(cli)?;
    let runner = ExportRunner::new(config)?;
    let outcome = runner.run().await?;

    let published = match &outcome.storage_url {
        Some(url) => format!(", published to {}", url),
        None => String::new(),
    };
    println!(
        "Exported {} rows ({} bytes) to {} in {:.1}s{}",
        outcome.rows_written,
        outcome.bytes_written,
        outcome.output_path.display(),
        outcome.elapsed.as_secs_f64(),
        published
    );
    Ok(())
}

/// Assembles the run configuration from flags and environment.
fn build_config(cli: Cli) -> Result<ExportConfig, ExportError> {
    let sql = match (cli.query, cli.query_file) {
        (Some(query), None) => query,
        (None, Some(path)) => std::fs::read_to_string(&path).map_err(|e| {
            ExportError::Config(format!(
                "cannot read query file {}: {}",
                path.display(),
                e
            ))
        })?,
        (None, None) => {
            return Err(ExportError::Config(
                "one of --query or --query-file is required".into(),
            ))
        }
        (Some(_), Some(_)) => {
            return Err(ExportError::Config(
                "pass only one of --query and --query-file".into(),
            ))
        }
    };

    let storage = match (&cli.bucket, &cli.destination, cli.skip_upload) {
        (Some(bucket), Some(destination), false) => Some(StorageConfig::from_env(
            bucket.clone(),
            destination.clone(),
            cli.make_public,
        )?),
        _ => None,
    };

    let dataspace = cli.dataspace.or_else(|| {
        std::env::var(ENV_DATASPACE)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    });

    Ok(ExportConfig {
        credentials: CredentialConfig::from_env()?,
        sql,
        dataspace,
        output_path: cli.output,
        row_cap: cli.limit,
        storage,
    })
}
