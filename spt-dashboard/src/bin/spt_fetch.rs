//! spt-fetch - pull raw CRM records without touching the dashboard snapshot
//!
//! Bulk mode (default) leaves the downloaded archive and CSV in the work
//! directory. Direct mode reads pages through the record API and writes the
//! records as JSON to the same directory.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use spt_common::config::ConfigResolver;
use spt_common::logging::init_logging;
use spt_common::time;
use tracing::{error, info};

use spt_dashboard::crm::{fetch_all_records, CrmModule, RawRecord, RecordSource, ZohoClient};
use spt_dashboard::services::{resolve_fields, BulkExporter};

/// Command-line arguments for spt-fetch
#[derive(Parser, Debug)]
#[command(name = "spt-fetch")]
#[command(about = "Fetch raw CRM records for inspection")]
#[command(version)]
struct Args {
    /// Config file (TOML)
    #[arg(short, long, env = "SPT_CONFIG")]
    config: Option<PathBuf>,

    /// Modules to fetch (repeatable); defaults to Deals and Accounts
    #[arg(short, long = "module")]
    modules: Vec<CrmModule>,

    /// Use paginated record reads instead of a bulk export
    #[arg(long)]
    direct: bool,

    /// Output directory (defaults to the configured work directory)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let config = ConfigResolver::new("spt-fetch")
        .with_cli_path(args.config)
        .load()
        .context("Failed to load configuration")?;
    init_logging(&config.logging).context("Failed to initialize logging")?;
    config.validate(true).context("Invalid configuration")?;

    let output_dir = args.output.unwrap_or_else(|| config.data.work_dir.clone());
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let source: Arc<dyn RecordSource> =
        Arc::new(ZohoClient::new(&config.crm).context("Failed to build CRM client")?);
    let exporter = BulkExporter::new(
        Arc::clone(&source),
        Duration::from_secs(config.bulk.poll_interval_secs),
        Duration::from_secs(config.bulk.timeout_secs),
        Some(output_dir.clone()),
    );

    let modules = if args.modules.is_empty() {
        CrmModule::ALL.to_vec()
    } else {
        args.modules
    };

    let mut failures = 0;
    for module in modules {
        let fields = resolve_fields(source.as_ref(), module).await.fields;

        let outcome = if args.direct {
            fetch_direct(source.as_ref(), module, &fields, &output_dir).await
        } else {
            exporter
                .export(module.api_name(), &fields, None)
                .await
                .map(|result| result.record_count)
                .map_err(anyhow::Error::from)
        };

        match outcome {
            Ok(count) => {
                info!(module = %module, record_count = count, "Fetch completed");
                println!("{}: {} records", module, count);
            }
            Err(e) => {
                error!(module = %module, error = %e, "Fetch failed");
                println!("{}: FAILED ({})", module, e);
                failures += 1;
            }
        }
    }

    println!("Output directory: {}", output_dir.display());

    Ok(if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn fetch_direct(
    source: &dyn RecordSource,
    module: CrmModule,
    fields: &[String],
    output_dir: &Path,
) -> Result<usize> {
    let records: Vec<RawRecord> = fetch_all_records(source, module.api_name(), fields).await?;

    let path = output_dir.join(format!(
        "direct_read_{}_{}.json",
        module,
        time::file_stamp(time::now())
    ));
    let json = serde_json::to_vec_pretty(&records)?;
    tokio::fs::write(&path, json)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    info!(path = %path.display(), "Direct read saved");
    Ok(records.len())
}
