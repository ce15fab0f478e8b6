//! spt-transform - aggregate a bulk-read CSV offline

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde_json::json;
use spt_common::config::LoggingConfig;
use spt_common::logging::init_logging;
use spt_common::time;
use tracing::info;

use spt_dashboard::crm::CrmModule;
use spt_dashboard::services::bulk_export::{extract_first_csv, is_zip, parse_tabular};
use spt_dashboard::services::transformer::{transform_accounts, transform_deals};

/// Command-line arguments for spt-transform
#[derive(Parser, Debug)]
#[command(name = "spt-transform")]
#[command(about = "Transform a bulk-read CSV (or ZIP) into dashboard aggregates")]
#[command(version)]
struct Args {
    /// Bulk-read CSV or ZIP file
    input: PathBuf,

    /// Module of the records; inferred from the file name when omitted
    #[arg(short, long)]
    module: Option<CrmModule>,

    /// Write JSON here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&LoggingConfig::default()).context("Failed to initialize logging")?;

    let module = match args.module {
        Some(module) => module,
        None => infer_module(&args.input).ok_or_else(|| {
            anyhow!(
                "Cannot infer module from {}; pass --module",
                args.input.display()
            )
        })?,
    };

    let payload = std::fs::read(&args.input)
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let csv_bytes = if is_zip(&payload) {
        extract_first_csv(&payload)?
    } else {
        payload
    };
    let records = parse_tabular(&csv_bytes)?;

    let data = match module {
        CrmModule::Deals => serde_json::to_value(transform_deals(&records, None))?,
        CrmModule::Accounts => serde_json::to_value(transform_accounts(&records))?,
    };

    let output = json!({
        "module": module.api_name(),
        "record_count": records.len(),
        "transformed_at": time::to_iso(time::now()),
        "data": data,
    });
    let rendered = serde_json::to_string_pretty(&output)?;

    match args.output {
        Some(path) => {
            std::fs::write(&path, rendered)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), module = %module, record_count = records.len(), "Transform written");
        }
        None => println!("{}", rendered),
    }

    Ok(())
}

/// Module named in a file name such as `bulk_read_Deals_20240301.csv`
fn infer_module(path: &Path) -> Option<CrmModule> {
    let name = path.file_name()?.to_str()?.to_ascii_lowercase();
    match (name.contains("deal"), name.contains("account")) {
        (true, false) => Some(CrmModule::Deals),
        (false, true) => Some(CrmModule::Accounts),
        _ => None,
    }
}
