// src/main.rs
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use holdings_harvester::config::{FetchConfig, HarvestConfig, IndexKind};
use holdings_harvester::edgar::models::normalize_cik;
use holdings_harvester::edgar::{EdgarClient, RateLimiter};
use holdings_harvester::pipeline::Pipeline;
use holdings_harvester::storage::StorageManager;
use holdings_harvester::utils::{logging, AppError};

/// Harvest 13F holdings and filing headers from the EDGAR archive
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Contact identifier sent as User-Agent, e.g. "Acme Research ops@acme.example"
    /// (falls back to EDGAR_USER_AGENT)
    #[arg(short, long)]
    user_agent: Option<String>,

    /// First year to harvest
    #[arg(long)]
    start_year: i32,

    /// Last year to harvest (defaults to start year)
    #[arg(long)]
    end_year: Option<i32>,

    /// Only filings by this CIK (repeatable)
    #[arg(long)]
    cik: Vec<String>,

    /// Only filings of this form type (repeatable)
    #[arg(long, default_value = "13F-HR")]
    form_type: Vec<String>,

    /// Accept every form type, ignoring --form-type
    #[arg(long)]
    all_forms: bool,

    /// Let form-type filters also match amendments ("/A")
    #[arg(long)]
    include_amendments: bool,

    /// Read form.idx instead of master.idx
    #[arg(long)]
    form_index: bool,

    /// Output directory for the JSON record sets
    #[arg(short, long, default_value = "./output")]
    output_dir: String,

    /// Minimum milliseconds between requests
    #[arg(long)]
    min_interval_ms: Option<u64>,

    /// Attempts per request, including the first
    #[arg(long)]
    max_retries: Option<u32>,

    /// Abort after this many consecutive failed fetches (0 disables)
    #[arg(long)]
    max_consecutive_failures: Option<usize>,

    /// Debug-level logging for this crate
    #[arg(short, long)]
    verbose: bool,
}

fn build_config(args: &Args) -> Result<HarvestConfig, AppError> {
    let mut fetch = FetchConfig::new(args.user_agent.clone().unwrap_or_default()).with_env_overrides()?;
    if let Some(ms) = args.min_interval_ms {
        fetch.min_request_interval = Duration::from_millis(ms);
    }
    if let Some(attempts) = args.max_retries {
        fetch.max_retry_attempts = attempts;
    }

    let mut config = HarvestConfig::new(fetch, args.start_year, args.end_year.unwrap_or(args.start_year));
    config.index_kind = if args.form_index { IndexKind::Form } else { IndexKind::Master };
    if !args.cik.is_empty() {
        config.cik_filter = Some(args.cik.iter().map(|cik| normalize_cik(cik)).collect());
    }
    if !args.all_forms && !args.form_type.is_empty() {
        config.form_type_filter = Some(args.form_type.iter().cloned().collect());
    }
    config.include_amendments = args.include_amendments;
    if let Some(threshold) = args.max_consecutive_failures {
        config.max_consecutive_failures = threshold;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // 1. Parse CLI arguments and set up logging (reads RUST_LOG)
    let args = Args::parse();
    logging::setup_logging(args.verbose);
    tracing::info!("Starting harvest for args: {:?}", args);

    // 2. Configuration is checked before anything touches the network
    let config = build_config(&args)?;
    let storage = StorageManager::new(&args.output_dir)?;

    // 3. One limiter for every request this process makes
    let limiter = Arc::new(RateLimiter::new(config.fetch.min_request_interval));
    let client = EdgarClient::with_reqwest(&config.fetch, limiter)?;
    let pipeline = Pipeline::new(client, config)?;

    // 4. Ctrl-C stops the run between filings
    let cancel = pipeline.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; stopping after the current filing");
            cancel.cancel();
        }
    });

    // 5. Run and save whatever was gathered, even on abort
    let report = pipeline.run_configured().await?;
    let saved = storage.save_run(&report)?;
    tracing::info!(
        "Saved {} companies, {} accessions, {} holdings; report at {}",
        report.records.companies.len(),
        report.records.accessions.len(),
        report.records.holdings.len(),
        saved.report.display()
    );

    if let Some(abort) = report.abort() {
        return Err(AppError::Aborted(abort.clone()));
    }
    Ok(())
}
