// src/pipeline.rs
//! Drives one harvest run: quarterly indexes, then every matching filing
//! through the header and holdings parsers.
//!
//! Work is strictly sequential and every request goes through the client's
//! shared `RateLimiter`. A failing filing is recorded and skipped. Only a run
//! of consecutive fetch failures ends the run early, and even then the
//! records gathered so far are returned.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use futures::StreamExt;
use serde::Serialize;

use crate::config::HarvestConfig;
use crate::edgar::client::EdgarClient;
use crate::edgar::index::{IndexFilter, IndexResolver};
use crate::edgar::models::{AccessionInfo, CompanyInfo, Holding, IndexEntry, QuarterPeriod};
use crate::parsers::holdings::HoldingsTable;
use crate::parsers::{has_holdings_table, parse_accession_info, parse_company_info, parse_holdings};
use crate::utils::error::{ConfigError, FatalAbort, FetchError, FilingError, RowParseError};

/// Cooperative cancellation signal, checked before every fetch.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A header entity together with the filing it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompanyRecord {
    pub accession_number: String,
    #[serde(flatten)]
    pub company: CompanyInfo,
}

/// The three output record sets, each row carrying its accession number.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecordSets {
    pub companies: Vec<CompanyRecord>,
    pub accessions: Vec<AccessionInfo>,
    pub holdings: Vec<Holding>,
}

/// Everything parsed from one filing body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilingRecords {
    pub accession: AccessionInfo,
    pub companies: Vec<CompanyInfo>,
    /// `None` for forms outside the 13F family.
    pub holdings: Option<HoldingsTable>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilingFailure {
    pub cik: String,
    pub form_type: String,
    pub filing_date: NaiveDate,
    pub document_url: String,
    pub accession_number: Option<String>,
    #[serde(flatten)]
    pub error: FilingError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexFailure {
    pub period: QuarterPeriod,
    pub error: FetchError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedHolding {
    pub accession_number: String,
    pub row_index: usize,
    pub error: RowParseError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Cancelled,
    Aborted(FatalAbort),
}

/// Records plus the structured error and skip report of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub records: RecordSets,
    pub filings_processed: usize,
    pub filing_failures: Vec<FilingFailure>,
    pub index_failures: Vec<IndexFailure>,
    pub skipped_index_rows: usize,
    pub skipped_holdings: Vec<SkippedHolding>,
    pub outcome: RunOutcome,
}

impl RunReport {
    fn new() -> Self {
        RunReport {
            records: RecordSets::default(),
            filings_processed: 0,
            filing_failures: Vec::new(),
            index_failures: Vec::new(),
            skipped_index_rows: 0,
            skipped_holdings: Vec::new(),
            outcome: RunOutcome::Completed,
        }
    }

    pub fn abort(&self) -> Option<&FatalAbort> {
        match &self.outcome {
            RunOutcome::Aborted(abort) => Some(abort),
            _ => None,
        }
    }

    fn absorb(&mut self, filing: FilingRecords) {
        let accession_number = filing.accession.accession_number.clone();
        self.records
            .companies
            .extend(filing.companies.into_iter().map(|company| CompanyRecord {
                accession_number: accession_number.clone(),
                company,
            }));
        if let Some(table) = filing.holdings {
            self.skipped_holdings
                .extend(table.skipped.into_iter().map(|skip| SkippedHolding {
                    accession_number: accession_number.clone(),
                    row_index: skip.index,
                    error: skip.error,
                }));
            self.records.holdings.extend(table.holdings);
        }
        self.records.accessions.push(filing.accession);
    }
}

/// Counts fetch failures in a row; any fetch that reaches the archive resets it.
#[derive(Debug)]
struct FailureTracker {
    threshold: usize,
    consecutive: usize,
}

impl FailureTracker {
    fn new(threshold: usize) -> Self {
        FailureTracker { threshold, consecutive: 0 }
    }

    fn record_success(&mut self) {
        self.consecutive = 0;
    }

    /// Returns the abort once the failures in a row exceed the threshold. A threshold of 0 never aborts.
    fn record_failure(&mut self, error: &FetchError) -> Option<FatalAbort> {
        if !error.counts_toward_abort() {
            self.record_success();
            return None;
        }
        self.consecutive += 1;
        (self.threshold > 0 && self.consecutive > self.threshold).then(|| FatalAbort {
            consecutive_failures: self.consecutive,
            last_error: error.clone(),
        })
    }
}

/// Parses one fetched filing body. Holdings are only read for 13F-family forms.
pub fn parse_filing(body: &str, form_type: &str) -> Result<FilingRecords, FilingError> {
    let accession = parse_accession_info(body)?;
    let companies = parse_company_info(body)?;
    let holdings = if has_holdings_table(form_type) {
        Some(parse_holdings(
            body,
            &accession.accession_number,
            accession.period_of_report,
        )?)
    } else {
        None
    };
    Ok(FilingRecords { accession, companies, holdings })
}

pub struct Pipeline {
    client: EdgarClient,
    config: HarvestConfig,
    cancel: CancelFlag,
}

impl Pipeline {
    pub fn new(client: EdgarClient, config: HarvestConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Pipeline { client, config, cancel: CancelFlag::new() })
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn filter(&self) -> IndexFilter {
        let mut filter = IndexFilter::new().with_amendments(self.config.include_amendments);
        if let Some(ciks) = &self.config.cik_filter {
            filter = filter.with_ciks(ciks);
        }
        if let Some(forms) = &self.config.form_type_filter {
            filter = filter.with_form_types(forms);
        }
        filter
    }

    /// Runs over the configured year range.
    pub async fn run_configured(&self) -> Result<RunReport, ConfigError> {
        self.run(self.config.start_year, self.config.end_year).await
    }

    /// Harvests every quarter of `start_year..=end_year`. Only an invalid
    /// range is an `Err`; a fatal abort or cancellation is reported in
    /// `RunReport::outcome` alongside everything completed before it.
    pub async fn run(&self, start_year: i32, end_year: i32) -> Result<RunReport, ConfigError> {
        let resolver = IndexResolver::new(self.client.clone(), self.config.index_kind);
        let quarters = resolver.resolve_index(start_year, end_year)?;
        let mut quarters = std::pin::pin!(quarters);
        let filter = self.filter();

        tracing::info!("Starting harvest for {}..={} with filter {:?}", start_year, end_year, filter);
        let mut report = RunReport::new();
        let mut failures = FailureTracker::new(self.config.max_consecutive_failures);
        let mut seen_accessions = HashSet::new();

        'quarters: loop {
            if self.cancel.is_cancelled() {
                report.outcome = RunOutcome::Cancelled;
                break;
            }
            let Some(quarter) = quarters.next().await else {
                break;
            };

            report.skipped_index_rows += quarter.skipped_rows;
            if let Some(error) = quarter.error {
                let abort = failures.record_failure(&error);
                report.index_failures.push(IndexFailure { period: quarter.period, error });
                if let Some(abort) = abort {
                    report.outcome = RunOutcome::Aborted(abort);
                    break;
                }
                continue;
            }
            failures.record_success();

            for entry in filter.apply(&quarter.entries) {
                if self.cancel.is_cancelled() {
                    tracing::info!("Cancellation requested; stopping before {}", entry.document_path);
                    report.outcome = RunOutcome::Cancelled;
                    break 'quarters;
                }
                // Joint filings are listed once per filer CIK.
                if let Some(accession) = entry.accession_number() {
                    if !seen_accessions.insert(accession) {
                        tracing::debug!("Already processed {}", entry.document_path);
                        continue;
                    }
                }

                match self.process_entry(entry).await {
                    Ok(filing) => {
                        failures.record_success();
                        report.filings_processed += 1;
                        report.absorb(filing);
                    }
                    Err(error) => {
                        tracing::warn!("Skipping {}: {}", entry.document_path, error);
                        let abort = match &error {
                            FilingError::Fetch(fetch) => failures.record_failure(fetch),
                            _ => {
                                failures.record_success();
                                None
                            }
                        };
                        report.filing_failures.push(FilingFailure {
                            cik: entry.cik.clone(),
                            form_type: entry.form_type.clone(),
                            filing_date: entry.filing_date,
                            document_url: entry.document_url(),
                            accession_number: entry.accession_number(),
                            error,
                        });
                        if let Some(abort) = abort {
                            report.outcome = RunOutcome::Aborted(abort);
                            break 'quarters;
                        }
                    }
                }
            }
        }

        match &report.outcome {
            RunOutcome::Aborted(abort) => tracing::error!("Harvest aborted: {}", abort),
            RunOutcome::Cancelled => tracing::warn!("Harvest cancelled"),
            RunOutcome::Completed => {}
        }
        tracing::info!(
            "Harvest finished: {} filings, {} holdings, {} filing failures, {} index failures",
            report.filings_processed,
            report.records.holdings.len(),
            report.filing_failures.len(),
            report.index_failures.len()
        );
        Ok(report)
    }

    async fn process_entry(&self, entry: &IndexEntry) -> Result<FilingRecords, FilingError> {
        let url = entry.document_url();
        tracing::info!(
            "Processing {} for {} (CIK {}) filed {}",
            entry.form_type,
            entry.company_name,
            entry.cik,
            entry.filing_date
        );
        let body = self.client.fetch(&url, &[]).await?;
        parse_filing(&body, &entry.form_type)
    }
}
