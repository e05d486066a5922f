// src/storage/mod.rs
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::pipeline::RunReport;
use crate::utils::error::StorageError;

pub const COMPANIES_FILE: &str = "companies.json";
pub const ACCESSIONS_FILE: &str = "accessions.json";
pub const HOLDINGS_FILE: &str = "holdings.json";
pub const REPORT_FILE: &str = "report.json";

/// Paths written by `StorageManager::save_run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedRun {
    pub companies: PathBuf,
    pub accessions: PathBuf,
    pub holdings: PathBuf,
    pub report: PathBuf,
}

/// Writes a run's record sets and report as pretty-printed JSON.
pub struct StorageManager {
    base_dir: PathBuf,
}

impl StorageManager {
    /// Creates a new StorageManager with the specified base directory
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Result<Self, StorageError> {
        let base_path = base_dir.as_ref().to_path_buf();

        if !base_path.exists() {
            fs::create_dir_all(&base_path).map_err(StorageError::IoError)?;
        }

        Ok(Self { base_dir: base_path })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Saves the three record sets plus the error/skip report.
    /// `report.json` holds everything except the records themselves.
    pub fn save_run(&self, report: &RunReport) -> Result<SavedRun, StorageError> {
        let companies = self.write_json(COMPANIES_FILE, &report.records.companies)?;
        let accessions = self.write_json(ACCESSIONS_FILE, &report.records.accessions)?;
        let holdings = self.write_json(HOLDINGS_FILE, &report.records.holdings)?;

        let summary = serde_json::json!({
            "outcome": report.outcome,
            "filings_processed": report.filings_processed,
            "companies": report.records.companies.len(),
            "accessions": report.records.accessions.len(),
            "holdings": report.records.holdings.len(),
            "filing_failures": report.filing_failures,
            "index_failures": report.index_failures,
            "skipped_index_rows": report.skipped_index_rows,
            "skipped_holdings": report.skipped_holdings,
        });
        let report = self.write_json(REPORT_FILE, &summary)?;

        Ok(SavedRun { companies, accessions, holdings, report })
    }

    fn write_json<T: Serialize + ?Sized>(&self, file_name: &str, value: &T) -> Result<PathBuf, StorageError> {
        let file_path = self.base_dir.join(file_name);
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        fs::write(&file_path, json).map_err(StorageError::IoError)?;

        tracing::info!("Saved {}", file_path.display());
        Ok(file_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edgar::models::{AccessionInfo, CompanyInfo, FilerType};
    use crate::pipeline::{CompanyRecord, RecordSets, RunOutcome};

    fn report() -> RunReport {
        let accession_number = "0000320193-21-000010".to_string();
        RunReport {
            records: RecordSets {
                companies: vec![CompanyRecord {
                    accession_number: accession_number.clone(),
                    company: CompanyInfo {
                        cik: "0000320193".into(),
                        company_name: "Apple Inc.".into(),
                        filer_type: FilerType::Filer,
                        sic_code: Some("3571".into()),
                        irs_number: None,
                        state_of_incorporation: Some("CA".into()),
                        fiscal_year_end: None,
                        former_name: None,
                        date_of_name_change: None,
                        business_address: None,
                        mail_address: None,
                    },
                }],
                accessions: vec![AccessionInfo {
                    accession_number,
                    conformed_submission_type: Some("13F-HR".into()),
                    filed_as_of_date: None,
                    period_of_report: None,
                    public_document_count: None,
                    effectiveness_date: None,
                    date_as_of_change: None,
                    cover_page: None,
                }],
                holdings: Vec::new(),
            },
            filings_processed: 1,
            filing_failures: Vec::new(),
            index_failures: Vec::new(),
            skipped_index_rows: 2,
            skipped_holdings: Vec::new(),
            outcome: RunOutcome::Completed,
        }
    }

    #[test]
    fn test_creates_missing_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let storage = StorageManager::new(&nested).unwrap();
        assert!(nested.is_dir());
        assert_eq!(storage.base_dir(), nested.as_path());
    }

    #[test]
    fn test_save_run_writes_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageManager::new(dir.path()).unwrap();
        let saved = storage.save_run(&report()).unwrap();

        let companies: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&saved.companies).unwrap()).unwrap();
        // The company fields are flattened next to the accession number.
        assert_eq!(companies[0]["accession_number"], "0000320193-21-000010");
        assert_eq!(companies[0]["cik"], "0000320193");
        assert_eq!(companies[0]["filer_type"], "filer");

        let holdings = fs::read_to_string(&saved.holdings).unwrap();
        assert_eq!(holdings.trim(), "[]");

        let summary: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&saved.report).unwrap()).unwrap();
        assert_eq!(summary["outcome"]["status"], "completed");
        assert_eq!(summary["skipped_index_rows"], 2);
        assert_eq!(summary["accessions"], 1);
    }
}
