// src/edgar/models.rs
use std::fmt;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const EDGAR_ARCHIVES_URL: &str = "https://www.sec.gov/Archives";

static ACCESSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{10}-\d{2}-\d{6}$").expect("Failed to compile ACCESSION_RE"));

static PATH_ACCESSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{10}-\d{2}-\d{6})\.txt$").expect("Failed to compile PATH_ACCESSION_RE")
});

pub fn is_valid_accession_number(value: &str) -> bool {
    ACCESSION_RE.is_match(value)
}

/// Left-pads a numeric CIK to the archive's 10-digit form. Non-numeric input is returned trimmed.
pub fn normalize_cik(cik: &str) -> String {
    let trimmed = cik.trim();
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
        format!("{:0>10}", trimmed)
    } else {
        trimmed.to_string()
    }
}

/// One calendar quarter of the full-index archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QuarterPeriod {
    pub year: i32,
    pub quarter: u8,
}

impl QuarterPeriod {
    pub fn index_url(&self, file_name: &str) -> String {
        format!(
            "{}/edgar/full-index/{}/QTR{}/{}",
            EDGAR_ARCHIVES_URL, self.year, self.quarter, file_name
        )
    }
}

impl fmt::Display for QuarterPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Q{}", self.year, self.quarter)
    }
}

/// A single submission listed in a quarterly index document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub cik: String,
    pub company_name: String,
    pub form_type: String,
    pub filing_date: NaiveDate,
    /// Path relative to the Archives root, e.g. `edgar/data/320193/0000320193-21-000010.txt`.
    pub document_path: String,
}

impl IndexEntry {
    /// The accession number embedded in the document path, when the path uses the standard layout.
    pub fn accession_number(&self) -> Option<String> {
        PATH_ACCESSION_RE
            .captures(&self.document_path)
            .map(|caps| caps[1].to_string())
    }

    /// Constructs the URL of the full submission text.
    pub fn document_url(&self) -> String {
        format!(
            "{}/{}",
            EDGAR_ARCHIVES_URL,
            self.document_path.trim_start_matches('/')
        )
    }
}

/// Which role an entity plays in a submission header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilerType {
    Filer,
    SubjectCompany,
    ReportingOwner,
    Issuer,
    FiledBy,
}

impl FilerType {
    /// Maps a header section label (`FILER:`, `SUBJECT COMPANY:` ...) to a role.
    pub fn from_section_label(label: &str) -> Option<Self> {
        match label.trim().trim_end_matches(':').trim().to_ascii_uppercase().as_str() {
            "FILER" => Some(FilerType::Filer),
            "SUBJECT COMPANY" => Some(FilerType::SubjectCompany),
            "REPORTING-OWNER" | "REPORTING OWNER" => Some(FilerType::ReportingOwner),
            "ISSUER" => Some(FilerType::Issuer),
            "FILED BY" => Some(FilerType::FiledBy),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub street1: Option<String>,
    pub street2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub phone: Option<String>,
}

impl Address {
    pub fn is_empty(&self) -> bool {
        *self == Address::default()
    }
}

/// One entity described in a filing header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyInfo {
    pub cik: String,
    pub company_name: String,
    pub filer_type: FilerType,
    pub sic_code: Option<String>,
    pub irs_number: Option<String>,
    pub state_of_incorporation: Option<String>,
    pub fiscal_year_end: Option<String>,
    pub former_name: Option<String>,
    pub date_of_name_change: Option<NaiveDate>,
    pub business_address: Option<Address>,
    pub mail_address: Option<Address>,
}

/// Summary fields from the 13F cover page (XML primary document).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverPageSummary {
    pub report_type: Option<String>,
    pub form13f_file_number: Option<String>,
    pub other_included_managers_count: Option<u64>,
    pub table_entry_total: Option<u64>,
    pub table_value_total: Option<u64>,
    pub is_confidential_omitted: Option<bool>,
    pub signature_name: Option<String>,
    pub signature_title: Option<String>,
    pub signature_phone: Option<String>,
}

impl CoverPageSummary {
    pub fn is_empty(&self) -> bool {
        *self == CoverPageSummary::default()
    }
}

/// Submission-level metadata from the header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessionInfo {
    pub accession_number: String,
    pub conformed_submission_type: Option<String>,
    pub filed_as_of_date: Option<NaiveDate>,
    pub period_of_report: Option<NaiveDate>,
    pub public_document_count: Option<u32>,
    pub effectiveness_date: Option<NaiveDate>,
    pub date_as_of_change: Option<NaiveDate>,
    pub cover_page: Option<CoverPageSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShareType {
    #[serde(rename = "SH")]
    Shares,
    #[serde(rename = "PRN")]
    Principal,
}

impl ShareType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "SH" => Some(ShareType::Shares),
            "PRN" => Some(ShareType::Principal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PutCall {
    #[serde(rename = "PUT")]
    Put,
    #[serde(rename = "CALL")]
    Call,
}

impl PutCall {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PUT" => Some(PutCall::Put),
            "CALL" => Some(PutCall::Call),
            _ => None,
        }
    }
}

/// Investment discretion as the archive spells it. XML tables use `SOLE`/`DFND`/`OTR`;
/// older text tables also use `SHARED` and `NONE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvestmentDiscretion {
    #[serde(rename = "SOLE")]
    Sole,
    #[serde(rename = "SHARED")]
    Shared,
    #[serde(rename = "DFND")]
    Defined,
    #[serde(rename = "OTR")]
    Other,
    #[serde(rename = "NONE")]
    None,
}

impl InvestmentDiscretion {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "SOLE" => Some(InvestmentDiscretion::Sole),
            "SHARED" | "SHR" => Some(InvestmentDiscretion::Shared),
            "DFND" | "DEFINED" => Some(InvestmentDiscretion::Defined),
            "OTR" | "OTHER" => Some(InvestmentDiscretion::Other),
            "NONE" => Some(InvestmentDiscretion::None),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingAuthority {
    pub sole: u64,
    pub shared: u64,
    pub none: u64,
}

/// One row of a 13F information table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    pub accession_number: String,
    pub period_of_report: Option<NaiveDate>,
    pub issuer_name: String,
    pub class_title: String,
    pub cusip: String,
    /// Market value as reported (thousands of dollars for the classic table).
    pub value: u64,
    pub shares_or_principal_amount: u64,
    pub shares_or_principal_type: Option<ShareType>,
    pub put_call: Option<PutCall>,
    pub investment_discretion: Option<InvestmentDiscretion>,
    pub other_manager: Option<String>,
    pub voting_authority: Option<VotingAuthority>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str) -> IndexEntry {
        IndexEntry {
            cik: "0000320193".to_string(),
            company_name: "Apple Inc.".to_string(),
            form_type: "13F-HR".to_string(),
            filing_date: NaiveDate::from_ymd_opt(2021, 2, 1).unwrap(),
            document_path: path.to_string(),
        }
    }

    #[test]
    fn test_accession_number_from_path() {
        let e = entry("edgar/data/320193/0000320193-21-000010.txt");
        assert_eq!(e.accession_number().as_deref(), Some("0000320193-21-000010"));
        assert_eq!(
            e.document_url(),
            "https://www.sec.gov/Archives/edgar/data/320193/0000320193-21-000010.txt"
        );
        assert_eq!(entry("edgar/data/320193/readme.txt").accession_number(), None);
    }

    #[test]
    fn test_accession_pattern() {
        assert!(is_valid_accession_number("0000320193-21-000010"));
        assert!(!is_valid_accession_number("000-12345-6789"));
        assert!(!is_valid_accession_number("0000320193-21-000010 "));
    }

    #[test]
    fn test_normalize_cik() {
        assert_eq!(normalize_cik("320193"), "0000320193");
        assert_eq!(normalize_cik(" 0000320193 "), "0000320193");
        assert_eq!(normalize_cik("ABC"), "ABC");
    }

    #[test]
    fn test_quarter_index_url() {
        let period = QuarterPeriod { year: 2021, quarter: 1 };
        assert_eq!(
            period.index_url("master.idx"),
            "https://www.sec.gov/Archives/edgar/full-index/2021/QTR1/master.idx"
        );
        assert_eq!(period.to_string(), "2021Q1");
    }

    #[test]
    fn test_enum_spellings_serialize_as_archive_values() {
        assert_eq!(serde_json::to_string(&ShareType::Principal).unwrap(), "\"PRN\"");
        assert_eq!(serde_json::to_string(&InvestmentDiscretion::Defined).unwrap(), "\"DFND\"");
        assert_eq!(InvestmentDiscretion::parse("sole"), Some(InvestmentDiscretion::Sole));
        assert_eq!(PutCall::parse("Call"), Some(PutCall::Call));
        assert_eq!(ShareType::parse("XX"), None);
    }

    #[test]
    fn test_filer_type_labels() {
        assert_eq!(FilerType::from_section_label("FILER:"), Some(FilerType::Filer));
        assert_eq!(FilerType::from_section_label("REPORTING-OWNER:"), Some(FilerType::ReportingOwner));
        assert_eq!(FilerType::from_section_label("SUBJECT COMPANY:"), Some(FilerType::SubjectCompany));
        assert_eq!(FilerType::from_section_label("COMPANY DATA:"), None);
    }
}
