// src/parsers/header.rs
//! SGML submission header parsing.
//!
//! A header block runs from `<SEC-HEADER>` (or the older `<IMS-HEADER>`) to
//! its closing tag. Inside it, every line is `LABEL: value`, with nesting
//! expressed by tabs. Entity sections (`FILER:`, `SUBJECT COMPANY:`,
//! `REPORTING-OWNER:` ...) each describe one company.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::edgar::models::{
    is_valid_accession_number, normalize_cik, AccessionInfo, Address, CompanyInfo, CoverPageSummary,
    FilerType,
};
use crate::utils::error::HeaderError;

// A truncated body may lose the closing tag; the block then ends at the first <DOCUMENT>.
static HEADER_BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(?:SEC|IMS)-HEADER>(.*?)(?:</(?:SEC|IMS)-HEADER>|<DOCUMENT>|\z)")
        .expect("Failed to compile HEADER_BLOCK_RE")
});

static LABEL_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Z][A-Z0-9 .&/()\-]*?)\s*:(.*)$").expect("Failed to compile LABEL_LINE_RE")
});

static SIC_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(\d+)\]").expect("Failed to compile SIC_CODE_RE"));

static SIGNATURE_BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(?:[\w.-]+:)?signatureBlock\b[^>]*>(.*?)</(?:[\w.-]+:)?signatureBlock>")
        .expect("Failed to compile SIGNATURE_BLOCK_RE")
});

// A text-only element, optionally namespace-prefixed. The regex crate has no
// backreferences, so callers compare the opening and closing names.
static LEAF_ELEMENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<(?:[\w.-]+:)?([A-Za-z][\w.-]*)\b[^>]*>\s*([^<]*?)\s*</(?:[\w.-]+:)?([A-Za-z][\w.-]*)\s*>")
        .expect("Failed to compile LEAF_ELEMENT_RE")
});

/// Labels that open a nested group and never carry a value of their own.
const GROUP_LABELS: [&str; 7] = [
    "COMPANY DATA",
    "OWNER DATA",
    "FILING VALUES",
    "BUSINESS ADDRESS",
    "MAIL ADDRESS",
    "FORMER COMPANY",
    "FORMER NAME",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AddressKind {
    Business,
    Mail,
}

/// One `LABEL: value` pair, with the value taken from the next line when the label's own line is blank.
#[derive(Debug, Clone, PartialEq, Eq)]
struct HeaderField {
    label: String,
    value: String,
}

/// Returns the inner text of every header block in document order.
pub fn header_blocks(body: &str) -> Vec<&str> {
    HEADER_BLOCK_RE
        .captures_iter(body)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect()
}

/// Parses every entity section of every header block into a `CompanyInfo`.
/// Identical records from repeated blocks are reported once. A filing must
/// name at least one company, so a header without any usable entity is an error.
pub fn parse_company_info(body: &str) -> Result<Vec<CompanyInfo>, HeaderError> {
    let blocks = header_blocks(body);
    if blocks.is_empty() {
        return Err(HeaderError::HeaderNotFound);
    }

    let mut companies: Vec<CompanyInfo> = Vec::new();
    for block in blocks {
        for company in companies_in_block(block) {
            if !companies.contains(&company) {
                companies.push(company);
            }
        }
    }

    if companies.is_empty() {
        return Err(HeaderError::NoCompanyInfo);
    }
    Ok(companies)
}

/// Parses submission metadata from the first header block, plus the 13F cover page when present.
pub fn parse_accession_info(body: &str) -> Result<AccessionInfo, HeaderError> {
    let block = header_blocks(body)
        .into_iter()
        .next()
        .ok_or(HeaderError::HeaderNotFound)?;

    let mut accession_number = None;
    let mut info = AccessionInfo {
        accession_number: String::new(),
        conformed_submission_type: None,
        filed_as_of_date: None,
        period_of_report: None,
        public_document_count: None,
        effectiveness_date: None,
        date_as_of_change: None,
        cover_page: None,
    };

    // Submission-level labels precede the first entity section.
    for field in header_fields(block) {
        if FilerType::from_section_label(&field.label).is_some() {
            break;
        }
        let value = non_empty(&field.value);
        match field.label.as_str() {
            "ACCESSION NUMBER" => accession_number = value,
            "CONFORMED SUBMISSION TYPE" => info.conformed_submission_type = value,
            "FILED AS OF DATE" => info.filed_as_of_date = value.as_deref().and_then(parse_header_date),
            "CONFORMED PERIOD OF REPORT" => {
                info.period_of_report = value.as_deref().and_then(parse_header_date)
            }
            "PUBLIC DOCUMENT COUNT" => info.public_document_count = value.and_then(|v| v.parse().ok()),
            "EFFECTIVENESS DATE" => info.effectiveness_date = value.as_deref().and_then(parse_header_date),
            "DATE AS OF CHANGE" => info.date_as_of_change = value.as_deref().and_then(parse_header_date),
            _ => {}
        }
    }

    let accession_number = accession_number.ok_or(HeaderError::MissingAccessionNumber)?;
    if !is_valid_accession_number(&accession_number) {
        return Err(HeaderError::InvalidAccessionNumber(accession_number));
    }
    info.accession_number = accession_number;

    let cover = parse_cover_page(body);
    info.cover_page = (!cover.is_empty()).then_some(cover);
    Ok(info)
}

/// Extracts the 13F summary/cover fields from the XML primary document.
pub fn parse_cover_page(body: &str) -> CoverPageSummary {
    let mut cover = CoverPageSummary {
        report_type: xml_text(body, "reportType"),
        form13f_file_number: xml_text(body, "form13FFileNumber"),
        other_included_managers_count: xml_number(body, "otherIncludedManagersCount"),
        table_entry_total: xml_number(body, "tableEntryTotal"),
        table_value_total: xml_number(body, "tableValueTotal"),
        is_confidential_omitted: xml_text(body, "isConfidentialOmitted").and_then(|v| {
            match v.to_ascii_lowercase().as_str() {
                "true" | "y" => Some(true),
                "false" | "n" => Some(false),
                _ => None,
            }
        }),
        ..CoverPageSummary::default()
    };

    if let Some(signature) = SIGNATURE_BLOCK_RE.captures(body).and_then(|c| c.get(1)) {
        let signature = signature.as_str();
        cover.signature_name = xml_text(signature, "name");
        cover.signature_title = xml_text(signature, "title");
        cover.signature_phone = xml_text(signature, "phone");
    }
    cover
}

fn xml_text(body: &str, tag: &str) -> Option<String> {
    LEAF_ELEMENT_RE
        .captures_iter(body)
        .find(|caps| caps[1].eq_ignore_ascii_case(tag) && caps[3].eq_ignore_ascii_case(tag))
        .and_then(|caps| caps.get(2))
        .and_then(|m| non_empty(m.as_str()))
}

fn xml_number(body: &str, tag: &str) -> Option<u64> {
    xml_text(body, tag).and_then(|v| v.replace(',', "").parse().ok())
}

/// Splits a block into labelled fields, skipping SGML tag lines.
fn header_fields(block: &str) -> Vec<HeaderField> {
    let lines: Vec<&str> = block.lines().collect();
    let mut fields = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        i += 1;
        if line.trim_start().starts_with('<') {
            continue;
        }
        let Some(caps) = LABEL_LINE_RE.captures(line) else {
            continue;
        };
        let label = caps[1].trim().to_string();
        let mut value = caps[2].trim().to_string();

        let opens_section = GROUP_LABELS.contains(&label.as_str())
            || FilerType::from_section_label(&label).is_some();
        if value.is_empty() && !opens_section {
            if let Some(next) = lines.get(i) {
                let next_trimmed = next.trim();
                if !next_trimmed.is_empty()
                    && !next_trimmed.starts_with('<')
                    && !LABEL_LINE_RE.is_match(next)
                {
                    value = next_trimmed.to_string();
                    i += 1;
                }
            }
        }
        fields.push(HeaderField { label, value });
    }
    fields
}

/// Accumulates one entity section while walking the fields.
struct EntityBuilder {
    filer_type: FilerType,
    cik: Option<String>,
    name: Option<String>,
    sic_code: Option<String>,
    irs_number: Option<String>,
    state_of_incorporation: Option<String>,
    fiscal_year_end: Option<String>,
    former_name: Option<String>,
    date_of_name_change: Option<NaiveDate>,
    business_address: Address,
    mail_address: Address,
}

impl EntityBuilder {
    fn new(filer_type: FilerType) -> Self {
        EntityBuilder {
            filer_type,
            cik: None,
            name: None,
            sic_code: None,
            irs_number: None,
            state_of_incorporation: None,
            fiscal_year_end: None,
            former_name: None,
            date_of_name_change: None,
            business_address: Address::default(),
            mail_address: Address::default(),
        }
    }

    fn apply(&mut self, group: Option<&str>, label: &str, value: Option<String>) {
        let address = match group {
            Some("BUSINESS ADDRESS") => Some(AddressKind::Business),
            Some("MAIL ADDRESS") => Some(AddressKind::Mail),
            _ => None,
        };
        if let Some(kind) = address {
            let target = match kind {
                AddressKind::Business => &mut self.business_address,
                AddressKind::Mail => &mut self.mail_address,
            };
            let slot = match label {
                "STREET 1" => &mut target.street1,
                "STREET 2" => &mut target.street2,
                "CITY" => &mut target.city,
                "STATE" => &mut target.state,
                "ZIP" => &mut target.zip,
                "BUSINESS PHONE" | "PHONE" => &mut target.phone,
                _ => return,
            };
            set_once(slot, value);
            return;
        }

        match label {
            "COMPANY CONFORMED NAME" => set_once(&mut self.name, value),
            "CENTRAL INDEX KEY" => set_once(&mut self.cik, value.map(|v| normalize_cik(&v))),
            "STANDARD INDUSTRIAL CLASSIFICATION" => set_once(&mut self.sic_code, value.map(sic_code)),
            "IRS NUMBER" => set_once(&mut self.irs_number, value),
            "STATE OF INCORPORATION" => set_once(&mut self.state_of_incorporation, value),
            "FISCAL YEAR END" => set_once(&mut self.fiscal_year_end, value),
            // The first former-name group is the most recent change.
            "FORMER CONFORMED NAME" => set_once(&mut self.former_name, value),
            "DATE OF NAME CHANGE" => {
                if self.date_of_name_change.is_none() {
                    self.date_of_name_change = value.as_deref().and_then(parse_header_date);
                }
            }
            _ => {}
        }
    }

    fn build(self) -> Option<CompanyInfo> {
        let (Some(cik), Some(company_name)) = (self.cik, self.name) else {
            tracing::debug!("Dropping {:?} header section without CIK or name", self.filer_type);
            return None;
        };
        Some(CompanyInfo {
            cik,
            company_name,
            filer_type: self.filer_type,
            sic_code: self.sic_code,
            irs_number: self.irs_number,
            state_of_incorporation: self.state_of_incorporation,
            fiscal_year_end: self.fiscal_year_end,
            former_name: self.former_name,
            date_of_name_change: self.date_of_name_change,
            business_address: (!self.business_address.is_empty()).then_some(self.business_address),
            mail_address: (!self.mail_address.is_empty()).then_some(self.mail_address),
        })
    }
}

fn companies_in_block(block: &str) -> Vec<CompanyInfo> {
    let fields = header_fields(block);
    let has_sections = fields
        .iter()
        .any(|f| FilerType::from_section_label(&f.label).is_some() && f.value.is_empty());

    let mut companies = Vec::new();
    // Headers without entity sections describe the filer at top level.
    let mut current = (!has_sections).then(|| EntityBuilder::new(FilerType::Filer));
    let mut group: Option<String> = None;

    for field in fields {
        if field.value.is_empty() {
            if let Some(filer_type) = FilerType::from_section_label(&field.label) {
                if let Some(done) = current.take() {
                    companies.extend(done.build());
                }
                current = Some(EntityBuilder::new(filer_type));
                group = None;
                continue;
            }
            if GROUP_LABELS.contains(&field.label.as_str()) {
                group = Some(field.label);
                continue;
            }
        }
        if let Some(entity) = current.as_mut() {
            entity.apply(group.as_deref(), &field.label, non_empty(&field.value));
        }
    }
    if let Some(done) = current {
        companies.extend(done.build());
    }
    companies
}

fn set_once(slot: &mut Option<String>, value: Option<String>) {
    if slot.is_none() {
        *slot = value;
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// `SERVICES-COMPUTER PROGRAMMING [7371]` -> `7371`; values without a bracketed code are kept whole.
fn sic_code(value: String) -> String {
    SIC_CODE_RE
        .captures(&value)
        .map(|caps| caps[1].to_string())
        .unwrap_or(value)
}

fn parse_header_date(value: &str) -> Option<NaiveDate> {
    let parsed = NaiveDate::parse_from_str(value.trim(), "%Y%m%d").ok();
    if parsed.is_none() {
        tracing::debug!("Unparseable header date {:?}", value);
    }
    parsed
}
