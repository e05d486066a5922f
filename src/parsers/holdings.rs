// src/parsers/holdings.rs
//! 13F information table extraction.
//!
//! Two encodings exist in the archive: the XML information table (2013
//! onward) and the older plain-text table. Both are reduced to `RawRow`s
//! holding the cell text, and every `RawRow` goes through the same
//! validation into a `Holding`. A row that fails validation is recorded as
//! skipped; it never stops the table.
//!
//! Legacy text rows are anchored on the CUSIP column: the first token after
//! the first column that is 6-12 alphanumeric characters with at least two
//! digits, immediately followed by a number. Lines without such an anchor
//! are treated as stray text. When a column header line naming `TITLE` and
//! `CUSIP` precedes the rows, issuer and class are split at the `TITLE`
//! column offset; otherwise the class is the single token before the CUSIP.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;

use crate::edgar::models::{Holding, InvestmentDiscretion, PutCall, ShareType, VotingAuthority};
use crate::utils::error::{HoldingsError, RowParseError};

const CUSIP_LEN: usize = 9;
/// issuer, class, CUSIP, value, shares
const MIN_LEGACY_COLUMNS: usize = 5;

static INFO_TABLE_OPEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<(?:[\w.-]+:)?informationTable\b").expect("Failed to compile INFO_TABLE_OPEN_RE")
});

static INFO_TABLE_CLOSE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)</(?:[\w.-]+:)?informationTable\s*>").expect("Failed to compile INFO_TABLE_CLOSE_RE")
});

static PREFIXED_TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<(/?)[A-Za-z_][\w.-]*:").expect("Failed to compile PREFIXED_TAG_RE")
});

static NAMESPACE_ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\s(?:xmlns|[A-Za-z_][\w.-]*:[\w.-]+)\s*=\s*(?:"[^"]*"|'[^']*')"#)
        .expect("Failed to compile NAMESPACE_ATTR_RE")
});

static AMPERSAND_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#?[A-Za-z0-9]+;)?").expect("Failed to compile AMPERSAND_RE"));

static TEXT_TABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<TABLE>(.*?)</TABLE>").expect("Failed to compile TEXT_TABLE_RE"));

static HEADER_END_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</(?:SEC|IMS)-HEADER>").expect("Failed to compile HEADER_END_RE"));

/// Which encoding a filing's holdings table uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldingsTableFormat {
    XmlInformationTable,
    LegacyTextTable,
}

impl HoldingsTableFormat {
    /// An `informationTable` element anywhere in the body selects the XML path.
    pub fn detect(body: &str) -> Self {
        if INFO_TABLE_OPEN_RE.is_match(body) {
            HoldingsTableFormat::XmlInformationTable
        } else {
            HoldingsTableFormat::LegacyTextTable
        }
    }

    /// Splits the body into table rows. Rows that cannot even be split into
    /// cells come back as `Err` so they are counted with the rest.
    pub fn extract_rows(&self, body: &str) -> Result<Vec<Result<RawRow, RowParseError>>, HoldingsError> {
        match self {
            HoldingsTableFormat::XmlInformationTable => extract_xml_rows(body),
            HoldingsTableFormat::LegacyTextTable => Ok(extract_legacy_rows(body)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawVoting {
    pub sole: Option<String>,
    pub shared: Option<String>,
    pub none: Option<String>,
}

/// Cell text of one table row, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    pub issuer_name: Option<String>,
    pub class_title: Option<String>,
    pub cusip: Option<String>,
    pub value: Option<String>,
    pub shares_amount: Option<String>,
    pub shares_type: Option<String>,
    pub put_call: Option<String>,
    pub discretion: Option<String>,
    pub other_manager: Option<String>,
    pub voting: Option<RawVoting>,
}

impl RawRow {
    pub fn into_holding(
        self,
        accession_number: &str,
        period_of_report: Option<NaiveDate>,
    ) -> Result<Holding, RowParseError> {
        let issuer_name = required(self.issuer_name, "nameOfIssuer")?;
        let class_title = required(self.class_title, "titleOfClass")?;
        let cusip = required(self.cusip, "cusip")?.to_ascii_uppercase();
        let len = cusip.chars().count();
        if len != CUSIP_LEN {
            return Err(RowParseError::InvalidCusip { value: cusip, len });
        }

        let value = parse_amount("value", required(self.value, "value")?)?;
        let shares_or_principal_amount = parse_amount("sshPrnamt", required(self.shares_amount, "sshPrnamt")?)?;
        let shares_or_principal_type = parse_choice("sshPrnamtType", self.shares_type, ShareType::parse)?;
        let put_call = parse_choice("putCall", self.put_call, PutCall::parse)?;
        let investment_discretion =
            parse_choice("investmentDiscretion", self.discretion, InvestmentDiscretion::parse)?;
        let voting_authority = self.voting.map(parse_voting).transpose()?;

        Ok(Holding {
            accession_number: accession_number.to_string(),
            period_of_report,
            issuer_name,
            class_title,
            cusip,
            value,
            shares_or_principal_amount,
            shares_or_principal_type,
            put_call,
            investment_discretion,
            other_manager: self.other_manager,
            voting_authority,
        })
    }
}

/// A row that was considered but not turned into a `Holding`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRow {
    /// Zero-based position among the table's rows.
    pub index: usize,
    pub error: RowParseError,
}

/// Outcome of parsing one filing's holdings table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HoldingsTable {
    pub format: HoldingsTableFormat,
    pub holdings: Vec<Holding>,
    pub skipped: Vec<SkippedRow>,
    pub total_rows: usize,
}

impl HoldingsTable {
    pub fn parsed_rows(&self) -> usize {
        self.holdings.len()
    }
}

/// Parses the holdings table of a filing body. Only an unreadable XML table
/// fails as a whole; individual bad rows land in `skipped`.
pub fn parse_holdings(
    body: &str,
    accession_number: &str,
    period_of_report: Option<NaiveDate>,
) -> Result<HoldingsTable, HoldingsError> {
    let format = HoldingsTableFormat::detect(body);
    let rows = format.extract_rows(body)?;

    let mut table = HoldingsTable {
        format,
        holdings: Vec::with_capacity(rows.len()),
        skipped: Vec::new(),
        total_rows: rows.len(),
    };
    for (index, row) in rows.into_iter().enumerate() {
        match row.and_then(|raw| raw.into_holding(accession_number, period_of_report)) {
            Ok(holding) => table.holdings.push(holding),
            Err(error) => {
                tracing::debug!("{}: skipping holdings row {}: {}", accession_number, index, error);
                table.skipped.push(SkippedRow { index, error });
            }
        }
    }

    tracing::debug!(
        "{}: {:?} with {} rows, {} parsed, {} skipped",
        accession_number,
        format,
        table.total_rows,
        table.parsed_rows(),
        table.skipped.len()
    );
    Ok(table)
}

fn required(value: Option<String>, field: &'static str) -> Result<String, RowParseError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(RowParseError::MissingField { field })
}

/// Whole, non-negative amount. Thousands separators, `$` and whitespace are
/// ignored; a fractional part is accepted only when it is all zeros.
fn parse_amount(field: &'static str, raw: String) -> Result<u64, RowParseError> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',' && *c != '$')
        .collect();
    if cleaned.starts_with('-') {
        return Err(RowParseError::Negative { field, value: raw });
    }
    let whole = match cleaned.split_once('.') {
        Some((whole, fraction)) if fraction.chars().all(|c| c == '0') => whole,
        Some(_) => return Err(RowParseError::NotNumeric { field, value: raw }),
        None => cleaned.as_str(),
    };
    whole
        .parse::<u64>()
        .map_err(|_| RowParseError::NotNumeric { field, value: raw.clone() })
}

fn parse_choice<T>(
    field: &'static str,
    value: Option<String>,
    parse: fn(&str) -> Option<T>,
) -> Result<Option<T>, RowParseError> {
    match value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => match parse(&v) {
            Some(parsed) => Ok(Some(parsed)),
            None => Err(RowParseError::UnknownValue { field, value: v }),
        },
    }
}

fn parse_voting(raw: RawVoting) -> Result<VotingAuthority, RowParseError> {
    Ok(VotingAuthority {
        sole: parse_amount("Sole", required(raw.sole, "Sole")?)?,
        shared: parse_amount("Shared", required(raw.shared, "Shared")?)?,
        none: parse_amount("None", required(raw.none, "None")?)?,
    })
}

// XML information table

fn information_table_slice(body: &str) -> Option<&str> {
    let start = INFO_TABLE_OPEN_RE.find(body)?.start();
    let end = INFO_TABLE_CLOSE_RE
        .find_at(body, start)
        .map_or(body.len(), |m| m.end());
    Some(&body[start..end])
}

/// Drops namespace prefixes and declarations and escapes stray `&`, for
/// tables that reference undeclared prefixes or carry raw ampersands.
fn sanitize_xml(xml: &str) -> String {
    let without_prefixes = PREFIXED_TAG_RE.replace_all(xml, "<${1}");
    let without_namespaces = NAMESPACE_ATTR_RE.replace_all(&without_prefixes, "");
    AMPERSAND_RE
        .replace_all(&without_namespaces, |caps: &Captures| {
            if caps.get(1).is_some() {
                caps[0].to_string()
            } else {
                "&amp;".to_string()
            }
        })
        .into_owned()
}

fn extract_xml_rows(body: &str) -> Result<Vec<Result<RawRow, RowParseError>>, HoldingsError> {
    let xml = information_table_slice(body)
        .ok_or_else(|| HoldingsError::MalformedXml("no informationTable element".to_string()))?;

    match roxmltree::Document::parse(xml) {
        Ok(doc) => Ok(rows_from_document(&doc)),
        Err(first) => {
            tracing::debug!("Information table did not parse as-is ({}); retrying without prefixes", first);
            let cleaned = sanitize_xml(xml);
            let doc = roxmltree::Document::parse(&cleaned)
                .map_err(|e| HoldingsError::MalformedXml(e.to_string()))?;
            Ok(rows_from_document(&doc))
        }
    }
}

fn rows_from_document(doc: &roxmltree::Document) -> Vec<Result<RawRow, RowParseError>> {
    doc.descendants()
        .filter(|node| is_named(node, "infoTable"))
        .map(|row| Ok(raw_row_from_xml(row)))
        .collect()
}

fn is_named(node: &roxmltree::Node, name: &str) -> bool {
    node.is_element() && node.tag_name().name().eq_ignore_ascii_case(name)
}

fn find_element<'a, 'input>(
    parent: roxmltree::Node<'a, 'input>,
    name: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    parent.descendants().skip(1).find(|node| is_named(node, name))
}

fn element_text(parent: roxmltree::Node, name: &str) -> Option<String> {
    find_element(parent, name)
        .and_then(|node| node.text())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn raw_row_from_xml(row: roxmltree::Node) -> RawRow {
    let voting = find_element(row, "votingAuthority").map(|authority| RawVoting {
        sole: element_text(authority, "Sole"),
        shared: element_text(authority, "Shared"),
        none: element_text(authority, "None"),
    });
    RawRow {
        issuer_name: element_text(row, "nameOfIssuer"),
        class_title: element_text(row, "titleOfClass"),
        cusip: element_text(row, "cusip"),
        value: element_text(row, "value"),
        shares_amount: element_text(row, "sshPrnamt"),
        shares_type: element_text(row, "sshPrnamtType"),
        put_call: element_text(row, "putCall"),
        discretion: element_text(row, "investmentDiscretion"),
        other_manager: element_text(row, "otherManager"),
        voting,
    }
}

// Legacy text table

/// Column offsets learned from a header line.
#[derive(Debug, Clone, Copy)]
struct ColumnLayout {
    title_col: usize,
}

impl ColumnLayout {
    fn from_header_line(line: &str) -> Option<Self> {
        let upper = line.to_ascii_uppercase();
        let title_col = upper.find("TITLE")?;
        let cusip_col = upper.find("CUSIP")?;
        (title_col > 0 && title_col < cusip_col).then_some(ColumnLayout { title_col })
    }

    fn split_issuer_and_class(&self, line: &str, cusip_offset: usize) -> Option<(String, String)> {
        if self.title_col >= cusip_offset {
            return None;
        }
        let head = line.get(..self.title_col)?;
        let tail = line.get(self.title_col..cusip_offset)?;
        // Rows that do not line up with the header must not be cut mid-word.
        if !head.ends_with(char::is_whitespace) || tail.starts_with(char::is_whitespace) {
            return None;
        }
        let issuer = collapse_whitespace(head);
        let class = collapse_whitespace(tail);
        (!issuer.is_empty() && !class.is_empty()).then_some((issuer, class))
    }
}

/// Text regions to scan: `<TABLE>` blocks if any, else everything after the header.
fn legacy_regions(body: &str) -> Vec<&str> {
    let tables: Vec<&str> = TEXT_TABLE_RE
        .captures_iter(body)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();
    if !tables.is_empty() {
        return tables;
    }
    let start = HEADER_END_RE.find(body).map_or(0, |m| m.end());
    vec![&body[start..]]
}

fn extract_legacy_rows(body: &str) -> Vec<Result<RawRow, RowParseError>> {
    let mut rows = Vec::new();
    for region in legacy_regions(body) {
        let mut layout = None;
        for line in region.lines() {
            if let Some(found) = ColumnLayout::from_header_line(line) {
                layout = Some(found);
                continue;
            }
            if let Some(row) = legacy_row(line, layout.as_ref()) {
                rows.push(row);
            }
        }
    }
    rows
}

/// `None` for lines that are not table rows at all.
fn legacy_row(line: &str, layout: Option<&ColumnLayout>) -> Option<Result<RawRow, RowParseError>> {
    let tokens = tokens_with_offsets(line);
    let anchor = (1..tokens.len()).find(|&i| {
        looks_like_cusip(tokens[i].1) && tokens.get(i + 1).map_or(false, |(_, next)| looks_like_amount(next))
    })?;

    if anchor < 2 || tokens.len() < anchor + 3 {
        return Some(Err(RowParseError::ColumnCount {
            found: tokens.len(),
            expected: MIN_LEGACY_COLUMNS,
        }));
    }

    let (issuer, class) = layout
        .and_then(|l| l.split_issuer_and_class(line, tokens[anchor].0))
        .unwrap_or_else(|| {
            let issuer: Vec<&str> = tokens[..anchor - 1].iter().map(|(_, t)| *t).collect();
            (issuer.join(" "), tokens[anchor - 1].1.to_string())
        });

    let rest: Vec<&str> = tokens[anchor + 1..].iter().map(|(_, t)| *t).collect();
    let mut row = RawRow {
        issuer_name: Some(issuer),
        class_title: Some(class),
        cusip: Some(tokens[anchor].1.to_string()),
        value: Some(rest[0].to_string()),
        shares_amount: Some(rest[1].to_string()),
        ..RawRow::default()
    };

    let mut idx = 2;
    if let Some(token) = rest.get(idx).filter(|t| ShareType::parse(t).is_some()) {
        row.shares_type = Some(token.to_string());
        idx += 1;
    }
    if let Some(token) = rest.get(idx).filter(|t| PutCall::parse(t).is_some()) {
        row.put_call = Some(token.to_string());
        idx += 1;
    }
    if let Some(token) = rest.get(idx).filter(|t| InvestmentDiscretion::parse(t).is_some()) {
        row.discretion = Some(token.to_string());
        idx += 1;
    }

    let remaining = &rest[idx..];
    let (managers, voting) = match remaining.len().checked_sub(3) {
        Some(split) if remaining[split..].iter().all(|t| looks_like_amount(t)) => (
            &remaining[..split],
            Some(RawVoting {
                sole: Some(remaining[split].to_string()),
                shared: Some(remaining[split + 1].to_string()),
                none: Some(remaining[split + 2].to_string()),
            }),
        ),
        _ => (remaining, None),
    };
    if !managers.is_empty() {
        row.other_manager = Some(managers.join(" "));
    }
    row.voting = voting;
    Some(Ok(row))
}

fn tokens_with_offsets(line: &str) -> Vec<(usize, &str)> {
    let mut tokens = Vec::new();
    let mut start = None;
    for (i, c) in line.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                tokens.push((s, &line[s..i]));
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        tokens.push((s, &line[s..]));
    }
    tokens
}

fn looks_like_cusip(token: &str) -> bool {
    let len = token.chars().count();
    (6..=12).contains(&len)
        && token.chars().all(|c| c.is_ascii_alphanumeric())
        && token.chars().filter(|c| c.is_ascii_digit()).count() >= 2
}

fn looks_like_amount(token: &str) -> bool {
    let digits = token.trim_start_matches(|c| c == '-' || c == '$');
    digits.chars().any(|c| c.is_ascii_digit())
        && digits.chars().all(|c| c.is_ascii_digit() || c == ',' || c == '.')
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
