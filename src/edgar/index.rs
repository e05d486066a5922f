// src/edgar/index.rs
//! Quarterly full-index discovery.
//!
//! Row layout heuristic, applied after the first line made only of `-`:
//! 1. A row containing `|` is delimited and must split into exactly five
//!    fields (`CIK|Company Name|Form Type|Date Filed|Filename`).
//! 2. Any other row is fixed-width. When the line above the dashes names the
//!    five columns (`Form Type`, `Company Name`, `CIK`, `Date Filed`,
//!    `File Name`), the row is sliced at those offsets, provided every cut
//!    falls on whitespace. This keeps multi-word form types such as `SC 13G`
//!    whole.
//! 3. Without a header, or for a row that does not line up with it, the row
//!    is whitespace-split and read right-anchored: the last token is the
//!    document path, then the filing date, then the CIK. For `form.idx` the
//!    first token is the form type and the tokens between it and the CIK are
//!    the company name.
//! Rows that fail CIK, date or path validation are skipped and counted.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;

use crate::config::{validate_year_range, IndexKind};
use crate::edgar::client::EdgarClient;
use crate::edgar::models::{normalize_cik, IndexEntry, QuarterPeriod};
use crate::utils::error::{ConfigError, FetchError};

/// Result of reading one quarter's index document.
#[derive(Debug, Clone)]
pub struct QuarterIndex {
    pub period: QuarterPeriod,
    pub entries: Vec<IndexEntry>,
    pub skipped_rows: usize,
    /// Set when the index could not be fetched after retries; `entries` is then empty.
    pub error: Option<FetchError>,
}

/// Entries plus the count of rows that did not fit the layout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedIndex {
    pub entries: Vec<IndexEntry>,
    pub skipped_rows: usize,
}

/// Pure post-filter over index entries. `None` means "do not filter on this field".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexFilter {
    pub ciks: Option<BTreeSet<String>>,
    pub form_types: Option<BTreeSet<String>>,
    pub include_amendments: bool,
}

impl IndexFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ciks<I, S>(mut self, ciks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ciks = Some(ciks.into_iter().map(|c| normalize_cik(c.as_ref())).collect());
        self
    }

    pub fn with_form_types<I, S>(mut self, forms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.form_types = Some(
            forms
                .into_iter()
                .map(|f| f.as_ref().trim().to_ascii_uppercase())
                .collect(),
        );
        self
    }

    pub fn with_amendments(mut self, include: bool) -> Self {
        self.include_amendments = include;
        self
    }

    pub fn matches(&self, entry: &IndexEntry) -> bool {
        if let Some(ciks) = &self.ciks {
            if !ciks.contains(&normalize_cik(&entry.cik)) {
                return false;
            }
        }
        if let Some(forms) = &self.form_types {
            let form = entry.form_type.trim().to_ascii_uppercase();
            let base = form.strip_suffix("/A").filter(|_| self.include_amendments);
            if !forms.contains(&form) && !base.map_or(false, |b| forms.contains(b)) {
                return false;
            }
        }
        true
    }

    pub fn apply<'a>(&'a self, entries: &'a [IndexEntry]) -> impl Iterator<Item = &'a IndexEntry> + 'a {
        entries.iter().filter(move |e| self.matches(e))
    }
}

pub struct IndexResolver {
    client: EdgarClient,
    kind: IndexKind,
}

impl IndexResolver {
    pub fn new(client: EdgarClient, kind: IndexKind) -> Self {
        IndexResolver { client, kind }
    }

    /// Every quarter Q1..=Q4 of every year in `start_year..=end_year`, in order.
    pub fn quarters(start_year: i32, end_year: i32) -> Result<Vec<QuarterPeriod>, ConfigError> {
        validate_year_range(start_year, end_year)?;
        Ok((start_year..=end_year)
            .flat_map(|year| (1..=4).map(move |quarter| QuarterPeriod { year, quarter }))
            .collect())
    }

    /// Lazily fetches and parses one quarter at a time; nothing is requested
    /// until the stream is polled.
    pub fn resolve_index(
        &self,
        start_year: i32,
        end_year: i32,
    ) -> Result<impl Stream<Item = QuarterIndex> + '_, ConfigError> {
        let quarters = Self::quarters(start_year, end_year)?;
        Ok(stream::iter(quarters).then(move |period| self.fetch_quarter(period)))
    }

    pub async fn fetch_quarter(&self, period: QuarterPeriod) -> QuarterIndex {
        let url = period.index_url(self.kind.file_name());
        tracing::info!("Fetching {} index: {}", period, url);

        match self.client.fetch(&url, &[]).await {
            Ok(body) => {
                let parsed = parse_index_document(&body, self.kind);
                if parsed.skipped_rows > 0 {
                    tracing::warn!("{}: skipped {} malformed index rows", period, parsed.skipped_rows);
                }
                tracing::info!("{}: {} index entries", period, parsed.entries.len());
                QuarterIndex {
                    period,
                    entries: parsed.entries,
                    skipped_rows: parsed.skipped_rows,
                    error: None,
                }
            }
            Err(err) => {
                tracing::error!("Failed to fetch index for {}: {}", period, err);
                QuarterIndex { period, entries: Vec::new(), skipped_rows: 0, error: Some(err) }
            }
        }
    }
}

/// Parses a whole index document. Never fails: unusable rows are counted instead.
pub fn parse_index_document(body: &str, kind: IndexKind) -> ParsedIndex {
    let lines: Vec<&str> = body.lines().collect();
    let separator = lines.iter().position(|line| {
        let trimmed = line.trim();
        !trimmed.is_empty() && trimmed.chars().all(|c| c == '-')
    });
    let data_start = separator.map_or(0, |separator| separator + 1);
    let columns = separator
        .and_then(|separator| lines[..separator].iter().rev().find(|line| !line.trim().is_empty()))
        .and_then(|header| ColumnOffsets::from_header(header));

    let mut parsed = ParsedIndex::default();
    for line in &lines[data_start..] {
        if line.trim().is_empty() {
            continue;
        }
        match parse_index_row(line, kind, columns.as_ref()) {
            Some(entry) => parsed.entries.push(entry),
            None => {
                tracing::trace!("Skipping index row: {:?}", line);
                parsed.skipped_rows += 1;
            }
        }
    }
    parsed
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexColumn {
    FormType,
    CompanyName,
    Cik,
    DateFiled,
    FileName,
}

/// Start offsets of the five columns of a fixed-width index, in line order.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ColumnOffsets {
    columns: Vec<(IndexColumn, usize)>,
}

impl ColumnOffsets {
    fn from_header(line: &str) -> Option<Self> {
        // ASCII uppercasing keeps byte offsets intact.
        let upper = line.to_ascii_uppercase();
        let file_name = upper.find("FILE NAME").or_else(|| upper.find("FILENAME"))?;
        let mut columns = vec![
            (IndexColumn::FormType, upper.find("FORM TYPE")?),
            (IndexColumn::CompanyName, upper.find("COMPANY NAME")?),
            (IndexColumn::Cik, upper.find("CIK")?),
            (IndexColumn::DateFiled, upper.find("DATE FILED")?),
            (IndexColumn::FileName, file_name),
        ];
        columns.sort_by_key(|&(_, offset)| offset);
        Some(ColumnOffsets { columns })
    }

    /// Slices a row into `(cik, name, form_type, date, path)`, or `None` when
    /// a cut would land inside a word.
    fn split<'a>(&self, line: &'a str) -> Option<(&'a str, &'a str, &'a str, &'a str, &'a str)> {
        let mut fields = [""; 5];
        for (i, &(column, offset)) in self.columns.iter().enumerate() {
            let start = if i == 0 { 0 } else { offset };
            let end = self.columns.get(i + 1).map_or(line.len(), |&(_, next)| next.min(line.len()));
            if start > 0 && !line.get(..start)?.ends_with(char::is_whitespace) {
                return None;
            }
            let slot = match column {
                IndexColumn::Cik => 0,
                IndexColumn::CompanyName => 1,
                IndexColumn::FormType => 2,
                IndexColumn::DateFiled => 3,
                IndexColumn::FileName => 4,
            };
            fields[slot] = line.get(start..end)?.trim();
        }
        Some((fields[0], fields[1], fields[2], fields[3], fields[4]))
    }
}

fn parse_index_row(line: &str, kind: IndexKind, columns: Option<&ColumnOffsets>) -> Option<IndexEntry> {
    if line.contains('|') {
        let fields: Vec<&str> = line.split('|').map(str::trim).collect();
        if fields.len() != 5 {
            return None;
        }
        return build_entry(fields[0], fields[1], fields[2], fields[3], fields[4]);
    }

    if let Some((cik, name, form_type, date, path)) = columns.and_then(|c| c.split(line)) {
        return build_entry(cik, name, form_type, date, path);
    }

    let tokens: Vec<&str> = line.split_whitespace().collect();
    // form type, at least one name token, CIK, date, path
    if tokens.len() < 5 {
        return None;
    }
    let n = tokens.len();
    let (path, date, cik) = (tokens[n - 1], tokens[n - 2], tokens[n - 3]);
    let (form_type, name) = match kind {
        IndexKind::Form => (tokens[0], tokens[1..n - 3].join(" ")),
        // A master-layout document without pipes: company name first, single-token form type last.
        IndexKind::Master => (tokens[n - 4], tokens[..n - 4].join(" ")),
    };
    build_entry(cik, &name, form_type, date, path)
}

fn build_entry(cik: &str, name: &str, form_type: &str, date: &str, path: &str) -> Option<IndexEntry> {
    if cik.is_empty() || !cik.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if name.is_empty() || form_type.is_empty() || !path.starts_with("edgar/") {
        return None;
    }
    Some(IndexEntry {
        cik: normalize_cik(cik),
        company_name: name.to_string(),
        form_type: form_type.to_string(),
        filing_date: parse_index_date(date)?,
        document_path: path.to_string(),
    })
}

fn parse_index_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y%m%d"))
        .ok()
}
