// src/parsers/mod.rs
pub mod header;
pub mod holdings;

pub use header::{parse_accession_info, parse_company_info};
pub use holdings::{parse_holdings, HoldingsTable, HoldingsTableFormat, SkippedRow};

/// Whether a form type belongs to the 13F family, the only forms carrying a holdings table.
pub fn has_holdings_table(form_type: &str) -> bool {
    form_type.trim().to_ascii_uppercase().starts_with("13F")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_holdings_dispatch_by_form_family() {
        assert!(has_holdings_table("13F-HR"));
        assert!(has_holdings_table("13f-hr/a"));
        assert!(has_holdings_table("13F-NT"));
        assert!(!has_holdings_table("SC 13G"));
        assert!(!has_holdings_table("10-K"));
    }
}
