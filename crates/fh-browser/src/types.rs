//! Records produced by a portal run

use std::fmt;

use fh_core::ExtractionRecord;
use serde::{Deserialize, Serialize};

use crate::driver::TableRow;

/// Cells a results row needs to be read
pub const MIN_ROW_CELLS: usize = 6;

/// Marker text of the product drill-down link
pub const VIEW_PRODUCTS: &str = "View Products";

/// Progress of a portal run; transitions only move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AutomationState {
    Start,
    Navigated,
    TabSelected,
    LicenseEntered,
    CaptchaResolved,
    SearchSubmitted,
    ResultsScraped,
    ProductsExtracted,
    Done,
    Failed,
}

impl AutomationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutomationState::Start => "START",
            AutomationState::Navigated => "NAVIGATED",
            AutomationState::TabSelected => "TAB_SELECTED",
            AutomationState::LicenseEntered => "LICENSE_ENTERED",
            AutomationState::CaptchaResolved => "CAPTCHA_RESOLVED",
            AutomationState::SearchSubmitted => "SEARCH_SUBMITTED",
            AutomationState::ResultsScraped => "RESULTS_SCRAPED",
            AutomationState::ProductsExtracted => "PRODUCTS_EXTRACTED",
            AutomationState::Done => "DONE",
            AutomationState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for AutomationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the license search results table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseSearchRow {
    pub sno: String,
    pub company_name: String,
    pub premises_address: String,
    pub license_number: String,
    pub license_type: String,
    pub status: String,
    pub view_products_available: bool,
}

impl LicenseSearchRow {
    /// Map cells 0..5 by position; `None` for rows with too few cells
    pub fn from_row(row: &TableRow) -> Option<Self> {
        if row.cells.len() < MIN_ROW_CELLS {
            return None;
        }

        let cell = |i: usize| row.cells[i].trim().to_string();
        Some(Self {
            sno: cell(0),
            company_name: cell(1),
            premises_address: cell(2),
            license_number: cell(3),
            license_type: cell(4),
            status: cell(5),
            view_products_available: row.text.contains(VIEW_PRODUCTS),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub search_successful: bool,
    pub products_extracted: bool,
    pub total_records_found: usize,
}

/// Consolidated record of a completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoscosResult {
    /// Local time, ISO 8601
    pub extraction_timestamp: String,
    pub source_license_number: String,
    pub search_results: Vec<LicenseSearchRow>,
    pub product_details: Option<ExtractionRecord>,
    pub summary: Summary,
    pub page_url: String,
}

impl FoscosResult {
    pub fn new(
        source_license_number: impl Into<String>,
        search_results: Vec<LicenseSearchRow>,
        product_details: Option<ExtractionRecord>,
        page_url: impl Into<String>,
    ) -> Self {
        let total_records_found = search_results.len();
        Self {
            extraction_timestamp: chrono::Local::now()
                .naive_local()
                .format("%Y-%m-%dT%H:%M:%S%.6f")
                .to_string(),
            source_license_number: source_license_number.into(),
            search_results,
            summary: Summary {
                search_successful: total_records_found > 0,
                products_extracted: product_details.is_some(),
                total_records_found,
            },
            product_details,
            page_url: page_url.into(),
        }
    }
}

/// Data gathered before a run failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialResult {
    pub license_search_results: Vec<LicenseSearchRow>,
    pub product_details: Option<ExtractionRecord>,
    pub search_successful: bool,
    pub products_extracted: bool,
    /// Always "failed"
    pub status: String,
    /// Last state reached before the failure
    pub failed_at: AutomationState,
    pub error: String,
}

/// Result of one portal run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AutomationOutcome {
    Completed(FoscosResult),
    Failed(PartialResult),
}

impl AutomationOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, AutomationOutcome::Completed(_))
    }

    /// Rows scraped, whichever way the run ended
    pub fn search_results(&self) -> &[LicenseSearchRow] {
        match self {
            AutomationOutcome::Completed(result) => &result.search_results,
            AutomationOutcome::Failed(partial) => &partial.license_search_results,
        }
    }
}
