//! FoSCoS license search automation
//!
//! Drives one browser session through the portal's FBO search: enter the
//! license number, get past the CAPTCHA, submit, read the results table and
//! optionally the product listing. Rows are collected as they are read, so
//! a failure part-way through still returns (and persists) what was found.

use fh_core::{
    CaptchaSolver, ExtractionRecord, FieldSchema, PollPolicy, PortalConfig, ResultStore,
    StructuredExtractor, poll_until,
};
use tracing::{debug, error, info, warn};

use crate::driver::{BrowserDriver, BrowserLauncher, Locator, settle};
use crate::error::{BrowserError, Result};
use crate::types::{
    AutomationOutcome, AutomationState, FoscosResult, LicenseSearchRow, PartialResult,
};

pub const FBO_SEARCH_TAB: &str = "//b[text()='FBO Search']/parent::a";
pub const LICENSE_INPUT: &str = "//input[contains(@placeholder, 'License')]";
pub const CAPTCHA_IMAGE: &str = "//img[contains(@alt, 'Captcha')]";
pub const CAPTCHA_INPUT: &str = "//input[contains(@placeholder, 'Captcha')]";
pub const SEARCH_BUTTON: &str = "//button[contains(text(), 'Search')]";
pub const RESULTS_TABLE: &str = "table.responsive-table, table#data-table-simple, table.dataTable";
pub const VIEW_PRODUCTS_LINK: &str = "//a[contains(text(), 'View Products')]";

pub const RESULT_FILE: &str = "foscos_result.json";
pub const PARTIAL_FILE: &str = "foscos_partial.json";

/// What a run has gathered so far
#[derive(Debug)]
struct Progress {
    state: AutomationState,
    rows: Vec<LicenseSearchRow>,
    product_details: Option<ExtractionRecord>,
    search_successful: bool,
    products_extracted: bool,
}

impl Progress {
    fn new() -> Self {
        Self {
            state: AutomationState::Start,
            rows: Vec::new(),
            product_details: None,
            search_successful: false,
            products_extracted: false,
        }
    }

    fn advance(&mut self, next: AutomationState) {
        debug!("Automation state {} -> {}", self.state, next);
        self.state = next;
    }

    fn into_partial(self, err: &BrowserError) -> PartialResult {
        PartialResult {
            license_search_results: self.rows,
            product_details: self.product_details,
            search_successful: self.search_successful,
            products_extracted: self.products_extracted,
            status: "failed".to_string(),
            failed_at: self.state,
            error: err.to_string(),
        }
    }
}

/// FBO search automation over a launchable browser
pub struct FoscosAutomation<L: BrowserLauncher> {
    launcher: L,
    solver: CaptchaSolver,
    extractor: StructuredExtractor,
    store: ResultStore,
    portal: PortalConfig,
    max_attempts: u32,
    headless: bool,
}

impl<L: BrowserLauncher> FoscosAutomation<L> {
    pub fn new(
        launcher: L,
        solver: CaptchaSolver,
        extractor: StructuredExtractor,
        store: ResultStore,
        portal: PortalConfig,
    ) -> Self {
        Self {
            launcher,
            solver,
            extractor,
            store,
            portal,
            max_attempts: 2,
            headless: false,
        }
    }

    /// LLM attempts for the product-detail extraction
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Whether the browser is headless (nobody can solve CAPTCHAs by hand)
    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Search the portal for `license_number`.
    ///
    /// Never fails: errors end the run with a [`PartialResult`], which is
    /// persisted like a completed result. The browser is closed before
    /// this returns.
    pub async fn run(&self, license_number: &str) -> AutomationOutcome {
        info!("Starting FoSCoS automation for license {}", license_number);
        let mut progress = Progress::new();

        let result = match self.launcher.launch() {
            Ok(driver) => self.drive(&driver, license_number, &mut progress).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(record) => {
                self.store.save(&record, Some(RESULT_FILE));
                info!(
                    "FoSCoS automation finished: {} records, products extracted: {}",
                    record.summary.total_records_found, record.summary.products_extracted
                );
                AutomationOutcome::Completed(record)
            }
            Err(e) => {
                error!("Error during FoSCoS automation at {}: {}", progress.state, e);
                let partial = progress.into_partial(&e);
                self.store.save(&partial, Some(PARTIAL_FILE));
                AutomationOutcome::Failed(partial)
            }
        }
    }

    async fn drive(
        &self,
        driver: &L::Driver,
        license_number: &str,
        progress: &mut Progress,
    ) -> Result<FoscosResult> {
        driver.navigate(&self.portal.url)?;
        settle(self.portal.navigation_settle_ms).await;
        progress.advance(AutomationState::Navigated);

        if self.select_search_tab(driver).await {
            progress.advance(AutomationState::TabSelected);
        }

        let license_input = Locator::xpath(LICENSE_INPUT);
        driver.wait_until_interactable(&license_input, self.portal.element_wait())?;
        driver.clear_and_type(&license_input, license_number)?;
        progress.advance(AutomationState::LicenseEntered);

        self.resolve_captcha(driver).await?;
        progress.advance(AutomationState::CaptchaResolved);

        driver.click(&Locator::xpath(SEARCH_BUTTON))?;
        settle(self.portal.search_settle_ms).await;
        progress.advance(AutomationState::SearchSubmitted);

        self.scrape_results(driver, progress)?;
        progress.advance(AutomationState::ResultsScraped);

        if self.extract_products(driver, progress).await? {
            progress.advance(AutomationState::ProductsExtracted);
        }

        let page_url = driver.current_url()?;
        progress.advance(AutomationState::Done);

        Ok(FoscosResult::new(
            license_number,
            std::mem::take(&mut progress.rows),
            progress.product_details.take(),
            page_url,
        ))
    }

    /// Best effort; the search form may already be showing
    async fn select_search_tab(&self, driver: &L::Driver) -> bool {
        let tab = Locator::xpath(FBO_SEARCH_TAB);
        if !driver.exists(&tab) {
            warn!("FBO Search tab not found");
            return false;
        }

        match driver.click(&tab) {
            Ok(()) => {
                settle(self.portal.tab_settle_ms).await;
                true
            }
            Err(e) => {
                warn!("FBO Search tab not clickable: {}", e);
                false
            }
        }
    }

    async fn resolve_captcha(&self, driver: &L::Driver) -> Result<()> {
        let image = Locator::xpath(CAPTCHA_IMAGE);
        let input = Locator::xpath(CAPTCHA_INPUT);
        for required in [&image, &input] {
            if !driver.exists(required) {
                return Err(BrowserError::ElementNotFound(required.to_string()));
            }
        }

        let src = driver.attribute(&image, "src")?.unwrap_or_default();
        let payload = if src.trim().is_empty() {
            warn!("CAPTCHA image has no src");
            None
        } else {
            let page_url = driver.current_url().ok();
            self.solver.image_to_base64(&src, page_url.as_deref()).await
        };

        let solution = match payload {
            Some(payload) => self.solver.solve(&payload).await,
            None => None,
        };

        match solution {
            Some(solution) => {
                driver.clear_and_type(&input, &solution)?;
                info!("CAPTCHA solution entered");
            }
            None => {
                if !self.wait_for_manual_captcha(driver, &input).await {
                    warn!("Timeout reached for manual CAPTCHA entry");
                }
            }
        }

        Ok(())
    }

    /// Wait for someone to type into the CAPTCHA input
    async fn wait_for_manual_captcha(&self, driver: &L::Driver, input: &Locator) -> bool {
        info!("Waiting for manual CAPTCHA entry...");
        if self.headless {
            warn!("Browser is headless; manual CAPTCHA entry is not possible");
        }

        let policy = PollPolicy::immediate(
            self.portal.manual_poll_interval(),
            self.portal.manual_poll_attempts(),
        );
        let entered = poll_until(policy, |_| {
            let value = driver.input_value(input).ok();
            std::future::ready(value.filter(|v| !v.trim().is_empty()))
        })
        .await;

        if entered.is_some() {
            info!("Manual CAPTCHA entry detected!");
        }
        entered.is_some()
    }

    fn scrape_results(&self, driver: &L::Driver, progress: &mut Progress) -> Result<()> {
        let table = Locator::css(RESULTS_TABLE);
        if !driver.exists(&table) {
            return Err(BrowserError::ElementNotFound(table.to_string()));
        }

        let count = driver.row_count(&table)?;
        debug!("Results table has {} rows", count);

        for index in 0..count {
            let row = driver.row(&table, index)?;
            match LicenseSearchRow::from_row(&row) {
                Some(record) => progress.rows.push(record),
                None => debug!("Skipping row {} ({} cells)", index, row.cells.len()),
            }
        }

        progress.search_successful = !progress.rows.is_empty();
        info!("Found {} license records", progress.rows.len());
        Ok(())
    }

    async fn extract_products(&self, driver: &L::Driver, progress: &mut Progress) -> Result<bool> {
        let link = Locator::xpath(VIEW_PRODUCTS_LINK);
        if !driver.exists(&link) {
            info!("No 'View Products' button found");
            return Ok(false);
        }

        driver.click(&link)?;
        settle(self.portal.products_settle_ms).await;

        let source = driver.page_source()?;
        let details = self
            .extractor
            .extract(&source, &FieldSchema::product_details(), self.max_attempts)
            .await;

        progress.product_details = Some(details);
        progress.products_extracted = true;
        Ok(true)
    }
}
