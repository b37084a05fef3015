//! foscos-harvest: license harvesting pipeline
//!
//! Reads the configured product page (text plus OCR of its images), asks
//! the LLM for the FSSAI license number, then searches the FoSCoS portal
//! for it. Every stage writes its JSON under the results directory.
//!
//! Usage:
//!   foscos-harvest
//!
//! Configuration comes from `foscos-harvest.toml` (optional), `.env` and
//! the environment; see `fh_core::Config`.

use std::sync::Arc;

use anyhow::Context;
use fh_browser::{AutomationOutcome, ChromeLauncher, FoscosAutomation};
use fh_core::{CaptchaSolver, Config, FieldSchema, LlmClient, ResultStore, StructuredExtractor};
use fh_scrape::PageContentAggregator;
use tracing_subscriber::EnvFilter;

const LLM_EXTRACTION_FILE: &str = "llm_extraction.json";

#[tokio::main]
async fn main() {
    // Load .env file
    dotenvy::dotenv().ok();

    if let Err(e) = init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
    }

    // Failures are reported, never turned into an exit code
    if let Err(e) = run().await {
        tracing::error!("{:#}", e);
    }
}

fn init_logging() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let config = Config::load().context("Config error")?;

    tracing::info!("Starting foscos-harvest...");
    tracing::info!("Model: {} ({:?})", config.llm.model, config.llm.provider);

    let store = ResultStore::new(&config.output.results_dir);
    let llm = LlmClient::new(&config.llm).context("Failed to create LLM client")?;
    let extractor = StructuredExtractor::from_config(Arc::new(llm), &config.llm);
    let aggregator = PageContentAggregator::from_config(&config.scrape)
        .context("Failed to create page aggregator")?;

    let product_url = &config.scrape.product_url;
    tracing::info!("Extracting license info from {} ...", product_url);

    let corpus = aggregator.aggregate(product_url).await;
    if corpus.is_empty() {
        tracing::warn!("No content gathered from {}", product_url);
    }

    let extraction = extractor
        .extract(corpus.as_str(), &FieldSchema::license(), config.llm.max_attempts)
        .await;
    store.save(&extraction, Some(LLM_EXTRACTION_FILE));

    let Some(license_number) = extraction.get_text("license_number") else {
        tracing::warn!("License number could not be extracted.");
        return Ok(());
    };
    tracing::info!("License number extracted: {}", license_number);

    let solver = CaptchaSolver::new(&config.captcha).context("Failed to create CAPTCHA solver")?;
    let automation = FoscosAutomation::new(
        ChromeLauncher::new(config.browser.clone()),
        solver,
        extractor,
        store,
        config.portal.clone(),
    )
    .max_attempts(config.llm.max_attempts)
    .headless(config.browser.headless);

    match automation.run(&license_number).await {
        AutomationOutcome::Completed(result) => tracing::info!(
            "Final FoSCoS Result saved ({} records found)",
            result.summary.total_records_found
        ),
        AutomationOutcome::Failed(partial) => tracing::warn!(
            "FoSCoS automation failed at {}; partial results saved ({} records)",
            partial.failed_at,
            partial.license_search_results.len()
        ),
    }

    Ok(())
}
