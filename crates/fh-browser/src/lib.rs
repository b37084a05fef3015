//! fh-browser: FoSCoS portal automation
//!
//! Drives the portal's FBO license search in a Chrome session.
//!
//! ## Features
//!
//! - Headless Chrome (or visible) sessions via the headless_chrome crate
//! - XPath/CSS locators resolved in-page
//! - CAPTCHA solving with a manual-entry fallback
//! - Results table scraping and LLM product-detail extraction
//! - Partial results persisted when a run fails
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fh_browser::{ChromeLauncher, FoscosAutomation};
//!
//! let automation = FoscosAutomation::new(
//!     ChromeLauncher::new(config.browser.clone()),
//!     solver,
//!     extractor,
//!     store,
//!     config.portal.clone(),
//! );
//! let outcome = automation.run("10012345000123").await;
//! ```

pub mod automation;
pub mod driver;
pub mod error;
pub mod session;
pub mod types;

pub use automation::FoscosAutomation;
pub use driver::{BrowserDriver, BrowserLauncher, Locator, TableRow};
pub use error::{BrowserError, Result};
pub use session::{BrowserSession, ChromeLauncher};
pub use types::{
    AutomationOutcome, AutomationState, FoscosResult, LicenseSearchRow, PartialResult, Summary,
};
