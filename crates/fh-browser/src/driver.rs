//! Browser driver seam
//!
//! The automation only needs a handful of locator-based operations; the
//! headless Chrome session implements them and tests substitute a fake.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;

/// How to find an element on the page
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    XPath(String),
    Css(String),
}

impl Locator {
    pub fn xpath(expr: impl Into<String>) -> Self {
        Locator::XPath(expr.into())
    }

    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::XPath(expr) => write!(f, "xpath {}", expr),
            Locator::Css(selector) => write!(f, "css {}", selector),
        }
    }
}

/// One `tbody tr` of a table: trimmed cell texts plus the row's full text
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TableRow {
    pub cells: Vec<String>,
    pub text: String,
}

/// Synchronous page operations used by the portal automation
pub trait BrowserDriver {
    /// Load `url` and wait for the navigation to finish
    fn navigate(&self, url: &str) -> Result<()>;

    /// Whether the element is currently in the DOM
    fn exists(&self, locator: &Locator) -> bool;

    /// Script-click the element
    fn click(&self, locator: &Locator) -> Result<()>;

    /// Wait until the element is visible and enabled; `Timeout` otherwise
    fn wait_until_interactable(&self, locator: &Locator, timeout: Duration) -> Result<()>;

    fn clear_and_type(&self, locator: &Locator, text: &str) -> Result<()>;

    /// Attribute value; `Ok(None)` when the element lacks it
    fn attribute(&self, locator: &Locator, name: &str) -> Result<Option<String>>;

    /// Current value of an input element
    fn input_value(&self, locator: &Locator) -> Result<String>;

    /// Number of `tbody tr` rows in the table
    fn row_count(&self, table: &Locator) -> Result<usize>;

    fn row(&self, table: &Locator, index: usize) -> Result<TableRow>;

    fn page_source(&self) -> Result<String>;

    fn current_url(&self) -> Result<String>;
}

/// Starts a browser; the returned driver closes it when dropped
pub trait BrowserLauncher {
    type Driver: BrowserDriver;

    fn launch(&self) -> Result<Self::Driver>;
}

/// Fixed settle delay between page interactions
pub(crate) async fn settle(millis: u64) {
    if millis > 0 {
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }
}
