//! Browser session management
//!
//! A headless_chrome browser driven through small JavaScript snippets, so
//! XPath and CSS locators resolve the same way the page's own scripts see
//! them.

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fh_core::BrowserOptions;
use headless_chrome::util::Wait;
use headless_chrome::{Browser, LaunchOptionsBuilder, Tab};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::driver::{BrowserDriver, BrowserLauncher, Locator, TableRow};
use crate::error::{BrowserError, Result};

/// Chrome exits after this long without CDP traffic; LLM calls run while
/// the page sits idle.
const IDLE_BROWSER_TIMEOUT: Duration = Duration::from_secs(600);

const INTERACTABLE_POLL: Duration = Duration::from_millis(250);

/// Launch arguments for a given set of options
pub fn launch_args(options: &BrowserOptions) -> Vec<String> {
    let mut args = vec![
        format!("--window-size={},{}", options.width, options.height),
        "--start-maximized".to_string(),
        "--disable-blink-features=AutomationControlled".to_string(),
        "--disable-infobars".to_string(),
        "--disable-dev-shm-usage".to_string(),
    ];

    if let Some(ref ua) = options.user_agent {
        args.push(format!("--user-agent={}", ua));
    }

    args
}

/// Managed browser session
pub struct BrowserSession {
    browser: Browser,
}

impl BrowserSession {
    /// Launch Chrome with the given options
    pub fn launch(options: &BrowserOptions) -> Result<Self> {
        info!("Creating browser session (headless: {})", options.headless);

        let args = launch_args(options);
        let os_args: Vec<&OsStr> = args.iter().map(OsStr::new).collect();

        let launch_options = LaunchOptionsBuilder::default()
            .headless(options.headless)
            .args(os_args)
            .idle_browser_timeout(IDLE_BROWSER_TIMEOUT)
            .build()
            .map_err(|e| {
                BrowserError::Initialization(format!("Failed to build launch options: {}", e))
            })?;

        let browser = Browser::new(launch_options).map_err(|e| {
            BrowserError::Initialization(format!("Failed to launch browser: {}", e))
        })?;

        info!("Browser session created successfully");

        Ok(Self { browser })
    }

    /// Get the active tab
    pub fn active_tab(&self) -> Result<Arc<Tab>> {
        let tabs = self.browser.get_tabs();
        let tabs_guard = tabs
            .lock()
            .map_err(|e| BrowserError::TabError(format!("Failed to lock tabs: {}", e)))?;

        tabs_guard
            .first()
            .cloned()
            .ok_or_else(|| BrowserError::TabError("No active tab available".to_string()))
    }

    /// Run `body` as a function and decode its JSON-serialized return value
    fn eval<T: DeserializeOwned>(&self, body: &str) -> Result<T> {
        let tab = self.active_tab()?;
        let script = format!("JSON.stringify((function() {{ {} }})())", body);

        let result = tab.evaluate(&script, false).map_err(|e| {
            BrowserError::Interaction(format!("JavaScript execution failed: {}", e))
        })?;

        let json = result
            .value
            .as_ref()
            .and_then(|v| v.as_str())
            .ok_or_else(|| BrowserError::Extraction("Script returned no value".to_string()))?;

        serde_json::from_str(json)
            .map_err(|e| BrowserError::Extraction(format!("Unexpected script result: {}", e)))
    }

    fn is_interactable(&self, locator: &Locator) -> Result<bool> {
        self.eval(&format!(
            "const el = {}; return !!el && !el.disabled && el.offsetParent !== null;",
            lookup_js(locator)
        ))
    }
}

impl BrowserDriver for BrowserSession {
    fn navigate(&self, url: &str) -> Result<()> {
        let tab = self.active_tab()?;

        info!("Navigating to: {}", url);

        tab.navigate_to(url).map_err(|e| {
            BrowserError::Navigation(format!("Failed to navigate to {}: {}", url, e))
        })?;

        tab.wait_until_navigated()
            .map_err(|e| BrowserError::Navigation(format!("Navigation timeout: {}", e)))?;

        let title = tab.get_title().unwrap_or_else(|_| "Unknown".to_string());
        info!("Navigated to: {} (title: {})", url, title);

        Ok(())
    }

    fn exists(&self, locator: &Locator) -> bool {
        self.eval::<bool>(&format!("return {} !== null;", lookup_js(locator)))
            .unwrap_or(false)
    }

    fn click(&self, locator: &Locator) -> Result<()> {
        debug!("Clicking element: {}", locator);

        let clicked: bool = self.eval(&format!(
            "const el = {}; if (!el) return false; el.click(); return true;",
            lookup_js(locator)
        ))?;

        if !clicked {
            return Err(BrowserError::ElementNotFound(locator.to_string()));
        }
        Ok(())
    }

    fn wait_until_interactable(&self, locator: &Locator, timeout: Duration) -> Result<()> {
        debug!("Waiting for element: {} (timeout: {:?})", locator, timeout);

        let started = Instant::now();
        let tab = self.active_tab()?;
        let present = match locator {
            Locator::XPath(expr) => tab
                .wait_for_xpath_with_custom_timeout(expr, timeout)
                .map(|_| ()),
            Locator::Css(selector) => tab
                .wait_for_element_with_custom_timeout(selector, timeout)
                .map(|_| ()),
        };
        present.map_err(|e| {
            BrowserError::Timeout(format!(
                "Element '{}' not found within timeout: {}",
                locator, e
            ))
        })?;

        // Present but possibly still disabled or hidden
        let remaining = timeout.saturating_sub(started.elapsed());
        Wait::new(remaining, INTERACTABLE_POLL)
            .until(|| interactable_ready(self.is_interactable(locator)))
            .map_err(|_| {
                BrowserError::Timeout(format!(
                    "Element '{}' not interactable within {:?}",
                    locator, timeout
                ))
            })
    }

    fn clear_and_type(&self, locator: &Locator, text: &str) -> Result<()> {
        info!("Typing into element: {} ({} chars)", locator, text.chars().count());

        let focused: bool = self.eval(&format!(
            "const el = {}; if (!el) return false; el.focus(); el.value = ''; \
             el.dispatchEvent(new Event('input', {{ bubbles: true }})); return true;",
            lookup_js(locator)
        ))?;
        if !focused {
            return Err(BrowserError::ElementNotFound(locator.to_string()));
        }

        self.active_tab()?
            .type_str(text)
            .map_err(|e| BrowserError::Interaction(format!("Failed to type text: {}", e)))?;

        Ok(())
    }

    fn attribute(&self, locator: &Locator, name: &str) -> Result<Option<String>> {
        // [value] keeps a missing attribute apart from a missing element
        let found: Option<Vec<Option<String>>> = self.eval(&format!(
            "const el = {}; if (!el) return null; return [el.getAttribute({})];",
            lookup_js(locator),
            js_string(name)
        ))?;

        match found {
            Some(mut values) => Ok(values.pop().flatten()),
            None => Err(BrowserError::ElementNotFound(locator.to_string())),
        }
    }

    fn input_value(&self, locator: &Locator) -> Result<String> {
        let value: Option<String> = self.eval(&format!(
            "const el = {}; return el ? String(el.value ?? '') : null;",
            lookup_js(locator)
        ))?;

        value.ok_or_else(|| BrowserError::ElementNotFound(locator.to_string()))
    }

    fn row_count(&self, table: &Locator) -> Result<usize> {
        let count: Option<usize> = self.eval(&format!(
            "const t = {}; return t ? t.querySelectorAll('tbody tr').length : null;",
            lookup_js(table)
        ))?;

        count.ok_or_else(|| BrowserError::ElementNotFound(table.to_string()))
    }

    fn row(&self, table: &Locator, index: usize) -> Result<TableRow> {
        let row: Option<TableRow> = self.eval(&format!(
            "const t = {}; const r = t ? t.querySelectorAll('tbody tr')[{}] : null; \
             if (!r) return null; \
             return {{ cells: Array.from(r.querySelectorAll('td')).map(td => td.innerText.trim()), \
             text: r.innerText }};",
            lookup_js(table),
            index
        ))?;

        row.ok_or_else(|| BrowserError::ElementNotFound(format!("{} row {}", table, index)))
    }

    fn page_source(&self) -> Result<String> {
        self.active_tab()?
            .get_content()
            .map_err(|e| BrowserError::Extraction(format!("Failed to get page source: {}", e)))
    }

    fn current_url(&self) -> Result<String> {
        Ok(self.active_tab()?.get_url())
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        info!("Closing browser session");
    }
}

/// Launches [`BrowserSession`]s from configured options
#[derive(Debug, Clone, Default)]
pub struct ChromeLauncher {
    options: BrowserOptions,
}

impl ChromeLauncher {
    pub fn new(options: BrowserOptions) -> Self {
        Self { options }
    }
}

impl BrowserLauncher for ChromeLauncher {
    type Driver = BrowserSession;

    fn launch(&self) -> Result<BrowserSession> {
        BrowserSession::launch(&self.options)
    }
}

/// JS string literal for `s`
fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

/// JS expression evaluating to the first matching element or `null`
fn lookup_js(locator: &Locator) -> String {
    match locator {
        Locator::XPath(expr) => format!(
            "document.evaluate({}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue",
            js_string(expr)
        ),
        Locator::Css(selector) => format!("document.querySelector({})", js_string(selector)),
    }
}

/// One interactability check; a failed evaluation (the page is mid
/// navigation) counts as not ready yet.
fn interactable_ready(check: Result<bool>) -> Option<()> {
    match check {
        Ok(true) => Some(()),
        Ok(false) => None,
        Err(e) => {
            debug!("Interactability check failed, retrying: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interactable_ready() {
        assert_eq!(interactable_ready(Ok(true)), Some(()));
        assert_eq!(interactable_ready(Ok(false)), None);
        assert_eq!(
            interactable_ready(Err(BrowserError::Interaction(
                "JavaScript execution failed: context destroyed".to_string()
            ))),
            None
        );
    }

    #[test]
    fn test_interactable_wait_retries_through_eval_errors() {
        let mut checks = vec![
            Ok(true),
            Ok(false),
            Err(BrowserError::Extraction("Script returned no value".to_string())),
        ];

        let outcome = Wait::new(Duration::from_secs(1), Duration::from_millis(1))
            .until(|| interactable_ready(checks.pop().unwrap_or(Ok(false))));

        assert!(outcome.is_ok());
        assert!(checks.is_empty());
    }

    #[test]
    fn test_interactable_wait_times_out() {
        let outcome = Wait::new(Duration::from_millis(20), Duration::from_millis(1))
            .until(|| interactable_ready(Ok(false)));
        assert!(outcome.is_err());
    }

    #[test]
    fn test_launch_args_default() {
        let args = launch_args(&BrowserOptions::default());
        assert!(args.contains(&"--window-size=1920,1080".to_string()));
        assert!(args.contains(&"--start-maximized".to_string()));
        assert!(args.contains(&"--disable-blink-features=AutomationControlled".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--user-agent")));
    }

    #[test]
    fn test_launch_args_user_agent() {
        let args = launch_args(&BrowserOptions {
            user_agent: Some("Custom Agent".to_string()),
            ..Default::default()
        });
        assert!(args.contains(&"--user-agent=Custom Agent".to_string()));
    }

    #[test]
    fn test_lookup_js_quotes_expressions() {
        let xpath = lookup_js(&Locator::xpath("//b[text()='FBO Search']/parent::a"));
        assert_eq!(
            xpath,
            "document.evaluate(\"//b[text()='FBO Search']/parent::a\", document, null, \
             XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue"
        );

        let css = lookup_js(&Locator::css("table#data-table-simple"));
        assert_eq!(css, "document.querySelector(\"table#data-table-simple\")");
    }

    #[test]
    fn test_js_string_escapes() {
        assert_eq!(js_string("a\"b"), "\"a\\\"b\"");
    }
}
