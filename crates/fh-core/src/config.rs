//! Configuration management
//!
//! Settings are resolved in this order (later wins):
//! 1. Defaults
//! 2. `foscos-harvest.toml` in the working directory
//! 3. Environment variables
//!
//! `${VAR_NAME}` inside the TOML file is expanded from the environment
//! before parsing.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::Error;

/// Default config file name looked up by [`Config::load`]
pub const CONFIG_FILE: &str = "foscos-harvest.toml";

/// LLM Provider type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Google Gemini `generateContent` API
    #[default]
    Gemini,
    /// Anthropic Claude Messages API
    Claude,
    /// OpenAI-compatible chat completions API
    OpenAi,
}

impl LlmProvider {
    /// Parse a provider name, falling back to Gemini for unknown values
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "claude" | "anthropic" => LlmProvider::Claude,
            "openai" | "glm" | "openrouter" => LlmProvider::OpenAi,
            _ => LlmProvider::Gemini,
        }
    }
}

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// API key
    pub api_key: String,

    /// Model to use
    pub model: String,

    /// API provider
    pub provider: LlmProvider,

    /// Base URL (optional, for custom endpoints)
    pub base_url: Option<String>,

    /// Attempts per structured extraction before giving up
    pub max_attempts: u32,

    /// Content is truncated to this many characters before prompting;
    /// unset sends it whole
    pub max_input_chars: Option<usize>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            provider: LlmProvider::Gemini,
            base_url: None,
            max_attempts: 2,
            max_input_chars: None,
        }
    }
}

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}

/// CAPTCHA solving service configuration (2captcha protocol)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptchaConfig {
    /// Service API key; empty disables automatic solving
    pub api_key: String,
    /// Service base URL (`/in.php` and `/res.php` live under it)
    pub base_url: String,
    /// Timeout for the submit request in seconds
    pub submit_timeout_secs: u64,
    /// Timeout for each poll request in seconds
    pub poll_timeout_secs: u64,
    /// Delay between polls in milliseconds
    pub poll_interval_ms: u64,
    /// Maximum number of polls before giving up
    pub max_polls: u32,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "http://2captcha.com".to_string(),
            submit_timeout_secs: 7,
            poll_timeout_secs: 8,
            poll_interval_ms: 1_000,
            max_polls: 20,
        }
    }
}

impl CaptchaConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Product page scraping and OCR configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    /// Product page the license number is extracted from
    pub product_url: String,
    /// Timeout for page and image requests in seconds
    pub request_timeout_secs: u64,
    /// Tesseract executable
    pub tesseract_cmd: String,
    /// Tesseract language code
    pub ocr_language: String,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            product_url: default_product_url(),
            request_timeout_secs: 10,
            tesseract_cmd: "tesseract".to_string(),
            ocr_language: "eng".to_string(),
        }
    }
}

fn default_product_url() -> String {
    "https://www.avvatarindia.com/product/alpha-whey-belgian-chocolate-flavour-2-kg".to_string()
}

impl ScrapeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// FoSCoS portal automation timings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    /// Portal landing page
    pub url: String,
    /// Settle delay after the initial navigation (ms)
    pub navigation_settle_ms: u64,
    /// Settle delay after selecting the search tab (ms)
    pub tab_settle_ms: u64,
    /// Settle delay after submitting the search (ms)
    pub search_settle_ms: u64,
    /// Settle delay after opening the product listing (ms)
    pub products_settle_ms: u64,
    /// Explicit wait budget for the license input (seconds)
    pub element_wait_secs: u64,
    /// Manual CAPTCHA entry budget (seconds)
    pub manual_captcha_wait_secs: u64,
    /// Interval between manual CAPTCHA checks (ms)
    pub manual_poll_interval_ms: u64,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            url: "https://foscos.fssai.gov.in".to_string(),
            navigation_settle_ms: 3_000,
            tab_settle_ms: 2_000,
            search_settle_ms: 3_000,
            products_settle_ms: 2_000,
            element_wait_secs: 10,
            manual_captcha_wait_secs: 30,
            manual_poll_interval_ms: 1_000,
        }
    }
}

impl PortalConfig {
    pub fn element_wait(&self) -> Duration {
        Duration::from_secs(self.element_wait_secs)
    }

    pub fn manual_poll_interval(&self) -> Duration {
        Duration::from_millis(self.manual_poll_interval_ms)
    }

    /// Number of manual-entry checks that fit in the wait budget
    pub fn manual_poll_attempts(&self) -> u32 {
        let interval = self.manual_poll_interval_ms.max(1);
        let attempts = (self.manual_captcha_wait_secs * 1_000).div_ceil(interval);
        attempts.clamp(1, u32::MAX as u64) as u32
    }
}

/// Browser launch options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserOptions {
    /// Headless mode; the manual CAPTCHA fallback needs a visible window
    pub headless: bool,
    /// Window width in pixels
    pub width: u32,
    /// Window height in pixels
    pub height: u32,
    /// Custom user agent
    pub user_agent: Option<String>,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: false,
            width: 1920,
            height: 1080,
            user_agent: None,
        }
    }
}

/// Result persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory JSON results are written to
    pub results_dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            results_dir: "results".to_string(),
        }
    }
}

/// Main configuration for foscos-harvest
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub captcha: CaptchaConfig,
    pub scrape: ScrapeConfig,
    pub portal: PortalConfig,
    pub browser: BrowserOptions,
    pub output: OutputConfig,
}

impl Config {
    /// Expand `${VAR_NAME}` references with environment values.
    ///
    /// Unknown variables expand to an empty string.
    fn expand_env_vars(value: &str) -> String {
        let mut result = String::new();
        let mut chars = value.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '$' && chars.peek() == Some(&'{') {
                chars.next();

                let mut var_name = String::new();
                while let Some(c) = chars.next() {
                    if c == '}' {
                        break;
                    }
                    var_name.push(c);
                }

                if let Ok(env_value) = std::env::var(&var_name) {
                    result.push_str(&env_value);
                }
            } else {
                result.push(c);
            }
        }

        result
    }

    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();

        let toml_content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let mut config = Self::from_toml_str(&toml_content)?;
        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Parse TOML content (after `${VAR}` expansion) without env overrides
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let expanded = Self::expand_env_vars(content);
        toml::from_str(&expanded)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))
    }

    /// Load from `foscos-harvest.toml` when present, else from the environment
    pub fn load() -> crate::Result<Self> {
        if Path::new(CONFIG_FILE).exists() {
            return Self::from_toml_file(CONFIG_FILE);
        }

        Self::from_env()
    }

    /// Load configuration from environment variables on top of defaults
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> crate::Result<()> {
        if self.llm.api_key.is_empty() {
            return Err(Error::Config(
                "LLM_API_KEY or GEMINI_API_KEY not set".to_string(),
            ));
        }
        if self.llm.max_attempts == 0 {
            return Err(Error::Config("llm.max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Override settings with non-empty environment variables
    fn apply_env_overrides(&mut self) {
        if let Some(key) = env_nonempty("GEMINI_API_KEY") {
            self.llm.api_key = key;
        }
        // LLM_API_KEY wins over the provider-specific name
        if let Some(key) = env_nonempty("LLM_API_KEY") {
            self.llm.api_key = key;
        }
        if let Some(model) = env_nonempty("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(provider) = env_nonempty("LLM_PROVIDER") {
            self.llm.provider = LlmProvider::from_name(&provider);
        }
        if let Some(base_url) = env_nonempty("LLM_BASE_URL") {
            self.llm.base_url = Some(base_url);
        }

        if let Some(key) = env_nonempty("CAPTCHA_API_KEY") {
            self.captcha.api_key = key;
        }
        if let Some(base_url) = env_nonempty("CAPTCHA_BASE_URL") {
            self.captcha.base_url = base_url;
        }

        if let Some(url) = env_nonempty("PRODUCT_URL") {
            self.scrape.product_url = url;
        }
        if let Some(cmd) = env_nonempty("TESSERACT_CMD") {
            self.scrape.tesseract_cmd = cmd;
        }
        if let Some(lang) = env_nonempty("OCR_LANGUAGE") {
            self.scrape.ocr_language = lang;
        }

        if let Some(url) = env_nonempty("FOSCOS_URL") {
            self.portal.url = url;
        }

        if let Some(headless) = env_nonempty("BROWSER_HEADLESS") {
            self.browser.headless = matches!(headless.to_lowercase().as_str(), "1" | "true" | "yes");
        }

        if let Some(dir) = env_nonempty("RESULTS_DIR") {
            self.output.results_dir = dir;
        }
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_provider_default() {
        assert_eq!(LlmProvider::default(), LlmProvider::Gemini);
    }

    #[test]
    fn test_llm_provider_from_name() {
        assert_eq!(LlmProvider::from_name("Claude"), LlmProvider::Claude);
        assert_eq!(LlmProvider::from_name("openai"), LlmProvider::OpenAi);
        assert_eq!(LlmProvider::from_name("gemini"), LlmProvider::Gemini);
        assert_eq!(LlmProvider::from_name("something-else"), LlmProvider::Gemini);
    }

    #[test]
    fn test_defaults_match_portal_behaviour() {
        let config = Config::default();
        assert_eq!(config.llm.model, "gemini-2.5-flash");
        assert_eq!(config.llm.max_attempts, 2);
        assert_eq!(config.captcha.max_polls, 20);
        assert_eq!(config.captcha.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.scrape.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.portal.element_wait(), Duration::from_secs(10));
        assert_eq!(config.portal.manual_poll_attempts(), 30);
        assert!(!config.browser.headless);
        assert_eq!(config.output.results_dir, "results");
    }

    #[test]
    fn test_manual_poll_attempts_rounds_up() {
        let portal = PortalConfig {
            manual_captcha_wait_secs: 1,
            manual_poll_interval_ms: 300,
            ..Default::default()
        };
        assert_eq!(portal.manual_poll_attempts(), 4);

        let zero = PortalConfig {
            manual_captcha_wait_secs: 0,
            ..Default::default()
        };
        assert_eq!(zero.manual_poll_attempts(), 1);
    }

    #[test]
    fn test_expand_env_vars() {
        unsafe {
            std::env::set_var("FOSCOS_HARVEST_TEST_VAR", "test_value");
        }

        let result = Config::expand_env_vars("prefix_${FOSCOS_HARVEST_TEST_VAR}_suffix");
        assert_eq!(result, "prefix_test_value_suffix");

        let result = Config::expand_env_vars("prefix_${FOSCOS_HARVEST_MISSING_VAR}_suffix");
        assert_eq!(result, "prefix__suffix");

        unsafe {
            std::env::remove_var("FOSCOS_HARVEST_TEST_VAR");
        }
    }

    #[test]
    fn test_expand_env_vars_no_braces() {
        assert_eq!(Config::expand_env_vars("no_vars_here"), "no_vars_here");
        assert_eq!(Config::expand_env_vars("price $5"), "price $5");
    }

    #[test]
    fn test_toml_config_parsing() {
        let toml_content = r#"
[llm]
provider = "claude"
model = "claude-sonnet-4-20250514"
api_key = "test_key"
max_attempts = 3

[captcha]
api_key = "captcha_key"
max_polls = 5

[scrape]
product_url = "https://shop.example.com/item"
tesseract_cmd = "/usr/local/bin/tesseract"

[portal]
manual_captcha_wait_secs = 60

[browser]
headless = true

[output]
results_dir = "/tmp/results"
"#;

        let config = Config::from_toml_str(toml_content).unwrap();

        assert_eq!(config.llm.provider, LlmProvider::Claude);
        assert_eq!(config.llm.model, "claude-sonnet-4-20250514");
        assert_eq!(config.llm.api_key, "test_key");
        assert_eq!(config.llm.max_attempts, 3);
        // unspecified fields keep defaults
        assert_eq!(config.llm.max_input_chars, None);

        assert_eq!(config.captcha.api_key, "captcha_key");
        assert_eq!(config.captcha.max_polls, 5);
        assert_eq!(config.captcha.base_url, "http://2captcha.com");

        assert_eq!(config.scrape.product_url, "https://shop.example.com/item");
        assert_eq!(config.scrape.tesseract_cmd, "/usr/local/bin/tesseract");
        assert_eq!(config.scrape.ocr_language, "eng");

        assert_eq!(config.portal.manual_captcha_wait_secs, 60);
        assert_eq!(config.portal.url, "https://foscos.fssai.gov.in");
        assert!(config.browser.headless);
        assert_eq!(config.output.results_dir, "/tmp/results");
    }

    #[test]
    fn test_toml_config_empty_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.llm.provider, LlmProvider::Gemini);
        assert_eq!(config.captcha.submit_timeout_secs, 7);
        assert_eq!(config.captcha.poll_timeout_secs, 8);
    }

    #[test]
    fn test_toml_config_invalid() {
        let result = Config::from_toml_str("[llm\nmodel = ");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_requires_api_key() {
        let config = Config::default();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.llm.api_key = "key".to_string();
        assert!(config.validate().is_ok());

        config.llm.max_attempts = 0;
        assert!(config.validate().is_err());
    }
}
