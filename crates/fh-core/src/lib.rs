//! fh-core: FoSCoS harvester core library
//!
//! Configuration, LLM access, structured extraction, CAPTCHA solving,
//! bounded polling and result persistence shared by the scraping and
//! browser crates.

pub mod captcha;
pub mod config;
pub mod error;
pub mod extract;
pub mod llm;
pub mod media;
pub mod poll;
pub mod storage;

pub use captcha::{CaptchaJob, CaptchaSolver, CaptchaStatus};
pub use config::{
    BrowserOptions, CaptchaConfig, Config, LlmConfig, LlmProvider, OutputConfig, PortalConfig,
    ScrapeConfig,
};
pub use error::{Error, Result};
pub use extract::{ExtractionRecord, FieldSchema, StructuredExtractor};
pub use llm::{LlmClient, TextGenerator};
pub use media::ImagePayload;
pub use poll::{PollPolicy, poll_until};
pub use storage::ResultStore;
