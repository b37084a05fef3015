//! fh-scrape: product page scraping
//!
//! Visible text and image discovery, Tesseract OCR, and the aggregator
//! that merges both into one corpus for extraction.

pub mod error;
pub mod html;
pub mod ocr;
pub mod page;

pub use error::{Result, ScrapeError};
pub use ocr::{ImageTextExtractor, TesseractCli, TextRecognizer};
pub use page::{ContentCorpus, PageContentAggregator};
