//! Scraping errors

use thiserror::Error;

/// Errors from page fetching, image decoding and OCR
#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP error: {0}")]
    Status(reqwest::StatusCode),

    #[error("Not an image (content-type: {0})")]
    NotAnImage(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("OCR failed: {0}")]
    Ocr(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] fh_core::Error),
}

pub type Result<T> = std::result::Result<T, ScrapeError>;
