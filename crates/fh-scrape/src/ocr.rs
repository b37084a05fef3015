//! Image OCR
//!
//! Images are normalized (grayscale, 2x upscale) before recognition; the
//! recognizer itself sits behind [`TextRecognizer`] so tests can swap out
//! the Tesseract binary.

use std::io::Cursor;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{Result, ScrapeError};

const OCR_TIMEOUT: Duration = Duration::from_secs(60);

/// Turns an image into text
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, image: &DynamicImage) -> Result<String>;
}

/// Tesseract command-line recognizer (`tesseract stdin stdout -l <lang>`)
#[derive(Debug, Clone)]
pub struct TesseractCli {
    cmd: String,
    language: String,
    timeout: Duration,
}

impl TesseractCli {
    pub fn new(cmd: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            language: language.into(),
            timeout: OCR_TIMEOUT,
        }
    }

    /// Bound on feeding the image and waiting for the result
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl TextRecognizer for TesseractCli {
    async fn recognize(&self, image: &DynamicImage) -> Result<String> {
        let mut png = Vec::new();
        image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

        let mut child = Command::new(&self.cmd)
            .args(["stdin", "stdout", "-l", &self.language])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take();
        let run = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&png).await?;
            }
            child.wait_with_output().await
        };

        let output = timeout(self.timeout, run)
            .await
            .map_err(|_| ScrapeError::Ocr(format!("{} timed out", self.cmd)))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ScrapeError::Ocr(format!(
                "{} exited with {}: {}",
                self.cmd,
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Grayscale and upscale 2x
pub fn preprocess(image: &DynamicImage) -> Result<DynamicImage> {
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return Err(ScrapeError::Ocr("Image has zero size".to_string()));
    }

    let (Some(new_width), Some(new_height)) = (width.checked_mul(2), height.checked_mul(2)) else {
        return Err(ScrapeError::Ocr(format!(
            "Image too large to upscale: {}x{}",
            width, height
        )));
    };

    Ok(image
        .grayscale()
        .resize_exact(new_width, new_height, FilterType::CatmullRom))
}

/// Decodes image bytes, normalizes them and runs OCR
pub struct ImageTextExtractor {
    recognizer: Box<dyn TextRecognizer>,
}

impl ImageTextExtractor {
    pub fn new(recognizer: Box<dyn TextRecognizer>) -> Self {
        Self { recognizer }
    }

    /// Text found in the encoded image `bytes`
    pub async fn extract(&self, bytes: &[u8]) -> Result<String> {
        let original = image::load_from_memory(bytes)?;
        debug!("Decoded image {}x{}", original.width(), original.height());

        let image = match preprocess(&original) {
            Ok(processed) => processed,
            Err(e) => {
                warn!("Image preprocessing failed: {}", e);
                original
            }
        };

        self.recognizer.recognize(&image).await
    }
}
