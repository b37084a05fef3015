//! Base64 image payloads
//!
//! CAPTCHA images reach the solver as base64; `data:` URIs found on pages
//! are decoded here instead of fetched.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Base64-encoded image with its media type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub media_type: String,
    pub data: String,
}

impl ImagePayload {
    /// Create a payload from raw bytes (encodes to base64)
    pub fn from_bytes(media_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            media_type: media_type.into(),
            data: STANDARD.encode(bytes),
        }
    }

    /// Parse a data URL (e.g. "data:image/png;base64,....")
    ///
    /// Returns `None` for anything that is not a base64 `data:` URL.
    pub fn from_data_url(data_url: &str) -> Option<Self> {
        let rest = data_url.trim().strip_prefix("data:")?;
        let (header, data) = rest.split_once(',')?;

        let mut params = header.split(';');
        let media_type = params.next().unwrap_or_default();
        if !params.any(|p| p.eq_ignore_ascii_case("base64")) {
            return None;
        }

        Some(Self {
            media_type: if media_type.is_empty() {
                "text/plain".to_string()
            } else {
                media_type.to_string()
            },
            data: data.trim().to_string(),
        })
    }

    /// Whether `src` is a `data:` URL at all
    pub fn is_data_url(src: &str) -> bool {
        src.trim_start()
            .get(..5)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("data:"))
    }

    pub fn is_image(&self) -> bool {
        self.media_type.starts_with("image/")
    }

    /// Decode base64 data to bytes
    pub fn decode(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(&self.data)
            .map_err(|e| Error::Media(format!("Invalid base64: {}", e)))
    }
}
