//! LLM-backed structured extraction
//!
//! Coerces free-form text (a scraped corpus or raw page markup) into a JSON
//! object keyed by a declared set of fields, with a bounded number of
//! attempts.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::config::LlmConfig;
use crate::llm::TextGenerator;

/// Error kind recorded when no attempt produced parseable JSON
pub const INVALID_JSON_ERROR: &str = "Failed to get valid JSON";

const RETRY_INSTRUCTION: &str = "Your previous reply could not be parsed. \
Reply with exactly one JSON object and no other text.";

/// Fields the model is asked to fill, plus the framing of the request
#[derive(Debug, Clone)]
pub struct FieldSchema {
    /// What to extract, e.g. "license information"
    pub subject: String,
    pub fields: Vec<String>,
    /// Whether the prompt spells out that missing fields are `null`
    pub null_when_missing: bool,
    /// Label placed in front of the appended content
    pub content_label: String,
}

impl FieldSchema {
    /// License metadata looked up on the product page
    pub fn license() -> Self {
        Self {
            subject: "license information".to_string(),
            fields: ["license_number", "shelf_life", "expiry_date", "manufacturer_name"]
                .into_iter()
                .map(String::from)
                .collect(),
            null_when_missing: false,
            content_label: "Text".to_string(),
        }
    }

    /// License and product details on the portal's product listing
    pub fn product_details() -> Self {
        Self {
            subject: "all available product/license details".to_string(),
            fields: [
                "company_name",
                "license_number",
                "license_type",
                "status",
                "validity",
                "address",
                "products",
                "manufacturing_details",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            null_when_missing: true,
            content_label: "Content".to_string(),
        }
    }

    /// Build the instruction prompt with the content appended
    pub fn prompt(&self, content: &str) -> String {
        let mut prompt = format!(
            "Extract {} from the following content. Return ONLY a valid JSON object. Fields: {}.",
            self.subject,
            self.fields.join(", ")
        );
        if self.null_when_missing {
            prompt.push_str(" If a field is missing, use null.");
        }
        prompt.push('\n');
        prompt.push_str(&self.content_label);
        prompt.push_str(":\n");
        prompt.push_str(content);
        prompt
    }
}

/// Outcome of a structured extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtractionRecord {
    /// Every attempt failed; carries the last raw reply for diagnosis
    Failed { error: String, raw_response: String },
    /// Field name to extracted value
    Fields(Map<String, Value>),
}

impl ExtractionRecord {
    pub fn is_error(&self) -> bool {
        matches!(self, ExtractionRecord::Failed { .. })
    }

    /// Field value as non-empty text, if present
    ///
    /// Numbers are rendered as they appear in the reply, so a license
    /// number the model returned unquoted is still usable.
    pub fn get_text(&self, field: &str) -> Option<String> {
        let ExtractionRecord::Fields(map) = self else {
            return None;
        };
        match map.get(field)? {
            Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn fields(&self) -> Option<&Map<String, Value>> {
        match self {
            ExtractionRecord::Fields(map) => Some(map),
            ExtractionRecord::Failed { .. } => None,
        }
    }
}

/// Parse the span from the first `{` to the last `}` as a JSON object
pub fn parse_json_object(reply: &str) -> Option<Map<String, Value>> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }

    match serde_json::from_str::<Value>(&reply[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => None,
        Err(e) => {
            error!("JSON parsing error: {}", e);
            None
        }
    }
}

/// Cut `text` to at most `max_chars` characters on a char boundary
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Runs field-schema prompts against an LLM with bounded retries
#[derive(Clone)]
pub struct StructuredExtractor {
    generator: Arc<dyn TextGenerator>,
    max_input_chars: usize,
}

impl StructuredExtractor {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator,
            max_input_chars: usize::MAX,
        }
    }

    /// Extractor using the configured input limit, if any
    pub fn from_config(generator: Arc<dyn TextGenerator>, config: &LlmConfig) -> Self {
        let extractor = Self::new(generator);
        match config.max_input_chars {
            Some(limit) => extractor.with_max_input_chars(limit),
            None => extractor,
        }
    }

    /// Limit the content length sent to the model
    pub fn with_max_input_chars(mut self, max_input_chars: usize) -> Self {
        self.max_input_chars = max_input_chars;
        self
    }

    /// Extract `schema` fields from `content`, making at most
    /// `max_attempts` model calls.
    ///
    /// Returns as soon as a reply contains a parseable JSON object. A
    /// transport error counts as a failed attempt.
    pub async fn extract(
        &self,
        content: &str,
        schema: &FieldSchema,
        max_attempts: u32,
    ) -> ExtractionRecord {
        if max_attempts == 0 {
            warn!("No extraction attempts allowed ({})", schema.subject);
            return ExtractionRecord::Failed {
                error: INVALID_JSON_ERROR.to_string(),
                raw_response: String::new(),
            };
        }

        let truncated = truncate_chars(content, self.max_input_chars);
        if truncated.len() < content.len() {
            warn!(
                "Content truncated to {} characters ({} bytes dropped)",
                self.max_input_chars,
                content.len() - truncated.len()
            );
        }
        let content = truncated;

        let base_prompt = schema.prompt(content);
        let mut last_reply = String::new();

        for attempt in 1..=max_attempts {
            let prompt = if attempt == 1 {
                base_prompt.clone()
            } else {
                format!("{}\n\n{}", base_prompt, RETRY_INSTRUCTION)
            };

            debug!("Extraction attempt {}/{} ({})", attempt, max_attempts, schema.subject);

            match self.generator.generate(&prompt).await {
                Ok(reply) => {
                    let reply = reply.trim().to_string();
                    if let Some(map) = parse_json_object(&reply) {
                        info!(
                            "Extracted {} fields on attempt {}",
                            map.len(),
                            attempt
                        );
                        return ExtractionRecord::Fields(map);
                    }
                    warn!("Attempt {} returned no parseable JSON object", attempt);
                    last_reply = reply;
                }
                Err(e) => {
                    warn!("LLM call failed on attempt {}: {}", attempt, e);
                    last_reply = e.to_string();
                }
            }
        }

        error!("No valid JSON after {} attempts", max_attempts);
        ExtractionRecord::Failed {
            error: INVALID_JSON_ERROR.to_string(),
            raw_response: last_reply,
        }
    }
}
