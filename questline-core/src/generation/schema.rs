//! Parsing provider text into typed payloads.

use crate::error::SchemaValidationError;
use serde::de::DeserializeOwned;

/// Parse a provider reply into `T`, tolerating markdown code fences around the JSON.
pub fn parse_payload<T: DeserializeOwned>(text: &str) -> Result<T, SchemaValidationError> {
    let json_str = extract_json(text);
    if json_str.is_empty() {
        return Err(SchemaValidationError::Malformed("empty response".to_string()));
    }

    serde_json::from_str(json_str).map_err(|e| {
        let message = e.to_string();
        if let Some(field) = missing_field_name(&message) {
            SchemaValidationError::InvalidValue {
                field: "payload",
                reason: format!("missing field `{field}`"),
            }
        } else {
            SchemaValidationError::Malformed(message)
        }
    })
}

/// Require a non-blank string field.
pub fn require_text(
    value: Option<String>,
    field: &'static str,
) -> Result<String, SchemaValidationError> {
    match value {
        Some(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
        Some(_) => Err(SchemaValidationError::InvalidValue {
            field,
            reason: "must not be blank".to_string(),
        }),
        None => Err(SchemaValidationError::MissingField(field)),
    }
}

/// Extract JSON from a response that might have markdown code blocks.
pub fn extract_json(text: &str) -> &str {
    let text = text.trim();

    // Handle ```json ... ``` blocks
    if let Some(start) = text.find("```json") {
        let content_start = start + 7;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    // Handle ``` ... ``` blocks (without json specifier)
    if let Some(start) = text.find("```") {
        let content_start = start + 3;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    // Prose around a bare object: take the outermost braces
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            return &text[start..=end];
        }
    }

    text
}

fn missing_field_name(message: &str) -> Option<&str> {
    let rest = message.strip_prefix("missing field `")?;
    rest.split('`').next()
}
