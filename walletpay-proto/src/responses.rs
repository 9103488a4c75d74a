//! Error payloads and telemetry upload types.

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// A single structured error returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    /// Broad error class (e.g. `"INVALID_REQUEST_ERROR"`).
    pub category: String,
    /// Specific error code (e.g. `"MISSING_REQUIRED_PARAMETER"`).
    pub code: String,
    /// Human-readable explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Offending request field, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// Body of a non-2xx API response.
///
/// # JSON Format
///
/// ```json
/// { "errors": [{ "category": "INVALID_REQUEST_ERROR", "code": "INVALID_VALUE", "detail": "...", "field": "amount" }] }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    /// Errors reported by the server. Only the first is surfaced.
    pub errors: Vec<ApiErrorDetail>,
}

impl ApiErrorBody {
    /// Returns the first reported error.
    #[must_use]
    pub fn first(&self) -> Option<&ApiErrorDetail> {
        self.errors.first()
    }

    /// Decodes an error body and returns its first error.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Json`] if the body is not an error payload and
    /// [`ProtocolError::MissingField`] if it lists no errors.
    pub fn first_from_slice(body: &[u8]) -> Result<ApiErrorDetail, ProtocolError> {
        let mut parsed: Self = serde_json::from_slice(body)?;
        if parsed.errors.is_empty() {
            return Err(ProtocolError::MissingField("errors"));
        }
        Ok(parsed.errors.swap_remove(0))
    }
}

/// Batched telemetry upload.
///
/// Each event is an opaque JSON document serialized to a string.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Serialized events.
    pub events: Vec<String>,
}

/// Result of a telemetry upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UploadSummary {
    /// Number of events the endpoint accepted.
    #[serde(default)]
    pub success_count: u32,
    /// Number of events the endpoint rejected.
    #[serde(default)]
    pub failure_count: u32,
}

impl UploadSummary {
    /// Returns `true` if nothing was rejected.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.failure_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_keeps_detail_verbatim() {
        let body: ApiErrorBody = serde_json::from_str(
            r#"{"errors":[{"category":"INVALID_REQUEST_ERROR","code":"INVALID_VALUE","detail":"amount must be positive","field":"amount"}]}"#,
        )
        .unwrap();
        let first = body.first().unwrap();
        assert_eq!(first.category, "INVALID_REQUEST_ERROR");
        assert_eq!(first.code, "INVALID_VALUE");
        assert_eq!(first.detail.as_deref(), Some("amount must be positive"));
        assert_eq!(first.field.as_deref(), Some("amount"));
    }

    #[test]
    fn empty_error_list_is_reported() {
        assert!(matches!(
            ApiErrorBody::first_from_slice(br#"{"errors":[]}"#),
            Err(ProtocolError::MissingField("errors"))
        ));
        assert!(matches!(
            ApiErrorBody::first_from_slice(b"<html>"),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn envelope_shape() {
        let envelope = EventEnvelope {
            events: vec![r#"{"a":1}"#.to_owned()],
        };
        assert_eq!(
            serde_json::to_string(&envelope).unwrap(),
            r#"{"events":["{\"a\":1}"]}"#
        );
    }
}
