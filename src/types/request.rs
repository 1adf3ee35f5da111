//! External call request and its cache fingerprint.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

// ============================================================================
// Decoding Parameters
// ============================================================================

/// Generation parameters forwarded to the inference service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodingParams {
    /// Sampling temperature (0.0-2.0)
    pub temperature: f64,
    /// Output length limit, if the service should enforce one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    /// Requested response MIME type (e.g. `application/json`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<String>,
}

impl Default for DecodingParams {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_output_tokens: None,
            response_format: None,
        }
    }
}

// ============================================================================
// Call Request
// ============================================================================

/// One request to the external inference service.
///
/// Every field except `trace_id` affects the response and therefore the
/// fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRequest {
    /// Target service (provider/endpoint identifier)
    pub service_id: String,
    /// Model identifier
    pub model: String,
    /// Full prompt text, system preamble included
    pub prompt: String,
    #[serde(default)]
    pub params: DecodingParams,
    /// Any other output-affecting field, keyed by name
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
    /// Correlation id for logs; never part of the fingerprint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

/// The output-affecting projection of a request, in canonical field order.
#[derive(Serialize)]
struct FingerprintInput<'a> {
    service_id: &'a str,
    model: &'a str,
    prompt: &'a str,
    params: &'a DecodingParams,
    extra: &'a BTreeMap<String, serde_json::Value>,
}

impl CallRequest {
    pub fn new(
        service_id: impl Into<String>,
        model: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            model: model.into(),
            prompt: prompt.into(),
            params: DecodingParams::default(),
            extra: BTreeMap::new(),
            trace_id: None,
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: DecodingParams) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.params.temperature = temperature;
        self
    }

    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    fn fingerprint_input(&self) -> FingerprintInput<'_> {
        FingerprintInput {
            service_id: &self.service_id,
            model: &self.model,
            prompt: &self.prompt,
            params: &self.params,
            extra: &self.extra,
        }
    }

    /// SHA-256 over the canonical JSON of every output-affecting field.
    ///
    /// Struct fields serialize in declaration order and `extra` is a
    /// `BTreeMap`, so equal requests always produce identical bytes.
    pub fn fingerprint(&self) -> CallFingerprint {
        let canonical = serde_json::to_vec(&self.fingerprint_input())
            .unwrap_or_else(|_| self.prompt.as_bytes().to_vec());
        let digest = Sha256::digest(&canonical);
        CallFingerprint(format!("{digest:x}"))
    }

    /// True when both requests would produce the same response.
    pub fn is_equivalent(&self, other: &Self) -> bool {
        self.service_id == other.service_id
            && self.model == other.model
            && self.prompt == other.prompt
            && self.params == other.params
            && self.extra == other.extra
    }
}

// ============================================================================
// Fingerprint
// ============================================================================

/// Hex-encoded SHA-256 digest identifying a request's output-affecting fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallFingerprint(String);

impl CallFingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl std::fmt::Display for CallFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallFingerprint {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> CallRequest {
        CallRequest::new("gemini", "gemini-2.0-flash", "Extract requirements")
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let fp = base().fingerprint();
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp.short().len(), 12);
    }

    #[test]
    fn test_trace_id_does_not_affect_fingerprint() {
        let a = base().with_trace_id("run-1");
        let b = base().with_trace_id("run-2");
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert!(a.is_equivalent(&b));
    }

    #[test]
    fn test_every_output_field_changes_fingerprint() {
        let reference = base().fingerprint();
        let variants = [
            CallRequest::new("other", "gemini-2.0-flash", "Extract requirements"),
            CallRequest::new("gemini", "gemini-1.5-pro", "Extract requirements"),
            CallRequest::new("gemini", "gemini-2.0-flash", "Extract requirement"),
            base().with_temperature(0.9),
            base().with_extra("response_schema", json!({"type": "object"})),
        ];
        for v in &variants {
            assert_ne!(v.fingerprint(), reference, "variant {v:?}");
            assert!(!v.is_equivalent(&base()));
        }
    }

    #[test]
    fn test_extra_insertion_order_is_irrelevant() {
        let a = base()
            .with_extra("a", json!(1))
            .with_extra("b", json!(2));
        let b = base()
            .with_extra("b", json!(2))
            .with_extra("a", json!(1));
        assert_eq!(a.fingerprint(), b.fingerprint());
    }
}
