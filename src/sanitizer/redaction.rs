use super::payload::{primitive_to_json, Payload};
use crate::config::CaptureConfig;
use base64ct::{Base64, Encoding};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;

/// Replacement for values under sensitive keys
pub const REDACTED_MARKER: &str = "[REDACTED]";

/// Characters of the encoded digest kept in `[ENCRYPTED:...]` markers
const ENCODED_HINT_LEN: usize = 16;

/// Which side of a unit of work a payload belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    Request,
    Response,
}

impl fmt::Display for CaptureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureKind::Request => write!(f, "request"),
            CaptureKind::Response => write!(f, "response"),
        }
    }
}

/// Sanitized value plus what was done to it
#[derive(Debug, Clone, PartialEq)]
pub struct Sanitized {
    pub value: Value,
    /// Number of values replaced by a redaction marker
    pub redactions: usize,
    pub truncated: bool,
}

impl Sanitized {
    fn plain(value: Value) -> Self {
        Self {
            value,
            redactions: 0,
            truncated: false,
        }
    }
}

/// Redacts, truncates and encodes payloads according to [`CaptureConfig`]
#[derive(Debug, Clone)]
pub struct Sanitizer {
    capture_requests: bool,
    capture_responses: bool,
    max_request_size: usize,
    max_response_size: usize,
    /// Lower-cased key substrings
    sensitive_fields: Vec<String>,
    encrypt_sensitive: bool,
}

impl Sanitizer {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            capture_requests: config.capture_requests,
            capture_responses: config.capture_responses,
            max_request_size: config.max_request_size,
            max_response_size: config.max_response_size,
            sensitive_fields: config
                .sensitive_fields
                .iter()
                .map(|f| f.trim().to_lowercase())
                .filter(|f| !f.is_empty())
                .collect(),
            encrypt_sensitive: config.encrypt_sensitive,
        }
    }

    /// Whether payloads of `kind` are captured at all
    pub fn captures(&self, kind: CaptureKind) -> bool {
        match kind {
            CaptureKind::Request => self.capture_requests,
            CaptureKind::Response => self.capture_responses,
        }
    }

    fn max_size(&self, kind: CaptureKind) -> usize {
        match kind {
            CaptureKind::Request => self.max_request_size,
            CaptureKind::Response => self.max_response_size,
        }
    }

    /// Sanitize a payload for transmission
    pub fn sanitize(&self, payload: &Payload, kind: CaptureKind) -> Value {
        self.sanitize_detailed(payload, kind).value
    }

    /// Sanitize a payload and report redactions and truncation
    pub fn sanitize_detailed(&self, payload: &Payload, kind: CaptureKind) -> Sanitized {
        if !self.captures(kind) {
            return Sanitized::plain(json!({
                "captured": false,
                "reason": format!("{kind}_capture_disabled"),
            }));
        }

        let original_size = match payload.to_json().and_then(|v| {
            serde_json::to_string(&v).map_err(|e| (payload.type_name().to_string(), e.to_string()))
        }) {
            Ok(serialized) => serialized.len(),
            Err((original_type, reason)) => {
                return Sanitized::plain(serialization_failed(&original_type, &reason))
            }
        };

        let mut redactions = 0;
        let redacted = self.redact_node(payload, &mut redactions);

        let max = self.max_size(kind);
        if original_size <= max {
            return Sanitized {
                value: redacted,
                redactions,
                truncated: false,
            };
        }

        // Prefix taken from the redacted form so secrets never leak through truncation
        let serialized = redacted.to_string();
        let prefix = truncate_at_char_boundary(&serialized, max);

        Sanitized {
            value: json!({
                "_truncated": true,
                "_originalSize": original_size,
                "_maxSize": max,
                "data": prefix,
            }),
            redactions,
            truncated: true,
        }
    }

    /// Redact sensitive keys without applying capture toggles or size limits
    pub fn redact(&self, payload: &Payload) -> Value {
        let mut redactions = 0;
        self.redact_node(payload, &mut redactions)
    }

    /// Whether a key names a sensitive field
    pub fn is_sensitive_key(&self, key: &str) -> bool {
        let key = key.to_lowercase();
        self.sensitive_fields.iter().any(|field| key.contains(field.as_str()))
    }

    fn redact_node(&self, payload: &Payload, redactions: &mut usize) -> Value {
        match payload {
            Payload::Primitive(p) => primitive_to_json(p),
            Payload::Sequence(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.redact_node(item, redactions))
                    .collect(),
            ),
            Payload::Mapping(entries) => {
                let mut map = Map::with_capacity(entries.len());
                for (key, value) in entries {
                    let sanitized = if self.is_sensitive_key(key) {
                        *redactions += 1;
                        self.redaction_marker(value)
                    } else {
                        self.redact_node(value, redactions)
                    };
                    map.insert(key.clone(), sanitized);
                }
                Value::Object(map)
            }
            Payload::Unrepresentable { type_name, reason } => serialization_failed(type_name, reason),
        }
    }

    fn redaction_marker(&self, value: &Payload) -> Value {
        if !self.encrypt_sensitive {
            return Value::String(REDACTED_MARKER.to_string());
        }

        // Digest of the value: stable for correlation, never reversible
        let material = match value.to_json() {
            Ok(json) => json.to_string(),
            Err((type_name, _)) => type_name,
        };
        let digest = Sha256::digest(material.as_bytes());
        let encoded = Base64::encode_string(&digest);
        let hint: String = encoded.chars().take(ENCODED_HINT_LEN).collect();
        Value::String(format!("[ENCRYPTED:{hint}]"))
    }
}

fn serialization_failed(original_type: &str, reason: &str) -> Value {
    json!({
        "error": "serialization_failed",
        "reason": reason,
        "originalType": original_type,
    })
}

fn truncate_at_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
