//! Structural and semantic validation of inbound request fields.
//!
//! [`ValidationManager`] owns the network allow-list and amount ceiling from
//! configuration and exposes per-field validators plus a schema-driven
//! request validator that collects *all* field errors rather than failing on
//! the first. [`RequestSchema`] descriptors are reusable by the embedding API
//! layer for its own request validation.

use ahash::AHashSet;
use serde_json::Value;
use thiserror::Error;

use crate::errors::ServiceError;

/// Errors that occur during request field validation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    /// Field is missing or empty.
    #[error("{0} is required")]
    Missing(&'static str),

    /// Address is not `0x` followed by exactly 40 hex characters.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Amount failed to parse or violates range constraints.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Network id is not on the configured allow-list.
    #[error("Unsupported network: {0}")]
    UnsupportedNetwork(String),

    /// Free-form field failed a structural check.
    #[error("Invalid field {field}: {message}")]
    InvalidField { field: String, message: String },
}

impl From<ValidationError> for ServiceError {
    fn from(err: ValidationError) -> Self {
        ServiceError::Validation(err.to_string())
    }
}

/// Semantic validator applied to a request field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// EVM address: `0x` + 40 hex characters.
    Address,
    /// Positive decimal amount below the configured ceiling.
    Amount,
    /// Allow-listed network identifier.
    Network,
    /// Non-empty free text (sanitized, length-bounded).
    Text,
}

/// One field of a request schema.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

/// Reusable description of an inbound request's required fields.
#[derive(Debug, Clone, Copy)]
pub struct RequestSchema {
    /// Schema identifier for logging.
    pub name: &'static str,
    /// Required fields, all validated.
    pub required: &'static [FieldSpec],
}

/// Schemas for the operations the API layer forwards to the runtime.
pub mod schemas {
    use super::{FieldKind, FieldSpec, RequestSchema};

    /// Deposit request: wallet, amount, network.
    pub const DEPOSIT: RequestSchema = RequestSchema {
        name: "deposit",
        required: &[
            FieldSpec { name: "wallet", kind: FieldKind::Address },
            FieldSpec { name: "amount", kind: FieldKind::Amount },
            FieldSpec { name: "network", kind: FieldKind::Network },
        ],
    };

    /// Withdraw request: wallet, amount, network.
    pub const WITHDRAW: RequestSchema = RequestSchema {
        name: "withdraw",
        required: &[
            FieldSpec { name: "wallet", kind: FieldKind::Address },
            FieldSpec { name: "amount", kind: FieldKind::Amount },
            FieldSpec { name: "network", kind: FieldKind::Network },
        ],
    };

    /// Market snapshot query: network only.
    pub const SNAPSHOT: RequestSchema = RequestSchema {
        name: "snapshot",
        required: &[FieldSpec { name: "network", kind: FieldKind::Network }],
    };

    /// Rebalance simulation job: wallet, network, strategy label.
    pub const REBALANCE: RequestSchema = RequestSchema {
        name: "rebalance",
        required: &[
            FieldSpec { name: "wallet", kind: FieldKind::Address },
            FieldSpec { name: "network", kind: FieldKind::Network },
            FieldSpec { name: "strategy", kind: FieldKind::Text },
        ],
    };
}

/// A single field failure reported by [`ValidationManager::validate_request`].
#[derive(Debug, Clone, PartialEq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Upper bound on free-text field length after sanitization.
const MAX_TEXT_LEN: usize = 1000;

/// Validates and sanitizes inbound request fields.
///
/// Holds the immutable allow-list and limits resolved from configuration at
/// startup; cheap to share behind an `Arc`.
pub struct ValidationManager {
    allowed_networks: AHashSet<String>,
    max_amount: f64,
}

impl ValidationManager {
    /// Creates a manager from an allow-list and amount ceiling.
    #[must_use]
    pub fn new(allowed_networks: impl IntoIterator<Item = String>, max_amount: f64) -> Self {
        Self { allowed_networks: allowed_networks.into_iter().collect(), max_amount }
    }

    /// Creates a manager from application configuration.
    #[must_use]
    pub fn from_config(config: &crate::config::AppConfig) -> Self {
        Self::new(config.networks.allowed.iter().cloned(), config.validation.max_amount)
    }

    /// Validates an EVM wallet address: `0x` followed by exactly 40 hex characters.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] describing what is wrong with the input:
    /// empty, missing prefix, wrong length, or non-hex characters.
    pub fn validate_address(&self, addr: &str) -> Result<(), ValidationError> {
        if addr.is_empty() {
            return Err(ValidationError::Missing("address"));
        }

        let Some(hex_part) = addr.strip_prefix("0x") else {
            return Err(ValidationError::InvalidAddress(format!("missing 0x prefix: {addr}")));
        };

        if hex_part.len() != 40 {
            return Err(ValidationError::InvalidAddress(format!(
                "expected 40 hex characters, got {}",
                hex_part.len()
            )));
        }

        if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ValidationError::InvalidAddress(
                "non-hex characters in address".to_string(),
            ));
        }

        Ok(())
    }

    /// Parses a decimal amount string and checks range constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidAmount`] for empty, non-numeric,
    /// NaN/infinite, zero, negative, or over-ceiling values.
    pub fn validate_amount(&self, input: &str) -> Result<f64, ValidationError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::InvalidAmount("amount is empty".to_string()));
        }

        let value: f64 = trimmed
            .parse()
            .map_err(|_| ValidationError::InvalidAmount(format!("not a number: {trimmed}")))?;

        if !value.is_finite() {
            return Err(ValidationError::InvalidAmount("amount must be finite".to_string()));
        }
        if value <= 0.0 {
            return Err(ValidationError::InvalidAmount("amount must be positive".to_string()));
        }
        if value > self.max_amount {
            return Err(ValidationError::InvalidAmount(format!(
                "amount too large: {value} exceeds ceiling {}",
                self.max_amount
            )));
        }

        Ok(value)
    }

    /// Checks a network id against the configured allow-list.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnsupportedNetwork`] for anything not on the list.
    pub fn validate_network(&self, input: &str) -> Result<(), ValidationError> {
        if input.is_empty() {
            return Err(ValidationError::Missing("network"));
        }
        if !self.allowed_networks.contains(input) {
            return Err(ValidationError::UnsupportedNetwork(input.to_string()));
        }
        Ok(())
    }

    /// Returns the configured network allow-list.
    #[must_use]
    pub fn allowed_networks(&self) -> Vec<String> {
        self.allowed_networks.iter().cloned().collect()
    }

    /// Validates a JSON payload against a schema, collecting all field errors.
    ///
    /// Presence is checked first; present fields then run the semantic
    /// validator for their [`FieldKind`]. Unlike the per-field validators this
    /// does not stop at the first failure.
    ///
    /// # Errors
    ///
    /// Returns every [`FieldError`] found, in schema field order.
    pub fn validate_request(
        &self,
        payload: &Value,
        schema: &RequestSchema,
    ) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();

        for field in schema.required {
            let value = payload.get(field.name);
            let Some(value) = value else {
                errors.push(FieldError {
                    field: field.name.to_string(),
                    message: format!("{} is required", field.name),
                });
                continue;
            };

            let result = match field.kind {
                FieldKind::Address => value
                    .as_str()
                    .ok_or_else(|| ValidationError::InvalidField {
                        field: field.name.to_string(),
                        message: "must be a string".to_string(),
                    })
                    .and_then(|s| self.validate_address(s)),
                FieldKind::Amount => match value {
                    Value::String(s) => self.validate_amount(s).map(|_| ()),
                    Value::Number(n) => {
                        let rendered = n.to_string();
                        self.validate_amount(&rendered).map(|_| ())
                    }
                    _ => Err(ValidationError::InvalidField {
                        field: field.name.to_string(),
                        message: "must be a number or numeric string".to_string(),
                    }),
                },
                FieldKind::Network => value
                    .as_str()
                    .ok_or_else(|| ValidationError::InvalidField {
                        field: field.name.to_string(),
                        message: "must be a string".to_string(),
                    })
                    .and_then(|s| self.validate_network(s)),
                FieldKind::Text => match value.as_str() {
                    Some(s) if !s.trim().is_empty() => Ok(()),
                    _ => Err(ValidationError::InvalidField {
                        field: field.name.to_string(),
                        message: "must be non-empty text".to_string(),
                    }),
                },
            };

            if let Err(err) = result {
                errors.push(FieldError { field: field.name.to_string(), message: err.to_string() });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Strips known script/markup injection vectors from free text.
    ///
    /// Removes `<script>...</script>` blocks, `javascript:` URI schemes, and
    /// inline `on*=` event-handler attributes, then bounds the length. Benign
    /// text passes through untouched.
    ///
    /// Best-effort only: this is defense for display strings, not a full
    /// sanitizer, and makes no guarantee about arbitrary injection patterns
    /// (e.g. SQL).
    #[must_use]
    pub fn sanitize_string(&self, input: &str) -> String {
        let mut out = strip_tag_blocks(input, "<script", "</script>");
        out = strip_case_insensitive(&out, "javascript:");
        out = strip_event_handlers(&out);

        let mut out = out.trim().to_string();
        if out.len() > MAX_TEXT_LEN {
            // Truncate on a char boundary.
            let mut cut = MAX_TEXT_LEN;
            while !out.is_char_boundary(cut) {
                cut -= 1;
            }
            out.truncate(cut);
        }
        out
    }
}

/// Removes every `open ... close` block, case-insensitively.
///
/// If an opening marker has no matching close, the remainder of the string is
/// dropped (an unterminated script block is never safe to keep).
fn strip_tag_blocks(input: &str, open: &str, close: &str) -> String {
    let lower = input.to_ascii_lowercase();
    let mut out = String::with_capacity(input.len());
    let mut pos = 0;

    while let Some(start) = lower[pos..].find(open) {
        let start = pos + start;
        out.push_str(&input[pos..start]);
        match lower[start..].find(close) {
            Some(end) => pos = start + end + close.len(),
            None => return out,
        }
    }
    out.push_str(&input[pos..]);
    out
}

/// Removes every occurrence of `needle`, case-insensitively.
fn strip_case_insensitive(input: &str, needle: &str) -> String {
    let lower = input.to_ascii_lowercase();
    let mut out = String::with_capacity(input.len());
    let mut pos = 0;

    while let Some(start) = lower[pos..].find(needle) {
        let start = pos + start;
        out.push_str(&input[pos..start]);
        pos = start + needle.len();
    }
    out.push_str(&input[pos..]);
    out
}

/// Removes inline `onXxx=` event-handler attributes (e.g. `onerror=`, `onclick=`).
fn strip_event_handlers(input: &str) -> String {
    let lower = input.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    let mut out = String::with_capacity(input.len());
    let mut pos = 0;

    while let Some(start) = lower[pos..].find("on") {
        let start = pos + start;
        // Must look like an attribute: "on" + letters + '='.
        let mut i = start + 2;
        while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
            i += 1;
        }
        let is_handler = i > start + 2 && i < bytes.len() && bytes[i] == b'=';
        if is_handler {
            out.push_str(&input[pos..start]);
            pos = i + 1;
        } else {
            out.push_str(&input[pos..start + 2]);
            pos = start + 2;
        }
    }
    out.push_str(&input[pos..]);
    out
}
