//! Client side of the external source of truth
//!
//! The node is treated as an opaque request/response service: one query per
//! row, answered with a status and a value. Timeouts, transport errors,
//! malformed payloads, and non-success statuses all surface as
//! [`OracleError`]; callers decide that an error means "skip this row".

mod http;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde_json::Value;
use std::str::FromStr;
use thiserror::Error;

pub use http::HttpOracle;

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("Oracle transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Oracle returned status '{status}': {detail}")]
    Status { status: String, detail: String },

    #[error("Malformed oracle response: {0}")]
    Malformed(String),

    #[error("Invalid module name '{0}'")]
    InvalidModule(String),
}

/// One logical oracle call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleQuery {
    pub chain: String,
    pub code: String,
}

impl OracleQuery {
    /// Balance lookup for `account` in a fungible `module` on `chain`.
    ///
    /// `module` is spliced into the expression as-is, so anything that is
    /// not a plain module name is rejected.
    pub fn balance(module: &str, account: &str, chain: &str) -> Result<Self, OracleError> {
        if !is_module_name(module) {
            return Err(OracleError::InvalidModule(module.to_string()));
        }

        Ok(Self {
            chain: chain.to_string(),
            code: format!("({}.get-balance \"{}\")", module, escape_string(account)),
        })
    }
}

/// `[A-Za-z0-9_.-]+`, without leading or trailing dots
pub fn is_module_name(module: &str) -> bool {
    !module.is_empty()
        && !module.starts_with('.')
        && !module.ends_with('.')
        && module
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

fn escape_string(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Queries the ground truth for a single scalar value
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn query(&self, query: &OracleQuery) -> Result<BigDecimal, OracleError>;
}

/// Normalize a result payload to a decimal.
///
/// Accepted shapes: a JSON number, a numeric string, `{"decimal": "<n>"}` and
/// `{"int": <n>}`.
pub fn normalize_value(value: &Value) -> Result<BigDecimal, OracleError> {
    match value {
        Value::Number(n) => parse_decimal(&n.to_string()),
        Value::String(s) => parse_decimal(s),
        Value::Object(map) => match (map.get("decimal"), map.get("int")) {
            (Some(inner), None) | (None, Some(inner)) if !inner.is_object() => normalize_value(inner),
            _ => Err(OracleError::Malformed(format!("unexpected object: {}", value))),
        },
        other => Err(OracleError::Malformed(format!("unexpected value: {}", other))),
    }
}

fn parse_decimal(raw: &str) -> Result<BigDecimal, OracleError> {
    BigDecimal::from_str(raw.trim())
        .map_err(|e| OracleError::Malformed(format!("'{}' is not a decimal: {}", raw, e)))
}
