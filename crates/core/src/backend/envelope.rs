//! Response envelope handling.
//!
//! The backend wraps payloads inconsistently. Everything shape-related is
//! resolved here so call sites only ever see plain Rust values.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::errors::CoreError;
use crate::models::portfolio::Portfolio;

/// Every shape the portfolio list endpoint has been seen to return.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PortfolioListEnvelope {
    /// `[ … ]`
    Bare(Vec<Portfolio>),
    /// `{ "data": [ … ] }`
    Data { data: Vec<Portfolio> },
    /// `{ "credentials": [ … ] }`
    Credentials { credentials: Vec<Portfolio> },
    /// `{ "data": { "credentials": [ … ] } }`
    NestedCredentials { data: CredentialsBody },
}

#[derive(Debug, Deserialize)]
pub struct CredentialsBody {
    pub credentials: Vec<Portfolio>,
}

impl PortfolioListEnvelope {
    pub fn into_portfolios(self) -> Vec<Portfolio> {
        match self {
            PortfolioListEnvelope::Bare(list)
            | PortfolioListEnvelope::Data { data: list }
            | PortfolioListEnvelope::Credentials { credentials: list }
            | PortfolioListEnvelope::NestedCredentials {
                data: CredentialsBody { credentials: list },
            } => list,
        }
    }
}

/// Normalize any accepted portfolio list payload to a flat list.
pub fn normalize_portfolio_list(body: Value) -> Result<Vec<Portfolio>, CoreError> {
    serde_json::from_value::<PortfolioListEnvelope>(body)
        .map(PortfolioListEnvelope::into_portfolios)
        .map_err(|_| {
            CoreError::Deserialization("unrecognized portfolio list response".to_string())
        })
}

/// A daily series either sent as a bare list or wrapped in an object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SeriesBody<T> {
    List(Vec<T>),
    Wrapped {
        #[serde(alias = "points", alias = "series")]
        daily: Vec<T>,
    },
}

impl<T> SeriesBody<T> {
    pub fn into_points(self) -> Vec<T> {
        match self {
            SeriesBody::List(points) | SeriesBody::Wrapped { daily: points } => points,
        }
    }
}

/// Pull a human-readable error message out of a response body, if there is one.
///
/// Looks at `error`, `message` and `detail`, accepting either a string or an
/// object with a `message` field.
pub fn error_message(body: &Value) -> Option<String> {
    ["error", "message", "detail"]
        .iter()
        .filter_map(|key| body.get(key))
        .find_map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Object(map) => map
                .get("message")
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string),
            _ => None,
        })
}

/// True when the body explicitly reports `"success": false`.
pub fn is_failure(body: &Value) -> bool {
    matches!(body.get("success"), Some(Value::Bool(false)))
}

/// Deserialize the `data` member of `{success, data}`, or the whole body when
/// it has no `data` member.
pub fn unwrap_data<T: DeserializeOwned>(body: Value) -> Result<T, CoreError> {
    let payload = match body {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    };
    serde_json::from_value(payload).map_err(CoreError::from)
}
