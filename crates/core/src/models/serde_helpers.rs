//! Lenient deserializers for backend payloads.
//!
//! The backend transports money as decimal strings in some endpoints and as
//! JSON numbers in others, and ids may be numeric or string. These helpers
//! accept either form.

use serde::{de, Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    Text(String),
}

/// Parse a decimal string (e.g. `"30.50"`) into `f64`.
pub fn parse_decimal(raw: &str) -> Result<f64, String> {
    let trimmed = raw.trim();
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("invalid decimal value '{trimmed}'"))
}

/// `f64` from a JSON number or a decimal string.
pub fn flexible_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(v) => Ok(v),
        NumberOrString::Text(s) => parse_decimal(&s).map_err(de::Error::custom),
    }
}

/// Like [`flexible_f64`] but `null`/missing map to `0.0`.
pub fn flexible_f64_or_zero<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<NumberOrString>::deserialize(deserializer)? {
        None => Ok(0.0),
        Some(NumberOrString::Number(v)) => Ok(v),
        Some(NumberOrString::Text(s)) => parse_decimal(&s).map_err(de::Error::custom),
    }
}

/// Opaque id from either a JSON string or a JSON integer.
pub fn flexible_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Int(i64),
        Text(String),
    }

    match RawId::deserialize(deserializer)? {
        RawId::Int(v) => Ok(v.to_string()),
        RawId::Text(s) if s.trim().is_empty() => Err(de::Error::custom("empty id")),
        RawId::Text(s) => Ok(s),
    }
}
