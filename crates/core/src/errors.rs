use thiserror::Error;

/// Unified error type for the entire exchange-dashboard-core library.
/// Every fallible public function returns `Result<T, CoreError>`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    // ── Local input ─────────────────────────────────────────────────
    #[error("Validation failed: {0}")]
    ValidationError(String),

    // ── Session ─────────────────────────────────────────────────────
    #[error("Not signed in")]
    Unauthenticated,

    #[error("Session expired — please sign in again")]
    SessionExpired,

    // ── API / Network ───────────────────────────────────────────────
    #[error("{message}")]
    Remote {
        status: Option<u16>,
        message: String,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // ── Persisted state ─────────────────────────────────────────────
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Shown when the backend rejects a call without saying why.
pub const GENERIC_REMOTE_MESSAGE: &str = "Request failed";

impl CoreError {
    /// Build a `Remote` error, falling back to a generic message when the
    /// backend payload carried none.
    pub fn remote(status: Option<u16>, message: Option<String>) -> Self {
        let message = message
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| GENERIC_REMOTE_MESSAGE.to_string());
        CoreError::Remote { status, message }
    }
}

// ── Conversion helpers (From impls) ─────────────────────────────────

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Deserialization(e.to_string())
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        // reqwest errors embed the full URL; drop the query string so scoped
        // ids and paging params don't end up in user-facing messages.
        let msg = e.to_string();
        let sanitized = if let Some(idx) = msg.find('?') {
            format!("{}?<query redacted>", &msg[..idx])
        } else {
            msg
        };
        if e.is_decode() {
            CoreError::Deserialization(sanitized)
        } else {
            CoreError::Network(sanitized)
        }
    }
}
