use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::serde_helpers::flexible_id;

/// One linked exchange credential set, as reported by the backend.
///
/// The real API secret never leaves the backend; only a masked key is
/// carried for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    /// Backend-assigned identifier. Immutable once created.
    #[serde(deserialize_with = "flexible_id")]
    pub id: String,

    /// User-chosen display name
    #[serde(default, alias = "name")]
    pub label: String,

    /// Name of the linked exchange (e.g. "binance", "bybit")
    #[serde(default)]
    pub exchange: String,

    /// Backend liveness flag
    #[serde(default = "default_true", alias = "isActive")]
    pub is_active: bool,

    /// Last successful data sync, if any
    #[serde(default, alias = "lastSyncAt")]
    pub last_sync_at: Option<DateTime<Utc>>,

    /// Obfuscated credential identifier, e.g. "abcd****wxyz"
    #[serde(default, alias = "maskedApiKey", alias = "api_key_masked")]
    pub masked_api_key: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Portfolio {
    /// Advance `last_sync_at` to `at` if it is newer. Returns whether it moved.
    pub fn record_sync(&mut self, at: DateTime<Utc>) -> bool {
        match self.last_sync_at {
            Some(current) if current >= at => false,
            _ => {
                self.last_sync_at = Some(at);
                true
            }
        }
    }
}

/// Input for registering a new portfolio.
#[derive(Clone, PartialEq, Serialize)]
pub struct NewPortfolio {
    pub label: String,
    pub api_key: String,
    pub secret: String,
    pub exchange: String,
}

impl NewPortfolio {
    pub fn new(
        label: impl Into<String>,
        api_key: impl Into<String>,
        secret: impl Into<String>,
        exchange: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            api_key: api_key.into(),
            secret: secret.into(),
            exchange: exchange.into(),
        }
    }
}

// Hand-written so secrets never end up in logs.
impl std::fmt::Debug for NewPortfolio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewPortfolio")
            .field("label", &self.label)
            .field("exchange", &self.exchange)
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Partial update. Only the label is mutable.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PortfolioUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl PortfolioUpdate {
    pub fn label(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
        }
    }
}

/// Which portfolio (or all of them) currently drives the displayed data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActiveSelection {
    /// Nothing chosen. With an empty registry this means "disconnected".
    #[default]
    Unset,
    /// Aggregate view across every portfolio.
    All,
    /// A single portfolio by id.
    Portfolio(String),
}

impl ActiveSelection {
    /// The selected id, if a single portfolio is selected.
    pub fn id(&self) -> Option<&str> {
        match self {
            ActiveSelection::Portfolio(id) => Some(id),
            ActiveSelection::Unset | ActiveSelection::All => None,
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, ActiveSelection::All)
    }
}

impl std::fmt::Display for ActiveSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActiveSelection::Unset => write!(f, "none"),
            ActiveSelection::All => write!(f, "all"),
            ActiveSelection::Portfolio(id) => write!(f, "{id}"),
        }
    }
}

/// Result of a best-effort sync request. Never an error; callers may ignore it.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// The backend accepted the request. Carries the reported sync time, if any.
    Requested(Option<DateTime<Utc>>),
    /// The request failed; the message has already been logged.
    Failed(String),
}

impl SyncOutcome {
    pub fn is_requested(&self) -> bool {
        matches!(self, SyncOutcome::Requested(_))
    }
}
