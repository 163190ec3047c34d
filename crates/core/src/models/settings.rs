use serde::{Deserialize, Serialize};

/// Environment variable overriding the backend base URL.
pub const API_URL_ENV: &str = "DASHBOARD_API_URL";

/// Client configuration: where the backend lives and under which keys the
/// session survives a reload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Backend base URL, without trailing slash (e.g., "http://localhost:8000").
    pub base_url: String,

    /// Key/value store key holding the bearer token.
    pub token_key: String,

    /// Key/value store key holding the active portfolio id.
    pub active_portfolio_key: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            token_key: "auth_token".to_string(),
            active_portfolio_key: "active_portfolio_id".to_string(),
        }
    }
}

impl ClientSettings {
    /// Defaults, with `base_url` taken from `DASHBOARD_API_URL` when set.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Ok(url) = std::env::var(API_URL_ENV) {
            let url = url.trim();
            if !url.is_empty() {
                settings.base_url = url.to_string();
            }
        }
        settings.normalized()
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self.normalized()
    }

    fn normalized(mut self) -> Self {
        while self.base_url.ends_with('/') {
            self.base_url.pop();
        }
        self
    }
}
