use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::CoreError;
use crate::models::metrics::{FeeTotals, FundingTotal, Period, PeriodTotals};
use crate::models::portfolio::{NewPortfolio, Portfolio, PortfolioUpdate};
use crate::models::series::{BtcPoint, EquityPoint, FundingPoint};
use crate::models::session::{AuthGrant, User};

/// What a data request is scoped to: one portfolio or all of them, over a
/// lookback window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesQuery {
    /// `None` for the aggregate view across every portfolio.
    pub portfolio_id: Option<String>,
    pub period: Period,
}

impl SeriesQuery {
    pub fn new(portfolio_id: Option<String>, period: Period) -> Self {
        Self {
            portfolio_id,
            period,
        }
    }
}

/// Abstraction over the dashboard backend.
///
/// The HTTP implementation talks to the real service; tests and offline
/// demos plug in their own. Authenticated calls receive the bearer token
/// explicitly: callers check for its presence before any I/O happens.
///
/// Error contract: an unauthorized response on an authenticated call is
/// `SessionExpired`; any other rejection is `Remote` carrying the backend's
/// message; transport failures are `Network`.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait DashboardBackend: Send + Sync {
    /// Human-readable name of this backend (for logs).
    fn name(&self) -> &str;

    // ── Auth ────────────────────────────────────────────────────────

    async fn login(&self, email: &str, password: &str) -> Result<AuthGrant, CoreError>;

    async fn register(&self, email: &str, password: &str) -> Result<AuthGrant, CoreError>;

    async fn current_user(&self, token: &str) -> Result<User, CoreError>;

    // ── Portfolios ──────────────────────────────────────────────────

    /// Every portfolio of the signed-in user, in server order.
    async fn list_portfolios(&self, token: &str) -> Result<Vec<Portfolio>, CoreError>;

    async fn create_portfolio(&self, token: &str, new: &NewPortfolio) -> Result<(), CoreError>;

    async fn update_portfolio(
        &self,
        token: &str,
        id: &str,
        update: &PortfolioUpdate,
    ) -> Result<(), CoreError>;

    async fn delete_portfolio(&self, token: &str, id: &str) -> Result<(), CoreError>;

    /// Ask the backend to pull fresh data from the exchange. Returns the
    /// sync timestamp when the backend reports one.
    async fn sync_portfolio(
        &self,
        token: &str,
        id: &str,
    ) -> Result<Option<DateTime<Utc>>, CoreError>;

    // ── Series ──────────────────────────────────────────────────────

    /// Daily equity, ascending by date.
    async fn equity_series(
        &self,
        token: &str,
        query: &SeriesQuery,
    ) -> Result<Vec<EquityPoint>, CoreError>;

    /// Daily funding, ascending by date.
    async fn funding_series(
        &self,
        token: &str,
        query: &SeriesQuery,
    ) -> Result<Vec<FundingPoint>, CoreError>;

    async fn funding_totals(
        &self,
        token: &str,
        portfolio_id: Option<&str>,
    ) -> Result<PeriodTotals<FundingTotal>, CoreError>;

    /// Lifetime maker/taker fee totals.
    async fn fee_summary(
        &self,
        token: &str,
        portfolio_id: Option<&str>,
    ) -> Result<FeeTotals, CoreError>;

    /// Total fees paid within `period`.
    async fn period_fees(
        &self,
        token: &str,
        portfolio_id: Option<&str>,
        period: Period,
    ) -> Result<f64, CoreError>;

    /// Daily BTC holdings, ascending by date.
    async fn btc_series(
        &self,
        token: &str,
        query: &SeriesQuery,
    ) -> Result<Vec<BtcPoint>, CoreError>;
}
