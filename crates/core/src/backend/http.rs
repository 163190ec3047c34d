use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::CoreError;
use crate::models::metrics::{FeeTotals, FundingTotal, Period, PeriodTotals};
use crate::models::portfolio::{NewPortfolio, Portfolio, PortfolioUpdate};
use crate::models::serde_helpers::flexible_f64_or_zero;
use crate::models::series::{BtcPoint, EquityPoint, FundingPoint};
use crate::models::session::{AuthGrant, User};
use crate::models::settings::ClientSettings;
use crate::services::fee_service::FeeService;

use super::envelope::{self, SeriesBody};
use super::traits::{DashboardBackend, SeriesQuery};

/// REST backend reached over HTTP.
///
/// - **Auth**: `POST /api/auth/login`, `POST /api/auth/register`, `GET /api/auth/me`
/// - **Portfolios**: `/api/credentials[/{id}[/sync]]`
/// - **Series**: `/api/equity/daily`, `/api/funding/daily`, `/api/funding/summary`,
///   `/api/fees/summary`, `/api/fees/period`, `/api/btc/daily`
///
/// No client-side timeout and no retries: a failed call is reported once and
/// the caller decides whether to try again.
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(settings: &ClientSettings) -> Self {
        Self::with_client(Client::new(), settings)
    }

    pub fn with_client(client: Client, settings: &ClientSettings) -> Self {
        Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str, token: Option<&str>) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{path}", self.base_url));
        match token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send and classify the response. `authenticated` decides what a 401
    /// means: an expired session, or (on login/register) bad credentials.
    async fn send(&self, builder: RequestBuilder, authenticated: bool) -> Result<Value, CoreError> {
        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;
        let body: Option<Value> = if text.trim().is_empty() {
            Some(Value::Null)
        } else {
            serde_json::from_str(&text).ok()
        };

        if status == StatusCode::UNAUTHORIZED && authenticated {
            return Err(CoreError::SessionExpired);
        }
        if !status.is_success() {
            let message = body.as_ref().and_then(envelope::error_message);
            return Err(CoreError::remote(Some(status.as_u16()), message));
        }

        let body = body.ok_or_else(|| {
            CoreError::Deserialization(format!("response from {} is not JSON", self.name()))
        })?;
        if envelope::is_failure(&body) {
            return Err(CoreError::remote(
                Some(status.as_u16()),
                envelope::error_message(&body),
            ));
        }
        Ok(body)
    }

    async fn authenticate(
        &self,
        path: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthGrant, CoreError> {
        let builder = self
            .request(Method::POST, path, None)
            .json(&json!({ "email": email, "password": password }));
        let body = self.send(builder, false).await?;
        envelope::unwrap_data(body)
    }

    async fn get_series<T>(
        &self,
        path: &str,
        token: &str,
        query: &SeriesQuery,
    ) -> Result<Vec<T>, CoreError>
    where
        T: serde::de::DeserializeOwned,
    {
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(id) = &query.portfolio_id {
            params.push(("credential_id", id.clone()));
        }
        if let Some(days) = query.period.lookback_days() {
            params.push(("days", days.to_string()));
        }

        let builder = self.request(Method::GET, path, Some(token)).query(&params);
        let body = self.send(builder, true).await?;
        if body.is_null() {
            return Ok(Vec::new());
        }
        let series: Option<SeriesBody<T>> = envelope::unwrap_data(body)?;
        Ok(series.map(SeriesBody::into_points).unwrap_or_default())
    }

    fn scope(portfolio_id: Option<&str>) -> Vec<(&'static str, String)> {
        portfolio_id
            .map(|id| vec![("credential_id", id.to_string())])
            .unwrap_or_default()
    }
}

// ── Backend payload types ───────────────────────────────────────────

#[derive(Deserialize)]
struct FeeSummaryBody {
    maker_total: String,
    taker_total: String,
    #[serde(default)]
    maker_percent: f64,
    #[serde(default)]
    taker_percent: f64,
}

#[derive(Deserialize)]
struct PeriodFeesBody {
    #[serde(default, alias = "total", deserialize_with = "flexible_f64_or_zero")]
    total_fees: f64,
}

#[derive(Deserialize)]
struct SyncBody {
    #[serde(default, alias = "lastSyncAt")]
    last_sync_at: Option<DateTime<Utc>>,
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl DashboardBackend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn login(&self, email: &str, password: &str) -> Result<AuthGrant, CoreError> {
        self.authenticate("/api/auth/login", email, password).await
    }

    async fn register(&self, email: &str, password: &str) -> Result<AuthGrant, CoreError> {
        self.authenticate("/api/auth/register", email, password).await
    }

    async fn current_user(&self, token: &str) -> Result<User, CoreError> {
        let builder = self.request(Method::GET, "/api/auth/me", Some(token));
        let body = self.send(builder, true).await?;
        // `{data: {user: {...}}}` and `{data: {...}}` are both in use.
        let user = body
            .pointer("/data/user")
            .or_else(|| body.get("user"))
            .cloned();
        match user {
            Some(user) => serde_json::from_value(user).map_err(CoreError::from),
            None => envelope::unwrap_data(body),
        }
    }

    async fn list_portfolios(&self, token: &str) -> Result<Vec<Portfolio>, CoreError> {
        let builder = self.request(Method::GET, "/api/credentials", Some(token));
        let body = self.send(builder, true).await?;
        envelope::normalize_portfolio_list(body)
    }

    async fn create_portfolio(&self, token: &str, new: &NewPortfolio) -> Result<(), CoreError> {
        let builder = self
            .request(Method::POST, "/api/credentials", Some(token))
            .json(new);
        self.send(builder, true).await?;
        Ok(())
    }

    async fn update_portfolio(
        &self,
        token: &str,
        id: &str,
        update: &PortfolioUpdate,
    ) -> Result<(), CoreError> {
        let builder = self
            .request(Method::PATCH, &format!("/api/credentials/{id}"), Some(token))
            .json(update);
        self.send(builder, true).await?;
        Ok(())
    }

    async fn delete_portfolio(&self, token: &str, id: &str) -> Result<(), CoreError> {
        let builder = self.request(Method::DELETE, &format!("/api/credentials/{id}"), Some(token));
        self.send(builder, true).await?;
        Ok(())
    }

    async fn sync_portfolio(
        &self,
        token: &str,
        id: &str,
    ) -> Result<Option<DateTime<Utc>>, CoreError> {
        let builder = self.request(
            Method::POST,
            &format!("/api/credentials/{id}/sync"),
            Some(token),
        );
        let body = self.send(builder, true).await?;
        // The timestamp is informational; an unexpected body still means
        // the sync was accepted.
        let synced = envelope::unwrap_data::<Option<SyncBody>>(body).ok().flatten();
        Ok(synced.and_then(|s| s.last_sync_at))
    }

    async fn equity_series(
        &self,
        token: &str,
        query: &SeriesQuery,
    ) -> Result<Vec<EquityPoint>, CoreError> {
        self.get_series("/api/equity/daily", token, query).await
    }

    async fn funding_series(
        &self,
        token: &str,
        query: &SeriesQuery,
    ) -> Result<Vec<FundingPoint>, CoreError> {
        self.get_series("/api/funding/daily", token, query).await
    }

    async fn funding_totals(
        &self,
        token: &str,
        portfolio_id: Option<&str>,
    ) -> Result<PeriodTotals<FundingTotal>, CoreError> {
        let builder = self
            .request(Method::GET, "/api/funding/summary", Some(token))
            .query(&Self::scope(portfolio_id));
        let body = self.send(builder, true).await?;
        envelope::unwrap_data(body)
    }

    async fn fee_summary(
        &self,
        token: &str,
        portfolio_id: Option<&str>,
    ) -> Result<FeeTotals, CoreError> {
        let builder = self
            .request(Method::GET, "/api/fees/summary", Some(token))
            .query(&Self::scope(portfolio_id));
        let body = self.send(builder, true).await?;
        let summary: FeeSummaryBody = envelope::unwrap_data(body)?;
        FeeService::new().parse_totals(
            &summary.maker_total,
            &summary.taker_total,
            summary.maker_percent,
            summary.taker_percent,
        )
    }

    async fn period_fees(
        &self,
        token: &str,
        portfolio_id: Option<&str>,
        period: Period,
    ) -> Result<f64, CoreError> {
        let mut params = Self::scope(portfolio_id);
        params.push(("period", period.as_str().to_string()));
        let builder = self
            .request(Method::GET, "/api/fees/period", Some(token))
            .query(&params);
        let body = self.send(builder, true).await?;
        let fees: PeriodFeesBody = envelope::unwrap_data(body)?;
        Ok(fees.total_fees)
    }

    async fn btc_series(
        &self,
        token: &str,
        query: &SeriesQuery,
    ) -> Result<Vec<BtcPoint>, CoreError> {
        self.get_series("/api/btc/daily", token, query).await
    }
}
