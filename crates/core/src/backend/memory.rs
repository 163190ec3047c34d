use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::metrics::{FeeTotals, FundingTotal, Period, PeriodTotals};
use crate::models::portfolio::{NewPortfolio, Portfolio, PortfolioUpdate};
use crate::models::series::{BtcPoint, EquityPoint, FundingPoint};
use crate::models::session::{AuthGrant, User};

use super::traits::{DashboardBackend, SeriesQuery};

/// Series and fee data served for one portfolio.
#[derive(Debug, Clone, Default)]
pub struct PortfolioData {
    pub equity: Vec<EquityPoint>,
    pub funding: Vec<FundingPoint>,
    pub funding_totals: PeriodTotals<FundingTotal>,
    pub fees: FeeTotals,
    pub period_fees: HashMap<Period, f64>,
    pub btc: Vec<BtcPoint>,
}

#[derive(Debug)]
struct Account {
    user: User,
    password: String,
    portfolios: Vec<Portfolio>,
}

#[derive(Debug, Default)]
struct MemoryState {
    /// email → account
    accounts: HashMap<String, Account>,
    /// token → email
    tokens: HashMap<String, String>,
    /// portfolio id → data
    data: HashMap<String, PortfolioData>,
}

/// Backend that keeps everything in process memory.
///
/// Behaves like the real service (ids and tokens are assigned here, never by
/// the caller; unknown tokens are rejected as expired sessions), which makes
/// it suitable for offline demos and for exercising the stores end to end.
/// Aggregate (all-portfolio) queries return the first portfolio's series;
/// summing curves across accounts is the real backend's job.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    state: Mutex<MemoryState>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Revoke a token, as if it had expired server-side.
    pub fn revoke_token(&self, token: &str) {
        let mut state = self.lock();
        state.tokens.remove(token);
    }

    /// Attach data to an existing portfolio.
    pub fn set_data(&self, portfolio_id: &str, data: PortfolioData) {
        let mut state = self.lock();
        state.data.insert(portfolio_id.to_string(), data);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn issue_token(state: &mut MemoryState, email: &str) -> String {
        let token = Uuid::new_v4().to_string();
        state.tokens.insert(token.clone(), email.to_string());
        token
    }

    fn email_for(state: &MemoryState, token: &str) -> Result<String, CoreError> {
        state
            .tokens
            .get(token)
            .cloned()
            .ok_or(CoreError::SessionExpired)
    }

    fn not_found(id: &str) -> CoreError {
        CoreError::remote(Some(404), Some(format!("Credential {id} not found")))
    }

    /// Data for the query scope, after checking the caller owns it.
    fn scoped_data(
        &self,
        token: &str,
        portfolio_id: Option<&str>,
    ) -> Result<Option<PortfolioData>, CoreError> {
        let state = self.lock();
        let email = Self::email_for(&state, token)?;
        let portfolios = state
            .accounts
            .get(&email)
            .map(|a| a.portfolios.as_slice())
            .unwrap_or_default();

        let id = match portfolio_id {
            Some(id) => {
                if !portfolios.iter().any(|p| p.id == id) {
                    return Err(Self::not_found(id));
                }
                id.to_string()
            }
            None => match portfolios.first() {
                Some(first) => first.id.clone(),
                None => return Ok(None),
            },
        };
        Ok(state.data.get(&id).cloned())
    }
}

/// Keep only points inside the lookback window ending at the series' last day.
fn within_period<T: Copy>(
    points: &[T],
    period: Period,
    date: impl Fn(&T) -> chrono::NaiveDate,
) -> Vec<T> {
    let (Some(days), Some(last)) = (period.lookback_days(), points.last()) else {
        return points.to_vec();
    };
    let end = date(last);
    let start = end - chrono::Duration::days(i64::from(days) - 1);
    points.iter().copied().filter(|p| date(p) >= start).collect()
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl DashboardBackend for InMemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn login(&self, email: &str, password: &str) -> Result<AuthGrant, CoreError> {
        let mut state = self.lock();
        let user = match state.accounts.get(email) {
            Some(account) if account.password == password => account.user.clone(),
            _ => {
                return Err(CoreError::remote(
                    Some(401),
                    Some("Invalid email or password".into()),
                ))
            }
        };
        let token = Self::issue_token(&mut state, email);
        Ok(AuthGrant { token, user })
    }

    async fn register(&self, email: &str, password: &str) -> Result<AuthGrant, CoreError> {
        let mut state = self.lock();
        if state.accounts.contains_key(email) {
            return Err(CoreError::remote(
                Some(409),
                Some("Email already registered".into()),
            ));
        }
        let user = User {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
        };
        state.accounts.insert(
            email.to_string(),
            Account {
                user: user.clone(),
                password: password.to_string(),
                portfolios: Vec::new(),
            },
        );
        let token = Self::issue_token(&mut state, email);
        Ok(AuthGrant { token, user })
    }

    async fn current_user(&self, token: &str) -> Result<User, CoreError> {
        let state = self.lock();
        let email = Self::email_for(&state, token)?;
        state
            .accounts
            .get(&email)
            .map(|a| a.user.clone())
            .ok_or(CoreError::SessionExpired)
    }

    async fn list_portfolios(&self, token: &str) -> Result<Vec<Portfolio>, CoreError> {
        let state = self.lock();
        let email = Self::email_for(&state, token)?;
        Ok(state
            .accounts
            .get(&email)
            .map(|a| a.portfolios.clone())
            .unwrap_or_default())
    }

    async fn create_portfolio(&self, token: &str, new: &NewPortfolio) -> Result<(), CoreError> {
        let mut state = self.lock();
        let email = Self::email_for(&state, token)?;
        let account = state
            .accounts
            .get_mut(&email)
            .ok_or(CoreError::SessionExpired)?;
        let masked = mask_key(&new.api_key);
        let duplicate = account.portfolios.iter().any(|p| {
            p.exchange == new.exchange && p.masked_api_key.as_deref() == Some(masked.as_str())
        });
        if duplicate {
            return Err(CoreError::remote(
                Some(409),
                Some("This API key is already linked".into()),
            ));
        }
        account.portfolios.push(Portfolio {
            id: Uuid::new_v4().to_string(),
            label: new.label.clone(),
            exchange: new.exchange.clone(),
            is_active: true,
            last_sync_at: None,
            masked_api_key: Some(masked),
        });
        Ok(())
    }

    async fn update_portfolio(
        &self,
        token: &str,
        id: &str,
        update: &PortfolioUpdate,
    ) -> Result<(), CoreError> {
        let mut state = self.lock();
        let email = Self::email_for(&state, token)?;
        let portfolio = state
            .accounts
            .get_mut(&email)
            .and_then(|a| a.portfolios.iter_mut().find(|p| p.id == id))
            .ok_or_else(|| Self::not_found(id))?;
        if let Some(label) = &update.label {
            portfolio.label = label.clone();
        }
        Ok(())
    }

    async fn delete_portfolio(&self, token: &str, id: &str) -> Result<(), CoreError> {
        let mut state = self.lock();
        let email = Self::email_for(&state, token)?;
        let account = state
            .accounts
            .get_mut(&email)
            .ok_or(CoreError::SessionExpired)?;
        let before = account.portfolios.len();
        account.portfolios.retain(|p| p.id != id);
        if account.portfolios.len() == before {
            return Err(Self::not_found(id));
        }
        state.data.remove(id);
        Ok(())
    }

    async fn sync_portfolio(
        &self,
        token: &str,
        id: &str,
    ) -> Result<Option<DateTime<Utc>>, CoreError> {
        let mut state = self.lock();
        let email = Self::email_for(&state, token)?;
        let portfolio = state
            .accounts
            .get_mut(&email)
            .and_then(|a| a.portfolios.iter_mut().find(|p| p.id == id))
            .ok_or_else(|| Self::not_found(id))?;
        let now = Utc::now();
        portfolio.record_sync(now);
        Ok(Some(now))
    }

    async fn equity_series(
        &self,
        token: &str,
        query: &SeriesQuery,
    ) -> Result<Vec<EquityPoint>, CoreError> {
        let data = self.scoped_data(token, query.portfolio_id.as_deref())?;
        Ok(data
            .map(|d| within_period(&d.equity, query.period, |p| p.date))
            .unwrap_or_default())
    }

    async fn funding_series(
        &self,
        token: &str,
        query: &SeriesQuery,
    ) -> Result<Vec<FundingPoint>, CoreError> {
        let data = self.scoped_data(token, query.portfolio_id.as_deref())?;
        Ok(data
            .map(|d| within_period(&d.funding, query.period, |p| p.date))
            .unwrap_or_default())
    }

    async fn funding_totals(
        &self,
        token: &str,
        portfolio_id: Option<&str>,
    ) -> Result<PeriodTotals<FundingTotal>, CoreError> {
        let data = self.scoped_data(token, portfolio_id)?;
        Ok(data.map(|d| d.funding_totals).unwrap_or_default())
    }

    async fn fee_summary(
        &self,
        token: &str,
        portfolio_id: Option<&str>,
    ) -> Result<FeeTotals, CoreError> {
        let data = self.scoped_data(token, portfolio_id)?;
        Ok(data.map(|d| d.fees).unwrap_or_default())
    }

    async fn period_fees(
        &self,
        token: &str,
        portfolio_id: Option<&str>,
        period: Period,
    ) -> Result<f64, CoreError> {
        let data = self.scoped_data(token, portfolio_id)?;
        Ok(data
            .and_then(|d| d.period_fees.get(&period).copied())
            .unwrap_or(0.0))
    }

    async fn btc_series(
        &self,
        token: &str,
        query: &SeriesQuery,
    ) -> Result<Vec<BtcPoint>, CoreError> {
        let data = self.scoped_data(token, query.portfolio_id.as_deref())?;
        Ok(data
            .map(|d| within_period(&d.btc, query.period, |p| p.date))
            .unwrap_or_default())
    }
}

/// "abcd1234wxyz" → "abcd****wxyz"; short keys are fully masked.
fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}****{tail}")
}
