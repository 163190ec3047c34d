pub mod backend;
pub mod errors;
pub mod models;
pub mod services;
pub mod storage;

use std::collections::HashMap;
use std::sync::Arc;

use backend::http::HttpBackend;
use backend::traits::{DashboardBackend, SeriesQuery};
use models::{
    metrics::{
        BtcSummary, EquitySummary, FeeReport, FundingSummary, Period, SeriesKind, SeriesStatus,
    },
    portfolio::{ActiveSelection, NewPortfolio, Portfolio, PortfolioUpdate, SyncOutcome},
    session::{SessionState, User},
    settings::ClientSettings,
};
use services::{
    fee_service::FeeService,
    portfolio_registry::{PortfolioRegistry, RegistryState},
    series_service::{self, SeriesService},
    session_service::SessionStore,
};
use storage::kv::KeyValueStore;
use tokio::sync::watch;
use tracing::debug;

use errors::CoreError;

/// Main entry point for the dashboard core library.
///
/// Owns the session, the portfolio registry and the derivation services for
/// one application lifetime. Nothing is global: build one per app (or per
/// test) and hand it to the views. [`close`](Self::close) marks the end of
/// its lifetime; results of fetches still in flight are then discarded.
#[must_use]
pub struct Dashboard {
    settings: ClientSettings,
    backend: Arc<dyn DashboardBackend>,
    session: SessionStore,
    registry: PortfolioRegistry,
    series_service: SeriesService,
    fee_service: FeeService,
    series_status: watch::Sender<HashMap<SeriesKind, SeriesStatus>>,
}

impl std::fmt::Debug for Dashboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dashboard")
            .field("base_url", &self.settings.base_url)
            .field("backend", &self.backend.name())
            .field("authenticated", &self.session.is_authenticated())
            .field("portfolios", &self.registry.portfolios().len())
            .field("selection", &self.registry.active())
            .finish()
    }
}

impl Dashboard {
    /// Build against the HTTP backend described by `settings`.
    pub fn connect(settings: ClientSettings, storage: Arc<dyn KeyValueStore>) -> Self {
        let backend: Arc<dyn DashboardBackend> = Arc::new(HttpBackend::new(&settings));
        Self::new(settings, backend, storage)
    }

    /// Build against any backend. Persisted token and selection are restored
    /// from `storage`.
    pub fn new(
        settings: ClientSettings,
        backend: Arc<dyn DashboardBackend>,
        storage: Arc<dyn KeyValueStore>,
    ) -> Self {
        let session = SessionStore::new(
            Arc::clone(&backend),
            Arc::clone(&storage),
            settings.token_key.clone(),
        );
        let registry = PortfolioRegistry::new(
            session.clone(),
            Arc::clone(&backend),
            storage,
            settings.active_portfolio_key.clone(),
        );
        let (series_status, _) = watch::channel(HashMap::new());

        Self {
            settings,
            backend,
            session,
            registry,
            series_service: SeriesService::new(),
            fee_service: FeeService::new(),
            series_status,
        }
    }

    /// End of the owning context's lifetime.
    pub fn close(&self) {
        self.registry.close();
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    // ── Session ─────────────────────────────────────────────────────

    /// Sign in. A failed attempt, or signing in as someone else, drops the
    /// previous user's portfolios and series state.
    pub async fn login(&self, email: &str, password: &str) -> bool {
        let previous = self.session.user().map(|u| u.id);
        let ok = self.session.login(email, password).await;
        self.after_authentication(ok, previous);
        ok
    }

    pub async fn register(&self, email: &str, password: &str) -> bool {
        let previous = self.session.user().map(|u| u.id);
        let ok = self.session.register(email, password).await;
        self.after_authentication(ok, previous);
        ok
    }

    /// Sign out and forget everything scoped to the user.
    pub fn logout(&self) {
        self.session.logout();
        self.registry.reset();
        self.reset_series_status();
    }

    pub async fn fetch_identity(&self) -> Result<User, CoreError> {
        self.session
            .fetch_identity()
            .await
            .map_err(|e| self.observe(e))
    }

    pub fn session(&self) -> SessionState {
        self.session.snapshot()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    pub fn subscribe_session(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }

    // ── Portfolios ──────────────────────────────────────────────────

    pub async fn refresh_portfolios(&self) {
        self.registry.refresh().await;
    }

    pub async fn add_portfolio(&self, new: NewPortfolio) -> Result<(), CoreError> {
        self.registry.add(new).await.map_err(|e| self.observe(e))
    }

    pub async fn update_portfolio(
        &self,
        id: &str,
        update: PortfolioUpdate,
    ) -> Result<(), CoreError> {
        self.registry
            .update(id, update)
            .await
            .map_err(|e| self.observe(e))
    }

    pub async fn remove_portfolio(&self, id: &str) -> Result<(), CoreError> {
        self.registry.remove(id).await.map_err(|e| self.observe(e))
    }

    pub fn set_active_portfolio(&self, id: Option<&str>) {
        self.registry.set_active(id);
    }

    pub async fn sync_portfolio(&self, id: &str) -> SyncOutcome {
        self.registry.sync(id).await
    }

    pub fn portfolios(&self) -> Vec<Portfolio> {
        self.registry.portfolios()
    }

    pub fn active_selection(&self) -> ActiveSelection {
        self.registry.active()
    }

    pub fn active_portfolio(&self) -> Option<Portfolio> {
        self.registry.active_portfolio()
    }

    pub fn registry(&self) -> RegistryState {
        self.registry.snapshot()
    }

    pub fn subscribe_registry(&self) -> watch::Receiver<RegistryState> {
        self.registry.subscribe()
    }

    // ── Series ──────────────────────────────────────────────────────

    /// Equity curve statistics for the active selection.
    /// `Ok(None)` means there is nothing to show (no portfolio, or no data).
    pub async fn fetch_equity(&self, period: Period) -> Result<Option<EquitySummary>, CoreError> {
        self.begin(SeriesKind::Equity);
        let token = self.session.bearer().ok();
        let result = self.load_equity(period, token.as_deref()).await;
        self.finish(SeriesKind::Equity, token.as_deref(), result)
    }

    /// Daily and cumulative funding for the active selection, with the
    /// backend's totals for `period`.
    pub async fn fetch_funding(
        &self,
        period: Period,
    ) -> Result<Option<FundingSummary>, CoreError> {
        self.begin(SeriesKind::Funding);
        let token = self.session.bearer().ok();
        let result = self.load_funding(period, token.as_deref()).await;
        self.finish(SeriesKind::Funding, token.as_deref(), result)
    }

    /// Lifetime fee totals and the estimated maker/taker split for `period`.
    pub async fn fetch_fees(&self, period: Period) -> Result<Option<FeeReport>, CoreError> {
        self.begin(SeriesKind::Fees);
        let token = self.session.bearer().ok();
        let result = self.load_fees(period, token.as_deref()).await;
        self.finish(SeriesKind::Fees, token.as_deref(), result)
    }

    /// BTC accumulation statistics for the active selection.
    pub async fn fetch_btc(&self, period: Period) -> Result<Option<BtcSummary>, CoreError> {
        self.begin(SeriesKind::Btc);
        let token = self.session.bearer().ok();
        let result = self.load_btc(period, token.as_deref()).await;
        self.finish(SeriesKind::Btc, token.as_deref(), result)
    }

    /// Fees as a percentage of the period's absolute PnL (0 when PnL is 0).
    #[must_use]
    pub fn fee_impact_on_pnl(&self, total_fees: f64, pnl: f64) -> f64 {
        self.fee_service.impact_on_pnl(total_fees, pnl)
    }

    pub fn series_status(&self, kind: SeriesKind) -> SeriesStatus {
        self.series_status
            .borrow()
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    pub fn subscribe_series_status(&self) -> watch::Receiver<HashMap<SeriesKind, SeriesStatus>> {
        self.series_status.subscribe()
    }

    // ── Internal ────────────────────────────────────────────────────

    async fn load_equity(
        &self,
        period: Period,
        token: Option<&str>,
    ) -> Result<Option<EquitySummary>, CoreError> {
        let Some(query) = self.query(period) else {
            return Ok(None);
        };
        let token = token.ok_or(CoreError::Unauthenticated)?;
        let points = self.backend.equity_series(token, &query).await?;
        series_service::ensure_ascending(&points)?;
        Ok(self.series_service.equity_summary(&points))
    }

    async fn load_funding(
        &self,
        period: Period,
        token: Option<&str>,
    ) -> Result<Option<FundingSummary>, CoreError> {
        let Some(query) = self.query(period) else {
            return Ok(None);
        };
        let token = token.ok_or(CoreError::Unauthenticated)?;
        let points = self.backend.funding_series(token, &query).await?;
        series_service::ensure_ascending(&points)?;
        let totals = self
            .backend
            .funding_totals(token, query.portfolio_id.as_deref())
            .await?;
        Ok(self
            .series_service
            .funding_summary(&points, Some(*totals.get(period))))
    }

    async fn load_fees(
        &self,
        period: Period,
        token: Option<&str>,
    ) -> Result<Option<FeeReport>, CoreError> {
        let Some(query) = self.query(period) else {
            return Ok(None);
        };
        let token = token.ok_or(CoreError::Unauthenticated)?;
        let scope = query.portfolio_id.as_deref();
        let lifetime = self.backend.fee_summary(token, scope).await?;
        let period_total = self.backend.period_fees(token, scope, period).await?;
        Ok(Some(FeeReport {
            lifetime,
            breakdown: self.fee_service.blend(&lifetime, period, period_total),
        }))
    }

    async fn load_btc(
        &self,
        period: Period,
        token: Option<&str>,
    ) -> Result<Option<BtcSummary>, CoreError> {
        let Some(query) = self.query(period) else {
            return Ok(None);
        };
        let token = token.ok_or(CoreError::Unauthenticated)?;
        let points = self.backend.btc_series(token, &query).await?;
        series_service::ensure_ascending(&points)?;
        Ok(self.series_service.btc_summary(&points))
    }

    /// Scope for data requests, or `None` when no portfolio is selected.
    fn query(&self, period: Period) -> Option<SeriesQuery> {
        match self.registry.active() {
            ActiveSelection::Unset => None,
            ActiveSelection::All => Some(SeriesQuery::new(None, period)),
            ActiveSelection::Portfolio(id) => Some(SeriesQuery::new(Some(id), period)),
        }
    }

    fn begin(&self, kind: SeriesKind) {
        if !self.registry.is_closed() {
            self.series_status.send_modify(|m| {
                m.insert(kind, SeriesStatus::Loading);
            });
        }
    }

    fn finish<T>(
        &self,
        kind: SeriesKind,
        token: Option<&str>,
        result: Result<Option<T>, CoreError>,
    ) -> Result<Option<T>, CoreError> {
        let result = result.map_err(|e| self.observe_for(token, e));
        if self.registry.is_closed() {
            debug!(?kind, "dashboard closed; series status not updated");
            return result;
        }
        // Signed out by `observe_for`; statuses were already reset.
        if matches!(result, Err(CoreError::SessionExpired)) {
            return result;
        }
        if self.session.bearer().ok().as_deref() != token {
            debug!(?kind, "session changed during fetch; series status not updated");
            return result;
        }
        let status = match &result {
            Ok(data) => SeriesStatus::Ready {
                has_data: data.is_some(),
            },
            Err(e) => SeriesStatus::Failed(e.to_string()),
        };
        self.series_status.send_modify(|m| {
            m.insert(kind, status);
        });
        result
    }

    fn reset_series_status(&self) {
        self.series_status.send_modify(|m| m.clear());
    }

    fn after_authentication(&self, ok: bool, previous: Option<String>) {
        let signed_out = !ok && !self.session.is_authenticated();
        let switched = ok && self.session.user().map(|u| u.id) != previous;
        if signed_out || switched {
            debug!(signed_out, switched, "previous user's portfolios dropped");
            self.registry.reset();
            self.reset_series_status();
        }
    }

    /// Errors from the session store and the registry, which have already
    /// expired the session the request was sent with.
    fn observe(&self, e: CoreError) -> CoreError {
        self.observe_for(None, e)
    }

    /// An expired session signs the user out and drops their portfolios. A
    /// rejection of a token that is no longer held changes nothing.
    fn observe_for(&self, token: Option<&str>, e: CoreError) -> CoreError {
        if e == CoreError::SessionExpired {
            if let Some(token) = token {
                self.session.expire_for(token);
            }
            if !self.session.is_authenticated() {
                self.registry.reset();
                self.reset_series_status();
            }
        }
        e
    }
}
