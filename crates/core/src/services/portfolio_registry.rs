use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::backend::traits::DashboardBackend;
use crate::errors::CoreError;
use crate::models::portfolio::{
    ActiveSelection, NewPortfolio, Portfolio, PortfolioUpdate, SyncOutcome,
};
use crate::services::session_service::SessionStore;
use crate::storage::kv::KeyValueStore;

/// Observable registry state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistryState {
    /// Portfolios in server order, ids unique.
    pub portfolios: Vec<Portfolio>,
    pub selection: ActiveSelection,
    /// Whether at least one refresh has completed (successfully or not).
    pub loaded: bool,
    pub loading: bool,
    /// Why the last refresh came back empty, if it failed.
    pub last_error: Option<String>,
}

impl RegistryState {
    pub fn get(&self, id: &str) -> Option<&Portfolio> {
        self.portfolios.iter().find(|p| p.id == id)
    }

    /// The selected portfolio, when a single one is selected.
    pub fn active_portfolio(&self) -> Option<&Portfolio> {
        self.selection.id().and_then(|id| self.get(id))
    }

    /// False when no exchange account is linked.
    pub fn is_connected(&self) -> bool {
        !self.portfolios.is_empty()
    }
}

/// Repair a selection against the current list.
///
/// - empty list → `Unset`
/// - `All` → kept (global intent)
/// - `Portfolio(id)` present → kept
/// - anything else → first portfolio in server order
///
/// Deterministic and idempotent: applying it twice to the same list gives the
/// same answer as applying it once.
pub fn reconcile(current: &ActiveSelection, portfolios: &[Portfolio]) -> ActiveSelection {
    let Some(first) = portfolios.first() else {
        return ActiveSelection::Unset;
    };
    match current {
        ActiveSelection::All => ActiveSelection::All,
        ActiveSelection::Portfolio(id) if portfolios.iter().any(|p| &p.id == id) => {
            current.clone()
        }
        ActiveSelection::Portfolio(_) | ActiveSelection::Unset => {
            ActiveSelection::Portfolio(first.id.clone())
        }
    }
}

/// Drop duplicate ids (first occurrence wins) and keep `last_sync_at` from
/// moving backwards relative to what was already held.
fn merge_list(previous: &[Portfolio], incoming: Vec<Portfolio>) -> Vec<Portfolio> {
    let known: HashMap<&str, &Portfolio> =
        previous.iter().map(|p| (p.id.as_str(), p)).collect();
    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(incoming.len());

    for mut portfolio in incoming {
        if !seen.insert(portfolio.id.clone()) {
            warn!(id = %portfolio.id, "backend returned a duplicate portfolio id; ignoring it");
            continue;
        }
        if let Some(synced) = known.get(portfolio.id.as_str()).and_then(|p| p.last_sync_at) {
            portfolio.record_sync(synced);
        }
        merged.push(portfolio);
    }
    merged
}

/// The list of linked exchange accounts and the single active selection.
///
/// Every refresh and removal re-runs [`reconcile`] before the new state is
/// published, so a reader never observes a dangling selection. The chosen id
/// is persisted so it survives a reload.
pub struct PortfolioRegistry {
    session: SessionStore,
    backend: Arc<dyn DashboardBackend>,
    storage: Arc<dyn KeyValueStore>,
    active_key: String,
    state: watch::Sender<RegistryState>,
    closed: AtomicBool,
}

impl std::fmt::Debug for PortfolioRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortfolioRegistry")
            .field("state", &*self.state.borrow())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PortfolioRegistry {
    /// Create the registry, restoring the persisted selection (if any). The
    /// restored id is checked on the first refresh.
    pub fn new(
        session: SessionStore,
        backend: Arc<dyn DashboardBackend>,
        storage: Arc<dyn KeyValueStore>,
        active_key: impl Into<String>,
    ) -> Self {
        let active_key = active_key.into();
        let selection = storage
            .get(&active_key)
            .filter(|id| !id.trim().is_empty())
            .map(ActiveSelection::Portfolio)
            .unwrap_or_default();
        let (state, _) = watch::channel(RegistryState {
            selection,
            ..RegistryState::default()
        });

        Self {
            session,
            backend,
            storage,
            active_key,
            state,
            closed: AtomicBool::new(false),
        }
    }

    // ── Reads ───────────────────────────────────────────────────────

    pub fn snapshot(&self) -> RegistryState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RegistryState> {
        self.state.subscribe()
    }

    pub fn portfolios(&self) -> Vec<Portfolio> {
        self.state.borrow().portfolios.clone()
    }

    pub fn get(&self, id: &str) -> Option<Portfolio> {
        self.state.borrow().get(id).cloned()
    }

    pub fn active(&self) -> ActiveSelection {
        self.state.borrow().selection.clone()
    }

    pub fn active_portfolio(&self) -> Option<Portfolio> {
        self.state.borrow().active_portfolio().cloned()
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_connected()
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.borrow().last_error.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Stop applying results. Fetches still in flight are discarded when
    /// they complete.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Forget every portfolio and the selection (used on sign-out).
    pub fn reset(&self) {
        self.state.send_modify(|s| {
            *s = RegistryState::default();
        });
        self.persist(&ActiveSelection::Unset);
    }

    // ── Refresh ─────────────────────────────────────────────────────

    /// Reload the list from the backend. Never fails.
    ///
    /// Any failure, including having no session, leaves the registry empty
    /// rather than showing stale data; the reason is kept in `last_error`.
    /// Overlapping refreshes are not serialized: the last one to complete
    /// wins. A result fetched for a session that has since been replaced is
    /// discarded.
    pub async fn refresh(&self) {
        if self.is_closed() {
            return;
        }
        self.state.send_modify(|s| s.loading = true);

        let token = match self.session.bearer() {
            Ok(token) => token,
            Err(e) => {
                debug!("no session; portfolio list cleared");
                self.replace(Vec::new(), Some(e.to_string()));
                return;
            }
        };
        let result = self.backend.list_portfolios(&token).await;

        if self.is_closed() {
            debug!("registry closed; discarding refresh result");
            self.state.send_modify(|s| s.loading = false);
            return;
        }
        if matches!(result, Err(CoreError::SessionExpired)) && self.session.expire_for(&token) {
            warn!("session expired during refresh; list cleared");
            self.replace(Vec::new(), Some(CoreError::SessionExpired.to_string()));
            return;
        }
        if !self.session.holds(&token) {
            debug!("session changed during refresh; result discarded");
            self.state.send_modify(|s| s.loading = false);
            return;
        }

        match result {
            Ok(list) => {
                debug!(count = list.len(), "portfolio list refreshed");
                self.replace(list, None);
            }
            Err(e) => {
                warn!(error = %e, "portfolio refresh failed; list cleared");
                self.replace(Vec::new(), Some(e.to_string()));
            }
        }
    }

    // ── Selection ───────────────────────────────────────────────────

    /// Choose the portfolio driving the dashboard. `None` selects the
    /// aggregate view, which only exists while portfolios exist.
    ///
    /// Before the first refresh an id is taken as-is (a restored selection
    /// must survive until the list is known); afterwards an unknown id is
    /// repaired immediately. Ignored once the registry is closed.
    pub fn set_active(&self, id: Option<&str>) {
        if self.is_closed() {
            debug!("registry closed; selection change ignored");
            return;
        }
        let mut chosen = ActiveSelection::Unset;
        self.state.send_modify(|s| {
            let requested = match id {
                None if s.portfolios.is_empty() => ActiveSelection::Unset,
                None => ActiveSelection::All,
                Some(id) => ActiveSelection::Portfolio(id.to_string()),
            };
            let next = if s.loaded {
                reconcile(&requested, &s.portfolios)
            } else {
                requested.clone()
            };
            if next != requested {
                warn!(requested = %requested, selected = %next, "unknown portfolio selected; repaired");
            }
            s.selection = next.clone();
            chosen = next;
        });
        info!(selection = %chosen, "active portfolio changed");
        self.persist(&chosen);
    }

    // ── Mutations ───────────────────────────────────────────────────

    /// Link a new exchange account. The id is assigned by the backend, so
    /// the list is refreshed afterwards rather than updated locally.
    pub async fn add(&self, new: NewPortfolio) -> Result<(), CoreError> {
        let new = NewPortfolio::new(
            new.label.trim(),
            new.api_key.trim(),
            new.secret.trim(),
            new.exchange.trim(),
        );
        let missing: Vec<&str> = [
            ("label", &new.label),
            ("API key", &new.api_key),
            ("API secret", &new.secret),
        ]
        .iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(name, _)| *name)
        .collect();
        if !missing.is_empty() {
            return Err(CoreError::ValidationError(format!(
                "{} must not be empty",
                missing.join(", ")
            )));
        }

        let token = self.session.bearer()?;
        self.backend
            .create_portfolio(&token, &new)
            .await
            .map_err(|e| self.observe(&token, e))?;
        info!(label = %new.label, exchange = %new.exchange, "portfolio added");
        self.refresh().await;
        Ok(())
    }

    /// Rename a portfolio.
    pub async fn update(&self, id: &str, update: PortfolioUpdate) -> Result<(), CoreError> {
        let update = PortfolioUpdate {
            label: update.label.map(|l| l.trim().to_string()),
        };
        if update.label.as_deref() == Some("") {
            return Err(CoreError::ValidationError("label must not be empty".into()));
        }

        let token = self.session.bearer()?;
        self.backend
            .update_portfolio(&token, id, &update)
            .await
            .map_err(|e| self.observe(&token, e))?;
        info!(%id, "portfolio updated");
        self.refresh().await;
        Ok(())
    }

    /// Unlink a portfolio. The local list is updated immediately, without
    /// waiting for a refresh, and the selection repaired if it pointed here.
    pub async fn remove(&self, id: &str) -> Result<(), CoreError> {
        let token = self.session.bearer()?;
        self.backend
            .delete_portfolio(&token, id)
            .await
            .map_err(|e| self.observe(&token, e))?;

        if self.is_closed() || !self.session.holds(&token) {
            debug!(%id, "portfolio removed remotely; local state no longer current");
            return Ok(());
        }

        let mut selection = ActiveSelection::Unset;
        self.state.send_modify(|s| {
            s.portfolios.retain(|p| p.id != id);
            s.selection = reconcile(&s.selection, &s.portfolios);
            selection = s.selection.clone();
        });
        info!(%id, selection = %selection, "portfolio removed");
        self.persist(&selection);
        Ok(())
    }

    /// Best-effort request for the backend to pull fresh exchange data.
    ///
    /// Never returns an error: failures are logged and reported as
    /// [`SyncOutcome::Failed`], which callers are free to ignore.
    pub async fn sync(&self, id: &str) -> SyncOutcome {
        let token = match self.session.bearer() {
            Ok(token) => token,
            Err(e) => {
                warn!(%id, error = %e, "sync request failed");
                return SyncOutcome::Failed(e.to_string());
            }
        };

        match self.backend.sync_portfolio(&token, id).await {
            Ok(synced_at) => {
                if let Some(at) = synced_at {
                    if !self.is_closed() && self.session.holds(&token) {
                        self.state.send_modify(|s| {
                            if let Some(p) = s.portfolios.iter_mut().find(|p| p.id == id) {
                                p.record_sync(at);
                            }
                        });
                    }
                }
                debug!(%id, "sync requested");
                SyncOutcome::Requested(synced_at)
            }
            Err(e) => {
                let e = self.observe(&token, e);
                warn!(%id, error = %e, "sync request failed");
                SyncOutcome::Failed(e.to_string())
            }
        }
    }

    // ── Internal ────────────────────────────────────────────────────

    fn replace(&self, incoming: Vec<Portfolio>, error: Option<String>) {
        let mut selection = ActiveSelection::Unset;
        self.state.send_modify(|s| {
            s.portfolios = merge_list(&s.portfolios, incoming);
            s.selection = reconcile(&s.selection, &s.portfolios);
            s.loaded = true;
            s.loading = false;
            s.last_error = error;
            selection = s.selection.clone();
        });
        self.persist(&selection);
    }

    fn persist(&self, selection: &ActiveSelection) {
        let result = match selection.id() {
            Some(id) => self.storage.set(&self.active_key, id),
            None => self.storage.remove(&self.active_key),
        };
        if let Err(e) = result {
            warn!(error = %e, "failed to persist active portfolio");
        }
    }

    /// Sign out when `token` was rejected; pass every error through.
    fn observe(&self, token: &str, e: CoreError) -> CoreError {
        if e == CoreError::SessionExpired {
            self.session.expire_for(token);
        }
        e
    }
}
