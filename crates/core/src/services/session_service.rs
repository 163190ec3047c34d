use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::backend::traits::DashboardBackend;
use crate::errors::CoreError;
use crate::models::session::{AuthGrant, SessionState, User};
use crate::storage::kv::KeyValueStore;

#[derive(Debug, Clone, Copy)]
enum AuthKind {
    Login,
    Register,
}

impl std::fmt::Display for AuthKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthKind::Login => write!(f, "login"),
            AuthKind::Register => write!(f, "register"),
        }
    }
}

struct SessionInner {
    backend: Arc<dyn DashboardBackend>,
    storage: Arc<dyn KeyValueStore>,
    token_key: String,
    state: watch::Sender<SessionState>,
    /// Bumped by every login/register/logout. A completion carrying an older
    /// ticket has been superseded and is not applied.
    generation: AtomicU64,
}

/// Holds the signed-in identity and the bearer token.
///
/// Cheap to clone: clones share the same session. The token is persisted in
/// the key/value store so it survives a reload; the identity is not and is
/// re-fetched with [`fetch_identity`](Self::fetch_identity).
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("backend", &self.inner.backend.name())
            .field("state", &*self.inner.state.borrow())
            .finish()
    }
}

impl SessionStore {
    /// Create the store, restoring a persisted token if there is one.
    pub fn new(
        backend: Arc<dyn DashboardBackend>,
        storage: Arc<dyn KeyValueStore>,
        token_key: impl Into<String>,
    ) -> Self {
        let token_key = token_key.into();
        let token = storage.get(&token_key).filter(|t| !t.trim().is_empty());
        if token.is_some() {
            debug!("restored persisted session token");
        }
        let (state, _) = watch::channel(SessionState {
            token,
            ..SessionState::default()
        });

        Self {
            inner: Arc::new(SessionInner {
                backend,
                storage,
                token_key,
                state,
                generation: AtomicU64::new(0),
            }),
        }
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Current state. A snapshot: it goes stale at the next transition.
    pub fn snapshot(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    /// Observe every transition.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// True iff a token is held, whether or not the backend still accepts it.
    pub fn is_authenticated(&self) -> bool {
        self.inner.state.borrow().is_authenticated()
    }

    pub fn user(&self) -> Option<User> {
        self.inner.state.borrow().user.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.inner.state.borrow().error.clone()
    }

    /// The bearer token, or `Unauthenticated` so callers fail closed without
    /// touching the network.
    pub fn bearer(&self) -> Result<String, CoreError> {
        self.inner
            .state
            .borrow()
            .token
            .clone()
            .ok_or(CoreError::Unauthenticated)
    }

    // ── Transitions ─────────────────────────────────────────────────

    /// Sign in. On failure the message is kept in [`error`](Self::error) and
    /// any previous session is cleared.
    ///
    /// Returns `false` as well when a newer login, register or logout was
    /// issued before this one completed: its result is then not applied.
    pub async fn login(&self, email: &str, password: &str) -> bool {
        self.authenticate(AuthKind::Login, email, password).await
    }

    /// Create an account and sign in. Same contract as [`login`](Self::login).
    pub async fn register(&self, email: &str, password: &str) -> bool {
        self.authenticate(AuthKind::Register, email, password).await
    }

    /// Drop the session. Idempotent; also invalidates in-flight logins.
    pub fn logout(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.clear(None);
        info!("signed out");
    }

    /// Ask the backend who the token belongs to.
    ///
    /// An unauthorized answer signs the user out, exactly as
    /// [`logout`](Self::logout) would, and returns `SessionExpired`. Only the
    /// session the request was made with is cleared.
    pub async fn fetch_identity(&self) -> Result<User, CoreError> {
        let token = self.bearer()?;
        match self.inner.backend.current_user(&token).await {
            Ok(user) => {
                self.inner.state.send_modify(|s| {
                    // Only attach the identity to the token it was fetched for.
                    if s.token.as_deref() == Some(token.as_str()) {
                        s.user = Some(user.clone());
                    }
                });
                Ok(user)
            }
            Err(CoreError::SessionExpired) => {
                self.expire_for(&token);
                Err(CoreError::SessionExpired)
            }
            Err(e) => Err(e),
        }
    }

    /// True while `token` is still the session's bearer.
    pub fn holds(&self, token: &str) -> bool {
        self.inner.state.borrow().token.as_deref() == Some(token)
    }

    /// Implicit sign-out after the backend rejected `token`.
    ///
    /// A rejection of a token that is no longer held (the user signed out or
    /// signed in again meanwhile) leaves the current session alone. Returns
    /// whether the session was cleared.
    pub fn expire_for(&self, token: &str) -> bool {
        let generation = &self.inner.generation;
        let expired = self.inner.state.send_if_modified(|s| {
            if s.token.as_deref() != Some(token) {
                return false;
            }
            generation.fetch_add(1, Ordering::SeqCst);
            *s = SessionState {
                error: Some(CoreError::SessionExpired.to_string()),
                ..SessionState::default()
            };
            true
        });

        if !expired {
            debug!("rejection for a token no longer held; session kept");
            return false;
        }
        if self.inner.storage.get(&self.inner.token_key).as_deref() == Some(token) {
            if let Err(e) = self.inner.storage.remove(&self.inner.token_key) {
                warn!(error = %e, "failed to remove persisted session token");
            }
        }
        info!("session expired; signed out");
        true
    }

    // ── Internal ────────────────────────────────────────────────────

    async fn authenticate(&self, kind: AuthKind, email: &str, password: &str) -> bool {
        let ticket = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let email = email.trim();

        if email.is_empty() || password.is_empty() {
            let err = CoreError::ValidationError("email and password are required".into());
            self.clear(Some(err.to_string()));
            return false;
        }

        self.inner.state.send_modify(|s| {
            s.loading = true;
            s.error = None;
        });

        let result = match kind {
            AuthKind::Login => self.inner.backend.login(email, password).await,
            AuthKind::Register => self.inner.backend.register(email, password).await,
        };

        if self.inner.generation.load(Ordering::SeqCst) != ticket {
            debug!(%kind, "superseded by a newer session call; result discarded");
            return false;
        }

        match result {
            Ok(grant) => {
                self.apply_grant(grant);
                info!(%kind, "signed in");
                true
            }
            Err(e) => {
                warn!(%kind, error = %e, "authentication failed");
                self.clear(Some(e.to_string()));
                false
            }
        }
    }

    fn apply_grant(&self, grant: AuthGrant) {
        if let Err(e) = self.inner.storage.set(&self.inner.token_key, &grant.token) {
            warn!(error = %e, "failed to persist session token");
        }
        self.inner.state.send_modify(|s| {
            s.token = Some(grant.token);
            s.user = Some(grant.user);
            s.error = None;
            s.loading = false;
        });
    }

    fn clear(&self, error: Option<String>) {
        if let Err(e) = self.inner.storage.remove(&self.inner.token_key) {
            warn!(error = %e, "failed to remove persisted session token");
        }
        self.inner.state.send_modify(|s| {
            *s = SessionState {
                error,
                ..SessionState::default()
            };
        });
    }
}
