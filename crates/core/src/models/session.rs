use serde::{Deserialize, Serialize};

use super::serde_helpers::flexible_id;

/// The signed-in user as reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(deserialize_with = "flexible_id")]
    pub id: String,

    #[serde(default)]
    pub email: String,
}

/// Token + identity returned by login/register.
#[derive(Clone, PartialEq, Deserialize)]
pub struct AuthGrant {
    pub token: String,
    pub user: User,
}

impl std::fmt::Debug for AuthGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGrant")
            .field("token", &"<redacted>")
            .field("user", &self.user)
            .finish()
    }
}

/// Observable session state.
///
/// `token` may be present without `user` right after a reload: the token is
/// persisted, the identity has to be fetched again.
#[derive(Clone, Default, PartialEq)]
pub struct SessionState {
    pub token: Option<String>,
    pub user: Option<User>,
    /// Message from the last failed login/register, shown next to the form.
    pub error: Option<String>,
    pub loading: bool,
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("user", &self.user)
            .field("error", &self.error)
            .field("loading", &self.loading)
            .finish()
    }
}
