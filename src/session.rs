use serde::{Deserialize, Serialize};

/// The identity and credential under which favorites and recommendation
/// operations are scoped.
///
/// A session is an immutable snapshot: authentication produces a new value,
/// logout replaces it with [`Session::anonymous`], and nothing mutates one in
/// place. Core operations take the session explicitly instead of reading
/// ambient storage, so every call site is pinned to exactly one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: i64,
    pub display_name: String,
    /// Bearer token presented to both backend services
    pub credential: String,
    pub is_authenticated: bool,
}

impl Session {
    /// Creates a session for a signed-in user
    pub fn authenticated(
        user_id: i64,
        display_name: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
            credential: credential.into(),
            is_authenticated: true,
        }
    }

    /// The session in effect when nobody is signed in
    pub fn anonymous() -> Self {
        Self {
            user_id: 0,
            display_name: String::new(),
            credential: String::new(),
            is_authenticated: false,
        }
    }
}
