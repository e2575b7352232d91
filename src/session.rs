//! Session data model: the signed-in user record, the credential pair, and the
//! subset of that state persisted across restarts. Credentials stay wrapped in
//! `SecretString` in memory; they are only exposed when written to storage or
//! attached to a request.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Pg,
    Supervisor,
    Admin,
}

/// User record as returned by the backend. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

impl User {
    /// Full name from the backend, else first + last, else the username.
    #[must_use]
    pub fn display_name(&self) -> String {
        if let Some(full_name) = self.full_name.as_deref().map(str::trim) {
            if !full_name.is_empty() {
                return full_name.to_string();
            }
        }

        let joined = format!("{} {}", self.first_name.trim(), self.last_name.trim());
        let joined = joined.trim();
        if joined.is_empty() {
            self.username.clone()
        } else {
            joined.to_string()
        }
    }
}

/// In-memory authentication state.
#[derive(Debug, Clone, Default)]
pub struct AuthSession {
    pub user: Option<User>,
    pub access_token: Option<SecretString>,
    pub refresh_token: Option<SecretString>,
    pub is_authenticated: bool,
    /// UI busy indicator, never persisted.
    pub is_loading: bool,
}

impl AuthSession {
    /// Describes the first broken invariant, if any.
    #[must_use]
    pub fn invariant_violation(&self) -> Option<&'static str> {
        if self.access_token.is_some() && !self.is_authenticated {
            return Some("access credential present on an unauthenticated session");
        }
        if self.is_authenticated && self.user.is_none() {
            return Some("authenticated session without a user record");
        }
        None
    }

    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.invariant_violation().is_none()
    }
}

/// Persisted subset of [`AuthSession`]. Field names follow the blob written by the
/// web frontend so both clients can share a storage file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub is_authenticated: bool,
}

/// Versioned envelope stored under the snapshot slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub state: SessionSnapshot,
    #[serde(default)]
    pub version: u32,
}

impl From<&AuthSession> for SessionSnapshot {
    fn from(session: &AuthSession) -> Self {
        Self {
            user: session.user.clone(),
            access_token: session
                .access_token
                .as_ref()
                .map(|token| token.expose_secret().to_string()),
            refresh_token: session
                .refresh_token
                .as_ref()
                .map(|token| token.expose_secret().to_string()),
            is_authenticated: session.is_authenticated,
        }
    }
}

impl From<SessionSnapshot> for AuthSession {
    fn from(snapshot: SessionSnapshot) -> Self {
        Self {
            user: snapshot.user,
            access_token: snapshot.access_token.map(SecretString::from),
            refresh_token: snapshot.refresh_token.map(SecretString::from),
            is_authenticated: snapshot.is_authenticated,
            is_loading: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::user;
    use serde_json::json;

    #[test]
    fn user_ignores_unknown_fields() {
        let parsed: User = serde_json::from_value(json!({
            "id": 7,
            "username": "dr.khan",
            "email": "khan@example.com",
            "first_name": "Amna",
            "last_name": "Khan",
            "full_name": "Amna Khan",
            "role": "supervisor",
            "registration_number": "PMC-123",
            "date_joined": "2024-01-01T00:00:00Z"
        }))
        .unwrap();

        assert_eq!(parsed.role, Role::Supervisor);
        assert_eq!(parsed.specialty, None);
        assert_eq!(parsed.display_name(), "Amna Khan");
    }

    #[test]
    fn display_name_falls_back() {
        let mut record = user();
        record.full_name = Some("  ".to_string());
        assert_eq!(record.display_name(), "Sara Ahmed");

        record.first_name = String::new();
        record.last_name = String::new();
        assert_eq!(record.display_name(), "pg1");
    }

    #[test]
    fn empty_session_is_consistent() {
        assert!(AuthSession::default().is_consistent());
    }

    #[test]
    fn detects_invariant_violations() {
        let orphan_token = AuthSession {
            access_token: Some(SecretString::from("A1".to_string())),
            ..AuthSession::default()
        };
        assert!(orphan_token.invariant_violation().is_some());

        let anonymous = AuthSession {
            is_authenticated: true,
            ..AuthSession::default()
        };
        assert!(anonymous.invariant_violation().is_some());
    }

    #[test]
    fn snapshot_uses_camel_case_and_drops_busy_flag() {
        let session = AuthSession {
            user: Some(user()),
            access_token: Some(SecretString::from("A1".to_string())),
            refresh_token: Some(SecretString::from("R1".to_string())),
            is_authenticated: true,
            is_loading: true,
        };

        let value = serde_json::to_value(SessionSnapshot::from(&session)).unwrap();
        assert_eq!(value["accessToken"], "A1");
        assert_eq!(value["refreshToken"], "R1");
        assert_eq!(value["isAuthenticated"], true);
        assert!(value.get("isLoading").is_none());

        let restored = AuthSession::from(SessionSnapshot::from(&session));
        assert!(!restored.is_loading);
        assert_eq!(restored.user, Some(user()));
    }
}
