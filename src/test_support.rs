//! Shared fixtures for unit tests.

use crate::session::{Role, User};
use std::net::TcpListener;
use std::path::PathBuf;

pub(crate) fn user() -> User {
    User {
        id: 1,
        username: "pg1".to_string(),
        email: "pg1@example.com".to_string(),
        first_name: "Sara".to_string(),
        last_name: "Ahmed".to_string(),
        full_name: None,
        role: Role::Pg,
        specialty: Some("surgery".to_string()),
        year: Some("2".to_string()),
        phone_number: None,
    }
}

pub(crate) fn user_json() -> serde_json::Value {
    serde_json::to_value(user()).unwrap_or_default()
}

pub(crate) fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

/// Removes the file when dropped.
pub(crate) struct FileGuard {
    pub(crate) path: PathBuf,
}

impl FileGuard {
    pub(crate) fn new(name: &str) -> Self {
        let path = std::env::temp_dir()
            .join(format!("sims-client-{}", ulid::Ulid::new()))
            .join(name);
        Self { path }
    }
}

impl Drop for FileGuard {
    fn drop(&mut self) {
        if let Some(dir) = self.path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}
