//! Client configuration: backend base URL, login entry point, transport timeout,
//! and where the credential cache lives on disk. Values come from CLI flags or
//! environment variables; nothing here is secret.

use crate::error::{Error, Result};
use std::{path::PathBuf, time::Duration};
use url::Url;

/// Backend used when nothing else is configured.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
/// Where a forced logout sends the user.
pub const DEFAULT_LOGIN_PATH: &str = "/login";
/// Default request timeout (milliseconds) applied by the transport.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

const STORAGE_DIR: &str = ".sims-client";
const STORAGE_FILE: &str = "storage.json";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    api_base_url: Url,
    login_path: String,
    timeout: Duration,
    storage_path: PathBuf,
    user_agent: String,
}

impl ClientConfig {
    #[must_use]
    pub fn new(api_base_url: Url) -> Self {
        Self {
            api_base_url,
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            storage_path: default_storage_path(),
            user_agent: APP_USER_AGENT.to_string(),
        }
    }

    /// Parses the backend base URL. Blank input falls back to [`DEFAULT_API_BASE_URL`].
    ///
    /// # Errors
    /// Returns [`Error::Config`] if the URL cannot be parsed, has no host, or is not http(s).
    pub fn from_base_url(value: &str) -> Result<Self> {
        let value = normalize_value(value).unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());

        let url = Url::parse(&value).map_err(|err| Error::Config(format!("{value}: {err}")))?;

        match url.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(Error::Config(format!(
                    "Error parsing URL: unsupported scheme {scheme}"
                )))
            }
        }

        if url.host().is_none() {
            return Err(Error::Config("Error parsing URL: no host specified".into()));
        }

        Ok(Self::new(url))
    }

    #[must_use]
    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = path.into();
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    #[must_use]
    pub fn api_base_url(&self) -> &Url {
        &self.api_base_url
    }

    #[must_use]
    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn storage_path(&self) -> &PathBuf {
        &self.storage_path
    }

    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Full URL for an API path on the configured backend.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        build_url_with_base(self.api_base_url.as_str(), path)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(Url::parse(DEFAULT_API_BASE_URL).expect("valid default URL"))
    }
}

/// `$HOME/.sims-client/storage.json`, or the working directory when `HOME` is unset.
#[must_use]
pub fn default_storage_path() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(STORAGE_DIR)
        .join(STORAGE_FILE)
}

/// Builds a URL from an explicit base URL and the provided path.
fn build_url_with_base(base_url: &str, path: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    let path = path.trim();

    if base.is_empty() {
        path.to_string()
    } else {
        format!("{}/{}", base, path.trim_start_matches('/'))
    }
}

fn normalize_value(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
