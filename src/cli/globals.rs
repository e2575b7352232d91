use crate::config::{default_storage_path, ClientConfig, DEFAULT_LOGIN_PATH, DEFAULT_TIMEOUT_MS};
use anyhow::{Context, Result};
use std::{path::PathBuf, time::Duration};

/// Settings shared by every subcommand.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub api_url: String,
    pub storage_path: PathBuf,
    pub timeout: Duration,
    pub login_path: String,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(api_url: String) -> Self {
        Self {
            api_url,
            storage_path: default_storage_path(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
        }
    }

    /// # Errors
    /// Returns an error if the API URL is not a usable http(s) URL.
    pub fn config(&self) -> Result<ClientConfig> {
        let config = ClientConfig::from_base_url(&self.api_url)
            .with_context(|| format!("invalid SIMS_API_URL: {}", self.api_url))?;

        Ok(config
            .with_timeout(self.timeout)
            .with_login_path(self.login_path.clone())
            .with_storage_path(self.storage_path.clone()))
    }
}
