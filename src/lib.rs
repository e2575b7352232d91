//! # sims-client
//!
//! Authenticated API client for the SIMS training-management backend.
//!
//! The core is the [`pipeline::RequestPipeline`]: every outbound request picks up
//! the cached access credential as a bearer header, and a 401 triggers exactly one
//! refresh exchange followed by exactly one replay of the original request. When
//! the refresh credential itself is rejected the session is torn down and a
//! [`pipeline::ForcedLogout`] is emitted so the caller can send the user back to
//! the sign-in page.
//!
//! Session state lives in the [`store::AuthStateStore`], which mirrors every change
//! into a durable [`storage::CredentialStore`] (a JSON file for the CLI, memory for
//! tests) and rehydrates from it on startup. [`api::AuthApi`] wraps the auth
//! endpoints (login, register, logout, profile, refresh, verify) on top of the
//! pipeline.
//!
//! ```no_run
//! use sims_client::{
//!     api::{types::LoginCredentials, AuthApi},
//!     config::ClientConfig,
//!     pipeline::RequestPipeline,
//!     storage::MemoryStore,
//!     store::AuthStateStore,
//! };
//! use secrecy::SecretString;
//! use std::sync::Arc;
//!
//! # async fn demo() -> sims_client::error::Result<()> {
//! let store = AuthStateStore::new(Arc::new(MemoryStore::new()));
//! let config = ClientConfig::from_base_url("http://localhost:8000")?;
//! let api = AuthApi::new(RequestPipeline::new(config, store)?);
//!
//! let session = api
//!     .login(&LoginCredentials::new("pg1", SecretString::from("s3cret!".to_string())))
//!     .await?;
//! assert!(session.is_authenticated);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod storage;
pub mod store;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
