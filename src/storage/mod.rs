//! Durable key/value surface for session credentials, the native counterpart of
//! browser local storage. Four independent string slots; no expiry, no
//! namespacing beyond the key, no referential integrity between slots.
//!
//! Only [`crate::store::AuthStateStore`] writes through this trait.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::Result;
use std::fmt::Debug;

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const USER_KEY: &str = "user";
/// Persisted session snapshot (`PersistedState` JSON).
pub const SNAPSHOT_KEY: &str = "auth-storage";

/// Slots torn down on logout or forced logout.
pub const SESSION_KEYS: [&str; 4] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY, SNAPSHOT_KEY];

pub trait CredentialStore: Send + Sync + Debug {
    /// Read a slot. A missing slot is `Ok(None)`.
    ///
    /// # Errors
    /// Returns `Error::Storage` if the backing medium cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a slot, replacing any previous value.
    ///
    /// # Errors
    /// Returns `Error::Storage` if the backing medium cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a slot. Removing a missing slot is not an error.
    ///
    /// # Errors
    /// Returns `Error::Storage` if the backing medium cannot be written.
    fn delete(&self, key: &str) -> Result<()>;
}
