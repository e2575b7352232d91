pub mod account;
pub mod session;

// Internal "interpreter" for `Action`.
mod run;

use crate::api::types::{LoginCredentials, RegisterData};
use crate::cli::globals::GlobalArgs;
use secrecy::SecretString;

#[derive(Debug)]
pub enum Action {
    Login(LoginCredentials),
    Register(Box<RegisterData>),
    Logout,
    Whoami,
    Status,
    Refresh,
    Verify { token: Option<SecretString> },
}

impl Action {
    /// Execute the action.
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self, globals: &GlobalArgs) -> anyhow::Result<()> {
        run::execute(self, globals).await
    }
}
