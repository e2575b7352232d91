use crate::api::AuthApi;
use crate::cli::actions::{account, session, Action};
use crate::cli::globals::GlobalArgs;
use crate::pipeline::{ForcedLogout, RequestPipeline};
use crate::storage::FileStore;
use crate::store::AuthStateStore;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Execute the provided action.
// Single dispatch point for all CLI actions.
/// # Errors
/// Returns an error if the action fails.
pub async fn execute(action: Action, globals: &GlobalArgs) -> Result<()> {
    let (api, mut forced_logout) = connect(globals)?;

    let result = match action {
        Action::Login(credentials) => account::login(&api, &credentials).await,
        Action::Register(profile) => account::register(&api, &profile).await,
        Action::Logout => account::logout(&api).await,
        Action::Whoami => session::whoami(&api).await,
        Action::Status => session::status(&api),
        Action::Refresh => session::refresh(&api).await,
        Action::Verify { token } => session::verify(&api, token).await,
    };

    if let Ok(ForcedLogout { redirect_to }) = forced_logout.try_recv() {
        eprintln!("Session expired. Sign in again (sims-client login), login page: {redirect_to}");
    }

    result
}

/// Wire the file-backed store, the pipeline and the API client together.
fn connect(globals: &GlobalArgs) -> Result<(AuthApi, mpsc::UnboundedReceiver<ForcedLogout>)> {
    let config = globals.config()?;

    debug!("session file: {}", config.storage_path().display());
    let store = AuthStateStore::restore(Arc::new(FileStore::new(config.storage_path().clone())));

    let (tx, rx) = mpsc::unbounded_channel();
    let pipeline = RequestPipeline::new(config, store)?.with_forced_logout(tx);

    Ok((AuthApi::new(pipeline), rx))
}
