use crate::api::types::{LoginCredentials, RegisterData};
use crate::api::AuthApi;
use crate::session::AuthSession;
use anyhow::Result;

/// # Errors
/// Returns an error if the backend refuses the credentials or is unreachable.
pub async fn login(api: &AuthApi, credentials: &LoginCredentials) -> Result<()> {
    let session = api.login(credentials).await?;
    println!("{}", signed_in_message(&session));
    Ok(())
}

/// # Errors
/// Returns an error if the backend rejects the registration.
pub async fn register(api: &AuthApi, profile: &RegisterData) -> Result<()> {
    let session = api.register(profile).await?;
    println!("{}", signed_in_message(&session));
    Ok(())
}

/// Never fails; local state is cleared even if the backend is unreachable.
/// # Errors
/// Kept fallible for a uniform action signature.
pub async fn logout(api: &AuthApi) -> Result<()> {
    api.logout().await;
    println!("Signed out");
    Ok(())
}

pub(crate) fn signed_in_message(session: &AuthSession) -> String {
    match &session.user {
        Some(user) => format!(
            "Signed in as {} ({}, {:?})",
            user.display_name(),
            user.username,
            user.role
        ),
        None => "Not signed in".to_string(),
    }
}
