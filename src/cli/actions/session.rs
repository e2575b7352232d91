use crate::api::AuthApi;
use crate::cli::actions::account::signed_in_message;
use anyhow::{anyhow, bail, Result};
use secrecy::{ExposeSecret, SecretString};

/// # Errors
/// Returns an error if the profile cannot be fetched.
pub async fn whoami(api: &AuthApi) -> Result<()> {
    let user = api.fetch_profile().await?;
    println!("{}", serde_json::to_string_pretty(&user)?);
    Ok(())
}

/// Local view only, no request is sent.
/// # Errors
/// Never fails today.
pub fn status(api: &AuthApi) -> Result<()> {
    let session = api.store().session();
    println!("{}", signed_in_message(&session));
    if let Some(violation) = session.invariant_violation() {
        println!("warning: {violation}");
    }
    Ok(())
}

/// Exchange the stored refresh credential and keep the result.
/// # Errors
/// Returns an error if nothing is stored or the exchange fails.
pub async fn refresh(api: &AuthApi) -> Result<()> {
    let Some(refresh_token) = api.store().refresh_token() else {
        bail!("not signed in");
    };

    let tokens = api.refresh(&refresh_token).await?;
    if !api
        .store()
        .replace_tokens(&refresh_token, tokens.access, tokens.refresh)
    {
        bail!("session was cleared during the exchange");
    }

    println!("Access credential renewed");
    Ok(())
}

/// # Errors
/// Returns an error if there is no token to check or the backend rejects it.
pub async fn verify(api: &AuthApi, token: Option<SecretString>) -> Result<()> {
    let token = token
        .or_else(|| api.store().access_token())
        .ok_or_else(|| anyhow!("no token given and not signed in"))?;

    if api.verify(token.expose_secret()).await {
        println!("valid");
        Ok(())
    } else {
        bail!("token is not valid")
    }
}
