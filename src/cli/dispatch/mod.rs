use crate::api::types::{LoginCredentials, RegisterData};
use crate::cli::{actions::Action, commands::innermost, globals::GlobalArgs};
use crate::config::DEFAULT_API_BASE_URL;
use crate::session::Role;
use anyhow::{bail, Context, Result};
use clap::ArgMatches;
use secrecy::SecretString;
use std::path::PathBuf;
use std::time::Duration;

/// # Errors
/// Returns an error if no subcommand was given or a required argument is missing.
pub fn handler(matches: &ArgMatches) -> Result<Action> {
    let Some((name, sub_m)) = matches.subcommand() else {
        bail!("missing subcommand");
    };

    let action = match name {
        "login" => Action::Login(LoginCredentials::new(
            required(sub_m, "username")?,
            secret(sub_m, "password")?,
        )),
        "register" => Action::Register(Box::new(register_data(sub_m)?)),
        "logout" => Action::Logout,
        "whoami" => Action::Whoami,
        "status" => Action::Status,
        "refresh" => Action::Refresh,
        "verify" => Action::Verify {
            token: sub_m
                .get_one::<String>("token")
                .map(|token| SecretString::from(token.clone())),
        },
        other => bail!("unknown subcommand: {other}"),
    };

    Ok(action)
}

/// Settings shared by all subcommands.
/// # Errors
/// Never fails for matches produced by [`crate::cli::commands::new`].
pub fn globals(matches: &ArgMatches) -> Result<GlobalArgs> {
    let matches = innermost(matches);

    let api_url = matches
        .get_one::<String>("api-url")
        .cloned()
        .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());

    let mut globals = GlobalArgs::new(api_url);
    if let Some(path) = matches.get_one::<String>("storage") {
        globals.storage_path = PathBuf::from(path);
    }
    if let Some(timeout_ms) = matches.get_one::<u64>("timeout-ms") {
        globals.timeout = Duration::from_millis(*timeout_ms);
    }
    if let Some(login_path) = matches.get_one::<String>("login-path") {
        globals.login_path.clone_from(login_path);
    }

    Ok(globals)
}

fn register_data(sub_m: &ArgMatches) -> Result<RegisterData> {
    let password = secret(sub_m, "password")?;
    let password_confirm = sub_m
        .get_one::<String>("password-confirm")
        .map_or_else(|| password.clone(), |s| SecretString::from(s.clone()));

    let role = match sub_m.get_one::<String>("role").map(String::as_str) {
        Some("supervisor") => Role::Supervisor,
        Some("admin") => Role::Admin,
        _ => Role::Pg,
    };

    Ok(RegisterData {
        username: required(sub_m, "username")?,
        email: required(sub_m, "email")?,
        password,
        password_confirm,
        first_name: required(sub_m, "first-name")?,
        last_name: required(sub_m, "last-name")?,
        role,
        specialty: sub_m.get_one::<String>("specialty").cloned(),
        year: sub_m.get_one::<String>("year").cloned(),
        phone_number: sub_m.get_one::<String>("phone").cloned(),
    })
}

fn required(matches: &ArgMatches, id: &str) -> Result<String> {
    matches
        .get_one::<String>(id)
        .cloned()
        .with_context(|| format!("missing required argument: --{id}"))
}

fn secret(matches: &ArgMatches, id: &str) -> Result<SecretString> {
    required(matches, id).map(SecretString::from)
}
