use crate::config::{DEFAULT_API_BASE_URL, DEFAULT_LOGIN_PATH};
use clap::{
    builder::{
        styling::{AnsiColor, Effects, Styles},
        ValueParser,
    },
    Arg, ArgAction, ArgMatches, ColorChoice, Command,
};

pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            // Successfully parsed as a number
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

/// Matches of the deepest subcommand. Global args are propagated down, so this is
/// where their values end up regardless of where they were given.
#[must_use]
pub fn innermost(matches: &ArgMatches) -> &ArgMatches {
    match matches.subcommand() {
        Some((_, sub)) => innermost(sub),
        None => matches,
    }
}

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new("sims-client")
        .about("SIMS API client")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("api-url")
                .long("api-url")
                .help("Backend base URL")
                .default_value(DEFAULT_API_BASE_URL)
                .env("SIMS_API_URL")
                .global(true),
        )
        .arg(
            Arg::new("storage")
                .long("storage")
                .help("Session file, default: $HOME/.sims-client/storage.json")
                .env("SIMS_STORAGE_PATH")
                .global(true),
        )
        .arg(
            Arg::new("timeout-ms")
                .long("timeout-ms")
                .help("Request timeout in milliseconds (default: 10000)")
                .env("SIMS_TIMEOUT_MS")
                .global(true)
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("login-path")
                .long("login-path")
                .help("Where to sign in again after the session expires")
                .default_value(DEFAULT_LOGIN_PATH)
                .env("SIMS_LOGIN_PATH")
                .global(true),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .help("Emit logs as JSON")
                .env("SIMS_LOG_JSON")
                .global(true)
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbosity")
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("SIMS_LOG_LEVEL")
                .global(true)
                .action(ArgAction::Count)
                .value_parser(validator_log_level()),
        )
        .subcommand(
            Command::new("login")
                .about("Sign in and store the session")
                .arg(
                    Arg::new("username")
                        .short('u')
                        .long("username")
                        .help("Account username")
                        .env("SIMS_USERNAME")
                        .required(true),
                )
                .arg(password_arg("password", "SIMS_PASSWORD", "Account password")),
        )
        .subcommand(register_command())
        .subcommand(Command::new("logout").about("Revoke the session and clear local state"))
        .subcommand(Command::new("whoami").about("Fetch the signed-in user from the backend"))
        .subcommand(Command::new("status").about("Show the locally stored session"))
        .subcommand(Command::new("refresh").about("Exchange the refresh credential now"))
        .subcommand(
            Command::new("verify")
                .about("Ask the backend whether a token is valid")
                .arg(
                    Arg::new("token")
                        .long("token")
                        .help("Token to check, default: the stored access credential"),
                ),
        )
}

fn password_arg(id: &'static str, env: &'static str, help: &'static str) -> Arg {
    Arg::new(id)
        .long(id)
        .help(help)
        .env(env)
        .hide_env_values(true)
        .required(true)
}

fn register_command() -> Command {
    Command::new("register")
        .about("Create an account and sign in")
        .arg(
            Arg::new("username")
                .short('u')
                .long("username")
                .help("Account username")
                .env("SIMS_USERNAME")
                .required(true),
        )
        .arg(Arg::new("email").long("email").help("Email address").required(true))
        .arg(password_arg("password", "SIMS_PASSWORD", "Account password"))
        .arg(
            Arg::new("password-confirm")
                .long("password-confirm")
                .help("Password confirmation, default: --password")
                .env("SIMS_PASSWORD_CONFIRM")
                .hide_env_values(true),
        )
        .arg(
            Arg::new("first-name")
                .long("first-name")
                .help("First name")
                .required(true),
        )
        .arg(
            Arg::new("last-name")
                .long("last-name")
                .help("Last name")
                .required(true),
        )
        .arg(
            Arg::new("role")
                .long("role")
                .help("Account role")
                .default_value("pg")
                .value_parser(["pg", "supervisor", "admin"]),
        )
        .arg(Arg::new("specialty").long("specialty").help("Training specialty"))
        .arg(Arg::new("year").long("year").help("Training year"))
        .arg(Arg::new("phone").long("phone").help("Phone number"))
}
