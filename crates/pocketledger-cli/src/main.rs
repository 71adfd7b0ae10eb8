//! pocketledger - command-line access to the budgeting API session.
//!
//! Signs in, registers, signs out and reports who the stored token
//! belongs to. The token is kept between runs in the backend chosen in
//! the config file.

use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pocketledger_core::{Config, RegistrationForm, SessionStore, TokenBackend};

const USERNAME_ENV: &str = "POCKETLEDGER_USERNAME";
const PASSWORD_ENV: &str = "POCKETLEDGER_PASSWORD";

#[derive(Parser)]
#[command(name = "pocketledger")]
#[command(about = "Sign in to the pocketledger budgeting API")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// API base URL (overrides config and POCKETLEDGER_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Keep the token in the OS keychain instead of a file
    #[arg(long, global = true)]
    keyring: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show whether the stored token is still accepted
    Status,
    /// Sign in with username and password
    Login {
        #[arg(short, long)]
        username: Option<String>,
    },
    /// Create an account and sign in
    Register {
        #[arg(short, long)]
        username: Option<String>,
        #[arg(short, long)]
        email: Option<String>,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
    },
    /// Sign out and forget the stored token
    Logout,
    /// Print the signed-in user as JSON
    Whoami,
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();
    let cli = Cli::parse();

    let mut config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            Config::default()
        }
    };
    if let Some(url) = cli.api_url.clone() {
        config.api_base_url = url;
    }
    if cli.keyring {
        config.token_backend = TokenBackend::Keyring;
    }
    debug!(api = %config.api_base_url, backend = ?config.token_backend, "Config loaded");

    let mut session = config.session_store()?;
    session.start().await;

    match cli.command {
        Commands::Status => print_status(&session),
        Commands::Login { username } => login(&mut session, &mut config, username).await,
        Commands::Register {
            username,
            email,
            first_name,
            last_name,
        } => {
            let mut form = RegistrationForm::new(
                &required(username, "Username")?,
                &required(email, "Email")?,
                &rpassword::prompt_password("Password: ")?,
                &rpassword::prompt_password("Confirm password: ")?,
            );
            form.first_name = first_name;
            form.last_name = last_name;
            register(&mut session, &mut config, form).await
        }
        Commands::Logout => {
            session.logout().await;
            println!("Signed out.");
            Ok(())
        }
        Commands::Whoami => match session.current_user() {
            Some(user) => {
                println!("{}", serde_json::to_string_pretty(user)?);
                Ok(())
            }
            None => bail!(failure_message(&session, "Not signed in")),
        },
    }
}

fn print_status(session: &SessionStore) -> Result<()> {
    let view = session.view();
    println!("Status: {}", view.status.display_name());
    if let Some(user) = view.current_user {
        println!("User:   {} <{}>", user.display_name(), user.email);
    }
    if let Some(error) = view.error {
        println!("Note:   {}", error);
    }
    Ok(())
}

async fn login(
    session: &mut SessionStore,
    config: &mut Config,
    username: Option<String>,
) -> Result<()> {
    if session.is_authenticated() {
        session.clear_error();
        let user = session.current_user().map(|u| u.username.clone()).unwrap_or_default();
        println!("Already signed in as {}.", user);
        return Ok(());
    }
    // A stale-token notice from start-up is not interesting here.
    session.clear_error();

    let username = match username
        .or_else(|| std::env::var(USERNAME_ENV).ok())
        .filter(|u| !u.is_empty())
    {
        Some(u) => u,
        None => prompt_username(config.last_username.as_deref())?,
    };
    let password = match std::env::var(PASSWORD_ENV) {
        Ok(p) if !p.is_empty() => p,
        _ => rpassword::prompt_password("Password: ")?,
    };

    if !session.login(&username, &password).await {
        bail!(failure_message(session, "Login failed"));
    }

    remember_username(config, &username);
    let name = session.current_user().map(|u| u.display_name()).unwrap_or(username);
    println!("Signed in as {}.", name);
    Ok(())
}

async fn register(
    session: &mut SessionStore,
    config: &mut Config,
    form: RegistrationForm,
) -> Result<()> {
    if !form.passwords_match() {
        bail!("Passwords do not match");
    }
    session.clear_error();

    if !session.register(&form).await {
        bail!(failure_message(session, "Registration failed"));
    }

    remember_username(config, &form.username);
    println!("Account created. Signed in as {}.", form.username);
    Ok(())
}

fn remember_username(config: &mut Config, username: &str) {
    config.last_username = Some(username.to_string());
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    } else {
        info!(username = username, "Saved last username");
    }
}

fn failure_message(session: &SessionStore, fallback: &str) -> String {
    session.last_error().unwrap_or(fallback).to_string()
}

fn required(value: Option<String>, label: &str) -> Result<String> {
    match value.filter(|v| !v.is_empty()) {
        Some(v) => Ok(v),
        None => {
            let v = prompt(&format!("{}: ", label))?;
            if v.is_empty() {
                bail!("{} is required", label);
            }
            Ok(v)
        }
    }
}

fn prompt_username(last_username: Option<&str>) -> Result<String> {
    let input = match last_username {
        Some(last) => prompt(&format!("Username [{}]: ", last))?,
        None => prompt("Username: ")?,
    };
    if input.is_empty() {
        return last_username
            .map(str::to_string)
            .context("Username is required");
    }
    Ok(input)
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}
