use std::ffi::OsString;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod args;
mod auth;
mod config;
mod env;
mod login;
mod store;
mod target;
mod ui;

use crate::args::{BaseArgs, CLIArgs};
use crate::auth::AuthError;
use crate::ui::{print_command_status, CommandStatus};

const DEFAULT_CANARY_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-canary.dev");
const CLI_VERSION: &str = match option_env!("STUDIO_LOGIN_VERSION_STRING") {
    Some(version) => version,
    None => DEFAULT_CANARY_VERSION,
};

#[derive(Debug, Parser)]
#[command(
    name = "studio-login",
    about = "Log in to an admin UI from the terminal",
    version = CLI_VERSION
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Log in through the browser and store the issued tokens
    Login(CLIArgs<login::LoginArgs>),
    /// Show the stored tokens for an app
    Status(CLIArgs<login::StatusArgs>),
    /// Remove the stored tokens for an app
    Logout(CLIArgs<login::LogoutArgs>),
}

impl Commands {
    fn base(&self) -> &BaseArgs {
        match self {
            Commands::Login(cmd) => &cmd.base,
            Commands::Status(cmd) => &cmd.base,
            Commands::Logout(cmd) => &cmd.base,
        }
    }
}

fn init_tracing(verbose: bool) {
    // RUST_LOG takes precedence over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "info" } else { "warn" };
        EnvFilter::new(format!("studio_login={level},warn"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run() -> Result<()> {
    let argv: Vec<OsString> = std::env::args_os().collect();
    env::bootstrap_from_args(&argv)?;
    let cli = Cli::parse_from(argv);
    init_tracing(cli.command.base().verbose);

    match cli.command {
        Commands::Login(cmd) => login::run_login(cmd.base, cmd.args).await?,
        Commands::Status(cmd) => login::run_status(cmd.base, cmd.args)?,
        Commands::Logout(cmd) => login::run_logout(cmd.base, cmd.args)?,
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // the login flow has already reported its own failure
            if err.downcast_ref::<AuthError>().is_none() {
                print_command_status(CommandStatus::Error, &format!("{err:#}"));
            }
            ExitCode::FAILURE
        }
    }
}
