//! CLI command definitions and dispatch.

mod inspect;
mod login;
mod logout;
mod mirror;
mod version;

use clap::{Parser, Subcommand, ValueEnum};

/// Default registry for `login` / `logout` without a server argument.
const DEFAULT_LOGIN_SERVER: &str = "docker.io";

/// regmirror - mirror multi-arch container images between registries.
#[derive(Parser)]
#[command(name = "regmirror", version, about)]
pub struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Log line format on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Mirror every `SOURCE DEST TAG` line of a file (or stdin)
    Mirror(mirror::MirrorArgs),
    /// Show how a source image would be mirrored, without writing
    Inspect(inspect::InspectArgs),
    /// Store registry credentials
    Login(login::LoginArgs),
    /// Remove stored registry credentials
    Logout(logout::LogoutArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Mirror(args) => mirror::execute(args).await,
        Command::Inspect(args) => inspect::execute(args).await,
        Command::Login(args) => login::execute(args).await,
        Command::Logout(args) => logout::execute(args).await,
        Command::Version(args) => version::execute(args).await,
    }
}
