mod commands;
mod session;
mod tui;
mod ui;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::{NodesCommand, ServicesCommand};
use session::Overrides;
use ui::theme::{Palette, Theme};

#[derive(Parser)]
#[command(name = "nodepanel")]
#[command(about = "Manage VPN proxy nodes and the protocols they serve", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (default: $NODEPANEL_CONFIG or nodepanel.yaml in this or a parent directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Panel API base URL, overriding the config file
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Access token, overriding the config file and environment
    #[arg(long, global = true)]
    token: Option<String>,

    /// Run against a built-in in-memory backend
    #[arg(long, global = true)]
    demo: bool,

    /// Use the high-contrast palette in the dashboard
    #[arg(long, global = true)]
    high_contrast: bool,

    /// Log more (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage nodes
    #[command(subcommand)]
    Nodes(NodesCommand),
    /// Manage the services bound to a node
    #[command(subcommand)]
    Services(ServicesCommand),
    /// Interactive dashboard (default)
    Tui,
    /// Check configuration, credentials and backend reachability
    Doctor,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            config: self.config.clone(),
            base_url: self.base_url.clone(),
            token: self.token.clone(),
            demo: self.demo,
        }
    }
}

/// Logs go to stderr. The dashboard owns the terminal, so it stays
/// silent unless RUST_LOG asks otherwise.
fn init_logging(verbose: u8, interactive: bool) {
    let default = match (interactive, verbose) {
        (true, _) => "off",
        (false, 0) => "warn",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let interactive = matches!(cli.command, None | Some(Commands::Tui));
    init_logging(cli.verbose, interactive);

    if cli.high_contrast {
        ui::theme::init(Theme::new(Palette::high_contrast()));
    }

    let overrides = cli.overrides();
    match cli.command.unwrap_or(Commands::Tui) {
        Commands::Doctor => commands::run_doctor(&overrides).await,
        command => {
            let resolved = session::resolve(&overrides).context("could not load configuration")?;
            tracing::debug!(origin = %resolved.origin, "configuration resolved");
            let directory =
                session::connect(&resolved).context("could not set up the backend client")?;
            let dashboard = resolved.config.dashboard;

            match command {
                Commands::Nodes(command) => {
                    commands::handle_nodes_command(directory, &dashboard.status_policy(), command)
                        .await
                }
                Commands::Services(command) => {
                    commands::handle_services_command(directory, command).await
                }
                _ => tui::run_tui(directory, &dashboard).await,
            }
        }
    }
}
