//! kapply - declarative apply engine for Kubernetes
//!
//! Deploys a set of manifests as a named app: calculates the changes against
//! what the app owns on the cluster, applies them in dependency order and
//! waits for them to converge.

mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};

use cli::{AppArgs, ConfigSubcommand, DeployArgs, FilterArgs};

/// kapply - declarative apply engine for Kubernetes
#[derive(Parser, Debug)]
#[command(name = "kapply")]
#[command(about = "Deploy Kubernetes manifests as an app and wait for them to converge", long_about = None)]
struct Args {
    /// Enable debug logging (written to a temp file)
    #[arg(long, short = 'd', global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

/// Main commands
#[derive(Subcommand, Debug)]
enum Command {
    /// Deploy manifests as an app
    Deploy(DeployArgs),
    /// Delete an app and the resources it owns
    Delete {
        #[command(flatten)]
        app: AppArgs,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// List the resources an app owns
    Inspect {
        #[command(flatten)]
        app: AppArgs,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_file = cli::init_logging(args.debug);
    if let Some(ref log_path) = log_file {
        eprintln!(
            "Debug logging enabled. Logs written to: {}",
            log_path.display()
        );
    }

    match args.command {
        Command::Deploy(deploy) => cli::deploy(deploy).await,
        Command::Delete { app, filter } => cli::delete(app, filter).await,
        Command::Inspect { app } => cli::inspect(app).await,
        Command::Config { subcommand } => cli::handle_config_command(subcommand),
        Command::Version => {
            cli::display_version();
            Ok(())
        }
    }
}
