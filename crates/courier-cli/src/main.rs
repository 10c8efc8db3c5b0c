mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Courier -- supervised Discord forwarding client.
#[derive(Parser, Debug)]
#[command(name = "courier", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default configuration to ~/.courier/courier.toml
    Init,

    /// Run the daemon in the foreground
    Run,

    /// Start the supervised client
    Start {
        /// Bot token to connect with (defaults to the stored one)
        #[arg(long)]
        token: Option<String>,
    },

    /// Stop the supervised client and suppress automatic restarts
    Stop,

    /// Show the supervised client's status
    Status {
        /// Print the raw JSON status
        #[arg(long)]
        json: bool,
    },

    /// Stop the client and exit the daemon
    Shutdown,
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing with env filter (e.g., RUST_LOG=debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => commands::daemon::init(),
        Commands::Run => commands::daemon::run(),
        Commands::Start { token } => commands::daemon::start(token),
        Commands::Stop => commands::daemon::stop(),
        Commands::Status { json } => commands::daemon::status(json),
        Commands::Shutdown => commands::daemon::shutdown(),
    }
}
