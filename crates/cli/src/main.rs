//! Lantern CLI — the main entry point.
//!
//! Commands:
//! - `init`   — Write a default config file
//! - `serve`  — Start the HTTP gateway
//! - `ask`    — Chat from the terminal
//! - `worker` — Run one generation from hand-off files (spawned by the above)

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "lantern",
    about = "Lantern — offline chat with context-window budgeting",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config to ~/.lantern/config.toml
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Chat from the terminal
    Ask {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Continue a stored chat
        #[arg(long)]
        chat_id: Option<String>,

        /// Override the default system prompt
        #[arg(long)]
        system: Option<String>,
    },

    /// Generate one reply from a hand-off request file
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        input: PathBuf,

        #[arg(long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr: the worker's stderr is the parent's diagnostic channel
    // and `ask` keeps stdout for replies.
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init { force } => commands::init::run(force).await?,
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Ask {
            message,
            chat_id,
            system,
        } => commands::ask::run(message, chat_id, system).await?,
        Commands::Worker { input, output } => commands::worker::run(input, output).await?,
    }

    Ok(())
}
