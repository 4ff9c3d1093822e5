//! # Nexus CLI (`nexus`)
//!
//! The `nexus` binary runs the chat server, an interactive terminal client,
//! and a couple of transcript maintenance commands.
//!
//! ## Usage
//!
//! ```bash
//! nexus --config ./config/nexus.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `nexus init` | Create the SQLite database and the `messages` table |
//! | `nexus serve` | Start the HTTP server (`/api/messages`, `/api/chat`) |
//! | `nexus chat` | Chat in the terminal, replies streamed as they arrive |
//! | `nexus history` | Print the stored transcript |
//! | `nexus clear` | Delete every stored message |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! nexus init
//!
//! # Serve the API and a built UI
//! GEMINI_API_KEY=... nexus serve
//!
//! # Chat against the transcript of a running server
//! GEMINI_API_KEY=... nexus chat --remote http://127.0.0.1:3000
//! ```
//!
//! Logging goes to stderr and is controlled with `NEXUS_LOG`
//! (e.g. `NEXUS_LOG=nexus_chat=debug,tower_http=info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use nexus_chat::chat_cmd::{self, AgentOverrides};
use nexus_chat::{config, migrate, server};

/// Nexus: a local-first chat client with streamed Gemini replies.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. When the file does not exist, built-in defaults are used.
#[derive(Parser)]
#[command(
    name = "nexus",
    about = "Nexus: a local-first chat client with streamed Gemini replies",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/nexus.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the `messages` table. Safe to
    /// run more than once.
    Init,

    /// Start the HTTP server.
    ///
    /// Binds `[server].bind`, serves the transcript API and the streaming
    /// chat endpoint, and the static UI when `[server].static_dir` is set.
    Serve,

    /// Chat interactively in the terminal.
    Chat {
        /// Use the transcript of a running server instead of the local database.
        #[arg(long, value_name = "URL")]
        remote: Option<String>,

        /// Agent display name.
        #[arg(long)]
        name: Option<String>,

        /// Model identifier (e.g. `gemini-2.5-flash`).
        #[arg(long)]
        model: Option<String>,

        /// System instruction sent with every message.
        #[arg(long)]
        system: Option<String>,

        /// Sampling temperature between 0.0 and 1.0.
        #[arg(long)]
        temperature: Option<f32>,
    },

    /// Print the stored transcript.
    History {
        #[arg(long, value_name = "URL")]
        remote: Option<String>,
    },

    /// Delete every stored message.
    Clear {
        #[arg(long, value_name = "URL")]
        remote: Option<String>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("NEXUS_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Chat {
            remote,
            name,
            model,
            system,
            temperature,
        } => {
            chat_cmd::validate_temperature(temperature)?;
            let overrides = AgentOverrides {
                name,
                model,
                system,
                temperature,
            };
            chat_cmd::run_chat(&cfg, remote.as_deref(), &overrides).await?;
        }
        Commands::History { remote } => {
            chat_cmd::run_history(&cfg, remote.as_deref()).await?;
        }
        Commands::Clear { remote } => {
            chat_cmd::run_clear(&cfg, remote.as_deref()).await?;
        }
    }

    Ok(())
}
