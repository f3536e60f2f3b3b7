//! Strata CLI - quality reconciliation toolkit
//!
//! Features:
//! - Quality ID encoding and decoding
//! - Source selection for a given browser environment
//! - Scripted playback sessions against simulated backends

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;
mod script;

use output::OutputFormat;

/// Strata CLI - quality reconciliation toolkit
#[derive(Parser)]
#[command(name = "strata")]
#[command(version)]
#[command(about = "Quality ID codec, source selection and simulated playback sessions", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a quality level as its quality ID
    Encode {
        /// Bitrate in bps; fractional values are truncated
        #[arg(short, long)]
        bitrate: f64,

        #[arg(long)]
        width: f64,

        #[arg(long)]
        height: f64,

        /// Media kind (video, audio, image)
        #[arg(short, long)]
        kind: Option<String>,

        /// Frame rate, e.g. 30 or 30000/1001
        #[arg(long)]
        fps: Option<String>,
    },

    /// Decode quality IDs
    Decode {
        /// IDs to decode
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Pick the source a player would bootstrap from
    Select {
        /// JSON file holding an array of sources
        sources: PathBuf,

        /// Derive the environment from a user-agent string
        #[arg(long, conflicts_with_all = ["safari", "mobile"])]
        user_agent: Option<String>,

        /// Safari runtime (native HLS)
        #[arg(long)]
        safari: bool,

        /// Mobile runtime
        #[arg(long)]
        mobile: bool,

        /// No MediaSource extensions
        #[arg(long)]
        no_mse: bool,
    },

    /// Replay a scripted session against simulated backends
    Simulate {
        /// JSON session script
        script: PathBuf,

        /// Player configuration file, overriding the script's
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_writer(std::io::stderr)
        .init();

    strata_core::init();

    match cli.command {
        Commands::Encode { bitrate, width, height, kind, fps } => {
            commands::encode(bitrate, width, height, kind.as_deref(), fps.as_deref(), cli.format)?;
        }
        Commands::Decode { ids } => {
            commands::decode(&ids, cli.format)?;
        }
        Commands::Select { sources, user_agent, safari, mobile, no_mse } => {
            let capabilities =
                commands::capabilities(user_agent.as_deref(), safari, mobile, !no_mse);
            commands::select(&sources, capabilities, cli.format)?;
        }
        Commands::Simulate { script, config } => {
            commands::simulate(&script, config.as_deref(), cli.format).await?;
        }
    }

    Ok(())
}
