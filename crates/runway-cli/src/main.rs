//! Runway CLI tool.

use clap::{Parser, Subcommand};
use runway_core::{BuildId, BuildType};
use tracing_subscriber::EnvFilter;

mod client;
mod commands;

use client::ApiClient;

#[derive(Parser)]
#[command(name = "runway")]
#[command(about = "Runway CI client", long_about = None)]
#[command(version)]
struct Cli {
    /// Runway server URL
    #[arg(long, env = "RUNWAY_SERVER", default_value = "http://localhost:3000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List builds, newest first
    Builds {
        /// Only builds of this ref
        #[arg(long = "ref", requires = "build_type")]
        ref_name: Option<String>,
        /// Build type of the ref (push or pull-request)
        #[arg(long = "type")]
        build_type: Option<BuildType>,
        /// Maximum number of builds to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Show build details
    Show {
        /// Build ID
        id: BuildId,
    },
    /// Print the output of a build
    Logs {
        /// Build ID
        id: BuildId,
        /// Keep polling until the build finishes
        #[arg(short, long)]
        follow: bool,
    },
    /// Validate a server configuration file
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "runway.kdl")]
        path: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = ApiClient::new(&cli.server);

    match cli.command {
        Commands::Builds {
            ref_name,
            build_type,
            limit,
        } => {
            commands::builds::list(&client, build_type.zip(ref_name), limit).await?;
        }
        Commands::Show { id } => {
            commands::builds::show(&client, id).await?;
        }
        Commands::Logs { id, follow } => {
            let mut out = std::io::stdout().lock();
            commands::logs::print(&client, id, follow, &mut out).await?;
        }
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
    }

    Ok(())
}
