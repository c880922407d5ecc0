//! slipway CLI tool.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "slipway")]
#[command(about = "Inspect and resolve slipway build manifests", long_about = None)]
struct Cli {
    /// Namespace for objects that do not name one
    #[arg(short, long, env = "SLIPWAY_NAMESPACE")]
    namespace: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Yaml)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum GitHubEvent {
    Push,
    PullRequest,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate strategies, builds and build runs
    Validate {
        /// Manifest files or directories
        #[arg(short = 'f', long = "filename", required = true)]
        files: Vec<PathBuf>,
    },
    /// Resolve a build run into its execution plan
    Resolve {
        #[arg(short = 'f', long = "filename", required = true)]
        files: Vec<PathBuf>,
        /// Build run name
        run: String,
    },
    /// List the runs of a build that retention would delete
    Retention {
        #[arg(short = 'f', long = "filename", required = true)]
        files: Vec<PathBuf>,
        /// Build name
        build: String,
        /// Evaluation time (RFC 3339), defaults to now
        #[arg(long)]
        now: Option<String>,
    },
    /// List builds whose triggers match an event
    Triggers {
        #[arg(short = 'f', long = "filename", required = true)]
        files: Vec<PathBuf>,
        /// GitHub event name
        #[arg(long, value_enum, requires = "branch", conflicts_with = "image")]
        github_event: Option<GitHubEvent>,
        /// Branch of the GitHub event
        #[arg(long)]
        branch: Option<String>,
        /// Image name that changed
        #[arg(long)]
        image: Option<String>,
    },
    /// Print the custom resource definitions
    Crds,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let ctx = commands::Context::new(cli.namespace, cli.output)?;

    match cli.command {
        Commands::Validate { files } => {
            commands::validate(&ctx, &files)?;
        }
        Commands::Resolve { files, run } => {
            commands::resolve::resolve(&ctx, &files, &run).await?;
        }
        Commands::Retention { files, build, now } => {
            commands::retention::retention(&ctx, &files, &build, now.as_deref())?;
        }
        Commands::Triggers {
            files,
            github_event,
            branch,
            image,
        } => {
            let event = commands::triggers::event(github_event, branch, image)?;
            commands::triggers::triggers(&ctx, &files, &event)?;
        }
        Commands::Crds => {
            commands::crds()?;
        }
    }

    Ok(())
}
