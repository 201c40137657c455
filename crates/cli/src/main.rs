//! rcfg - router configuration management

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use cli_lib::Settings;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

mod cmd;

/// Router configuration management: show, commit, roll back and migrate
#[derive(Parser)]
#[command(name = "rcfg")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (default: $RCFG_CONFIG or <config dir>/rcfg/config.toml)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
#[group(multiple = false)]
struct ShowFormat {
    /// Print as JSON
    #[arg(long)]
    json: bool,
    /// Print as set commands
    #[arg(long)]
    commands: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the running configuration, or the part below PATH
    Show {
        #[command(flatten)]
        format: ShowFormat,
        path: Vec<String>,
    },
    /// Apply a file of set/delete commands and commit
    Apply {
        file: PathBuf,
        /// Commit comment
        #[arg(short = 'm', long)]
        comment: Option<String>,
        /// Print the resulting commands without committing
        #[arg(long)]
        dry_run: bool,
    },
    /// Replace the configuration with a file and commit
    Load {
        file: PathBuf,
        /// Commit comment
        #[arg(short = 'm', long)]
        comment: Option<String>,
    },
    /// Show changes between archived revisions
    Compare {
        /// Older revision
        rev: usize,
        /// Newer revision (default: REV - 1)
        rev2: Option<usize>,
        /// Print set/delete commands instead of a line diff
        #[arg(long)]
        commands: bool,
    },
    /// List archived revisions
    Log,
    /// Print an archived revision
    ShowRevision {
        rev: usize,
    },
    /// Commit an archived revision as the new configuration
    Rollback {
        rev: usize,
        /// Commit comment
        #[arg(short = 'm', long)]
        comment: Option<String>,
    },
    /// Upgrade a saved configuration file to the current component versions
    Migrate {
        file: PathBuf,
        /// Run every migration script regardless of recorded versions
        #[arg(long)]
        force: bool,
        /// Only rewrite a legacy version trailer
        #[arg(long = "virtual")]
        virtual_only: bool,
        /// Write the result here instead of replacing FILE
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the effective settings
    Config,
}

/// Install the stderr subscriber and, with a log directory, a file layer
fn init_tracing(settings: &Settings) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let (file_layer, guard) = match &settings.paths.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::never(dir, "rcfg.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file_layer)
        .init();
    Ok(guard)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load(cli.settings.as_deref()).context("Failed to load settings")?;
    let _guard = init_tracing(&settings)?;

    match cli.command {
        Commands::Show { format, path } => {
            let format = if format.json {
                cmd::show::Format::Json
            } else if format.commands {
                cmd::show::Format::Commands
            } else {
                cmd::show::Format::Text
            };
            cmd::show::run(&settings, &path, format)
        }
        Commands::Apply { file, comment, dry_run } => {
            cmd::apply::run(&settings, &file, comment, dry_run)
        }
        Commands::Load { file, comment } => cmd::apply::run_load(&settings, &file, comment),
        Commands::Compare { rev, rev2, commands } => {
            cmd::compare::run(&settings, rev, rev2, commands)
        }
        Commands::Log => cmd::log::run(&settings),
        Commands::ShowRevision { rev } => cmd::log::run_show_revision(&settings, rev),
        Commands::Rollback { rev, comment } => cmd::rollback::run(&settings, rev, comment),
        Commands::Migrate { file, force, virtual_only, output } => {
            cmd::migrate::run(&settings, &file, force, virtual_only, output)
        }
        Commands::Config => cmd::config::run(&settings),
    }
}
