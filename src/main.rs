use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bitbucket_mirror::{Config, RepositoryCatalog, SyncEngine, SyncSummary};

#[derive(Parser)]
#[command(name = "bitbucket-mirror")]
#[command(about = "Downloads all user and team repositories to a destination directory")]
#[command(version)]
struct Cli {
    /// Directory where to clone repositories to
    #[arg(value_name = "/home/user/bitbucket_backup/")]
    destination: String,

    /// OAuth2 client key
    client_key: String,

    /// OAuth2 client secret
    client_secret: String,

    /// Repository owners (team or user) to sync, others will be ignored
    #[arg(short, long, value_name = "my_company", num_args = 0..)]
    include_owners: Vec<String>,

    /// Repository owners (team or user) not to sync, others will be synced
    #[arg(short = 'x', long, value_name = "my_user", num_args = 0..)]
    exclude_owners: Vec<String>,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.clone())?;
    init_logging(cli.verbose, &config)?;
    info!("Starting bitbucket-mirror v{}", env!("CARGO_PKG_VERSION"));

    config.override_filters(cli.include_owners, cli.exclude_owners);

    let destination = shellexpand::full(&cli.destination)
        .context("Failed to expand destination path")?
        .into_owned();
    let destination = PathBuf::from(destination);

    let catalog = RepositoryCatalog::from_config(&config, &cli.client_key, &cli.client_secret)
        .context("Failed to create Bitbucket client")?;
    let engine = SyncEngine::from_config(&config);

    let summary = engine
        .run_sync(&catalog, &destination, &config.filters)
        .await?;

    print_summary(&summary);

    if summary.failed_operations > 0 {
        std::process::exit(1);
    }

    Ok(())
}

/// Initialize logging; RUST_LOG wins, then --verbose, then the configured level
fn init_logging(verbose: bool, config: &Config) -> Result<()> {
    let default_level = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(config.logging.color))
        .with(filter)
        .init();

    Ok(())
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(&path),
        None => Config::load_or_default(),
    }
}

fn print_summary(summary: &SyncSummary) {
    println!("\nSynchronization complete");
    println!("   Total repositories: {}", summary.total_repositories);
    println!("   Successful: {}", summary.successful_operations);
    println!("   Failed: {}", summary.failed_operations);
    println!("   Duration: {:.2}s", summary.duration.as_secs_f64());

    if summary.failed_operations > 0 {
        println!("\nFailed repositories:");
        for result in summary.failures() {
            println!(
                "   {} ({}) exit code {}: {}",
                result.clone_url,
                result.local_path.display(),
                result.exit_code,
                result.error.as_deref().unwrap_or("")
            );
        }
    }
}
