//! # Lovkode Admin CLI
//!
//! §12's ambient admin surface: `serve` (placeholder — reports readiness
//! and exits, since wiring an actual transport is out of scope),
//! `sync [--force] [--dataset lover|forskrifter]`, and `status`.
//! Grounded on the donor's `main.rs` (clap `Command` builder,
//! `init_logging`, health-check-before-serve flow) generalized from the
//! donor's web-server startup to this crate's offline admin operations.

use clap::{Parser as ClapParser, Subcommand};
use lovkode::{Config, Service};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(ClapParser)]
#[command(name = "lovkode-admin", version, about = "Admin CLI for the Lovkode lookup and search service")]
struct Cli {
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    verbose: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Reports the core is ready; wiring an actual transport is out of scope.
    Serve,
    /// Syncs one or both Lovdata datasets into the configured store.
    Sync {
        #[arg(long)]
        force: bool,
        #[arg(long)]
        dataset: Option<String>,
    },
    /// Prints SyncMeta for each dataset.
    Status,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let exit_code = match run(&cli).await {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!(error = %err, "command failed");
            1
        }
    };
    std::process::exit(exit_code);
}

async fn run(cli: &Cli) -> lovkode::Result<()> {
    let config = Config::from_file(&cli.config)?;
    let service = Service::new(&config).await?;

    match &cli.command {
        CliCommand::Serve => {
            tracing::info!("core initialized and ready; no transport is wired in this build");
            Ok(())
        }
        CliCommand::Sync { force, dataset } => {
            let datasets: Vec<&str> = match dataset.as_deref() {
                Some(d) => vec![d],
                None => vec!["lover", "forskrifter"],
            };
            for dataset in datasets {
                let report = service.ingestor.sync_dataset(dataset, *force).await?;
                println!(
                    "{}: {} ({} docs, {} skipped, up_to_date={})",
                    report.dataset, if report.up_to_date { "up to date" } else { "synced" },
                    report.documents_indexed, report.documents_skipped, report.up_to_date
                );
            }
            Ok(())
        }
        CliCommand::Status => {
            let statuses = service.store.get_sync_status().await?;
            if statuses.is_empty() {
                println!("no datasets synced yet");
            }
            for meta in statuses {
                println!(
                    "{}: last_modified={} synced_at={} file_count={}",
                    meta.dataset, meta.last_modified, meta.synced_at, meta.file_count
                );
            }
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::registry().with(tracing_subscriber::fmt::layer()).with(filter).init();
}
