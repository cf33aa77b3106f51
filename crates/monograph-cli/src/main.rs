mod cli;
mod config;

use clap::Parser;
use cli::{Cli, Commands};
use config::CliConfig;
use tracing::debug;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing. Library logs arrive through the `log` bridge.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let opts = Cli::parse();

    let mut config = CliConfig::load_or_default(&opts.config);
    if let Some(data_dir) = opts.data_dir {
        config.data_dir = data_dir;
    }
    debug!("Data: {}", config.db_path().display());

    match opts.command {
        Commands::Import(args) => cli::import::run(args, config).await,
        Commands::Export(args) => cli::export::run(args, config).await,
        Commands::Show(args) => cli::document::show(args, config).await,
        Commands::Save(args) => cli::document::save(args, config).await,
        Commands::Revert(args) => cli::document::revert(args, config).await,
        Commands::History(args) => cli::document::history(args, config).await,
        Commands::Diff(args) => cli::diff::run(args, config).await,
        Commands::Duplicates(args) => cli::duplicates::run(args, config).await,
        Commands::Link(args) => cli::shared::link(args, config).await,
        Commands::Unlink(args) => cli::shared::unlink(args, config).await,
        Commands::ApplyEdit(args) => cli::shared::apply_edit(args, config).await,
        Commands::Reconcile(args) => cli::shared::reconcile(args, config).await,
        Commands::Cluster(args) => cli::cluster::run(args, config).await,
        Commands::Stats => cli::stats::run(config).await,
        Commands::Backup(args) => cli::backup::run(args, config).await,
        Commands::Config(cmd) => cli::config_cmd::run(cmd, &opts.config).await,
    }
}
