use crate::cli::ConfigCommands;
use crate::config::CliConfig;
use anyhow::{Context, Result};
use std::path::Path;

pub async fn run(cmd: ConfigCommands, config_path: &Path) -> Result<()> {
    match cmd {
        ConfigCommands::Validate => validate(config_path),
        ConfigCommands::Show => show(config_path),
    }
}

fn validate(path: &Path) -> Result<()> {
    let config = CliConfig::load(path)?;
    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            eprintln!("{}: {}", path.display(), problem);
        }
        anyhow::bail!("{} problems in {}", problems.len(), path.display());
    }

    println!(
        "{} is valid (database {}, threshold {:.2}, unchanged saves: {:?})",
        path.display(),
        config.db_path().display(),
        config.engine.similarity.threshold,
        config.engine.unchanged_save
    );
    Ok(())
}

/// Print the effective configuration, defaults filled in.
fn show(path: &Path) -> Result<()> {
    let config = CliConfig::load_or_default(path);
    let rendered = toml::to_string_pretty(&config).context("Failed to render config")?;
    print!("{}", rendered);
    Ok(())
}
