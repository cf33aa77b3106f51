use crate::cli::BackupArgs;
use crate::config::CliConfig;
use anyhow::{Context, Result};
use monograph_core::{RedbStorage, Storage};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::info;

pub async fn run(args: BackupArgs, config: CliConfig) -> Result<()> {
    let source = config.db_path();
    if !source.exists() {
        anyhow::bail!("No database at {}", source.display());
    }
    if let Some(dir) = args.path.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let engine = config.open_engine()?;
    let live = engine.stats()?;
    engine
        .storage()
        .snapshot(&args.path)
        .with_context(|| format!("Snapshot to {} failed", args.path.display()))?;
    drop(engine);

    // The copy must open cleanly and hold the same documents
    let copied = RedbStorage::open(&args.path)
        .with_context(|| format!("{} is not a readable database", args.path.display()))?
        .stats()?;
    if copied.document_count != live.document_count || copied.version_count != live.version_count {
        anyhow::bail!(
            "Snapshot holds {} documents / {} versions, database has {} / {}",
            copied.document_count,
            copied.version_count,
            live.document_count,
            live.version_count
        );
    }

    let digest = file_digest(&args.path)?;
    let sidecar = args.path.with_extension("sha256");
    std::fs::write(&sidecar, format!("{}  {}\n", digest, args.path.display()))?;
    info!("Backed up {} to {}", source.display(), args.path.display());

    println!(
        "Backed up {} documents ({} versions) to {}",
        copied.document_count,
        copied.version_count,
        args.path.display()
    );
    println!("SHA-256 {} written to {}", digest, sidecar.display());
    Ok(())
}

fn file_digest(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}
