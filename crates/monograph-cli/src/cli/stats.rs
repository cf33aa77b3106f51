use crate::config::CliConfig;
use anyhow::Result;

pub async fn run(config: CliConfig) -> Result<()> {
    let engine = config.open_engine()?;
    let stats = engine.stats()?;

    let db_mb = stats.db_size_bytes as f64 / 1_048_576.0;

    println!();
    println!("Monograph Overview");
    println!("{}", "─".repeat(50));
    println!("Documents: {:>8}", stats.document_count);
    for (collection, count) in &stats.documents_by_collection {
        println!("  {:16} {:>8}", collection, count);
    }
    println!("Shared:    {:>8}", stats.shared_document_count);
    println!("Groups:    {:>8}", stats.group_count);
    println!("Versions:  {:>8}", stats.version_count);
    println!("Baselines: {:>8}", stats.baseline_count);
    println!("DB Size:   {:>7.1} MB", db_mb);
    println!("{}", "─".repeat(50));
    println!();

    Ok(())
}
