use crate::cli::{short_id, ImportArgs};
use crate::config::CliConfig;
use anyhow::{Context, Result};
use monograph_core::{note_to_sections, parse_records, ImportOptions};
use tracing::info;

pub async fn run(args: ImportArgs, config: CliConfig) -> Result<()> {
    let path = &args.file;
    if !path.exists() {
        anyhow::bail!("File not found: {}", path.display());
    }

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let records = parse_records(&raw).with_context(|| format!("Failed to parse {}", path.display()))?;
    println!("Parsed {} records from {}", records.len(), path.display());

    if args.dry_run {
        // Same conversion the importer runs first; nothing is opened or written.
        for record in &records {
            let sections = note_to_sections(&record.key_name, &record.note)?;
            println!("  {} ({} sections)", record.key_name, sections.len());
        }
        println!("Dry run: no changes written.");
        return Ok(());
    }

    let engine = config.open_engine()?;
    let options = ImportOptions::new()
        .with_author(config.author_or(args.author))
        .with_link_duplicates(args.link_duplicates);
    let report = engine.import(&args.collection, &records, &options)?;
    info!(
        "Imported {} documents into '{}'",
        report.created.len(),
        report.collection
    );

    if args.format == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "Created {} documents in '{}' ({} already present)",
        report.created.len(),
        report.collection,
        report.skipped_existing.len()
    );
    for created in report.created.iter().filter(|c| !c.duplicates.is_empty()) {
        let dups: Vec<String> = created.duplicates.iter().map(short_id).collect();
        let linked = match (&created.linked_group, &created.link_error) {
            (Some(group), _) => format!(" → linked in {}", short_id(group)),
            (None, Some(e)) => format!(" → link failed: {}", e),
            (None, None) => String::new(),
        };
        println!(
            "  {} duplicates {}{}",
            created.key_name,
            dups.join(", "),
            linked
        );
    }
    Ok(())
}
