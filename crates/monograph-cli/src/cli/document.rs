use crate::cli::{read_content, resolve_doc, short_id, HistoryArgs, RevertArgs, SaveArgs, ShowArgs};
use crate::config::CliConfig;
use anyhow::Result;
use monograph_core::{DiffEngine, Document, Section};
use tracing::info;

pub async fn show(args: ShowArgs, config: CliConfig) -> Result<()> {
    let engine = config.open_engine()?;
    let doc = resolve_doc(&engine, &args.doc)?;

    if args.format == "json" {
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    print_document_detail(&doc);
    if doc.baseline_id.is_some() {
        let modified = engine.baselines().is_modified(&doc)?;
        println!(
            "Baseline:   {}",
            if modified { "modified since import" } else { "unchanged since import" }
        );
    }
    println!();
    for (i, section) in doc.sections.iter().enumerate() {
        println!("[{}] {}", i, section.kind_str());
        for line in section.body().split('\n') {
            println!("    {}", line);
        }
    }
    Ok(())
}

pub async fn save(args: SaveArgs, config: CliConfig) -> Result<()> {
    let engine = config.open_engine()?;
    let doc = resolve_doc(&engine, &args.doc)?;
    let sections = read_content(&args.file, args.note)?;
    let expected = args.expected_version.unwrap_or(doc.version);
    let author = config.author_or(args.author);

    if let Some(group) = doc.shared_group_id {
        eprintln!(
            "Note: {} is shared in group {}; use apply-edit to propagate. Saving this member only.",
            short_id(&doc.id),
            group
        );
    }

    let saved = engine.save(doc.id, expected, sections, &args.message, &author)?;
    info!("Saved {} as v{}", saved.id, saved.version);
    println!("Saved {} v{} ({})", short_id(&saved.id), saved.version, saved.content_hash);
    Ok(())
}

pub async fn revert(args: RevertArgs, config: CliConfig) -> Result<()> {
    let engine = config.open_engine()?;
    let doc = resolve_doc(&engine, &args.doc)?;
    let author = config.author_or(args.author);

    let reverted = engine.versions().revert(&doc, args.version, &author)?;
    println!(
        "Reverted {} to the content of v{} as v{}",
        short_id(&reverted.id),
        args.version,
        reverted.version
    );
    Ok(())
}

pub async fn history(args: HistoryArgs, config: CliConfig) -> Result<()> {
    let engine = config.open_engine()?;
    let doc = resolve_doc(&engine, &args.doc)?;
    let history = engine.history(doc.id)?;

    if args.format == "json" {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }

    println!(
        "{:>4}  {:<16}  {:<17}  {:<12}  {:<9}  MESSAGE",
        "VER", "HASH", "WHEN", "AUTHOR", "+/-/~"
    );
    println!("{}", "─".repeat(80));
    let mut previous: Option<&[Section]> = None;
    for snapshot in &history {
        let stats = DiffEngine::stats(&DiffEngine::diff(
            previous.unwrap_or(&[]),
            &snapshot.sections,
        ));
        println!(
            "{:>4}  {:<16}  {:<17}  {:<12}  {:<9}  {}",
            snapshot.version,
            snapshot.content_hash,
            snapshot.timestamp.format("%Y-%m-%d %H:%M"),
            snapshot.author,
            format!("{}/{}/{}", stats.added, stats.removed, stats.changed),
            snapshot.commit_message
        );
        previous = Some(&snapshot.sections);
    }
    Ok(())
}

fn print_document_detail(doc: &Document) {
    println!("ID:         {}", doc.id);
    println!("Collection: {}", doc.collection);
    println!("KEYNAME:    {}", doc.key_name);
    println!("Version:    {}", doc.version);
    println!("Hash:       {}", doc.content_hash);
    println!(
        "Shared:     {}",
        doc.shared_group_id
            .map(|g| g.to_string())
            .unwrap_or_else(|| "no".to_string())
    );
    println!("Updated:    {}", doc.updated_at.format("%Y-%m-%d %H:%M UTC"));
}
