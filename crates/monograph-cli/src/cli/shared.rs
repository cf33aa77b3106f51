use crate::cli::{
    read_content, resolve_doc, short_id, ApplyEditArgs, LinkArgs, ReconcileArgs, UnlinkArgs,
};
use crate::config::CliConfig;
use anyhow::{Context, Result};
use monograph_core::{ApplyEditReport, EditStrategy, Monograph, TargetStatus};
use std::collections::BTreeSet;
use tracing::{info, warn};
use uuid::Uuid;

pub async fn link(args: LinkArgs, config: CliConfig) -> Result<()> {
    let engine = config.open_engine()?;
    let ids = args
        .docs
        .iter()
        .map(|r| resolve_doc(&engine, r).map(|d| d.id))
        .collect::<Result<Vec<_>>>()?;

    let group = engine.link(&ids)?;
    println!(
        "Linked {} documents into group {} (canonical {})",
        group.member_ids.len(),
        group.id,
        group.canonical_hash
    );
    Ok(())
}

pub async fn unlink(args: UnlinkArgs, config: CliConfig) -> Result<()> {
    let engine = config.open_engine()?;
    let doc = resolve_doc(&engine, &args.doc)?;
    let group_id = doc
        .shared_group_id
        .with_context(|| format!("{} is not shared", args.doc))?;

    match engine.unlink(group_id, doc.id)? {
        Some(group) => println!(
            "Unlinked {}; group {} has {} members left",
            short_id(&doc.id),
            group.id,
            group.member_ids.len()
        ),
        None => println!(
            "Unlinked {}; group {} had no members left and was removed",
            short_id(&doc.id),
            group_id
        ),
    }
    Ok(())
}

pub async fn apply_edit(args: ApplyEditArgs, config: CliConfig) -> Result<()> {
    let engine = config.open_engine()?;
    let mut edited = resolve_doc(&engine, &args.doc)?;
    if let Some(expected) = args.expected_version {
        edited.version = expected;
    }
    edited.sections = read_content(&args.file, args.note)?;
    let author = config.author_or(args.author);

    let strategy = if !args.only.is_empty() {
        EditStrategy::Selected(resolve_all(&engine, &args.only)?)
    } else if !args.except.is_empty() {
        EditStrategy::Excluded(resolve_all(&engine, &args.except)?)
    } else {
        EditStrategy::All
    };

    let report = engine.apply_edit(&edited, &strategy, &args.message, &author)?;
    info!(
        "Shared edit on group {}: {} applied, {} failed",
        report.group_id,
        report.applied().count(),
        report.failed().count()
    );

    let rollback = if args.all_or_nothing && !report.is_complete() {
        warn!("Edit was partial; rolling back the applied subset");
        Some(engine.shared().rollback(&report, &author)?)
    } else {
        None
    };

    if args.format == "json" {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "report": report,
                "rollback": rollback,
            }))?
        );
    } else {
        print_report(&report);
        if let Some(rollback) = rollback {
            println!();
            println!(
                "Rolled back: {} reverted, {} rejoined, canonical restored: {}",
                rollback
                    .results
                    .iter()
                    .filter(|r| r.status == TargetStatus::Applied)
                    .count(),
                rollback.rejoined.len(),
                rollback.canonical_restored
            );
            for e in &rollback.errors {
                println!("  error: {}", e);
            }
        }
    }

    if report.is_total_failure() {
        anyhow::bail!("No member of group {} was updated", report.group_id);
    }
    Ok(())
}

pub async fn reconcile(args: ReconcileArgs, config: CliConfig) -> Result<()> {
    let engine = config.open_engine()?;
    let groups: Vec<Uuid> = match args.group {
        Some(id) => vec![id],
        None => engine.shared().list_groups()?.into_iter().map(|g| g.id).collect(),
    };

    let mut diverged = 0;
    for id in groups {
        let report = engine.shared().reconcile(id)?;
        for d in &report.diverged {
            diverged += 1;
            println!(
                "{} diverged from group {}: expected {}, found {}",
                short_id(&d.document_id),
                short_id(&id),
                d.expected,
                d.actual
            );
        }
        if !report.group_exists {
            println!("Group {} has no members left and was removed", id);
        }
        for e in &report.errors {
            warn!("Group {}: {}", id, e);
        }
    }
    println!("{} diverged members unlinked", diverged);
    Ok(())
}

fn resolve_all(engine: &Monograph, refs: &[String]) -> Result<BTreeSet<Uuid>> {
    refs.iter()
        .map(|r| resolve_doc(engine, r).map(|d| d.id))
        .collect()
}

fn print_report(report: &ApplyEditReport) {
    println!(
        "Group {}: canonical {} → {}",
        report.group_id, report.previous_canonical, report.canonical_hash
    );
    println!("{:<10} {:<8} {:>9}  DETAIL", "DOCUMENT", "STATUS", "VERSION");
    println!("{}", "─".repeat(60));
    for r in &report.results {
        let status = match r.status {
            TargetStatus::Applied => "applied",
            TargetStatus::Skipped => "skipped",
            TargetStatus::Failed => "failed",
        };
        let version = match (r.previous_version, r.new_version) {
            (Some(a), Some(b)) if a != b => format!("{}→{}", a, b),
            (Some(a), _) => a.to_string(),
            _ => String::new(),
        };
        let mut detail = r.error.clone().unwrap_or_default();
        if let Some(d) = &r.divergence {
            if !detail.is_empty() {
                detail.push_str("; ");
            }
            detail.push_str(&format!("diverged ({}), unlinked", d.actual));
        }
        println!(
            "{:<10} {:<8} {:>9}  {}",
            short_id(&r.document_id),
            status,
            version,
            detail
        );
    }
    for e in &report.errors {
        println!("error: {}", e);
    }
}
