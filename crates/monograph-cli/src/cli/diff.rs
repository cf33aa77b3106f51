use crate::cli::{resolve_doc, DiffArgs};
use crate::config::CliConfig;
use anyhow::Result;
use monograph_core::{ChangeKind, LineTag, Section, SectionChange};

pub async fn run(args: DiffArgs, config: CliConfig) -> Result<()> {
    let engine = config.open_engine()?;
    let doc = resolve_doc(&engine, &args.doc)?;

    let (label, ops) = if args.baseline {
        (
            format!("baseline → v{}", doc.version),
            engine.diff_against_baseline(doc.id)?,
        )
    } else {
        let to = args.to.unwrap_or(doc.version);
        let from = args.from.unwrap_or_else(|| to.saturating_sub(1).max(1));
        (format!("v{} → v{}", from, to), engine.diff_versions(doc.id, from, to)?)
    };

    if args.format == "json" {
        println!("{}", serde_json::to_string_pretty(&ops)?);
        return Ok(());
    }

    println!("{} {}: {}", doc.collection, doc.key_name, label);
    if ops.is_empty() {
        println!("No changes.");
        return Ok(());
    }
    for op in &ops {
        print_op(op);
    }
    Ok(())
}

fn print_op(op: &SectionChange) {
    match op.op {
        ChangeKind::Added => {
            println!("@@ section {} added", op.index);
            print_section("+", op.after.as_ref());
        }
        ChangeKind::Removed => {
            println!("@@ section {} removed", op.index);
            print_section("-", op.before.as_ref());
        }
        ChangeKind::Changed => {
            println!("@@ section {} changed", op.index);
            if op.lines.is_empty() {
                print_section("-", op.before.as_ref());
                print_section("+", op.after.as_ref());
            } else {
                for line in &op.lines {
                    let marker = match line.tag {
                        LineTag::Equal => " ",
                        LineTag::Insert => "+",
                        LineTag::Delete => "-",
                    };
                    println!("{} {}", marker, line.text);
                }
            }
        }
    }
}

fn print_section(marker: &str, section: Option<&Section>) {
    if let Some(section) = section {
        for line in section.body().split('\n') {
            println!("{} [{}] {}", marker, section.kind_str(), line);
        }
    }
}
