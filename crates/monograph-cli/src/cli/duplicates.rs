use crate::cli::{print_document_table, DuplicatesArgs};
use crate::config::CliConfig;
use anyhow::Result;
use monograph_core::DocumentFilter;
use tracing::warn;

pub async fn run(args: DuplicatesArgs, config: CliConfig) -> Result<()> {
    let engine = config.open_engine()?;
    let mut filter = DocumentFilter::new();
    if let Some(collection) = &args.collection {
        filter = filter.with_collection(collection.clone());
    }
    let groups = engine.duplicates().duplicate_groups_in_store(filter)?;

    if args.format == "json" {
        let out: Vec<_> = groups
            .iter()
            .map(|(hash, ids)| serde_json::json!({ "hash": hash.to_string(), "documents": ids }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if groups.is_empty() {
        println!("No exact duplicates.");
    } else {
        for (hash, ids) in &groups {
            println!();
            println!("Hash {} ({} documents)", hash, ids.len());
            let docs = ids
                .iter()
                .map(|id| engine.get(*id))
                .collect::<monograph_core::Result<Vec<_>>>()?;
            print_document_table(&docs);
        }
    }

    if args.link {
        let mut linked = 0;
        for ids in groups.values() {
            let unlinked: Vec<_> = ids
                .iter()
                .map(|id| engine.get(*id))
                .collect::<monograph_core::Result<Vec<_>>>()?
                .into_iter()
                .filter(|doc| !doc.is_shared())
                .map(|doc| doc.id)
                .collect();
            if unlinked.len() < 2 {
                continue;
            }
            match engine.link(&unlinked) {
                Ok(group) => {
                    linked += 1;
                    println!("Linked {} documents into group {}", unlinked.len(), group.id);
                }
                Err(e) => warn!("Could not link duplicate set: {}", e),
            }
        }
        println!("Created {} shared groups", linked);
    }

    Ok(())
}
