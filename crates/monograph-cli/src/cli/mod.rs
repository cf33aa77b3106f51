pub mod backup;
pub mod cluster;
pub mod config_cmd;
pub mod diff;
pub mod document;
pub mod duplicates;
pub mod export;
pub mod import;
pub mod shared;
pub mod stats;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use monograph_core::{parse_sections, Document, Monograph, NoteLine, Section};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "monograph")]
#[command(version, about = "Versioned, deduplicated clinical reference notes")]
pub struct Cli {
    /// Path to monograph.toml
    #[arg(
        long,
        global = true,
        env = "MONOGRAPH_CONFIG",
        default_value = "monograph.toml"
    )]
    pub config: PathBuf,

    /// Path to data directory (overrides config file)
    #[arg(long, global = true, env = "MONOGRAPH_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Import a hospital configuration's ingredient records
    Import(ImportArgs),
    /// Export a collection as NOTE records or sections
    Export(ExportArgs),
    /// Show a document
    Show(ShowArgs),
    /// Save new content as the next version
    Save(SaveArgs),
    /// Save the content of an older version as a new version
    Revert(RevertArgs),
    /// List a document's versions
    History(HistoryArgs),
    /// Diff two versions, or the working copy against its baseline
    Diff(DiffArgs),
    /// Report documents with identical content
    Duplicates(DuplicatesArgs),
    /// Link documents with identical content into a shared group
    Link(LinkArgs),
    /// Make a document independent of its group
    Unlink(UnlinkArgs),
    /// Edit a shared document and propagate to its group
    ApplyEdit(ApplyEditArgs),
    /// Unlink group members whose content diverged
    Reconcile(ReconcileArgs),
    /// Cluster near-duplicate documents (Ctrl-C stops with a partial report)
    Cluster(ClusterArgs),
    /// Database statistics
    Stats,
    /// Back up the database
    Backup(BackupArgs),
    /// Configuration commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    Validate,
    Show,
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// JSON file holding an array of {KEYNAME, NOTE} records
    pub file: PathBuf,

    /// Collection (hospital configuration) to import into
    #[arg(long, short)]
    pub collection: String,

    /// Link each new document with its exact duplicates
    #[arg(long)]
    pub link_duplicates: bool,

    /// Parse and report without writing
    #[arg(long)]
    pub dry_run: bool,

    #[arg(long)]
    pub author: Option<String>,

    #[arg(long, default_value = "table")]
    pub format: String,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    #[arg(long, short)]
    pub collection: String,

    /// note | sections
    #[arg(long, default_value = "note")]
    pub format: String,

    /// Output file (default: stdout)
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Document id, or collection/KEYNAME
    pub doc: String,

    #[arg(long, default_value = "table")]
    pub format: String,
}

#[derive(Args, Debug)]
pub struct SaveArgs {
    /// Document id, or collection/KEYNAME
    pub doc: String,

    /// JSON file with the new content: a sections array, or a NOTE array with --note
    pub file: PathBuf,

    /// Treat the file as a NOTE array
    #[arg(long)]
    pub note: bool,

    /// Version the edit was based on (default: the current version)
    #[arg(long)]
    pub expected_version: Option<u32>,

    #[arg(long, short, default_value = "Edit")]
    pub message: String,

    #[arg(long)]
    pub author: Option<String>,
}

#[derive(Args, Debug)]
pub struct RevertArgs {
    /// Document id, or collection/KEYNAME
    pub doc: String,

    /// Version whose content to restore
    pub version: u32,

    #[arg(long)]
    pub author: Option<String>,
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Document id, or collection/KEYNAME
    pub doc: String,

    #[arg(long, default_value = "table")]
    pub format: String,
}

#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Document id, or collection/KEYNAME
    pub doc: String,

    /// Older version (default: previous version)
    #[arg(long)]
    pub from: Option<u32>,

    /// Newer version (default: current version)
    #[arg(long)]
    pub to: Option<u32>,

    /// Diff the working copy against the import baseline
    #[arg(long, conflicts_with_all = ["from", "to"])]
    pub baseline: bool,

    #[arg(long, default_value = "table")]
    pub format: String,
}

#[derive(Args, Debug)]
pub struct DuplicatesArgs {
    /// Restrict to one collection
    #[arg(long, short)]
    pub collection: Option<String>,

    /// Link every unlinked duplicate set found
    #[arg(long)]
    pub link: bool,

    #[arg(long, default_value = "table")]
    pub format: String,
}

#[derive(Args, Debug)]
pub struct LinkArgs {
    /// Two or more documents (id or collection/KEYNAME)
    #[arg(required = true, num_args = 2..)]
    pub docs: Vec<String>,
}

#[derive(Args, Debug)]
pub struct UnlinkArgs {
    /// Document id, or collection/KEYNAME
    pub doc: String,
}

#[derive(Args, Debug)]
pub struct ApplyEditArgs {
    /// Edited document (id or collection/KEYNAME)
    pub doc: String,

    /// JSON file with the new content: a sections array, or a NOTE array with --note
    pub file: PathBuf,

    #[arg(long)]
    pub note: bool,

    /// Version the edit was based on (default: the current version)
    #[arg(long)]
    pub expected_version: Option<u32>,

    /// Apply only to these members
    #[arg(long, num_args = 1.., conflicts_with = "except")]
    pub only: Vec<String>,

    /// Apply to every member except these
    #[arg(long, num_args = 1..)]
    pub except: Vec<String>,

    /// Revert the applied subset if any target fails
    #[arg(long)]
    pub all_or_nothing: bool,

    #[arg(long, short, default_value = "Shared edit")]
    pub message: String,

    #[arg(long)]
    pub author: Option<String>,

    #[arg(long, default_value = "table")]
    pub format: String,
}

#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Group id (default: every group)
    pub group: Option<Uuid>,
}

#[derive(Args, Debug)]
pub struct ClusterArgs {
    /// Maximum normalized edit distance (default: from config)
    #[arg(long)]
    pub threshold: Option<f64>,

    #[arg(long, short)]
    pub collection: Option<String>,

    /// Pairwise comparison budget (default: from config)
    #[arg(long)]
    pub max_comparisons: Option<u64>,

    /// Time budget in seconds (default: from config)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Also print single-document clusters
    #[arg(long)]
    pub all: bool,

    #[arg(long, default_value = "table")]
    pub format: String,
}

#[derive(Args, Debug)]
pub struct BackupArgs {
    /// Destination file
    pub path: PathBuf,
}

/// Resolve a document reference: a UUID, or `collection/KEYNAME`.
pub fn resolve_doc(engine: &Monograph, reference: &str) -> Result<Document> {
    if let Ok(id) = Uuid::parse_str(reference) {
        return Ok(engine.get(id)?);
    }
    let (collection, key) = reference
        .split_once('/')
        .with_context(|| format!("'{}' is neither a document id nor collection/KEYNAME", reference))?;
    engine
        .find(collection, key)?
        .with_context(|| format!("No document '{}' in collection '{}'", key, collection))
}

/// Read new content from a JSON file holding sections or, with `note`, a NOTE array.
pub fn read_content(path: &Path, note: bool) -> Result<Vec<Section>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if note {
        let lines: Vec<NoteLine> = serde_json::from_str(&raw)
            .with_context(|| format!("{} is not a NOTE array", path.display()))?;
        Ok(monograph_core::note_to_sections(&path.display().to_string(), &lines)?)
    } else {
        let value: serde_json::Value = serde_json::from_str(&raw)
            .with_context(|| format!("{} is not JSON", path.display()))?;
        Ok(parse_sections(&value)?)
    }
}

/// First 8 characters of an id, for tables.
pub fn short_id(id: &Uuid) -> String {
    id.to_string()[..8].to_string()
}

pub fn print_document_table(docs: &[Document]) {
    println!(
        "{:<10} {:<12} {:<24} {:>4} {:<16} {:<6}",
        "ID", "COLLECTION", "KEYNAME", "VER", "HASH", "SHARED"
    );
    println!("{}", "─".repeat(78));
    for doc in docs {
        println!(
            "{:<10} {:<12} {:<24} {:>4} {:<16} {:<6}",
            short_id(&doc.id),
            truncate(&doc.collection, 12),
            truncate(&doc.key_name, 24),
            doc.version,
            doc.content_hash,
            if doc.is_shared() { "yes" } else { "" }
        );
    }
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}
