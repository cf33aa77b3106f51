pub mod types;
pub mod storage;
pub mod error;
pub mod config;
pub mod hasher;
pub mod diff;
pub mod similarity;
pub mod duplicate;
pub mod version;
pub mod baseline;
pub mod shared;
pub mod notes;
pub mod import;
pub mod api;

pub use error::{MonographError, Result};
pub use types::*;
pub use config::{EngineConfig, SimilarityConfig, UnchangedSavePolicy};
pub use storage::{DocumentFilter, RedbStorage, Storage, StorageStats, CURRENT_SCHEMA_VERSION};
pub use hasher::{parse_sections, ContentHasher};
pub use diff::{ChangeKind, DiffEngine, DiffStats, LineChange, LineTag, SectionChange};
pub use similarity::{
    distance, hash_classes, render_plain, CancelToken, ClusterBudget, ClusterReport,
    SimilarityDetector, StopReason,
};
pub use duplicate::{duplicate_groups, DuplicateDetector};
pub use version::VersionStore;
pub use baseline::BaselineStore;
pub use shared::{
    ApplyEditReport, Divergence, EditStrategy, MemberComparison, MemberPreview, ReconcileReport,
    RollbackReport, SharedLinkManager, TargetResult, TargetStatus,
};
pub use notes::{note_to_sections, parse_records, sections_to_note, IngredientRecord, NoteLine};
pub use import::{ImportOptions, ImportReport, ImportedDocument, Importer, SectionsRecord};
pub use api::Monograph;
