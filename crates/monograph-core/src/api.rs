use crate::baseline::BaselineStore;
use crate::config::EngineConfig;
use crate::diff::SectionChange;
use crate::duplicate::DuplicateDetector;
use crate::error::{MonographError, Result};
use crate::import::{ImportOptions, ImportReport, Importer};
use crate::notes::IngredientRecord;
use crate::shared::{ApplyEditReport, EditStrategy, SharedLinkManager};
use crate::similarity::{CancelToken, ClusterBudget, ClusterReport, SimilarityDetector};
use crate::storage::{DocumentFilter, RedbStorage, Storage, StorageStats};
use crate::types::{Document, DocumentId, GroupId, Section, SharedGroup, VersionSnapshot};
use crate::version::VersionStore;
use std::path::Path;
use std::sync::Arc;

/// High-level, embedded engine. Opens one redb file and wires every
/// component on top of it.
///
/// # Example
/// ```rust,no_run
/// use monograph_core::{EngineConfig, Monograph, Section};
///
/// let engine = Monograph::open("./monograph.redb", EngineConfig::default()).unwrap();
/// let doc = engine
///     .versions()
///     .create("north", "KCL", vec![Section::static_text("Potassium Chloride")], "alice")
///     .unwrap();
/// let history = engine.versions().history(doc.id).unwrap();
/// assert_eq!(history.len(), 1);
/// ```
pub struct Monograph {
    storage: Arc<RedbStorage>,
    versions: Arc<VersionStore<RedbStorage>>,
    baselines: Arc<BaselineStore<RedbStorage>>,
    duplicates: Arc<DuplicateDetector<RedbStorage>>,
    shared: Arc<SharedLinkManager<RedbStorage>>,
    importer: Importer<RedbStorage>,
    similarity: SimilarityDetector,
    config: EngineConfig,
}

impl Monograph {
    /// Open (or create) a database at the given path.
    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let storage = Arc::new(RedbStorage::open(path.as_ref())?);

        let versions = Arc::new(VersionStore::new(storage.clone(), config.unchanged_save));
        let baselines = Arc::new(BaselineStore::new(storage.clone()));
        let duplicates = Arc::new(DuplicateDetector::new(storage.clone()));
        let shared = Arc::new(SharedLinkManager::new(storage.clone(), versions.clone()));
        let importer = Importer::new(
            storage.clone(),
            versions.clone(),
            baselines.clone(),
            duplicates.clone(),
            shared.clone(),
        );
        let similarity = SimilarityDetector::new(config.similarity.clone());

        Ok(Self {
            storage,
            versions,
            baselines,
            duplicates,
            shared,
            importer,
            similarity,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<RedbStorage> {
        &self.storage
    }

    pub fn versions(&self) -> &VersionStore<RedbStorage> {
        &self.versions
    }

    pub fn baselines(&self) -> &BaselineStore<RedbStorage> {
        &self.baselines
    }

    pub fn duplicates(&self) -> &DuplicateDetector<RedbStorage> {
        &self.duplicates
    }

    pub fn shared(&self) -> &SharedLinkManager<RedbStorage> {
        &self.shared
    }

    pub fn importer(&self) -> &Importer<RedbStorage> {
        &self.importer
    }

    pub fn similarity(&self) -> &SimilarityDetector {
        &self.similarity
    }

    /// Get a document by ID.
    pub fn get(&self, id: DocumentId) -> Result<Document> {
        self.versions.get(id)
    }

    /// Find a document by collection and key name.
    pub fn find(&self, collection: &str, key_name: &str) -> Result<Option<Document>> {
        Ok(self
            .storage
            .list_documents(
                DocumentFilter::new()
                    .with_collection(collection)
                    .with_key_name(key_name),
            )?
            .into_iter()
            .next())
    }

    pub fn list(&self, filter: DocumentFilter) -> Result<Vec<Document>> {
        self.storage.list_documents(filter)
    }

    pub fn import(
        &self,
        collection: &str,
        records: &[IngredientRecord],
        options: &ImportOptions,
    ) -> Result<ImportReport> {
        self.importer.import_collection(collection, records, options)
    }

    pub fn export(&self, collection: &str) -> Result<Vec<IngredientRecord>> {
        self.importer.export_collection(collection)
    }

    /// Save new content for a document at `expected_version`.
    pub fn save(
        &self,
        id: DocumentId,
        expected_version: u32,
        sections: Vec<Section>,
        message: &str,
        author: &str,
    ) -> Result<Document> {
        self.versions
            .save_sections(id, expected_version, sections, message, author)
    }

    /// Revert to the content of `target_version`, as a new version.
    pub fn revert(&self, id: DocumentId, target_version: u32, author: &str) -> Result<Document> {
        let doc = self.versions.get(id)?;
        self.versions.revert(&doc, target_version, author)
    }

    pub fn history(&self, id: DocumentId) -> Result<Vec<VersionSnapshot>> {
        self.versions.history(id)
    }

    pub fn diff_versions(&self, id: DocumentId, from: u32, to: u32) -> Result<Vec<SectionChange>> {
        self.versions.diff_versions(id, from, to)
    }

    pub fn diff_against_baseline(&self, id: DocumentId) -> Result<Vec<SectionChange>> {
        let doc = self.versions.get(id)?;
        self.baselines.diff_against_baseline(&doc)
    }

    pub fn link(&self, ids: &[DocumentId]) -> Result<SharedGroup> {
        self.shared.link(ids)
    }

    pub fn unlink(&self, group_id: GroupId, id: DocumentId) -> Result<Option<SharedGroup>> {
        self.shared.unlink(group_id, id)
    }

    /// Edit one member of its group and propagate by `strategy`.
    ///
    /// `edited.version` is the version the caller last read.
    pub fn apply_edit(
        &self,
        edited: &Document,
        strategy: &EditStrategy,
        message: &str,
        author: &str,
    ) -> Result<ApplyEditReport> {
        let group_id = self
            .versions
            .get(edited.id)?
            .shared_group_id
            .ok_or_else(|| {
                MonographError::Validation(format!("Document {} is not shared", edited.id))
            })?;
        self.shared
            .apply_edit(group_id, edited, strategy, message, author)
    }

    /// Cluster documents matching `filter` with the configured budget.
    pub fn cluster(
        &self,
        filter: DocumentFilter,
        threshold: Option<f64>,
        cancel: &CancelToken,
    ) -> Result<ClusterReport> {
        let corpus = self.storage.list_documents(filter)?;
        let threshold = threshold.unwrap_or(self.config.similarity.threshold);
        let budget = ClusterBudget::from(&self.config.similarity);
        Ok(self
            .similarity
            .cluster_with_budget(&corpus, threshold, budget, cancel))
    }

    pub fn stats(&self) -> Result<StorageStats> {
        self.storage.stats()
    }
}
