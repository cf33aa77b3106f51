use crate::baseline::BaselineStore;
use crate::duplicate::DuplicateDetector;
use crate::error::{MonographError, Result};
use crate::notes::{note_to_sections, sections_to_note, IngredientRecord};
use crate::shared::SharedLinkManager;
use crate::storage::{DocumentFilter, Storage};
use crate::types::{Document, DocumentId, GroupId, Section};
use crate::version::VersionStore;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportOptions {
    /// Recorded as the author of every version-1 snapshot.
    pub author: String,
    /// Link each new document with its exact duplicates in other collections.
    pub link_duplicates: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            author: "import".to_string(),
            link_duplicates: false,
        }
    }
}

impl ImportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_link_duplicates(mut self, link: bool) -> Self {
        self.link_duplicates = link;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedDocument {
    pub document_id: DocumentId,
    pub key_name: String,
    /// Exact duplicates found before the document was created.
    pub duplicates: Vec<DocumentId>,
    pub linked_group: Option<GroupId>,
    /// Why linking was not done, when it was requested and failed.
    pub link_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportReport {
    pub collection: String,
    pub created: Vec<ImportedDocument>,
    /// Keys already present in the collection; left untouched.
    pub skipped_existing: Vec<String>,
}

impl ImportReport {
    pub fn duplicate_count(&self) -> usize {
        self.created.iter().filter(|d| !d.duplicates.is_empty()).count()
    }
}

/// A document's content in the working representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionsRecord {
    pub key_name: String,
    pub sections: Vec<Section>,
}

/// Import pipeline: parse, create, baseline, scan, optionally link.
pub struct Importer<S: Storage> {
    storage: Arc<S>,
    versions: Arc<VersionStore<S>>,
    baselines: Arc<BaselineStore<S>>,
    duplicates: Arc<DuplicateDetector<S>>,
    shared: Arc<SharedLinkManager<S>>,
}

impl<S: Storage> Importer<S> {
    pub fn new(
        storage: Arc<S>,
        versions: Arc<VersionStore<S>>,
        baselines: Arc<BaselineStore<S>>,
        duplicates: Arc<DuplicateDetector<S>>,
        shared: Arc<SharedLinkManager<S>>,
    ) -> Self {
        Self {
            storage,
            versions,
            baselines,
            duplicates,
            shared,
        }
    }

    /// Import a hospital configuration's records into `collection`.
    ///
    /// Every record is converted before anything is written, so an
    /// `ImportFormat` error leaves the store untouched.
    pub fn import_collection(
        &self,
        collection: &str,
        records: &[IngredientRecord],
        options: &ImportOptions,
    ) -> Result<ImportReport> {
        if collection.trim().is_empty() {
            return Err(MonographError::Validation(
                "collection name must not be empty".to_string(),
            ));
        }

        let parsed = Self::parse_all(records)?;

        let existing: HashSet<String> = self
            .storage
            .list_documents(DocumentFilter::new().with_collection(collection))?
            .into_iter()
            .map(|doc| doc.key_name)
            .collect();

        let mut report = ImportReport {
            collection: collection.to_string(),
            created: Vec::new(),
            skipped_existing: Vec::new(),
        };

        for (key, sections) in parsed {
            if existing.contains(&key) {
                report.skipped_existing.push(key);
                continue;
            }

            let duplicates = self.duplicates.scan_store(&sections, None)?;
            let doc = self
                .versions
                .create(collection, &key, sections, &options.author)?;
            self.baselines.create_once(&doc)?;

            let mut imported = ImportedDocument {
                document_id: doc.id,
                key_name: key,
                duplicates,
                linked_group: None,
                link_error: None,
            };

            if options.link_duplicates && !imported.duplicates.is_empty() {
                match self.link_with_duplicates(&doc, &imported.duplicates) {
                    Ok(group) => imported.linked_group = group,
                    Err(e) => {
                        log::warn!("Could not link {} with its duplicates: {}", doc.id, e);
                        imported.link_error = Some(e.to_string());
                    }
                }
            }

            report.created.push(imported);
        }

        self.storage.put_metadata(
            &format!("last_import:{}", collection),
            Utc::now().to_rfc3339().as_bytes(),
        )?;

        log::info!(
            "Imported {} records into '{}': {} created, {} with duplicates, {} already present",
            records.len(),
            collection,
            report.created.len(),
            report.duplicate_count(),
            report.skipped_existing.len()
        );
        Ok(report)
    }

    fn parse_all(records: &[IngredientRecord]) -> Result<Vec<(String, Vec<Section>)>> {
        let mut seen = HashSet::new();
        let mut parsed = Vec::with_capacity(records.len());
        for record in records {
            let key = record.key_name.as_str();
            if key.trim().is_empty() {
                return Err(MonographError::ImportFormat {
                    record: record.key_name.clone(),
                    line: 0,
                    reason: "KEYNAME must not be empty".to_string(),
                });
            }
            if key.trim() != key {
                return Err(MonographError::ImportFormat {
                    record: record.key_name.clone(),
                    line: 0,
                    reason: "KEYNAME has leading or trailing whitespace".to_string(),
                });
            }
            if !seen.insert(key.to_string()) {
                return Err(MonographError::ImportFormat {
                    record: key.to_string(),
                    line: 0,
                    reason: "KEYNAME appears more than once".to_string(),
                });
            }
            parsed.push((key.to_string(), note_to_sections(key, &record.note)?));
        }
        Ok(parsed)
    }

    /// Link `doc` with duplicates from other collections: join the first
    /// one's group, or start a group with one unlinked duplicate per
    /// collection. A group never takes two documents of one collection.
    /// Returns `None` when there is nothing to link with.
    fn link_with_duplicates(
        &self,
        doc: &Document,
        duplicates: &[DocumentId],
    ) -> Result<Option<GroupId>> {
        let mut collections = HashSet::from([doc.collection.clone()]);
        let mut unlinked = Vec::new();
        for id in duplicates {
            let dup = self.versions.get(*id)?;
            if collections.contains(&dup.collection) {
                continue;
            }
            match dup.shared_group_id {
                Some(group_id) => {
                    let group = self.shared.get_group(group_id)?;
                    if self.group_has_collection(&group.member_ids, &doc.collection)? {
                        continue;
                    }
                    self.shared.join(group_id, doc.id)?;
                    return Ok(Some(group_id));
                }
                None => {
                    collections.insert(dup.collection);
                    unlinked.push(dup.id);
                }
            }
        }
        if unlinked.is_empty() {
            return Ok(None);
        }
        unlinked.push(doc.id);
        Ok(Some(self.shared.link(&unlinked)?.id))
    }

    fn group_has_collection(
        &self,
        members: &BTreeSet<DocumentId>,
        collection: &str,
    ) -> Result<bool> {
        for id in members {
            if self.versions.get(*id)?.collection == collection {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// `NOTE` records for every document of `collection`, by key name.
    pub fn export_collection(&self, collection: &str) -> Result<Vec<IngredientRecord>> {
        self.storage
            .list_documents(DocumentFilter::new().with_collection(collection))?
            .into_iter()
            .map(|doc| -> Result<IngredientRecord> {
                Ok(IngredientRecord {
                    note: sections_to_note(&doc.sections)?,
                    key_name: doc.key_name,
                })
            })
            .collect()
    }

    /// Working-representation export of `collection`.
    pub fn export_sections(&self, collection: &str) -> Result<Vec<SectionsRecord>> {
        Ok(self
            .storage
            .list_documents(DocumentFilter::new().with_collection(collection))?
            .into_iter()
            .map(|doc| SectionsRecord {
                key_name: doc.key_name,
                sections: doc.sections,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UnchangedSavePolicy;
    use crate::notes::NoteLine;
    use crate::storage::RedbStorage;
    use tempfile::TempDir;

    struct Fixture {
        storage: Arc<RedbStorage>,
        importer: Importer<RedbStorage>,
        _dir: TempDir,
    }

    fn setup() -> Fixture {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(RedbStorage::open(dir.path().join("test.redb")).unwrap());
        let versions = Arc::new(VersionStore::new(storage.clone(), UnchangedSavePolicy::Reject));
        let baselines = Arc::new(BaselineStore::new(storage.clone()));
        let duplicates = Arc::new(DuplicateDetector::new(storage.clone()));
        let shared = Arc::new(SharedLinkManager::new(storage.clone(), versions.clone()));
        Fixture {
            importer: Importer::new(storage.clone(), versions, baselines, duplicates, shared),
            storage,
            _dir: dir,
        }
    }

    fn record(key: &str, lines: &[&str]) -> IngredientRecord {
        IngredientRecord {
            key_name: key.to_string(),
            note: lines.iter().map(|l| NoteLine::new(*l)).collect(),
        }
    }

    fn kcl() -> IngredientRecord {
        record("KCL", &["Potassium Chloride", "[f(", "dose(weight)", ")]"])
    }

    #[test]
    fn import_creates_documents_with_baselines() {
        let f = setup();
        let report = f
            .importer
            .import_collection("north", &[kcl(), record("NACL", &["Sodium"])], &ImportOptions::new())
            .unwrap();
        assert_eq!(report.created.len(), 2);

        for created in &report.created {
            let doc = f.storage.get_document(created.document_id).unwrap().unwrap();
            assert_eq!(doc.version, 1);
            assert!(doc.baseline_id.is_some());
            assert_eq!(doc.collection, "north");
        }
        assert!(f.storage.get_metadata("last_import:north").unwrap().is_some());
    }

    #[test]
    fn format_error_persists_nothing() {
        let f = setup();
        let bad = record("BAD", &["[f(", "never closed"]);
        let err = f
            .importer
            .import_collection("north", &[kcl(), bad], &ImportOptions::new())
            .unwrap_err();
        assert!(matches!(err, MonographError::ImportFormat { ref record, .. } if record == "BAD"));
        assert_eq!(f.storage.stats().unwrap().document_count, 0);
    }

    #[test]
    fn duplicate_keys_in_one_batch_are_rejected() {
        let f = setup();
        let err = f
            .importer
            .import_collection("north", &[kcl(), kcl()], &ImportOptions::new())
            .unwrap_err();
        assert!(matches!(err, MonographError::ImportFormat { .. }));
    }

    #[test]
    fn reimport_skips_existing_keys() {
        let f = setup();
        f.importer
            .import_collection("north", &[kcl()], &ImportOptions::new())
            .unwrap();
        let report = f
            .importer
            .import_collection("north", &[kcl(), record("NACL", &["Sodium"])], &ImportOptions::new())
            .unwrap();
        assert_eq!(report.skipped_existing, vec!["KCL".to_string()]);
        assert_eq!(report.created.len(), 1);
    }

    #[test]
    fn duplicates_across_collections_are_reported_and_linked() {
        let f = setup();
        let options = ImportOptions::new().with_link_duplicates(true);
        let north = f.importer.import_collection("north", &[kcl()], &options).unwrap();
        assert!(north.created[0].duplicates.is_empty());

        let south = f.importer.import_collection("south", &[kcl()], &options).unwrap();
        assert_eq!(south.created[0].duplicates, vec![north.created[0].document_id]);
        let group = south.created[0].linked_group.unwrap();

        // A third copy joins the existing group
        let east = f.importer.import_collection("east", &[kcl()], &options).unwrap();
        assert_eq!(east.created[0].linked_group, Some(group));
        assert_eq!(f.storage.get_group(group).unwrap().unwrap().member_ids.len(), 3);
    }

    #[test]
    fn same_collection_duplicates_are_reported_not_linked() {
        let f = setup();
        let options = ImportOptions::new().with_link_duplicates(true);
        let note = &["Potassium Chloride", "[f(", "dose(weight)", ")]"];
        let north = f
            .importer
            .import_collection("north", &[record("KCL", note), record("KCL 10", note)], &options)
            .unwrap();

        let first = &north.created[0];
        let second = &north.created[1];
        assert_eq!(second.duplicates, vec![first.document_id]);
        assert_eq!(second.linked_group, None);
        assert_eq!(second.link_error, None);
        assert!(f.storage.list_groups().unwrap().is_empty());

        // Another collection links with one north copy only
        let south = f
            .importer
            .import_collection("south", &[record("KCL", note)], &options)
            .unwrap();
        assert_eq!(south.created[0].duplicates.len(), 2);
        let group = south.created[0].linked_group.unwrap();
        let members = f.storage.get_group(group).unwrap().unwrap().member_ids;
        assert_eq!(members.len(), 2);
        assert!(members.contains(&south.created[0].document_id));
    }

    #[test]
    fn padded_keyname_is_rejected() {
        let f = setup();
        let err = f
            .importer
            .import_collection("north", &[record(" KCL ", &["Potassium"])], &ImportOptions::new())
            .unwrap_err();
        assert!(
            matches!(err, MonographError::ImportFormat { ref record, line: 0, .. } if record == " KCL ")
        );
        assert_eq!(f.storage.stats().unwrap().document_count, 0);
    }

    #[test]
    fn export_round_trips_note() {
        let f = setup();
        let records = vec![
            kcl(),
            record("NACL", &["Sodium", "", "[f(", "a", "b", ")]", "tail"]),
        ];
        f.importer
            .import_collection("north", &records, &ImportOptions::new())
            .unwrap();

        let mut exported = f.importer.export_collection("north").unwrap();
        exported.sort_by(|a, b| a.key_name.cmp(&b.key_name));
        let mut expected = records.clone();
        expected.sort_by(|a, b| a.key_name.cmp(&b.key_name));
        assert_eq!(exported, expected);

        let sections = f.importer.export_sections("north").unwrap();
        assert_eq!(sections.len(), 2);
    }
}
