//! Append-only document history with optimistic concurrency.
//!
//! A document's content and version only move through `commit_version` on
//! the store, which compares the caller's expected version with the stored
//! one inside a single write transaction. Reverts are ordinary saves whose
//! content comes from an older snapshot, so the counter never goes back.

use crate::config::UnchangedSavePolicy;
use crate::diff::{DiffEngine, SectionChange};
use crate::error::{MonographError, Result};
use crate::hasher::ContentHasher;
use crate::storage::Storage;
use crate::types::{Document, DocumentId, Section, VersionSnapshot};
use chrono::Utc;
use std::sync::Arc;

pub struct VersionStore<S: Storage> {
    storage: Arc<S>,
    unchanged: UnchangedSavePolicy,
}

impl<S: Storage> VersionStore<S> {
    pub fn new(storage: Arc<S>, unchanged: UnchangedSavePolicy) -> Self {
        Self { storage, unchanged }
    }

    pub fn unchanged_policy(&self) -> UnchangedSavePolicy {
        self.unchanged
    }

    /// Create a document at version 1 together with its first snapshot.
    pub fn create(
        &self,
        collection: &str,
        key_name: &str,
        sections: Vec<Section>,
        author: &str,
    ) -> Result<Document> {
        let hash = ContentHasher::hash(&sections);
        let doc = Document::new(collection, key_name, sections, hash);
        let snapshot = VersionSnapshot {
            document_id: doc.id,
            version: doc.version,
            sections: doc.sections.clone(),
            content_hash: hash,
            commit_message: "Created".to_string(),
            author: author.to_string(),
            timestamp: doc.created_at,
        };
        self.storage.insert_document(&doc, &snapshot)?;
        log::debug!("Created {} '{}' in '{}'", doc.id, key_name, collection);
        Ok(doc)
    }

    /// Load the current state of a document.
    pub fn get(&self, id: DocumentId) -> Result<Document> {
        self.storage
            .get_document(id)?
            .ok_or(MonographError::DocumentNotFound(id))
    }

    /// Persist `doc.sections` as the next version.
    ///
    /// `doc.version` is the version the caller last read. If the store has
    /// moved on since, the save fails with `VersionConflict` and nothing is
    /// written. Returns the document at its new version.
    pub fn save(&self, doc: &Document, commit_message: &str, author: &str) -> Result<Document> {
        self.save_sections(doc.id, doc.version, doc.sections.clone(), commit_message, author)
    }

    /// Same as `save`, addressed by id and expected version.
    pub fn save_sections(
        &self,
        id: DocumentId,
        expected_version: u32,
        sections: Vec<Section>,
        commit_message: &str,
        author: &str,
    ) -> Result<Document> {
        let current = self.get(id)?;
        if current.version != expected_version {
            return Err(MonographError::VersionConflict {
                document: id,
                expected: expected_version,
                actual: current.version,
            });
        }

        let hash = ContentHasher::hash(&sections);
        if hash == current.content_hash && self.unchanged == UnchangedSavePolicy::Reject {
            return Err(MonographError::UnchangedContent {
                document: id,
                version: current.version,
            });
        }

        let snapshot = VersionSnapshot {
            document_id: id,
            version: expected_version + 1,
            sections,
            content_hash: hash,
            commit_message: commit_message.to_string(),
            author: author.to_string(),
            timestamp: Utc::now(),
        };

        // The store re-checks the expected version atomically; the read above
        // only gives a better error for the unchanged case.
        let saved = self.storage.commit_version(&snapshot, expected_version)?;
        log::info!(
            "Saved {} v{} ({}) by {}",
            id,
            saved.version,
            saved.content_hash,
            author
        );
        Ok(saved)
    }

    /// Save the content of `target_version` as a new version.
    ///
    /// `doc.version` is the expected current version, as in `save`.
    pub fn revert(&self, doc: &Document, target_version: u32, author: &str) -> Result<Document> {
        let target = self.get_version(doc.id, target_version)?;
        let reverted = self.save_sections(
            doc.id,
            doc.version,
            target.sections,
            &format!("Revert to v{}", target_version),
            author,
        )?;
        log::info!(
            "Reverted {} to content of v{} as v{}",
            doc.id,
            target_version,
            reverted.version
        );
        Ok(reverted)
    }

    /// All snapshots, ascending by version.
    pub fn history(&self, id: DocumentId) -> Result<Vec<VersionSnapshot>> {
        let history = self.storage.list_versions(id)?;
        if history.is_empty() {
            return Err(MonographError::DocumentNotFound(id));
        }
        Ok(history)
    }

    pub fn get_version(&self, id: DocumentId, version: u32) -> Result<VersionSnapshot> {
        self.storage
            .get_version(id, version)?
            .ok_or(MonographError::VersionNotFound {
                document: id,
                version,
            })
    }

    /// Structural diff from snapshot `from` to snapshot `to`.
    pub fn diff_versions(&self, id: DocumentId, from: u32, to: u32) -> Result<Vec<SectionChange>> {
        let a = self.get_version(id, from)?;
        let b = self.get_version(id, to)?;
        Ok(DiffEngine::diff(&a.sections, &b.sections))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RedbStorage;
    use tempfile::TempDir;

    fn store(policy: UnchangedSavePolicy) -> (VersionStore<RedbStorage>, TempDir) {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(RedbStorage::open(dir.path().join("test.redb")).unwrap());
        (VersionStore::new(storage, policy), dir)
    }

    fn text(s: &str) -> Vec<Section> {
        vec![Section::static_text(s)]
    }

    fn edited(doc: &Document, s: &str) -> Document {
        let mut next = doc.clone();
        next.sections = text(s);
        next
    }

    #[test]
    fn versions_increase_by_one() {
        let (versions, _dir) = store(UnchangedSavePolicy::Reject);
        let mut doc = versions.create("north", "KCL", text("v1"), "importer").unwrap();
        assert_eq!(doc.version, 1);

        for i in 2..=5 {
            doc = versions
                .save(&edited(&doc, &format!("v{}", i)), "edit", "alice")
                .unwrap();
            assert_eq!(doc.version, i);
            assert_eq!(doc.content_hash, ContentHasher::hash(&text(&format!("v{}", i))));
        }

        let history = versions.history(doc.id).unwrap();
        let numbers: Vec<u32> = history.iter().map(|s| s.version).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
        assert_eq!(history[3].author, "alice");
    }

    #[test]
    fn stale_save_is_a_version_conflict() {
        let (versions, _dir) = store(UnchangedSavePolicy::Reject);
        let doc = versions.create("north", "KCL", text("v1"), "importer").unwrap();

        versions.save(&edited(&doc, "first"), "edit", "alice").unwrap();
        let err = versions.save(&edited(&doc, "second"), "edit", "bob").unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(
            err,
            MonographError::VersionConflict { expected: 1, actual: 2, .. }
        ));

        // Nothing of bob's landed
        assert_eq!(versions.get(doc.id).unwrap().sections, text("first"));
    }

    #[test]
    fn unchanged_save_rejected_by_default() {
        let (versions, _dir) = store(UnchangedSavePolicy::Reject);
        let doc = versions.create("north", "KCL", text("same"), "importer").unwrap();
        let err = versions.save(&doc, "noop", "alice").unwrap_err();
        assert!(matches!(err, MonographError::UnchangedContent { version: 1, .. }));
        assert_eq!(versions.history(doc.id).unwrap().len(), 1);
    }

    #[test]
    fn unchanged_save_recorded_when_configured() {
        let (versions, _dir) = store(UnchangedSavePolicy::Record);
        let doc = versions.create("north", "KCL", text("same"), "importer").unwrap();
        let saved = versions.save(&doc, "checkpoint", "alice").unwrap();
        assert_eq!(saved.version, 2);
        assert_eq!(saved.content_hash, doc.content_hash);
        assert!(versions.diff_versions(doc.id, 1, 2).unwrap().is_empty());
    }

    #[test]
    fn revert_creates_a_new_version() {
        let (versions, _dir) = store(UnchangedSavePolicy::Reject);
        let v1 = versions.create("north", "KCL", text("one"), "importer").unwrap();
        let v2 = versions.save(&edited(&v1, "two"), "edit", "alice").unwrap();
        let v3 = versions.save(&edited(&v2, "three"), "edit", "alice").unwrap();

        let v4 = versions.revert(&v3, 1, "alice").unwrap();
        assert_eq!(v4.version, 4);
        assert_eq!(v4.sections, versions.get_version(v1.id, 1).unwrap().sections);
        assert_eq!(v4.content_hash, v1.content_hash);

        // Saving after a revert continues from the max
        let v5 = versions.save(&edited(&v4, "five"), "edit", "alice").unwrap();
        assert_eq!(v5.version, 5);
        assert_eq!(
            versions.get_version(v1.id, 4).unwrap().commit_message,
            "Revert to v1"
        );
    }

    #[test]
    fn revert_to_missing_version() {
        let (versions, _dir) = store(UnchangedSavePolicy::Reject);
        let doc = versions.create("north", "KCL", text("one"), "importer").unwrap();
        assert!(matches!(
            versions.revert(&doc, 9, "alice"),
            Err(MonographError::VersionNotFound { version: 9, .. })
        ));
    }

    #[test]
    fn diff_between_versions() {
        let (versions, _dir) = store(UnchangedSavePolicy::Reject);
        let v1 = versions.create("north", "KCL", text("one"), "importer").unwrap();
        let mut next = v1.clone();
        next.sections.push(Section::dynamic("dose(kg)"));
        versions.save(&next, "add dose", "alice").unwrap();

        let ops = versions.diff_versions(v1.id, 1, 2).unwrap();
        assert_eq!(DiffEngine::stats(&ops).added, 1);
        assert_eq!(versions.diff_versions(v1.id, 2, 1).unwrap().len(), 1);
    }

    #[test]
    fn concurrent_writers_one_wins() {
        let (versions, _dir) = store(UnchangedSavePolicy::Reject);
        let versions = Arc::new(versions);
        let doc = versions.create("north", "KCL", text("v1"), "importer").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let versions = versions.clone();
                let doc = edited(&doc, &format!("writer {}", i));
                std::thread::spawn(move || versions.save(&doc, "race", "w").is_ok())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(versions.get(doc.id).unwrap().version, 2);
    }
}
