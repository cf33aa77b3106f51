use crate::error::Result;
use crate::hasher::ContentHasher;
use crate::similarity::hash_classes;
use crate::storage::{DocumentFilter, Storage};
use crate::types::{Document, DocumentId, Fingerprint, Section};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Ids of every corpus document whose content hash equals the hash of
/// `candidate`. Works on unsaved content, so the check can run before a
/// new document is created.
pub fn scan(candidate: &[Section], corpus: &[Document]) -> Vec<DocumentId> {
    let hash = ContentHasher::hash(candidate);
    corpus
        .iter()
        .filter(|doc| doc.content_hash == hash)
        .map(|doc| doc.id)
        .collect()
}

/// Every hash held by two or more documents of `corpus`.
pub fn duplicate_groups(corpus: &[Document]) -> BTreeMap<Fingerprint, BTreeSet<DocumentId>> {
    let mut classes = hash_classes(corpus);
    classes.retain(|_, ids| ids.len() > 1);
    classes
}

/// Store-backed exact-content duplicate lookups. No similarity tolerance.
pub struct DuplicateDetector<S: Storage> {
    storage: Arc<S>,
}

impl<S: Storage> DuplicateDetector<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Same as [`scan`], answered from the store's hash index.
    /// `exclude` drops the candidate itself when it is already persisted.
    pub fn scan_store(
        &self,
        candidate: &[Section],
        exclude: Option<DocumentId>,
    ) -> Result<Vec<DocumentId>> {
        let hash = ContentHasher::hash(candidate);
        let mut ids = self.storage.documents_by_hash(hash)?;
        ids.retain(|id| Some(*id) != exclude);
        ids.sort();
        Ok(ids)
    }

    /// [`duplicate_groups`] over the documents matching `filter`.
    pub fn duplicate_groups_in_store(
        &self,
        filter: DocumentFilter,
    ) -> Result<BTreeMap<Fingerprint, BTreeSet<DocumentId>>> {
        let corpus = self.storage.list_documents(filter)?;
        Ok(duplicate_groups(&corpus))
    }
}
