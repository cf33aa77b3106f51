use crate::diff::{DiffEngine, SectionChange};
use crate::error::{MonographError, Result};
use crate::storage::Storage;
use crate::types::{Baseline, BaselineId, Document};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Create-once store for the imported form of each document.
pub struct BaselineStore<S: Storage> {
    storage: Arc<S>,
}

impl<S: Storage> BaselineStore<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Copy the document's stored content into a new baseline.
    ///
    /// Fails with `BaselineAlreadyExists` if one was taken before. The copy
    /// is made from the persisted document, not from `doc`.
    pub fn create_once(&self, doc: &Document) -> Result<Baseline> {
        let current = self
            .storage
            .get_document(doc.id)?
            .ok_or(MonographError::DocumentNotFound(doc.id))?;

        if let Some(existing) = current.baseline_id {
            return Err(MonographError::BaselineAlreadyExists {
                document: doc.id,
                baseline: existing,
            });
        }

        let baseline = Baseline {
            id: Uuid::now_v7(),
            document_id: current.id,
            sections: current.sections,
            content_hash: current.content_hash,
            created_at: Utc::now(),
        };
        self.storage.attach_baseline(&baseline)?;
        log::debug!("Baseline {} taken for {}", baseline.id, doc.id);
        Ok(baseline)
    }

    pub fn get(&self, id: BaselineId) -> Result<Baseline> {
        self.storage
            .get_baseline(id)?
            .ok_or(MonographError::BaselineNotFound(id))
    }

    /// Baseline of `doc`, failing with `NoBaseline` if none was taken.
    pub fn for_document(&self, doc: &Document) -> Result<Baseline> {
        let id = doc.baseline_id.ok_or(MonographError::NoBaseline(doc.id))?;
        self.get(id)
    }

    /// Ops turning the imported content into `doc`'s working content.
    pub fn diff_against_baseline(&self, doc: &Document) -> Result<Vec<SectionChange>> {
        let baseline = self.for_document(doc)?;
        Ok(DiffEngine::diff(&baseline.sections, &doc.sections))
    }

    /// Whether `doc`'s working content differs from its baseline.
    pub fn is_modified(&self, doc: &Document) -> Result<bool> {
        let baseline = self.for_document(doc)?;
        Ok(baseline.content_hash != doc.content_hash)
    }
}
