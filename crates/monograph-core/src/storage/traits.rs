use crate::error::Result;
use crate::storage::filters::{DocumentFilter, StorageStats};
use crate::types::{
    Baseline, BaselineId, Document, DocumentId, Fingerprint, GroupId, SharedGroup,
    ValidationStatus, VersionSnapshot,
};
use std::path::Path;

/// Document store backing the engine.
///
/// Every method that checks a precondition (expected version, baseline
/// absence, hash equality, membership) performs the check and the write in
/// one transaction.
pub trait Storage: Send + Sync {
    // === Documents ===

    /// Create a document together with its first snapshot.
    /// Fails with `DuplicateDocument` if the id is taken.
    fn insert_document(&self, doc: &Document, initial: &VersionSnapshot) -> Result<()>;

    /// Retrieve a document by ID
    fn get_document(&self, id: DocumentId) -> Result<Option<Document>>;

    /// List documents matching the filter, ordered by collection then key name
    fn list_documents(&self, filter: DocumentFilter) -> Result<Vec<Document>>;

    /// Ids of every document whose current content hash equals `hash`
    fn documents_by_hash(&self, hash: Fingerprint) -> Result<Vec<DocumentId>>;

    /// Update validation state. Does not touch content or version.
    fn set_validation_status(&self, id: DocumentId, status: ValidationStatus) -> Result<()>;

    /// Hard delete a document and its history. Refuses with `StillShared`
    /// while the document belongs to a group. Its baseline is kept.
    fn delete_document(&self, id: DocumentId) -> Result<()>;

    // === Versions ===

    /// Append `snapshot` and move the document's head to it, provided the
    /// stored version still equals `expected_version`. Returns the updated
    /// document. Fails with `VersionConflict` otherwise.
    fn commit_version(&self, snapshot: &VersionSnapshot, expected_version: u32) -> Result<Document>;

    /// Retrieve one snapshot
    fn get_version(&self, id: DocumentId, version: u32) -> Result<Option<VersionSnapshot>>;

    /// All snapshots of a document, ascending by version
    fn list_versions(&self, id: DocumentId) -> Result<Vec<VersionSnapshot>>;

    // === Baselines ===

    /// Store `baseline` and point its document at it. Fails with
    /// `BaselineAlreadyExists` if the document already has one.
    fn attach_baseline(&self, baseline: &Baseline) -> Result<Document>;

    /// Retrieve a baseline by ID
    fn get_baseline(&self, id: BaselineId) -> Result<Option<Baseline>>;

    // === Shared groups ===

    /// Store a new group and set every member's `shared_group_id`. Every
    /// member must hash to the canonical hash and be unlinked.
    fn create_group(&self, group: &SharedGroup) -> Result<()>;

    /// Retrieve a group by ID
    fn get_group(&self, id: GroupId) -> Result<Option<SharedGroup>>;

    /// All groups
    fn list_groups(&self) -> Result<Vec<SharedGroup>>;

    /// Add one unlinked document whose hash equals the canonical hash
    fn add_member(&self, group_id: GroupId, doc_id: DocumentId) -> Result<SharedGroup>;

    /// Remove a member and clear its `shared_group_id`. Returns `None` when
    /// the group became empty and was deleted.
    fn remove_member(&self, group_id: GroupId, doc_id: DocumentId) -> Result<Option<SharedGroup>>;

    /// Replace the canonical hash of a group
    fn set_canonical_hash(&self, group_id: GroupId, hash: Fingerprint) -> Result<SharedGroup>;

    // === Metadata ===

    /// Store metadata key-value pair
    fn put_metadata(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Retrieve metadata by key
    fn get_metadata(&self, key: &str) -> Result<Option<Vec<u8>>>;

    // === Maintenance ===

    /// Get database statistics
    fn stats(&self) -> Result<StorageStats>;

    /// Create a file-level backup/snapshot
    fn snapshot(&self, path: &Path) -> Result<()>;
}
