use crate::types::{BaselineId, DocumentId, Fingerprint, GroupId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MonographError>;

#[derive(Debug, Error)]
pub enum MonographError {
    #[error("Storage error: {0}")]
    Storage(#[from] redb::Error),

    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Storage operation error: {0}")]
    StorageOperation(#[from] redb::StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Section list that cannot be hashed: unknown `kind`, missing fields, wrong shape.
    #[error("Malformed content: {0}")]
    MalformedContent(String),

    /// Optimistic lock failure. Re-read the document and retry.
    #[error("Version conflict on {document}: expected v{expected}, stored v{actual}")]
    VersionConflict {
        document: DocumentId,
        expected: u32,
        actual: u32,
    },

    #[error("Hash mismatch on {document}: expected {expected}, found {found}")]
    HashMismatch {
        document: DocumentId,
        expected: Fingerprint,
        found: Fingerprint,
    },

    #[error("Document {document} already has baseline {baseline}")]
    BaselineAlreadyExists {
        document: DocumentId,
        baseline: BaselineId,
    },

    #[error("Import format error in '{record}' at line {line}: {reason}")]
    ImportFormat {
        record: String,
        line: usize,
        reason: String,
    },

    /// Save rejected because the content hash did not change.
    #[error("No content change for {document} at v{version}")]
    UnchangedContent { document: DocumentId, version: u32 },

    #[error("Document not found: {0}")]
    DocumentNotFound(DocumentId),

    #[error("Version v{version} of {document} not found")]
    VersionNotFound { document: DocumentId, version: u32 },

    #[error("Baseline not found: {0}")]
    BaselineNotFound(BaselineId),

    #[error("Document {0} has no baseline")]
    NoBaseline(DocumentId),

    #[error("Shared group not found: {0}")]
    GroupNotFound(GroupId),

    #[error("Document {document} is already linked to group {group}")]
    AlreadyLinked { document: DocumentId, group: GroupId },

    #[error("Document {document} is not a member of group {group}")]
    NotAMember { document: DocumentId, group: GroupId },

    #[error("Document {document} is still shared in group {group}; unlink it first")]
    StillShared { document: DocumentId, group: GroupId },

    #[error("Duplicate document: {0}")]
    DuplicateDocument(DocumentId),

    #[error("Patch conflict at index {index}: {reason}")]
    PatchConflict { index: usize, reason: String },

    #[error("Validation error: {0}")]
    Validation(String),
}

impl MonographError {
    /// Only a `VersionConflict` can succeed after re-reading and retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MonographError::VersionConflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn only_version_conflicts_are_retryable() {
        let id = Uuid::now_v7();
        let conflict = MonographError::VersionConflict {
            document: id,
            expected: 2,
            actual: 3,
        };
        assert!(conflict.is_retryable());
        assert!(!MonographError::MalformedContent("x".into()).is_retryable());
        assert!(!MonographError::DocumentNotFound(id).is_retryable());
    }

    #[test]
    fn conflict_message_names_both_versions() {
        let id = Uuid::now_v7();
        let err = MonographError::VersionConflict {
            document: id,
            expected: 2,
            actual: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("v2"));
        assert!(msg.contains("v5"));
    }
}
