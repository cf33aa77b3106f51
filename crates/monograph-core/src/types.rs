use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Type alias for document identifiers
pub type DocumentId = Uuid;

/// Type alias for baseline identifiers
pub type BaselineId = Uuid;

/// Type alias for shared group identifiers
pub type GroupId = Uuid;

/// Canonical 64-bit fingerprint of a section list.
///
/// Equality oracle only. Never used as a security boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Parse the 16-digit hex form produced by `Display`.
    pub fn from_hex(s: &str) -> Option<Self> {
        u64::from_str_radix(s.trim(), 16).ok().map(Fingerprint)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// One typed block of reference content. Order inside a document is significant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Section {
    /// Literal text shown as-is.
    Static { text: String },

    /// Expression evaluated by the preview engine. Opaque to this crate.
    Dynamic { expression: String },
}

impl Section {
    pub fn static_text(text: impl Into<String>) -> Self {
        Section::Static { text: text.into() }
    }

    pub fn dynamic(expression: impl Into<String>) -> Self {
        Section::Dynamic {
            expression: expression.into(),
        }
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            Section::Static { .. } => "static",
            Section::Dynamic { .. } => "dynamic",
        }
    }

    /// The text body regardless of kind.
    pub fn body(&self) -> &str {
        match self {
            Section::Static { text } => text,
            Section::Dynamic { expression } => expression,
        }
    }
}

/// Validation state kept alongside a document. Independent of versioning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ValidationStatus {
    #[default]
    Unchecked,
    Passed,
    Failed { reason: String },
}

/// A unit of editable reference content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier. UUIDv7 for time-sortability.
    pub id: DocumentId,

    /// Hospital configuration this document was imported into.
    pub collection: String,

    /// The `KEYNAME` of the ingredient record.
    pub key_name: String,

    pub sections: Vec<Section>,

    /// Fingerprint of `sections`. Recomputed on every save.
    pub content_hash: Fingerprint,

    /// Starts at 1, +1 per successful save.
    pub version: u32,

    /// Set once when the import baseline is taken.
    pub baseline_id: Option<BaselineId>,

    /// Present only while the document is a member of that group.
    pub shared_group_id: Option<GroupId>,

    pub validation_status: ValidationStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Build an unsaved document at version 1. `content_hash` must be the
    /// fingerprint of `sections`; `VersionStore::create` takes care of that.
    pub fn new(
        collection: impl Into<String>,
        key_name: impl Into<String>,
        sections: Vec<Section>,
        content_hash: Fingerprint,
    ) -> Self {
        let now = Utc::now();
        Document {
            id: Uuid::now_v7(),
            collection: collection.into(),
            key_name: key_name.into(),
            sections,
            content_hash,
            version: 1,
            baseline_id: None,
            shared_group_id: None,
            validation_status: ValidationStatus::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_shared(&self) -> bool {
        self.shared_group_id.is_some()
    }

    /// Validate the identity fields
    pub fn validate(&self) -> Result<(), String> {
        if self.key_name.trim().is_empty() {
            return Err("Key name must not be empty".to_string());
        }
        if self.collection.trim().is_empty() {
            return Err("Collection must not be empty".to_string());
        }
        if self.version == 0 {
            return Err("Version numbers start at 1".to_string());
        }
        Ok(())
    }
}

/// Immutable historical record of a document's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionSnapshot {
    pub document_id: DocumentId,
    pub version: u32,
    pub sections: Vec<Section>,
    pub content_hash: Fingerprint,
    pub commit_message: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
}

/// Immutable copy of a document as it was imported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub id: BaselineId,
    pub document_id: DocumentId,
    pub sections: Vec<Section>,
    pub content_hash: Fingerprint,
    pub created_at: DateTime<Utc>,
}

/// Documents known to hold identical content, linked for coordinated edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedGroup {
    pub id: GroupId,
    pub canonical_hash: Fingerprint,
    pub member_ids: BTreeSet<DocumentId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SharedGroup {
    pub fn new(canonical_hash: Fingerprint, member_ids: BTreeSet<DocumentId>) -> Self {
        let now = Utc::now();
        SharedGroup {
            id: Uuid::now_v7(),
            canonical_hash,
            member_ids,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn contains(&self, id: DocumentId) -> bool {
        self.member_ids.contains(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_json_uses_kind_tag() {
        let s = Section::static_text("Dilute before use");
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["kind"], "static");
        assert_eq!(json["text"], "Dilute before use");

        let d: Section =
            serde_json::from_str(r#"{"expression":"dose(kg)","kind":"dynamic"}"#).unwrap();
        assert_eq!(d, Section::dynamic("dose(kg)"));
    }

    #[test]
    fn fingerprint_hex_round_trip() {
        let fp = Fingerprint(0x00ab_cdef_0123_4567);
        let hex = fp.to_string();
        assert_eq!(hex, "00abcdef01234567");
        assert_eq!(Fingerprint::from_hex(&hex), Some(fp));
        assert_eq!(Fingerprint::from_hex("zz"), None);
    }

    #[test]
    fn document_validation() {
        let mut doc = Document::new("north", "KCL", vec![], Fingerprint(0));
        assert!(doc.validate().is_ok());
        doc.key_name = " ".into();
        assert!(doc.validate().is_err());
    }
}
