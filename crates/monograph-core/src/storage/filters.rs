use std::collections::BTreeMap;

/// Filter criteria for querying documents
#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    pub collection: Option<String>,
    pub key_name: Option<String>,
    /// Only documents currently in a shared group
    pub shared_only: bool,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl DocumentFilter {
    /// Create a new empty filter
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to one hospital configuration
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Restrict to one `KEYNAME`
    pub fn with_key_name(mut self, key_name: impl Into<String>) -> Self {
        self.key_name = Some(key_name.into());
        self
    }

    pub fn shared_only(mut self) -> Self {
        self.shared_only = true;
        self
    }

    /// Limit number of results
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip first N results
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Storage statistics
#[derive(Debug, Clone, Default)]
pub struct StorageStats {
    pub document_count: u64,
    pub version_count: u64,
    pub baseline_count: u64,
    pub group_count: u64,
    pub shared_document_count: u64,
    pub documents_by_collection: BTreeMap<String, u64>,
    pub db_size_bytes: u64,
}
