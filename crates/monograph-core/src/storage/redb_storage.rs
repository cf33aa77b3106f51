use crate::error::{MonographError, Result};
use crate::storage::filters::{DocumentFilter, StorageStats};
use crate::storage::traits::Storage;
use crate::types::{
    Baseline, BaselineId, Document, DocumentId, Fingerprint, GroupId, SharedGroup,
    ValidationStatus, VersionSnapshot,
};
use chrono::Utc;
use redb::{
    Database, MultimapTableDefinition, ReadableTable, ReadableTableMetadata, TableDefinition,
    WriteTransaction,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// Table definitions
const DOCUMENTS: TableDefinition<&[u8; 16], &[u8]> = TableDefinition::new("documents");
const BASELINES: TableDefinition<&[u8; 16], &[u8]> = TableDefinition::new("baselines");
const GROUPS: TableDefinition<&[u8; 16], &[u8]> = TableDefinition::new("groups");

// Version snapshots keyed by document id (16 bytes) + big-endian version (4 bytes),
// so a range over one document id iterates its history in order.
const VERSIONS: TableDefinition<&[u8; 20], &[u8]> = TableDefinition::new("versions");

// Secondary indexes
const DOCS_BY_HASH: MultimapTableDefinition<u64, &[u8; 16]> =
    MultimapTableDefinition::new("documents_by_hash");
const DOCS_BY_COLLECTION: MultimapTableDefinition<&str, &[u8; 16]> =
    MultimapTableDefinition::new("documents_by_collection");

// Metadata table
const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

/// Current schema version.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;
const SCHEMA_VERSION_KEY: &str = "schema_version";

/// Redb-based storage implementation
pub struct RedbStorage {
    db: Arc<Database>,
    path: PathBuf,
}

impl RedbStorage {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                MonographError::Validation(format!("Failed to create directory: {}", e))
            })?;
        }

        let is_new = !path.exists();
        let db = Database::create(&path)?;

        if !is_new {
            Self::check_schema_version(&db)?;
        }

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(DOCUMENTS)?;
            let _ = write_txn.open_table(BASELINES)?;
            let _ = write_txn.open_table(GROUPS)?;
            let _ = write_txn.open_table(VERSIONS)?;
            let _ = write_txn.open_multimap_table(DOCS_BY_HASH)?;
            let _ = write_txn.open_multimap_table(DOCS_BY_COLLECTION)?;
            let mut meta = write_txn.open_table(META)?;
            if is_new {
                meta.insert(SCHEMA_VERSION_KEY, CURRENT_SCHEMA_VERSION.to_string().as_bytes())?;
            }
        }
        write_txn.commit()?;

        log::debug!("Opened document store at {}", path.display());

        Ok(Self {
            db: Arc::new(db),
            path,
        })
    }

    /// Check schema version. Returns error if the file was written by another schema.
    fn check_schema_version(db: &Database) -> Result<()> {
        let read_txn = db.begin_read()?;
        let version = {
            let table = read_txn.open_table(META).ok();
            table
                .and_then(|t| {
                    t.get(SCHEMA_VERSION_KEY).ok().flatten().and_then(|v| {
                        std::str::from_utf8(v.value())
                            .ok()
                            .and_then(|s| s.parse::<u32>().ok())
                    })
                })
                .unwrap_or(CURRENT_SCHEMA_VERSION)
        };

        match version.cmp(&CURRENT_SCHEMA_VERSION) {
            std::cmp::Ordering::Equal => Ok(()),
            std::cmp::Ordering::Less => Err(MonographError::Validation(format!(
                "Database schema v{} is older than current v{}.",
                version, CURRENT_SCHEMA_VERSION
            ))),
            std::cmp::Ordering::Greater => Err(MonographError::Validation(format!(
                "Database schema v{} is newer than this binary v{}. Upgrade monograph.",
                version, CURRENT_SCHEMA_VERSION
            ))),
        }
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn id_bytes(id: &uuid::Uuid) -> [u8; 16] {
        *id.as_bytes()
    }

    fn version_key(id: &DocumentId, version: u32) -> [u8; 20] {
        let mut key = [0u8; 20];
        key[..16].copy_from_slice(id.as_bytes());
        key[16..].copy_from_slice(&version.to_be_bytes());
        key
    }

    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(MonographError::from)
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(MonographError::from)
    }

    fn read_record<T: DeserializeOwned>(
        &self,
        def: TableDefinition<&[u8; 16], &[u8]>,
        id: &uuid::Uuid,
    ) -> Result<Option<T>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(def)?;
        let bytes = table.get(&Self::id_bytes(id))?.map(|guard| guard.value().to_vec());
        bytes.map(|b| Self::decode(&b)).transpose()
    }

    fn load_document(txn: &WriteTransaction, id: DocumentId) -> Result<Document> {
        let table = txn.open_table(DOCUMENTS)?;
        let bytes = table
            .get(&Self::id_bytes(&id))?
            .map(|guard| guard.value().to_vec())
            .ok_or(MonographError::DocumentNotFound(id))?;
        Self::decode(&bytes)
    }

    fn store_document(txn: &WriteTransaction, doc: &Document) -> Result<()> {
        let bytes = Self::encode(doc)?;
        let mut table = txn.open_table(DOCUMENTS)?;
        table.insert(&Self::id_bytes(&doc.id), bytes.as_slice())?;
        Ok(())
    }

    fn load_group(txn: &WriteTransaction, id: GroupId) -> Result<SharedGroup> {
        let table = txn.open_table(GROUPS)?;
        let bytes = table
            .get(&Self::id_bytes(&id))?
            .map(|guard| guard.value().to_vec())
            .ok_or(MonographError::GroupNotFound(id))?;
        Self::decode(&bytes)
    }

    fn store_group(txn: &WriteTransaction, group: &SharedGroup) -> Result<()> {
        let bytes = Self::encode(group)?;
        let mut table = txn.open_table(GROUPS)?;
        table.insert(&Self::id_bytes(&group.id), bytes.as_slice())?;
        Ok(())
    }

    /// Membership precondition shared by `create_group` and `add_member`.
    fn check_joinable(doc: &Document, canonical: Fingerprint) -> Result<()> {
        if let Some(group) = doc.shared_group_id {
            return Err(MonographError::AlreadyLinked {
                document: doc.id,
                group,
            });
        }
        if doc.content_hash != canonical {
            return Err(MonographError::HashMismatch {
                document: doc.id,
                expected: canonical,
                found: doc.content_hash,
            });
        }
        Ok(())
    }

    /// Check if a document matches the filter criteria
    fn document_matches_filter(doc: &Document, filter: &DocumentFilter) -> bool {
        if let Some(ref collection) = filter.collection {
            if doc.collection != *collection {
                return false;
            }
        }

        if let Some(ref key_name) = filter.key_name {
            if doc.key_name != *key_name {
                return false;
            }
        }

        if filter.shared_only && doc.shared_group_id.is_none() {
            return false;
        }

        true
    }
}

impl Storage for RedbStorage {
    fn insert_document(&self, doc: &Document, initial: &VersionSnapshot) -> Result<()> {
        doc.validate().map_err(MonographError::Validation)?;
        if initial.document_id != doc.id || initial.version != doc.version {
            return Err(MonographError::Validation(format!(
                "Initial snapshot v{} does not belong to document {} v{}",
                initial.version, doc.id, doc.version
            )));
        }

        let id_bytes = Self::id_bytes(&doc.id);
        let write_txn = self.db.begin_write()?;

        {
            let table = write_txn.open_table(DOCUMENTS)?;
            if table.get(&id_bytes)?.is_some() {
                return Err(MonographError::DuplicateDocument(doc.id));
            }
        }

        Self::store_document(&write_txn, doc)?;

        let snapshot_bytes = Self::encode(initial)?;
        {
            let mut versions = write_txn.open_table(VERSIONS)?;
            versions.insert(
                &Self::version_key(&doc.id, initial.version),
                snapshot_bytes.as_slice(),
            )?;
        }
        {
            let mut by_hash = write_txn.open_multimap_table(DOCS_BY_HASH)?;
            by_hash.insert(doc.content_hash.as_u64(), &id_bytes)?;
        }
        {
            let mut by_collection = write_txn.open_multimap_table(DOCS_BY_COLLECTION)?;
            by_collection.insert(doc.collection.as_str(), &id_bytes)?;
        }

        write_txn.commit()?;
        Ok(())
    }

    fn get_document(&self, id: DocumentId) -> Result<Option<Document>> {
        self.read_record(DOCUMENTS, &id)
    }

    fn list_documents(&self, filter: DocumentFilter) -> Result<Vec<Document>> {
        let read_txn = self.db.begin_read()?;
        let documents = read_txn.open_table(DOCUMENTS)?;

        let mut docs = Vec::new();

        // If we have a collection filter, use the index for efficiency
        if let Some(ref collection) = filter.collection {
            let index = read_txn.open_multimap_table(DOCS_BY_COLLECTION)?;
            let ids: Vec<[u8; 16]> = index
                .get(collection.as_str())?
                .map(|result| result.map(|guard| *guard.value()))
                .collect::<std::result::Result<Vec<_>, _>>()?;

            for id in ids {
                if let Some(bytes) = documents.get(&id)? {
                    let doc: Document = Self::decode(bytes.value())?;
                    if Self::document_matches_filter(&doc, &filter) {
                        docs.push(doc);
                    }
                }
            }
        } else {
            // Full table scan
            for item in documents.iter()? {
                let (_, value) = item?;
                let doc: Document = Self::decode(value.value())?;
                if Self::document_matches_filter(&doc, &filter) {
                    docs.push(doc);
                }
            }
        }

        docs.sort_by(|a, b| {
            a.collection
                .cmp(&b.collection)
                .then_with(|| a.key_name.cmp(&b.key_name))
                .then_with(|| a.id.cmp(&b.id))
        });

        // Apply offset and limit
        let start = filter.offset.unwrap_or(0);
        let take = filter.limit.unwrap_or(usize::MAX);
        Ok(docs.into_iter().skip(start).take(take).collect())
    }

    fn documents_by_hash(&self, hash: Fingerprint) -> Result<Vec<DocumentId>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_multimap_table(DOCS_BY_HASH)?;
        let ids = index
            .get(hash.as_u64())?
            .map(|result| result.map(|guard| uuid::Uuid::from_bytes(*guard.value())))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn set_validation_status(&self, id: DocumentId, status: ValidationStatus) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        let mut doc = Self::load_document(&write_txn, id)?;
        doc.validation_status = status;
        Self::store_document(&write_txn, &doc)?;
        write_txn.commit()?;
        Ok(())
    }

    fn delete_document(&self, id: DocumentId) -> Result<()> {
        let id_bytes = Self::id_bytes(&id);
        let write_txn = self.db.begin_write()?;
        let doc = Self::load_document(&write_txn, id)?;

        if let Some(group) = doc.shared_group_id {
            return Err(MonographError::StillShared {
                document: id,
                group,
            });
        }

        {
            let mut documents = write_txn.open_table(DOCUMENTS)?;
            documents.remove(&id_bytes)?;
        }

        let lo = Self::version_key(&id, 0);
        let hi = Self::version_key(&id, u32::MAX);
        {
            let mut versions = write_txn.open_table(VERSIONS)?;
            let keys: Vec<[u8; 20]> = versions
                .range::<&[u8; 20]>(&lo..=&hi)?
                .map(|item| item.map(|(key, _)| *key.value()))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            for key in &keys {
                versions.remove(key)?;
            }
        }
        {
            let mut by_hash = write_txn.open_multimap_table(DOCS_BY_HASH)?;
            by_hash.remove(doc.content_hash.as_u64(), &id_bytes)?;
        }
        {
            let mut by_collection = write_txn.open_multimap_table(DOCS_BY_COLLECTION)?;
            by_collection.remove(doc.collection.as_str(), &id_bytes)?;
        }

        write_txn.commit()?;
        Ok(())
    }

    fn commit_version(&self, snapshot: &VersionSnapshot, expected_version: u32) -> Result<Document> {
        let id = snapshot.document_id;
        let id_bytes = Self::id_bytes(&id);

        // Single write transaction: compare, append, move head. redb serializes
        // writers, so exactly one commit wins per expected version.
        let write_txn = self.db.begin_write()?;
        let mut doc = Self::load_document(&write_txn, id)?;

        if doc.version != expected_version {
            return Err(MonographError::VersionConflict {
                document: id,
                expected: expected_version,
                actual: doc.version,
            });
        }
        if snapshot.version != expected_version + 1 {
            return Err(MonographError::Validation(format!(
                "Snapshot v{} does not follow v{}",
                snapshot.version, expected_version
            )));
        }

        let version_key = Self::version_key(&id, snapshot.version);
        let snapshot_bytes = Self::encode(snapshot)?;
        {
            let mut versions = write_txn.open_table(VERSIONS)?;
            if versions.get(&version_key)?.is_some() {
                return Err(MonographError::VersionConflict {
                    document: id,
                    expected: expected_version,
                    actual: snapshot.version,
                });
            }
            versions.insert(&version_key, snapshot_bytes.as_slice())?;
        }

        if doc.content_hash != snapshot.content_hash {
            let mut by_hash = write_txn.open_multimap_table(DOCS_BY_HASH)?;
            by_hash.remove(doc.content_hash.as_u64(), &id_bytes)?;
            by_hash.insert(snapshot.content_hash.as_u64(), &id_bytes)?;
        }

        doc.sections = snapshot.sections.clone();
        doc.content_hash = snapshot.content_hash;
        doc.version = snapshot.version;
        doc.updated_at = snapshot.timestamp;
        Self::store_document(&write_txn, &doc)?;

        write_txn.commit()?;
        Ok(doc)
    }

    fn get_version(&self, id: DocumentId, version: u32) -> Result<Option<VersionSnapshot>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(VERSIONS)?;
        let bytes = table
            .get(&Self::version_key(&id, version))?
            .map(|guard| guard.value().to_vec());
        bytes.map(|b| Self::decode(&b)).transpose()
    }

    fn list_versions(&self, id: DocumentId) -> Result<Vec<VersionSnapshot>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(VERSIONS)?;
        let lo = Self::version_key(&id, 0);
        let hi = Self::version_key(&id, u32::MAX);

        let mut history = Vec::new();
        for item in table.range::<&[u8; 20]>(&lo..=&hi)? {
            let (_, value) = item?;
            history.push(Self::decode(value.value())?);
        }
        Ok(history)
    }

    fn attach_baseline(&self, baseline: &Baseline) -> Result<Document> {
        let write_txn = self.db.begin_write()?;
        let mut doc = Self::load_document(&write_txn, baseline.document_id)?;

        if let Some(existing) = doc.baseline_id {
            return Err(MonographError::BaselineAlreadyExists {
                document: doc.id,
                baseline: existing,
            });
        }

        let bytes = Self::encode(baseline)?;
        {
            let mut table = write_txn.open_table(BASELINES)?;
            let key = Self::id_bytes(&baseline.id);
            if table.get(&key)?.is_some() {
                return Err(MonographError::Validation(format!(
                    "Baseline id {} already in use",
                    baseline.id
                )));
            }
            table.insert(&key, bytes.as_slice())?;
        }

        doc.baseline_id = Some(baseline.id);
        Self::store_document(&write_txn, &doc)?;
        write_txn.commit()?;
        Ok(doc)
    }

    fn get_baseline(&self, id: BaselineId) -> Result<Option<Baseline>> {
        self.read_record(BASELINES, &id)
    }

    fn create_group(&self, group: &SharedGroup) -> Result<()> {
        let write_txn = self.db.begin_write()?;

        {
            let table = write_txn.open_table(GROUPS)?;
            if table.get(&Self::id_bytes(&group.id))?.is_some() {
                return Err(MonographError::Validation(format!(
                    "Group id {} already in use",
                    group.id
                )));
            }
        }

        // Check everything before writing anything: no partial groups.
        let mut members = Vec::with_capacity(group.member_ids.len());
        for id in &group.member_ids {
            let doc = Self::load_document(&write_txn, *id)?;
            Self::check_joinable(&doc, group.canonical_hash)?;
            members.push(doc);
        }

        Self::store_group(&write_txn, group)?;
        for mut doc in members {
            doc.shared_group_id = Some(group.id);
            Self::store_document(&write_txn, &doc)?;
        }

        write_txn.commit()?;
        Ok(())
    }

    fn get_group(&self, id: GroupId) -> Result<Option<SharedGroup>> {
        self.read_record(GROUPS, &id)
    }

    fn list_groups(&self) -> Result<Vec<SharedGroup>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(GROUPS)?;
        let mut groups = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            groups.push(Self::decode::<SharedGroup>(value.value())?);
        }
        groups.sort_by_key(|g| g.created_at);
        Ok(groups)
    }

    fn add_member(&self, group_id: GroupId, doc_id: DocumentId) -> Result<SharedGroup> {
        let write_txn = self.db.begin_write()?;
        let mut group = Self::load_group(&write_txn, group_id)?;
        let mut doc = Self::load_document(&write_txn, doc_id)?;
        Self::check_joinable(&doc, group.canonical_hash)?;

        group.member_ids.insert(doc_id);
        group.updated_at = Utc::now();
        doc.shared_group_id = Some(group_id);

        Self::store_group(&write_txn, &group)?;
        Self::store_document(&write_txn, &doc)?;
        write_txn.commit()?;
        Ok(group)
    }

    fn remove_member(&self, group_id: GroupId, doc_id: DocumentId) -> Result<Option<SharedGroup>> {
        let write_txn = self.db.begin_write()?;
        let mut group = Self::load_group(&write_txn, group_id)?;

        if !group.member_ids.remove(&doc_id) {
            return Err(MonographError::NotAMember {
                document: doc_id,
                group: group_id,
            });
        }

        // The document may have been deleted out from under a stale group.
        match Self::load_document(&write_txn, doc_id) {
            Ok(mut doc) => {
                if doc.shared_group_id == Some(group_id) {
                    doc.shared_group_id = None;
                    Self::store_document(&write_txn, &doc)?;
                }
            }
            Err(MonographError::DocumentNotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let result = if group.member_ids.is_empty() {
            let mut table = write_txn.open_table(GROUPS)?;
            table.remove(&Self::id_bytes(&group_id))?;
            None
        } else {
            group.updated_at = Utc::now();
            Self::store_group(&write_txn, &group)?;
            Some(group)
        };

        write_txn.commit()?;
        Ok(result)
    }

    fn set_canonical_hash(&self, group_id: GroupId, hash: Fingerprint) -> Result<SharedGroup> {
        let write_txn = self.db.begin_write()?;
        let mut group = Self::load_group(&write_txn, group_id)?;
        group.canonical_hash = hash;
        group.updated_at = Utc::now();
        Self::store_group(&write_txn, &group)?;
        write_txn.commit()?;
        Ok(group)
    }

    fn put_metadata(&self, key: &str, value: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut meta = write_txn.open_table(META)?;
            meta.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn get_metadata(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let meta = read_txn.open_table(META)?;
        Ok(meta.get(key)?.map(|guard| guard.value().to_vec()))
    }

    fn stats(&self) -> Result<StorageStats> {
        let read_txn = self.db.begin_read()?;
        let documents = read_txn.open_table(DOCUMENTS)?;
        let versions = read_txn.open_table(VERSIONS)?;
        let baselines = read_txn.open_table(BASELINES)?;
        let groups = read_txn.open_table(GROUPS)?;

        let mut stats = StorageStats {
            version_count: versions.len()?,
            baseline_count: baselines.len()?,
            group_count: groups.len()?,
            ..StorageStats::default()
        };

        let mut by_collection: BTreeMap<String, u64> = BTreeMap::new();
        for item in documents.iter()? {
            let (_, value) = item?;
            let doc: Document = Self::decode(value.value())?;
            stats.document_count += 1;
            if doc.is_shared() {
                stats.shared_document_count += 1;
            }
            *by_collection.entry(doc.collection).or_insert(0) += 1;
        }
        stats.documents_by_collection = by_collection;

        stats.db_size_bytes = std::fs::metadata(&self.path)
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(stats)
    }

    fn snapshot(&self, path: &Path) -> Result<()> {
        std::fs::copy(&self.path, path).map_err(|e| {
            MonographError::Validation(format!("Failed to create snapshot: {}", e))
        })?;
        Ok(())
    }
}
