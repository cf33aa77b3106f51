//! Shared groups: documents linked because they hold identical content.
//!
//! An edit to one member can be pushed to all, some or all-but-some of the
//! other members. Propagation is a best-effort batch with one result per
//! target; after every batch the group is reconciled and any member whose
//! hash left the canonical hash is reported as diverged and unlinked.

use crate::diff::{DiffEngine, SectionChange};
use crate::error::{MonographError, Result};
use crate::hasher::ContentHasher;
use crate::storage::Storage;
use crate::types::{Document, DocumentId, Fingerprint, GroupId, Section, SharedGroup};
use crate::version::VersionStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Which members of a group receive an edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", content = "ids", rename_all = "snake_case")]
pub enum EditStrategy {
    All,
    Selected(BTreeSet<DocumentId>),
    Excluded(BTreeSet<DocumentId>),
}

impl EditStrategy {
    fn targets(&self, group: &SharedGroup) -> BTreeSet<DocumentId> {
        match self {
            EditStrategy::All => group.member_ids.clone(),
            EditStrategy::Selected(ids) => ids.clone(),
            EditStrategy::Excluded(ids) => group.member_ids.difference(ids).copied().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Applied,
    Skipped,
    Failed,
}

/// A member whose content no longer matches its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Divergence {
    pub document_id: DocumentId,
    pub expected: Fingerprint,
    pub actual: Fingerprint,
}

/// Outcome for one document of an `apply_edit` or `rollback` batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetResult {
    pub document_id: DocumentId,
    pub status: TargetStatus,
    /// Version the document was at before the batch touched it.
    pub previous_version: Option<u32>,
    /// Version after the batch. Equal to `previous_version` when the
    /// document already held the new content.
    pub new_version: Option<u32>,
    pub error: Option<String>,
    /// True when `error` is worth retrying after a re-read.
    #[serde(default)]
    pub retryable: bool,
    /// Set when the document was unlinked by the reconcile pass.
    pub divergence: Option<Divergence>,
}

impl TargetResult {
    fn skipped(document_id: DocumentId) -> Self {
        TargetResult {
            document_id,
            status: TargetStatus::Skipped,
            previous_version: None,
            new_version: None,
            error: None,
            retryable: false,
            divergence: None,
        }
    }

    fn failed(document_id: DocumentId, previous_version: Option<u32>, err: &MonographError) -> Self {
        TargetResult {
            document_id,
            status: TargetStatus::Failed,
            previous_version,
            new_version: None,
            error: Some(err.to_string()),
            retryable: err.is_retryable(),
            divergence: None,
        }
    }

    fn applied(document_id: DocumentId, previous_version: u32, new_version: u32) -> Self {
        TargetResult {
            document_id,
            status: TargetStatus::Applied,
            previous_version: Some(previous_version),
            new_version: Some(new_version),
            error: None,
            retryable: false,
            divergence: None,
        }
    }

    /// Applied and produced a new version.
    pub fn created_version(&self) -> bool {
        self.status == TargetStatus::Applied && self.new_version != self.previous_version
    }
}

/// Itemized result of `apply_edit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyEditReport {
    pub group_id: GroupId,
    pub previous_canonical: Fingerprint,
    pub canonical_hash: Fingerprint,
    pub results: Vec<TargetResult>,
    /// False when the reconcile pass unlinked every member.
    pub group_exists: bool,
    /// Group bookkeeping that failed after targets were written: moving the
    /// canonical hash or reconciling. The per-target results still stand.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ApplyEditReport {
    pub fn applied(&self) -> impl Iterator<Item = &TargetResult> {
        self.with_status(TargetStatus::Applied)
    }

    pub fn failed(&self) -> impl Iterator<Item = &TargetResult> {
        self.with_status(TargetStatus::Failed)
    }

    pub fn diverged(&self) -> impl Iterator<Item = &Divergence> {
        self.results.iter().filter_map(|r| r.divergence.as_ref())
    }

    /// Every target applied and the group bookkeeping succeeded.
    pub fn is_complete(&self) -> bool {
        self.failed().next().is_none() && self.errors.is_empty()
    }

    /// No target applied.
    pub fn is_total_failure(&self) -> bool {
        self.applied().next().is_none() && self.failed().next().is_some()
    }

    fn with_status(&self, status: TargetStatus) -> impl Iterator<Item = &TargetResult> {
        self.results.iter().filter(move |r| r.status == status)
    }
}

/// Result of an explicit `reconcile` pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub group_id: GroupId,
    pub canonical_hash: Fingerprint,
    pub diverged: Vec<Divergence>,
    /// Members gone from the store; dropped from the group.
    pub missing: Vec<DocumentId>,
    pub group_exists: bool,
    /// Members that could not be checked or unlinked.
    #[serde(default)]
    pub errors: Vec<String>,
}

/// What a proposed edit would change in one member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberPreview {
    pub document_id: DocumentId,
    pub collection: String,
    pub version: u32,
    pub changes: Vec<SectionChange>,
}

/// One member compared with the group's canonical content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberComparison {
    pub document_id: DocumentId,
    pub content_hash: Fingerprint,
    pub matches_canonical: bool,
    /// Ops from the reference member's content to this member's. Empty when
    /// no member holds the canonical content.
    pub changes: Vec<SectionChange>,
}

/// Result of compensating an `apply_edit` batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackReport {
    pub group_id: GroupId,
    pub results: Vec<TargetResult>,
    /// Diverged members linked again because their content matches the
    /// restored canonical hash.
    pub rejoined: Vec<DocumentId>,
    pub canonical_restored: bool,
    /// Failures after the reverts ran: restoring the canonical hash or
    /// relinking a diverged member.
    #[serde(default)]
    pub errors: Vec<String>,
}

pub struct SharedLinkManager<S: Storage> {
    storage: Arc<S>,
    versions: Arc<VersionStore<S>>,
}

impl<S: Storage> SharedLinkManager<S> {
    pub fn new(storage: Arc<S>, versions: Arc<VersionStore<S>>) -> Self {
        Self { storage, versions }
    }

    pub fn get_group(&self, id: GroupId) -> Result<SharedGroup> {
        self.storage
            .get_group(id)?
            .ok_or(MonographError::GroupNotFound(id))
    }

    pub fn list_groups(&self) -> Result<Vec<SharedGroup>> {
        self.storage.list_groups()
    }

    /// Link two or more documents holding identical content.
    ///
    /// Fails with `HashMismatch` if any hash differs from the first
    /// document's and with `AlreadyLinked` if any is in a group. Nothing is
    /// written on failure.
    pub fn link(&self, doc_ids: &[DocumentId]) -> Result<SharedGroup> {
        let ids: BTreeSet<DocumentId> = doc_ids.iter().copied().collect();
        if ids.len() < 2 {
            return Err(MonographError::Validation(
                "link needs at least two distinct documents".to_string(),
            ));
        }

        let mut canonical = None;
        for id in doc_ids {
            let doc = self.versions.get(*id)?;
            let expected = *canonical.get_or_insert(doc.content_hash);
            if doc.content_hash != expected {
                return Err(MonographError::HashMismatch {
                    document: doc.id,
                    expected,
                    found: doc.content_hash,
                });
            }
            if let Some(group) = doc.shared_group_id {
                return Err(MonographError::AlreadyLinked {
                    document: doc.id,
                    group,
                });
            }
        }

        let canonical = canonical.ok_or_else(|| {
            MonographError::Validation("link needs at least two distinct documents".to_string())
        })?;
        let group = SharedGroup::new(canonical, ids);
        self.storage.create_group(&group)?;
        log::info!(
            "Linked {} documents into group {} ({})",
            group.member_ids.len(),
            group.id,
            canonical
        );
        Ok(group)
    }

    /// Add one more unlinked document with the canonical content.
    pub fn join(&self, group_id: GroupId, doc_id: DocumentId) -> Result<SharedGroup> {
        let group = self.storage.add_member(group_id, doc_id)?;
        log::info!("{} joined group {}", doc_id, group_id);
        Ok(group)
    }

    /// Make a member independent. No hash check. Returns `None` if that
    /// was the last member and the group is gone.
    pub fn unlink(&self, group_id: GroupId, doc_id: DocumentId) -> Result<Option<SharedGroup>> {
        let group = self.storage.remove_member(group_id, doc_id)?;
        log::info!("{} unlinked from group {}", doc_id, group_id);
        if group.is_none() {
            log::info!("Group {} has no members left and was removed", group_id);
        }
        Ok(group)
    }

    /// Save `edited.sections` into the members selected by `strategy`.
    ///
    /// For `edited` itself the expected version is `edited.version`; every
    /// other target is saved against the version it is stored at. A failed
    /// target does not stop the others. Once at least one target applies,
    /// the new hash becomes canonical. The group is then reconciled.
    pub fn apply_edit(
        &self,
        group_id: GroupId,
        edited: &Document,
        strategy: &EditStrategy,
        commit_message: &str,
        author: &str,
    ) -> Result<ApplyEditReport> {
        let group = self.get_group(group_id)?;
        if !group.contains(edited.id) {
            return Err(MonographError::NotAMember {
                document: edited.id,
                group: group_id,
            });
        }

        let new_hash = ContentHasher::hash(&edited.sections);
        let targets = strategy.targets(&group);
        let mut results = Vec::with_capacity(group.member_ids.len());

        for id in &targets {
            if !group.contains(*id) {
                let err = MonographError::NotAMember {
                    document: *id,
                    group: group_id,
                };
                results.push(TargetResult::failed(*id, None, &err));
                continue;
            }
            results.push(self.apply_to_target(*id, edited, new_hash, commit_message, author));
        }
        for id in group.member_ids.difference(&targets) {
            results.push(TargetResult::skipped(*id));
        }

        // Targets are written from here on: failures below go in the report.
        let mut errors = Vec::new();
        let any_applied = results.iter().any(|r| r.status == TargetStatus::Applied);
        let mut canonical = group.canonical_hash;
        if any_applied && new_hash != group.canonical_hash {
            match self.storage.set_canonical_hash(group_id, new_hash) {
                Ok(_) => canonical = new_hash,
                Err(e) => {
                    log::error!("Could not move canonical hash of group {}: {}", group_id, e);
                    errors.push(format!("set canonical hash: {}", e));
                }
            }
        }

        let mut group_exists = true;
        match self.reconcile(group_id) {
            Ok(reconciled) => {
                for divergence in &reconciled.diverged {
                    if let Some(result) = results
                        .iter_mut()
                        .find(|r| r.document_id == divergence.document_id)
                    {
                        result.divergence = Some(*divergence);
                    }
                }
                group_exists = reconciled.group_exists;
                errors.extend(reconciled.errors);
            }
            Err(e) => {
                log::error!("Could not reconcile group {}: {}", group_id, e);
                errors.push(format!("reconcile: {}", e));
            }
        }

        let report = ApplyEditReport {
            group_id,
            previous_canonical: group.canonical_hash,
            canonical_hash: canonical,
            results,
            group_exists,
            errors,
        };
        log::info!(
            "Applied edit to group {}: {} applied, {} failed, {} diverged",
            group_id,
            report.applied().count(),
            report.failed().count(),
            report.diverged().count()
        );
        Ok(report)
    }

    fn apply_to_target(
        &self,
        id: DocumentId,
        edited: &Document,
        new_hash: Fingerprint,
        commit_message: &str,
        author: &str,
    ) -> TargetResult {
        let current = match self.versions.get(id) {
            Ok(doc) => doc,
            Err(e) => return TargetResult::failed(id, None, &e),
        };
        let expected = if id == edited.id {
            edited.version
        } else {
            current.version
        };

        // Already holds the new content; nothing to write.
        if current.content_hash == new_hash && current.version == expected {
            return TargetResult::applied(id, expected, expected);
        }

        match self.versions.save_sections(
            id,
            expected,
            edited.sections.clone(),
            commit_message,
            author,
        ) {
            Ok(saved) => TargetResult::applied(id, expected, saved.version),
            Err(e) => {
                log::warn!("Edit to {} in shared group failed: {}", id, e);
                TargetResult::failed(id, Some(current.version), &e)
            }
        }
    }

    /// Unlink every member whose current hash differs from the canonical hash.
    pub fn reconcile(&self, group_id: GroupId) -> Result<ReconcileReport> {
        let group = self.get_group(group_id)?;
        let mut diverged = Vec::new();
        let mut missing = Vec::new();
        let mut errors = Vec::new();
        let mut group_exists = true;

        for id in &group.member_ids {
            let actual = match self.storage.get_document(*id) {
                Ok(Some(doc)) => doc.content_hash,
                Ok(None) => {
                    log::warn!("Group {} references missing document {}", group_id, id);
                    missing.push(*id);
                    self.drop_member(group_id, *id, &mut group_exists, &mut errors);
                    continue;
                }
                Err(e) => {
                    errors.push(format!("check {}: {}", id, e));
                    continue;
                }
            };
            if actual != group.canonical_hash {
                log::warn!(
                    "{} diverged from group {}: expected {}, found {}",
                    id,
                    group_id,
                    group.canonical_hash,
                    actual
                );
                diverged.push(Divergence {
                    document_id: *id,
                    expected: group.canonical_hash,
                    actual,
                });
                self.drop_member(group_id, *id, &mut group_exists, &mut errors);
            }
        }

        Ok(ReconcileReport {
            group_id,
            canonical_hash: group.canonical_hash,
            diverged,
            missing,
            group_exists,
            errors,
        })
    }

    fn drop_member(
        &self,
        group_id: GroupId,
        id: DocumentId,
        group_exists: &mut bool,
        errors: &mut Vec<String>,
    ) {
        match self.storage.remove_member(group_id, id) {
            Ok(remaining) => *group_exists = remaining.is_some(),
            Err(e) => errors.push(format!("unlink {}: {}", id, e)),
        }
    }

    /// Per-member diff of replacing each member's content with `sections`.
    pub fn preview_edit(&self, group_id: GroupId, sections: &[Section]) -> Result<Vec<MemberPreview>> {
        let group = self.get_group(group_id)?;
        group
            .member_ids
            .iter()
            .map(|id| -> Result<MemberPreview> {
                let doc = self.versions.get(*id)?;
                Ok(MemberPreview {
                    document_id: doc.id,
                    changes: DiffEngine::diff(&doc.sections, sections),
                    collection: doc.collection,
                    version: doc.version,
                })
            })
            .collect()
    }

    /// Compare every member with the first member that still holds the
    /// canonical content. Read-only; use `reconcile` to act on the result.
    pub fn compare_members(&self, group_id: GroupId) -> Result<Vec<MemberComparison>> {
        let group = self.get_group(group_id)?;
        let members = group
            .member_ids
            .iter()
            .map(|id| self.versions.get(*id))
            .collect::<Result<Vec<_>>>()?;

        let reference = members
            .iter()
            .find(|doc| doc.content_hash == group.canonical_hash)
            .map(|doc| doc.sections.clone());

        Ok(members
            .into_iter()
            .map(|doc| MemberComparison {
                document_id: doc.id,
                content_hash: doc.content_hash,
                matches_canonical: doc.content_hash == group.canonical_hash,
                changes: reference
                    .as_ref()
                    .map(|r| DiffEngine::diff(r, &doc.sections))
                    .unwrap_or_default(),
            })
            .collect())
    }

    /// Compensate an `apply_edit` batch: revert every target that gained a
    /// version back to its previous content, restore the previous canonical
    /// hash and relink diverged members that match it again.
    ///
    /// Itemized like `apply_edit`; a target edited again since the batch
    /// fails with `VersionConflict` and is left alone.
    pub fn rollback(&self, report: &ApplyEditReport, author: &str) -> Result<RollbackReport> {
        let mut results = Vec::new();
        for applied in report.results.iter().filter(|r| r.created_version()) {
            let (Some(previous), Some(new)) = (applied.previous_version, applied.new_version) else {
                continue;
            };
            results.push(self.revert_target(applied.document_id, previous, new, author));
        }

        // Reverts are written from here on: failures below go in the report.
        let mut errors = Vec::new();
        let mut canonical_restored = false;
        let mut rejoined = Vec::new();
        let all_reverted = results.iter().all(|r| r.status == TargetStatus::Applied);
        let group = match self.storage.get_group(report.group_id) {
            Ok(group) => group,
            Err(e) => {
                errors.push(format!("load group: {}", e));
                None
            }
        };

        if let (Some(group), true) = (group, all_reverted) {
            match self
                .storage
                .set_canonical_hash(group.id, report.previous_canonical)
            {
                Ok(_) => canonical_restored = true,
                Err(e) => errors.push(format!("restore canonical hash: {}", e)),
            }

            let relink: Vec<&Divergence> = if canonical_restored {
                report.diverged().collect()
            } else {
                Vec::new()
            };
            for divergence in relink {
                let doc = match self.versions.get(divergence.document_id) {
                    Ok(doc) => doc,
                    Err(e) => {
                        log::warn!("Cannot rejoin {}: {}", divergence.document_id, e);
                        errors.push(format!("rejoin {}: {}", divergence.document_id, e));
                        continue;
                    }
                };
                if doc.shared_group_id.is_some() || doc.content_hash != report.previous_canonical {
                    continue;
                }
                match self.storage.add_member(group.id, doc.id) {
                    Ok(_) => rejoined.push(doc.id),
                    Err(e) => errors.push(format!("rejoin {}: {}", doc.id, e)),
                }
            }
        }

        log::info!(
            "Rolled back edit on group {}: {} reverted, {} rejoined",
            report.group_id,
            results.iter().filter(|r| r.status == TargetStatus::Applied).count(),
            rejoined.len()
        );

        Ok(RollbackReport {
            group_id: report.group_id,
            results,
            rejoined,
            canonical_restored,
            errors,
        })
    }

    fn revert_target(&self, id: DocumentId, previous: u32, new: u32, author: &str) -> TargetResult {
        let doc = match self.versions.get(id) {
            Ok(doc) => doc,
            Err(e) => return TargetResult::failed(id, None, &e),
        };
        if doc.version != new {
            let err = MonographError::VersionConflict {
                document: id,
                expected: new,
                actual: doc.version,
            };
            return TargetResult::failed(id, Some(doc.version), &err);
        }
        match self.versions.revert(&doc, previous, author) {
            Ok(reverted) => TargetResult::applied(id, new, reverted.version),
            Err(e) => TargetResult::failed(id, Some(new), &e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UnchangedSavePolicy;
    use crate::storage::RedbStorage;
    use tempfile::TempDir;

    struct Fixture {
        storage: Arc<RedbStorage>,
        versions: Arc<VersionStore<RedbStorage>>,
        shared: SharedLinkManager<RedbStorage>,
        _dir: TempDir,
    }

    fn setup() -> Fixture {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(RedbStorage::open(dir.path().join("test.redb")).unwrap());
        let versions = Arc::new(VersionStore::new(storage.clone(), UnchangedSavePolicy::Reject));
        Fixture {
            shared: SharedLinkManager::new(storage.clone(), versions.clone()),
            storage,
            versions,
            _dir: dir,
        }
    }

    fn kcl() -> Vec<Section> {
        vec![
            Section::static_text("Potassium Chloride 10 mmol"),
            Section::dynamic("dose(weight)"),
        ]
    }

    fn edited(doc: &Document, text: &str) -> Document {
        let mut next = doc.clone();
        next.sections[0] = Section::static_text(text);
        next
    }

    fn linked_pair(f: &Fixture) -> (Document, Document, SharedGroup) {
        let a = f.versions.create("north", "KCL", kcl(), "importer").unwrap();
        let b = f.versions.create("south", "KCL", kcl(), "importer").unwrap();
        let group = f.shared.link(&[a.id, b.id]).unwrap();
        (
            f.versions.get(a.id).unwrap(),
            f.versions.get(b.id).unwrap(),
            group,
        )
    }

    #[test]
    fn link_requires_equal_hashes() {
        let f = setup();
        let a = f.versions.create("north", "KCL", kcl(), "importer").unwrap();
        let b = f
            .versions
            .create("south", "KCL", vec![Section::static_text("other")], "importer")
            .unwrap();

        let err = f.shared.link(&[a.id, b.id]).unwrap_err();
        assert!(matches!(err, MonographError::HashMismatch { document, .. } if document == b.id));
        assert!(f.versions.get(a.id).unwrap().shared_group_id.is_none());
        assert!(f.shared.list_groups().unwrap().is_empty());
    }

    #[test]
    fn link_sets_membership() {
        let f = setup();
        let (a, b, group) = linked_pair(&f);
        assert_eq!(a.shared_group_id, Some(group.id));
        assert_eq!(b.shared_group_id, Some(group.id));
        assert_eq!(group.canonical_hash, a.content_hash);

        // No move into a second group without unlinking first
        let c = f.versions.create("east", "KCL", kcl(), "importer").unwrap();
        assert!(matches!(
            f.shared.link(&[a.id, c.id]),
            Err(MonographError::AlreadyLinked { .. })
        ));
        let joined = f.shared.join(group.id, c.id).unwrap();
        assert_eq!(joined.member_ids.len(), 3);
    }

    #[test]
    fn link_needs_two_documents() {
        let f = setup();
        let a = f.versions.create("north", "KCL", kcl(), "importer").unwrap();
        assert!(matches!(
            f.shared.link(&[a.id, a.id]),
            Err(MonographError::Validation(_))
        ));
    }

    #[test]
    fn apply_all_moves_every_member() {
        let f = setup();
        let (a, b, group) = linked_pair(&f);

        let report = f
            .shared
            .apply_edit(group.id, &edited(&a, "Potassium Chloride 20 mmol"), &EditStrategy::All, "dose", "alice")
            .unwrap();
        assert!(report.is_complete());
        assert_eq!(report.applied().count(), 2);
        assert_eq!(report.diverged().count(), 0);

        let a2 = f.versions.get(a.id).unwrap();
        let b2 = f.versions.get(b.id).unwrap();
        assert_eq!(a2.version, 2);
        assert_eq!(b2.version, 2);
        assert_eq!(a2.content_hash, b2.content_hash);
        assert_ne!(a2.content_hash, a.content_hash);

        let group = f.shared.get_group(group.id).unwrap();
        assert_eq!(group.canonical_hash, a2.content_hash);
        assert_eq!(group.member_ids.len(), 2);
    }

    #[test]
    fn selected_edit_diverges_the_rest() {
        let f = setup();
        let (a, b, group) = linked_pair(&f);

        let strategy = EditStrategy::Selected(BTreeSet::from([a.id]));
        let report = f
            .shared
            .apply_edit(group.id, &edited(&a, "changed"), &strategy, "dose", "alice")
            .unwrap();

        let b_result = report.results.iter().find(|r| r.document_id == b.id).unwrap();
        assert_eq!(b_result.status, TargetStatus::Skipped);
        let divergence = b_result.divergence.unwrap();
        assert_eq!(divergence.actual, a.content_hash);

        let b2 = f.versions.get(b.id).unwrap();
        assert_eq!(b2.version, 1);
        assert_eq!(b2.content_hash, a.content_hash);
        assert!(b2.shared_group_id.is_none());

        let group = f.shared.get_group(group.id).unwrap();
        assert!(!group.contains(b.id));
        assert!(group.contains(a.id));
        assert_eq!(f.versions.get(a.id).unwrap().version, 2);
    }

    #[test]
    fn excluded_strategy_skips_named_members() {
        let f = setup();
        let (a, b, group) = linked_pair(&f);
        let c = f.versions.create("east", "KCL", kcl(), "importer").unwrap();
        f.shared.join(group.id, c.id).unwrap();

        let strategy = EditStrategy::Excluded(BTreeSet::from([c.id]));
        let report = f
            .shared
            .apply_edit(group.id, &edited(&a, "changed"), &strategy, "edit", "alice")
            .unwrap();
        assert_eq!(report.applied().count(), 2);
        assert_eq!(f.versions.get(b.id).unwrap().version, 2);
        assert_eq!(f.versions.get(c.id).unwrap().version, 1);
        assert_eq!(report.diverged().map(|d| d.document_id).collect::<Vec<_>>(), vec![c.id]);
    }

    #[test]
    fn one_failure_does_not_abort_the_batch() {
        let f = setup();
        let (a, b, group) = linked_pair(&f);

        // The editor's copy is stale: someone saved `a` in the meantime.
        f.versions.save(&edited(&a, "concurrent"), "other", "bob").unwrap();

        let report = f
            .shared
            .apply_edit(group.id, &edited(&a, "mine"), &EditStrategy::All, "edit", "alice")
            .unwrap();
        let a_result = report.results.iter().find(|r| r.document_id == a.id).unwrap();
        assert_eq!(a_result.status, TargetStatus::Failed);
        assert!(a_result.retryable);

        let b_result = report.results.iter().find(|r| r.document_id == b.id).unwrap();
        assert_eq!(b_result.status, TargetStatus::Applied);
        assert_eq!(f.versions.get(b.id).unwrap().sections[0], Section::static_text("mine"));

        // `a` holds bob's content, not the canonical one
        assert!(a_result.divergence.is_some());
        assert!(!report.is_complete());
        assert!(!report.is_total_failure());
    }

    #[test]
    fn selecting_a_non_member_fails_that_target() {
        let f = setup();
        let (a, _b, group) = linked_pair(&f);
        let outsider = f
            .versions
            .create("east", "NACL", vec![Section::static_text("Sodium")], "importer")
            .unwrap();
        let strategy = EditStrategy::Selected(BTreeSet::from([a.id, outsider.id]));
        let report = f
            .shared
            .apply_edit(group.id, &edited(&a, "x"), &strategy, "edit", "alice")
            .unwrap();
        let r = report.results.iter().find(|r| r.document_id == outsider.id).unwrap();
        assert_eq!(r.status, TargetStatus::Failed);
        assert_eq!(f.versions.get(outsider.id).unwrap().version, 1);
    }

    #[test]
    fn reconcile_catches_direct_saves() {
        let f = setup();
        let (a, b, group) = linked_pair(&f);
        f.versions.save(&edited(&b, "independent"), "edit", "bob").unwrap();

        let report = f.shared.reconcile(group.id).unwrap();
        assert_eq!(report.diverged.len(), 1);
        assert_eq!(report.diverged[0].document_id, b.id);
        assert!(report.group_exists);

        let group = f.shared.get_group(group.id).unwrap();
        assert_eq!(group.member_ids, BTreeSet::from([a.id]));
    }

    #[test]
    fn unlinking_last_member_removes_group() {
        let f = setup();
        let (a, b, group) = linked_pair(&f);
        assert!(f.shared.unlink(group.id, a.id).unwrap().is_some());
        assert!(f.shared.unlink(group.id, b.id).unwrap().is_none());
        assert!(matches!(
            f.shared.get_group(group.id),
            Err(MonographError::GroupNotFound(_))
        ));
        assert!(matches!(
            f.shared.unlink(group.id, b.id),
            Err(MonographError::GroupNotFound(_))
        ));
    }

    #[test]
    fn preview_and_compare() {
        let f = setup();
        let (a, b, group) = linked_pair(&f);

        let proposal = edited(&a, "new text").sections;
        let previews = f.shared.preview_edit(group.id, &proposal).unwrap();
        assert_eq!(previews.len(), 2);
        assert!(previews.iter().all(|p| p.changes.len() == 1));

        f.versions.save(&edited(&b, "drifted"), "edit", "bob").unwrap();
        let comparisons = f.shared.compare_members(group.id).unwrap();
        let b_cmp = comparisons.iter().find(|c| c.document_id == b.id).unwrap();
        assert!(!b_cmp.matches_canonical);
        assert_eq!(b_cmp.changes.len(), 1);
    }

    #[test]
    fn rollback_restores_the_group() {
        let f = setup();
        let (a, b, group) = linked_pair(&f);

        let strategy = EditStrategy::Selected(BTreeSet::from([a.id]));
        let report = f
            .shared
            .apply_edit(group.id, &edited(&a, "mistake"), &strategy, "edit", "alice")
            .unwrap();
        assert_eq!(report.diverged().count(), 1);

        let rollback = f.shared.rollback(&report, "alice").unwrap();
        assert!(rollback.canonical_restored);
        assert_eq!(rollback.rejoined, vec![b.id]);

        let a3 = f.versions.get(a.id).unwrap();
        assert_eq!(a3.version, 3);
        assert_eq!(a3.content_hash, a.content_hash);

        let group = f.shared.get_group(group.id).unwrap();
        assert_eq!(group.canonical_hash, a.content_hash);
        assert_eq!(group.member_ids, BTreeSet::from([a.id, b.id]));
    }

    #[test]
    fn rollback_keeps_its_report_when_a_rejoin_fails() {
        let f = setup();
        let (a, b, group) = linked_pair(&f);

        let strategy = EditStrategy::Selected(BTreeSet::from([a.id]));
        let report = f
            .shared
            .apply_edit(group.id, &edited(&a, "mistake"), &strategy, "edit", "alice")
            .unwrap();
        assert_eq!(report.diverged().count(), 1);

        // b was unlinked by the edit, so it can be deleted before the rollback
        f.storage.delete_document(b.id).unwrap();

        let rollback = f.shared.rollback(&report, "alice").unwrap();
        assert_eq!(rollback.results.len(), 1);
        assert_eq!(rollback.results[0].status, TargetStatus::Applied);
        assert!(rollback.canonical_restored);
        assert!(rollback.rejoined.is_empty());
        assert_eq!(rollback.errors.len(), 1);
        assert!(rollback.errors[0].contains(&b.id.to_string()));

        let a3 = f.versions.get(a.id).unwrap();
        assert_eq!(a3.version, 3);
        assert_eq!(a3.content_hash, a.content_hash);
    }

    #[test]
    fn saved_member_propagates_without_a_second_version() {
        let f = setup();
        let (a, b, group) = linked_pair(&f);

        // Save first, then push the saved content to the group
        let saved = f
            .versions
            .save(&edited(&a, "Potassium Chloride 20 mmol"), "edit", "alice")
            .unwrap();
        assert_eq!(saved.version, 2);

        let report = f
            .shared
            .apply_edit(group.id, &saved, &EditStrategy::All, "edit", "alice")
            .unwrap();
        assert!(report.is_complete());
        assert!(report.errors.is_empty());
        assert_eq!(report.diverged().count(), 0);

        let a_result = report.results.iter().find(|r| r.document_id == a.id).unwrap();
        assert_eq!(a_result.status, TargetStatus::Applied);
        assert!(!a_result.created_version());

        let a_now = f.versions.get(a.id).unwrap();
        assert_eq!(a_now.version, 2);
        assert_eq!(f.versions.history(a.id).unwrap().len(), 2);

        let b_now = f.versions.get(b.id).unwrap();
        assert_eq!(b_now.version, 2);
        assert_eq!(b_now.content_hash, saved.content_hash);

        let group = f.shared.get_group(group.id).unwrap();
        assert_eq!(group.canonical_hash, saved.content_hash);
        assert_eq!(group.member_ids, BTreeSet::from([a.id, b.id]));
    }
}
