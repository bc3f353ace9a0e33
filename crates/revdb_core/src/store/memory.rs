//! In-memory document store.

use super::{
    ChangeEntry, Changes, DocumentStore, ForceInsert, LocalDocument, LOCAL_PREFIX,
};
use crate::attachment::{
    attachment_digest, AttachmentMeta, PreparedAttachment, UnsavedAttachment,
};
use crate::error::{CoreError, CoreResult};
use crate::revision::{check_body, Body, Revision, RevisionContent, RevisionId};
use crate::tree::{MergeOutcome, RevisionTree};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// Sequence index backing the changes feed.
///
/// Each document appears once, at the sequence of its latest change.
struct ChangeIndex {
    next_sequence: u64,
    by_sequence: BTreeMap<u64, String>,
    by_document: HashMap<String, u64>,
}

impl ChangeIndex {
    fn new() -> Self {
        Self {
            next_sequence: 1,
            by_sequence: BTreeMap::new(),
            by_document: HashMap::new(),
        }
    }

    fn record(&mut self, doc_id: &str) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        if let Some(previous) = self.by_document.insert(doc_id.to_string(), sequence) {
            self.by_sequence.remove(&previous);
        }
        self.by_sequence.insert(sequence, doc_id.to_string());
        sequence
    }

    fn last_sequence(&self) -> u64 {
        self.next_sequence - 1
    }
}

/// A thread-safe, in-memory [`DocumentStore`] with local CRUD.
///
/// Each document's tree sits behind its own mutex, so writes to different
/// documents proceed in parallel while writes to one document are
/// serialized. Attachment bytes are kept by digest, shared between
/// revisions.
///
/// # Example
///
/// ```
/// use revdb_core::MemoryDocumentStore;
/// use serde_json::json;
///
/// let store = MemoryDocumentStore::new();
/// let body = json!({"title": "hello"}).as_object().cloned().unwrap();
/// let rev = store.create_document(Some("note-1"), body).unwrap();
/// assert_eq!(rev.generation(), 1);
/// assert!(store.get_document("note-1").unwrap().is_some());
/// ```
pub struct MemoryDocumentStore {
    identifier: String,
    documents: RwLock<HashMap<String, Arc<Mutex<RevisionTree>>>>,
    changes: Mutex<ChangeIndex>,
    local_documents: RwLock<HashMap<String, LocalDocument>>,
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    staged: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryDocumentStore {
    /// Creates an empty store with a random identifier.
    pub fn new() -> Self {
        Self::with_identifier(format!("memory-{}", Uuid::new_v4().simple()))
    }

    /// Creates an empty store with the given identifier.
    pub fn with_identifier(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            documents: RwLock::new(HashMap::new()),
            changes: Mutex::new(ChangeIndex::new()),
            local_documents: RwLock::new(HashMap::new()),
            blobs: RwLock::new(HashMap::new()),
            staged: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a document.
    ///
    /// A random ID is assigned when `doc_id` is `None`. Re-creating a
    /// document whose winning revision is deleted extends that branch.
    pub fn create_document(&self, doc_id: Option<&str>, body: Body) -> CoreResult<Revision> {
        let doc_id = match doc_id {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().simple().to_string(),
        };
        validate_doc_id(&doc_id)?;
        check_body(&doc_id, &body)?;

        let handle = self.document(&doc_id);
        let mut tree = handle.lock();
        let parent = match tree.winning_leaf() {
            Some(winner) if !winner.deleted => {
                return Err(CoreError::revision_conflict(
                    &doc_id,
                    "document already exists",
                ));
            }
            Some(winner) => Some(winner.id.clone()),
            None => None,
        };
        self.commit_edit(&mut tree, parent, RevisionContent::new(body))
    }

    /// Updates a document. `previous` must be a live leaf.
    pub fn update_document(
        &self,
        doc_id: &str,
        previous: &RevisionId,
        body: Body,
    ) -> CoreResult<Revision> {
        check_body(doc_id, &body)?;
        let handle = self.existing(doc_id)?;
        let mut tree = handle.lock();
        let parent = editable_leaf(&tree, previous)?;
        let content = RevisionContent {
            body,
            deleted: false,
            attachments: parent.attachments.clone(),
        };
        self.commit_edit(&mut tree, Some(previous.clone()), content)
    }

    /// Deletes a document by adding a tombstone on top of `previous`.
    pub fn delete_document(&self, doc_id: &str, previous: &RevisionId) -> CoreResult<Revision> {
        let handle = self.existing(doc_id)?;
        let mut tree = handle.lock();
        editable_leaf(&tree, previous)?;
        self.commit_edit(&mut tree, Some(previous.clone()), RevisionContent::tombstone())
    }

    /// Adds or replaces an attachment, creating a new revision.
    pub fn put_attachment(
        &self,
        doc_id: &str,
        previous: &RevisionId,
        attachment: UnsavedAttachment,
    ) -> CoreResult<Revision> {
        let handle = self.existing(doc_id)?;
        let mut tree = handle.lock();
        let parent = editable_leaf(&tree, previous)?;

        let meta = AttachmentMeta::for_data(
            &attachment.content_type,
            &attachment.data,
            previous.child_generation()?,
        );
        let mut content = parent
            .content()
            .unwrap_or_else(|| RevisionContent::new(Body::new()));
        content.attachments.insert(attachment.name, meta.clone());

        self.blobs
            .write()
            .entry(meta.digest)
            .or_insert(attachment.data);
        self.commit_edit(&mut tree, Some(previous.clone()), content)
    }

    /// Returns the winning revision, or `None` if absent or deleted.
    pub fn get_document(&self, doc_id: &str) -> CoreResult<Option<Revision>> {
        Ok(self
            .get_all_revisions(doc_id)?
            .and_then(|tree| tree.winning_leaf().cloned())
            .filter(|winner| !winner.deleted))
    }

    /// Returns a specific revision.
    pub fn get_revision(&self, doc_id: &str, revision: &RevisionId) -> CoreResult<Option<Revision>> {
        Ok(self
            .get_all_revisions(doc_id)?
            .and_then(|tree| tree.get(revision).cloned()))
    }

    /// Returns the IDs of all documents, sorted. Local documents are not
    /// included.
    pub fn document_ids(&self) -> Vec<String> {
        let handles: Vec<(String, Arc<Mutex<RevisionTree>>)> = self
            .documents
            .read()
            .iter()
            .map(|(id, handle)| (id.clone(), Arc::clone(handle)))
            .collect();
        let mut ids: Vec<String> = handles
            .into_iter()
            .filter(|(_, handle)| !handle.lock().is_empty())
            .map(|(id, _)| id)
            .collect();
        ids.sort();
        ids
    }

    /// Returns the sequence of the latest change.
    pub fn last_sequence(&self) -> u64 {
        self.changes.lock().last_sequence()
    }

    /// Gets or creates the lock for a document.
    fn document(&self, doc_id: &str) -> Arc<Mutex<RevisionTree>> {
        if let Some(handle) = self.documents.read().get(doc_id) {
            return Arc::clone(handle);
        }
        let mut documents = self.documents.write();
        Arc::clone(
            documents
                .entry(doc_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(RevisionTree::new(doc_id)))),
        )
    }

    fn existing(&self, doc_id: &str) -> CoreResult<Arc<Mutex<RevisionTree>>> {
        self.documents
            .read()
            .get(doc_id)
            .map(Arc::clone)
            .ok_or_else(|| CoreError::DocumentNotFound {
                doc_id: doc_id.to_string(),
            })
    }

    /// Adds a locally authored revision. The caller holds the document lock.
    fn commit_edit(
        &self,
        tree: &mut RevisionTree,
        parent: Option<RevisionId>,
        content: RevisionContent,
    ) -> CoreResult<Revision> {
        let id = RevisionId::compute(
            parent.as_ref(),
            content.deleted,
            &content.body,
            &content.attachments,
        )?;
        let revision = Revision::new(tree.doc_id(), id, parent, content);
        tree.insert(revision.clone())?;
        let sequence = self.changes.lock().record(tree.doc_id());
        tracing::debug!(
            doc_id = %revision.doc_id,
            rev = %revision.id,
            sequence,
            "committed local edit"
        );
        Ok(revision)
    }

    fn has_blob(&self, digest: &str) -> bool {
        self.blobs.read().contains_key(digest)
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn get_local_document(&self, id: &str) -> CoreResult<Option<LocalDocument>> {
        validate_local_id(id)?;
        Ok(self.local_documents.read().get(id).cloned())
    }

    fn create_local_document(&self, id: &str, body: Body) -> CoreResult<LocalDocument> {
        validate_local_id(id)?;
        let mut local = self.local_documents.write();
        if local.contains_key(id) {
            return Err(CoreError::revision_conflict(id, "local document already exists"));
        }
        let document = LocalDocument::first(id, body)?;
        local.insert(id.to_string(), document.clone());
        Ok(document)
    }

    fn update_local_document(
        &self,
        id: &str,
        known: &RevisionId,
        body: Body,
    ) -> CoreResult<LocalDocument> {
        validate_local_id(id)?;
        let mut local = self.local_documents.write();
        let current = local.get(id).ok_or_else(|| CoreError::DocumentNotFound {
            doc_id: id.to_string(),
        })?;
        if &current.revision != known {
            return Err(CoreError::revision_conflict(
                id,
                format!("expected {known}, found {}", current.revision),
            ));
        }
        let document = current.next(body)?;
        local.insert(id.to_string(), document.clone());
        Ok(document)
    }

    fn get_all_revisions(&self, doc_id: &str) -> CoreResult<Option<RevisionTree>> {
        let Some(handle) = self.documents.read().get(doc_id).map(Arc::clone) else {
            return Ok(None);
        };
        let tree = handle.lock();
        Ok((!tree.is_empty()).then(|| tree.clone()))
    }

    fn force_insert(&self, insert: ForceInsert) -> CoreResult<MergeOutcome> {
        validate_doc_id(&insert.doc_id)?;
        check_body(&insert.doc_id, &insert.body)?;
        let Some(leaf) = insert.leaf().cloned() else {
            return Err(CoreError::malformed_history(
                &insert.doc_id,
                "empty revision history",
            ));
        };

        for (name, payload) in &insert.attachments {
            if let Some(data) = &payload.data {
                payload.meta.verify(name, data)?;
            }
        }

        let handle = self.document(&insert.doc_id);
        let mut tree = handle.lock();

        // Bytes land before the tree references them; an abandoned merge
        // leaves only unreferenced content-addressed blobs behind.
        {
            let mut blobs = self.blobs.write();
            for payload in insert.attachments.values() {
                if let Some(data) = &payload.data {
                    blobs
                        .entry(payload.meta.digest.clone())
                        .or_insert_with(|| data.clone());
                }
            }
        }

        let mut contents = BTreeMap::new();
        contents.insert(leaf, insert.leaf_content());
        let outcome = tree.merge_history(&insert.history, &contents)?;

        if !outcome.is_noop() {
            let sequence = self.changes.lock().record(&insert.doc_id);
            tracing::trace!(
                doc_id = %insert.doc_id,
                leaf = %outcome.leaf,
                inserted = outcome.inserted.len(),
                sequence,
                "force inserted history"
            );
        }
        Ok(outcome)
    }

    fn prepare_attachment(&self, attachment: UnsavedAttachment) -> CoreResult<PreparedAttachment> {
        let digest = attachment_digest(&attachment.data);
        let prepared = PreparedAttachment {
            name: attachment.name,
            content_type: attachment.content_type,
            length: attachment.data.len() as u64,
            digest: digest.clone(),
        };
        self.staged.lock().insert(digest, attachment.data);
        Ok(prepared)
    }

    fn add_attachment(
        &self,
        prepared: PreparedAttachment,
        doc_id: &str,
        revision: &RevisionId,
    ) -> CoreResult<()> {
        let handle = self.existing(doc_id)?;
        let tree = handle.lock();
        let stored = tree
            .get(revision)
            .ok_or_else(|| CoreError::revision_not_found(doc_id, revision))?;
        let meta = stored
            .attachments
            .get(&prepared.name)
            .ok_or_else(|| CoreError::AttachmentNotFound {
                doc_id: doc_id.to_string(),
                revision: revision.to_string(),
                name: prepared.name.clone(),
            })?;
        if meta.digest != prepared.digest || meta.length != prepared.length {
            return Err(CoreError::AttachmentMismatch {
                name: prepared.name,
                reason: format!("staged {} does not match {}", prepared.digest, meta.digest),
            });
        }

        let staged = self.staged.lock().remove(&prepared.digest);
        match staged {
            Some(data) => {
                self.blobs.write().entry(prepared.digest).or_insert(data);
                Ok(())
            }
            None if self.has_blob(&prepared.digest) => Ok(()),
            None => Err(CoreError::storage(format!(
                "attachment {} was not staged",
                prepared.name
            ))),
        }
    }

    fn incomplete_attachments(
        &self,
        doc_id: &str,
        revision: &RevisionId,
    ) -> CoreResult<Vec<(String, AttachmentMeta)>> {
        let handle = self.existing(doc_id)?;
        let tree = handle.lock();
        let stored = tree
            .get(revision)
            .ok_or_else(|| CoreError::revision_not_found(doc_id, revision))?;
        let blobs = self.blobs.read();
        Ok(stored
            .attachments
            .iter()
            .filter(|(_, meta)| !blobs.contains_key(&meta.digest))
            .map(|(name, meta)| (name.clone(), meta.clone()))
            .collect())
    }

    fn read_attachment(
        &self,
        doc_id: &str,
        revision: &RevisionId,
        name: &str,
    ) -> CoreResult<Vec<u8>> {
        let handle = self.existing(doc_id)?;
        let digest = {
            let tree = handle.lock();
            let stored = tree
                .get(revision)
                .ok_or_else(|| CoreError::revision_not_found(doc_id, revision))?;
            stored
                .attachments
                .get(name)
                .map(|meta| meta.digest.clone())
                .ok_or_else(|| CoreError::AttachmentNotFound {
                    doc_id: doc_id.to_string(),
                    revision: revision.to_string(),
                    name: name.to_string(),
                })?
        };
        self.blobs
            .read()
            .get(&digest)
            .cloned()
            .ok_or_else(|| CoreError::attachment_unavailable(doc_id, revision, name))
    }

    fn changes(&self, since: u64, limit: usize) -> CoreResult<Changes> {
        // Collect under the index lock only; documents are locked afterwards.
        let (rows, has_more) = {
            let index = self.changes.lock();
            let mut range = index.by_sequence.range(since.saturating_add(1)..);
            let rows: Vec<(u64, String)> = range
                .by_ref()
                .take(limit.max(1))
                .map(|(sequence, doc_id)| (*sequence, doc_id.clone()))
                .collect();
            (rows, range.next().is_some())
        };

        let mut entries = Vec::with_capacity(rows.len());
        for (sequence, doc_id) in rows {
            let Some(tree) = self.get_all_revisions(&doc_id)? else {
                continue;
            };
            let leaves = tree.leaves();
            entries.push(ChangeEntry {
                sequence,
                deleted: leaves.first().map_or(false, |winner| winner.deleted),
                leaves: leaves.iter().map(|leaf| leaf.id.clone()).collect(),
                doc_id,
            });
        }

        let last_sequence = entries.last().map_or(since, |entry| entry.sequence);
        Ok(Changes {
            entries,
            last_sequence,
            has_more,
        })
    }
}

fn validate_doc_id(doc_id: &str) -> CoreResult<()> {
    if doc_id.is_empty() || doc_id.starts_with('_') {
        return Err(CoreError::InvalidDocumentId {
            doc_id: doc_id.to_string(),
        });
    }
    Ok(())
}

fn validate_local_id(id: &str) -> CoreResult<()> {
    if id.len() <= LOCAL_PREFIX.len() || !id.starts_with(LOCAL_PREFIX) {
        return Err(CoreError::InvalidDocumentId { doc_id: id.to_string() });
    }
    Ok(())
}

/// Returns the revision `previous` if it is a live leaf that may be edited.
fn editable_leaf<'a>(tree: &'a RevisionTree, previous: &RevisionId) -> CoreResult<&'a Revision> {
    let revision = tree
        .get(previous)
        .ok_or_else(|| CoreError::revision_not_found(tree.doc_id(), previous))?;
    if !tree.children(previous).is_empty() {
        return Err(CoreError::revision_conflict(
            tree.doc_id(),
            format!("{previous} is not a leaf"),
        ));
    }
    if revision.deleted {
        return Err(CoreError::revision_conflict(
            tree.doc_id(),
            format!("{previous} is deleted"),
        ));
    }
    Ok(revision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::AttachmentPayload;
    use serde_json::json;

    fn body(value: serde_json::Value) -> Body {
        value.as_object().cloned().unwrap()
    }

    fn rev(s: &str) -> RevisionId {
        RevisionId::parse(s).unwrap()
    }

    fn insert(doc_id: &str, history: &[&str], value: serde_json::Value) -> ForceInsert {
        ForceInsert {
            doc_id: doc_id.to_string(),
            history: history.iter().map(|r| rev(r)).collect(),
            body: body(value),
            deleted: false,
            attachments: BTreeMap::new(),
        }
    }

    #[test]
    fn crud_lifecycle() {
        let store = MemoryDocumentStore::new();
        let r1 = store
            .create_document(Some("d1"), body(json!({"n": 1})))
            .unwrap();
        let r2 = store
            .update_document("d1", &r1.id, body(json!({"n": 2})))
            .unwrap();
        assert_eq!(r2.generation(), 2);
        assert_eq!(r2.parent.as_ref(), Some(&r1.id));

        // Stale edit is rejected.
        let err = store
            .update_document("d1", &r1.id, body(json!({"n": 3})))
            .unwrap_err();
        assert!(matches!(err, CoreError::RevisionConflict { .. }));

        let r3 = store.delete_document("d1", &r2.id).unwrap();
        assert!(r3.deleted);
        assert!(store.get_document("d1").unwrap().is_none());
        assert!(store.get_revision("d1", &r2.id).unwrap().is_some());

        // Re-creating extends the deleted branch.
        let r4 = store
            .create_document(Some("d1"), body(json!({"n": 4})))
            .unwrap();
        assert_eq!(r4.parent.as_ref(), Some(&r3.id));
        assert_eq!(store.get_document("d1").unwrap().unwrap().id, r4.id);
    }

    #[test]
    fn reserved_fields_are_rejected() {
        let store = MemoryDocumentStore::new();
        let err = store
            .create_document(Some("weird"), body(json!({"_deleted": true, "v": 2})))
            .unwrap_err();
        assert!(matches!(err, CoreError::ReservedField { ref field, .. } if field == "_deleted"));
        assert!(store.get_all_revisions("weird").unwrap().is_none());

        let r1 = store.create_document(Some("d1"), body(json!({"v": 1}))).unwrap();
        let err = store
            .update_document("d1", &r1.id, body(json!({"_rev": "9-zzz"})))
            .unwrap_err();
        assert!(matches!(err, CoreError::ReservedField { .. }));

        let err = store
            .force_insert(insert("d2", &["1-aaa"], json!({"_attachments": {}})))
            .unwrap_err();
        assert!(matches!(err, CoreError::ReservedField { .. }));
        assert!(store.get_all_revisions("d2").unwrap().is_none());

        // Underscores inside nested values are ordinary data.
        store
            .create_document(Some("d3"), body(json!({"meta": {"_id": "x"}})))
            .unwrap();
    }

    #[test]
    fn edits_on_the_last_generation_fail_cleanly() {
        let store = MemoryDocumentStore::new();
        let top = RevisionId::new(u64::MAX, "ffff").unwrap();
        store
            .force_insert(ForceInsert {
                doc_id: "d1".into(),
                history: vec![top.clone()],
                body: body(json!({"v": 1})),
                deleted: false,
                attachments: BTreeMap::new(),
            })
            .unwrap();

        let err = store
            .update_document("d1", &top, body(json!({"v": 2})))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidRevisionId { .. }));
        let err = store
            .put_attachment("d1", &top, UnsavedAttachment::new("a", "text/plain", vec![1]))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidRevisionId { .. }));
        assert_eq!(store.get_document("d1").unwrap().unwrap().id, top);
    }

    #[test]
    fn create_existing_document_conflicts() {
        let store = MemoryDocumentStore::new();
        store.create_document(Some("d1"), Body::new()).unwrap();
        assert!(matches!(
            store.create_document(Some("d1"), Body::new()),
            Err(CoreError::RevisionConflict { .. })
        ));
    }

    #[test]
    fn reserved_ids_are_rejected() {
        let store = MemoryDocumentStore::new();
        assert!(store.create_document(Some(""), Body::new()).is_err());
        assert!(store.create_document(Some("_local/x"), Body::new()).is_err());
        assert!(store.get_local_document("not-local").is_err());
    }

    #[test]
    fn generated_ids_are_unique() {
        let store = MemoryDocumentStore::new();
        let a = store.create_document(None, Body::new()).unwrap();
        let b = store.create_document(None, Body::new()).unwrap();
        assert_ne!(a.doc_id, b.doc_id);
        assert_eq!(store.document_ids().len(), 2);
    }

    #[test]
    fn local_documents_are_hidden() {
        let store = MemoryDocumentStore::new();
        let doc = store
            .create_local_document("_local/cp", body(json!({"lastSequence": "5"})))
            .unwrap();
        assert!(store.document_ids().is_empty());
        assert!(store.changes(0, 10).unwrap().entries.is_empty());

        let updated = store
            .update_local_document("_local/cp", &doc.revision, body(json!({"lastSequence": "9"})))
            .unwrap();
        assert_eq!(updated.revision.generation(), 2);

        // Writing with a stale revision conflicts.
        let err = store
            .update_local_document("_local/cp", &doc.revision, Body::new())
            .unwrap_err();
        assert!(matches!(err, CoreError::RevisionConflict { .. }));
        assert!(store.create_local_document("_local/cp", Body::new()).is_err());
    }

    #[test]
    fn changes_feed_lists_latest_per_document() {
        let store = MemoryDocumentStore::new();
        let a = store.create_document(Some("a"), Body::new()).unwrap();
        store.create_document(Some("b"), Body::new()).unwrap();
        store
            .update_document("a", &a.id, body(json!({"v": 2})))
            .unwrap();

        let changes = store.changes(0, 10).unwrap();
        let ids: Vec<_> = changes.entries.iter().map(|e| e.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(changes.last_sequence, 3);
        assert!(!changes.has_more);

        let page = store.changes(0, 1).unwrap();
        assert_eq!(page.entries.len(), 1);
        assert!(page.has_more);
        let rest = store.changes(page.last_sequence, 10).unwrap();
        assert_eq!(rest.entries.len(), 1);
        assert_eq!(rest.entries[0].doc_id, "a");

        assert!(store.changes(3, 10).unwrap().entries.is_empty());
    }

    #[test]
    fn force_insert_merges_and_records_change() {
        let store = MemoryDocumentStore::new();
        let outcome = store
            .force_insert(insert("d1", &["2-bbb", "1-aaa"], json!({"v": 2})))
            .unwrap();
        assert_eq!(outcome.inserted.len(), 2);
        assert_eq!(store.last_sequence(), 1);

        // Re-inserting is a no-op and does not bump the sequence.
        let outcome = store
            .force_insert(insert("d1", &["2-bbb", "1-aaa"], json!({"v": 2})))
            .unwrap();
        assert!(outcome.is_noop());
        assert_eq!(store.last_sequence(), 1);

        store
            .force_insert(insert("d1", &["2-ccc", "1-aaa"], json!({"v": 3})))
            .unwrap();
        let tree = store.get_all_revisions("d1").unwrap().unwrap();
        assert_eq!(tree.winning_leaf().unwrap().id, rev("2-ccc"));
        assert_eq!(tree.conflicts().len(), 1);
    }

    #[test]
    fn failed_force_insert_leaves_no_document() {
        let store = MemoryDocumentStore::new();
        let err = store
            .force_insert(insert("d1", &["3-ccc", "1-aaa"], json!({})))
            .unwrap_err();
        assert!(matches!(err, CoreError::MalformedHistory { .. }));
        assert!(store.get_all_revisions("d1").unwrap().is_none());
        assert!(store.document_ids().is_empty());
        assert_eq!(store.last_sequence(), 0);
    }

    #[test]
    fn inline_attachments_are_verified_and_stored() {
        let store = MemoryDocumentStore::new();
        let meta = AttachmentMeta::for_data("text/plain", b"hello", 1);

        let mut bad = insert("d1", &["1-aaa"], json!({}));
        bad.attachments.insert(
            "a.txt".into(),
            AttachmentPayload::inline(meta.clone(), b"bye".to_vec()),
        );
        assert!(matches!(
            store.force_insert(bad),
            Err(CoreError::AttachmentMismatch { .. })
        ));

        let mut good = insert("d1", &["1-aaa"], json!({}));
        good.attachments.insert(
            "a.txt".into(),
            AttachmentPayload::inline(meta, b"hello".to_vec()),
        );
        store.force_insert(good).unwrap();
        assert_eq!(
            store.read_attachment("d1", &rev("1-aaa"), "a.txt").unwrap(),
            b"hello".to_vec()
        );
        assert!(store
            .incomplete_attachments("d1", &rev("1-aaa"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn stub_attachment_completes_in_two_phases() {
        let store = MemoryDocumentStore::new();
        let meta = AttachmentMeta::for_data("image/png", b"\x89PNG", 1);
        let mut stub = insert("d1", &["1-aaa"], json!({"title": "pic"}));
        stub.attachments
            .insert("pic.png".into(), AttachmentPayload::stub(meta));
        store.force_insert(stub).unwrap();

        // Body readable, bytes not.
        assert!(store.get_document("d1").unwrap().is_some());
        assert!(matches!(
            store.read_attachment("d1", &rev("1-aaa"), "pic.png"),
            Err(CoreError::AttachmentUnavailable { .. })
        ));
        assert_eq!(
            store.incomplete_attachments("d1", &rev("1-aaa")).unwrap().len(),
            1
        );

        let prepared = store
            .prepare_attachment(UnsavedAttachment::new(
                "pic.png",
                "image/png",
                b"\x89PNG".to_vec(),
            ))
            .unwrap();
        // Staged bytes are not visible until associated.
        assert!(store.read_attachment("d1", &rev("1-aaa"), "pic.png").is_err());

        store
            .add_attachment(prepared, "d1", &rev("1-aaa"))
            .unwrap();
        assert_eq!(
            store.read_attachment("d1", &rev("1-aaa"), "pic.png").unwrap(),
            b"\x89PNG".to_vec()
        );
    }

    #[test]
    fn add_attachment_rejects_wrong_bytes() {
        let store = MemoryDocumentStore::new();
        let meta = AttachmentMeta::for_data("text/plain", b"right", 1);
        let mut stub = insert("d1", &["1-aaa"], json!({}));
        stub.attachments.insert("a".into(), AttachmentPayload::stub(meta));
        store.force_insert(stub).unwrap();

        let prepared = store
            .prepare_attachment(UnsavedAttachment::new("a", "text/plain", b"wrong".to_vec()))
            .unwrap();
        assert!(matches!(
            store.add_attachment(prepared, "d1", &rev("1-aaa")),
            Err(CoreError::AttachmentMismatch { .. })
        ));
    }

    #[test]
    fn put_attachment_creates_revision() {
        let store = MemoryDocumentStore::new();
        let r1 = store.create_document(Some("d1"), Body::new()).unwrap();
        let r2 = store
            .put_attachment(
                "d1",
                &r1.id,
                UnsavedAttachment::new("notes.txt", "text/plain", b"abc".to_vec()),
            )
            .unwrap();
        assert_eq!(r2.attachments["notes.txt"].revpos, 2);
        assert_eq!(
            store.read_attachment("d1", &r2.id, "notes.txt").unwrap(),
            b"abc".to_vec()
        );

        // Later edits keep the attachment.
        let r3 = store
            .update_document("d1", &r2.id, body(json!({"x": 1})))
            .unwrap();
        assert!(r3.attachments.contains_key("notes.txt"));
    }

    #[test]
    fn concurrent_force_inserts_do_not_interfere() {
        let store = MemoryDocumentStore::new();
        std::thread::scope(|scope| {
            for worker in 0..8u32 {
                let store = &store;
                scope.spawn(move || {
                    for n in 0..20u32 {
                        let doc_id = format!("doc-{}", n % 5);
                        let digest = format!("w{worker}n{n}");
                        let insert = ForceInsert {
                            doc_id,
                            history: vec![
                                RevisionId::new(2, digest).unwrap(),
                                rev("1-root"),
                            ],
                            body: Body::new(),
                            deleted: false,
                            attachments: BTreeMap::new(),
                        };
                        store.force_insert(insert).unwrap();
                    }
                });
            }
        });

        let mut total_leaves = 0;
        for doc_id in store.document_ids() {
            let tree = store.get_all_revisions(&doc_id).unwrap().unwrap();
            assert_eq!(tree.roots(), vec![&rev("1-root")]);
            total_leaves += tree.leaves().len();
        }
        assert_eq!(total_leaves, 8 * 20);
    }
}
