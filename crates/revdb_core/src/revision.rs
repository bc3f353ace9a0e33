//! Revision identifiers and revision records.

use crate::attachment::AttachmentMeta;
use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A document body: an ordered mapping of field name to JSON value.
pub type Body = serde_json::Map<String, serde_json::Value>;

/// Checks that no top-level field of `body` starts with `_`.
///
/// Those names are reserved for the metadata sent alongside a body on the
/// wire.
pub fn check_body(doc_id: &str, body: &Body) -> CoreResult<()> {
    match body.keys().find(|field| field.starts_with('_')) {
        Some(field) => Err(CoreError::ReservedField {
            doc_id: doc_id.to_string(),
            field: field.clone(),
        }),
        None => Ok(()),
    }
}

/// Number of hex characters kept from the SHA-256 of a revision.
const DIGEST_LEN: usize = 32;

/// Identifier of one revision of a document.
///
/// Serialized as `"<generation>-<digest>"`. The derived ordering compares
/// generation first, then the digest string byte by byte, which is the
/// tie-break used to pick a winning leaf.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RevisionId {
    generation: u64,
    digest: String,
}

impl RevisionId {
    /// Creates a revision ID from its parts.
    ///
    /// Returns an error if the generation is zero or the digest is empty
    /// or contains a `-`.
    pub fn new(generation: u64, digest: impl Into<String>) -> CoreResult<Self> {
        let digest = digest.into();
        if generation == 0 || digest.is_empty() || digest.contains('-') {
            return Err(CoreError::InvalidRevisionId {
                value: format!("{generation}-{digest}"),
            });
        }
        Ok(Self { generation, digest })
    }

    /// Parses `"<generation>-<digest>"`.
    pub fn parse(value: &str) -> CoreResult<Self> {
        let invalid = || CoreError::InvalidRevisionId {
            value: value.to_string(),
        };
        let (generation, digest) = value.split_once('-').ok_or_else(invalid)?;
        let generation: u64 = generation.parse().map_err(|_| invalid())?;
        Self::new(generation, digest).map_err(|_| invalid())
    }

    /// Computes the revision ID for new content on top of `parent`.
    ///
    /// The digest covers the parent ID, the deleted flag, the canonical JSON
    /// body and the attachment digests, so identical edits made on different
    /// replicas yield identical IDs.
    pub fn compute(
        parent: Option<&RevisionId>,
        deleted: bool,
        body: &Body,
        attachments: &BTreeMap<String, AttachmentMeta>,
    ) -> CoreResult<Self> {
        let mut hasher = Sha256::new();
        if let Some(parent) = parent {
            hasher.update(parent.to_string().as_bytes());
        }
        hasher.update([0u8, u8::from(deleted)]);
        hasher.update(serde_json::to_vec(body)?);
        for (name, meta) in attachments {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            hasher.update(meta.digest.as_bytes());
        }
        let mut digest = format!("{:x}", hasher.finalize());
        digest.truncate(DIGEST_LEN);

        let generation = match parent {
            Some(parent) => parent.child_generation()?,
            None => 1,
        };
        Ok(Self { generation, digest })
    }

    /// Returns the generation of a revision whose parent is this one.
    ///
    /// Fails with `InvalidRevisionId` if the generation would overflow.
    pub fn child_generation(&self) -> CoreResult<u64> {
        self.generation
            .checked_add(1)
            .ok_or_else(|| CoreError::InvalidRevisionId {
                value: format!("child of {self}"),
            })
    }

    /// Returns the generation (depth in the tree, starting at 1).
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the content digest.
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.generation, self.digest)
    }
}

impl fmt::Debug for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RevisionId({self})")
    }
}

impl FromStr for RevisionId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RevisionId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RevisionId> for String {
    fn from(id: RevisionId) -> Self {
        id.to_string()
    }
}

/// The content of a revision: everything except its position in the tree.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RevisionContent {
    /// Document body. Empty for deletions.
    pub body: Body,
    /// Whether this revision is a deletion (tombstone).
    #[serde(default)]
    pub deleted: bool,
    /// Attachment metadata by name.
    #[serde(default)]
    pub attachments: BTreeMap<String, AttachmentMeta>,
}

impl RevisionContent {
    /// Creates content for a live revision.
    pub fn new(body: Body) -> Self {
        Self {
            body,
            deleted: false,
            attachments: BTreeMap::new(),
        }
    }

    /// Creates content for a deletion.
    pub fn tombstone() -> Self {
        Self {
            body: Body::new(),
            deleted: true,
            attachments: BTreeMap::new(),
        }
    }
}

/// One immutable version of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    /// Document ID, stable across all revisions of the document.
    pub doc_id: String,
    /// This revision's ID.
    pub id: RevisionId,
    /// Parent revision. `None` only for generation 1 (or a truncated
    /// history root whose parent was never received).
    pub parent: Option<RevisionId>,
    /// Whether this revision is a deletion.
    pub deleted: bool,
    /// Body, or `None` for a stub received without content.
    pub body: Option<Body>,
    /// Attachment metadata by name.
    pub attachments: BTreeMap<String, AttachmentMeta>,
}

impl Revision {
    /// Creates a revision with content.
    pub fn new(
        doc_id: impl Into<String>,
        id: RevisionId,
        parent: Option<RevisionId>,
        content: RevisionContent,
    ) -> Self {
        Self {
            doc_id: doc_id.into(),
            id,
            parent,
            deleted: content.deleted,
            body: Some(content.body),
            attachments: content.attachments,
        }
    }

    /// Creates a stub revision: id and parent known, content absent.
    pub fn stub(doc_id: impl Into<String>, id: RevisionId, parent: Option<RevisionId>) -> Self {
        Self {
            doc_id: doc_id.into(),
            id,
            parent,
            deleted: false,
            body: None,
            attachments: BTreeMap::new(),
        }
    }

    /// Returns true if the content of this revision is not stored.
    #[must_use]
    pub fn is_stub(&self) -> bool {
        self.body.is_none()
    }

    /// Returns the generation of this revision.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.id.generation()
    }

    /// Returns the content, if stored.
    #[must_use]
    pub fn content(&self) -> Option<RevisionContent> {
        self.body.as_ref().map(|body| RevisionContent {
            body: body.clone(),
            deleted: self.deleted,
            attachments: self.attachments.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: serde_json::Value) -> Body {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn parse_and_display() {
        let rev = RevisionId::parse("3-abc123").unwrap();
        assert_eq!(rev.generation(), 3);
        assert_eq!(rev.digest(), "abc123");
        assert_eq!(rev.to_string(), "3-abc123");
    }

    #[test]
    fn child_generation_does_not_overflow() {
        let top = RevisionId::new(u64::MAX, "ffff").unwrap();
        assert!(matches!(
            top.child_generation(),
            Err(CoreError::InvalidRevisionId { .. })
        ));
        assert!(RevisionId::compute(Some(&top), false, &Body::new(), &BTreeMap::new()).is_err());
        assert_eq!(RevisionId::parse("7-abc").unwrap().child_generation().unwrap(), 8);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(RevisionId::parse("").is_err());
        assert!(RevisionId::parse("abc").is_err());
        assert!(RevisionId::parse("0-abc").is_err());
        assert!(RevisionId::parse("x-abc").is_err());
        assert!(RevisionId::parse("2-").is_err());
        assert!(RevisionId::parse("2-a-b").is_err());
    }

    #[test]
    fn ordering_is_generation_then_digest() {
        let a = RevisionId::parse("2-bbb").unwrap();
        let b = RevisionId::parse("2-ccc").unwrap();
        let c = RevisionId::parse("10-aaa").unwrap();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn serde_as_string() {
        let rev = RevisionId::parse("1-aaa").unwrap();
        let json = serde_json::to_string(&rev).unwrap();
        assert_eq!(json, "\"1-aaa\"");
        let back: RevisionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rev);
        assert!(serde_json::from_str::<RevisionId>("\"nope\"").is_err());
    }

    #[test]
    fn compute_is_deterministic() {
        let content = body(json!({"name": "alice", "age": 30}));
        let r1 = RevisionId::compute(None, false, &content, &BTreeMap::new()).unwrap();
        let r2 = RevisionId::compute(None, false, &content, &BTreeMap::new()).unwrap();
        assert_eq!(r1, r2);
        assert_eq!(r1.generation(), 1);
        assert_eq!(r1.digest().len(), DIGEST_LEN);

        let child = RevisionId::compute(Some(&r1), false, &content, &BTreeMap::new()).unwrap();
        assert_eq!(child.generation(), 2);
        assert_ne!(child.digest(), r1.digest());

        let deleted = RevisionId::compute(Some(&r1), true, &content, &BTreeMap::new()).unwrap();
        assert_ne!(deleted, child);
    }

    #[test]
    fn stub_has_no_content() {
        let rev = Revision::stub("d1", RevisionId::parse("1-aaa").unwrap(), None);
        assert!(rev.is_stub());
        assert!(rev.content().is_none());
    }
}
