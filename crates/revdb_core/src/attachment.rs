//! Attachment metadata and staging types.
//!
//! Attachments are stored by content digest. A revision only carries
//! metadata; the bytes live in the store's blob area and may be missing
//! (a *stub*) until replication completes them.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Prefix of every attachment digest.
pub const DIGEST_PREFIX: &str = "sha256-";

/// Computes the digest of attachment bytes.
pub fn attachment_digest(data: &[u8]) -> String {
    format!("{DIGEST_PREFIX}{:x}", Sha256::digest(data))
}

/// Serializes bytes as a standard base64 string.
///
/// Use with `#[serde(with = "revdb_core::base64_bytes")]`.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Encodes `data` as base64.
    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    /// Decodes base64 into bytes.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        use serde::de::Error;
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(D::Error::custom)
    }
}

/// [`base64_bytes`] for optional bytes.
pub mod base64_option {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Encodes present bytes as base64.
    pub fn serialize<S: Serializer>(
        data: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match data {
            Some(data) => serializer.serialize_some(&STANDARD.encode(data)),
            None => serializer.serialize_none(),
        }
    }

    /// Decodes optional base64 into bytes.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        use serde::de::Error;
        Option::<String>::deserialize(deserializer)?
            .map(|encoded| STANDARD.decode(encoded).map_err(D::Error::custom))
            .transpose()
    }
}

/// Metadata of one attachment on a revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMeta {
    /// MIME type.
    pub content_type: String,
    /// Length in bytes.
    pub length: u64,
    /// Content digest (see [`attachment_digest`]); also the storage key.
    pub digest: String,
    /// Generation of the revision that introduced these bytes.
    pub revpos: u64,
}

impl AttachmentMeta {
    /// Builds metadata for the given bytes.
    pub fn for_data(content_type: impl Into<String>, data: &[u8], revpos: u64) -> Self {
        Self {
            content_type: content_type.into(),
            length: data.len() as u64,
            digest: attachment_digest(data),
            revpos,
        }
    }

    /// Checks that `data` matches this metadata.
    pub fn verify(&self, name: &str, data: &[u8]) -> CoreResult<()> {
        if data.len() as u64 != self.length {
            return Err(CoreError::AttachmentMismatch {
                name: name.to_string(),
                reason: format!("expected {} bytes, got {}", self.length, data.len()),
            });
        }
        let digest = attachment_digest(data);
        if digest != self.digest {
            return Err(CoreError::AttachmentMismatch {
                name: name.to_string(),
                reason: format!("expected digest {}, got {digest}", self.digest),
            });
        }
        Ok(())
    }
}

/// Attachment metadata plus optional inline bytes, as delivered by a
/// replication source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentPayload {
    /// Attachment metadata.
    #[serde(flatten)]
    pub meta: AttachmentMeta,
    /// Inline bytes, base64 on the wire; `None` for a stub.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_option"
    )]
    pub data: Option<Vec<u8>>,
}

impl AttachmentPayload {
    /// Creates a stub payload (metadata only).
    pub fn stub(meta: AttachmentMeta) -> Self {
        Self { meta, data: None }
    }

    /// Creates a payload carrying its bytes.
    pub fn inline(meta: AttachmentMeta, data: Vec<u8>) -> Self {
        Self {
            meta,
            data: Some(data),
        }
    }

    /// Returns true if the bytes are not included.
    #[must_use]
    pub fn is_stub(&self) -> bool {
        self.data.is_none()
    }
}

/// Attachment bytes not yet written to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsavedAttachment {
    /// Attachment name.
    pub name: String,
    /// MIME type.
    pub content_type: String,
    /// Bytes.
    pub data: Vec<u8>,
}

impl UnsavedAttachment {
    /// Creates an unsaved attachment.
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            data,
        }
    }
}

/// Attachment bytes staged in the store but not yet associated with a
/// revision.
///
/// Produced by `DocumentStore::prepare_attachment` and consumed by
/// `DocumentStore::add_attachment`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedAttachment {
    /// Attachment name.
    pub name: String,
    /// MIME type.
    pub content_type: String,
    /// Length in bytes.
    pub length: u64,
    /// Digest of the staged bytes.
    pub digest: String,
}
