//! HTTP-shaped remote endpoint.
//!
//! The actual HTTP client is abstracted via [`HttpClient`] so any HTTP
//! library (or a loopback into an in-process peer) can carry the JSON
//! messages.

use crate::endpoint::{ReplicationSource, ReplicationTarget};
use crate::error::{SyncError, SyncResult};
use revdb_core::{LocalDocument, MergeOutcome};
use revdb_sync_protocol::{
    decode, encode, paths, AttachmentRequest, AttachmentResponse, AttachmentUpload,
    AttachmentUploadResponse, BulkDocsRequest, BulkDocsResponse, BulkGetRequest,
    BulkGetResponse, ChangesRequest, ChangesResponse, DocumentRevs, LocalGetRequest,
    LocalGetResponse, LocalPutRequest, LocalPutResponse, MissingAttachmentsRequest,
    MissingAttachmentsResponse, Reply, RevsDiffRequest, RevsDiffResponse,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response body.
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// A remote peer reached over HTTP.
///
/// Serves as either side of a replication: as source for pull, as target
/// for push.
pub struct RemoteEndpoint<C: HttpClient> {
    /// Base URL of the peer (e.g., "https://couch.example.com/notes").
    base_url: String,
    client: C,
}

impl<C: HttpClient> RemoteEndpoint<C> {
    /// Creates a remote endpoint.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post<Req, Res>(&self, path: &str, request: &Req) -> SyncResult<Res>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        if !self.client.is_healthy() {
            return Err(SyncError::network_retryable(format!(
                "peer {} is unavailable",
                self.base_url
            )));
        }

        let body = encode(request)
            .map_err(|e| SyncError::Protocol(format!("failed to encode request: {e}")))?;

        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url, body)
            .map_err(SyncError::network_retryable)?;

        let reply: Reply<Res> = decode(&response)
            .map_err(|e| SyncError::Protocol(format!("failed to decode response: {e}")))?;
        reply.into_result().map_err(SyncError::from)
    }
}

impl<C: HttpClient> ReplicationSource for RemoteEndpoint<C> {
    fn identifier(&self) -> &str {
        &self.base_url
    }

    fn changes(&self, request: &ChangesRequest) -> SyncResult<ChangesResponse> {
        self.post(paths::CHANGES, request)
    }

    fn fetch_revisions(&self, request: &BulkGetRequest) -> SyncResult<Vec<DocumentRevs>> {
        let response: BulkGetResponse = self.post(paths::BULK_GET, request)?;
        Ok(response.docs)
    }

    fn fetch_attachment(&self, request: &AttachmentRequest) -> SyncResult<AttachmentResponse> {
        self.post(paths::ATTACHMENT, request)
    }
}

impl<C: HttpClient> ReplicationTarget for RemoteEndpoint<C> {
    fn identifier(&self) -> &str {
        &self.base_url
    }

    fn revs_diff(&self, request: &RevsDiffRequest) -> SyncResult<RevsDiffResponse> {
        self.post(paths::REVS_DIFF, request)
    }

    fn force_insert(&self, revision: DocumentRevs) -> SyncResult<MergeOutcome> {
        let response: BulkDocsResponse =
            self.post(paths::BULK_DOCS, &BulkDocsRequest::replicate(vec![revision]))?;
        let result = response
            .results
            .into_iter()
            .next()
            .ok_or_else(|| SyncError::Protocol("empty bulk docs response".into()))?;
        match result.error {
            Some(error) => Err(SyncError::from(error)),
            None => Ok(MergeOutcome {
                inserted: result.inserted,
                leaf: result.rev,
            }),
        }
    }

    fn missing_attachments(
        &self,
        request: &MissingAttachmentsRequest,
    ) -> SyncResult<MissingAttachmentsResponse> {
        self.post(paths::MISSING_ATTACHMENTS, request)
    }

    fn store_attachment(&self, upload: AttachmentUpload) -> SyncResult<AttachmentUploadResponse> {
        self.post(paths::ATTACHMENT_PUT, &upload)
    }

    fn get_local_document(&self, id: &str) -> SyncResult<Option<LocalDocument>> {
        let response: LocalGetResponse = self.post(
            paths::LOCAL_GET,
            &LocalGetRequest { id: id.to_string() },
        )?;
        Ok(response.document)
    }

    fn put_local_document(&self, request: LocalPutRequest) -> SyncResult<LocalDocument> {
        let response: LocalPutResponse = self.post(paths::LOCAL_PUT, &request)?;
        Ok(response.document)
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer {
    /// Handles a POST request and returns the response body.
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}

/// A loopback HTTP client that routes requests directly to an in-process
/// peer.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// Returns the server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String> {
        // Endpoint paths all start with "/_".
        let path = url.find("/_").map(|i| &url[i..]).unwrap_or(url);
        self.server.handle_post(path, &body)
    }

    fn is_healthy(&self) -> bool {
        true
    }
}
