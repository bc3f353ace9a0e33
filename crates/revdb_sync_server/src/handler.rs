//! Request handlers for replication endpoints.

use crate::config::ServerConfig;
use revdb_core::DocumentStore;
use revdb_sync_engine::{LocalEndpoint, ReplicationSource, ReplicationTarget, SyncError};
use revdb_sync_protocol::{
    AttachmentRequest, AttachmentResponse, AttachmentUpload, AttachmentUploadResponse,
    BulkDocsRequest, BulkDocsResponse, BulkDocsResult, BulkGetRequest, BulkGetResponse,
    ChangesRequest, ChangesResponse, ErrorKind, ErrorResponse, LocalGetRequest,
    LocalGetResponse, LocalPutRequest, LocalPutResponse, MissingAttachmentsRequest,
    MissingAttachmentsResponse, RevsDiffRequest, RevsDiffResponse,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of one handled request, as sent back in the reply envelope.
pub type HandlerResult<T> = Result<T, ErrorResponse>;

/// Context for request handling.
pub struct HandlerContext<D: DocumentStore> {
    /// Server configuration.
    pub config: ServerConfig,
    /// The served store.
    pub endpoint: LocalEndpoint<D>,
}

impl<D: DocumentStore> HandlerContext<D> {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, store: Arc<D>) -> Self {
        Self {
            config,
            endpoint: LocalEndpoint::new(store),
        }
    }
}

/// Converts a replication error into its wire form.
pub fn error_response(error: SyncError) -> ErrorResponse {
    let reason = error.to_string();
    match error {
        SyncError::MalformedHistory { doc_id, reason } => {
            ErrorResponse::new(ErrorKind::MalformedHistory, reason).with_doc_id(doc_id)
        }
        SyncError::AttachmentUnavailable {
            doc_id,
            revision,
            name,
        } => ErrorResponse::new(ErrorKind::AttachmentUnavailable, reason)
            .with_doc_id(doc_id)
            .with_revision(revision)
            .with_name(name),
        SyncError::MissingRevision { doc_id, revision } => {
            ErrorResponse::new(ErrorKind::MissingRevision, reason)
                .with_doc_id(doc_id)
                .with_revision(revision)
        }
        SyncError::Storage(core) => ErrorResponse::from(&core),
        SyncError::Protocol(_) => ErrorResponse::bad_request(reason),
        SyncError::CheckpointConflict { id } => {
            ErrorResponse::new(ErrorKind::Conflict, reason).with_doc_id(id)
        }
        SyncError::Remote(response) => response,
        SyncError::Network { .. }
        | SyncError::Internal(_)
        | SyncError::Cancelled
        | SyncError::InvalidStateTransition { .. } => {
            ErrorResponse::new(ErrorKind::Storage, reason)
        }
    }
}

/// Converts an error raised while working on one document, filling in the
/// document ID where the store could not.
fn document_error(error: SyncError, doc_id: &str) -> ErrorResponse {
    let response = error_response(error);
    match response.doc_id.as_deref() {
        Some(id) if !id.is_empty() => response,
        _ => response.with_doc_id(doc_id),
    }
}

/// Handler for replication requests.
pub struct RequestHandler<D: DocumentStore> {
    context: Arc<HandlerContext<D>>,
}

impl<D: DocumentStore> RequestHandler<D> {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext<D>>) -> Self {
        Self { context }
    }

    fn endpoint(&self) -> &LocalEndpoint<D> {
        &self.context.endpoint
    }

    /// Handles a changes request. The page size is capped by
    /// `max_changes_limit`.
    pub fn handle_changes(&self, request: ChangesRequest) -> HandlerResult<ChangesResponse> {
        let limit = request
            .limit
            .clamp(1, self.context.config.max_changes_limit);
        let request = ChangesRequest::new(request.since, limit);
        self.endpoint().changes(&request).map_err(error_response)
    }

    /// Handles a revision diff.
    pub fn handle_revs_diff(&self, request: RevsDiffRequest) -> HandlerResult<RevsDiffResponse> {
        self.endpoint().revs_diff(&request).map_err(error_response)
    }

    /// Handles a bulk get for one document.
    pub fn handle_bulk_get(&self, request: BulkGetRequest) -> HandlerResult<BulkGetResponse> {
        let docs = self
            .endpoint()
            .fetch_revisions(&request)
            .map_err(|e| document_error(e, &request.id))?;
        Ok(BulkGetResponse { docs })
    }

    /// Handles a bulk insert.
    ///
    /// Only replication inserts (`new_edits: false`) are accepted. Each
    /// document is merged on its own; a rejected document is reported in
    /// its result and does not affect the others.
    pub fn handle_bulk_docs(&self, request: BulkDocsRequest) -> HandlerResult<BulkDocsResponse> {
        if request.new_edits {
            return Err(ErrorResponse::bad_request(
                "only new_edits=false is supported",
            ));
        }

        let results = request
            .docs
            .into_iter()
            .map(|doc| {
                let id = doc.id.clone();
                let rev = doc.rev.clone();
                match self.endpoint().force_insert(doc) {
                    Ok(outcome) => BulkDocsResult {
                        id,
                        rev: outcome.leaf,
                        inserted: outcome.inserted,
                        error: None,
                    },
                    Err(error) => {
                        warn!(
                            peer = %self.context.config.identifier,
                            doc_id = %id,
                            rev = %rev,
                            error = %error,
                            "rejected replicated revision"
                        );
                        BulkDocsResult {
                            error: Some(document_error(error, &id)),
                            id,
                            rev,
                            inserted: Vec::new(),
                        }
                    }
                }
            })
            .collect();
        Ok(BulkDocsResponse { results })
    }

    /// Handles an attachment read.
    pub fn handle_attachment(
        &self,
        request: AttachmentRequest,
    ) -> HandlerResult<AttachmentResponse> {
        self.endpoint()
            .fetch_attachment(&request)
            .map_err(|e| document_error(e, &request.doc_id))
    }

    /// Handles an attachment upload for a revision already merged here.
    pub fn handle_attachment_put(
        &self,
        upload: AttachmentUpload,
    ) -> HandlerResult<AttachmentUploadResponse> {
        let doc_id = upload.doc_id.clone();
        self.endpoint()
            .store_attachment(upload)
            .map_err(|e| document_error(e, &doc_id))
    }

    /// Handles a missing attachments query.
    pub fn handle_missing_attachments(
        &self,
        request: MissingAttachmentsRequest,
    ) -> HandlerResult<MissingAttachmentsResponse> {
        self.endpoint()
            .missing_attachments(&request)
            .map_err(|e| document_error(e, &request.doc_id))
    }

    /// Handles a local document read.
    pub fn handle_local_get(&self, request: LocalGetRequest) -> HandlerResult<LocalGetResponse> {
        let document = self
            .endpoint()
            .get_local_document(&request.id)
            .map_err(error_response)?;
        Ok(LocalGetResponse { document })
    }

    /// Handles a local document write.
    pub fn handle_local_put(&self, request: LocalPutRequest) -> HandlerResult<LocalPutResponse> {
        let id = request.id.clone();
        let document = self
            .endpoint()
            .put_local_document(request)
            .map_err(error_response)?;
        debug!(
            peer = %self.context.config.identifier,
            id = %id,
            revision = %document.revision,
            "local document written"
        );
        Ok(LocalPutResponse { document })
    }
}
