//! The replication peer.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, HandlerResult, RequestHandler};
use revdb_core::DocumentStore;
use revdb_sync_engine::LoopbackServer;
use revdb_sync_protocol::{decode, encode, paths, ErrorResponse, Reply};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, trace};

/// A replication peer serving one document store.
///
/// Every endpoint is a POST of a JSON request to one of the
/// [`paths`]. Application errors (conflicts, missing revisions, bad
/// histories) are answered inside the reply envelope; only an unknown path
/// or an unencodable reply fails the exchange itself.
///
/// Cloning is cheap and clones share the store.
pub struct PeerServer<D: DocumentStore> {
    handler: Arc<RequestHandler<D>>,
    context: Arc<HandlerContext<D>>,
}

impl<D: DocumentStore> Clone for PeerServer<D> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            context: Arc::clone(&self.context),
        }
    }
}

impl<D: DocumentStore> PeerServer<D> {
    /// Creates a peer over a shared store.
    pub fn new(config: ServerConfig, store: Arc<D>) -> Self {
        let context = Arc::new(HandlerContext::new(config, store));
        let handler = Arc::new(RequestHandler::new(Arc::clone(&context)));

        Self { handler, context }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// Returns the served store.
    pub fn store(&self) -> &Arc<D> {
        self.context.endpoint.store()
    }

    /// Handles one request and returns the encoded reply.
    pub fn handle(&self, path: &str, body: &[u8]) -> ServerResult<Vec<u8>> {
        debug!(
            peer = %self.context.config.identifier,
            path,
            bytes = body.len(),
            "request"
        );
        let handler = &self.handler;
        match path {
            paths::CHANGES => respond(body, |r| handler.handle_changes(r)),
            paths::REVS_DIFF => respond(body, |r| handler.handle_revs_diff(r)),
            paths::BULK_GET => respond(body, |r| handler.handle_bulk_get(r)),
            paths::BULK_DOCS => respond(body, |r| handler.handle_bulk_docs(r)),
            paths::ATTACHMENT => respond(body, |r| handler.handle_attachment(r)),
            paths::ATTACHMENT_PUT => respond(body, |r| handler.handle_attachment_put(r)),
            paths::MISSING_ATTACHMENTS => {
                respond(body, |r| handler.handle_missing_attachments(r))
            }
            paths::LOCAL_GET => respond(body, |r| handler.handle_local_get(r)),
            paths::LOCAL_PUT => respond(body, |r| handler.handle_local_put(r)),
            other => Err(ServerError::UnknownPath(other.to_string())),
        }
    }
}

/// Decodes the request, runs the handler and wraps the outcome in a
/// [`Reply`]. An undecodable request is answered as a bad request.
fn respond<Req, Res>(
    body: &[u8],
    handle: impl FnOnce(Req) -> HandlerResult<Res>,
) -> ServerResult<Vec<u8>>
where
    Req: DeserializeOwned,
    Res: Serialize,
{
    let reply: Reply<Res> = match decode::<Req>(body) {
        Ok(request) => handle(request).into(),
        Err(error) => {
            trace!(error = %error, "undecodable request");
            Reply::Error(ErrorResponse::bad_request(error.to_string()))
        }
    };
    encode(&reply).map_err(|e| ServerError::Internal(e.to_string()))
}

impl<D: DocumentStore> LoopbackServer for PeerServer<D> {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        self.handle(path, body).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revdb_core::MemoryDocumentStore;
    use revdb_sync_protocol::{ChangesRequest, ChangesResponse, ErrorKind};
    use revdb_testkit::prelude::*;

    fn server() -> PeerServer<MemoryDocumentStore> {
        PeerServer::new(ServerConfig::new("peer"), Arc::new(populated_store(3)))
    }

    #[test]
    fn changes_round_trip() {
        let server = server();
        let request = encode(&ChangesRequest::new(None, 10)).unwrap();
        let reply = server.handle(paths::CHANGES, &request).unwrap();

        let response: Reply<ChangesResponse> = decode(&reply).unwrap();
        let response = response.into_result().unwrap();
        assert_eq!(response.results.len(), 3);
        assert_eq!(response.last_seq.unwrap().as_str(), "3");
    }

    #[test]
    fn garbage_is_a_bad_request() {
        let server = server();
        let reply = server.handle(paths::REVS_DIFF, b"[1, 2").unwrap();
        let response: Reply<serde_json::Value> = decode(&reply).unwrap();
        assert_eq!(response.into_result().unwrap_err().kind, ErrorKind::BadRequest);
    }

    #[test]
    fn unknown_path_fails_the_exchange() {
        let server = server();
        let err = server.handle("/_all_dbs", b"{}").unwrap_err();
        assert!(err.is_client_error());
        assert!(server.handle_post("/_all_dbs", b"{}").is_err());
    }

    #[test]
    fn clones_share_the_store() {
        let server = server();
        let clone = server.clone();
        assert!(Arc::ptr_eq(server.store(), clone.store()));
        assert_eq!(clone.config().identifier, "peer");
    }
}
