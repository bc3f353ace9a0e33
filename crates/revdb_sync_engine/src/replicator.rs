//! Replication sessions and their state machine.
//!
//! ```text
//! Pending ──start/run──▶ Started ──▶ Complete
//!    │                      ├──────▶ Error
//!    └──────stop──────────▶ └──────▶ Stopped
//! ```
//!
//! A session loads the checkpoint, then repeatedly reads a batch of
//! changes from the source, diffs it against the target, transfers the
//! missing revisions on the worker pool and saves the batch's last
//! sequence as the new checkpoint. The checkpoint only moves after every
//! job of its batch has finished.

use crate::checkpoint::CheckpointManager;
use crate::config::ReplicationConfig;
use crate::differ::RevisionDiffer;
use crate::endpoint::{ReplicationSource, ReplicationTarget};
use crate::error::{SyncError, SyncResult};
use crate::fetcher::{BulkFetcher, DocumentTransfer};
use crate::pool::WorkerPool;
use parking_lot::RwLock;
use revdb_core::RevisionId;
use revdb_sync_protocol::{ChangesRequest, SequenceToken};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Lifecycle state of a replication session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationState {
    /// Created, not yet started.
    Pending,
    /// Running.
    Started,
    /// Finished: the source reported no more changes.
    Complete,
    /// Aborted by a session-fatal error.
    Error,
    /// Stopped on request.
    Stopped,
}

impl ReplicationState {
    /// Returns true if the session can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReplicationState::Complete | ReplicationState::Error | ReplicationState::Stopped
        )
    }

    /// Returns the state name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicationState::Pending => "pending",
            ReplicationState::Started => "started",
            ReplicationState::Complete => "complete",
            ReplicationState::Error => "error",
            ReplicationState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ReplicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A document that could not be replicated.
///
/// The failure does not hold back the checkpoint; the document is retried
/// only if it changes again on the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFailure {
    /// Document ID.
    pub doc_id: String,
    /// Revisions that were being transferred.
    pub revisions: Vec<RevisionId>,
    /// Error description.
    pub error: String,
}

/// Statistics of a replication session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicationReport {
    /// Replicator ID keying the checkpoint.
    pub replicator_id: String,
    /// Batches whose checkpoint was saved.
    pub batches: u64,
    /// Documents listed by the changes feed.
    pub documents_checked: u64,
    /// Revisions added to the target (including stubs).
    pub revisions_inserted: u64,
    /// Attachments fetched separately from their revision.
    pub attachments_fetched: u64,
    /// Documents that failed.
    pub failures: Vec<DocumentFailure>,
    /// Last checkpointed sequence.
    pub last_sequence: Option<SequenceToken>,
    /// Wall-clock duration of the session.
    pub duration: Duration,
}

/// Progress notifications of a replication session.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicationEvent {
    /// The session started from the given checkpoint.
    Started {
        /// Replicator ID.
        replicator_id: String,
        /// Position replication resumes from.
        since: Option<SequenceToken>,
    },
    /// A batch was merged and checkpointed.
    BatchCompleted {
        /// The new checkpoint.
        last_sequence: SequenceToken,
        /// Documents in the batch.
        documents: usize,
        /// Revisions inserted by the batch.
        revisions_inserted: usize,
    },
    /// One document could not be replicated.
    DocumentFailed(DocumentFailure),
    /// The session completed.
    Completed(ReplicationReport),
    /// The session was stopped.
    Stopped,
    /// The session failed.
    Failed {
        /// Error description.
        error: String,
    },
}

struct Session<S, T> {
    source: Arc<S>,
    target: Arc<T>,
    config: ReplicationConfig,
    replicator_id: String,
    state: RwLock<ReplicationState>,
    last_error: RwLock<Option<String>>,
    report: RwLock<ReplicationReport>,
    stop_requested: AtomicBool,
    subscribers: RwLock<Vec<Sender<ReplicationEvent>>>,
}

/// Replicates from a source endpoint into a target endpoint.
///
/// A `Replicator` drives exactly one session. Cloning yields another handle
/// to the same session.
///
/// # Example
///
/// ```
/// use revdb_core::MemoryDocumentStore;
/// use revdb_sync_engine::{LocalEndpoint, ReplicationConfig, ReplicationState, Replicator};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let a = Arc::new(MemoryDocumentStore::with_identifier("a"));
/// let b = Arc::new(MemoryDocumentStore::with_identifier("b"));
/// a.create_document(Some("d1"), json!({"v": 1}).as_object().cloned().unwrap()).unwrap();
///
/// let replicator = Replicator::new(
///     LocalEndpoint::new(a),
///     LocalEndpoint::new(Arc::clone(&b)),
///     ReplicationConfig::default(),
/// );
/// replicator.run().unwrap();
/// assert_eq!(replicator.state(), ReplicationState::Complete);
/// assert!(b.get_document("d1").unwrap().is_some());
/// ```
pub struct Replicator<S: ReplicationSource, T: ReplicationTarget> {
    session: Arc<Session<S, T>>,
}

impl<S: ReplicationSource, T: ReplicationTarget> Clone for Replicator<S, T> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
        }
    }
}

impl<S: ReplicationSource, T: ReplicationTarget> Replicator<S, T> {
    /// Creates a pending session.
    pub fn new(source: S, target: T, config: ReplicationConfig) -> Self {
        let replicator_id = config
            .replicator_id
            .clone()
            .unwrap_or_else(|| derive_replicator_id(source.identifier(), target.identifier()));
        let report = ReplicationReport {
            replicator_id: replicator_id.clone(),
            ..ReplicationReport::default()
        };
        Self {
            session: Arc::new(Session {
                source: Arc::new(source),
                target: Arc::new(target),
                config,
                replicator_id,
                state: RwLock::new(ReplicationState::Pending),
                last_error: RwLock::new(None),
                report: RwLock::new(report),
                stop_requested: AtomicBool::new(false),
                subscribers: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Returns the replicator ID.
    pub fn replicator_id(&self) -> &str {
        &self.session.replicator_id
    }

    /// Returns the source endpoint.
    pub fn source(&self) -> &S {
        &self.session.source
    }

    /// Returns the target endpoint.
    pub fn target(&self) -> &T {
        &self.session.target
    }

    /// Gets the current state.
    pub fn state(&self) -> ReplicationState {
        *self.session.state.read()
    }

    /// Returns the error that ended the session, if it failed.
    pub fn last_error(&self) -> Option<String> {
        self.session.last_error.read().clone()
    }

    /// Returns the statistics so far.
    pub fn report(&self) -> ReplicationReport {
        self.session.report.read().clone()
    }

    /// Subscribes to session events.
    pub fn subscribe(&self) -> Receiver<ReplicationEvent> {
        let (tx, rx) = mpsc::channel();
        self.session.subscribers.write().push(tx);
        rx
    }

    /// Requests the session to stop.
    ///
    /// A pending session moves to `Stopped` immediately. A running session
    /// finishes its in-flight documents, does not checkpoint the
    /// interrupted batch and then moves to `Stopped`. Stopping a finished
    /// session does nothing.
    pub fn stop(&self) {
        let mut state = self.session.state.write();
        match *state {
            ReplicationState::Pending => {
                *state = ReplicationState::Stopped;
                drop(state);
                tracing::info!(
                    replicator_id = %self.session.replicator_id,
                    "replication stopped before start"
                );
                self.emit(ReplicationEvent::Stopped);
            }
            ReplicationState::Started => {
                self.session.stop_requested.store(true, Ordering::SeqCst);
            }
            _ => {}
        }
    }

    /// Runs the session on the calling thread until it finishes.
    pub fn run(&self) -> SyncResult<ReplicationReport> {
        self.begin()?;
        self.drive()
    }

    /// Runs the session on a background thread.
    pub fn start(&self) -> SyncResult<ReplicationHandle<S, T>>
    where
        S: 'static,
        T: 'static,
    {
        self.begin()?;
        let replicator = self.clone();
        let thread = thread::Builder::new()
            .name(format!("replicator-{}", self.session.replicator_id))
            .spawn(move || replicator.drive())
            .map_err(|e| {
                let error = SyncError::Internal(format!("failed to spawn replication thread: {e}"));
                self.finish_with_error(&error);
                error
            })?;
        Ok(ReplicationHandle {
            replicator: self.clone(),
            thread,
        })
    }

    /// Moves `Pending` to `Started`.
    fn begin(&self) -> SyncResult<()> {
        let mut state = self.session.state.write();
        if *state != ReplicationState::Pending {
            return Err(SyncError::InvalidStateTransition {
                from: state.to_string(),
                to: ReplicationState::Started.to_string(),
            });
        }
        *state = ReplicationState::Started;
        Ok(())
    }

    /// Executes the started session and records how it ended.
    fn drive(&self) -> SyncResult<ReplicationReport> {
        let started = Instant::now();
        let result = self.execute();
        self.session.report.write().duration = started.elapsed();

        match result {
            Ok(()) => {
                self.set_state(ReplicationState::Complete);
                let report = self.report();
                tracing::info!(
                    replicator_id = %self.session.replicator_id,
                    batches = report.batches,
                    revisions = report.revisions_inserted,
                    failures = report.failures.len(),
                    "replication complete"
                );
                self.emit(ReplicationEvent::Completed(report.clone()));
                Ok(report)
            }
            Err(SyncError::Cancelled) => {
                self.set_state(ReplicationState::Stopped);
                tracing::info!(replicator_id = %self.session.replicator_id, "replication stopped");
                self.emit(ReplicationEvent::Stopped);
                Err(SyncError::Cancelled)
            }
            Err(error) => {
                self.finish_with_error(&error);
                Err(error)
            }
        }
    }

    fn finish_with_error(&self, error: &SyncError) {
        self.set_state(ReplicationState::Error);
        *self.session.last_error.write() = Some(error.to_string());
        tracing::warn!(
            replicator_id = %self.session.replicator_id,
            error = %error,
            "replication failed"
        );
        self.emit(ReplicationEvent::Failed {
            error: error.to_string(),
        });
    }

    /// The batch loop.
    fn execute(&self) -> SyncResult<()> {
        let session = &*self.session;
        let checkpoints = CheckpointManager::new(&*session.target, &session.replicator_id);
        let mut since = checkpoints.get()?;
        session.report.write().last_sequence = since.clone();

        tracing::info!(
            replicator_id = %session.replicator_id,
            source = session.source.identifier(),
            target = session.target.identifier(),
            since = ?since.as_ref().map(SequenceToken::as_str),
            "replication started"
        );
        self.emit(ReplicationEvent::Started {
            replicator_id: session.replicator_id.clone(),
            since: since.clone(),
        });

        loop {
            self.check_cancelled()?;

            let changes = session.source.changes(&ChangesRequest::new(
                since.clone(),
                session.config.changes_batch_size,
            ))?;
            if changes.results.is_empty() {
                break;
            }
            let last_sequence = changes.last_seq.clone().ok_or_else(|| {
                SyncError::Protocol("changes response has rows but no last_seq".into())
            })?;

            let candidates = changes.leaves_by_document();
            let missing = RevisionDiffer::new(&*session.target, session.config.diff_batch_size)
                .diff(&candidates)?;
            let jobs: Vec<(String, Vec<RevisionId>)> = missing
                .into_iter()
                .filter(|(_, revisions)| !revisions.is_empty())
                .collect();

            let inserted = self.transfer_batch(&jobs)?;

            checkpoints.put(&last_sequence)?;
            {
                let mut report = session.report.write();
                report.batches += 1;
                report.documents_checked += candidates.len() as u64;
                report.last_sequence = Some(last_sequence.clone());
            }
            tracing::debug!(
                replicator_id = %session.replicator_id,
                sequence = %last_sequence,
                documents = candidates.len(),
                transferred = jobs.len(),
                revisions = inserted,
                "batch checkpointed"
            );
            self.emit(ReplicationEvent::BatchCompleted {
                last_sequence: last_sequence.clone(),
                documents: candidates.len(),
                revisions_inserted: inserted,
            });

            since = Some(last_sequence);
            if !changes.has_more {
                break;
            }
        }
        Ok(())
    }

    /// Transfers every document of a batch on the worker pool.
    ///
    /// Returns the number of revisions inserted. Fails if any job hit a
    /// session-fatal error or if the batch was cut short by a stop request.
    fn transfer_batch(&self, jobs: &[(String, Vec<RevisionId>)]) -> SyncResult<usize> {
        let session = &*self.session;
        let fetcher = BulkFetcher::new(
            &*session.source,
            &*session.target,
            session.config.pull_attachments_inline,
        );
        let fatal = AtomicBool::new(false);
        let pool = WorkerPool::new(session.config.worker_count);

        let results = pool.run(
            jobs,
            || fatal.load(Ordering::SeqCst) || session.stop_requested.load(Ordering::SeqCst),
            |(doc_id, revisions)| {
                let result = fetcher.transfer(doc_id, revisions);
                if matches!(&result, Err(error) if !error.is_document_scoped()) {
                    fatal.store(true, Ordering::SeqCst);
                }
                result
            },
        );

        let mut inserted = 0;
        let mut first_fatal = None;
        let mut interrupted = false;
        for ((doc_id, revisions), result) in jobs.iter().zip(results) {
            match result {
                Some(Ok(DocumentTransfer {
                    revisions_inserted,
                    attachments_fetched,
                })) => {
                    inserted += revisions_inserted;
                    let mut report = session.report.write();
                    report.revisions_inserted += revisions_inserted as u64;
                    report.attachments_fetched += attachments_fetched as u64;
                }
                Some(Err(error)) if error.is_document_scoped() => {
                    self.record_failure(DocumentFailure {
                        doc_id: doc_id.clone(),
                        revisions: revisions.clone(),
                        error: error.to_string(),
                    });
                }
                Some(Err(error)) => {
                    if first_fatal.is_none() {
                        first_fatal = Some(error);
                    }
                }
                None => interrupted = true,
            }
        }

        if let Some(error) = first_fatal {
            return Err(error);
        }
        if interrupted {
            return Err(SyncError::Cancelled);
        }
        Ok(inserted)
    }

    fn record_failure(&self, failure: DocumentFailure) {
        tracing::warn!(
            replicator_id = %self.session.replicator_id,
            doc_id = %failure.doc_id,
            error = %failure.error,
            "document failed to replicate"
        );
        self.session.report.write().failures.push(failure.clone());
        self.emit(ReplicationEvent::DocumentFailed(failure));
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.session.stop_requested.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: ReplicationState) {
        *self.session.state.write() = state;
    }

    fn emit(&self, event: ReplicationEvent) {
        let mut subscribers = self.session.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// A session running on a background thread.
pub struct ReplicationHandle<S: ReplicationSource, T: ReplicationTarget> {
    replicator: Replicator<S, T>,
    thread: JoinHandle<SyncResult<ReplicationReport>>,
}

impl<S: ReplicationSource, T: ReplicationTarget> ReplicationHandle<S, T> {
    /// Requests the session to stop.
    pub fn stop(&self) {
        self.replicator.stop();
    }

    /// Gets the current state.
    pub fn state(&self) -> ReplicationState {
        self.replicator.state()
    }

    /// Returns the replicator driving the session.
    pub fn replicator(&self) -> &Replicator<S, T> {
        &self.replicator
    }

    /// Waits for the session to finish.
    pub fn wait(self) -> SyncResult<ReplicationReport> {
        match self.thread.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

/// Derives a stable replicator ID from the two endpoint identifiers.
pub fn derive_replicator_id(source: &str, target: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(b"\n");
    hasher.update(target.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::LocalEndpoint;
    use revdb_core::{Body, MemoryDocumentStore};
    use serde_json::json;

    type LocalReplicator =
        Replicator<LocalEndpoint<MemoryDocumentStore>, LocalEndpoint<MemoryDocumentStore>>;

    fn body(value: serde_json::Value) -> Body {
        value.as_object().cloned().unwrap()
    }

    fn local_pair(
        config: ReplicationConfig,
    ) -> (LocalReplicator, Arc<MemoryDocumentStore>, Arc<MemoryDocumentStore>) {
        let a = Arc::new(MemoryDocumentStore::with_identifier("a"));
        let b = Arc::new(MemoryDocumentStore::with_identifier("b"));
        let replicator = Replicator::new(
            LocalEndpoint::new(Arc::clone(&a)),
            LocalEndpoint::new(Arc::clone(&b)),
            config,
        );
        (replicator, a, b)
    }

    #[test]
    fn replicator_id_is_derived_and_stable() {
        assert_eq!(derive_replicator_id("a", "b"), derive_replicator_id("a", "b"));
        assert_ne!(derive_replicator_id("a", "b"), derive_replicator_id("b", "a"));

        let (replicator, _, _) = local_pair(ReplicationConfig::default());
        assert_eq!(replicator.replicator_id(), derive_replicator_id("a", "b"));

        let (named, _, _) = local_pair(ReplicationConfig::new().with_replicator_id("nightly"));
        assert_eq!(named.replicator_id(), "nightly");
    }

    #[test]
    fn run_copies_documents_and_completes() {
        let (replicator, a, b) = local_pair(ReplicationConfig::new().with_changes_batch_size(2));
        for n in 0..5 {
            a.create_document(Some(&format!("d{n}")), body(json!({"n": n})))
                .unwrap();
        }
        let events = replicator.subscribe();

        let report = replicator.run().unwrap();
        assert_eq!(replicator.state(), ReplicationState::Complete);
        assert_eq!(report.batches, 3);
        assert_eq!(report.documents_checked, 5);
        assert_eq!(report.revisions_inserted, 5);
        assert_eq!(b.document_ids().len(), 5);

        let events: Vec<ReplicationEvent> = events.try_iter().collect();
        assert!(matches!(events.first(), Some(ReplicationEvent::Started { since: None, .. })));
        assert!(matches!(events.last(), Some(ReplicationEvent::Completed(_))));
        let batches = events
            .iter()
            .filter(|event| matches!(event, ReplicationEvent::BatchCompleted { .. }))
            .count();
        assert_eq!(batches, 3);
    }

    #[test]
    fn terminal_states_are_final() {
        let (replicator, _, _) = local_pair(ReplicationConfig::default());
        replicator.run().unwrap();
        assert!(matches!(
            replicator.run(),
            Err(SyncError::InvalidStateTransition { .. })
        ));
        replicator.stop();
        assert_eq!(replicator.state(), ReplicationState::Complete);
    }

    #[test]
    fn stop_before_start() {
        let (replicator, _, _) = local_pair(ReplicationConfig::default());
        let events = replicator.subscribe();
        replicator.stop();
        assert_eq!(replicator.state(), ReplicationState::Stopped);
        assert!(replicator.start().is_err());
        assert_eq!(events.try_recv().unwrap(), ReplicationEvent::Stopped);
    }

    #[test]
    fn start_runs_in_background() {
        let (replicator, a, b) = local_pair(ReplicationConfig::default());
        a.create_document(Some("d1"), body(json!({"v": 1}))).unwrap();

        let handle = replicator.start().unwrap();
        let report = handle.wait().unwrap();
        assert_eq!(report.revisions_inserted, 1);
        assert_eq!(replicator.state(), ReplicationState::Complete);
        assert!(b.get_document("d1").unwrap().is_some());
    }

    #[test]
    fn empty_source_completes_without_checkpoint() {
        let (replicator, _, b) = local_pair(ReplicationConfig::default());
        let report = replicator.run().unwrap();
        assert_eq!(report.batches, 0);
        assert!(report.last_sequence.is_none());
        let checkpoint = format!("_local/{}", replicator.replicator_id());
        assert!(revdb_core::DocumentStore::get_local_document(&*b, &checkpoint)
            .unwrap()
            .is_none());
    }
}
