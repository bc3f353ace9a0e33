//! Configuration for replication sessions.

/// Configuration for a replication session.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Replicator ID keying the checkpoint. Derived from the endpoint
    /// identifiers when `None`.
    pub replicator_id: Option<String>,
    /// Maximum changes requested from the source per batch.
    pub changes_batch_size: u32,
    /// Maximum documents per revs-diff request.
    pub diff_batch_size: usize,
    /// Number of worker threads fetching and inserting documents.
    pub worker_count: usize,
    /// Whether attachment bytes travel inline with revisions.
    pub pull_attachments_inline: bool,
}

impl ReplicationConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self {
            replicator_id: None,
            changes_batch_size: 500,
            diff_batch_size: 100,
            worker_count: 4,
            pull_attachments_inline: false,
        }
    }

    /// Sets an explicit replicator ID.
    pub fn with_replicator_id(mut self, id: impl Into<String>) -> Self {
        self.replicator_id = Some(id.into());
        self
    }

    /// Sets the changes batch size.
    pub fn with_changes_batch_size(mut self, size: u32) -> Self {
        self.changes_batch_size = size.max(1);
        self
    }

    /// Sets the revs-diff batch size.
    pub fn with_diff_batch_size(mut self, size: usize) -> Self {
        self.diff_batch_size = size.max(1);
        self
    }

    /// Sets the number of worker threads.
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    /// Sets whether attachment bytes are pulled inline.
    pub fn with_pull_attachments_inline(mut self, inline: bool) -> Self {
        self.pull_attachments_inline = inline;
        self
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self::new()
    }
}
