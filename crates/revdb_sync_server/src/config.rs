//! Server configuration.

/// Configuration for the replication peer.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Name reported in logs.
    pub identifier: String,
    /// Upper bound on rows returned by one changes request.
    pub max_changes_limit: u32,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            max_changes_limit: 1000,
        }
    }

    /// Sets the maximum changes page size. Values below 1 are raised to 1.
    pub fn with_max_changes_limit(mut self, limit: u32) -> Self {
        self.max_changes_limit = limit.max(1);
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("revdb-peer")
    }
}
