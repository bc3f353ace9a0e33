//! Changes-feed positions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque position in a source's changes feed.
///
/// Only the source that issued a token interprets it. The replicator stores
/// and returns tokens verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceToken(String);

impl SequenceToken {
    /// Wraps a token string.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the token text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Interprets the token as a numeric sequence, for sources that issue
    /// numeric tokens.
    pub fn as_u64(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl From<u64> for SequenceToken {
    fn from(sequence: u64) -> Self {
        Self(sequence.to_string())
    }
}

impl fmt::Display for SequenceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_bare_string() {
        let token = SequenceToken::from(42);
        assert_eq!(serde_json::to_string(&token).unwrap(), "\"42\"");
        assert_eq!(token.as_u64(), Some(42));
    }

    #[test]
    fn opaque_tokens_are_not_numeric() {
        assert_eq!(SequenceToken::new("17-g1AAAA").as_u64(), None);
    }
}
