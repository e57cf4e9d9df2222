//! Error types for indexer operations.
//!
//! Every failure an indexer can report falls into one of four kinds so callers
//! can react uniformly: network trouble, rejected credentials, unparseable
//! responses, and adapter misconfiguration.

use thiserror::Error;

/// Classification of an [`IndexerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexerErrorKind {
    /// Connect/timeout/5xx or other transport failures.
    Network,
    /// Credentials missing, expired, or rejected.
    Auth,
    /// The response could not be understood.
    Parse,
    /// The adapter is configured incorrectly.
    Config,
}

/// Errors returned by [`Indexer`](super::Indexer) implementations.
#[derive(Debug, Clone, Error)]
pub enum IndexerError {
    /// The request could not be completed.
    #[error("indexer '{indexer}' network error: {reason}\n  Suggestion: Check the indexer URL and that the service is reachable")]
    Network {
        /// Adapter name
        indexer: String,
        /// Why the request failed
        reason: String,
    },

    /// The source rejected or never received valid credentials.
    #[error("indexer '{indexer}' rejected authentication: {reason}\n  Suggestion: {suggestion}")]
    Auth {
        /// Adapter name
        indexer: String,
        /// What the source reported
        reason: String,
        /// How to fix the credentials
        suggestion: String,
    },

    /// The response body did not match the expected format.
    #[error("indexer '{indexer}' returned an unreadable response: {reason}")]
    Parse {
        /// Adapter name
        indexer: String,
        /// What could not be parsed
        reason: String,
    },

    /// The adapter configuration is unusable.
    #[error("indexer '{indexer}' is misconfigured: {reason}\n  Suggestion: Fix the [[indexers]] entry in the config file")]
    Config {
        /// Adapter name
        indexer: String,
        /// What is wrong
        reason: String,
    },
}

impl IndexerError {
    /// Creates a `Network` error.
    #[must_use]
    pub fn network(indexer: &str, reason: impl Into<String>) -> Self {
        Self::Network {
            indexer: indexer.to_string(),
            reason: reason.into(),
        }
    }

    /// Creates an `Auth` error with the default suggestion.
    #[must_use]
    pub fn auth(indexer: &str, reason: impl Into<String>) -> Self {
        Self::Auth {
            indexer: indexer.to_string(),
            reason: reason.into(),
            suggestion: "Refresh the session cookie or API key for this indexer".to_string(),
        }
    }

    /// Creates a `Parse` error.
    #[must_use]
    pub fn parse(indexer: &str, reason: impl Into<String>) -> Self {
        Self::Parse {
            indexer: indexer.to_string(),
            reason: reason.into(),
        }
    }

    /// Creates a `Config` error.
    #[must_use]
    pub fn config(indexer: &str, reason: impl Into<String>) -> Self {
        Self::Config {
            indexer: indexer.to_string(),
            reason: reason.into(),
        }
    }

    /// Maps a transport error; body decode failures count as parse errors.
    #[must_use]
    pub fn from_reqwest(indexer: &str, error: &reqwest::Error) -> Self {
        if error.is_decode() {
            Self::parse(indexer, error.to_string())
        } else {
            Self::network(indexer, error.to_string())
        }
    }

    /// Returns the error classification.
    #[must_use]
    pub fn kind(&self) -> IndexerErrorKind {
        match self {
            Self::Network { .. } => IndexerErrorKind::Network,
            Self::Auth { .. } => IndexerErrorKind::Auth,
            Self::Parse { .. } => IndexerErrorKind::Parse,
            Self::Config { .. } => IndexerErrorKind::Config,
        }
    }

    /// Returns the adapter name carried by the error.
    #[must_use]
    pub fn indexer(&self) -> &str {
        match self {
            Self::Network { indexer, .. }
            | Self::Auth { indexer, .. }
            | Self::Parse { indexer, .. }
            | Self::Config { indexer, .. } => indexer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_message_has_suggestion() {
        let err = IndexerError::auth("tracker", "session expired");
        let msg = err.to_string();
        assert!(msg.contains("tracker"));
        assert!(msg.contains("session expired"));
        assert!(msg.contains("Suggestion"));
        assert_eq!(err.kind(), IndexerErrorKind::Auth);
    }

    #[test]
    fn test_kind_and_indexer_accessors() {
        assert_eq!(
            IndexerError::parse("feed", "bad xml").kind(),
            IndexerErrorKind::Parse
        );
        assert_eq!(IndexerError::network("feed", "timeout").indexer(), "feed");
        assert_eq!(
            IndexerError::config("feed", "no api key").kind(),
            IndexerErrorKind::Config
        );
    }
}
