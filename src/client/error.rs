//! Error types for download client operations.

use thiserror::Error;

/// Classification of a [`ClientError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientErrorKind {
    /// Connect/timeout/5xx or other transport failures.
    Network,
    /// Login rejected or session could not be re-established.
    Auth,
    /// The back-end refused to create the job.
    Submit,
    /// The back-end no longer knows the requested id.
    NotFound,
    /// The back-end answered with something the adapter cannot use, or the
    /// operation is not supported by this back-end.
    Protocol,
    /// The adapter is configured incorrectly.
    Config,
}

/// Errors returned by [`DownloadClient`](super::DownloadClient) implementations.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The request could not be completed.
    #[error("download client '{client}' network error: {reason}\n  Suggestion: Check that the client is running and its base_url is reachable")]
    Network {
        /// Adapter name
        client: String,
        /// Why the request failed
        reason: String,
    },

    /// Credentials were rejected.
    #[error("download client '{client}' rejected authentication: {reason}\n  Suggestion: Check the username/password or API key in the [[clients]] entry")]
    Auth {
        /// Adapter name
        client: String,
        /// What the back-end reported
        reason: String,
    },

    /// The job could not be created.
    #[error("download client '{client}' did not accept the download: {reason}")]
    Submit {
        /// Adapter name
        client: String,
        /// What the back-end reported
        reason: String,
    },

    /// Unknown external id.
    #[error("download client '{client}' has no download with id '{id}'")]
    NotFound {
        /// Adapter name
        client: String,
        /// The id that was looked up
        id: String,
    },

    /// Unexpected response or unsupported operation.
    #[error("download client '{client}' protocol error: {reason}")]
    Protocol {
        /// Adapter name
        client: String,
        /// What went wrong
        reason: String,
    },

    /// The adapter configuration is unusable.
    #[error("download client '{client}' is misconfigured: {reason}\n  Suggestion: Fix the [[clients]] entry in the config file")]
    Config {
        /// Adapter name
        client: String,
        /// What is wrong
        reason: String,
    },
}

impl ClientError {
    /// Creates a `Network` error.
    #[must_use]
    pub fn network(client: &str, reason: impl Into<String>) -> Self {
        Self::Network {
            client: client.to_string(),
            reason: reason.into(),
        }
    }

    /// Creates an `Auth` error.
    #[must_use]
    pub fn auth(client: &str, reason: impl Into<String>) -> Self {
        Self::Auth {
            client: client.to_string(),
            reason: reason.into(),
        }
    }

    /// Creates a `Submit` error.
    #[must_use]
    pub fn submit(client: &str, reason: impl Into<String>) -> Self {
        Self::Submit {
            client: client.to_string(),
            reason: reason.into(),
        }
    }

    /// Creates a `NotFound` error.
    #[must_use]
    pub fn not_found(client: &str, id: impl Into<String>) -> Self {
        Self::NotFound {
            client: client.to_string(),
            id: id.into(),
        }
    }

    /// Creates a `Protocol` error.
    #[must_use]
    pub fn protocol(client: &str, reason: impl Into<String>) -> Self {
        Self::Protocol {
            client: client.to_string(),
            reason: reason.into(),
        }
    }

    /// Creates a `Config` error.
    #[must_use]
    pub fn config(client: &str, reason: impl Into<String>) -> Self {
        Self::Config {
            client: client.to_string(),
            reason: reason.into(),
        }
    }

    /// Maps a transport error; undecodable bodies are protocol errors.
    #[must_use]
    pub fn from_reqwest(client: &str, error: &reqwest::Error) -> Self {
        if error.is_decode() {
            Self::protocol(client, error.to_string())
        } else {
            Self::network(client, error.to_string())
        }
    }

    /// Returns the error classification.
    #[must_use]
    pub fn kind(&self) -> ClientErrorKind {
        match self {
            Self::Network { .. } => ClientErrorKind::Network,
            Self::Auth { .. } => ClientErrorKind::Auth,
            Self::Submit { .. } => ClientErrorKind::Submit,
            Self::NotFound { .. } => ClientErrorKind::NotFound,
            Self::Protocol { .. } => ClientErrorKind::Protocol,
            Self::Config { .. } => ClientErrorKind::Config,
        }
    }

    /// Returns the adapter name carried by every variant.
    #[must_use]
    pub fn client(&self) -> &str {
        match self {
            Self::Network { client, .. }
            | Self::Auth { client, .. }
            | Self::Submit { client, .. }
            | Self::NotFound { client, .. }
            | Self::Protocol { client, .. }
            | Self::Config { client, .. } => client,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_client_accessors() {
        let err = ClientError::not_found("qbit", "abc");
        assert_eq!(err.kind(), ClientErrorKind::NotFound);
        assert_eq!(err.client(), "qbit");
        assert!(err.to_string().contains("'abc'"));
    }

    #[test]
    fn test_auth_message_has_suggestion() {
        let msg = ClientError::auth("deluge", "login returned false").to_string();
        assert!(msg.contains("login returned false"));
        assert!(msg.contains("Suggestion:"));
    }
}
