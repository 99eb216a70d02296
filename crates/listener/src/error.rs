use thiserror::Error;

use backport::HostError;

#[derive(Debug, Error)]
pub enum ListenerError {
    /// The webhook body is not valid JSON for its declared event kind.
    #[error("malformed {kind} payload: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    /// The body parsed but carries an unusable value.
    #[error("invalid {kind} payload: {message}")]
    Invalid { kind: String, message: String },

    /// A lookup needed before dispatch failed on the host.
    #[error("{operation} failed: {source}")]
    Host {
        operation: String,
        #[source]
        source: HostError,
    },
}

impl ListenerError {
    pub(crate) fn host(operation: impl Into<String>, source: HostError) -> Self {
        Self::Host {
            operation: operation.into(),
            source,
        }
    }
}
