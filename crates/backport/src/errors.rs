//! Error types for the backport domain.
//!
//! [`HostError`] is what every port reports: the precise failure of a single
//! remote call. [`BackportError`] is the session-level taxonomy the engine
//! derives from it, each variant naming the step that failed.
//!
//! Nothing in this crate retries. A failed call ends the current session and
//! the error travels to the orchestrator, which reports it.

use thiserror::Error;

use crate::{BranchName, CommitSha};

// ---------------------------------------------------------------------------
// Remote host errors
// ---------------------------------------------------------------------------

/// Failure of a single call to the remote Git/PR host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// The addressed object (branch, pull request, commit) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A ref with the requested name already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The server-side merge could not be computed without conflicts.
    #[error("merge conflict: {0}")]
    MergeConflict(String),

    /// The host answered with an error status not covered above.
    #[error("host API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Message returned by the host.
        message: String,
    },

    /// The request never produced a response (connection, TLS, auth token).
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body could not be interpreted.
    #[error("unexpected response: {0}")]
    Decode(String),
}

/// Convenience result alias for port operations.
pub type HostResult<T> = std::result::Result<T, HostError>;

// ---------------------------------------------------------------------------
// Session errors
// ---------------------------------------------------------------------------

/// Terminal (or, for the review/assignee variants, post-PR) failures of a
/// backport session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackportError {
    /// Neither the requested branch name nor its release-prefixed alias exists.
    #[error("target branch not found (tried {})", .tried.join(", "))]
    TargetBranchNotFound {
        /// Every branch name that was looked up, in order.
        tried: Vec<String>,
    },

    /// The backport branch ref already exists, usually because this backport
    /// was attempted before.
    #[error("backport branch {branch} already exists")]
    BranchAlreadyExists { branch: BranchName },

    /// The commits of the original pull request could not be listed.
    #[error("could not list commits of the original pull request: {source}")]
    CommitListUnavailable {
        #[source]
        source: HostError,
    },

    /// The original pull request contains a commit that does not have
    /// exactly one parent.
    #[error("commit {sha} has {parents} parents; only single-parent commits can be backported")]
    MergeCommitUnsupported { sha: CommitSha, parents: usize },

    /// The host could not apply a commit onto the backport branch.
    #[error("merge conflict applying {sha} onto {branch}: {source}")]
    MergeConflict {
        sha: CommitSha,
        branch: BranchName,
        #[source]
        source: HostError,
    },

    /// Every commit was replayed, but the pull request could not be opened.
    #[error("backport branch {branch} is ready but the pull request could not be created: {source}")]
    PullRequestCreationFailed {
        branch: BranchName,
        #[source]
        source: HostError,
    },

    /// The pull request exists but reviewers could not be requested.
    #[error("could not request reviewers: {source}")]
    ReviewerRequestFailed {
        #[source]
        source: HostError,
    },

    /// The pull request exists but the original author could not be assigned.
    #[error("could not assign the original author: {source}")]
    AssigneeRequestFailed {
        #[source]
        source: HostError,
    },

    /// Any other remote failure, tagged with the operation that caused it.
    #[error("{operation} failed: {source}")]
    HostApi {
        operation: String,
        #[source]
        source: HostError,
    },
}

impl BackportError {
    /// Wraps a host failure that has no more specific classification.
    pub fn host(operation: impl Into<String>, source: HostError) -> Self {
        Self::HostApi {
            operation: operation.into(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// The bot configuration is invalid. Produced at load time; the bot never
/// starts with an invalid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("configuration error: {message}")]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
