//! Shared value types for the backport domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types
//! group several values that travel together between the engine and the
//! remote host (a commit and its parents, a branch and its tip).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BranchName, CommitSha, PullRequestNumber, TeamSlug, TreeSha, UserLogin};

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// A repository on the remote host, addressed as `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryRef {
    /// Owning user or organisation login.
    pub owner: String,
    /// Repository name.
    pub name: String,
}

impl RepositoryRef {
    /// Creates a new [`RepositoryRef`].
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

// ---------------------------------------------------------------------------
// Git objects
// ---------------------------------------------------------------------------

/// Author identity recorded on a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
    /// Authoring time. `None` lets the host stamp the current time.
    pub date: Option<Timestamp>,
}

/// One commit belonging to the source pull request.
///
/// Read once from the host when a session starts and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub sha: CommitSha,
    pub tree_sha: TreeSha,
    /// Parent SHAs in host order. More than one parent means a merge commit.
    pub parents: Vec<CommitSha>,
    pub author: CommitAuthor,
    pub message: String,
}

impl CommitRecord {
    /// Returns the sole parent, or `None` for root and merge commits.
    pub fn single_parent(&self) -> Option<&CommitSha> {
        match self.parents.as_slice() {
            [parent] => Some(parent),
            _ => None,
        }
    }
}

/// A branch and the commit and tree it currently points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchPointer {
    pub name: BranchName,
    /// Commit the branch points at.
    pub tip_sha: CommitSha,
    /// Tree of that commit.
    pub tree_sha: TreeSha,
}

/// A commit created on the host: its own SHA plus the tree it records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedCommit {
    pub sha: CommitSha,
    pub tree_sha: TreeSha,
}

/// Everything needed to create a commit object on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCommit {
    pub message: String,
    /// Tree the commit records. Must already exist on the host.
    pub tree_sha: TreeSha,
    /// Parents in order.
    pub parents: Vec<CommitSha>,
    /// `None` attributes the commit to the authenticated identity.
    pub author: Option<CommitAuthor>,
}

/// The result of a successful server-side merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedCommit {
    /// SHA of the merge commit, or `None` when the head was already contained
    /// in the base and no commit was created.
    pub sha: Option<CommitSha>,
    pub tree_sha: TreeSha,
}

// ---------------------------------------------------------------------------
// Pull requests
// ---------------------------------------------------------------------------

/// Parameters for opening a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPullRequest {
    pub title: String,
    /// Branch the changes are merged into.
    pub base: BranchName,
    /// Branch holding the changes.
    pub head: BranchName,
    pub body: String,
}

/// Metadata of the pull request a backport is created from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginalPullRequest {
    pub number: PullRequestNumber,
    pub title: String,
    pub body: String,
    /// Login of the pull request's author. Assigned to every backport.
    pub author: UserLogin,
    /// Users whose review is still requested.
    pub requested_reviewers: Vec<UserLogin>,
    /// Teams whose review is still requested.
    pub requested_teams: Vec<TeamSlug>,
    /// Users who submitted at least one review.
    pub review_authors: Vec<UserLogin>,
    /// Label names, in host order.
    pub labels: Vec<String>,
    pub merged: bool,
}

/// An open pull request, as returned when searching by head commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPullRequest {
    pub number: PullRequestNumber,
    pub head_sha: CommitSha,
}

/// A comment on an issue or pull request conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueComment {
    pub author: UserLogin,
    pub body: String,
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
