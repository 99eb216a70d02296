//! Port traits: the remote host as seen by the domain.
//!
//! Infrastructure crates implement these traits; the engine and orchestrator
//! only ever talk to them through `&dyn` references. Implementations must
//! not retry, cache, or hold session state. Each call either succeeds or
//! reports the precise [`HostError`].

use async_trait::async_trait;

use crate::errors::HostResult;
use crate::{
    BranchName, BranchPointer, CommitRecord, CommitSha, CreatedCommit, IssueComment, MergedCommit,
    NewCommit, NewPullRequest, OpenPullRequest, OriginalPullRequest, PullRequestNumber,
    RepositoryRef, TeamSlug, UserLogin,
};

/// The primitive Git and pull-request operations the cherry-pick engine
/// sequences.
#[async_trait]
pub trait RemoteObjectStore: Send + Sync {
    /// Reads a branch tip. Reports [`HostError::NotFound`](crate::HostError::NotFound)
    /// when the branch does not exist.
    async fn get_branch(&self, repo: &RepositoryRef, name: &BranchName)
        -> HostResult<BranchPointer>;

    /// Lists the commits of a pull request, oldest first.
    async fn list_commits(
        &self,
        repo: &RepositoryRef,
        number: PullRequestNumber,
    ) -> HostResult<Vec<CommitRecord>>;

    /// Creates `refs/heads/<branch>` pointing at `sha`. Reports
    /// [`HostError::AlreadyExists`](crate::HostError::AlreadyExists) on a name collision.
    async fn create_ref(
        &self,
        repo: &RepositoryRef,
        branch: &BranchName,
        sha: &CommitSha,
    ) -> HostResult<()>;

    /// Creates a commit object without moving any ref. A commit with no
    /// author is attributed to the authenticated user.
    async fn create_commit(&self, repo: &RepositoryRef, commit: NewCommit)
        -> HostResult<CreatedCommit>;

    /// Moves a branch to `sha`, allowing non-fast-forward updates.
    async fn force_update_ref(
        &self,
        repo: &RepositoryRef,
        branch: &BranchName,
        sha: &CommitSha,
    ) -> HostResult<()>;

    /// Merges `head` into the branch `base` on the host. Reports
    /// [`HostError::MergeConflict`](crate::HostError::MergeConflict) when the
    /// host cannot merge cleanly.
    async fn merge_branches(
        &self,
        repo: &RepositoryRef,
        base: &BranchName,
        head: &CommitSha,
    ) -> HostResult<MergedCommit>;

    /// Opens a pull request and returns its number.
    async fn create_pull_request(
        &self,
        repo: &RepositoryRef,
        pull_request: NewPullRequest,
    ) -> HostResult<PullRequestNumber>;

    /// Requests reviews from users and teams on an open pull request.
    async fn request_reviewers(
        &self,
        repo: &RepositoryRef,
        number: PullRequestNumber,
        users: &[UserLogin],
        teams: &[TeamSlug],
    ) -> HostResult<()>;

    /// Adds assignees to a pull request.
    async fn add_assignees(
        &self,
        repo: &RepositoryRef,
        number: PullRequestNumber,
        users: &[UserLogin],
    ) -> HostResult<()>;
}

/// Pull-request metadata lookups used by the trigger layer.
#[async_trait]
pub trait PullRequestSource: Send + Sync {
    /// Reads a pull request together with the logins of everyone who
    /// submitted a review on it.
    async fn get_pull_request(
        &self,
        repo: &RepositoryRef,
        number: PullRequestNumber,
    ) -> HostResult<OriginalPullRequest>;

    /// Open pull requests whose head is `sha`.
    async fn find_open_pull_requests_for_commit(
        &self,
        repo: &RepositoryRef,
        sha: &CommitSha,
    ) -> HostResult<Vec<OpenPullRequest>>;
}

/// Conversation operations used when flushing a report.
#[async_trait]
pub trait IssueCommentSink: Send + Sync {
    /// Comments on the conversation, newest first.
    async fn list_recent_comments(
        &self,
        repo: &RepositoryRef,
        number: PullRequestNumber,
    ) -> HostResult<Vec<IssueComment>>;

    /// Posts `body` as a new comment.
    async fn create_comment(
        &self,
        repo: &RepositoryRef,
        number: PullRequestNumber,
        body: &str,
    ) -> HostResult<()>;

    /// Requests reviews from individual users on the pull request.
    async fn add_reviewers(
        &self,
        repo: &RepositoryRef,
        number: PullRequestNumber,
        users: &[UserLogin],
    ) -> HostResult<()>;
}
