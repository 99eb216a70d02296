//! Remote cherry-pick engine.
//!
//! Reproduces `git cherry-pick` of every commit of a pull request onto a
//! release branch using only host-side object operations. For each commit
//! `C` replayed onto the running backport tip `current`:
//!
//! 1. create a temporary commit with `current`'s tree and `C`'s parent,
//! 2. point the backport branch at it,
//! 3. merge `C` into the backport branch on the host; because the temporary
//!    commit shares `C`'s parent, the merged tree is `current` plus `C`'s diff,
//! 4. create the real commit (`C`'s author and message, merged tree, parent
//!    `current`), dropping the temporary commit from history,
//! 5. point the backport branch at the real commit.
//!
//! Every failure ends the session. Refs and commits created before the
//! failure stay on the host so the backport can be finished by hand. Once
//! the branch has been moved onto a temporary commit, any later failure in
//! that replay moves it back onto the last completed cherry-pick.

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::branch::BranchNaming;
use crate::errors::{BackportError, HostError};
use crate::ports::RemoteObjectStore;
use crate::{
    BranchName, BranchPointer, CommitRecord, NewCommit, NewPullRequest, OriginalPullRequest,
    PullRequestNumber, RepositoryRef, TeamSlug, UserLogin,
};

/// Message of the throwaway commits that only exist to give the host's merge
/// the right common ancestor.
pub const TEMP_COMMIT_MESSAGE: &str = "relbot: temporary cherry-pick commit";

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStage {
    /// Looking up the branch the label refers to.
    Resolving,
    /// Reading the original pull request's commits.
    ListingCommits,
    /// Creating the backport branch at the target tip.
    CreatingBranch,
    /// Replaying the commit at this zero-based index.
    Replaying(usize),
    /// Opening the backport pull request.
    OpeningPullRequest,
    /// Requesting reviews on the backport pull request.
    RequestingReviewers,
    /// Assigning the original author.
    AssigningAuthor,
    Done,
}

impl std::fmt::Display for SessionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resolving => write!(f, "resolving target branch"),
            Self::ListingCommits => write!(f, "listing commits"),
            Self::CreatingBranch => write!(f, "creating backport branch"),
            Self::Replaying(i) => write!(f, "replaying commit {}", i + 1),
            Self::OpeningPullRequest => write!(f, "opening pull request"),
            Self::RequestingReviewers => write!(f, "requesting reviewers"),
            Self::AssigningAuthor => write!(f, "assigning author"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// A backport that produced a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackportedPullRequest {
    /// The label that requested this backport.
    pub label: String,
    /// Release branch the pull request targets.
    pub target: BranchName,
    /// Branch holding the replayed commits.
    pub backport_branch: BranchName,
    /// Number of the opened backport pull request.
    pub number: PullRequestNumber,
    /// How many commits were replayed.
    pub commits: usize,
    /// Reviewer and assignee failures. The pull request exists regardless.
    pub follow_up: Vec<BackportError>,
}

/// A backport that stopped before its pull request was opened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("backport for {label} failed while {stage}: {error}")]
pub struct SessionFailure {
    /// The label that requested this backport.
    pub label: String,
    /// Resolved target branch, once known.
    pub target: Option<BranchName>,
    /// Set once this session created the backport branch. The branch is
    /// left in place for manual repair.
    pub backport_branch: Option<BranchName>,
    /// The step that failed.
    pub stage: SessionStage,
    #[source]
    pub error: BackportError,
}

/// The unit of work for one (original PR, requested label) pair.
#[derive(Debug)]
struct BackportSession {
    label: String,
    target: Option<BranchName>,
    backport_branch: Option<BranchName>,
    stage: SessionStage,
}

impl BackportSession {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            target: None,
            backport_branch: None,
            stage: SessionStage::Resolving,
        }
    }

    fn advance(&mut self, stage: SessionStage) {
        debug!(label = %self.label, %stage, "session stage");
        self.stage = stage;
    }

    fn into_failure(self, error: BackportError) -> SessionFailure {
        SessionFailure {
            label: self.label,
            target: self.target,
            backport_branch: self.backport_branch,
            stage: self.stage,
            error,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Runs backport sessions against a [`RemoteObjectStore`].
pub struct CherryPickEngine<'a> {
    store: &'a dyn RemoteObjectStore,
    naming: BranchNaming,
    cc_team: Option<String>,
}

impl<'a> CherryPickEngine<'a> {
    pub fn new(store: &'a dyn RemoteObjectStore, naming: BranchNaming) -> Self {
        Self {
            store,
            naming,
            cc_team: None,
        }
    }

    /// Mentions `team` in the body of every backport pull request.
    pub fn with_cc_team(mut self, team: Option<String>) -> Self {
        self.cc_team = team;
        self
    }

    /// Backports every commit of `original` onto the branch `label` refers to
    /// and opens a pull request for it.
    #[instrument(skip_all, fields(repo = %repo, pr = %original.number, label = %label))]
    pub async fn run(
        &self,
        repo: &RepositoryRef,
        original: &OriginalPullRequest,
        label: &str,
    ) -> Result<BackportedPullRequest, SessionFailure> {
        let mut session = BackportSession::new(label);
        match self.drive(&mut session, repo, original).await {
            Ok(done) => {
                info!(target_branch = %done.target, backport = %done.number, "backport opened");
                Ok(done)
            }
            Err(error) => {
                warn!(stage = %session.stage, %error, "backport session failed");
                Err(session.into_failure(error))
            }
        }
    }

    async fn drive(
        &self,
        session: &mut BackportSession,
        repo: &RepositoryRef,
        original: &OriginalPullRequest,
    ) -> Result<BackportedPullRequest, BackportError> {
        let target = self.naming.resolve(self.store, repo, &session.label).await?;
        let backport_branch = self.naming.backport_branch(&target.name, original.number);
        session.target = Some(target.name.clone());

        session.advance(SessionStage::ListingCommits);
        let commits = self
            .store
            .list_commits(repo, original.number)
            .await
            .map_err(|source| BackportError::CommitListUnavailable { source })?;
        if commits.is_empty() {
            return Err(BackportError::CommitListUnavailable {
                source: HostError::NotFound(format!(
                    "pull request #{} has no commits",
                    original.number
                )),
            });
        }

        session.advance(SessionStage::CreatingBranch);
        match self
            .store
            .create_ref(repo, &backport_branch, &target.tip_sha)
            .await
        {
            Ok(()) => {}
            Err(HostError::AlreadyExists(_)) => {
                return Err(BackportError::BranchAlreadyExists {
                    branch: backport_branch,
                });
            }
            Err(e) => {
                return Err(BackportError::host(
                    format!("create branch {backport_branch}"),
                    e,
                ))
            }
        }
        session.backport_branch = Some(backport_branch.clone());

        let mut current = BranchPointer {
            name: backport_branch.clone(),
            tip_sha: target.tip_sha.clone(),
            tree_sha: target.tree_sha.clone(),
        };
        for (index, commit) in commits.iter().enumerate() {
            session.advance(SessionStage::Replaying(index));
            current = self.replay(repo, &current, commit).await?;
        }

        session.advance(SessionStage::OpeningPullRequest);
        let number = self
            .store
            .create_pull_request(repo, self.pull_request(original, &target.name, &backport_branch, commits.len()))
            .await
            .map_err(|source| BackportError::PullRequestCreationFailed {
                branch: backport_branch.clone(),
                source,
            })?;

        session.advance(SessionStage::RequestingReviewers);
        let mut follow_up = Vec::new();
        let (users, teams) = reviewers_for(original);
        if !users.is_empty() || !teams.is_empty() {
            if let Err(source) = self
                .store
                .request_reviewers(repo, number, &users, &teams)
                .await
            {
                warn!(backport = %number, error = %source, "requesting reviewers failed");
                follow_up.push(BackportError::ReviewerRequestFailed { source });
            }
        }

        session.advance(SessionStage::AssigningAuthor);
        if let Err(source) = self
            .store
            .add_assignees(repo, number, std::slice::from_ref(&original.author))
            .await
        {
            warn!(backport = %number, error = %source, "assigning original author failed");
            follow_up.push(BackportError::AssigneeRequestFailed { source });
        }
        session.advance(SessionStage::Done);

        Ok(BackportedPullRequest {
            label: session.label.clone(),
            target: target.name,
            backport_branch,
            number,
            commits: commits.len(),
            follow_up,
        })
    }

    /// Applies one commit on top of `current` and returns the new tip.
    async fn replay(
        &self,
        repo: &RepositoryRef,
        current: &BranchPointer,
        commit: &CommitRecord,
    ) -> Result<BranchPointer, BackportError> {
        let parent = commit
            .single_parent()
            .ok_or_else(|| BackportError::MergeCommitUnsupported {
                sha: commit.sha.clone(),
                parents: commit.parents.len(),
            })?;

        let temp = self
            .store
            .create_commit(
                repo,
                NewCommit {
                    message: TEMP_COMMIT_MESSAGE.to_string(),
                    tree_sha: current.tree_sha.clone(),
                    parents: vec![parent.clone()],
                    author: None,
                },
            )
            .await
            .map_err(|e| BackportError::host(format!("create temporary commit on {parent}"), e))?;

        self.store
            .force_update_ref(repo, &current.name, &temp.sha)
            .await
            .map_err(|e| BackportError::host(format!("move {} to {}", current.name, temp.sha), e))?;

        match self.pick_onto_temp(repo, current, commit).await {
            Ok(picked) => Ok(picked),
            Err(error) => {
                self.restore_tip(repo, current).await;
                Err(error)
            }
        }
    }

    /// Steps 3 to 5 of a replay, run while the branch points at the
    /// temporary commit.
    async fn pick_onto_temp(
        &self,
        repo: &RepositoryRef,
        current: &BranchPointer,
        commit: &CommitRecord,
    ) -> Result<BranchPointer, BackportError> {
        let merged = self
            .store
            .merge_branches(repo, &current.name, &commit.sha)
            .await
            .map_err(|e| match e {
                source @ HostError::MergeConflict(_) => BackportError::MergeConflict {
                    sha: commit.sha.clone(),
                    branch: current.name.clone(),
                    source,
                },
                e => BackportError::host(format!("merge {} into {}", commit.sha, current.name), e),
            })?;

        let picked = self
            .store
            .create_commit(
                repo,
                NewCommit {
                    message: commit.message.clone(),
                    tree_sha: merged.tree_sha,
                    parents: vec![current.tip_sha.clone()],
                    author: Some(commit.author.clone()),
                },
            )
            .await
            .map_err(|e| BackportError::host(format!("create cherry-pick of {}", commit.sha), e))?;

        self.store
            .force_update_ref(repo, &current.name, &picked.sha)
            .await
            .map_err(|e| BackportError::host(format!("move {} to {}", current.name, picked.sha), e))?;

        debug!(original = %commit.sha.short(), picked = %picked.sha.short(), "commit replayed");
        Ok(BranchPointer {
            name: current.name.clone(),
            tip_sha: picked.sha,
            tree_sha: picked.tree_sha,
        })
    }

    /// Moves the backport branch off the temporary commit and back onto the
    /// last completed cherry-pick. Best effort: a failure here is only logged.
    async fn restore_tip(&self, repo: &RepositoryRef, current: &BranchPointer) {
        if let Err(error) = self
            .store
            .force_update_ref(repo, &current.name, &current.tip_sha)
            .await
        {
            warn!(branch = %current.name, %error, "could not move backport branch off the temporary commit");
        }
    }

    fn pull_request(
        &self,
        original: &OriginalPullRequest,
        target: &BranchName,
        head: &BranchName,
        commits: usize,
    ) -> NewPullRequest {
        let mut body = format!(
            "Backport {commits}/{commits} commits from #{} on behalf of @{}.\n\n",
            original.number, original.author
        );
        if let Some(team) = &self.cc_team {
            body.push_str(&format!("/cc @{team}\n\n"));
        }
        body.push_str(&format!(
            "----\n\n{}\n\n----\n\nRelease justification:",
            original.body
        ));
        NewPullRequest {
            title: format!("{target}: {}", original.title),
            base: target.clone(),
            head: head.clone(),
            body,
        }
    }
}

/// Requested reviewers plus everyone who reviewed, sorted and de-duplicated,
/// and the requested teams.
fn reviewers_for(original: &OriginalPullRequest) -> (Vec<UserLogin>, Vec<TeamSlug>) {
    let users: BTreeSet<UserLogin> = original
        .requested_reviewers
        .iter()
        .chain(&original.review_authors)
        .cloned()
        .collect();
    let teams: BTreeSet<TeamSlug> = original.requested_teams.iter().cloned().collect();
    (users.into_iter().collect(), teams.into_iter().collect())
}
