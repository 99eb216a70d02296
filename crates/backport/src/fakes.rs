//! In-memory implementation of the host ports for testing.
//!
//! [`InMemoryHost`] keeps a small content-addressed object graph (trees as
//! path → content maps, commits, branch refs) plus pull requests and
//! comments. Its server-side merge is a file-level three-way merge against
//! the nearest common ancestor, which is enough to exercise the cherry-pick
//! engine end to end. Every call is journaled so tests can assert on the
//! exact sequence of remote operations.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::errors::{HostError, HostResult};
use crate::ports::{IssueCommentSink, PullRequestSource, RemoteObjectStore};
use crate::{
    BranchName, BranchPointer, CommitAuthor, CommitRecord, CommitSha, CreatedCommit,
    IssueComment, MergedCommit, NewCommit, NewPullRequest, OpenPullRequest, OriginalPullRequest,
    PullRequestNumber, RepositoryRef, TeamSlug, TreeSha, UserLogin,
};

/// File path → file content.
pub type Files = BTreeMap<String, String>;

/// Which port operation a call was, used for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostOperation {
    GetBranch,
    ListCommits,
    CreateRef,
    CreateCommit,
    ForceUpdateRef,
    MergeBranches,
    CreatePullRequest,
    RequestReviewers,
    AddAssignees,
    GetPullRequest,
    FindPullRequests,
    ListComments,
    CreateComment,
    AddCommentReviewers,
}

/// One journaled call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    GetBranch { branch: String },
    ListCommits { number: u64 },
    CreateRef { branch: String, sha: String },
    CreateCommit { message: String, tree: String, parents: Vec<String> },
    ForceUpdateRef { branch: String, sha: String },
    MergeBranches { base: String, head: String },
    CreatePullRequest { title: String, base: String, head: String },
    RequestReviewers { number: u64, users: Vec<String>, teams: Vec<String> },
    AddAssignees { number: u64, users: Vec<String> },
    GetPullRequest { number: u64 },
    FindPullRequests { sha: String },
    ListComments { number: u64 },
    CreateComment { number: u64 },
    AddCommentReviewers { number: u64, users: Vec<String> },
}

impl HostCall {
    pub fn operation(&self) -> HostOperation {
        match self {
            Self::GetBranch { .. } => HostOperation::GetBranch,
            Self::ListCommits { .. } => HostOperation::ListCommits,
            Self::CreateRef { .. } => HostOperation::CreateRef,
            Self::CreateCommit { .. } => HostOperation::CreateCommit,
            Self::ForceUpdateRef { .. } => HostOperation::ForceUpdateRef,
            Self::MergeBranches { .. } => HostOperation::MergeBranches,
            Self::CreatePullRequest { .. } => HostOperation::CreatePullRequest,
            Self::RequestReviewers { .. } => HostOperation::RequestReviewers,
            Self::AddAssignees { .. } => HostOperation::AddAssignees,
            Self::GetPullRequest { .. } => HostOperation::GetPullRequest,
            Self::FindPullRequests { .. } => HostOperation::FindPullRequests,
            Self::ListComments { .. } => HostOperation::ListComments,
            Self::CreateComment { .. } => HostOperation::CreateComment,
            Self::AddCommentReviewers { .. } => HostOperation::AddCommentReviewers,
        }
    }
}

/// A commit stored in the fake object graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCommit {
    pub tree: TreeSha,
    pub parents: Vec<CommitSha>,
    pub author: Option<CommitAuthor>,
    pub message: String,
}

/// A pull request opened through [`RemoteObjectStore::create_pull_request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedPullRequest {
    pub number: PullRequestNumber,
    pub request: NewPullRequest,
    pub reviewers: Vec<UserLogin>,
    pub teams: Vec<TeamSlug>,
    pub assignees: Vec<UserLogin>,
}

#[derive(Debug, Default)]
struct State {
    trees: HashMap<TreeSha, Files>,
    commits: HashMap<CommitSha, StoredCommit>,
    refs: HashMap<BranchName, CommitSha>,
    originals: HashMap<PullRequestNumber, (OriginalPullRequest, Vec<CommitSha>)>,
    open_heads: Vec<OpenPullRequest>,
    opened: Vec<OpenedPullRequest>,
    comments: HashMap<PullRequestNumber, Vec<IssueComment>>,
    comment_reviewers: HashMap<PullRequestNumber, Vec<UserLogin>>,
    failures: HashMap<HostOperation, VecDeque<HostError>>,
    journal: Vec<HostCall>,
    next_number: u64,
}

/// In-memory host implementing every port trait.
#[derive(Debug)]
pub struct InMemoryHost {
    bot_login: UserLogin,
    state: Mutex<State>,
}

impl Default for InMemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryHost {
    pub fn new() -> Self {
        Self::with_bot_login(UserLogin::from_formatted("relbot[bot]".to_string()))
    }

    /// Comments created through [`IssueCommentSink`] are attributed to `login`.
    pub fn with_bot_login(login: UserLogin) -> Self {
        Self {
            bot_login: login,
            state: Mutex::new(State {
                next_number: 1000,
                ..State::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // -----------------------------------------------------------------------
    // Seeding
    // -----------------------------------------------------------------------

    /// Stores a tree and returns its content address.
    pub fn write_tree(&self, files: &[(&str, &str)]) -> TreeSha {
        let files: Files = files
            .iter()
            .map(|(p, c)| (p.to_string(), c.to_string()))
            .collect();
        store_tree(&mut self.state(), files)
    }

    /// Stores a commit and returns its SHA.
    pub fn write_commit(
        &self,
        tree: &TreeSha,
        parents: &[&CommitSha],
        message: &str,
        author: Option<CommitAuthor>,
    ) -> CommitSha {
        store_commit(
            &mut self.state(),
            StoredCommit {
                tree: tree.clone(),
                parents: parents.iter().map(|p| (*p).clone()).collect(),
                author,
                message: message.to_string(),
            },
        )
    }

    /// Creates or moves a branch without journaling.
    pub fn set_branch(&self, name: &str, sha: &CommitSha) {
        let branch = BranchName::from_formatted(name.to_string());
        self.state().refs.insert(branch, sha.clone());
    }

    /// Registers a pull request and its commits (oldest first).
    pub fn add_pull_request(&self, original: OriginalPullRequest, commits: &[&CommitSha]) {
        let commits = commits.iter().map(|c| (*c).clone()).collect();
        self.state()
            .originals
            .insert(original.number, (original, commits));
    }

    /// Marks `number` as an open pull request whose head is `head`.
    pub fn add_open_head(&self, number: PullRequestNumber, head: &CommitSha) {
        self.state().open_heads.push(OpenPullRequest {
            number,
            head_sha: head.clone(),
        });
    }

    /// Makes the next call of `operation` fail with `error`. Queued failures
    /// for the same operation are consumed in order.
    pub fn fail_next(&self, operation: HostOperation, error: HostError) {
        self.state()
            .failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    pub fn branch_tip(&self, name: &str) -> Option<CommitSha> {
        let branch = BranchName::new(name)?;
        self.state().refs.get(&branch).cloned()
    }

    pub fn commit(&self, sha: &CommitSha) -> Option<StoredCommit> {
        self.state().commits.get(sha).cloned()
    }

    pub fn files(&self, tree: &TreeSha) -> Option<Files> {
        self.state().trees.get(tree).cloned()
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.state().journal.clone()
    }

    pub fn opened_pull_requests(&self) -> Vec<OpenedPullRequest> {
        self.state().opened.clone()
    }

    pub fn comments(&self, number: PullRequestNumber) -> Vec<IssueComment> {
        self.state()
            .comments
            .get(&number)
            .cloned()
            .unwrap_or_default()
    }

    pub fn comment_reviewers(&self, number: PullRequestNumber) -> Vec<UserLogin> {
        self.state()
            .comment_reviewers
            .get(&number)
            .cloned()
            .unwrap_or_default()
    }

    /// Journals `call` and returns an injected failure if one is queued.
    fn begin(&self, state: &mut State, call: HostCall) -> HostResult<()> {
        let operation = call.operation();
        state.journal.push(call);
        match state
            .failures
            .get_mut(&operation)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

fn store_tree(state: &mut State, files: Files) -> TreeSha {
    let mut parts = vec!["tree"];
    for (path, content) in &files {
        parts.push(path);
        parts.push(content);
    }
    let sha = TreeSha::from_formatted(digest(&parts));
    state.trees.entry(sha.clone()).or_insert(files);
    sha
}

fn store_commit(state: &mut State, commit: StoredCommit) -> CommitSha {
    let author = commit
        .author
        .as_ref()
        .map(|a| format!("{} <{}>", a.name, a.email))
        .unwrap_or_default();
    let mut parts = vec!["commit", commit.tree.as_str(), author.as_str(), commit.message.as_str()];
    for parent in &commit.parents {
        parts.push(parent.as_str());
    }
    let sha = CommitSha::from_formatted(digest(&parts));
    state.commits.entry(sha.clone()).or_insert(commit);
    sha
}

fn unprocessable(message: impl Into<String>) -> HostError {
    HostError::Api {
        status: 422,
        message: message.into(),
    }
}

/// All ancestors of `start`, including itself.
fn ancestors(state: &State, start: &CommitSha) -> HashSet<CommitSha> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([start.clone()]);
    while let Some(sha) = queue.pop_front() {
        if !seen.insert(sha.clone()) {
            continue;
        }
        if let Some(commit) = state.commits.get(&sha) {
            queue.extend(commit.parents.iter().cloned());
        }
    }
    seen
}

/// The first ancestor of `head`, breadth first, that is also an ancestor of `base`.
fn merge_base(state: &State, base: &CommitSha, head: &CommitSha) -> Option<CommitSha> {
    let base_ancestors = ancestors(state, base);
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([head.clone()]);
    while let Some(sha) = queue.pop_front() {
        if base_ancestors.contains(&sha) {
            return Some(sha);
        }
        if !seen.insert(sha.clone()) {
            continue;
        }
        if let Some(commit) = state.commits.get(&sha) {
            queue.extend(commit.parents.iter().cloned());
        }
    }
    None
}

/// File-level three-way merge. Returns the conflicting paths on failure.
fn three_way(base: &Files, ours: &Files, theirs: &Files) -> Result<Files, Vec<String>> {
    let mut paths: Vec<&String> = base.keys().chain(ours.keys()).chain(theirs.keys()).collect();
    paths.sort();
    paths.dedup();

    let mut merged = Files::new();
    let mut conflicts = Vec::new();
    for path in paths {
        let (b, o, t) = (base.get(path), ours.get(path), theirs.get(path));
        let result = if o == t || b == t {
            o
        } else if b == o {
            t
        } else {
            conflicts.push(path.clone());
            continue;
        };
        if let Some(content) = result {
            merged.insert(path.clone(), content.clone());
        }
    }
    if conflicts.is_empty() {
        Ok(merged)
    } else {
        Err(conflicts)
    }
}

fn logins(users: &[UserLogin]) -> Vec<String> {
    users.iter().map(ToString::to_string).collect()
}

fn fake_identity() -> CommitAuthor {
    CommitAuthor {
        name: "relbot".to_string(),
        email: "relbot@users.noreply.github.com".to_string(),
        date: None,
    }
}

#[async_trait]
impl RemoteObjectStore for InMemoryHost {
    async fn get_branch(
        &self,
        _repo: &RepositoryRef,
        name: &BranchName,
    ) -> HostResult<BranchPointer> {
        let mut state = self.state();
        self.begin(
            &mut state,
            HostCall::GetBranch {
                branch: name.to_string(),
            },
        )?;
        let tip = state
            .refs
            .get(name)
            .cloned()
            .ok_or_else(|| HostError::NotFound(format!("Branch not found: {name}")))?;
        let tree = state
            .commits
            .get(&tip)
            .map(|c| c.tree.clone())
            .ok_or_else(|| HostError::Decode(format!("dangling ref {name}")))?;
        Ok(BranchPointer {
            name: name.clone(),
            tip_sha: tip,
            tree_sha: tree,
        })
    }

    async fn list_commits(
        &self,
        _repo: &RepositoryRef,
        number: PullRequestNumber,
    ) -> HostResult<Vec<CommitRecord>> {
        let mut state = self.state();
        self.begin(
            &mut state,
            HostCall::ListCommits {
                number: number.as_u64(),
            },
        )?;
        let (_, shas) = state
            .originals
            .get(&number)
            .ok_or_else(|| HostError::NotFound(format!("pull request #{number}")))?;
        shas.iter()
            .map(|sha| {
                let commit = state
                    .commits
                    .get(sha)
                    .ok_or_else(|| HostError::Decode(format!("unknown commit {sha}")))?;
                Ok(CommitRecord {
                    sha: sha.clone(),
                    tree_sha: commit.tree.clone(),
                    parents: commit.parents.clone(),
                    author: commit.author.clone().unwrap_or_else(fake_identity),
                    message: commit.message.clone(),
                })
            })
            .collect()
    }

    async fn create_ref(
        &self,
        _repo: &RepositoryRef,
        branch: &BranchName,
        sha: &CommitSha,
    ) -> HostResult<()> {
        let mut state = self.state();
        self.begin(
            &mut state,
            HostCall::CreateRef {
                branch: branch.to_string(),
                sha: sha.to_string(),
            },
        )?;
        if state.refs.contains_key(branch) {
            return Err(HostError::AlreadyExists(format!(
                "Reference already exists: {}",
                branch.to_ref()
            )));
        }
        if !state.commits.contains_key(sha) {
            return Err(unprocessable(format!("Object does not exist: {sha}")));
        }
        state.refs.insert(branch.clone(), sha.clone());
        Ok(())
    }

    async fn create_commit(
        &self,
        _repo: &RepositoryRef,
        commit: NewCommit,
    ) -> HostResult<CreatedCommit> {
        let mut state = self.state();
        self.begin(
            &mut state,
            HostCall::CreateCommit {
                message: commit.message.clone(),
                tree: commit.tree_sha.to_string(),
                parents: commit.parents.iter().map(ToString::to_string).collect(),
            },
        )?;
        if !state.trees.contains_key(&commit.tree_sha) {
            return Err(unprocessable(format!("Tree SHA does not exist: {}", commit.tree_sha)));
        }
        if let Some(missing) = commit.parents.iter().find(|p| !state.commits.contains_key(*p)) {
            return Err(unprocessable(format!("Parent SHA does not exist: {missing}")));
        }
        let tree_sha = commit.tree_sha.clone();
        let sha = store_commit(
            &mut state,
            StoredCommit {
                tree: commit.tree_sha,
                parents: commit.parents,
                author: commit.author,
                message: commit.message,
            },
        );
        Ok(CreatedCommit { sha, tree_sha })
    }

    async fn force_update_ref(
        &self,
        _repo: &RepositoryRef,
        branch: &BranchName,
        sha: &CommitSha,
    ) -> HostResult<()> {
        let mut state = self.state();
        self.begin(
            &mut state,
            HostCall::ForceUpdateRef {
                branch: branch.to_string(),
                sha: sha.to_string(),
            },
        )?;
        if !state.refs.contains_key(branch) {
            return Err(unprocessable("Reference does not exist"));
        }
        if !state.commits.contains_key(sha) {
            return Err(unprocessable(format!("Object does not exist: {sha}")));
        }
        state.refs.insert(branch.clone(), sha.clone());
        Ok(())
    }

    async fn merge_branches(
        &self,
        _repo: &RepositoryRef,
        base: &BranchName,
        head: &CommitSha,
    ) -> HostResult<MergedCommit> {
        let mut state = self.state();
        self.begin(
            &mut state,
            HostCall::MergeBranches {
                base: base.to_string(),
                head: head.to_string(),
            },
        )?;
        let base_tip = state
            .refs
            .get(base)
            .cloned()
            .ok_or_else(|| HostError::NotFound(format!("Base does not exist: {base}")))?;
        let base_commit = state
            .commits
            .get(&base_tip)
            .cloned()
            .ok_or_else(|| HostError::Decode(format!("dangling ref {base}")))?;
        let head_commit = state
            .commits
            .get(head)
            .cloned()
            .ok_or_else(|| HostError::NotFound(format!("Head does not exist: {head}")))?;

        if ancestors(&state, &base_tip).contains(head) {
            return Ok(MergedCommit {
                sha: None,
                tree_sha: base_commit.tree,
            });
        }

        let empty = Files::new();
        let ancestor_files = merge_base(&state, &base_tip, head)
            .and_then(|sha| state.commits.get(&sha).map(|c| c.tree.clone()))
            .and_then(|tree| state.trees.get(&tree).cloned())
            .unwrap_or_default();
        let ours = state.trees.get(&base_commit.tree).unwrap_or(&empty);
        let theirs = state.trees.get(&head_commit.tree).unwrap_or(&empty);
        let files = three_way(&ancestor_files, ours, theirs).map_err(|paths| {
            HostError::MergeConflict(format!("Merge conflict in {}", paths.join(", ")))
        })?;

        let tree_sha = store_tree(&mut state, files);
        let sha = store_commit(
            &mut state,
            StoredCommit {
                tree: tree_sha.clone(),
                parents: vec![base_tip, head.clone()],
                author: None,
                message: format!("Merge {head} into {base}"),
            },
        );
        state.refs.insert(base.clone(), sha.clone());
        Ok(MergedCommit {
            sha: Some(sha),
            tree_sha,
        })
    }

    async fn create_pull_request(
        &self,
        _repo: &RepositoryRef,
        pull_request: NewPullRequest,
    ) -> HostResult<PullRequestNumber> {
        let mut state = self.state();
        self.begin(
            &mut state,
            HostCall::CreatePullRequest {
                title: pull_request.title.clone(),
                base: pull_request.base.to_string(),
                head: pull_request.head.to_string(),
            },
        )?;
        for branch in [&pull_request.base, &pull_request.head] {
            if !state.refs.contains_key(branch) {
                return Err(unprocessable(format!("unknown branch {branch}")));
            }
        }
        state.next_number += 1;
        let number = PullRequestNumber::new(state.next_number);
        state.opened.push(OpenedPullRequest {
            number,
            request: pull_request,
            reviewers: Vec::new(),
            teams: Vec::new(),
            assignees: Vec::new(),
        });
        Ok(number)
    }

    async fn request_reviewers(
        &self,
        _repo: &RepositoryRef,
        number: PullRequestNumber,
        users: &[UserLogin],
        teams: &[TeamSlug],
    ) -> HostResult<()> {
        let mut state = self.state();
        self.begin(
            &mut state,
            HostCall::RequestReviewers {
                number: number.as_u64(),
                users: logins(users),
                teams: teams.iter().map(ToString::to_string).collect(),
            },
        )?;
        let opened = state
            .opened
            .iter_mut()
            .find(|pr| pr.number == number)
            .ok_or_else(|| HostError::NotFound(format!("pull request #{number}")))?;
        opened.reviewers.extend(users.iter().cloned());
        opened.teams.extend(teams.iter().cloned());
        Ok(())
    }

    async fn add_assignees(
        &self,
        _repo: &RepositoryRef,
        number: PullRequestNumber,
        users: &[UserLogin],
    ) -> HostResult<()> {
        let mut state = self.state();
        self.begin(
            &mut state,
            HostCall::AddAssignees {
                number: number.as_u64(),
                users: logins(users),
            },
        )?;
        let opened = state
            .opened
            .iter_mut()
            .find(|pr| pr.number == number)
            .ok_or_else(|| HostError::NotFound(format!("pull request #{number}")))?;
        opened.assignees.extend(users.iter().cloned());
        Ok(())
    }
}

#[async_trait]
impl PullRequestSource for InMemoryHost {
    async fn get_pull_request(
        &self,
        _repo: &RepositoryRef,
        number: PullRequestNumber,
    ) -> HostResult<OriginalPullRequest> {
        let mut state = self.state();
        self.begin(
            &mut state,
            HostCall::GetPullRequest {
                number: number.as_u64(),
            },
        )?;
        state
            .originals
            .get(&number)
            .map(|(original, _)| original.clone())
            .ok_or_else(|| HostError::NotFound(format!("pull request #{number}")))
    }

    async fn find_open_pull_requests_for_commit(
        &self,
        _repo: &RepositoryRef,
        sha: &CommitSha,
    ) -> HostResult<Vec<OpenPullRequest>> {
        let mut state = self.state();
        self.begin(
            &mut state,
            HostCall::FindPullRequests {
                sha: sha.to_string(),
            },
        )?;
        Ok(state
            .open_heads
            .iter()
            .filter(|pr| &pr.head_sha == sha)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl IssueCommentSink for InMemoryHost {
    async fn list_recent_comments(
        &self,
        _repo: &RepositoryRef,
        number: PullRequestNumber,
    ) -> HostResult<Vec<IssueComment>> {
        let mut state = self.state();
        self.begin(
            &mut state,
            HostCall::ListComments {
                number: number.as_u64(),
            },
        )?;
        let mut comments = state.comments.get(&number).cloned().unwrap_or_default();
        comments.reverse();
        Ok(comments)
    }

    async fn create_comment(
        &self,
        _repo: &RepositoryRef,
        number: PullRequestNumber,
        body: &str,
    ) -> HostResult<()> {
        let mut state = self.state();
        self.begin(
            &mut state,
            HostCall::CreateComment {
                number: number.as_u64(),
            },
        )?;
        state.comments.entry(number).or_default().push(IssueComment {
            author: self.bot_login.clone(),
            body: body.to_string(),
        });
        Ok(())
    }

    async fn add_reviewers(
        &self,
        _repo: &RepositoryRef,
        number: PullRequestNumber,
        users: &[UserLogin],
    ) -> HostResult<()> {
        let mut state = self.state();
        self.begin(
            &mut state,
            HostCall::AddCommentReviewers {
                number: number.as_u64(),
                users: logins(users),
            },
        )?;
        state
            .comment_reviewers
            .entry(number)
            .or_default()
            .extend(users.iter().cloned());
        Ok(())
    }
}
