//! Response bodies of the GitHub REST endpoints the client calls, and their
//! conversion into domain types.
//!
//! Only the fields relbot reads are modelled; serde ignores the rest.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use backport::{
    BranchName, BranchPointer, CommitAuthor, CommitRecord, CommitSha, CreatedCommit, HostError,
    HostResult, IssueComment, OpenPullRequest, OriginalPullRequest, PullRequestNumber, TeamSlug,
    Timestamp, TreeSha, UserLogin,
};

/// Turns an empty identifier into a decode error naming the field.
pub(crate) fn required<T>(value: Option<T>, field: &str) -> HostResult<T> {
    value.ok_or_else(|| HostError::Decode(format!("empty `{field}` in GitHub response")))
}

#[derive(Debug, Deserialize)]
pub(crate) struct ShaRef {
    pub sha: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Account {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Team {
    pub slug: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Label {
    pub name: String,
}

/// Error body returned with 4xx/5xx statuses.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: String,
}

// ---------------------------------------------------------------------------
// Git data
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct GitAuthor {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    pub date: Option<DateTime<Utc>>,
}

impl From<GitAuthor> for CommitAuthor {
    fn from(author: GitAuthor) -> Self {
        CommitAuthor {
            name: author.name,
            email: author.email,
            date: author.date.map(Timestamp::from_utc),
        }
    }
}

/// The `commit` object nested in branch, merge and PR-commit responses.
#[derive(Debug, Deserialize)]
pub(crate) struct GitCommitBody {
    pub tree: ShaRef,
    pub author: Option<GitAuthor>,
    #[serde(default)]
    pub message: String,
}

/// `GET /repos/{owner}/{repo}/branches/{branch}`
#[derive(Debug, Deserialize)]
pub(crate) struct BranchResponse {
    pub name: String,
    pub commit: RepoCommit,
}

impl BranchResponse {
    pub fn into_pointer(self) -> HostResult<BranchPointer> {
        Ok(BranchPointer {
            name: required(BranchName::new(self.name), "name")?,
            tip_sha: required(CommitSha::new(self.commit.sha), "commit.sha")?,
            tree_sha: required(TreeSha::new(self.commit.commit.tree.sha), "commit.tree.sha")?,
        })
    }
}

/// A commit as returned by the repository commit endpoints (branch tip,
/// pull request commits, merge result).
#[derive(Debug, Deserialize)]
pub(crate) struct RepoCommit {
    pub sha: String,
    pub commit: GitCommitBody,
    #[serde(default)]
    pub parents: Vec<ShaRef>,
}

impl RepoCommit {
    pub fn into_record(self) -> HostResult<CommitRecord> {
        let parents = self
            .parents
            .into_iter()
            .map(|p| required(CommitSha::new(p.sha), "parents.sha"))
            .collect::<HostResult<Vec<_>>>()?;
        let author = self
            .commit
            .author
            .map(CommitAuthor::from)
            .ok_or_else(|| HostError::Decode("commit without author".to_string()))?;
        Ok(CommitRecord {
            sha: required(CommitSha::new(self.sha), "sha")?,
            tree_sha: required(TreeSha::new(self.commit.tree.sha), "commit.tree.sha")?,
            parents,
            author,
            message: self.commit.message,
        })
    }
}

/// `POST /repos/{owner}/{repo}/git/commits`
#[derive(Debug, Deserialize)]
pub(crate) struct CreatedGitCommit {
    pub sha: String,
    pub tree: ShaRef,
}

impl CreatedGitCommit {
    pub fn into_created(self) -> HostResult<CreatedCommit> {
        Ok(CreatedCommit {
            sha: required(CommitSha::new(self.sha), "sha")?,
            tree_sha: required(TreeSha::new(self.tree.sha), "tree.sha")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Pull requests and issues
// ---------------------------------------------------------------------------

/// `GET /repos/{owner}/{repo}/pulls/{number}`
#[derive(Debug, Deserialize)]
pub(crate) struct PullRequest {
    pub number: u64,
    #[serde(default)]
    pub title: String,
    pub body: Option<String>,
    pub user: Account,
    #[serde(default)]
    pub requested_reviewers: Vec<Account>,
    #[serde(default)]
    pub requested_teams: Vec<Team>,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub merged: bool,
}

impl PullRequest {
    /// Builds the domain view, given the authors of the PR's reviews in
    /// submission order.
    pub fn into_original(self, reviews: Vec<Review>) -> HostResult<OriginalPullRequest> {
        let mut review_authors: Vec<UserLogin> = Vec::new();
        for login in reviews.into_iter().filter_map(|r| r.user).map(|u| u.login) {
            let login = required(UserLogin::new(login), "reviews.user.login")?;
            if !review_authors.contains(&login) {
                review_authors.push(login);
            }
        }
        Ok(OriginalPullRequest {
            number: PullRequestNumber::new(self.number),
            title: self.title,
            body: self.body.unwrap_or_default(),
            author: required(UserLogin::new(self.user.login), "user.login")?,
            requested_reviewers: self
                .requested_reviewers
                .into_iter()
                .map(|a| required(UserLogin::new(a.login), "requested_reviewers.login"))
                .collect::<HostResult<_>>()?,
            requested_teams: self
                .requested_teams
                .into_iter()
                .map(|t| required(TeamSlug::new(t.slug), "requested_teams.slug"))
                .collect::<HostResult<_>>()?,
            review_authors,
            labels: self.labels.into_iter().map(|l| l.name).collect(),
            merged: self.merged,
        })
    }
}

/// `GET /repos/{owner}/{repo}/pulls/{number}/reviews`. The user is absent
/// for deleted accounts.
#[derive(Debug, Deserialize)]
pub(crate) struct Review {
    pub user: Option<Account>,
}

/// `GET /repos/{owner}/{repo}/commits/{sha}/pulls`
#[derive(Debug, Deserialize)]
pub(crate) struct PullRequestSummary {
    pub number: u64,
    pub state: String,
    pub head: ShaRef,
}

impl PullRequestSummary {
    pub fn into_open(self) -> HostResult<OpenPullRequest> {
        Ok(OpenPullRequest {
            number: PullRequestNumber::new(self.number),
            head_sha: required(CommitSha::new(self.head.sha), "head.sha")?,
        })
    }
}

/// `POST /repos/{owner}/{repo}/pulls`
#[derive(Debug, Deserialize)]
pub(crate) struct CreatedPullRequest {
    pub number: u64,
}

/// `GET /repos/{owner}/{repo}/issues/{number}/comments`
#[derive(Debug, Deserialize)]
pub(crate) struct Comment {
    pub user: Option<Account>,
    #[serde(default)]
    pub body: String,
}

impl Comment {
    /// Comments from deleted accounts carry no author and are skipped.
    pub fn into_comment(self) -> Option<IssueComment> {
        let author = UserLogin::new(self.user?.login)?;
        Some(IssueComment {
            author,
            body: self.body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_response_yields_tip_and_tree() {
        let json = r#"{
            "name": "release-21.1",
            "commit": {
                "sha": "aaa111",
                "commit": {
                    "tree": { "sha": "tree111" },
                    "author": { "name": "rm", "email": "rm@example.com", "date": "2021-03-01T10:00:00Z" },
                    "message": "release 21.1"
                },
                "parents": [{ "sha": "p0" }]
            },
            "protected": true
        }"#;
        let pointer = serde_json::from_str::<BranchResponse>(json)
            .unwrap()
            .into_pointer()
            .unwrap();
        assert_eq!(pointer.name.as_str(), "release-21.1");
        assert_eq!(pointer.tip_sha.as_str(), "aaa111");
        assert_eq!(pointer.tree_sha.as_str(), "tree111");
    }

    #[test]
    fn pull_request_commit_keeps_author_and_parents() {
        let json = r#"{
            "sha": "bbb222",
            "commit": {
                "tree": { "sha": "tree222" },
                "author": { "name": "Ada", "email": "ada@example.com", "date": "2021-03-02T08:30:00Z" },
                "message": "sql: fix planner\n\nRelease note: None"
            },
            "parents": [{ "sha": "aaa111" }, { "sha": "ccc333" }]
        }"#;
        let record = serde_json::from_str::<RepoCommit>(json)
            .unwrap()
            .into_record()
            .unwrap();
        assert_eq!(record.parents.len(), 2);
        assert_eq!(record.author.name, "Ada");
        assert!(record.author.date.is_some());
        assert!(record.message.ends_with("Release note: None"));
    }

    #[test]
    fn pull_request_collects_review_authors_once() {
        let json = r#"{
            "number": 100,
            "title": "sql: fix planner",
            "body": null,
            "user": { "login": "ada" },
            "requested_reviewers": [{ "login": "carol" }],
            "requested_teams": [{ "slug": "sql-queries" }],
            "labels": [{ "name": "backport-21.1.x" }],
            "merged": true
        }"#;
        let reviews: Vec<Review> = serde_json::from_str(
            r#"[{ "user": { "login": "bob" } }, { "user": null }, { "user": { "login": "bob" } }]"#,
        )
        .unwrap();
        let original = serde_json::from_str::<PullRequest>(json)
            .unwrap()
            .into_original(reviews)
            .unwrap();
        assert_eq!(original.body, "");
        assert_eq!(original.review_authors, vec![UserLogin::new("bob").unwrap()]);
        assert_eq!(original.requested_teams[0].as_str(), "sql-queries");
        assert_eq!(original.labels, vec!["backport-21.1.x".to_string()]);
        assert!(original.merged);
    }

    #[test]
    fn empty_sha_is_a_decode_error() {
        let json = r#"{ "sha": "", "tree": { "sha": "t" } }"#;
        let err = serde_json::from_str::<CreatedGitCommit>(json)
            .unwrap()
            .into_created()
            .unwrap_err();
        assert!(matches!(err, HostError::Decode(m) if m.contains("sha")));
    }

    #[test]
    fn comments_from_deleted_accounts_are_skipped() {
        let comment: Comment = serde_json::from_str(r#"{ "user": null, "body": "hi" }"#).unwrap();
        assert!(comment.into_comment().is_none());
    }
}
