//! [`GithubClient`]: the host ports over the GitHub REST API.
//!
//! One client serves one credential (a PAT or one app installation). Calls
//! are never retried; every non-success status is classified into a
//! [`HostError`] and returned to the caller.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use backport::{
    BranchName, BranchPointer, CommitRecord, CommitSha, CreatedCommit, HostError, HostResult,
    IssueComment, IssueCommentSink, MergedCommit, NewCommit, NewPullRequest, OpenPullRequest,
    OriginalPullRequest, PullRequestNumber, PullRequestSource, RemoteObjectStore, RepositoryRef,
    TeamSlug, UserLogin,
};

use crate::error::GithubError;
use crate::token::TokenProvider;
use crate::wire;

pub(crate) const USER_AGENT: &str = concat!("relbot/", env!("CARGO_PKG_VERSION"));
pub(crate) const ACCEPT: &str = "application/vnd.github+json";
pub(crate) const API_VERSION: &str = "2022-11-28";

const PER_PAGE: usize = 100;

/// Extracts GitHub's `message` field from an error body, falling back to the
/// raw text.
pub(crate) fn error_message(body: &str) -> String {
    match serde_json::from_str::<wire::ErrorBody>(body) {
        Ok(parsed) if !parsed.message.is_empty() => parsed.message,
        _ => body.trim().to_string(),
    }
}

/// Maps a non-success status to a [`HostError`]. `what` names the addressed
/// object for the not-found and already-exists cases.
pub(crate) fn classify(status: u16, body: &str, what: &str) -> HostError {
    let message = error_message(body);
    match status {
        404 => HostError::NotFound(what.to_string()),
        422 if message.to_ascii_lowercase().contains("already exists") => {
            HostError::AlreadyExists(what.to_string())
        }
        _ => HostError::Api { status, message },
    }
}

/// Appends pagination parameters to `path`.
fn page_url(path: &str, page: usize) -> String {
    let sep = if path.contains('?') { '&' } else { '?' };
    format!("{path}{sep}per_page={PER_PAGE}&page={page}")
}

fn decode<T: DeserializeOwned>(body: &str) -> HostResult<T> {
    serde_json::from_str(body).map_err(|e| HostError::Decode(e.to_string()))
}

struct RawResponse {
    status: u16,
    body: String,
}

impl RawResponse {
    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn into_success(self, what: &str) -> HostResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(classify(self.status, &self.body, what))
        }
    }
}

pub struct GithubClient {
    http: reqwest::Client,
    api_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl GithubClient {
    pub fn new(api_url: impl Into<String>, tokens: Arc<dyn TokenProvider>) -> Result<Self, GithubError> {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        if api_url.is_empty() {
            return Err(GithubError::Config("empty API URL".to_string()));
        }
        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            http,
            api_url,
            tokens,
        })
    }

    fn repo_path(repo: &RepositoryRef, rest: &str) -> String {
        format!("/repos/{}/{}/{rest}", repo.owner, repo.name)
    }

    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> HostResult<RawResponse> {
        let token = self.tokens.token().await.map_err(HostError::from)?;
        let mut request = self
            .http
            .request(method.clone(), format!("{}{path}", self.api_url))
            .bearer_auth(token)
            .header("Accept", ACCEPT)
            .header("X-GitHub-Api-Version", API_VERSION);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| HostError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        if status == 401 {
            warn!(%method, path, "GitHub rejected the token");
            self.tokens.reject().await;
        }
        let body = response
            .text()
            .await
            .map_err(|e| HostError::Transport(e.to_string()))?;
        debug!(%method, path, status, "GitHub API call");
        Ok(RawResponse { status, body })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, what: &str) -> HostResult<T> {
        let response = self.call(Method::GET, path, None).await?.into_success(what)?;
        decode(&response.body)
    }

    async fn send_json(&self, method: Method, path: &str, body: Value, what: &str) -> HostResult<RawResponse> {
        self.call(method, path, Some(body)).await?.into_success(what)
    }

    /// Follows pages until one comes back short.
    async fn get_all<T: DeserializeOwned>(&self, path: &str, what: &str) -> HostResult<Vec<T>> {
        let mut items = Vec::new();
        for page in 1.. {
            let batch: Vec<T> = self.get(&page_url(path, page), what).await?;
            let short = batch.len() < PER_PAGE;
            items.extend(batch);
            if short {
                break;
            }
        }
        Ok(items)
    }
}

#[async_trait]
impl RemoteObjectStore for GithubClient {
    #[instrument(skip(self), fields(repo = %repo))]
    async fn get_branch(&self, repo: &RepositoryRef, name: &BranchName) -> HostResult<BranchPointer> {
        let branch: wire::BranchResponse = self
            .get(
                &Self::repo_path(repo, &format!("branches/{name}")),
                &format!("branch {name}"),
            )
            .await?;
        branch.into_pointer()
    }

    #[instrument(skip(self), fields(repo = %repo))]
    async fn list_commits(
        &self,
        repo: &RepositoryRef,
        number: PullRequestNumber,
    ) -> HostResult<Vec<CommitRecord>> {
        let commits: Vec<wire::RepoCommit> = self
            .get_all(
                &Self::repo_path(repo, &format!("pulls/{number}/commits")),
                &format!("pull request #{number}"),
            )
            .await?;
        commits.into_iter().map(wire::RepoCommit::into_record).collect()
    }

    #[instrument(skip(self), fields(repo = %repo))]
    async fn create_ref(&self, repo: &RepositoryRef, branch: &BranchName, sha: &CommitSha) -> HostResult<()> {
        self.send_json(
            Method::POST,
            &Self::repo_path(repo, "git/refs"),
            json!({ "ref": branch.to_ref(), "sha": sha }),
            &format!("branch {branch}"),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, commit), fields(repo = %repo, tree = %commit.tree_sha))]
    async fn create_commit(&self, repo: &RepositoryRef, commit: NewCommit) -> HostResult<CreatedCommit> {
        let mut body = json!({
            "message": commit.message,
            "tree": commit.tree_sha,
            "parents": commit.parents,
        });
        if let Some(author) = commit.author {
            let mut fields = json!({ "name": author.name, "email": author.email });
            if let Some(date) = author.date {
                fields["date"] = json!(date.as_datetime().to_rfc3339());
            }
            body["author"] = fields;
        }
        let response = self
            .send_json(Method::POST, &Self::repo_path(repo, "git/commits"), body, "commit")
            .await?;
        decode::<wire::CreatedGitCommit>(&response.body)?.into_created()
    }

    #[instrument(skip(self), fields(repo = %repo))]
    async fn force_update_ref(&self, repo: &RepositoryRef, branch: &BranchName, sha: &CommitSha) -> HostResult<()> {
        self.send_json(
            Method::PATCH,
            &Self::repo_path(repo, &format!("git/refs/heads/{branch}")),
            json!({ "sha": sha, "force": true }),
            &format!("branch {branch}"),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(repo = %repo))]
    async fn merge_branches(
        &self,
        repo: &RepositoryRef,
        base: &BranchName,
        head: &CommitSha,
    ) -> HostResult<MergedCommit> {
        let response = self
            .call(
                Method::POST,
                &Self::repo_path(repo, "merges"),
                Some(json!({
                    "base": base,
                    "head": head,
                    "commit_message": format!("relbot: merge {} into {base}", head.short()),
                })),
            )
            .await?;
        match response.status {
            201 => {
                let merged: wire::RepoCommit = decode(&response.body)?;
                let record = merged.into_record()?;
                Ok(MergedCommit {
                    sha: Some(record.sha),
                    tree_sha: record.tree_sha,
                })
            }
            // Nothing to merge: the base already contains the head.
            204 => {
                let tip = self.get_branch(repo, base).await?;
                Ok(MergedCommit {
                    sha: None,
                    tree_sha: tip.tree_sha,
                })
            }
            409 => Err(HostError::MergeConflict(error_message(&response.body))),
            status => Err(classify(status, &response.body, &format!("merge into {base}"))),
        }
    }

    #[instrument(skip(self, pull_request), fields(repo = %repo, base = %pull_request.base))]
    async fn create_pull_request(
        &self,
        repo: &RepositoryRef,
        pull_request: NewPullRequest,
    ) -> HostResult<PullRequestNumber> {
        let response = self
            .send_json(
                Method::POST,
                &Self::repo_path(repo, "pulls"),
                json!({
                    "title": pull_request.title,
                    "head": pull_request.head,
                    "base": pull_request.base,
                    "body": pull_request.body,
                    "maintainer_can_modify": true,
                }),
                &format!("pull request from {}", pull_request.head),
            )
            .await?;
        let created: wire::CreatedPullRequest = decode(&response.body)?;
        Ok(PullRequestNumber::new(created.number))
    }

    #[instrument(skip(self), fields(repo = %repo))]
    async fn request_reviewers(
        &self,
        repo: &RepositoryRef,
        number: PullRequestNumber,
        users: &[UserLogin],
        teams: &[TeamSlug],
    ) -> HostResult<()> {
        self.send_json(
            Method::POST,
            &Self::repo_path(repo, &format!("pulls/{number}/requested_reviewers")),
            json!({ "reviewers": users, "team_reviewers": teams }),
            &format!("pull request #{number}"),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(repo = %repo))]
    async fn add_assignees(
        &self,
        repo: &RepositoryRef,
        number: PullRequestNumber,
        users: &[UserLogin],
    ) -> HostResult<()> {
        self.send_json(
            Method::POST,
            &Self::repo_path(repo, &format!("issues/{number}/assignees")),
            json!({ "assignees": users }),
            &format!("issue #{number}"),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PullRequestSource for GithubClient {
    #[instrument(skip(self), fields(repo = %repo))]
    async fn get_pull_request(
        &self,
        repo: &RepositoryRef,
        number: PullRequestNumber,
    ) -> HostResult<OriginalPullRequest> {
        let what = format!("pull request #{number}");
        let pull: wire::PullRequest = self
            .get(&Self::repo_path(repo, &format!("pulls/{number}")), &what)
            .await?;
        let reviews: Vec<wire::Review> = self
            .get_all(&Self::repo_path(repo, &format!("pulls/{number}/reviews")), &what)
            .await?;
        pull.into_original(reviews)
    }

    #[instrument(skip(self), fields(repo = %repo))]
    async fn find_open_pull_requests_for_commit(
        &self,
        repo: &RepositoryRef,
        sha: &CommitSha,
    ) -> HostResult<Vec<OpenPullRequest>> {
        let pulls: Vec<wire::PullRequestSummary> = self
            .get_all(
                &Self::repo_path(repo, &format!("commits/{sha}/pulls")),
                &format!("commit {}", sha.short()),
            )
            .await?;
        pulls
            .into_iter()
            .filter(|p| p.state == "open" && p.head.sha == sha.as_str())
            .map(wire::PullRequestSummary::into_open)
            .collect()
    }
}

#[async_trait]
impl IssueCommentSink for GithubClient {
    #[instrument(skip(self), fields(repo = %repo))]
    async fn list_recent_comments(
        &self,
        repo: &RepositoryRef,
        number: PullRequestNumber,
    ) -> HostResult<Vec<IssueComment>> {
        let comments: Vec<wire::Comment> = self
            .get_all(
                &Self::repo_path(
                    repo,
                    &format!("issues/{number}/comments?sort=created&direction=desc"),
                ),
                &format!("issue #{number}"),
            )
            .await?;
        Ok(comments
            .into_iter()
            .filter_map(wire::Comment::into_comment)
            .collect())
    }

    #[instrument(skip(self, body), fields(repo = %repo))]
    async fn create_comment(&self, repo: &RepositoryRef, number: PullRequestNumber, body: &str) -> HostResult<()> {
        self.send_json(
            Method::POST,
            &Self::repo_path(repo, &format!("issues/{number}/comments")),
            json!({ "body": body }),
            &format!("issue #{number}"),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(repo = %repo))]
    async fn add_reviewers(
        &self,
        repo: &RepositoryRef,
        number: PullRequestNumber,
        users: &[UserLogin],
    ) -> HostResult<()> {
        RemoteObjectStore::request_reviewers(self, repo, number, users, &[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::StaticToken;

    #[test]
    fn not_found_names_the_object() {
        let err = classify(404, r#"{"message":"Branch not found"}"#, "branch 21.1");
        assert_eq!(err, HostError::NotFound("branch 21.1".to_string()));
    }

    #[test]
    fn existing_refs_are_recognised() {
        let err = classify(
            422,
            r#"{"message":"Reference already exists","documentation_url":"https://docs.github.com"}"#,
            "branch relbot/backport-release-21.1-100",
        );
        assert!(matches!(err, HostError::AlreadyExists(_)));
    }

    #[test]
    fn other_validation_failures_stay_api_errors() {
        let err = classify(422, r#"{"message":"Validation Failed"}"#, "pull request");
        assert_eq!(
            err,
            HostError::Api {
                status: 422,
                message: "Validation Failed".to_string()
            }
        );
    }

    #[test]
    fn non_json_error_bodies_are_kept_verbatim() {
        let err = classify(502, "  Bad Gateway\n", "branch main");
        assert_eq!(
            err,
            HostError::Api {
                status: 502,
                message: "Bad Gateway".to_string()
            }
        );
    }

    #[test]
    fn pages_extend_existing_queries() {
        assert_eq!(page_url("/repos/a/b/pulls/1/commits", 2), "/repos/a/b/pulls/1/commits?per_page=100&page=2");
        assert_eq!(
            page_url("/repos/a/b/issues/1/comments?sort=created&direction=desc", 1),
            "/repos/a/b/issues/1/comments?sort=created&direction=desc&per_page=100&page=1"
        );
    }

    #[test]
    fn client_requires_an_api_url() {
        let result = GithubClient::new("/", Arc::new(StaticToken::new("t")));
        assert!(matches!(result, Err(GithubError::Config(_))));
    }

    /// Counts how often the client reports the token as rejected.
    #[derive(Default)]
    struct RecordingToken {
        rejected: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl TokenProvider for RecordingToken {
        async fn token(&self) -> Result<String, GithubError> {
            Ok("ghs_stale".to_string())
        }

        async fn reject(&self) {
            self.rejected.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    /// Serves one canned HTTP response on a loopback port.
    async fn serve_once(response: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn unauthorized_responses_reject_the_token() {
        let url = serve_once(
            "HTTP/1.1 401 Unauthorized\r\ncontent-type: application/json\r\n\
             content-length: 29\r\nconnection: close\r\n\r\n{\"message\":\"Bad credentials\"}",
        )
        .await;
        let tokens = Arc::new(RecordingToken::default());
        let client = GithubClient::new(url, tokens.clone()).unwrap();

        let err = client
            .get_branch(&RepositoryRef::new("acme", "db"), &BranchName::new("main").unwrap())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            HostError::Api {
                status: 401,
                message: "Bad credentials".to_string()
            }
        );
        assert_eq!(tokens.rejected.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn repo_paths_are_rooted_at_the_repository() {
        let repo = RepositoryRef::new("acme", "db");
        assert_eq!(GithubClient::repo_path(&repo, "git/refs"), "/repos/acme/db/git/refs");
    }
}
