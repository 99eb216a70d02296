//! Commit-status handling.
//!
//! [`StatusHandlerTable`] is an ordered list of `(context, state) → policy`
//! rows. The first matching row wins. A status with no row is ignored
//! without any remote call.

use tracing::{info, instrument};

use backport::{
    IssueCommentSink, PullRequestNumber, PullRequestSource, ReportBuilder, ReportDelivery,
    ReportSettings, StatusHandlerEntry, StatusPolicy,
};

use crate::error::ListenerError;
use crate::events::StatusEvent;

/// Ordered `(context, state) → policy` rows built from the configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusHandlerTable {
    entries: Vec<StatusHandlerEntry>,
}

impl StatusHandlerTable {
    pub fn new(entries: Vec<StatusHandlerEntry>) -> Self {
        Self { entries }
    }

    /// The policy of the first row matching `context` and `state`.
    pub fn lookup(&self, context: &str, state: &str) -> Option<StatusPolicy> {
        self.entries
            .iter()
            .find(|e| e.context == context && e.state == state)
            .map(|e| e.policy)
    }
}

/// What a status policy did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusOutcome {
    pub policy: StatusPolicy,
    /// The pull request commented on; `None` when no open pull request has
    /// the status commit as its head.
    pub pull_request: Option<PullRequestNumber>,
    pub delivery: ReportDelivery,
}

/// Runs `policy` for `event`.
#[instrument(skip_all, fields(sha = %event.sha, context = %event.context, state = %event.state))]
pub async fn apply_policy(
    policy: StatusPolicy,
    event: &StatusEvent,
    pulls: &dyn PullRequestSource,
    comments: &dyn IssueCommentSink,
    settings: &ReportSettings,
) -> Result<StatusOutcome, ListenerError> {
    match policy {
        StatusPolicy::CommentBuildFailure => {
            comment_build_failure(event, pulls, comments, settings).await
        }
    }
}

async fn comment_build_failure(
    event: &StatusEvent,
    pulls: &dyn PullRequestSource,
    comments: &dyn IssueCommentSink,
    settings: &ReportSettings,
) -> Result<StatusOutcome, ListenerError> {
    let open = pulls
        .find_open_pull_requests_for_commit(&event.repository, &event.sha)
        .await
        .map_err(|e| ListenerError::host("find pull requests for commit", e))?;

    // Only the first pull request is commented on.
    let Some(pr) = open.into_iter().next() else {
        info!("no open pull request has this commit as head");
        return Ok(StatusOutcome {
            policy: StatusPolicy::CommentBuildFailure,
            pull_request: None,
            delivery: ReportDelivery::Empty,
        });
    };

    let mut report = ReportBuilder::new(event.repository.clone(), pr.number);
    report.append_paragraph(build_failure_paragraph(event));
    let delivery = report
        .finish(comments, settings)
        .await
        .map_err(|e| ListenerError::host("post build failure comment", e))?;
    info!(pr = %pr.number, ?delivery, "build failure reported");
    Ok(StatusOutcome {
        policy: StatusPolicy::CommentBuildFailure,
        pull_request: Some(pr.number),
        delivery,
    })
}

fn build_failure_paragraph(event: &StatusEvent) -> String {
    let build = match &event.target_url {
        Some(url) => format!("[{} build]({url})", event.context),
        None => format!("{} build", event.context),
    };
    let commit = match &event.commit_url {
        Some(url) => format!("[{}]({url})", event.sha.short()),
        None => event.sha.short().to_string(),
    };
    format!(":x: The {build} has failed on {commit}.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use backport::{CommitSha, RepositoryRef};

    fn entry(context: &str, state: &str) -> StatusHandlerEntry {
        StatusHandlerEntry {
            context: context.to_string(),
            state: state.to_string(),
            policy: StatusPolicy::CommentBuildFailure,
        }
    }

    fn status(target_url: Option<&str>) -> StatusEvent {
        StatusEvent {
            repository: RepositoryRef::new("acme", "db"),
            sha: CommitSha::new("0123456789abcdef").unwrap(),
            context: "ci/build".to_string(),
            state: "failure".to_string(),
            target_url: target_url.map(str::to_string),
            commit_url: None,
            installation: None,
        }
    }

    #[test]
    fn lookup_matches_context_and_state() {
        let table = StatusHandlerTable::new(vec![entry("ci/build", "failure")]);
        assert_eq!(
            table.lookup("ci/build", "failure"),
            Some(StatusPolicy::CommentBuildFailure)
        );
        assert_eq!(table.lookup("ci/build", "success"), None);
        assert_eq!(table.lookup("ci/lint", "failure"), None);
    }

    #[test]
    fn empty_table_matches_nothing() {
        let table = StatusHandlerTable::default();
        assert_eq!(table.lookup("ci/build", "failure"), None);
    }

    #[test]
    fn failure_paragraph_links_build_and_commit() {
        let mut event = status(Some("https://ci.example.com/1"));
        event.commit_url = Some("https://github.com/acme/db/commit/0123456789abcdef".to_string());
        assert_eq!(
            build_failure_paragraph(&event),
            ":x: The [ci/build build](https://ci.example.com/1) has failed on \
             [01234567](https://github.com/acme/db/commit/0123456789abcdef)."
        );
    }

    #[test]
    fn failure_paragraph_without_links_is_plain() {
        assert_eq!(
            build_failure_paragraph(&status(None)),
            ":x: The ci/build build has failed on 01234567."
        );
    }
}
