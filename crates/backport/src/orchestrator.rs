//! Fans one backport request out over its target branches.
//!
//! Branches are attempted one after the other. A failing branch adds one
//! paragraph to the shared report and never stops the remaining branches.
//! The report is posted once, at the end, and only if something failed.

use std::collections::HashSet;

use tracing::{debug, error, info, instrument};

use crate::branch::BranchNaming;
use crate::config::BotConfig;
use crate::engine::{BackportedPullRequest, CherryPickEngine, SessionFailure};
use crate::errors::HostError;
use crate::ports::{IssueCommentSink, RemoteObjectStore};
use crate::report::{ReportBuilder, ReportDelivery};
use crate::{OriginalPullRequest, RepositoryRef, RunId};

/// Result of one requested label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelOutcome {
    /// The label as requested.
    pub label: String,
    pub result: Result<BackportedPullRequest, SessionFailure>,
}

/// Everything one orchestration pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackportRunSummary {
    pub run_id: RunId,
    /// One entry per distinct requested branch, in request order. A label
    /// naming a branch an earlier label already asked for is skipped.
    pub outcomes: Vec<LabelOutcome>,
    /// Delivery of the failure report. `Ok(ReportDelivery::Empty)` when every
    /// branch succeeded.
    pub report: Result<ReportDelivery, HostError>,
}

impl BackportRunSummary {
    /// Sessions that stopped before opening a pull request.
    pub fn failures(&self) -> impl Iterator<Item = &SessionFailure> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().err())
    }

    /// Backport pull requests that were opened.
    pub fn opened(&self) -> impl Iterator<Item = &BackportedPullRequest> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }
}

/// Drives the [`CherryPickEngine`] once per requested label.
pub struct BackportOrchestrator<'a> {
    store: &'a dyn RemoteObjectStore,
    comments: &'a dyn IssueCommentSink,
    config: &'a BotConfig,
}

impl<'a> BackportOrchestrator<'a> {
    pub fn new(
        store: &'a dyn RemoteObjectStore,
        comments: &'a dyn IssueCommentSink,
        config: &'a BotConfig,
    ) -> Self {
        Self {
            store,
            comments,
            config,
        }
    }

    #[instrument(skip_all, fields(run_id = %run_id, repo = %repo, pr = %original.number))]
    pub async fn run(
        &self,
        run_id: RunId,
        repo: &RepositoryRef,
        original: &OriginalPullRequest,
        labels: &[String],
    ) -> BackportRunSummary {
        let naming = BranchNaming::new(&self.config.backport);
        let engine = CherryPickEngine::new(self.store, naming.clone())
            .with_cc_team(self.config.backport.cc_team.clone());

        let mut report = ReportBuilder::new(repo.clone(), original.number);
        report.append_paragraph_fmt(format_args!(
            "Encountered an error creating backports. Some common things that can go wrong:\n\
             1. The backport branch might have already existed.\n\
             2. There was a merge conflict.\n\
             3. The backport branch contained merge commits.\n\n\
             You might need to create your backport manually using the [backport]({}) tool.\n\n\
             ----",
            self.config.backport.manual_tool_url
        ));
        let mut needs_report = false;

        let mut outcomes: Vec<LabelOutcome> = Vec::new();
        let mut requested = HashSet::new();
        for label in labels {
            // `backport-21.1.x` and `backport-21.1` name the same branch.
            if !requested.insert(naming.requested_branch(label)) {
                debug!(%label, "branch already requested by an earlier label");
                continue;
            }
            let result = engine.run(repo, original, label).await;
            match &result {
                Ok(done) if !done.follow_up.is_empty() => {
                    needs_report = true;
                    let problems: Vec<String> =
                        done.follow_up.iter().map(ToString::to_string).collect();
                    report.append_paragraph_fmt(format_args!(
                        "Backport to branch {} was opened as #{}, but: {}\n\n----",
                        done.target,
                        done.number,
                        problems.join("; ")
                    ));
                }
                Ok(_) => {}
                Err(failure) => {
                    needs_report = true;
                    report.append_paragraph(failure_paragraph(failure));
                }
            }
            outcomes.push(LabelOutcome {
                label: label.clone(),
                result,
            });
        }

        let report = if needs_report {
            report.finish(self.comments, &self.config.report).await
        } else {
            Ok(ReportDelivery::Empty)
        };
        if let Err(e) = &report {
            error!(error = %e, "failed to post backport report");
        }

        let summary = BackportRunSummary {
            run_id,
            outcomes,
            report,
        };
        info!(
            opened = summary.opened().count(),
            failed = summary.failures().count(),
            "backports attempted"
        );
        summary
    }
}

fn failure_paragraph(failure: &SessionFailure) -> String {
    let branch = failure
        .target
        .as_ref()
        .map_or(failure.label.as_str(), |t| t.as_str());
    let mut paragraph = format!(
        "Backport to branch {branch} failed while {}: {}",
        failure.stage, failure.error
    );
    if let Some(left) = &failure.backport_branch {
        paragraph.push_str(&format!(
            "\nThe partial backport branch `{left}` was left in place so it can be finished by hand."
        ));
    }
    paragraph.push_str("\n\n----");
    paragraph
}
