//! Routes a parsed [`GitHubEvent`] to the code that handles it.

use tracing::{debug, info, instrument};

use backport::{
    BackportOrchestrator, BackportRunSummary, BotConfig, BranchNaming, IssueCommentSink,
    PullRequestSource, RemoteObjectStore, RunId,
};

use crate::error::ListenerError;
use crate::events::{GitHubEvent, PullRequestAction, PullRequestEvent, StatusEvent};
use crate::status::{apply_policy, StatusHandlerTable, StatusOutcome};

/// What handling one event amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Backported(BackportRunSummary),
    Status(StatusOutcome),
    /// A `ping` delivery.
    Acknowledged,
    /// The event is well-formed but asks for nothing.
    Ignored { reason: String },
}

impl DispatchOutcome {
    fn ignored(reason: impl Into<String>) -> Self {
        Self::Ignored {
            reason: reason.into(),
        }
    }
}

/// Host ports for one installation plus the bot configuration.
pub struct EventDispatcher<'a> {
    store: &'a dyn RemoteObjectStore,
    pulls: &'a dyn PullRequestSource,
    comments: &'a dyn IssueCommentSink,
    config: &'a BotConfig,
    statuses: StatusHandlerTable,
}

impl<'a> EventDispatcher<'a> {
    pub fn new(
        store: &'a dyn RemoteObjectStore,
        pulls: &'a dyn PullRequestSource,
        comments: &'a dyn IssueCommentSink,
        config: &'a BotConfig,
    ) -> Self {
        Self {
            store,
            pulls,
            comments,
            config,
            statuses: StatusHandlerTable::new(config.status_handlers.clone()),
        }
    }

    #[instrument(skip_all, fields(kind = event.kind()))]
    pub async fn dispatch(&self, event: GitHubEvent) -> Result<DispatchOutcome, ListenerError> {
        match event {
            GitHubEvent::PullRequest(pr) => self.pull_request(pr).await,
            GitHubEvent::Status(status) => self.status(status).await,
            GitHubEvent::Ping(_) => Ok(DispatchOutcome::Acknowledged),
            GitHubEvent::Unsupported { kind } => {
                debug!(%kind, "event kind not handled");
                Ok(DispatchOutcome::ignored(format!("{kind} events are not handled")))
            }
        }
    }

    async fn pull_request(&self, event: PullRequestEvent) -> Result<DispatchOutcome, ListenerError> {
        let naming = BranchNaming::new(&self.config.backport);
        let labels: Vec<String> = match &event.action {
            PullRequestAction::Labeled => {
                let Some(label) = event.label.filter(|l| naming.is_backport_label(l)) else {
                    return Ok(DispatchOutcome::ignored("label is not a backport label"));
                };
                if !event.merged {
                    return Ok(DispatchOutcome::ignored(
                        "pull request is not merged yet; backport runs on merge",
                    ));
                }
                vec![label]
            }
            PullRequestAction::Closed if event.merged => event
                .labels
                .into_iter()
                .filter(|l| naming.is_backport_label(l))
                .collect(),
            PullRequestAction::Closed => {
                return Ok(DispatchOutcome::ignored("pull request closed without merging"))
            }
            PullRequestAction::Other(action) => {
                return Ok(DispatchOutcome::ignored(format!(
                    "pull request action {action} is not handled"
                )))
            }
        };
        if labels.is_empty() {
            return Ok(DispatchOutcome::ignored("no backport labels"));
        }

        let original = self
            .pulls
            .get_pull_request(&event.repository, event.number)
            .await
            .map_err(|e| ListenerError::host(format!("read pull request #{}", event.number), e))?;

        let run_id = RunId::new_random();
        info!(%run_id, pr = %event.number, ?labels, "starting backports");
        let summary = BackportOrchestrator::new(self.store, self.comments, self.config)
            .run(run_id, &event.repository, &original, &labels)
            .await;
        Ok(DispatchOutcome::Backported(summary))
    }

    async fn status(&self, event: StatusEvent) -> Result<DispatchOutcome, ListenerError> {
        let Some(policy) = self.statuses.lookup(&event.context, &event.state) else {
            return Ok(DispatchOutcome::ignored(format!(
                "no handler for status ({}, {})",
                event.context, event.state
            )));
        };
        let outcome = apply_policy(
            policy,
            &event,
            self.pulls,
            self.comments,
            &self.config.report,
        )
        .await?;
        Ok(DispatchOutcome::Status(outcome))
    }
}
