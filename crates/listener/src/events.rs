//! The closed set of webhook events relbot understands.
//!
//! [`GitHubEvent::parse`] takes the `X-GitHub-Event` header value and the raw
//! JSON body. Event kinds relbot does not handle parse to
//! [`GitHubEvent::Unsupported`] instead of failing, so the caller can
//! acknowledge them.

use serde::Deserialize;

use backport::{CommitSha, InstallationId, PullRequestNumber, RepositoryRef};

use crate::error::ListenerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitHubEvent {
    PullRequest(PullRequestEvent),
    Status(StatusEvent),
    Ping(PingEvent),
    Unsupported { kind: String },
}

impl GitHubEvent {
    pub fn parse(kind: &str, payload: &[u8]) -> Result<Self, ListenerError> {
        let parse_err = |source| ListenerError::Payload {
            kind: kind.to_string(),
            source,
        };
        match kind {
            "pull_request" => {
                let raw: RawPullRequestEvent = serde_json::from_slice(payload).map_err(parse_err)?;
                Ok(Self::PullRequest(raw.into()))
            }
            "status" => {
                let raw: RawStatusEvent = serde_json::from_slice(payload).map_err(parse_err)?;
                Ok(Self::Status(raw.into_event().map_err(|e| ListenerError::Invalid {
                    kind: kind.to_string(),
                    message: e,
                })?))
            }
            "ping" => {
                let raw: RawPingEvent = serde_json::from_slice(payload).map_err(parse_err)?;
                Ok(Self::Ping(PingEvent {
                    zen: raw.zen,
                    hook_id: raw.hook_id,
                }))
            }
            other => Ok(Self::Unsupported {
                kind: other.to_string(),
            }),
        }
    }

    /// The app installation that sent the event, when there is one.
    pub fn installation(&self) -> Option<InstallationId> {
        match self {
            Self::PullRequest(e) => e.installation,
            Self::Status(e) => e.installation,
            Self::Ping(_) | Self::Unsupported { .. } => None,
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::PullRequest(_) => "pull_request",
            Self::Status(_) => "status",
            Self::Ping(_) => "ping",
            Self::Unsupported { kind } => kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullRequestAction {
    Labeled,
    Closed,
    Other(String),
}

impl From<String> for PullRequestAction {
    fn from(action: String) -> Self {
        match action.as_str() {
            "labeled" => Self::Labeled,
            "closed" => Self::Closed,
            _ => Self::Other(action),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestEvent {
    pub action: PullRequestAction,
    pub repository: RepositoryRef,
    pub number: PullRequestNumber,
    pub merged: bool,
    /// The label just added, for `labeled` actions.
    pub label: Option<String>,
    /// Every label on the pull request at delivery time.
    pub labels: Vec<String>,
    pub installation: Option<InstallationId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub repository: RepositoryRef,
    pub sha: CommitSha,
    pub context: String,
    pub state: String,
    pub target_url: Option<String>,
    pub commit_url: Option<String>,
    pub installation: Option<InstallationId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingEvent {
    pub zen: Option<String>,
    pub hook_id: Option<u64>,
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RawAccount {
    login: String,
}

#[derive(Deserialize)]
struct RawRepository {
    name: String,
    owner: RawAccount,
}

impl From<RawRepository> for RepositoryRef {
    fn from(raw: RawRepository) -> Self {
        RepositoryRef::new(raw.owner.login, raw.name)
    }
}

#[derive(Deserialize)]
struct RawInstallation {
    id: u64,
}

#[derive(Deserialize)]
struct RawLabel {
    name: String,
}

#[derive(Deserialize)]
struct RawPullRequest {
    number: u64,
    #[serde(default)]
    merged: bool,
    #[serde(default)]
    labels: Vec<RawLabel>,
}

#[derive(Deserialize)]
struct RawPullRequestEvent {
    action: String,
    pull_request: RawPullRequest,
    repository: RawRepository,
    label: Option<RawLabel>,
    installation: Option<RawInstallation>,
}

impl From<RawPullRequestEvent> for PullRequestEvent {
    fn from(raw: RawPullRequestEvent) -> Self {
        PullRequestEvent {
            action: raw.action.into(),
            repository: raw.repository.into(),
            number: PullRequestNumber::new(raw.pull_request.number),
            merged: raw.pull_request.merged,
            label: raw.label.map(|l| l.name),
            labels: raw.pull_request.labels.into_iter().map(|l| l.name).collect(),
            installation: raw.installation.map(|i| InstallationId::new(i.id)),
        }
    }
}

#[derive(Deserialize)]
struct RawCommit {
    html_url: Option<String>,
}

#[derive(Deserialize)]
struct RawStatusEvent {
    sha: String,
    context: String,
    state: String,
    target_url: Option<String>,
    commit: Option<RawCommit>,
    repository: RawRepository,
    installation: Option<RawInstallation>,
}

impl RawStatusEvent {
    fn into_event(self) -> Result<StatusEvent, String> {
        let sha = CommitSha::new(self.sha).ok_or_else(|| "empty sha".to_string())?;
        Ok(StatusEvent {
            repository: self.repository.into(),
            sha,
            context: self.context,
            state: self.state,
            target_url: self.target_url,
            commit_url: self.commit.and_then(|c| c.html_url),
            installation: self.installation.map(|i| InstallationId::new(i.id)),
        })
    }
}

#[derive(Deserialize)]
struct RawPingEvent {
    zen: Option<String>,
    hook_id: Option<u64>,
}
