//! Bot configuration.
//!
//! Every field has a default, so an empty document is a valid configuration.
//! The binary deserialises this from an optional TOML file and calls
//! [`BotConfig::validate`] before doing anything else.

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BotConfig {
    pub backport: BackportSettings,
    pub report: ReportSettings,
    /// Ordered `(status context, state) → policy` table. The first matching
    /// entry wins; a status with no entry is ignored.
    pub status_handlers: Vec<StatusHandlerEntry>,
}

impl BotConfig {
    /// Rejects configurations the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let b = &self.backport;
        if b.label_prefix.is_empty() {
            return Err(ConfigError::new("backport.label_prefix must not be empty"));
        }
        if b.release_branch_prefix.is_empty() {
            return Err(ConfigError::new(
                "backport.release_branch_prefix must not be empty",
            ));
        }
        if b.branch_namespace.is_empty() || b.branch_namespace.starts_with('/') {
            return Err(ConfigError::new(
                "backport.branch_namespace must be a non-empty relative ref prefix",
            ));
        }
        if self.report.bot_login.is_empty() {
            return Err(ConfigError::new("report.bot_login must not be empty"));
        }
        for (i, entry) in self.status_handlers.iter().enumerate() {
            if entry.context.is_empty() || entry.state.is_empty() {
                return Err(ConfigError::new(format!(
                    "status_handlers[{i}] needs both a context and a state"
                )));
            }
        }
        Ok(())
    }
}

/// How labels map to branches and how backport branches are named.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackportSettings {
    /// Labels starting with this prefix request a backport (`backport-21.1.x`).
    pub label_prefix: String,
    /// Prefix tried when the bare branch name does not exist (`release-21.1`).
    pub release_branch_prefix: String,
    /// Namespace for created branches: `<namespace>backport-<target>-<pr>`.
    pub branch_namespace: String,
    /// Manual fallback tool linked from the failure report.
    pub manual_tool_url: String,
    /// Team mentioned in the body of every backport pull request.
    pub cc_team: Option<String>,
}

impl Default for BackportSettings {
    fn default() -> Self {
        Self {
            label_prefix: "backport-".to_string(),
            release_branch_prefix: "release-".to_string(),
            branch_namespace: "relbot/".to_string(),
            manual_tool_url: "https://github.com/benesch/backport".to_string(),
            cc_team: None,
        }
    }
}

/// Identity used when posting and deduplicating comments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReportSettings {
    /// Login the bot posts as. Comments by this login mark the end of the
    /// window searched for duplicates.
    pub bot_login: String,
    /// Footer appended to every comment.
    pub signature: String,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            bot_login: "relbot[bot]".to_string(),
            signature: "<sub>I am relbot, the release-branch backport bot.</sub>".to_string(),
        }
    }
}

/// One row of the status-handler table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusHandlerEntry {
    /// Commit status context, e.g. `"ci/build"`.
    pub context: String,
    /// Commit status state: `"failure"`, `"error"`, `"success"` or `"pending"`.
    pub state: String,
    pub policy: StatusPolicy,
}

/// What to do when a configured commit status arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusPolicy {
    /// Comment on the open pull request whose head is the status commit.
    CommentBuildFailure,
}
