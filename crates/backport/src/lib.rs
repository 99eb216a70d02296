//! Core backport domain for relbot.
//!
//! This crate contains the remote cherry-pick engine, the orchestrator that
//! runs it once per requested release branch, and every type and port trait
//! they share. Infrastructure crates implement the ports; they never add
//! backport rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* the remote host must provide; the `github` crate defines
//! *how*.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`CommitSha`, `BranchName`, etc.) |
//! | [`types`] | Shared value types (`CommitRecord`, `BranchPointer`, etc.) |
//! | [`errors`] | Host, session and configuration errors |
//! | [`ports`] | Traits the remote host adapter implements |
//! | [`config`] | Bot configuration |
//! | [`branch`] | Label to branch resolution and backport branch naming |
//! | [`engine`] | The cherry-pick session |
//! | [`orchestrator`] | Per-branch fan-out and failure reporting |
//! | [`report`] | Consolidated comment builder |
//! | [`fakes`] | In-memory host for tests |

pub mod branch;
pub mod config;
pub mod engine;
pub mod errors;
pub mod fakes;
pub mod identifiers;
pub mod orchestrator;
pub mod ports;
pub mod report;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use branch::BranchNaming;
pub use config::{BackportSettings, BotConfig, ReportSettings, StatusHandlerEntry, StatusPolicy};
pub use engine::{BackportedPullRequest, CherryPickEngine, SessionFailure, SessionStage};
pub use errors::{BackportError, ConfigError, HostError, HostResult};
pub use identifiers::{
    BranchName, CommitSha, DeliveryId, InstallationId, PullRequestNumber, RunId, TeamSlug,
    TreeSha, UserLogin,
};
pub use orchestrator::{BackportOrchestrator, BackportRunSummary, LabelOutcome};
pub use ports::{IssueCommentSink, PullRequestSource, RemoteObjectStore};
pub use report::{ReportBuilder, ReportDelivery};
pub use types::{
    BranchPointer, CommitAuthor, CommitRecord, CreatedCommit, IssueComment, MergedCommit,
    NewCommit, NewPullRequest, OpenPullRequest, OriginalPullRequest, RepositoryRef, Timestamp,
};
