//! relbot trigger surface.
//!
//! Turns GitHub webhook deliveries into backport runs:
//!
//! - [`GitHubEvent`]: the closed set of events relbot understands, parsed
//!   from the `X-GitHub-Event` name and the JSON body.
//! - [`EventDispatcher`]: an explicit `match` over that set. Merged pull
//!   requests with `backport-*` labels go to the
//!   [`backport::BackportOrchestrator`]; commit statuses go through the
//!   [`StatusHandlerTable`].
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Payload shapes live here. Dispatch talks to the host
//! only through the [`backport`] port traits, so the same code runs against
//! GitHub and against `backport::fakes::InMemoryHost`.

pub mod dispatch;
pub mod error;
pub mod events;
pub mod status;

pub use dispatch::{DispatchOutcome, EventDispatcher};
pub use error::ListenerError;
pub use events::{GitHubEvent, PingEvent, PullRequestAction, PullRequestEvent, StatusEvent};
pub use status::{apply_policy, StatusHandlerTable, StatusOutcome};
