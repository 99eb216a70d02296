//! relbot GitHub infrastructure adapter.
//!
//! Implements the host ports defined in the [`backport`] crate
//! (`RemoteObjectStore`, `PullRequestSource`, `IssueCommentSink`) against the
//! GitHub REST API using `reqwest`.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** This crate must not contain backport rules.
//! HTTP details (headers, pagination, status codes, authentication) are
//! handled here; the [`backport`] crate never sees them.
//!
//! ## Authentication
//!
//! Every request carries a bearer token obtained from a [`TokenProvider`].
//! A personal access token is served by [`StaticToken`]. GitHub App
//! installations use [`InstallationToken`], which reads from a shared
//! [`InstallationTokenCache`] that mints tokens through [`AppTokenIssuer`].

pub mod client;
pub mod error;
pub mod token;
mod wire;

pub use client::GithubClient;
pub use error::GithubError;
pub use token::{
    AppTokenIssuer, InstallationToken, InstallationTokenCache, IssuedToken, StaticToken,
    TokenIssuer, TokenProvider,
};

/// Public GitHub REST endpoint.
pub const DEFAULT_API_URL: &str = "https://api.github.com";
