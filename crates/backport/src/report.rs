//! Consolidated pull-request comments.
//!
//! A [`ReportBuilder`] collects paragraphs and reviewer logins while an event
//! is handled and posts them as a single comment at the end. `finish`
//! consumes the builder, so a report is flushed at most once.

use std::collections::BTreeSet;
use std::fmt;

use tracing::{debug, info};

use crate::config::ReportSettings;
use crate::errors::HostResult;
use crate::ports::IssueCommentSink;
use crate::{PullRequestNumber, RepositoryRef, UserLogin};

/// What [`ReportBuilder::finish`] ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportDelivery {
    /// Nothing was appended; nothing was posted.
    Empty,
    /// An identical comment is already the most recent one from the bot.
    Duplicate,
    Posted,
}

/// Append-only accumulator for one comment.
#[derive(Debug, Clone)]
pub struct ReportBuilder {
    repo: RepositoryRef,
    number: PullRequestNumber,
    paragraphs: Vec<String>,
    reviewers: BTreeSet<UserLogin>,
    must_comment: bool,
}

impl ReportBuilder {
    pub fn new(repo: RepositoryRef, number: PullRequestNumber) -> Self {
        Self {
            repo,
            number,
            paragraphs: Vec::new(),
            reviewers: BTreeSet::new(),
            must_comment: false,
        }
    }

    pub fn append_paragraph(&mut self, paragraph: impl Into<String>) -> &mut Self {
        self.paragraphs.push(paragraph.into());
        self
    }

    /// Appends a paragraph built with `format_args!`.
    pub fn append_paragraph_fmt(&mut self, args: fmt::Arguments<'_>) -> &mut Self {
        self.paragraphs.push(args.to_string());
        self
    }

    /// Queues a review request, sent after the comment is posted.
    pub fn add_reviewer(&mut self, reviewer: UserLogin) -> &mut Self {
        self.reviewers.insert(reviewer);
        self
    }

    /// Posts even when an identical comment is already the bot's latest.
    pub fn set_must_comment(&mut self, must: bool) -> &mut Self {
        self.must_comment = must;
        self
    }

    /// The comment body, or `None` when nothing was appended.
    pub fn render(&self, signature: &str) -> Option<String> {
        if self.paragraphs.is_empty() {
            return None;
        }
        let mut parts: Vec<&str> = self.paragraphs.iter().map(String::as_str).collect();
        if !signature.is_empty() {
            parts.push(signature);
        }
        Some(parts.join("\n\n"))
    }

    /// Posts the comment and requests any queued reviewers.
    pub async fn finish(
        self,
        sink: &dyn IssueCommentSink,
        settings: &ReportSettings,
    ) -> HostResult<ReportDelivery> {
        let Some(body) = self.render(&settings.signature) else {
            return Ok(ReportDelivery::Empty);
        };

        if !self.must_comment
            && self.has_most_recent_comment(sink, &body, &settings.bot_login).await?
        {
            info!(pr = %self.number, "identical comment already posted recently; skipping");
            return Ok(ReportDelivery::Duplicate);
        }

        sink.create_comment(&self.repo, self.number, &body).await?;
        debug!(pr = %self.number, paragraphs = self.paragraphs.len(), "comment posted");

        if !self.reviewers.is_empty() {
            let reviewers: Vec<UserLogin> = self.reviewers.into_iter().collect();
            sink.add_reviewers(&self.repo, self.number, &reviewers).await?;
        }
        Ok(ReportDelivery::Posted)
    }

    /// Scans comments newest-first for `body`, stopping at the bot's own most
    /// recent comment.
    async fn has_most_recent_comment(
        &self,
        sink: &dyn IssueCommentSink,
        body: &str,
        bot_login: &str,
    ) -> HostResult<bool> {
        let comments = sink.list_recent_comments(&self.repo, self.number).await?;
        for comment in comments {
            if comment.body == body {
                return Ok(true);
            }
            if comment.author.as_str() == bot_login {
                return Ok(false);
            }
        }
        Ok(false)
    }
}
