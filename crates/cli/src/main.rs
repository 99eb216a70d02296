//! relbot CLI entry point.
//!
//! This binary is the composition root. Responsibilities:
//!
//! 1. **Parse configuration**: load the optional TOML file and validate it.
//! 2. **Wire observability**: install `tracing-subscriber` with a JSON or
//!    pretty formatter and, when an endpoint is given, an OpenTelemetry OTLP
//!    exporter. Spans from every crate in the workspace flow through it.
//! 3. **Construct infrastructure**: build a `GithubClient` for the right
//!    credential and hand it to the domain as port trait objects.
//! 4. **Select the trigger**:
//!    - `backport`: run the orchestrator for one pull request directly.
//!    - `handle-event`: parse one webhook delivery and dispatch it.

mod settings;
mod telemetry;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::io::AsyncReadExt;
use tracing::{error, info, info_span, warn, Instrument};

use backport::{
    BackportOrchestrator, BackportRunSummary, BotConfig, BranchNaming, DeliveryId, InstallationId,
    PullRequestNumber, PullRequestSource, RepositoryRef, RunId,
};
use github::GithubClient;
use listener::{DispatchOutcome, EventDispatcher, GitHubEvent};

use settings::{Credentials, GithubArgs};
use telemetry::LogFormat;

#[derive(Debug, Parser)]
#[command(name = "relbot", version, about = "Backports merged pull requests onto release branches")]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(long, env = "RELBOT_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, env = "RELBOT_LOG_FORMAT", default_value_t = LogFormat::Pretty, global = true)]
    log_format: LogFormat,

    /// OTLP/gRPC endpoint for span export, e.g. `http://localhost:4317`.
    #[arg(long, env = "RELBOT_OTLP_ENDPOINT", global = true)]
    otlp_endpoint: Option<String>,

    #[command(flatten)]
    github: GithubArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Backport one merged pull request.
    Backport {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        repo: String,
        #[arg(long)]
        pr: u64,
        /// Backport labels or branch names. Defaults to the pull request's
        /// own backport labels.
        #[arg(long = "label")]
        labels: Vec<String>,
        /// App installation to act as.
        #[arg(long)]
        installation: Option<u64>,
    },
    /// Handle one webhook delivery.
    HandleEvent {
        /// Value of the `X-GitHub-Event` header.
        #[arg(long)]
        event: String,
        /// File holding the JSON body, or `-` for stdin.
        #[arg(long)]
        payload: PathBuf,
        /// Value of the `X-GitHub-Delivery` header, for log correlation.
        #[arg(long)]
        delivery: Option<String>,
        /// Overrides the installation named in the payload.
        #[arg(long)]
        installation: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _telemetry = telemetry::init(cli.log_format, cli.otlp_endpoint.as_deref())?;

    let config = settings::load_config(cli.config.as_deref()).await?;
    let credentials = Credentials::load(&cli.github).await?;

    match cli.command {
        Command::Backport {
            owner,
            repo,
            pr,
            labels,
            installation,
        } => {
            let repo = RepositoryRef::new(owner, repo);
            let client = client_for(&credentials, installation.map(InstallationId::new))?;
            let summary = backport(&client, &config, &repo, PullRequestNumber::new(pr), labels).await?;
            report_summary(&summary)
        }
        Command::HandleEvent {
            event,
            payload,
            delivery,
            installation,
        } => {
            let body = read_payload(&payload).await?;
            let event = GitHubEvent::parse(&event, &body)?;
            let installation = installation.map(InstallationId::new).or(event.installation());
            let delivery = delivery.and_then(|d| DeliveryId::new(d));
            let span = info_span!(
                "delivery",
                id = delivery.as_ref().map(DeliveryId::as_str).unwrap_or("-"),
                kind = event.kind()
            );
            handle_event(&credentials, &config, event, installation)
                .instrument(span)
                .await
        }
    }
}

async fn handle_event(
    credentials: &Credentials,
    config: &BotConfig,
    event: GitHubEvent,
    installation: Option<InstallationId>,
) -> anyhow::Result<()> {
    let client = client_for(credentials, installation)?;
    let outcome = EventDispatcher::new(&client, &client, &client, config)
        .dispatch(event)
        .await?;
    match outcome {
        DispatchOutcome::Backported(summary) => report_summary(&summary),
        DispatchOutcome::Status(status) => {
            info!(pr = ?status.pull_request, delivery = ?status.delivery, "status handled");
            Ok(())
        }
        DispatchOutcome::Acknowledged => {
            info!("ping acknowledged");
            Ok(())
        }
        DispatchOutcome::Ignored { reason } => {
            info!(%reason, "event ignored");
            Ok(())
        }
    }
}

fn client_for(credentials: &Credentials, installation: Option<InstallationId>) -> anyhow::Result<GithubClient> {
    let tokens = credentials.provider(installation)?;
    Ok(GithubClient::new(credentials.api_url(), tokens)?)
}

async fn backport(
    client: &GithubClient,
    config: &BotConfig,
    repo: &RepositoryRef,
    pr: PullRequestNumber,
    labels: Vec<String>,
) -> anyhow::Result<BackportRunSummary> {
    let original = client
        .get_pull_request(repo, pr)
        .await
        .with_context(|| format!("failed to read {repo}#{pr}"))?;
    let labels = if labels.is_empty() {
        let naming = BranchNaming::new(&config.backport);
        original
            .labels
            .iter()
            .filter(|l| naming.is_backport_label(l))
            .cloned()
            .collect()
    } else {
        labels
    };
    if labels.is_empty() {
        bail!("{repo}#{pr} has no backport labels; pass --label");
    }
    if !original.merged {
        warn!(%pr, "pull request is not merged; backporting its current commits");
    }
    Ok(BackportOrchestrator::new(client, client, config)
        .run(RunId::new_random(), repo, &original, &labels)
        .await)
}

/// Logs each outcome. Fails when any branch failed or the report could not
/// be delivered, so the exit status reflects the run.
fn report_summary(summary: &BackportRunSummary) -> anyhow::Result<()> {
    for outcome in &summary.outcomes {
        match &outcome.result {
            Ok(done) => info!(label = %outcome.label, pr = %done.number, branch = %done.backport_branch, "backport opened"),
            Err(failure) => error!(label = %outcome.label, error = %failure, "backport failed"),
        }
    }
    if let Err(e) = &summary.report {
        bail!("backport report could not be posted: {e}");
    }
    let failed = summary.failures().count();
    if failed > 0 {
        bail!("{failed} of {} backports failed (run {})", summary.outcomes.len(), summary.run_id);
    }
    Ok(())
}

async fn read_payload(path: &Path) -> anyhow::Result<Vec<u8>> {
    if path.as_os_str() == "-" {
        let mut body = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut body)
            .await
            .context("failed to read payload from stdin")?;
        return Ok(body);
    }
    tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn backport_accepts_repeated_labels() {
        let cli = Cli::try_parse_from([
            "relbot",
            "--github-token",
            "t",
            "backport",
            "--owner",
            "acme",
            "--repo",
            "db",
            "--pr",
            "100",
            "--label",
            "backport-21.1.x",
            "--label",
            "backport-20.2.x",
        ])
        .unwrap();
        let Command::Backport { pr, labels, .. } = cli.command else {
            panic!("expected the backport subcommand");
        };
        assert_eq!(pr, 100);
        assert_eq!(labels.len(), 2);
    }

    #[test]
    fn app_id_requires_a_private_key() {
        let result = Cli::try_parse_from([
            "relbot",
            "--github-app-id",
            "12",
            "handle-event",
            "--event",
            "ping",
            "--payload",
            "-",
        ]);
        assert!(result.is_err());
    }
}
