//! Configuration file and GitHub credentials.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Args;

use backport::{BotConfig, InstallationId};
use github::{
    AppTokenIssuer, InstallationToken, InstallationTokenCache, StaticToken, TokenProvider,
};

/// Parses and validates a TOML configuration document.
pub fn parse_config(text: &str) -> anyhow::Result<BotConfig> {
    let config: BotConfig = toml::from_str(text).context("invalid configuration file")?;
    config.validate()?;
    Ok(config)
}

/// Loads the configuration file, or the defaults when no file is given.
pub async fn load_config(path: Option<&Path>) -> anyhow::Result<BotConfig> {
    let Some(path) = path else {
        return Ok(BotConfig::default());
    };
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_config(&text).with_context(|| format!("in {}", path.display()))
}

#[derive(Debug, Clone, Args)]
pub struct GithubArgs {
    /// GitHub REST API base URL.
    #[arg(long = "github-api-url", env = "RELBOT_GITHUB_API_URL", default_value = github::DEFAULT_API_URL)]
    pub api_url: String,

    /// Personal access token. Used when no app credentials are given.
    #[arg(long = "github-token", env = "RELBOT_GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// GitHub App ID.
    #[arg(long = "github-app-id", env = "RELBOT_GITHUB_APP_ID", requires = "private_key_path")]
    pub app_id: Option<u64>,

    /// PEM file holding the GitHub App private key.
    #[arg(long = "github-private-key-path", env = "RELBOT_GITHUB_PRIVATE_KEY_PATH")]
    pub private_key_path: Option<PathBuf>,
}

/// App credentials, once loaded.
pub struct Credentials {
    api_url: String,
    token: Option<String>,
    app: Option<Arc<InstallationTokenCache>>,
}

impl Credentials {
    pub async fn load(args: &GithubArgs) -> anyhow::Result<Self> {
        let app = match (&args.app_id, &args.private_key_path) {
            (Some(app_id), Some(key_path)) => {
                let pem = tokio::fs::read(key_path)
                    .await
                    .with_context(|| format!("failed to read {}", key_path.display()))?;
                let issuer = AppTokenIssuer::new(args.api_url.clone(), *app_id, &pem)
                    .context("invalid GitHub App private key")?;
                Some(Arc::new(InstallationTokenCache::new(Arc::new(issuer))))
            }
            _ => None,
        };
        if app.is_none() && args.token.is_none() {
            bail!("no GitHub credentials: set RELBOT_GITHUB_TOKEN or RELBOT_GITHUB_APP_ID and RELBOT_GITHUB_PRIVATE_KEY_PATH");
        }
        Ok(Self {
            api_url: args.api_url.clone(),
            token: args.token.clone(),
            app,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Token source for calls on behalf of `installation`. App credentials
    /// win when both an installation and app credentials are present.
    pub fn provider(&self, installation: Option<InstallationId>) -> anyhow::Result<Arc<dyn TokenProvider>> {
        match (&self.app, installation, &self.token) {
            (Some(cache), Some(id), _) => Ok(Arc::new(InstallationToken::new(cache.clone(), id))),
            (_, _, Some(token)) => Ok(Arc::new(StaticToken::new(token.clone()))),
            (Some(_), None, None) => {
                bail!("GitHub App credentials need an installation id (--installation or the event payload)")
            }
            (None, _, None) => bail!("no GitHub credentials configured"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backport::StatusPolicy;

    #[test]
    fn empty_file_yields_defaults() {
        assert_eq!(parse_config("").unwrap(), BotConfig::default());
    }

    #[test]
    fn file_overrides_selected_fields() {
        let config = parse_config(
            r#"
            [backport]
            branch_namespace = "bots/"
            cc_team = "acme/release-eng"

            [[status_handlers]]
            context = "ci/build"
            state = "failure"
            policy = "comment_build_failure"
            "#,
        )
        .unwrap();
        assert_eq!(config.backport.branch_namespace, "bots/");
        assert_eq!(config.backport.label_prefix, "backport-");
        assert_eq!(config.backport.cc_team.as_deref(), Some("acme/release-eng"));
        assert_eq!(config.status_handlers[0].policy, StatusPolicy::CommentBuildFailure);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(parse_config("[backport]\nlabel_prefx = \"bp-\"\n").is_err());
    }

    #[test]
    fn invalid_values_fail_validation() {
        let err = parse_config("[backport]\nlabel_prefix = \"\"\n").unwrap_err();
        assert!(format!("{err:#}").contains("label_prefix"));
    }

    fn token_only() -> Credentials {
        Credentials {
            api_url: github::DEFAULT_API_URL.to_string(),
            token: Some("ghp_x".to_string()),
            app: None,
        }
    }

    #[tokio::test]
    async fn personal_token_serves_any_installation() {
        let creds = token_only();
        let provider = creds.provider(Some(InstallationId::new(4))).unwrap();
        assert_eq!(provider.token().await.unwrap(), "ghp_x");
    }

    #[test]
    fn missing_credentials_are_reported() {
        let creds = Credentials {
            api_url: github::DEFAULT_API_URL.to_string(),
            token: None,
            app: None,
        };
        assert!(creds.provider(None).is_err());
    }
}
