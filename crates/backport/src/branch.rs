//! Mapping between backport labels and real branch names.
//!
//! Labels follow the `backport-21.1.x` convention while release branches are
//! named `release-21.1` (or occasionally just `21.1`). Resolution strips the
//! label prefix and the `.x` suffix, tries the bare name, then the
//! release-prefixed name.

use tracing::{debug, warn};

use crate::config::BackportSettings;
use crate::errors::{BackportError, HostError};
use crate::ports::RemoteObjectStore;
use crate::{BranchName, BranchPointer, PullRequestNumber, RepositoryRef};

/// Label and branch naming rules derived from [`BackportSettings`].
#[derive(Debug, Clone)]
pub struct BranchNaming {
    label_prefix: String,
    release_prefix: String,
    namespace: String,
}

impl BranchNaming {
    pub fn new(settings: &BackportSettings) -> Self {
        Self {
            label_prefix: settings.label_prefix.clone(),
            release_prefix: settings.release_branch_prefix.clone(),
            namespace: settings.branch_namespace.clone(),
        }
    }

    /// Whether `label` asks for a backport.
    pub fn is_backport_label(&self, label: &str) -> bool {
        label.len() > self.label_prefix.len() && label.starts_with(&self.label_prefix)
    }

    /// The branch a label refers to, before any lookup: label prefix and
    /// trailing `.x` removed. Plain branch names pass through unchanged.
    pub fn requested_branch<'l>(&self, label: &'l str) -> &'l str {
        let name = label.strip_prefix(&self.label_prefix).unwrap_or(label);
        name.strip_suffix(".x").unwrap_or(name)
    }

    /// Names to look up, in order.
    pub fn candidates(&self, label: &str) -> Vec<String> {
        let name = self.requested_branch(label);
        if name.is_empty() {
            return Vec::new();
        }
        vec![name.to_string(), format!("{}{}", self.release_prefix, name)]
    }

    /// The deterministic name of the branch a backport of `pr` onto `target`
    /// is built on. Re-running the same backport yields the same name.
    pub fn backport_branch(&self, target: &BranchName, pr: PullRequestNumber) -> BranchName {
        BranchName::from_formatted(format!("{}backport-{}-{}", self.namespace, target, pr))
    }

    /// Looks up the branch `label` refers to.
    ///
    /// Any failed lookup moves on to the next candidate. Resolution reports
    /// `TargetBranchNotFound` only when every candidate was `NotFound`;
    /// otherwise the last other host error is returned.
    pub async fn resolve(
        &self,
        store: &dyn RemoteObjectStore,
        repo: &RepositoryRef,
        label: &str,
    ) -> Result<BranchPointer, BackportError> {
        let candidates = self.candidates(label);
        let mut last_error: Option<BackportError> = None;
        for candidate in &candidates {
            let Some(name) = BranchName::new(candidate.as_str()) else {
                continue;
            };
            match store.get_branch(repo, &name).await {
                Ok(pointer) => return Ok(pointer),
                Err(HostError::NotFound(_)) => {
                    debug!(branch = %name, "candidate branch does not exist");
                }
                Err(e) => {
                    warn!(branch = %name, error = %e, "candidate branch lookup failed");
                    last_error = Some(BackportError::host(format!("get branch {name}"), e));
                }
            }
        }
        if let Some(error) = last_error {
            return Err(error);
        }
        let tried = if candidates.is_empty() {
            vec![label.to_string()]
        } else {
            candidates
        };
        Err(BackportError::TargetBranchNotFound { tried })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naming() -> BranchNaming {
        BranchNaming::new(&BackportSettings::default())
    }

    #[test]
    fn x_suffixed_label_tries_bare_then_release_branch() {
        assert_eq!(
            naming().candidates("backport-21.1.x"),
            vec!["21.1".to_string(), "release-21.1".to_string()]
        );
    }

    #[test]
    fn label_without_x_suffix_resolves_the_same_way() {
        assert_eq!(
            naming().candidates("backport-21.1"),
            vec!["21.1".to_string(), "release-21.1".to_string()]
        );
    }

    #[test]
    fn plain_branch_names_pass_through() {
        assert_eq!(naming().requested_branch("release-22.2"), "release-22.2");
        assert_eq!(naming().requested_branch("22.2.x"), "22.2");
    }

    #[test]
    fn bare_prefix_is_not_a_backport_label() {
        let n = naming();
        assert!(n.is_backport_label("backport-21.1.x"));
        assert!(!n.is_backport_label("backport-"));
        assert!(!n.is_backport_label("bug"));
        assert!(n.candidates("backport-").is_empty());
    }

    #[test]
    fn backport_branch_name_is_deterministic() {
        let n = naming();
        let target = BranchName::new("release-21.1").unwrap();
        let first = n.backport_branch(&target, PullRequestNumber::new(100));
        let second = n.backport_branch(&target, PullRequestNumber::new(100));
        assert_eq!(first, second);
        assert_eq!(first.as_str(), "relbot/backport-release-21.1-100");
    }
}
