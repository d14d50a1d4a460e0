use crate::config::{BranchSeparator, Config};
use crate::error::Result;
use crate::gitlab::{ChangeRequestStore, ManifestStore, MergeRequest, NewMergeRequest};
use crate::provider::Provider;

/// Labels attached to every merge request opened by tfdep.
pub const LABELS: [&str; 2] = ["dependencies", "terraform"];

/// Naming and idempotency policy for update branches and their merge requests.
///
/// The branch name doubles as the idempotency key: it is derived only from the
/// provider source and the target version, so re-runs find what earlier runs
/// created.
pub struct ChangeRequestPolicy {
    prefix: String,
    separator: BranchSeparator,
    base_branch: String,
}

impl ChangeRequestPolicy {
    pub fn new(
        prefix: impl Into<String>,
        separator: BranchSeparator,
        base_branch: impl Into<String>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            separator,
            base_branch: base_branch.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.branch_prefix.as_str(),
            config.branch_separator,
            config.base_branch.as_str(),
        )
    }

    pub fn base_branch(&self) -> &str {
        &self.base_branch
    }

    pub fn branch_name(&self, source: &str, latest_version: &str) -> String {
        format!(
            "{}/{}{}{}",
            self.prefix,
            source,
            self.separator.as_str(),
            latest_version
        )
    }

    pub fn title(source: &str, current_version: &str, latest_version: &str) -> String {
        format!("Bump {source} from version {current_version} > {latest_version}")
    }

    pub fn labels() -> String {
        LABELS.join(",")
    }

    /// Markdown body listing every release between the pinned and the latest version.
    ///
    /// Release links are added when the provider source resolves to a repository;
    /// a source that does not is not an error here.
    pub fn description(source: &str, provider: &Provider) -> Result<String> {
        let versions = provider.versions_after_current()?;
        let repository = provider.repository_coordinates().ok();

        let mut body = format!(
            "Bumps `{source}` from `{}` to `{}`.\n",
            provider.current_version, provider.latest_version
        );

        if !versions.is_empty() {
            body.push_str("\n### Releases\n\n");
            for version in versions {
                match &repository {
                    Some((owner, repo)) => body.push_str(&format!(
                        "- [v{version}](https://github.com/{owner}/{repo}/releases/tag/v{version})\n"
                    )),
                    None => body.push_str(&format!("- {version}\n")),
                }
            }
        }

        Ok(body)
    }

    pub fn new_request(&self, branch: &str, title: &str, description: String) -> NewMergeRequest {
        NewMergeRequest {
            source_branch: branch.to_string(),
            target_branch: self.base_branch.clone(),
            title: title.to_string(),
            labels: Self::labels(),
            description,
        }
    }

    /// Guard before opening an update: an existing branch means an earlier run
    /// already handled this version.
    pub fn update_already_requested(&self, store: &dyn ManifestStore, branch: &str) -> Result<bool> {
        store.branch_exists(branch)
    }

    /// Guard before cleanup: only an open request from exactly this branch that
    /// carries all tfdep labels is considered obsolete.
    pub fn find_obsolete(
        &self,
        store: &dyn ChangeRequestStore,
        branch: &str,
    ) -> Result<Option<MergeRequest>> {
        let candidates = store.list_open_requests(branch, &LABELS)?;
        Ok(candidates.into_iter().find(|request| {
            request.source_branch == branch
                && LABELS
                    .iter()
                    .all(|label| request.labels.iter().any(|l| l == label))
        }))
    }

    /// Close an obsolete request: the merge request goes first, then its branch.
    pub fn close(
        &self,
        manifests: &dyn ManifestStore,
        requests: &dyn ChangeRequestStore,
        request: &MergeRequest,
    ) -> Result<()> {
        requests.delete_request(request.iid)?;
        manifests.delete_branch(&request.source_branch)
    }
}
