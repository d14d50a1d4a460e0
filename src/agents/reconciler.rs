use crate::agents::ChangeRequestPolicy;
use crate::config::Config;
use crate::error::Result;
use crate::gitlab::{ChangeRequestStore, CommitAction, ManifestStore};
use crate::manifest::{PatchOutcome, ProviderEntry, patch_provider_version};
use crate::provider::Provider;
use crate::registry::RegistryClient;
use tracing::{error, info, warn};

/// What happened to a single provider during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Pinned version is the latest and nothing was left to clean up.
    UpToDate,
    ClosedObsolete { iid: u64 },
    WouldClose { iid: u64 },
    /// The update branch already exists.
    Skipped { branch: String },
    Bumped { branch: String, iid: u64 },
    WouldBump { branch: String },
    /// The manifest holds no `source`/`version` pair matching the provider.
    PatchNotApplied,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderReport {
    pub key: String,
    pub source: String,
    pub current_version: String,
    pub latest_version: Option<String>,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub reports: Vec<ProviderReport>,
}

impl RunSummary {
    pub fn count(&self, predicate: impl Fn(&Outcome) -> bool) -> usize {
        self.reports.iter().filter(|r| predicate(&r.outcome)).count()
    }

    pub fn has_failures(&self) -> bool {
        self.count(|o| matches!(o, Outcome::Failed(_))) > 0
    }
}

/// Drives each declared provider to its desired state: an open update request
/// when outdated, no stale request when current.
pub struct Reconciler<'a> {
    registry: &'a dyn RegistryClient,
    manifests: &'a dyn ManifestStore,
    requests: &'a dyn ChangeRequestStore,
    policy: ChangeRequestPolicy,
    manifest_path: String,
    dry_run: bool,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        registry: &'a dyn RegistryClient,
        manifests: &'a dyn ManifestStore,
        requests: &'a dyn ChangeRequestStore,
        config: &Config,
    ) -> Self {
        Self {
            registry,
            manifests,
            requests,
            policy: ChangeRequestPolicy::from_config(config),
            manifest_path: config.manifest_path.clone(),
            dry_run: false,
        }
    }

    /// Log mutations instead of performing them.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Reconcile every provider in turn. A failing provider is recorded and
    /// the run moves on to the next one.
    pub fn reconcile_all(&self, manifest: &str, entries: &[ProviderEntry]) -> RunSummary {
        let mut summary = RunSummary::default();

        for entry in entries {
            let mut latest_version = None;
            let outcome = match self.evaluate(entry) {
                Ok(provider) => {
                    latest_version = Some(provider.latest_version.clone());
                    self.reconcile(manifest, entry, &provider)
                }
                Err(e) => Err(e),
            };

            let outcome = outcome.unwrap_or_else(|e| {
                error!(provider = %entry.source, error = %e, "Failed to reconcile provider");
                Outcome::Failed(e.to_string())
            });

            summary.reports.push(ProviderReport {
                key: entry.key.clone(),
                source: entry.source.clone(),
                current_version: entry.version.clone(),
                latest_version,
                outcome,
            });
        }

        summary
    }

    /// Look the provider up in the registry.
    pub fn evaluate(&self, entry: &ProviderEntry) -> Result<Provider> {
        info!(provider = %entry.source, current = %entry.version, "Evaluating provider");
        let registry = self.registry.get_provider(&entry.source)?;
        Ok(Provider::new(registry, entry.version.as_str()))
    }

    pub fn reconcile(
        &self,
        manifest: &str,
        entry: &ProviderEntry,
        provider: &Provider,
    ) -> Result<Outcome> {
        let branch = self
            .policy
            .branch_name(&entry.source, &provider.latest_version);

        if provider.is_latest() {
            self.reconcile_obsolete(entry, &branch)
        } else {
            self.reconcile_update(manifest, entry, provider, &branch)
        }
    }

    fn reconcile_obsolete(&self, entry: &ProviderEntry, branch: &str) -> Result<Outcome> {
        info!(
            provider = %entry.source,
            version = %entry.version,
            "Latest version pinned, checking for obsolete merge requests"
        );

        let Some(request) = self.policy.find_obsolete(self.requests, branch)? else {
            return Ok(Outcome::UpToDate);
        };

        if self.dry_run {
            info!(iid = request.iid, %branch, "Dry run: would close obsolete merge request");
            return Ok(Outcome::WouldClose { iid: request.iid });
        }

        info!(
            iid = request.iid,
            title = %request.title,
            "Found obsolete merge request, closing it and deleting its branch"
        );
        self.policy.close(self.manifests, self.requests, &request)?;
        Ok(Outcome::ClosedObsolete { iid: request.iid })
    }

    fn reconcile_update(
        &self,
        manifest: &str,
        entry: &ProviderEntry,
        provider: &Provider,
        branch: &str,
    ) -> Result<Outcome> {
        if self.policy.update_already_requested(self.manifests, branch)? {
            info!(%branch, "Skipping update, merge request branch already exists");
            return Ok(Outcome::Skipped {
                branch: branch.to_string(),
            });
        }

        info!(
            provider = %provider.name,
            source = %entry.source,
            from = %provider.current_version,
            to = %provider.latest_version,
            "Provider is outdated, bumping version"
        );

        let title = ChangeRequestPolicy::title(
            &entry.source,
            &provider.current_version,
            &provider.latest_version,
        );
        let description = ChangeRequestPolicy::description(&entry.source, provider)?;

        let patched = match patch_provider_version(
            manifest,
            &entry.source,
            &provider.current_version,
            &provider.latest_version,
        )? {
            PatchOutcome::Patched(text) => text,
            PatchOutcome::NoMatch => {
                warn!(
                    provider = %entry.source,
                    version = %provider.current_version,
                    path = %self.manifest_path,
                    "No source/version pair found in manifest, nothing to commit"
                );
                return Ok(Outcome::PatchNotApplied);
            }
        };

        if self.dry_run {
            info!(%branch, %title, "Dry run: would create branch and merge request");
            return Ok(Outcome::WouldBump {
                branch: branch.to_string(),
            });
        }

        let commit = self.manifests.create_commit(
            branch,
            self.policy.base_branch(),
            &title,
            &[CommitAction::update(self.manifest_path.as_str(), patched)],
        )?;
        info!(%branch, commit = %commit.id, "Created update branch");

        let request = match self
            .requests
            .create_request(&self.policy.new_request(branch, &title, description))
        {
            Ok(request) => request,
            Err(e) => {
                // No update branch may outlive a merge request that failed to open.
                warn!(%branch, error = %e, "Merge request creation failed, removing update branch");
                if let Err(cleanup) = self.manifests.delete_branch(branch) {
                    error!(%branch, error = %cleanup, "Failed to remove update branch");
                }
                return Err(e);
            }
        };
        info!(iid = request.iid, %title, "Opened merge request");

        Ok(Outcome::Bumped {
            branch: branch.to_string(),
            iid: request.iid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BranchSeparator;
    use crate::error::TfdepError;
    use crate::gitlab::{CommitRef, MergeRequest, NewMergeRequest};
    use crate::registry::RegistryProvider;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Mutex;
    use std::time::Duration;

    const MANIFEST: &str = r#"terraform {
  required_providers {
    aws = {
      source  = "hashicorp/aws"
      version = "4.0.0"
    }
    random = {
      source  = "hashicorp/random"
      version = "3.4.3"
    }
  }
}
"#;

    struct FakeRegistry {
        providers: HashMap<String, RegistryProvider>,
    }

    impl FakeRegistry {
        fn new(providers: &[(&str, &str, &str)]) -> Self {
            let providers = providers
                .iter()
                .map(|(source, latest, versions)| {
                    let (namespace, name) = source.split_once('/').unwrap();
                    (
                        source.to_string(),
                        RegistryProvider {
                            name: name.to_string(),
                            namespace: namespace.to_string(),
                            version: latest.to_string(),
                            source: format!("https://github.com/{namespace}/terraform-provider-{name}"),
                            versions: versions.split_whitespace().map(str::to_string).collect(),
                        },
                    )
                })
                .collect();
            Self { providers }
        }
    }

    impl RegistryClient for FakeRegistry {
        fn get_provider(&self, source: &str) -> Result<RegistryProvider> {
            self.providers
                .get(source)
                .cloned()
                .ok_or_else(|| TfdepError::Registry(format!("GET {source} returned HTTP 404")))
        }
    }

    /// In-memory GitLab project recording every mutating call in order.
    #[derive(Default)]
    struct FakeGitLab {
        branches: Mutex<BTreeMap<String, String>>,
        requests: Mutex<Vec<MergeRequest>>,
        calls: Mutex<Vec<String>>,
        next_iid: Mutex<u64>,
        reject_requests: bool,
    }

    impl FakeGitLab {
        fn rejecting_requests(mut self) -> Self {
            self.reject_requests = true;
            self
        }

        fn with_branch(self, name: &str) -> Self {
            self.branches
                .lock()
                .unwrap()
                .insert(name.to_string(), String::new());
            self
        }

        fn with_request(self, iid: u64, branch: &str, labels: &str) -> Self {
            self.requests.lock().unwrap().push(MergeRequest {
                iid,
                title: "Bump".to_string(),
                source_branch: branch.to_string(),
                labels: labels.split_whitespace().map(str::to_string).collect(),
            });
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn branch_content(&self, name: &str) -> Option<String> {
            self.branches.lock().unwrap().get(name).cloned()
        }
    }

    impl ManifestStore for FakeGitLab {
        fn fetch_file(&self, _path: &str, _git_ref: &str) -> Result<Vec<u8>> {
            Ok(MANIFEST.as_bytes().to_vec())
        }

        fn create_commit(
            &self,
            branch: &str,
            start_ref: &str,
            message: &str,
            actions: &[CommitAction],
        ) -> Result<CommitRef> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("commit {branch} from {start_ref}: {message}"));
            self.branches
                .lock()
                .unwrap()
                .insert(branch.to_string(), actions[0].content.clone());
            Ok(CommitRef {
                id: "abc123".to_string(),
            })
        }

        fn branch_exists(&self, name: &str) -> Result<bool> {
            Ok(self.branches.lock().unwrap().contains_key(name))
        }

        fn delete_branch(&self, name: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("delete branch {name}"));
            self.branches.lock().unwrap().remove(name);
            Ok(())
        }
    }

    impl ChangeRequestStore for FakeGitLab {
        fn list_open_requests(
            &self,
            source_branch: &str,
            _labels: &[&str],
        ) -> Result<Vec<MergeRequest>> {
            Ok(self
                .requests
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.source_branch == source_branch)
                .cloned()
                .collect())
        }

        fn create_request(&self, request: &NewMergeRequest) -> Result<MergeRequest> {
            self.calls.lock().unwrap().push(format!(
                "open {} -> {}: {} [{}]",
                request.source_branch, request.target_branch, request.title, request.labels
            ));
            if self.reject_requests {
                return Err(TfdepError::Backend(
                    "POST merge_requests returned HTTP 500".to_string(),
                ));
            }
            let mut next = self.next_iid.lock().unwrap();
            *next += 1;
            let created = MergeRequest {
                iid: *next,
                title: request.title.clone(),
                source_branch: request.source_branch.clone(),
                labels: request.labels.split(',').map(str::to_string).collect(),
            };
            self.requests.lock().unwrap().push(created.clone());
            Ok(created)
        }

        fn delete_request(&self, iid: u64) -> Result<()> {
            self.calls.lock().unwrap().push(format!("delete request {iid}"));
            self.requests.lock().unwrap().retain(|r| r.iid != iid);
            Ok(())
        }
    }

    fn config() -> Config {
        Config {
            registry_url: "https://registry.terraform.io/v1".to_string(),
            gitlab_url: "https://gitlab.com".to_string(),
            project: "group/infra".to_string(),
            base_branch: "master".to_string(),
            token: None,
            manifest_path: "versions.tf".to_string(),
            branch_prefix: "tfdep".to_string(),
            branch_separator: BranchSeparator::Dash,
            timeout: Duration::from_secs(30),
        }
    }

    fn aws_entry() -> ProviderEntry {
        ProviderEntry {
            key: "aws".to_string(),
            source: "hashicorp/aws".to_string(),
            version: "4.0.0".to_string(),
        }
    }

    fn run(registry: &FakeRegistry, gitlab: &FakeGitLab, entries: &[ProviderEntry]) -> RunSummary {
        Reconciler::new(registry, gitlab, gitlab, &config()).reconcile_all(MANIFEST, entries)
    }

    #[test]
    fn outdated_provider_gets_branch_and_merge_request() {
        let registry = FakeRegistry::new(&[("hashicorp/aws", "4.1.0", "4.0.0 4.1.0")]);
        let gitlab = FakeGitLab::default();

        let summary = run(&registry, &gitlab, &[aws_entry()]);

        assert_eq!(
            summary.reports[0].outcome,
            Outcome::Bumped {
                branch: "tfdep/hashicorp/aws-4.1.0".to_string(),
                iid: 1
            }
        );
        assert_eq!(
            gitlab.calls(),
            vec![
                "commit tfdep/hashicorp/aws-4.1.0 from master: Bump hashicorp/aws from version 4.0.0 > 4.1.0",
                "open tfdep/hashicorp/aws-4.1.0 -> master: Bump hashicorp/aws from version 4.0.0 > 4.1.0 [dependencies,terraform]",
            ]
        );

        let content = gitlab.branch_content("tfdep/hashicorp/aws-4.1.0").unwrap();
        assert!(content.contains("source  = \"hashicorp/aws\"\n      version = \"4.1.0\""));
        assert!(content.contains("version = \"3.4.3\""));
    }

    #[test]
    fn existing_branch_skips_update() {
        let registry = FakeRegistry::new(&[("hashicorp/aws", "4.1.0", "4.0.0 4.1.0")]);
        let gitlab = FakeGitLab::default().with_branch("tfdep/hashicorp/aws-4.1.0");

        let summary = run(&registry, &gitlab, &[aws_entry()]);

        assert_eq!(
            summary.reports[0].outcome,
            Outcome::Skipped {
                branch: "tfdep/hashicorp/aws-4.1.0".to_string()
            }
        );
        assert!(gitlab.calls().is_empty());
    }

    #[test]
    fn up_to_date_provider_closes_obsolete_request_then_branch() {
        let registry = FakeRegistry::new(&[("hashicorp/aws", "4.0.0", "3.9.0 4.0.0")]);
        let gitlab = FakeGitLab::default()
            .with_branch("tfdep/hashicorp/aws-4.0.0")
            .with_request(7, "tfdep/hashicorp/aws-4.0.0", "dependencies terraform");

        let summary = run(&registry, &gitlab, &[aws_entry()]);

        assert_eq!(summary.reports[0].outcome, Outcome::ClosedObsolete { iid: 7 });
        assert_eq!(
            gitlab.calls(),
            vec!["delete request 7", "delete branch tfdep/hashicorp/aws-4.0.0"]
        );
    }

    #[test]
    fn up_to_date_provider_without_request_is_a_no_op() {
        let registry = FakeRegistry::new(&[("hashicorp/aws", "4.0.0", "4.0.0")]);
        let gitlab = FakeGitLab::default();

        let summary = run(&registry, &gitlab, &[aws_entry()]);

        assert_eq!(summary.reports[0].outcome, Outcome::UpToDate);
        assert!(gitlab.calls().is_empty());
        assert!(!summary.has_failures());
    }

    #[test]
    fn request_without_tfdep_labels_is_left_alone() {
        let registry = FakeRegistry::new(&[("hashicorp/aws", "4.0.0", "4.0.0")]);
        let gitlab = FakeGitLab::default()
            .with_branch("tfdep/hashicorp/aws-4.0.0")
            .with_request(3, "tfdep/hashicorp/aws-4.0.0", "dependencies");

        let summary = run(&registry, &gitlab, &[aws_entry()]);

        assert_eq!(summary.reports[0].outcome, Outcome::UpToDate);
        assert!(gitlab.calls().is_empty());
    }

    #[test]
    fn unmatched_manifest_pin_creates_nothing() {
        let registry = FakeRegistry::new(&[("hashicorp/aws", "4.1.0", "3.0.0 4.1.0")]);
        let gitlab = FakeGitLab::default();
        let entry = ProviderEntry {
            version: "3.0.0".to_string(),
            ..aws_entry()
        };

        let summary = run(&registry, &gitlab, &[entry]);

        assert_eq!(summary.reports[0].outcome, Outcome::PatchNotApplied);
        assert!(gitlab.calls().is_empty());
    }

    #[test]
    fn failing_provider_does_not_stop_the_run() {
        let registry = FakeRegistry::new(&[("hashicorp/random", "3.5.0", "3.4.3 3.5.0")]);
        let gitlab = FakeGitLab::default();
        let entries = [
            aws_entry(),
            ProviderEntry {
                key: "random".to_string(),
                source: "hashicorp/random".to_string(),
                version: "3.4.3".to_string(),
            },
        ];

        let summary = run(&registry, &gitlab, &entries);

        assert!(matches!(summary.reports[0].outcome, Outcome::Failed(_)));
        assert_eq!(summary.reports[0].latest_version, None);
        assert!(matches!(summary.reports[1].outcome, Outcome::Bumped { .. }));
        assert!(summary.has_failures());
        assert_eq!(summary.count(|o| matches!(o, Outcome::Bumped { .. })), 1);
    }

    #[test]
    fn current_version_missing_from_registry_fails_provider() {
        let registry = FakeRegistry::new(&[("hashicorp/aws", "4.1.0", "4.1.0")]);
        let gitlab = FakeGitLab::default();

        let summary = run(&registry, &gitlab, &[aws_entry()]);

        assert!(matches!(summary.reports[0].outcome, Outcome::Failed(ref msg) if msg.contains("not found")));
        assert!(gitlab.calls().is_empty());
    }

    #[test]
    fn dry_run_reports_without_mutating() {
        let registry = FakeRegistry::new(&[
            ("hashicorp/aws", "4.1.0", "4.0.0 4.1.0"),
            ("hashicorp/random", "3.4.3", "3.4.3"),
        ]);
        let gitlab = FakeGitLab::default()
            .with_branch("tfdep/hashicorp/random-3.4.3")
            .with_request(9, "tfdep/hashicorp/random-3.4.3", "dependencies terraform");
        let entries = [
            aws_entry(),
            ProviderEntry {
                key: "random".to_string(),
                source: "hashicorp/random".to_string(),
                version: "3.4.3".to_string(),
            },
        ];

        let summary = Reconciler::new(&registry, &gitlab, &gitlab, &config())
            .with_dry_run(true)
            .reconcile_all(MANIFEST, &entries);

        assert_eq!(
            summary.reports[0].outcome,
            Outcome::WouldBump {
                branch: "tfdep/hashicorp/aws-4.1.0".to_string()
            }
        );
        assert_eq!(summary.reports[1].outcome, Outcome::WouldClose { iid: 9 });
        assert!(gitlab.calls().is_empty());
    }

    #[test]
    fn failed_merge_request_removes_the_new_branch() {
        let registry = FakeRegistry::new(&[("hashicorp/aws", "4.1.0", "4.0.0 4.1.0")]);
        let gitlab = FakeGitLab::default().rejecting_requests();

        let summary = run(&registry, &gitlab, &[aws_entry()]);

        assert!(matches!(summary.reports[0].outcome, Outcome::Failed(ref msg) if msg.contains("HTTP 500")));
        let calls = gitlab.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].starts_with("commit tfdep/hashicorp/aws-4.1.0"));
        assert!(calls[1].starts_with("open tfdep/hashicorp/aws-4.1.0"));
        assert_eq!(calls[2], "delete branch tfdep/hashicorp/aws-4.1.0");
        assert_eq!(gitlab.branch_content("tfdep/hashicorp/aws-4.1.0"), None);
    }

    #[test]
    fn second_run_after_bump_is_skipped() {
        let registry = FakeRegistry::new(&[("hashicorp/aws", "4.1.0", "4.0.0 4.1.0")]);
        let gitlab = FakeGitLab::default();

        run(&registry, &gitlab, &[aws_entry()]);
        let summary = run(&registry, &gitlab, &[aws_entry()]);

        assert!(matches!(summary.reports[0].outcome, Outcome::Skipped { .. }));
        assert_eq!(gitlab.calls().len(), 2);
    }
}
