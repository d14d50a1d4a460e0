use crate::error::{Result, TfdepError};
use crate::gitlab::client::DEFAULT_GITLAB_URL;
use crate::registry::terraform::DEFAULT_REGISTRY_URL;
use serde::Deserialize;
use std::fs;
use std::path::{Component, Path};
use std::time::Duration;
use url::Url;

pub const DEFAULT_BASE_BRANCH: &str = "master";
pub const DEFAULT_MANIFEST_PATH: &str = "versions.tf";
pub const DEFAULT_BRANCH_PREFIX: &str = "tfdep";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Separator placed between the provider source and the target version in
/// update branch names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BranchSeparator {
    #[default]
    Dash,
    DoubleDash,
}

impl BranchSeparator {
    pub fn as_str(&self) -> &'static str {
        match self {
            BranchSeparator::Dash => "-",
            BranchSeparator::DoubleDash => "--",
        }
    }

    fn parse(value: &str) -> Result<Self> {
        match value {
            "-" => Ok(BranchSeparator::Dash),
            "--" => Ok(BranchSeparator::DoubleDash),
            other => Err(TfdepError::Config(format!(
                "Branch separator must be '-' or '--', got '{other}'"
            ))),
        }
    }
}

/// Runtime configuration, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub registry_url: String,
    pub gitlab_url: String,
    pub project: String,
    pub base_branch: String,
    pub token: Option<String>,
    pub manifest_path: String,
    pub branch_prefix: String,
    pub branch_separator: BranchSeparator,
    pub timeout: Duration,
}

/// Optional TOML configuration file; every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    registry_url: Option<String>,
    gitlab_url: Option<String>,
    project: Option<String>,
    base_branch: Option<String>,
    token: Option<String>,
    manifest_path: Option<String>,
    branch_prefix: Option<String>,
    branch_separator: Option<String>,
    timeout_secs: Option<u64>,
}

impl FileConfig {
    fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            TfdepError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Ok(toml::from_str(&content)?)
    }
}

impl Config {
    /// Resolve configuration from the process environment and an optional file.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        Self::resolve(config_file, |key| std::env::var(key).ok())
    }

    /// Environment values win over file values, which win over defaults.
    /// Empty environment values count as unset.
    pub fn resolve<F>(config_file: Option<&Path>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = match config_file {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        let lookup = |key: &str| env(key).filter(|value| !value.is_empty());

        let timeout_secs = match lookup("TFDEP_HTTP_TIMEOUT") {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                TfdepError::Config(format!("TFDEP_HTTP_TIMEOUT must be a number of seconds, got '{raw}'"))
            })?,
            None => file.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
        };

        let separator = lookup("TFDEP_BRANCH_SEPARATOR").or(file.branch_separator);

        let config = Self {
            registry_url: lookup("TF_REGISTRY_BASE_URL")
                .or(file.registry_url)
                .unwrap_or_else(|| DEFAULT_REGISTRY_URL.to_string()),
            gitlab_url: lookup("GITLAB_URL")
                .or(file.gitlab_url)
                .unwrap_or_else(|| DEFAULT_GITLAB_URL.to_string()),
            project: lookup("GITLAB_PROJECT").or(file.project).unwrap_or_default(),
            base_branch: lookup("BRANCH")
                .or(file.base_branch)
                .unwrap_or_else(|| DEFAULT_BASE_BRANCH.to_string()),
            token: lookup("GITLAB_TOKEN").or(file.token),
            manifest_path: lookup("TF_VERSIONS_FILE_PATH")
                .or(file.manifest_path)
                .unwrap_or_else(|| DEFAULT_MANIFEST_PATH.to_string()),
            branch_prefix: lookup("TFDEP_BRANCH_PREFIX")
                .or(file.branch_prefix)
                .unwrap_or_else(|| DEFAULT_BRANCH_PREFIX.to_string()),
            branch_separator: match separator {
                Some(value) => BranchSeparator::parse(&value)?,
                None => BranchSeparator::default(),
            },
            timeout: Duration::from_secs(timeout_secs),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.project.trim().is_empty() {
            return Err(TfdepError::Config(
                "GITLAB_PROJECT must name the project holding the manifest".to_string(),
            ));
        }

        Self::validate_http_url("registry URL", &self.registry_url)?;
        Self::validate_http_url("GitLab URL", &self.gitlab_url)?;
        Self::validate_manifest_path(&self.manifest_path)?;

        if self.base_branch.trim().is_empty() {
            return Err(TfdepError::Config("Base branch must not be empty".to_string()));
        }

        if self.branch_prefix.is_empty() || self.branch_prefix.contains(char::is_whitespace) {
            return Err(TfdepError::Config(format!(
                "Branch prefix '{}' must be non-empty and contain no whitespace",
                self.branch_prefix
            )));
        }

        if self.timeout.is_zero() {
            return Err(TfdepError::Config("HTTP timeout must be positive".to_string()));
        }

        Ok(())
    }

    fn validate_http_url(label: &str, value: &str) -> Result<()> {
        let url = Url::parse(value)
            .map_err(|e| TfdepError::Config(format!("Invalid {label} '{value}': {e}")))?;

        match url.scheme() {
            "http" | "https" => Ok(()),
            scheme => Err(TfdepError::Config(format!(
                "Unsupported scheme '{scheme}' for {label}"
            ))),
        }
    }

    /// The manifest path is relative to the repository root and may not escape it.
    fn validate_manifest_path(value: &str) -> Result<()> {
        let path = Path::new(value);
        if value.is_empty() || path.is_absolute() {
            return Err(TfdepError::Config(format!(
                "Manifest path '{value}' must be relative to the repository root"
            )));
        }

        if path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(TfdepError::Config(format!(
                "Manifest path '{value}' must not leave the repository"
            )));
        }

        Ok(())
    }
}
