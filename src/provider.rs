use crate::error::{Result, TfdepError};
use crate::registry::RegistryProvider;
use url::Url;

/// A provider as published by the registry, paired with the version pinned in the manifest.
///
/// The registry's `versions` order is kept as-is; nothing here parses or sorts
/// version numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provider {
    pub name: String,
    pub namespace: String,
    pub source: String,
    pub versions: Vec<String>,
    pub latest_version: String,
    pub current_version: String,
}

impl Provider {
    pub fn new(registry: RegistryProvider, current_version: impl Into<String>) -> Self {
        Self {
            name: registry.name,
            namespace: registry.namespace,
            source: registry.source,
            versions: registry.versions,
            latest_version: registry.version,
            current_version: current_version.into(),
        }
    }

    /// Exact string comparison between the pinned and the latest version.
    pub fn is_latest(&self) -> bool {
        self.current_version == self.latest_version
    }

    /// Every published version strictly after the pinned one, in registry order.
    pub fn versions_after_current(&self) -> Result<&[String]> {
        let index = self
            .versions
            .iter()
            .position(|v| *v == self.current_version)
            .ok_or_else(|| TfdepError::NotFound {
                provider: format!("{}/{}", self.namespace, self.name),
                version: self.current_version.clone(),
            })?;

        Ok(&self.versions[index + 1..])
    }

    /// Extract `(owner, repository)` from the provider source URL.
    pub fn repository_coordinates(&self) -> Result<(String, String)> {
        let path = match Url::parse(&self.source) {
            Ok(url) => url.path().to_string(),
            Err(_) => self.source.clone(),
        };

        let parts: Vec<&str> = path.trim_matches('/').split('/').collect();
        match parts.as_slice() {
            [owner, repo] if !owner.is_empty() && !repo.is_empty() => {
                Ok((owner.to_string(), repo.to_string()))
            }
            _ => Err(TfdepError::MalformedSource(self.source.clone())),
        }
    }
}
