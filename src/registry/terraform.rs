use crate::error::{Result, TfdepError};
use crate::registry::{RegistryClient, RegistryProvider};
use reqwest::blocking::Client;
use std::time::Duration;

pub const DEFAULT_REGISTRY_URL: &str = "https://registry.terraform.io/v1";

/// Terraform registry client
pub struct TerraformRegistry {
    client: Client,
    base_url: String,
}

impl TerraformRegistry {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tfdep/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TfdepError::Registry(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Registry lookups use `namespace/name`; a leading hostname such as
    /// `registry.terraform.io/` is dropped.
    pub fn registry_address(source: &str) -> &str {
        let trimmed = source.trim_matches('/');
        let segments: Vec<&str> = trimmed.split('/').collect();
        if segments.len() == 3 && segments[0].contains('.') {
            let host_len = segments[0].len() + 1;
            return &trimmed[host_len..];
        }
        trimmed
    }

    fn provider_url(&self, source: &str) -> String {
        format!(
            "{}/providers/{}",
            self.base_url,
            Self::registry_address(source)
        )
    }
}

impl RegistryClient for TerraformRegistry {
    fn get_provider(&self, source: &str) -> Result<RegistryProvider> {
        let url = self.provider_url(source);
        tracing::debug!(%url, "Fetching provider from registry");

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| TfdepError::Registry(format!("GET {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TfdepError::Registry(format!("GET {url} returned HTTP {status}")));
        }

        let body = response
            .text()
            .map_err(|e| TfdepError::Registry(format!("Failed to read response from {url}: {e}")))?;

        serde_json::from_str(&body).map_err(|e| {
            TfdepError::Registry(format!("Unexpected registry response for {source}: {e}"))
        })
    }
}
