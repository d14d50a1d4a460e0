use crate::error::Result;
use serde::Deserialize;

pub mod terraform;
pub use terraform::TerraformRegistry;

/// Provider metadata as returned by `GET /providers/{namespace}/{name}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegistryProvider {
    pub name: String,
    pub namespace: String,
    /// Latest published version.
    pub version: String,
    pub source: String,
    pub versions: Vec<String>,
}

pub trait RegistryClient: Send + Sync {
    fn get_provider(&self, source: &str) -> Result<RegistryProvider>;
}
