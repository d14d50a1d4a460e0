pub mod parser;
pub mod patcher;

pub use parser::{ProviderEntry, parse_required_providers};
pub use patcher::{PatchOutcome, patch_provider_version};
