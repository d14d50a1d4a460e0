use thiserror::Error;

#[derive(Error, Debug)]
pub enum TfdepError {
    #[error("Version {version} of provider {provider} not found in registry version list")]
    NotFound { provider: String, version: String },

    #[error("Malformed provider source: {0}")]
    MalformedSource(String),

    #[error("Registry request failed: {0}")]
    Registry(String),

    #[error("GitLab request failed: {0}")]
    Backend(String),

    #[error("Manifest parsing failed: {0}")]
    ManifestParsing(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TfdepError>;
