use crate::error::Result;
use serde::{Deserialize, Serialize};

pub mod client;
pub use client::GitLabClient;

/// A single file operation within a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitAction {
    pub action: CommitActionKind,
    pub file_path: String,
    pub content: String,
}

impl CommitAction {
    pub fn update(file_path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            action: CommitActionKind::Update,
            file_path: file_path.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitActionKind {
    Update,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommitRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MergeRequest {
    pub iid: u64,
    pub title: String,
    pub source_branch: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewMergeRequest {
    pub source_branch: String,
    pub target_branch: String,
    pub title: String,
    /// Comma separated, as the merge request API expects.
    pub labels: String,
    pub description: String,
}

/// Repository files and branches.
pub trait ManifestStore: Send + Sync {
    fn fetch_file(&self, path: &str, git_ref: &str) -> Result<Vec<u8>>;

    fn create_commit(
        &self,
        branch: &str,
        start_ref: &str,
        message: &str,
        actions: &[CommitAction],
    ) -> Result<CommitRef>;

    fn branch_exists(&self, name: &str) -> Result<bool>;

    fn delete_branch(&self, name: &str) -> Result<()>;
}

/// Merge requests.
pub trait ChangeRequestStore: Send + Sync {
    fn list_open_requests(&self, source_branch: &str, labels: &[&str]) -> Result<Vec<MergeRequest>>;

    fn create_request(&self, request: &NewMergeRequest) -> Result<MergeRequest>;

    fn delete_request(&self, iid: u64) -> Result<()>;
}
