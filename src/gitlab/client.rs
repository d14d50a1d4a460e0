use crate::error::{Result, TfdepError};
use crate::gitlab::{
    ChangeRequestStore, CommitAction, CommitRef, ManifestStore, MergeRequest, NewMergeRequest,
};
use reqwest::Method;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

pub const DEFAULT_GITLAB_URL: &str = "https://gitlab.com";

/// GitLab REST (v4) client scoped to a single project.
pub struct GitLabClient {
    client: Client,
    base_url: Url,
    project: String,
    token: Option<String>,
}

#[derive(Serialize)]
struct CommitPayload<'a> {
    branch: &'a str,
    start_branch: &'a str,
    commit_message: &'a str,
    actions: &'a [CommitAction],
}

impl GitLabClient {
    pub fn new(
        base_url: &str,
        project: &str,
        token: Option<&str>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| TfdepError::Config(format!("Invalid GitLab URL '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(TfdepError::Config(format!(
                "GitLab URL '{base_url}' cannot be used as a base URL"
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tfdep/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TfdepError::Backend(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            project: project.to_string(),
            token: token.map(str::to_string),
        })
    }

    /// `{base}/api/v4/projects/{project}/{segments...}`, every segment percent-encoded
    /// (`group/project` becomes `group%2Fproject`).
    fn project_url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .extend(["api", "v4", "projects", self.project.as_str()])
                .extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.header("PRIVATE-TOKEN", token),
            None => builder,
        }
    }

    fn send(&self, builder: RequestBuilder, what: &str) -> Result<Response> {
        builder
            .send()
            .map_err(|e| TfdepError::Backend(format!("{what} failed: {e}")))
    }

    fn ensure_success(response: Response, what: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().unwrap_or_default();
        Err(TfdepError::Backend(format!(
            "{what} returned HTTP {status}: {}",
            body.trim()
        )))
    }

    fn json<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
        let body = response
            .text()
            .map_err(|e| TfdepError::Backend(format!("{what}: failed to read response: {e}")))?;
        serde_json::from_str(&body)
            .map_err(|e| TfdepError::Backend(format!("{what}: unexpected response: {e}")))
    }
}

impl ManifestStore for GitLabClient {
    fn fetch_file(&self, path: &str, git_ref: &str) -> Result<Vec<u8>> {
        let mut url = self.project_url(&["repository", "files", path, "raw"]);
        url.query_pairs_mut().append_pair("ref", git_ref);

        let what = format!("Fetching {path}@{git_ref}");
        let response = self.send(self.request(Method::GET, url), &what)?;
        let response = Self::ensure_success(response, &what)?;
        let bytes = response
            .bytes()
            .map_err(|e| TfdepError::Backend(format!("{what}: failed to read body: {e}")))?;
        Ok(bytes.to_vec())
    }

    fn create_commit(
        &self,
        branch: &str,
        start_ref: &str,
        message: &str,
        actions: &[CommitAction],
    ) -> Result<CommitRef> {
        let url = self.project_url(&["repository", "commits"]);
        let payload = CommitPayload {
            branch,
            start_branch: start_ref,
            commit_message: message,
            actions,
        };

        let what = format!("Creating commit on {branch}");
        let response = self.send(self.request(Method::POST, url).json(&payload), &what)?;
        let response = Self::ensure_success(response, &what)?;
        Self::json(response, &what)
    }

    fn branch_exists(&self, name: &str) -> Result<bool> {
        let url = self.project_url(&["repository", "branches", name]);
        let what = format!("Looking up branch {name}");
        let response = self.send(self.request(Method::GET, url), &what)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::ensure_success(response, &what)?;
        Ok(true)
    }

    fn delete_branch(&self, name: &str) -> Result<()> {
        let url = self.project_url(&["repository", "branches", name]);
        let what = format!("Deleting branch {name}");
        let response = self.send(self.request(Method::DELETE, url), &what)?;
        Self::ensure_success(response, &what)?;
        Ok(())
    }
}

impl ChangeRequestStore for GitLabClient {
    fn list_open_requests(&self, source_branch: &str, labels: &[&str]) -> Result<Vec<MergeRequest>> {
        let mut url = self.project_url(&["merge_requests"]);
        url.query_pairs_mut()
            .append_pair("state", "opened")
            .append_pair("source_branch", source_branch)
            .append_pair("labels", &labels.join(","));

        let what = format!("Listing merge requests for {source_branch}");
        let response = self.send(self.request(Method::GET, url), &what)?;
        let response = Self::ensure_success(response, &what)?;
        Self::json(response, &what)
    }

    fn create_request(&self, request: &NewMergeRequest) -> Result<MergeRequest> {
        let url = self.project_url(&["merge_requests"]);
        let what = format!("Creating merge request from {}", request.source_branch);
        let response = self.send(self.request(Method::POST, url).json(request), &what)?;
        let response = Self::ensure_success(response, &what)?;
        Self::json(response, &what)
    }

    fn delete_request(&self, iid: u64) -> Result<()> {
        let iid = iid.to_string();
        let url = self.project_url(&["merge_requests", iid.as_str()]);
        let what = format!("Deleting merge request !{iid}");
        let response = self.send(self.request(Method::DELETE, url), &what)?;
        Self::ensure_success(response, &what)?;
        Ok(())
    }
}
