//! Client configuration and HTTP transport for the Gust API.
//!
//! A [`Client`] holds the base URL, bearer token, workspace and the ambient
//! job context, plus a reused blocking HTTP connection pool. Domain operations
//! live in the sibling modules ([`crate::jobs`], [`crate::variables`],
//! [`crate::resources`], [`crate::s3`], [`crate::notify`]) as free functions
//! that take the client as their first argument.
//!
//! The client is not guaranteed thread-safe for concurrent use from multiple
//! execution contexts; callers needing concurrent job waits should use
//! independent client instances or serialize access.

use std::env;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;
use log::{error, info};
use reqwest::blocking::Response;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::mock::MockedApi;

/// Environment variables read once at [`Client::from_env`] time.
pub const ENV_BASE_INTERNAL_URL: &str = "GUST_BASE_INTERNAL_URL";
pub const ENV_BASE_URL: &str = "GUST_BASE_URL";
pub const ENV_TOKEN: &str = "GUST_TOKEN";
pub const ENV_WORKSPACE: &str = "GUST_WORKSPACE";
pub const ENV_JOB_ID: &str = "GUST_JOB_ID";
pub const ENV_ROOT_FLOW_JOB_ID: &str = "GUST_ROOT_FLOW_JOB_ID";
pub const ENV_FLOW_JOB_ID: &str = "GUST_FLOW_JOB_ID";
pub const ENV_FLOW_STEP_ID: &str = "GUST_FLOW_STEP_ID";
pub const ENV_JOB_PATH: &str = "GUST_JOB_PATH";
pub const ENV_STATE_PATH: &str = "GUST_STATE_PATH";
pub const ENV_MOCKED_API_FILE: &str = "GUST_MOCKED_API_FILE";

const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// A configured connection to one Gust workspace.
#[derive(Debug)]
pub struct Client {
    base_url: String,
    token: String,
    workspace: String,
    http: reqwest::blocking::Client,
    job_id: Option<String>,
    root_flow_job_id: Option<String>,
    flow_job_id: Option<String>,
    flow_step_id: Option<String>,
    script_path: Option<String>,
    state_path: Option<String>,
    mocked_api: Option<Mutex<MockedApi>>,
}

/// Builder for explicit client construction (tests, multi-workspace tools).
#[derive(Debug, Default)]
pub struct ClientBuilder {
    base_url: Option<String>,
    token: Option<String>,
    workspace: Option<String>,
    job_id: Option<String>,
    root_flow_job_id: Option<String>,
    flow_job_id: Option<String>,
    flow_step_id: Option<String>,
    script_path: Option<String>,
    state_path: Option<String>,
    mocked_api_file: Option<PathBuf>,
    accept_invalid_certs: bool,
}

impl ClientBuilder {
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn root_flow_job_id(mut self, id: impl Into<String>) -> Self {
        self.root_flow_job_id = Some(id.into());
        self
    }

    pub fn flow_job_id(mut self, id: impl Into<String>) -> Self {
        self.flow_job_id = Some(id.into());
        self
    }

    pub fn flow_step_id(mut self, id: impl Into<String>) -> Self {
        self.flow_step_id = Some(id.into());
        self
    }

    pub fn script_path(mut self, path: impl Into<String>) -> Self {
        self.script_path = Some(path.into());
        self
    }

    pub fn state_path(mut self, path: impl Into<String>) -> Self {
        self.state_path = Some(path.into());
        self
    }

    /// Use a local mocked-API file for variable/resource overrides.
    pub fn mocked_api_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.mocked_api_file = Some(path.into());
        self
    }

    /// Disable TLS certificate verification. Only for test servers.
    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    pub fn build(self) -> Result<Client> {
        let workspace = self.workspace.ok_or_else(|| {
            Error::Config(format!(
                "workspace required as an argument or as {} environment variable",
                ENV_WORKSPACE
            ))
        })?;
        let base = self
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let http = reqwest::blocking::Client::builder()
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .build()?;
        let mocked_api = self.mocked_api_file.map(|path| {
            info!("Using mocked API file={}", path.display());
            Mutex::new(MockedApi::load(&path))
        });

        Ok(Client {
            base_url: format!("{}/api", base.trim_end_matches('/')),
            token: self.token.unwrap_or_default(),
            workspace,
            http,
            job_id: self.job_id,
            root_flow_job_id: self.root_flow_job_id,
            flow_job_id: self.flow_job_id,
            flow_step_id: self.flow_step_id,
            script_path: self.script_path,
            state_path: self.state_path,
            mocked_api,
        })
    }
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Build a client from the `GUST_*` environment, read once here.
    ///
    /// Fails with [`Error::Config`] when no workspace is set.
    pub fn from_env() -> Result<Client> {
        let mut builder = Client::builder();
        if let Some(base) = env::var(ENV_BASE_INTERNAL_URL)
            .ok()
            .or_else(|| env::var(ENV_BASE_URL).ok())
        {
            builder = builder.base_url(base);
        }
        if let Ok(token) = env::var(ENV_TOKEN) {
            builder = builder.token(token);
        }
        if let Ok(workspace) = env::var(ENV_WORKSPACE) {
            builder = builder.workspace(workspace);
        }
        if let Ok(job_id) = env::var(ENV_JOB_ID) {
            builder = builder.job_id(job_id);
        }
        if let Ok(id) = env::var(ENV_ROOT_FLOW_JOB_ID) {
            builder = builder.root_flow_job_id(id);
        }
        if let Ok(id) = env::var(ENV_FLOW_JOB_ID) {
            builder = builder.flow_job_id(id);
        }
        if let Ok(id) = env::var(ENV_FLOW_STEP_ID) {
            builder = builder.flow_step_id(id);
        }
        if let Ok(path) = env::var(ENV_JOB_PATH) {
            builder = builder.script_path(path);
        }
        if let Ok(path) = env::var(ENV_STATE_PATH) {
            builder = builder.state_path(path);
        }
        if let Ok(path) = env::var(ENV_MOCKED_API_FILE) {
            builder = builder.mocked_api_file(path);
        }
        builder.build()
    }

    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    pub fn root_flow_job_id(&self) -> Option<&str> {
        self.root_flow_job_id.as_deref()
    }

    pub fn flow_job_id(&self) -> Option<&str> {
        self.flow_job_id.as_deref()
    }

    pub fn flow_step_id(&self) -> Option<&str> {
        self.flow_step_id.as_deref()
    }

    pub fn script_path(&self) -> Option<&str> {
        self.script_path.as_deref()
    }

    /// The configured state path, required by the state helpers.
    pub fn state_path(&self) -> Result<&str> {
        self.state_path.as_deref().ok_or_else(|| {
            Error::Config(format!(
                "state path not set ({} environment variable)",
                ENV_STATE_PATH
            ))
        })
    }

    pub(crate) fn mocked_api(&self) -> Option<&Mutex<MockedApi>> {
        self.mocked_api.as_ref()
    }

    pub(crate) fn http(&self) -> &reqwest::blocking::Client {
        &self.http
    }

    pub(crate) fn token(&self) -> &str {
        &self.token
    }

    pub(crate) fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    /// GET an endpoint, raising [`Error::Transport`] on any non-2xx status.
    pub fn get(&self, endpoint: &str) -> Result<Response> {
        self.get_with(endpoint, &[])
    }

    /// GET with query parameters, raising on non-2xx.
    pub fn get_with(&self, endpoint: &str, query: &[(&str, String)]) -> Result<Response> {
        let resp = self
            .http
            .get(self.url(endpoint))
            .bearer_auth(&self.token)
            .query(query)
            .send()?;
        check_status("GET", resp)
    }

    /// GET without status checking; the caller inspects the status itself.
    /// Transport-level failures (connection refused, DNS) still propagate.
    pub fn get_unchecked(&self, endpoint: &str) -> Result<Response> {
        Ok(self
            .http
            .get(self.url(endpoint))
            .bearer_auth(&self.token)
            .send()?)
    }

    /// POST a JSON body, raising [`Error::Transport`] on any non-2xx status.
    pub fn post(&self, endpoint: &str, body: &Value) -> Result<Response> {
        self.post_with(endpoint, body, &[])
    }

    /// POST with query parameters, raising on non-2xx.
    pub fn post_with(
        &self,
        endpoint: &str,
        body: &Value,
        query: &[(&str, String)],
    ) -> Result<Response> {
        let resp = self
            .http
            .post(self.url(endpoint))
            .bearer_auth(&self.token)
            .query(query)
            .json(body)
            .send()?;
        check_status("POST", resp)
    }

    /// POST without status checking.
    pub fn post_unchecked(&self, endpoint: &str, body: &Value) -> Result<Response> {
        Ok(self
            .http
            .post(self.url(endpoint))
            .bearer_auth(&self.token)
            .json(body)
            .send()?)
    }

    /// Create a fresh API token for this user, valid for `duration`.
    pub fn create_token(&self, duration: chrono::Duration) -> Result<String> {
        let expiration = (Utc::now() + duration).format("%Y-%m-%dT%H:%M:%SZ");
        let payload = json!({
            "label": format!("refresh {}", Utc::now().timestamp()),
            "expiration": expiration.to_string(),
        });
        Ok(self.post("/users/tokens/create", &payload)?.text()?)
    }

    /// Server version string.
    pub fn version(&self) -> Result<String> {
        Ok(self.get("/version")?.text()?)
    }

    /// The user the configured token authenticates as.
    pub fn whoami(&self) -> Result<Value> {
        Ok(self.get("/users/whoami")?.json()?)
    }

    /// Get a JWT for the given audience for OIDC login into third parties.
    pub fn get_id_token(&self, audience: &str) -> Result<String> {
        let endpoint = format!("/w/{}/oidc/token/{}", self.workspace, audience);
        Ok(self.post(&endpoint, &Value::Null)?.text()?)
    }

    /// Resolve a workspace username to an email address.
    pub fn username_to_email(&self, username: &str) -> Result<String> {
        let endpoint = format!("/w/{}/users/username_to_email/{}", self.workspace, username);
        Ok(self.get(&endpoint)?.text()?)
    }
}

/// Raise [`Error::Transport`] for non-2xx responses, logging the failure.
pub(crate) fn check_status(method: &'static str, resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let url = resp.url().to_string();
    let body = resp.text().unwrap_or_default();
    error!(
        "Request failed method={} url={} status={} body={}",
        method,
        url,
        status.as_u16(),
        body
    );
    Err(Error::Transport {
        method,
        url,
        status: status.as_u16(),
        body,
    })
}
