//! Issue tracker / pull request host abstraction.
//!
//! The [`Tracker`] trait is the only way orchestration code reaches the host.
//! [`GithubTracker`] implements it over the GitHub REST v3 API with blocking
//! HTTP; tests use the in-memory fake from `test_support`.

use anyhow::{Context, Result};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, instrument};
use url::Url;

use crate::core::types::{Comment, Issue, PrFile, PullRequest, Verdict};
use crate::io::config::AgentConfig;
use crate::io::retry::{RetryPolicy, check_status, classify_send_error};

const PAGE_SIZE: usize = 100;

/// Parameters for opening a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPullRequest {
    pub base: String,
    pub head: String,
    pub title: String,
    pub body: String,
}

/// Operations the agent needs from the issue tracker and PR host.
pub trait Tracker {
    /// Login of the account the agent authenticates as.
    fn authenticated_login(&self) -> Result<String>;
    fn get_issue(&self, number: u64) -> Result<Issue>;
    /// Open issues carrying `label`. Pull requests are excluded.
    fn list_open_issues(&self, label: &str) -> Result<Vec<Issue>>;
    /// Comments on an issue or pull request, in host order.
    fn list_comments(&self, number: u64) -> Result<Vec<Comment>>;
    fn create_comment(&self, number: u64, body: &str) -> Result<Comment>;
    /// Open pull requests, optionally restricted to an exact head branch.
    fn list_open_pull_requests(&self, head: Option<&str>) -> Result<Vec<PullRequest>>;
    fn get_pull_request(&self, number: u64) -> Result<PullRequest>;
    fn list_pull_request_files(&self, number: u64) -> Result<Vec<PrFile>>;
    fn create_pull_request(&self, request: &NewPullRequest) -> Result<PullRequest>;
    fn update_pull_request(&self, number: u64, title: &str, body: &str) -> Result<PullRequest>;
    /// Submit a formal review whose disposition follows `verdict`.
    fn create_review(&self, number: u64, verdict: Verdict, body: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct GhUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GhLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GhIssue {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    labels: Vec<GhLabel>,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

impl From<GhIssue> for Issue {
    fn from(raw: GhIssue) -> Self {
        Issue {
            number: raw.number,
            title: raw.title,
            body: raw.body.unwrap_or_default(),
            labels: raw.labels.into_iter().map(|l| l.name).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GhComment {
    id: u64,
    #[serde(default)]
    user: Option<GhUser>,
    #[serde(default)]
    body: Option<String>,
    created_at: String,
}

impl From<GhComment> for Comment {
    fn from(raw: GhComment) -> Self {
        Comment {
            id: raw.id,
            author: raw.user.map(|u| u.login).unwrap_or_default(),
            body: raw.body.unwrap_or_default(),
            created_at: raw.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GhRef {
    #[serde(rename = "ref")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct GhPull {
    number: u64,
    head: GhRef,
    title: String,
    #[serde(default)]
    body: Option<String>,
    html_url: String,
}

impl From<GhPull> for PullRequest {
    fn from(raw: GhPull) -> Self {
        PullRequest {
            number: raw.number,
            head_ref: raw.head.name,
            title: raw.title,
            body: raw.body.unwrap_or_default(),
            html_url: raw.html_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GhFile {
    filename: String,
    #[serde(default)]
    patch: Option<String>,
}

/// GitHub REST v3 client.
pub struct GithubTracker {
    http: Client,
    api_base: Url,
    owner: String,
    name: String,
    retry: RetryPolicy,
}

impl GithubTracker {
    pub fn from_config(cfg: &AgentConfig) -> Result<Self> {
        let (owner, name) = cfg.owner_and_name()?;
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("issue-agent"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("x-github-api-version", HeaderValue::from_static("2022-11-28"));
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", cfg.token.trim()))
            .context("invalid tracker authorization header")?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = Client::builder()
            .default_headers(headers)
            .timeout(cfg.http_timeout())
            .build()
            .context("build tracker http client")?;
        let mut base = cfg.api_url.trim_end_matches('/').to_string();
        base.push('/');
        let api_base = Url::parse(&base).with_context(|| format!("parse api url {base}"))?;
        Ok(Self {
            http,
            api_base,
            owner: owner.to_string(),
            name: name.to_string(),
            retry: cfg.retry,
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.api_base
            .join(path.trim_start_matches('/'))
            .with_context(|| format!("join api path {path}"))
    }

    fn repo_url(&self, path: &str) -> Result<Url> {
        self.url(&format!("repos/{}/{}/{path}", self.owner, self.name))
    }

    fn send_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<T> {
        let response = self.retry.execute(operation, || {
            let response = build().send().map_err(classify_send_error)?;
            check_status(response)
        })?;
        decode(operation, response)
    }

    /// Send a request that creates something. It is re-sent only when the
    /// server never accepted the previous attempt.
    fn create_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<T> {
        let response = self.retry.execute_write(operation, || {
            let response = build().send().map_err(classify_send_error)?;
            check_status(response)
        })?;
        decode(operation, response)
    }

    /// Fetch every page of a listing endpoint.
    fn paged<T: DeserializeOwned>(
        &self,
        operation: &str,
        url: Url,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>> {
        let mut rows = Vec::new();
        let mut page = 1u32;
        loop {
            let page_text = page.to_string();
            let per_page = PAGE_SIZE.to_string();
            let chunk: Vec<T> = self.send_json(operation, || {
                self.http
                    .get(url.clone())
                    .query(query)
                    .query(&[("per_page", per_page.as_str()), ("page", page_text.as_str())])
            })?;
            let chunk_len = chunk.len();
            rows.extend(chunk);
            if chunk_len < PAGE_SIZE {
                break;
            }
            page = page.saturating_add(1);
        }
        debug!(operation, count = rows.len(), "listing fetched");
        Ok(rows)
    }
}

fn decode<T: DeserializeOwned>(operation: &str, response: Response) -> Result<T> {
    response
        .json::<T>()
        .with_context(|| format!("decode {operation} response"))
}

impl Tracker for GithubTracker {
    #[instrument(skip_all)]
    fn authenticated_login(&self) -> Result<String> {
        let url = self.url("user")?;
        let user: GhUser = self.send_json("get authenticated user", || self.http.get(url.clone()))?;
        Ok(user.login)
    }

    #[instrument(skip_all, fields(number))]
    fn get_issue(&self, number: u64) -> Result<Issue> {
        let url = self.repo_url(&format!("issues/{number}"))?;
        let raw: GhIssue = self.send_json("get issue", || self.http.get(url.clone()))?;
        Ok(raw.into())
    }

    #[instrument(skip_all, fields(label))]
    fn list_open_issues(&self, label: &str) -> Result<Vec<Issue>> {
        let url = self.repo_url("issues")?;
        let raw: Vec<GhIssue> = self.paged(
            "list issues",
            url,
            &[("state", "open"), ("labels", label)],
        )?;
        Ok(raw
            .into_iter()
            .filter(|issue| issue.pull_request.is_none())
            .map(Issue::from)
            .collect())
    }

    #[instrument(skip_all, fields(number))]
    fn list_comments(&self, number: u64) -> Result<Vec<Comment>> {
        let url = self.repo_url(&format!("issues/{number}/comments"))?;
        let raw: Vec<GhComment> = self.paged("list comments", url, &[])?;
        Ok(raw.into_iter().map(Comment::from).collect())
    }

    #[instrument(skip_all, fields(number))]
    fn create_comment(&self, number: u64, body: &str) -> Result<Comment> {
        let url = self.repo_url(&format!("issues/{number}/comments"))?;
        let payload = json!({ "body": body });
        let raw: GhComment = self.create_json("create comment", || {
            self.http.post(url.clone()).json(&payload)
        })?;
        Ok(raw.into())
    }

    #[instrument(skip_all, fields(head))]
    fn list_open_pull_requests(&self, head: Option<&str>) -> Result<Vec<PullRequest>> {
        let url = self.repo_url("pulls")?;
        let qualified = head.map(|h| format!("{}:{h}", self.owner));
        let mut query = vec![("state", "open")];
        if let Some(qualified) = qualified.as_deref() {
            query.push(("head", qualified));
        }
        let raw: Vec<GhPull> = self.paged("list pull requests", url, &query)?;
        Ok(raw.into_iter().map(PullRequest::from).collect())
    }

    #[instrument(skip_all, fields(number))]
    fn get_pull_request(&self, number: u64) -> Result<PullRequest> {
        let url = self.repo_url(&format!("pulls/{number}"))?;
        let raw: GhPull = self.send_json("get pull request", || self.http.get(url.clone()))?;
        Ok(raw.into())
    }

    #[instrument(skip_all, fields(number))]
    fn list_pull_request_files(&self, number: u64) -> Result<Vec<PrFile>> {
        let url = self.repo_url(&format!("pulls/{number}/files"))?;
        let raw: Vec<GhFile> = self.paged("list pull request files", url, &[])?;
        Ok(raw
            .into_iter()
            .map(|f| PrFile {
                filename: f.filename,
                patch: f.patch,
            })
            .collect())
    }

    #[instrument(skip_all, fields(head = %request.head))]
    fn create_pull_request(&self, request: &NewPullRequest) -> Result<PullRequest> {
        let url = self.repo_url("pulls")?;
        let payload = json!({
            "title": request.title,
            "head": request.head,
            "base": request.base,
            "body": request.body,
        });
        let raw: GhPull = self.create_json("create pull request", || {
            self.http.post(url.clone()).json(&payload)
        })?;
        Ok(raw.into())
    }

    #[instrument(skip_all, fields(number))]
    fn update_pull_request(&self, number: u64, title: &str, body: &str) -> Result<PullRequest> {
        let url = self.repo_url(&format!("pulls/{number}"))?;
        let payload = json!({ "title": title, "body": body });
        let raw: GhPull = self.send_json("update pull request", || {
            self.http.patch(url.clone()).json(&payload)
        })?;
        Ok(raw.into())
    }

    #[instrument(skip_all, fields(number, verdict = %verdict))]
    fn create_review(&self, number: u64, verdict: Verdict, body: &str) -> Result<()> {
        let url = self.repo_url(&format!("pulls/{number}/reviews"))?;
        let payload = json!({ "event": verdict.review_event(), "body": body });
        let _: serde_json::Value = self.create_json("create review", || {
            self.http.post(url.clone()).json(&payload)
        })?;
        Ok(())
    }
}
