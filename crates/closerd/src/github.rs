//! GitHub REST implementation of the collaborator API.

use std::time::Duration;

use async_trait::async_trait;
use closer_core::collaborator::{Collaborator, CollaboratorError, Result};
use closer_core::types::{IssueEdit, IssueRef, Label, RepoRef};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const USER_AGENT_VALUE: &str = "mistaken-pull-closer";
const API_VERSION: &str = "2022-11-28";
const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";
const RAW_MEDIA_TYPE: &str = "application/vnd.github.raw+json";

#[derive(Debug, Error)]
pub enum GithubClientError {
    #[error("invalid github authorization header")]
    InvalidToken,
    #[error("failed to create github api client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Error body returned by the REST API.
#[derive(Debug, Default, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    code: String,
}

impl ApiError {
    fn already_exists(&self) -> bool {
        self.errors.iter().any(|e| e.code == "already_exists")
    }
}

#[derive(Debug, Deserialize)]
struct PermissionResponse {
    permission: String,
}

#[derive(Debug, Serialize)]
struct CommentRequest<'a> {
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct LabelRequest<'a> {
    name: &'a str,
    color: &'a str,
}

#[derive(Debug, Serialize)]
struct AddLabelsRequest<'a> {
    labels: &'a [String],
}

/// Authenticated GitHub REST client.
#[derive(Debug, Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
}

impl GithubClient {
    pub fn new(
        api_base: &str,
        token: Option<&str>,
        timeout: Duration,
    ) -> std::result::Result<Self, GithubClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        headers.insert(ACCEPT, HeaderValue::from_static(JSON_MEDIA_TYPE));
        headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                .map_err(|_| GithubClientError::InvalidToken)?;
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    /// URL for a repository-relative endpoint.
    fn repo_url(&self, repo: &RepoRef, rest: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_base,
            urlencoding::encode(&repo.owner),
            urlencoding::encode(&repo.name),
            rest
        )
    }

    /// Send a request and classify non-success responses.
    async fn send(&self, request: RequestBuilder, resource: &str) -> Result<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(|e| CollaboratorError::Fetch(format!("{resource}: {e}")))?;

        if response.status().is_success() {
            return Ok(response);
        }
        Err(classify_error(response, resource).await)
    }

    async fn json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        response
            .json()
            .await
            .map_err(|e| CollaboratorError::InvalidResponse(e.to_string()))
    }
}

/// Map an error response onto the collaborator taxonomy.
async fn classify_error(response: reqwest::Response, resource: &str) -> CollaboratorError {
    let status = response.status();
    let body = response.json::<ApiError>().await.unwrap_or_default();

    match status {
        StatusCode::NOT_FOUND => CollaboratorError::NotFound(resource.to_string()),
        StatusCode::UNPROCESSABLE_ENTITY if body.already_exists() => {
            CollaboratorError::AlreadyExists(resource.to_string())
        }
        _ => CollaboratorError::Http {
            status: status.as_u16(),
            message: if body.message.is_empty() {
                "unknown error".to_string()
            } else {
                body.message
            },
        },
    }
}

#[async_trait]
impl Collaborator for GithubClient {
    async fn permission_level(&self, repo: &RepoRef, username: &str) -> Result<String> {
        let url = self.repo_url(
            repo,
            &format!("collaborators/{}/permission", urlencoding::encode(username)),
        );
        let response = self
            .send(self.http.get(&url), &format!("permission of {username}"))
            .await?;
        let body: PermissionResponse = Self::json(response).await?;
        Ok(body.permission)
    }

    async fn create_comment(&self, issue: &IssueRef, body: &str) -> Result<()> {
        let url = self.repo_url(&issue.repo, &format!("issues/{}/comments", issue.number));
        self.send(
            self.http.post(&url).json(&CommentRequest { body }),
            &format!("comment on {issue}"),
        )
        .await?;
        Ok(())
    }

    async fn get_label(&self, repo: &RepoRef, name: &str) -> Result<Label> {
        let url = self.repo_url(repo, &format!("labels/{}", urlencoding::encode(name)));
        let response = self.send(self.http.get(&url), &format!("label {name}")).await?;
        Self::json(response).await
    }

    async fn create_label(&self, repo: &RepoRef, name: &str, color: &str) -> Result<Label> {
        let url = self.repo_url(repo, "labels");
        let response = self
            .send(
                self.http.post(&url).json(&LabelRequest { name, color }),
                &format!("label {name}"),
            )
            .await?;
        Self::json(response).await
    }

    async fn add_labels(&self, issue: &IssueRef, names: &[String]) -> Result<()> {
        let url = self.repo_url(&issue.repo, &format!("issues/{}/labels", issue.number));
        self.send(
            self.http.post(&url).json(&AddLabelsRequest { labels: names }),
            &format!("labels on {issue}"),
        )
        .await?;
        Ok(())
    }

    async fn edit_issue(&self, issue: &IssueRef, edit: &IssueEdit) -> Result<()> {
        let url = self.repo_url(&issue.repo, &format!("issues/{}", issue.number));
        self.send(self.http.patch(&url).json(edit), &issue.to_string())
            .await?;
        Ok(())
    }

    async fn repository_file(&self, repo: &RepoRef, path: &str) -> Result<Option<String>> {
        let encoded: Vec<String> = path
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        let url = self.repo_url(repo, &format!("contents/{}", encoded.join("/")));

        match self
            .send(self.http.get(&url).header(ACCEPT, RAW_MEDIA_TYPE), path)
            .await
        {
            Ok(response) => response
                .text()
                .await
                .map(Some)
                .map_err(|e| CollaboratorError::InvalidResponse(e.to_string())),
            Err(CollaboratorError::NotFound(_)) => {
                debug!(repo = %repo, path, "repository file not found");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
