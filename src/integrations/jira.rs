//! JIRA Issue Fetcher
//!
//! Pulls the full issue list of a project through the REST search endpoint
//! and maps each issue into a mirror candidate row.

use super::source::{FetchedIssues, IssueSource, RejectedIssue};
use super::timestamp::parse_jira_time;
use crate::config::JiraConfig;
use crate::mirror::{now_utc, validate_project_key, CandidateIssue};
use crate::{MirrorError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Fields the mirror needs; everything else is left on the server
const SEARCH_FIELDS: &str = "summary,status,assignee,updated";

/// Per-request timeout for the credential and project-list calls
const GET_TIMEOUT: Duration = Duration::from_secs(10);

/// JIRA REST client scoped to the calls the mirror makes
pub struct JiraClient {
    client: Client,
    base_url: String,
    username: Option<String>,
    auth_token: Option<String>,
    page_size: u32,
    search_timeout: Duration,
}

/// JIRA issue representation (projected fields only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraIssue {
    pub key: String,
    pub fields: JiraFields,
}

/// Projected JIRA issue fields
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JiraFields {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub status: Option<JiraStatus>,
    #[serde(default)]
    pub assignee: Option<JiraUser>,
    #[serde(default)]
    pub updated: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraStatus {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraUser {
    #[serde(rename = "displayName")]
    pub display_name: String,
    #[serde(rename = "accountId", default)]
    pub account_id: Option<String>,
    #[serde(rename = "emailAddress", default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraSearchResponse {
    /// Required; paging stops once `startAt` reaches it
    pub total: u32,
    #[serde(rename = "startAt", default)]
    pub start_at: u32,
    #[serde(rename = "maxResults", default)]
    pub max_results: u32,
    #[serde(default)]
    pub issues: Vec<JiraIssue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraProject {
    pub id: String,
    pub key: String,
    pub name: String,
}

impl JiraClient {
    /// Create a new JIRA client; the token is read from `config.token_env`.
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: &JiraConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| MirrorError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: format!(
                "{}/rest/api/{}",
                config.url.trim_end_matches('/'),
                config.api_version
            ),
            username: config.username.clone(),
            auth_token: config.token(),
            page_size: config.page_size.max(1),
            search_timeout: config.request_timeout(),
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_token.is_some()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET with credentials attached (basic auth when a username is set)
    fn get(&self, path: &str) -> RequestBuilder {
        let request = self.client.get(format!("{}{}", self.base_url, path));
        match (&self.username, &self.auth_token) {
            (Some(user), token) => request.basic_auth(user, token.as_deref()),
            (None, Some(token)) => request.bearer_auth(token),
            (None, None) => request,
        }
    }

    /// Check the credentials against `/myself` and return the authenticated user
    pub async fn verify_credentials(&self) -> Result<JiraUser> {
        debug!("Verifying JIRA credentials");

        let response = self.get("/myself").timeout(GET_TIMEOUT).send().await?;
        let user: JiraUser = ok_or_error(response).await?.json().await?;

        debug!(user = %user.display_name, "JIRA authentication succeeded");
        Ok(user)
    }

    /// List projects visible to the credentials
    pub async fn list_projects(&self) -> Result<Vec<JiraProject>> {
        let response = self
            .get("/project")
            .header("Accept", "application/json")
            .timeout(GET_TIMEOUT)
            .send()
            .await?;
        Ok(ok_or_error(response).await?.json().await?)
    }

    /// Fetch one page of a JQL search
    pub async fn search_page(&self, jql: &str, start_at: u32) -> Result<JiraSearchResponse> {
        let params = [
            ("jql", jql.to_string()),
            ("startAt", start_at.to_string()),
            ("maxResults", self.page_size.to_string()),
            ("fields", SEARCH_FIELDS.to_string()),
        ];

        debug!(jql = %jql, start_at, max_results = self.page_size, "Searching JIRA issues");

        let response = self
            .get("/search")
            .query(&params)
            .timeout(self.search_timeout)
            .send()
            .await?;
        Ok(ok_or_error(response).await?.json().await?)
    }

    /// Best-effort diagnostic: log which projects the credentials can see.
    /// Failures here are logged and swallowed.
    async fn log_available_projects(&self, requested: &str) {
        match self.list_projects().await {
            Ok(projects) => {
                let keys: Vec<&str> = projects.iter().map(|p| p.key.as_str()).collect();
                warn!(
                    requested = %requested,
                    available = ?keys,
                    "Project search failed; listing projects visible to these credentials"
                );
            }
            Err(e) => {
                warn!(requested = %requested, error = %e, "Failed to list JIRA projects");
            }
        }
    }

    /// Fetch every issue in a project, paging in key order
    pub async fn fetch_all(&self, project_key: &str) -> Result<FetchedIssues> {
        validate_project_key(project_key)?;
        self.verify_credentials().await?;

        let jql = format!("project = \"{}\" ORDER BY key ASC", project_key);
        let seen_at = now_utc();
        let mut fetched = FetchedIssues::default();
        let mut start_at = 0u32;

        loop {
            let page = match self.search_page(&jql, start_at).await {
                Ok(page) => page,
                Err(e @ MirrorError::RemoteRequestFailed { status: 400 | 404, .. }) => {
                    self.log_available_projects(project_key).await;
                    return Err(e);
                }
                Err(e) => return Err(e),
            };

            let returned = page.issues.len() as u32;
            for issue in page.issues {
                match issue_to_candidate(&issue, project_key, seen_at) {
                    Ok(candidate) => fetched.candidates.push(candidate),
                    Err(error) => {
                        warn!(key = %issue.key, error = %error, "Skipping unmappable JIRA issue");
                        fetched.rejected.push(RejectedIssue {
                            external_id: issue.key,
                            error,
                        });
                    }
                }
            }

            start_at += returned;
            if returned == 0 || start_at >= page.total {
                break;
            }
        }

        info!(
            project = %project_key,
            issues = fetched.candidates.len(),
            rejected = fetched.rejected.len(),
            "JIRA fetch complete"
        );
        Ok(fetched)
    }
}

#[async_trait]
impl IssueSource for JiraClient {
    async fn fetch_project_issues(&self, project_key: &str) -> Result<FetchedIssues> {
        self.fetch_all(project_key).await
    }
}

/// Map a JIRA issue to a mirror candidate row
pub fn issue_to_candidate(
    issue: &JiraIssue,
    project_key: &str,
    seen_at: DateTime<Utc>,
) -> Result<CandidateIssue> {
    let remote_updated_at = match issue.fields.updated {
        Some(ref updated) => parse_jira_time(updated)?,
        None => None,
    };

    Ok(CandidateIssue::new(
        issue.key.clone(),
        project_key,
        issue.fields.summary.clone().unwrap_or_default(),
        issue
            .fields
            .status
            .as_ref()
            .map(|s| s.name.clone())
            .unwrap_or_default(),
    )
    .with_assignee(issue.fields.assignee.as_ref().map(|a| a.display_name.clone()))
    .with_remote_updated_at(remote_updated_at)
    .with_last_seen_at(seen_at))
}

/// Pass through 2xx responses, classify everything else
async fn ok_or_error(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            let body = response.text().await.unwrap_or_default();
            Err(MirrorError::RemoteAuthFailed(format!("HTTP {}: {}", status, body)))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            Err(MirrorError::RemoteRequestFailed {
                status: status.as_u16(),
                body: format!("Rate limited, retry after {} seconds", retry_after),
            })
        }
        status => {
            let body = response.text().await.unwrap_or_default();
            Err(MirrorError::RemoteRequestFailed {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::UNASSIGNED;
    use chrono::TimeZone;

    fn issue(key: &str, updated: Option<&str>, assignee: Option<&str>) -> JiraIssue {
        JiraIssue {
            key: key.to_string(),
            fields: JiraFields {
                summary: Some(format!("Summary {}", key)),
                status: Some(JiraStatus {
                    name: "To Do".to_string(),
                }),
                assignee: assignee.map(|name| JiraUser {
                    display_name: name.to_string(),
                    account_id: None,
                    email: None,
                }),
                updated: updated.map(str::to_string),
            },
        }
    }

    #[test]
    fn test_client_creation() {
        let config = JiraConfig::new("https://jira.example.com/");
        let client = JiraClient::new(&config).expect("Failed to create client");
        assert_eq!(client.base_url(), "https://jira.example.com/rest/api/2");

        let client = client.with_token("secret");
        assert!(client.is_authenticated());
    }

    #[test]
    fn test_issue_to_candidate() {
        let seen = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let candidate = issue_to_candidate(
            &issue("TKP-2", Some("2024-01-02T15:04:05.000+0300"), Some("Ana")),
            "TKP",
            seen,
        )
        .unwrap();

        assert_eq!(candidate.external_id, "TKP-2");
        assert_eq!(candidate.project_key, "TKP");
        assert_eq!(candidate.status, "To Do");
        assert_eq!(candidate.assignee, "Ana");
        assert_eq!(candidate.last_seen_at, seen);
        assert_eq!(
            candidate.remote_updated_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 12, 4, 5).unwrap())
        );
    }

    #[test]
    fn test_missing_assignee_and_timestamp() {
        let candidate = issue_to_candidate(&issue("TKP-3", None, None), "TKP", now_utc()).unwrap();
        assert_eq!(candidate.assignee, UNASSIGNED);
        assert_eq!(candidate.remote_updated_at, None);
    }

    #[test]
    fn test_bad_timestamp_is_rejected() {
        let err = issue_to_candidate(&issue("TKP-4", Some("yesterday"), None), "TKP", now_utc())
            .unwrap_err();
        assert!(matches!(err, MirrorError::TimeParseFailed { .. }));
    }

    #[test]
    fn test_search_response_deserializes_null_fields() {
        let json = r#"{
            "startAt": 0, "maxResults": 50, "total": 1,
            "issues": [{"key": "TKP-1", "fields": {
                "summary": "First", "status": {"name": "To Do"},
                "assignee": null, "updated": null
            }}]
        }"#;
        let page: JiraSearchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(page.total, 1);
        assert!(page.issues[0].fields.assignee.is_none());
        assert!(page.issues[0].fields.updated.is_none());
    }

    #[test]
    fn test_search_response_requires_total() {
        let json = r#"{"startAt": 0, "maxResults": 1, "issues": []}"#;
        assert!(serde_json::from_str::<JiraSearchResponse>(json).is_err());
    }

    #[tokio::test]
    async fn test_invalid_project_key_fails_before_network() {
        let client = JiraClient::new(&JiraConfig::new("http://127.0.0.1:9")).unwrap();
        let err = client.fetch_all("TKP\" OR 1=1").await.unwrap_err();
        assert!(matches!(err, MirrorError::InvalidProjectKey(_)));
    }
}
