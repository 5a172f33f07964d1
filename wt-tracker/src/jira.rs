use crate::error::{Result, TrackerError};
use crate::traits::IssueTracker;
use crate::types::{Issue, IssueUpdate, NewIssue, Project};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const API_PREFIX: &str = "/rest/api/3";
const SEARCH_FIELDS: &[&str] = &["summary", "status", "issuetype", "assignee", "updated"];
const MAX_RESULTS_CAP: usize = 100;

#[derive(Debug, Clone)]
pub struct JiraConfig {
    pub base_url: String,
    pub email: String,
    pub api_token: String,
    pub project_key: String,
    /// Issue type used for the parent items users pick by name.
    pub parent_issue_type: String,
}

#[derive(Clone)]
pub struct JiraClient {
    http: reqwest::Client,
    base_url: String,
    auth_header: String,
    project_key: String,
    parent_issue_type: String,
}

impl JiraClient {
    pub fn new(config: JiraConfig) -> Result<Self> {
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(TrackerError::InvalidArguments(
                "jira base_url is required".to_string(),
            ));
        }
        let email = config.email.trim();
        let api_token = config.api_token.trim();
        if email.is_empty() || api_token.is_empty() {
            return Err(TrackerError::InvalidArguments(
                "jira email and api_token are required".to_string(),
            ));
        }
        let project_key = config.project_key.trim().to_string();
        if project_key.is_empty() {
            return Err(TrackerError::InvalidArguments(
                "jira project_key is required".to_string(),
            ));
        }
        let parent_issue_type = match config.parent_issue_type.trim() {
            "" => "Project".to_string(),
            value => value.to_string(),
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url,
            auth_header: basic_auth_header(email, api_token),
            project_key,
            parent_issue_type,
        })
    }

    pub fn issue_url(&self, key: &str) -> String {
        format!("{}/browse/{key}", self.base_url)
    }

    pub fn project_key(&self) -> &str {
        &self.project_key
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let url = format!("{}{API_PREFIX}{path}", self.base_url);
        let mut builder = self
            .http
            .request(method.clone(), &url)
            .header("Authorization", &self.auth_header)
            .header("Accept", "application/json");
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read response body>".to_string());

        if status == StatusCode::NOT_FOUND {
            return Err(TrackerError::NotFound(format!("{method} {path}")));
        }
        if !status.is_success() {
            return Err(TrackerError::ExecutionFailed(format!(
                "jira {method} {path} failed: status={status} body={text}"
            )));
        }
        tracing::debug!(%method, path, %status, "jira request completed");

        if status == StatusCode::NO_CONTENT || text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn search(&self, jql: &str, max_results: usize) -> Result<Vec<JiraIssueRecord>> {
        let body = json!({
            "jql": jql,
            "maxResults": max_results.clamp(1, MAX_RESULTS_CAP),
            "fields": SEARCH_FIELDS,
        });
        let value = self.request(Method::POST, "/search/jql", Some(body)).await?;
        let result: JiraSearchResult = serde_json::from_value(value)?;
        Ok(result.issues)
    }

    fn to_issue(&self, record: JiraIssueRecord) -> Issue {
        let url = self.issue_url(&record.key);
        Issue {
            key: record.key,
            summary: record.fields.summary,
            status: record.fields.status.map(|s| s.name).unwrap_or_default(),
            assignee: record.fields.assignee.map(|a| a.display_name),
            url,
        }
    }
}

#[async_trait]
impl IssueTracker for JiraClient {
    #[tracing::instrument(level = "info", skip(self))]
    async fn find_project(&self, name: &str) -> Result<Option<Project>> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }
        let jql = project_search_jql(&self.project_key, &self.parent_issue_type, name);
        let record = self.search(&jql, 1).await?.into_iter().next();
        Ok(record.map(|r| Project {
            key: r.key,
            name: r.fields.summary,
            status: r.fields.status.map(|s| s.name).unwrap_or_default(),
        }))
    }

    #[tracing::instrument(level = "info", skip(self))]
    async fn list_children(&self, parent_key: &str, max_results: usize) -> Result<Vec<Issue>> {
        validate_issue_key(parent_key)?;
        let jql = children_jql(&self.project_key, parent_key);
        let records = self.search(&jql, max_results).await?;
        Ok(records.into_iter().map(|r| self.to_issue(r)).collect())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_issue(&self, key: &str) -> Result<Issue> {
        validate_issue_key(key)?;
        let path = format!("/issue/{key}?fields=summary,status,assignee");
        let value = self.request(Method::GET, &path, None).await?;
        let record: JiraIssueRecord = serde_json::from_value(value)?;
        Ok(self.to_issue(record))
    }

    #[tracing::instrument(level = "info", skip_all, fields(parent = %issue.parent_key))]
    async fn create_issue(&self, issue: NewIssue) -> Result<String> {
        validate_issue_key(&issue.parent_key)?;
        if issue.summary.trim().is_empty() {
            return Err(TrackerError::InvalidArguments(
                "summary must not be empty".to_string(),
            ));
        }
        let body = create_issue_body(&self.project_key, &issue);
        let value = self.request(Method::POST, "/issue", Some(body)).await?;
        let created: CreatedIssue = serde_json::from_value(value)?;
        tracing::info!(key = %created.key, "jira issue created");
        Ok(created.key)
    }

    #[tracing::instrument(level = "info", skip(self, update))]
    async fn update_issue(&self, key: &str, update: IssueUpdate) -> Result<()> {
        validate_issue_key(key)?;
        if update.is_empty() {
            return Err(TrackerError::InvalidArguments(
                "update requires at least one field".to_string(),
            ));
        }
        let body = json!({ "fields": update_fields(&update) });
        self.request(Method::PUT, &format!("/issue/{key}"), Some(body))
            .await?;
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self, body))]
    async fn add_comment(&self, key: &str, body: &str) -> Result<()> {
        validate_issue_key(key)?;
        let payload = comment_body(body)?;
        self.request(Method::POST, &format!("/issue/{key}/comment"), Some(payload))
            .await?;
        Ok(())
    }
}

fn basic_auth_header(email: &str, api_token: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{email}:{api_token}")))
}

/// Quotes a value as a JQL string literal.
pub fn jql_quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '\n' | '\r' | '\t' => out.push(' '),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Single-paragraph Atlassian Document Format body.
pub fn adf_paragraph(text: &str) -> serde_json::Value {
    json!({
        "type": "doc",
        "version": 1,
        "content": [
            {
                "type": "paragraph",
                "content": [{ "type": "text", "text": text }],
            }
        ],
    })
}

fn project_search_jql(project_key: &str, parent_issue_type: &str, name: &str) -> String {
    format!(
        "project = {} AND issuetype = {} AND summary ~ {} ORDER BY updated DESC",
        jql_quote(project_key),
        jql_quote(parent_issue_type),
        jql_quote(name)
    )
}

fn children_jql(project_key: &str, parent_key: &str) -> String {
    format!(
        "project = {} AND parent = {} ORDER BY updated DESC",
        jql_quote(project_key),
        jql_quote(parent_key)
    )
}

fn create_issue_body(project_key: &str, issue: &NewIssue) -> serde_json::Value {
    let mut fields = serde_json::Map::new();
    fields.insert("project".to_string(), json!({ "key": project_key }));
    fields.insert("parent".to_string(), json!({ "key": issue.parent_key }));
    fields.insert("summary".to_string(), json!(issue.summary));
    fields.insert("issuetype".to_string(), json!({ "name": issue.issue_type }));
    if let Some(description) = issue
        .description
        .as_deref()
        .filter(|value| !value.trim().is_empty())
    {
        fields.insert("description".to_string(), adf_paragraph(description));
    }
    json!({ "fields": fields })
}

fn comment_body(body: &str) -> Result<serde_json::Value> {
    if body.trim().is_empty() {
        return Err(TrackerError::InvalidArguments(
            "comment must not be empty".to_string(),
        ));
    }
    Ok(json!({ "body": adf_paragraph(body) }))
}

fn update_fields(update: &IssueUpdate) -> serde_json::Map<String, serde_json::Value> {
    let mut fields = serde_json::Map::new();
    if let Some(summary) = &update.summary {
        fields.insert("summary".to_string(), json!(summary));
    }
    if let Some(description) = &update.description {
        fields.insert("description".to_string(), adf_paragraph(description));
    }
    fields
}

fn validate_issue_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        return Ok(());
    }
    Err(TrackerError::InvalidArguments(format!(
        "invalid issue key: {key:?}"
    )))
}

#[derive(Debug, Deserialize)]
struct JiraSearchResult {
    #[serde(default)]
    issues: Vec<JiraIssueRecord>,
}

#[derive(Debug, Deserialize)]
struct JiraIssueRecord {
    key: String,
    #[serde(default)]
    fields: JiraIssueFields,
}

#[derive(Debug, Default, Deserialize)]
struct JiraIssueFields {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    status: Option<JiraNamed>,
    #[serde(default)]
    assignee: Option<JiraUser>,
}

#[derive(Debug, Deserialize)]
struct JiraNamed {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JiraUser {
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct CreatedIssue {
    key: String,
}
