use crate::error::Result;
use crate::types::{Issue, IssueUpdate, NewIssue, Project};
use async_trait::async_trait;

#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Most recently updated parent item whose summary matches `name`.
    async fn find_project(&self, name: &str) -> Result<Option<Project>>;
    async fn list_children(&self, parent_key: &str, max_results: usize) -> Result<Vec<Issue>>;
    async fn get_issue(&self, key: &str) -> Result<Issue>;
    /// Returns the key of the created issue.
    async fn create_issue(&self, issue: NewIssue) -> Result<String>;
    async fn update_issue(&self, key: &str, update: IssueUpdate) -> Result<()>;
    async fn add_comment(&self, key: &str, body: &str) -> Result<()>;
}
