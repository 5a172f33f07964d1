//! Issue tracker bridge for WhatsTrack.
//!
//! The conversation engine only talks to [`IssueTracker`]; [`JiraClient`] is the
//! Jira Cloud REST v3 implementation used in production.

mod error;
mod jira;
mod traits;
mod types;

pub use error::{Result, TrackerError};
pub use jira::{JiraClient, JiraConfig, adf_paragraph, jql_quote};
pub use traits::IssueTracker;
pub use types::{Issue, IssueUpdate, NewIssue, Project};
