use crate::action::ProposedAction;
use crate::format::{CompletionVerb, format_completion_message};
use std::sync::Arc;
use thiserror::Error;
use wt_tracker::{Issue, IssueTracker, IssueUpdate, NewIssue, Project, TrackerError};

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("update for {0} has no fields to change")]
    EmptyUpdate(String),

    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub issue: Issue,
    pub verb: CompletionVerb,
}

impl ExecutionOutcome {
    pub fn message(&self) -> String {
        format_completion_message(&self.issue, self.verb)
    }
}

/// Performs exactly one tracker mutation for a confirmed action, then re-reads the issue.
pub struct ActionExecutor {
    tracker: Arc<dyn IssueTracker>,
    issue_type: String,
}

impl ActionExecutor {
    pub fn new(tracker: Arc<dyn IssueTracker>, issue_type: impl Into<String>) -> Self {
        Self {
            tracker,
            issue_type: issue_type.into(),
        }
    }

    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(kind = action.kind(), project = %project.key, issue_key = ?action.issue_key())
    )]
    pub async fn execute(
        &self,
        action: &ProposedAction,
        project: &Project,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let (key, verb) = match action {
            ProposedAction::Create {
                summary,
                description,
            } => {
                let key = self
                    .tracker
                    .create_issue(NewIssue {
                        parent_key: project.key.clone(),
                        summary: summary.clone(),
                        description: description.clone(),
                        issue_type: self.issue_type.clone(),
                    })
                    .await?;
                (key, CompletionVerb::Created)
            }
            ProposedAction::Update {
                issue_key,
                summary,
                description,
            } => {
                let update = IssueUpdate {
                    summary: summary.clone(),
                    description: description.clone(),
                };
                if update.is_empty() {
                    return Err(ExecutionError::EmptyUpdate(issue_key.clone()));
                }
                self.tracker.update_issue(issue_key, update).await?;
                (issue_key.clone(), CompletionVerb::Updated)
            }
            ProposedAction::Comment { issue_key, comment } => {
                self.tracker.add_comment(issue_key, comment).await?;
                (issue_key.clone(), CompletionVerb::Commented)
            }
        };

        let issue = self.tracker.get_issue(&key).await?;
        tracing::info!(issue_key = %issue.key, status = %issue.status, "tracker action executed");
        Ok(ExecutionOutcome { issue, verb })
    }
}
