//! Turns a forwarded chat message into a proposed tracker action.

use crate::action::{Decision, ProposedAction};
use crate::format::{format_issue_list, truncate};
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use wt_llm::{ChatMessage, LlmClient, LlmError, ResponseFormat};
use wt_tracker::{Issue, Project};

const SUMMARY_MAX_CHARS: usize = 100;

const SYSTEM_PROMPT: &str = r#"You decide which Jira action a forwarded chat message calls for.

Rules:
- Respond with a single valid JSON object only. No markdown, no explanations.
- The message may be in any language; write summary and description in English.
- Treat the result as a CRM task.

Allowed actions: "create", "update", "comment", "none".
- "create": a new task under the project. Requires a short "summary".
- "update": an existing task from the list changed. Requires "issueKey". Do not change the
  existing summary; put new information in "description".
- "comment": add a note to an existing task from the list. Requires "issueKey"; the comment
  text goes in "description".
- "none": the message needs no tracker action.

issueKey must be one of the listed existing tasks, or null."#;

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("inference call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("malformed decision: {0}")]
    Malformed(String),
}

pub struct DecisionRequest<'a> {
    pub message: &'a str,
    pub project: &'a Project,
    pub candidates: &'a [Issue],
}

#[async_trait]
pub trait ActionDecider: Send + Sync {
    async fn decide(&self, request: DecisionRequest<'_>) -> Result<Decision, DecisionError>;
}

/// Deterministic decider: every message becomes a new task.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderDecider;

#[async_trait]
impl ActionDecider for PlaceholderDecider {
    async fn decide(&self, request: DecisionRequest<'_>) -> Result<Decision, DecisionError> {
        Ok(Decision::Propose(ProposedAction::Create {
            summary: truncate(request.message, SUMMARY_MAX_CHARS),
            description: Some(request.message.to_string()),
        }))
    }
}

pub struct LlmDecider {
    client: LlmClient,
}

impl LlmDecider {
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ActionDecider for LlmDecider {
    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(
            model = %self.client.model(),
            project = %request.project.key,
            candidates = request.candidates.len()
        )
    )]
    async fn decide(&self, request: DecisionRequest<'_>) -> Result<Decision, DecisionError> {
        let messages = [
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(user_prompt(&request)),
        ];
        let response = self
            .client
            .chat(&messages, ResponseFormat::JsonObject)
            .await
            .inspect_err(|e| {
                tracing::warn!(error = %e, transient = e.is_transient(), "llm chat call failed");
            })?;
        let decision = parse_decision(&response.content, request.candidates)?;
        tracing::info!(decision = ?decision, "llm decision parsed");
        Ok(decision)
    }
}

fn user_prompt(request: &DecisionRequest<'_>) -> String {
    format!(
        "Message:\n\"{}\"\n\nJira Project:\n{}\n\nExisting Jira tickets:\n{}\n\n\
         Return JSON exactly in this format:\n\
         {{\"action\": \"create|update|comment|none\", \"issueKey\": string | null, \
         \"summary\": string, \"description\": string}}",
        request.message,
        request.project.name,
        format_issue_list(request.candidates)
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDecision {
    action: String,
    #[serde(default)]
    issue_key: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Validates model output against the action vocabulary and the candidate issues.
pub(crate) fn parse_decision(
    content: &str,
    candidates: &[Issue],
) -> Result<Decision, DecisionError> {
    let raw: RawDecision = serde_json::from_str(strip_code_fence(content))
        .map_err(|e| DecisionError::Malformed(format!("invalid json: {e}")))?;

    let summary = non_blank(raw.summary);
    let description = non_blank(raw.description);
    let issue_key = non_blank(raw.issue_key);

    let action = match raw.action.trim().to_ascii_lowercase().as_str() {
        "none" => return Ok(Decision::NoAction),
        "create" => {
            let summary = summary
                .ok_or_else(|| DecisionError::Malformed("create requires a summary".to_string()))?;
            ProposedAction::Create {
                summary: truncate(&summary, SUMMARY_MAX_CHARS),
                description,
            }
        }
        "update" => ProposedAction::Update {
            issue_key: known_issue_key(issue_key, candidates, "update")?,
            summary,
            description,
        },
        "comment" => {
            let issue_key = known_issue_key(issue_key, candidates, "comment")?;
            let comment = description.ok_or_else(|| {
                DecisionError::Malformed("comment requires a description".to_string())
            })?;
            ProposedAction::Comment { issue_key, comment }
        }
        other => {
            return Err(DecisionError::Malformed(format!(
                "unsupported action {other:?}"
            )));
        }
    };
    Ok(Decision::Propose(action))
}

fn known_issue_key(
    issue_key: Option<String>,
    candidates: &[Issue],
    action: &str,
) -> Result<String, DecisionError> {
    let key = issue_key
        .ok_or_else(|| DecisionError::Malformed(format!("{action} requires an issueKey")))?;
    candidates
        .iter()
        .find(|issue| issue.key.eq_ignore_ascii_case(&key))
        .map(|issue| issue.key.clone())
        .ok_or_else(|| {
            DecisionError::Malformed(format!("issueKey {key} is not under the selected project"))
        })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
