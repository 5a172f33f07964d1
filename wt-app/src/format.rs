//! User-facing text for the WhatsApp conversation.

use crate::action::ProposedAction;
use wt_tracker::Issue;

pub const ASK_PROJECT: &str = "Please specify the Project name this should be related to.";
pub const PROCESSING: &str = "Processing your request...";
pub const GENERIC_ERROR: &str = "Something went wrong. Please try again.";
pub const CANCELLED: &str = "Action cancelled.";
pub const NO_ACTION: &str = "No tracker action is needed for this message.";
pub const CONFIRM_PROMPT: &str = "Reply *yes* to confirm or *no* to cancel.";

const DESCRIPTION_PREVIEW_CHARS: usize = 300;

pub fn project_not_found(name: &str) -> String {
    format!("Project \"{name}\" not found. Please try again with a valid Project name.")
}

/// Character-count truncation with a trailing ellipsis inside the limit.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

pub fn format_proposed_action(action: &ProposedAction, project_name: &str) -> String {
    let body = match action {
        ProposedAction::Create {
            summary,
            description,
        } => {
            let mut out = format!(
                "*Proposed action:* create a new task in *{project_name}*\n\n*Summary:* {summary}"
            );
            if let Some(description) = description {
                out.push_str(&format!(
                    "\n*Description:* {}",
                    truncate(description, DESCRIPTION_PREVIEW_CHARS)
                ));
            }
            out
        }
        ProposedAction::Update {
            issue_key,
            summary,
            description,
        } => {
            let mut out = format!("*Proposed action:* update *{issue_key}* in *{project_name}*");
            if let Some(summary) = summary {
                out.push_str(&format!("\n\n*New summary:* {summary}"));
            }
            if let Some(description) = description {
                out.push_str(&format!(
                    "\n*New description:* {}",
                    truncate(description, DESCRIPTION_PREVIEW_CHARS)
                ));
            }
            out
        }
        ProposedAction::Comment { issue_key, comment } => format!(
            "*Proposed action:* comment on *{issue_key}* in *{project_name}*\n\n*Comment:* {}",
            truncate(comment, DESCRIPTION_PREVIEW_CHARS)
        ),
    };
    format!("{body}\n\n{CONFIRM_PROMPT}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionVerb {
    Created,
    Updated,
    Commented,
}

impl CompletionVerb {
    fn label(self) -> &'static str {
        match self {
            Self::Created => "Created new task",
            Self::Updated => "Updated task",
            Self::Commented => "Added comment to",
        }
    }
}

pub fn format_completion_message(issue: &Issue, verb: CompletionVerb) -> String {
    format!(
        "{}: *{}*\n{}\nStatus: {}\n\n{}",
        verb.label(),
        issue.key,
        issue.summary,
        issue.status,
        issue.url
    )
}

/// Candidate issue listing used in the decision prompt.
pub fn format_issue_list(issues: &[Issue]) -> String {
    if issues.is_empty() {
        return "(no existing issues)".to_string();
    }
    issues
        .iter()
        .map(|issue| format!("- {}: {}", issue.key, issue.summary))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue() -> Issue {
        Issue {
            key: "OPS-42".to_string(),
            summary: "Server down".to_string(),
            status: "To Do".to_string(),
            assignee: None,
            url: "https://acme.atlassian.net/browse/OPS-42".to_string(),
        }
    }

    #[test]
    fn truncate_keeps_short_text() {
        assert_eq!(truncate("abc", 10), "abc");
        assert_eq!(truncate("abcde", 5), "abcde");
    }

    #[test]
    fn truncate_shortens_with_ellipsis() {
        assert_eq!(truncate("abcdefgh", 5), "ab...");
        assert_eq!(truncate("áéíóúñü", 6), "áéí...");
    }

    #[test]
    fn completion_message_layout() {
        assert_eq!(
            format_completion_message(&issue(), CompletionVerb::Created),
            "Created new task: *OPS-42*\nServer down\nStatus: To Do\n\nhttps://acme.atlassian.net/browse/OPS-42"
        );
        assert!(
            format_completion_message(&issue(), CompletionVerb::Commented)
                .starts_with("Added comment to: *OPS-42*")
        );
    }

    #[test]
    fn proposed_create_ends_with_prompt() {
        let text = format_proposed_action(
            &ProposedAction::Create {
                summary: "Server down".to_string(),
                description: Some("x".repeat(400)),
            },
            "Ops",
        );
        assert!(text.contains("*Ops*"));
        assert!(text.contains("*Summary:* Server down"));
        assert!(text.contains(&format!("{}...", "x".repeat(297))));
        assert!(!text.contains(&"x".repeat(298)));
        assert!(text.ends_with(CONFIRM_PROMPT));
    }

    #[test]
    fn proposed_update_lists_only_present_fields() {
        let text = format_proposed_action(
            &ProposedAction::Update {
                issue_key: "OPS-7".to_string(),
                summary: None,
                description: Some("more detail".to_string()),
            },
            "Ops",
        );
        assert!(text.contains("update *OPS-7*"));
        assert!(!text.contains("New summary"));
        assert!(text.contains("*New description:* more detail"));
    }

    #[test]
    fn issue_list_renders_key_and_summary() {
        assert_eq!(format_issue_list(&[issue()]), "- OPS-42: Server down");
        assert_eq!(format_issue_list(&[]), "(no existing issues)");
    }

    #[test]
    fn not_found_quotes_the_name() {
        assert_eq!(
            project_not_found("Opz"),
            "Project \"Opz\" not found. Please try again with a valid Project name."
        );
    }
}
