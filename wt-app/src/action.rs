use serde::Serialize;

/// Tracker mutation proposed to the user and executed only after confirmation.
///
/// Stored verbatim in the session between proposal and execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProposedAction {
    Create {
        summary: String,
        description: Option<String>,
    },
    Update {
        issue_key: String,
        summary: Option<String>,
        description: Option<String>,
    },
    Comment {
        issue_key: String,
        comment: String,
    },
}

impl ProposedAction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::Comment { .. } => "comment",
        }
    }

    pub fn issue_key(&self) -> Option<&str> {
        match self {
            Self::Create { .. } => None,
            Self::Update { issue_key, .. } | Self::Comment { issue_key, .. } => Some(issue_key),
        }
    }
}

/// Outcome of asking a decider what to do with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Propose(ProposedAction),
    NoAction,
}
