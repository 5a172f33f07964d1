//! Conversation state machine: one forwarded message, one project, one confirmed action.
//!
//! ```text
//! (none) --text--> AwaitingProjectSelection --found--> Resolving --proposal--> AwaitingConfirmation
//!                        |  ^                                                     |   |   |
//!                        +--+ not found                               yes/no ----+   |   +-- other: re-prompt
//!                                                                      (cleared)      |
//! ```
//!
//! Every message for a chat is handled while holding that chat's session guard, so
//! two deliveries of "yes" can never both observe the pending action.

use crate::action::Decision;
use crate::decision::{ActionDecider, DecisionError, DecisionRequest};
use crate::executor::{ActionExecutor, ExecutionError};
use crate::format::{self, format_proposed_action, project_not_found};
use crate::gateway::InboundHandler;
use crate::session::{Session, SessionGuard, SessionPatch, SessionStore, Step};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::Instrument;
use wt_channels::{ChannelAdapter, InboundMessage, OutboundMessage};
use wt_tracker::{IssueTracker, TrackerError};

const YES_TOKENS: &[&str] = &["yes", "y", "si", "confirm", "ok"];
const NO_TOKENS: &[&str] = &["no", "n", "cancel", "cancelar"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Yes,
    No,
    Unrecognized,
}

impl Confirmation {
    pub fn classify(text: &str) -> Self {
        let reply = text.trim().to_lowercase();
        if YES_TOKENS.contains(&reply.as_str()) {
            return Self::Yes;
        }
        if NO_TOKENS.contains(&reply.as_str()) {
            return Self::No;
        }
        Self::Unrecognized
    }
}

#[derive(Debug, Error)]
enum StepError {
    #[error("session integrity violated: {0}")]
    Integrity(&'static str),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Decision(#[from] DecisionError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

pub struct ConversationEngine {
    sessions: Arc<SessionStore>,
    channel: Arc<dyn ChannelAdapter>,
    tracker: Arc<dyn IssueTracker>,
    decider: Arc<dyn ActionDecider>,
    executor: ActionExecutor,
    max_candidate_issues: usize,
}

impl ConversationEngine {
    pub fn new(
        sessions: Arc<SessionStore>,
        channel: Arc<dyn ChannelAdapter>,
        tracker: Arc<dyn IssueTracker>,
        decider: Arc<dyn ActionDecider>,
        issue_type: &str,
        max_candidate_issues: usize,
    ) -> Self {
        Self {
            executor: ActionExecutor::new(tracker.clone(), issue_type),
            sessions,
            channel,
            tracker,
            decider,
            max_candidate_issues,
        }
    }

    pub async fn handle_message(&self, inbound: &InboundMessage) {
        let span = tracing::info_span!(
            "conversation.message",
            chat_id = %inbound.sender_id,
            message_id = %inbound.message_id,
            session_id = tracing::field::Empty,
        );
        self.handle_message_inner(inbound).instrument(span).await
    }

    async fn handle_message_inner(&self, inbound: &InboundMessage) {
        tracing::info!(
            sender_name = ?inbound.sender_name,
            chars = inbound.content.chars().count(),
            "message received"
        );

        if let Err(e) = self.channel.mark_read(&inbound.message_id).await {
            tracing::warn!(error = %e, "mark_read failed");
        }

        let mut guard = self.sessions.lock(&inbound.sender_id).await;
        if let Err(e) = self.dispatch(&mut guard, inbound).await {
            tracing::error!(error = %e, "conversation step failed; session cleared");
            guard.clear();
            self.reply(guard.chat_id(), format::GENERIC_ERROR).await;
        }
    }

    async fn dispatch(
        &self,
        guard: &mut SessionGuard,
        inbound: &InboundMessage,
    ) -> Result<(), StepError> {
        let Some(session) = guard.get() else {
            return self.start(guard, inbound).await;
        };
        tracing::Span::current().record("session_id", tracing::field::display(session.id));

        match session.step {
            Step::AwaitingProjectSelection => {
                self.select_project(guard, session, inbound.content.trim())
                    .await
            }
            Step::AwaitingConfirmation => self.confirm(guard, session, &inbound.content).await,
            // Resolving only exists inside a single guarded handler.
            Step::Resolving => Err(StepError::Integrity("message arrived while resolving")),
        }
    }

    async fn start(
        &self,
        guard: &mut SessionGuard,
        inbound: &InboundMessage,
    ) -> Result<(), StepError> {
        let session = guard.set(Session::new(inbound.content.as_str()));
        tracing::Span::current().record("session_id", tracing::field::display(session.id));
        tracing::info!("conversation started");
        self.reply(guard.chat_id(), format::ASK_PROJECT).await;
        Ok(())
    }

    async fn select_project(
        &self,
        guard: &mut SessionGuard,
        session: Session,
        name: &str,
    ) -> Result<(), StepError> {
        let project = if name.is_empty() {
            None
        } else {
            self.tracker.find_project(name).await?
        };
        let Some(project) = project else {
            tracing::info!(project_name = %name, "project not found");
            self.reply(guard.chat_id(), project_not_found(name)).await;
            return Ok(());
        };
        tracing::info!(project_key = %project.key, "project selected");

        guard
            .update(SessionPatch {
                step: Some(Step::Resolving),
                selected_project: Some(project.clone()),
                ..SessionPatch::default()
            })
            .ok_or(StepError::Integrity("session vanished while resolving"))?;
        self.reply(guard.chat_id(), format::PROCESSING).await;

        let candidates = self
            .tracker
            .list_children(&project.key, self.max_candidate_issues)
            .await?;
        tracing::debug!(candidates = candidates.len(), "candidate issues fetched");

        let decision = self
            .decider
            .decide(DecisionRequest {
                message: &session.original_message,
                project: &project,
                candidates: &candidates,
            })
            .await?;

        match decision {
            Decision::NoAction => {
                tracing::info!("no tracker action needed");
                guard.clear();
                self.reply(guard.chat_id(), format::NO_ACTION).await;
            }
            Decision::Propose(action) => {
                tracing::info!(
                    kind = action.kind(),
                    issue_key = ?action.issue_key(),
                    "action proposed"
                );
                let prompt = format_proposed_action(&action, &project.name);
                guard
                    .update(SessionPatch {
                        step: Some(Step::AwaitingConfirmation),
                        proposed_action: Some(action),
                        ..SessionPatch::default()
                    })
                    .ok_or(StepError::Integrity("session vanished before confirmation"))?;
                self.reply(guard.chat_id(), prompt).await;
            }
        }
        Ok(())
    }

    async fn confirm(
        &self,
        guard: &mut SessionGuard,
        session: Session,
        text: &str,
    ) -> Result<(), StepError> {
        let (Some(project), Some(action)) = (session.selected_project, session.proposed_action)
        else {
            return Err(StepError::Integrity(
                "awaiting confirmation without project or proposal",
            ));
        };

        match Confirmation::classify(text) {
            Confirmation::No => {
                tracing::info!("action cancelled by user");
                guard.clear();
                self.reply(guard.chat_id(), format::CANCELLED).await;
            }
            Confirmation::Unrecognized => {
                tracing::debug!("unrecognized confirmation reply; prompting again");
                self.reply(guard.chat_id(), format_proposed_action(&action, &project.name))
                    .await;
            }
            Confirmation::Yes => {
                tracing::info!(kind = action.kind(), "action confirmed");
                let outcome = self.executor.execute(&action, &project).await?;
                guard.clear();
                self.reply(guard.chat_id(), outcome.message()).await;
            }
        }
        Ok(())
    }

    async fn reply(&self, to: &str, text: impl Into<String>) {
        if let Err(e) = self.channel.send(to, OutboundMessage::text(text)).await {
            tracing::warn!(error = %e, "reply send failed");
        }
    }
}

#[async_trait]
impl InboundHandler for ConversationEngine {
    async fn handle(&self, inbound: InboundMessage) {
        self.handle_message(&inbound).await;
    }
}
