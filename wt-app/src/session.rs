//! Per-chat conversation memory with idle expiry.
//!
//! Each chat identity owns one slot guarded by an async mutex. The engine holds the
//! slot's guard for the whole handling of one inbound message, so reads and writes
//! for a chat never interleave. Expiry is checked lazily on read; there is no sweeper.

use crate::action::ProposedAction;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;
use wt_tracker::Project;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    AwaitingProjectSelection,
    Resolving,
    AwaitingConfirmation,
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub step: Step,
    pub original_message: String,
    pub selected_project: Option<Project>,
    pub proposed_action: Option<ProposedAction>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(original_message: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            step: Step::AwaitingProjectSelection,
            original_message: original_message.into(),
            selected_project: None,
            proposed_action: None,
            created_at: now,
            last_activity: now,
        }
    }
}

/// Partial session update. The original message is not patchable.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub step: Option<Step>,
    pub selected_project: Option<Project>,
    pub proposed_action: Option<ProposedAction>,
}

impl SessionPatch {
    fn apply(self, session: &mut Session) {
        if let Some(step) = self.step {
            session.step = step;
        }
        if let Some(project) = self.selected_project {
            session.selected_project = Some(project);
        }
        if let Some(action) = self.proposed_action {
            session.proposed_action = Some(action);
        }
    }
}

type Slot = Arc<Mutex<Option<Session>>>;

pub struct SessionStore {
    // Slots are never removed: a removed slot could be re-created while another
    // task still holds the old one, splitting one chat across two mutexes.
    slots: DashMap<String, Slot>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of chat identities seen since startup.
    pub fn tracked_chats(&self) -> usize {
        self.slots.len()
    }

    /// Waits for exclusive access to one chat's session slot.
    pub async fn lock(&self, chat_id: &str) -> SessionGuard {
        let slot = Arc::clone(self.slots.entry(chat_id.to_string()).or_default().value());
        SessionGuard {
            chat_id: chat_id.to_string(),
            slot: slot.lock_owned().await,
            ttl: self.ttl,
        }
    }
}

pub struct SessionGuard {
    chat_id: String,
    slot: OwnedMutexGuard<Option<Session>>,
    ttl: Duration,
}

impl SessionGuard {
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn get(&mut self) -> Option<Session> {
        self.get_at(Utc::now())
    }

    /// Returns the live session and refreshes its activity stamp; evicts it if idle past the TTL.
    pub fn get_at(&mut self, now: DateTime<Utc>) -> Option<Session> {
        let expired = is_expired(self.slot.as_ref()?, now, self.ttl);
        if expired {
            if let Some(stale) = self.slot.take() {
                tracing::debug!(
                    chat_id = %self.chat_id,
                    session_id = %stale.id,
                    last_activity = %stale.last_activity,
                    "session expired"
                );
            }
            return None;
        }
        let session = self.slot.as_mut()?;
        session.last_activity = now;
        Some(session.clone())
    }

    pub fn set(&mut self, session: Session) -> Session {
        self.set_at(session, Utc::now())
    }

    /// Replaces any prior session for this chat.
    pub fn set_at(&mut self, mut session: Session, now: DateTime<Utc>) -> Session {
        session.last_activity = now;
        *self.slot = Some(session.clone());
        session
    }

    pub fn update(&mut self, patch: SessionPatch) -> Option<Session> {
        self.update_at(patch, Utc::now())
    }

    /// Merges `patch` into the live session; absent (or expired) sessions stay absent.
    pub fn update_at(&mut self, patch: SessionPatch, now: DateTime<Utc>) -> Option<Session> {
        self.get_at(now)?;
        let session = self.slot.as_mut()?;
        patch.apply(session);
        session.last_activity = now;
        Some(session.clone())
    }

    pub fn clear(&mut self) {
        *self.slot = None;
    }
}

fn is_expired(session: &Session, now: DateTime<Utc>, ttl: Duration) -> bool {
    match (now - session.last_activity).to_std() {
        Ok(idle) => idle > ttl,
        // Clock went backwards; treat as fresh.
        Err(_) => false,
    }
}
