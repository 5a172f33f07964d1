//! In-memory collaborators for engine, dispatcher and webhook tests.

use crate::action::Decision;
use crate::decision::{ActionDecider, DecisionError, DecisionRequest};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use wt_channels::{ChannelAdapter, InboundMessage, OutboundMessage};
use wt_tracker::{Issue, IssueTracker, IssueUpdate, NewIssue, Project, TrackerError};

pub fn inbound(from: &str, text: &str) -> InboundMessage {
    InboundMessage {
        message_id: ulid::Ulid::new().to_string().into(),
        sender_id: from.into(),
        sender_name: Some("Tester".to_string()),
        content: text.to_string(),
        sent_at: Utc::now(),
        received_at: Utc::now(),
    }
}

#[derive(Default)]
pub struct FakeChat {
    sent: Mutex<Vec<(String, String)>>,
    read: Mutex<Vec<String>>,
    fail_mark_read: AtomicBool,
}

impl FakeChat {
    pub fn failing_mark_read() -> Self {
        let chat = Self::default();
        chat.fail_mark_read.store(true, Ordering::SeqCst);
        chat
    }

    pub fn sent_to(&self, recipient: &str) -> Vec<String> {
        self.sent
            .lock()
            .expect("sent lock")
            .iter()
            .filter(|(to, _)| to == recipient)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn last_to(&self, recipient: &str) -> Option<String> {
        self.sent_to(recipient).pop()
    }

    pub fn read_receipts(&self) -> Vec<String> {
        self.read.lock().expect("read lock").clone()
    }
}

#[async_trait]
impl ChannelAdapter for FakeChat {
    async fn send(&self, recipient_id: &str, message: OutboundMessage) -> anyhow::Result<()> {
        self.sent
            .lock()
            .expect("sent lock")
            .push((recipient_id.to_string(), message.content));
        Ok(())
    }

    async fn mark_read(&self, message_id: &str) -> anyhow::Result<()> {
        if self.fail_mark_read.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("graph api unavailable"));
        }
        self.read
            .lock()
            .expect("read lock")
            .push(message_id.to_string());
        Ok(())
    }
}

pub struct FakeTracker {
    projects: Vec<Project>,
    issues: Mutex<HashMap<String, Issue>>,
    created: Mutex<Vec<NewIssue>>,
    comments: Mutex<Vec<(String, String)>>,
    mutations: AtomicUsize,
    find_calls: AtomicUsize,
    next_id: AtomicUsize,
    mutation_delay: Option<Duration>,
}

impl FakeTracker {
    pub fn with_project(project: Project) -> Self {
        Self {
            projects: vec![project],
            issues: Mutex::new(HashMap::new()),
            created: Mutex::new(Vec::new()),
            comments: Mutex::new(Vec::new()),
            mutations: AtomicUsize::new(0),
            find_calls: AtomicUsize::new(0),
            next_id: AtomicUsize::new(100),
            mutation_delay: None,
        }
    }

    /// Slows every mutation so concurrent callers overlap.
    pub fn with_mutation_delay(mut self, delay: Duration) -> Self {
        self.mutation_delay = Some(delay);
        self
    }

    pub fn insert_issue(&self, key: &str, summary: &str) {
        self.issues
            .lock()
            .expect("issues lock")
            .insert(key.to_string(), issue(key, summary));
    }

    pub fn created(&self) -> Vec<NewIssue> {
        self.created.lock().expect("created lock").clone()
    }

    pub fn comments(&self) -> Vec<(String, String)> {
        self.comments.lock().expect("comments lock").clone()
    }

    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }

    async fn mutate(&self) {
        if let Some(delay) = self.mutation_delay {
            tokio::time::sleep(delay).await;
        }
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }
}

fn issue(key: &str, summary: &str) -> Issue {
    Issue {
        key: key.to_string(),
        summary: summary.to_string(),
        status: "To Do".to_string(),
        assignee: None,
        url: format!("https://tracker.test/browse/{key}"),
    }
}

#[async_trait]
impl IssueTracker for FakeTracker {
    async fn find_project(&self, name: &str) -> wt_tracker::Result<Option<Project>> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        let needle = name.trim().to_lowercase();
        Ok(self
            .projects
            .iter()
            .find(|p| p.name.to_lowercase().contains(&needle))
            .cloned())
    }

    async fn list_children(
        &self,
        _parent_key: &str,
        max_results: usize,
    ) -> wt_tracker::Result<Vec<Issue>> {
        let mut issues: Vec<Issue> = self
            .issues
            .lock()
            .expect("issues lock")
            .values()
            .cloned()
            .collect();
        issues.sort_by(|a, b| a.key.cmp(&b.key));
        issues.truncate(max_results);
        Ok(issues)
    }

    async fn get_issue(&self, key: &str) -> wt_tracker::Result<Issue> {
        self.issues
            .lock()
            .expect("issues lock")
            .get(key)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(key.to_string()))
    }

    async fn create_issue(&self, new_issue: NewIssue) -> wt_tracker::Result<String> {
        self.mutate().await;
        let key = format!("OPS-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.insert_issue(&key, &new_issue.summary);
        self.created
            .lock()
            .expect("created lock")
            .push(new_issue);
        Ok(key)
    }

    async fn update_issue(&self, key: &str, update: IssueUpdate) -> wt_tracker::Result<()> {
        if !self.issues.lock().expect("issues lock").contains_key(key) {
            return Err(TrackerError::NotFound(key.to_string()));
        }
        self.mutate().await;
        if let Some(summary) = update.summary {
            if let Some(issue) = self.issues.lock().expect("issues lock").get_mut(key) {
                issue.summary = summary;
            }
        }
        Ok(())
    }

    async fn add_comment(&self, key: &str, body: &str) -> wt_tracker::Result<()> {
        if !self.issues.lock().expect("issues lock").contains_key(key) {
            return Err(TrackerError::NotFound(key.to_string()));
        }
        self.mutate().await;
        self.comments
            .lock()
            .expect("comments lock")
            .push((key.to_string(), body.to_string()));
        Ok(())
    }
}

/// Returns a fixed decision, or fails when constructed with `failing`.
pub struct FixedDecider {
    decision: Option<Decision>,
    calls: AtomicUsize,
}

impl FixedDecider {
    pub fn new(decision: Decision) -> Self {
        Self {
            decision: Some(decision),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            decision: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActionDecider for FixedDecider {
    async fn decide(&self, _request: DecisionRequest<'_>) -> Result<Decision, DecisionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.decision
            .clone()
            .ok_or_else(|| DecisionError::Malformed("model returned prose".to_string()))
    }
}
