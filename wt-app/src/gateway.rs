//! Inbound dispatcher: one ordered lane per chat identity.
//!
//! The webhook acknowledges immediately and submits here. Each lane is drained by a
//! single worker task, so messages from one chat are handled in arrival order while
//! different chats run in parallel. Idle workers retire and are recreated on demand.
//! On shutdown every worker finishes the messages already queued on its lane.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use wt_channels::InboundMessage;

#[async_trait]
pub trait InboundHandler: Send + Sync + 'static {
    async fn handle(&self, inbound: InboundMessage);
}

type Lanes = Arc<DashMap<String, mpsc::UnboundedSender<InboundMessage>>>;

pub struct Gateway {
    handler: Arc<dyn InboundHandler>,
    lanes: Lanes,
    workers: TaskTracker,
    idle_timeout: Duration,
    shutdown: CancellationToken,
}

impl Gateway {
    pub fn new(
        handler: Arc<dyn InboundHandler>,
        idle_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            handler,
            lanes: Arc::new(DashMap::new()),
            workers: TaskTracker::new(),
            idle_timeout,
            shutdown,
        }
    }

    pub fn active_lanes(&self) -> usize {
        self.lanes.len()
    }

    /// Queues a message on its chat's lane. Never blocks.
    pub fn submit(&self, inbound: InboundMessage) {
        if self.shutdown.is_cancelled() {
            tracing::warn!(
                message_id = %inbound.message_id,
                "gateway shutting down; message dropped"
            );
            return;
        }
        let chat_id = inbound.sender_id.as_str().to_string();
        // The send happens under the entry lock, which is also what lane retirement takes.
        let mut lane = self
            .lanes
            .entry(chat_id.clone())
            .or_insert_with(|| self.spawn_lane(&chat_id));
        if let Err(mpsc::error::SendError(returned)) = lane.send(inbound) {
            tracing::warn!(chat_id = %chat_id, "chat lane worker exited; starting a new one");
            let tx = self.spawn_lane(&chat_id);
            if let Err(mpsc::error::SendError(lost)) = tx.send(returned) {
                tracing::error!(
                    chat_id = %chat_id,
                    message_id = %lost.message_id,
                    "could not enqueue message on chat lane"
                );
            }
            *lane = tx;
        }
    }

    /// Waits for lane workers to finish once the shutdown token has fired.
    /// Returns false when workers were still busy after `grace`.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.workers.close();
        match tokio::time::timeout(grace, self.workers.wait()).await {
            Ok(()) => {
                tracing::info!("chat lanes drained");
                true
            }
            Err(_) => {
                tracing::warn!(
                    busy_workers = self.workers.len(),
                    grace_ms = grace.as_millis() as u64,
                    "chat lanes still busy after shutdown grace period"
                );
                false
            }
        }
    }

    fn spawn_lane(&self, chat_id: &str) -> mpsc::UnboundedSender<InboundMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        tracing::debug!(chat_id = %chat_id, "chat lane started");
        self.workers.spawn(run_lane(
            chat_id.to_string(),
            tx.clone(),
            rx,
            self.handler.clone(),
            self.lanes.clone(),
            self.idle_timeout,
            self.shutdown.clone(),
        ));
        tx
    }
}

#[tracing::instrument(level = "debug", skip_all, fields(chat_id = %chat_id))]
async fn run_lane(
    chat_id: String,
    own_tx: mpsc::UnboundedSender<InboundMessage>,
    mut rx: mpsc::UnboundedReceiver<InboundMessage>,
    handler: Arc<dyn InboundHandler>,
    lanes: Lanes,
    idle_timeout: Duration,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                rx.close();
                let mut drained = 0_usize;
                while let Some(inbound) = rx.recv().await {
                    handler.handle(inbound).await;
                    drained += 1;
                }
                tracing::info!(drained, "chat lane stopped on shutdown");
                break;
            }
            next = rx.recv() => match next {
                Some(inbound) => handler.handle(inbound).await,
                None => break,
            },
            _ = tokio::time::sleep(idle_timeout) => {
                // Only an empty lane retires; a send that won the entry lock first keeps it alive.
                let retired = lanes
                    .remove_if(&chat_id, |_, current| {
                        current.same_channel(&own_tx) && rx.is_empty()
                    })
                    .is_some();
                if retired {
                    tracing::debug!("chat lane retired after idle timeout");
                    return;
                }
            }
        }
    }
    lanes.remove_if(&chat_id, |_, current| current.same_channel(&own_tx));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::inbound;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, String)>>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl InboundHandler for Recorder {
        async fn handle(&self, inbound: InboundMessage) {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.seen
                .lock()
                .expect("seen lock")
                .push((inbound.sender_id.to_string(), inbound.content));
        }
    }

    impl Recorder {
        fn for_chat(&self, chat: &str) -> Vec<String> {
            self.seen
                .lock()
                .expect("seen lock")
                .iter()
                .filter(|(from, _)| from == chat)
                .map(|(_, text)| text.clone())
                .collect()
        }

        fn total(&self) -> usize {
            self.seen.lock().expect("seen lock").len()
        }
    }

    async fn wait_for(recorder: &Recorder, count: usize) {
        for _ in 0..200 {
            if recorder.total() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} handled messages, saw {}", recorder.total());
    }

    #[tokio::test]
    async fn messages_from_one_chat_keep_arrival_order() {
        let recorder = Arc::new(Recorder {
            delay: Some(Duration::from_millis(2)),
            ..Recorder::default()
        });
        let gateway = Gateway::new(
            recorder.clone(),
            Duration::from_secs(60),
            CancellationToken::new(),
        );
        for i in 0..20 {
            gateway.submit(inbound("chat-a", &format!("a{i}")));
            gateway.submit(inbound("chat-b", &format!("b{i}")));
        }
        wait_for(&recorder, 40).await;

        let expected_a: Vec<String> = (0..20).map(|i| format!("a{i}")).collect();
        let expected_b: Vec<String> = (0..20).map(|i| format!("b{i}")).collect();
        assert_eq!(recorder.for_chat("chat-a"), expected_a);
        assert_eq!(recorder.for_chat("chat-b"), expected_b);
        assert_eq!(gateway.active_lanes(), 2);
    }

    #[tokio::test]
    async fn idle_lane_retires_and_is_recreated() {
        let recorder = Arc::new(Recorder::default());
        let gateway = Gateway::new(
            recorder.clone(),
            Duration::from_millis(20),
            CancellationToken::new(),
        );
        gateway.submit(inbound("chat-a", "first"));
        wait_for(&recorder, 1).await;

        for _ in 0..100 {
            if gateway.active_lanes() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(gateway.active_lanes(), 0);

        gateway.submit(inbound("chat-a", "second"));
        wait_for(&recorder, 2).await;
        assert_eq!(recorder.for_chat("chat-a"), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn many_chats_progress_concurrently() {
        let recorder = Arc::new(Recorder {
            delay: Some(Duration::from_millis(50)),
            ..Recorder::default()
        });
        let gateway = Gateway::new(
            recorder.clone(),
            Duration::from_secs(60),
            CancellationToken::new(),
        );
        let started = tokio::time::Instant::now();
        for i in 0..10 {
            gateway.submit(inbound(&format!("chat-{i}"), "hello"));
        }
        wait_for(&recorder, 10).await;
        // Ten serial handlers would need at least 500ms.
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn idle_retirement_never_reorders_a_chat() {
        let recorder = Arc::new(Recorder::default());
        let gateway = Gateway::new(
            recorder.clone(),
            Duration::from_millis(2),
            CancellationToken::new(),
        );
        for i in 0..60 {
            gateway.submit(inbound("chat-a", &format!("m{i}")));
            if i % 3 == 0 {
                tokio::time::sleep(Duration::from_millis(2 + (i % 4) as u64)).await;
            }
        }
        wait_for(&recorder, 60).await;
        let expected: Vec<String> = (0..60).map(|i| format!("m{i}")).collect();
        assert_eq!(recorder.for_chat("chat-a"), expected);
    }

    #[tokio::test]
    async fn shutdown_finishes_messages_already_queued() {
        let recorder = Arc::new(Recorder {
            delay: Some(Duration::from_millis(50)),
            ..Recorder::default()
        });
        let shutdown = CancellationToken::new();
        let gateway = Gateway::new(recorder.clone(), Duration::from_secs(60), shutdown.clone());
        for text in ["a", "b", "c"] {
            gateway.submit(inbound("chat-a", text));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.cancel();

        assert!(gateway.drain(Duration::from_secs(2)).await);
        assert_eq!(recorder.for_chat("chat-a"), vec!["a", "b", "c"]);
        assert_eq!(gateway.active_lanes(), 0);
    }

    #[tokio::test]
    async fn drain_gives_up_after_grace_period() {
        let recorder = Arc::new(Recorder {
            delay: Some(Duration::from_millis(300)),
            ..Recorder::default()
        });
        let shutdown = CancellationToken::new();
        let gateway = Gateway::new(recorder.clone(), Duration::from_secs(60), shutdown.clone());
        gateway.submit(inbound("chat-a", "slow"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.cancel();

        assert!(!gateway.drain(Duration::from_millis(20)).await);
        assert!(gateway.drain(Duration::from_secs(2)).await);
        assert_eq!(recorder.total(), 1);
    }

    #[tokio::test]
    async fn shutdown_drops_new_submissions() {
        let recorder = Arc::new(Recorder::default());
        let shutdown = CancellationToken::new();
        let gateway = Gateway::new(recorder.clone(), Duration::from_secs(60), shutdown.clone());
        shutdown.cancel();
        gateway.submit(inbound("chat-a", "late"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(recorder.total(), 0);
        assert_eq!(gateway.active_lanes(), 0);
    }
}
