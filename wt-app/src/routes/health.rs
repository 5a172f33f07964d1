use crate::server::AppState;
use axum::routing::get;
use axum::{Extension, Json};
use chrono::Utc;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new().route("/health", get(get_health))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_health(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    let uptime_seconds = (Utc::now() - state.started_at).num_seconds().max(0);
    Json(serde_json::json!({
        "status": "ok",
        "checked_at": Utc::now(),
        "uptime_seconds": uptime_seconds,
        "decision_mode": state.decision_mode,
        "checks": {
            "conversations": {
                "tracked_chats": state.sessions.tracked_chats(),
                "session_ttl_seconds": state.sessions.ttl().as_secs(),
            },
            "dispatch": {
                "active_lanes": state.gateway.active_lanes(),
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{Gateway, InboundHandler};
    use crate::session::SessionStore;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;
    use wt_channels::InboundMessage;

    struct Ignore;

    #[async_trait]
    impl InboundHandler for Ignore {
        async fn handle(&self, _inbound: InboundMessage) {}
    }

    #[tokio::test]
    async fn health_reports_runtime_counters() {
        let sessions = Arc::new(SessionStore::new(Duration::from_secs(600)));
        sessions.lock("5491100000000").await.clear();
        let gateway = Arc::new(Gateway::new(
            Arc::new(Ignore),
            Duration::from_secs(60),
            CancellationToken::new(),
        ));
        let state = Arc::new(AppState {
            sessions,
            gateway,
            decision_mode: crate::config::DecisionMode::Placeholder,
            started_at: Utc::now(),
        });

        let response = router()
            .layer(Extension(state))
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let json: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(json["status"], "ok");
        assert_eq!(json["decision_mode"], "placeholder");
        assert_eq!(json["checks"]["conversations"]["tracked_chats"], 1);
        assert_eq!(json["checks"]["conversations"]["session_ttl_seconds"], 600);
        assert_eq!(json["checks"]["dispatch"]["active_lanes"], 0);
    }
}
