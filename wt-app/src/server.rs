//! WhatsTrack server.
//!
//! Wires the WhatsApp adapter, the Jira client and the action decider into the
//! conversation engine, then serves the webhook and health routes.

use crate::config::{DecisionMode, WhatsTrackConfig};
use crate::conversation::ConversationEngine;
use crate::decision::{ActionDecider, LlmDecider, PlaceholderDecider};
use crate::gateway::Gateway;
use crate::routes;
use crate::session::SessionStore;
use crate::webhook;
use anyhow::Result;
use axum::Extension;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::Response;
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use wt_channels::{ChannelAdapter, OutboundMessage, WhatsAppCloudAdapter};
use wt_tracker::{IssueTracker, JiraClient};

pub struct AppState {
    pub sessions: Arc<SessionStore>,
    pub gateway: Arc<Gateway>,
    pub decision_mode: DecisionMode,
    pub started_at: DateTime<Utc>,
}

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, path) = WhatsTrackConfig::load_with_path(config_path).await?;
    build_whatsapp_adapter(&cfg)?;
    let jira = JiraClient::new(cfg.jira.client_config())?;
    build_decider(&cfg)?;
    tracing::info!(
        config_path = %path.display(),
        bind_addr = %cfg.server.bind_addr,
        jira_base_url = %cfg.jira.base_url,
        jira_project_key = %jira.project_key(),
        decision_mode = ?cfg.decision.mode,
        decision_model = %cfg.decision.model,
        webhook_signature_check = cfg.whatsapp.app_secret.is_some(),
        "config ok"
    );
    Ok(())
}

pub async fn send_one_shot(
    config_path: Option<PathBuf>,
    recipient: &str,
    message: &str,
) -> Result<()> {
    let cfg = WhatsTrackConfig::load(config_path).await?;
    let adapter = build_whatsapp_adapter(&cfg)?;
    adapter
        .send(recipient, OutboundMessage::text(message))
        .await?;
    tracing::info!(recipient = %recipient, "one-shot message sent");
    Ok(())
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, path) = WhatsTrackConfig::load_with_path(config_path).await?;
    tracing::info!(
        config_path = %path.display(),
        bind_addr = %cfg.server.bind_addr,
        http_timeout_seconds = cfg.server.http_timeout_seconds,
        http_max_in_flight = cfg.server.http_max_in_flight,
        jira_base_url = %cfg.jira.base_url,
        jira_project_key = %cfg.jira.project_key,
        decision_mode = ?cfg.decision.mode,
        session_ttl_seconds = cfg.conversation.session_ttl_seconds,
        "server configuration loaded"
    );

    let addr = cfg.bind_addr()?;
    let listener = preflight_bind_listener(addr).await?;

    let channel: Arc<dyn ChannelAdapter> = Arc::new(build_whatsapp_adapter(&cfg)?);
    let tracker: Arc<dyn IssueTracker> = Arc::new(JiraClient::new(cfg.jira.client_config())?);
    let decider = build_decider(&cfg)?;

    let sessions = Arc::new(SessionStore::new(Duration::from_secs(
        cfg.conversation.session_ttl_seconds,
    )));
    let engine = Arc::new(ConversationEngine::new(
        sessions.clone(),
        channel,
        tracker,
        decider,
        &cfg.jira.issue_type,
        cfg.jira.max_candidate_issues,
    ));

    let shutdown = CancellationToken::new();
    let gateway = Arc::new(Gateway::new(
        engine,
        Duration::from_secs(cfg.conversation.lane_idle_seconds),
        shutdown.clone(),
    ));

    let state = Arc::new(AppState {
        sessions,
        gateway: gateway.clone(),
        decision_mode: cfg.decision.mode,
        started_at: Utc::now(),
    });

    let app_router = routes::router()
        .layer(Extension(state))
        .merge(webhook::router(
            gateway.clone(),
            cfg.whatsapp.verify_token.clone(),
            cfg.whatsapp.app_secret.clone(),
        ));

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version(),
                request_id = %request_id_from_headers(request.headers())
            )
        })
        .on_request(|request: &Request<_>, _span: &tracing::Span| {
            tracing::info!(
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id_from_headers(request.headers()),
                "http request started"
            );
        })
        .on_response(
            |response: &Response, latency: Duration, _span: &tracing::Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "http request completed"
                );
            },
        )
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, _span: &tracing::Span| {
                tracing::error!(
                    error_class = %error,
                    latency_ms = latency.as_millis() as u64,
                    "http request failed"
                );
            },
        );

    let app = app_router
        .layer(GlobalConcurrencyLimitLayer::new(cfg.server.http_max_in_flight))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(cfg.server.http_timeout_seconds),
        ))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    tracing::info!(%addr, "whatstrack serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;
    tracing::info!("http server shutdown completed");

    // Lanes finish what the webhook already acknowledged, bounded by the grace period.
    shutdown.cancel();
    let grace = Duration::from_secs(cfg.conversation.shutdown_grace_seconds);
    if !gateway.drain(grace).await {
        tracing::error!(
            grace_seconds = cfg.conversation.shutdown_grace_seconds,
            "exiting with chat messages still in flight"
        );
    }
    Ok(())
}

fn build_whatsapp_adapter(cfg: &WhatsTrackConfig) -> Result<WhatsAppCloudAdapter> {
    Ok(
        WhatsAppCloudAdapter::new(&cfg.whatsapp.access_token, &cfg.whatsapp.phone_number_id)?
            .with_graph_api_version(&cfg.whatsapp.graph_api_version),
    )
}

fn build_decider(cfg: &WhatsTrackConfig) -> Result<Arc<dyn ActionDecider>> {
    match cfg.decision.mode {
        DecisionMode::Placeholder => Ok(Arc::new(PlaceholderDecider)),
        DecisionMode::Llm => {
            let api_key = cfg.decision.api_key_for_model().ok_or_else(|| {
                anyhow::anyhow!("no api key configured for model {}", cfg.decision.model)
            })?;
            let client = wt_llm::LlmClient::new(&api_key, &cfg.decision.model)?;
            tracing::info!(model = %client.model(), "llm decider enabled");
            Ok(Arc::new(LlmDecider::new(client)))
        }
    }
}

async fn preflight_bind_listener(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    tracing::info!(%addr, "preflight bind check starting");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("preflight bind failed for {addr}: {e}"))?;
    tracing::info!(%addr, "preflight bind check passed");
    Ok(listener)
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| "missing".to_string())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable; waiting for ctrl-c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
            _ = shutdown.cancelled() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => tracing::warn!("received ctrl-c; beginning graceful shutdown"),
                Err(e) => tracing::error!(error = %e, "failed to await ctrl-c signal"),
            },
            _ = shutdown.cancelled() => {}
        }
    }
    shutdown.cancel();
}
