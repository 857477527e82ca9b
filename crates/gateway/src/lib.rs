//! HTTP API gateway for Forgepilot.
//!
//! Exposes a health check and the v1 API: conversation management, the
//! SSE turn stream, and read-only views of the tool catalogue, breaker
//! states and domain events.
//!
//! Built on Axum.

pub mod api_v1;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use axum::{Router, response::Json, routing::get};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, info, warn};

use forgepilot_agent::{AgentLoop, breakers_from_config};
use forgepilot_config::AppConfig;
use forgepilot_core::error::{BackendError, ToolError};
use forgepilot_core::event::{DomainEvent, EventBus};
use forgepilot_core::store::ConversationStore;

/// Failures while assembling or serving the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Backend setup failed: {0}")]
    Backend(#[from] BackendError),

    #[error("Tool setup failed: {0}")]
    Tools(#[from] ToolError),

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything a running engine needs, wired from the config.
pub struct Engine {
    pub agent: Arc<AgentLoop>,
    pub event_bus: Arc<EventBus>,
}

impl Engine {
    /// Build the backend, tools, breakers and loop once; callers share
    /// them through the returned `Arc`s.
    pub fn from_config(
        config: &AppConfig,
        store: Arc<dyn ConversationStore>,
    ) -> Result<Self, GatewayError> {
        let backend = Arc::new(forgepilot_providers::build_from_config(&config.backend)?);
        let tools = Arc::new(forgepilot_tools::default_registry(
            config.tools.workspace_root.clone(),
        )?);
        let event_bus = Arc::new(EventBus::default());
        let breakers = Arc::new(breakers_from_config(&config.breakers, event_bus.clone()));

        info!(
            backend = %config.backend.name,
            model = %config.backend.model,
            tools = tools.len(),
            store = store.name(),
            "Engine assembled"
        );

        let agent = AgentLoop::from_config(
            config,
            backend,
            tools,
            store,
            breakers,
            event_bus.clone(),
        );
        Ok(Self {
            agent: Arc::new(agent),
            event_bus,
        })
    }
}

/// Build the full router: `/health` plus the v1 API under `/v1`.
///
/// Layers: 1 MB body limit, CORS for local origins, HTTP trace logging.
pub fn build_router(api_state: api_v1::SharedApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _| {
            origin.to_str().is_ok_and(is_local_origin)
        }))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", api_v1::v1_router(api_state))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn is_local_origin(origin: &str) -> bool {
    ["http://localhost", "http://127.0.0.1"].iter().any(|prefix| {
        origin
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(':'))
    })
}

/// Start the gateway HTTP server over `store`.
pub async fn start(config: AppConfig, store: Arc<dyn ConversationStore>) -> Result<(), GatewayError> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    info!(store = store.name(), "Conversation store ready");
    let engine = Engine::from_config(&config, store)?;
    let _events = spawn_event_logger(&engine.event_bus);

    let api_state = Arc::new(api_v1::ApiV1State {
        agent: engine.agent,
        event_bus: engine.event_bus,
    });
    let app = build_router(api_state);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

/// Log every domain event until the bus closes.
pub fn spawn_event_logger(bus: &EventBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event logger fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn log_event(event: &DomainEvent) {
    match event {
        DomainEvent::ToolExecuted {
            conversation_id,
            tool_name,
            success,
            duration_ms,
            ..
        } => debug!(conversation_id, tool = tool_name, success, duration_ms, "Tool executed"),
        DomainEvent::BreakerStateChanged { breaker, from, to, .. } => {
            info!(breaker, from, to, "Breaker state changed");
        }
        DomainEvent::TurnCompleted {
            conversation_id,
            iterations,
            duration_ms,
            ..
        } => debug!(conversation_id, iterations, duration_ms, "Turn completed"),
        DomainEvent::TurnAborted {
            conversation_id,
            reason,
            ..
        } => info!(conversation_id, reason, "Turn aborted"),
    }
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use forgepilot_store::InMemoryStore;
    use forgepilot_tools::CURRENT_REPO_KEY;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_engine() -> Engine {
        let mut config = AppConfig::default();
        config.backend.name = "ollama".into();
        config.tools.workspace_root = std::env::temp_dir().join("forgepilot-gateway-test");
        Engine::from_config(&config, Arc::new(InMemoryStore::new())).unwrap()
    }

    fn test_router() -> Router {
        let engine = test_engine();
        build_router(Arc::new(api_v1::ApiV1State {
            agent: engine.agent,
            event_bus: engine.event_bus,
        }))
    }

    #[tokio::test]
    async fn health_endpoint() {
        let app = test_router();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn v1_is_nested_and_lists_builtin_tools() {
        let app = test_router();
        let req = Request::builder().uri("/v1/tools").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let tools: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
        let names: Vec<_> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["list_repos", "get_repo", "read_file", "write_file"]);
        assert!(tools[1]["parameters"]["required"].to_string().contains("repo_id"));
        assert_eq!(CURRENT_REPO_KEY, "current_repo_id");
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let app = test_router();
        let req = Request::builder().uri("/v2/anything").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn local_origins_only() {
        assert!(is_local_origin("http://localhost"));
        assert!(is_local_origin("http://localhost:3000"));
        assert!(is_local_origin("http://127.0.0.1:42817"));
        assert!(!is_local_origin("http://localhost.evil.com"));
        assert!(!is_local_origin("https://example.com"));
    }

    #[tokio::test]
    async fn event_logger_stops_when_the_bus_closes() {
        let bus = EventBus::default();
        let handle = spawn_event_logger(&bus);
        bus.publish(DomainEvent::TurnAborted {
            conversation_id: "c".into(),
            reason: "cancelled".into(),
            timestamp: chrono::Utc::now(),
        });
        drop(bus);
        handle.await.unwrap();
    }
}
