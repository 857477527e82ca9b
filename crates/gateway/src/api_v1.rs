//! HTTP API v1.
//!
//! Endpoints:
//!
//! - `GET    /v1/conversations?user_id=`  List a user's conversations
//! - `POST   /v1/conversations`  Create a conversation
//! - `GET    /v1/conversations/{id}`  Conversation metadata and working context
//! - `DELETE /v1/conversations/{id}`  Delete a conversation
//! - `GET    /v1/conversations/{id}/messages`  Full transcript
//! - `POST   /v1/conversations/{id}/stream`  Run a turn, receive an SSE stream
//! - `GET    /v1/tools`  Tool catalogue
//! - `GET    /v1/breakers`  Circuit breaker snapshot
//! - `GET    /v1/events`  SSE stream of domain events

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::{IntoResponse, Json},
    routing::{get, post},
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::info;

use forgepilot_agent::{AgentLoop, TurnRequest};
use forgepilot_core::error::StoreError;
use forgepilot_core::event::{DomainEvent, EventBus};
use forgepilot_core::message::{Conversation, ConversationId};

// ── State ─────────────────────────────────────────────────────────────────

/// Shared state for the v1 API.
pub struct ApiV1State {
    pub agent: Arc<AgentLoop>,
    pub event_bus: Arc<EventBus>,
}

pub type SharedApiState = Arc<ApiV1State>;

// ── Router ────────────────────────────────────────────────────────────────

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedApiState) -> Router {
    Router::new()
        .route(
            "/conversations",
            get(list_conversations_handler).post(create_conversation_handler),
        )
        .route(
            "/conversations/{id}",
            get(get_conversation_handler).delete(delete_conversation_handler),
        )
        .route("/conversations/{id}/messages", get(messages_handler))
        .route("/conversations/{id}/stream", post(stream_handler))
        .route("/tools", get(list_tools_handler))
        .route("/breakers", get(list_breakers_handler))
        .route("/events", get(event_stream_handler))
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Deserialize)]
struct CreateConversationRequest {
    user_id: String,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Deserialize)]
struct ListQuery {
    user_id: String,
}

#[derive(Deserialize)]
struct StreamRequest {
    message: String,
    /// Must match the conversation owner when given
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn store_error(e: StoreError) -> ApiError {
    match e {
        StoreError::ConversationNotFound(_) => api_error(StatusCode::NOT_FOUND, e.to_string()),
        StoreError::Storage(_) => {
            tracing::error!(error = %e, "Store failure");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

// ── Conversations ─────────────────────────────────────────────────────────

/// `POST /v1/conversations`
async fn create_conversation_handler(
    State(state): State<SharedApiState>,
    Json(payload): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.user_id.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "user_id must not be empty"));
    }
    let mut conversation = Conversation::new(payload.user_id.trim());
    conversation.title = payload.title.filter(|t| !t.trim().is_empty());
    state
        .agent
        .store()
        .create_conversation(conversation.clone())
        .await
        .map_err(store_error)?;
    info!(conversation_id = %conversation.id, "Conversation created");
    Ok((StatusCode::CREATED, Json(conversation)))
}

/// `GET /v1/conversations?user_id=`
async fn list_conversations_handler(
    State(state): State<SharedApiState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    let list = state
        .agent
        .store()
        .list_conversations(&query.user_id)
        .await
        .map_err(store_error)?;
    Ok(Json(list))
}

/// `GET /v1/conversations/{id}`
async fn get_conversation_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
) -> Result<Json<Conversation>, ApiError> {
    let conversation = state
        .agent
        .store()
        .get_conversation(&ConversationId::from(&id))
        .await
        .map_err(store_error)?;
    Ok(Json(conversation))
}

/// `GET /v1/conversations/{id}/messages`
async fn messages_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = state
        .agent
        .store()
        .messages(&ConversationId::from(&id))
        .await
        .map_err(store_error)?;
    Ok(Json(messages))
}

/// `DELETE /v1/conversations/{id}`. Refused while a turn is running on it.
async fn delete_conversation_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = ConversationId::from(&id);
    let deleted = state
        .agent
        .delete_conversation(&id)
        .await
        .map_err(store_error)?;
    if !deleted {
        return Err(api_error(
            StatusCode::CONFLICT,
            "A turn is still running on this conversation",
        ));
    }
    info!(conversation_id = %id, "Conversation deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ── SSE Streaming ─────────────────────────────────────────────────────────

/// `POST /v1/conversations/{id}/stream`: run one turn and stream its
/// events. Dropping the connection cancels the turn.
async fn stream_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
    Json(payload): Json<StreamRequest>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let message = payload.message.trim();
    if message.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "message must not be empty"));
    }

    let id = ConversationId::from(&id);
    let conversation = state
        .agent
        .store()
        .get_conversation(&id)
        .await
        .map_err(store_error)?;
    let user_id = match payload.user_id {
        Some(user) if user != conversation.user_id => {
            return Err(api_error(
                StatusCode::FORBIDDEN,
                "Conversation belongs to another user",
            ));
        }
        Some(user) => user,
        None => conversation.user_id,
    };

    info!(conversation_id = %id, message_len = message.len(), "v1 stream request");

    let cancel = CancellationToken::new();
    let rx = state.agent.spawn_turn(
        TurnRequest {
            conversation_id: id,
            user_id,
            message: message.to_string(),
        },
        cancel.clone(),
    );

    let events = ReceiverStream::new(rx).map(|event| {
        Ok(SseEvent::default()
            .event(event.event_type())
            .data(event.payload()))
    });

    Ok(Sse::new(CancelOnDrop::new(events, cancel)).keep_alive(KeepAlive::default()))
}

/// A stream that cancels its turn when the response body is dropped.
struct CancelOnDrop<S> {
    inner: S,
    _guard: DropGuard,
}

impl<S> CancelOnDrop<S> {
    fn new(inner: S, cancel: CancellationToken) -> Self {
        Self {
            inner,
            _guard: cancel.drop_guard(),
        }
    }
}

impl<S: Stream + Unpin> Stream for CancelOnDrop<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<S::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// `GET /v1/events`: domain events as they are published.
async fn event_stream_handler(
    State(state): State<SharedApiState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let stream = BroadcastStream::new(state.event_bus.subscribe()).filter_map(|event| {
        // Lagged receivers skip what they missed
        let event = event.ok()?;
        let data = serde_json::to_string(&*event).unwrap_or_default();
        Some(Ok(SseEvent::default()
            .event(domain_event_name(&event))
            .data(data)))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn domain_event_name(event: &DomainEvent) -> &'static str {
    match event {
        DomainEvent::ToolExecuted { .. } => "tool_executed",
        DomainEvent::BreakerStateChanged { .. } => "breaker_state_changed",
        DomainEvent::TurnCompleted { .. } => "turn_completed",
        DomainEvent::TurnAborted { .. } => "turn_aborted",
    }
}

// ── Introspection ─────────────────────────────────────────────────────────

/// `GET /v1/tools`
async fn list_tools_handler(State(state): State<SharedApiState>) -> impl IntoResponse {
    Json(state.agent.tools().definitions())
}

/// `GET /v1/breakers`
async fn list_breakers_handler(State(state): State<SharedApiState>) -> impl IntoResponse {
    Json(state.agent.breakers().stats())
}
