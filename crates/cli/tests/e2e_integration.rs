//! End-to-end integration tests for the Forgepilot engine.
//!
//! These tests exercise the full pipeline from user message to streamed
//! answer: the real built-in tools over a temporary workspace, the real
//! stores and breakers, and a scripted model backend.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use forgepilot_agent::{
    AgentLoop, StreamEvent, StreamSettings, StreamingResponder, TurnOutcome, TurnReport,
    TurnRequest,
};
use forgepilot_core::error::BackendError;
use forgepilot_core::event::{DomainEvent, EventBus};
use forgepilot_core::message::{Conversation, ConversationId, Role};
use forgepilot_core::provider::{ChatRequest, ChatResponse, ModelBackend, Usage};
use forgepilot_core::store::ConversationStore;
use forgepilot_core::tool::{TOOL_FAILURE_MARKER, ToolCall};
use forgepilot_resilience::{BreakerConfig, BreakerManager, BreakerState, MODEL_BACKEND};
use forgepilot_store::{FileStore, InMemoryStore};
use forgepilot_tools::{CURRENT_REPO_KEY, default_registry};
use tokio_util::sync::CancellationToken;

const USER: &str = "e2e-user";

// ── Scripted backend ─────────────────────────────────────────────────────

/// A backend that replays scripted replies, then repeats a fallback.
struct ScriptedBackend {
    replies: Mutex<VecDeque<Result<ChatResponse, BackendError>>>,
    fallback: Option<Result<ChatResponse, BackendError>>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    fn new(replies: Vec<Result<ChatResponse, BackendError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            fallback: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn always_failing() -> Self {
        Self {
            fallback: Some(Err(BackendError::Network("connection refused".into()))),
            ..Self::new(Vec::new())
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ModelBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn chat_with_tools(&self, _request: ChatRequest) -> Result<ChatResponse, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.replies.lock().unwrap().pop_front();
        next.or_else(|| self.fallback.clone()).unwrap_or_else(|| {
            panic!("ScriptedBackend exhausted after {} calls", self.calls())
        })
    }
}

fn text(answer: &str) -> Result<ChatResponse, BackendError> {
    let mut response = ChatResponse::text(answer);
    response.usage = Some(Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    });
    Ok(response)
}

fn tool(name: &str, args: serde_json::Value) -> Result<ChatResponse, BackendError> {
    let params = args.as_object().cloned().unwrap_or_default();
    Ok(ChatResponse::with_calls("", vec![ToolCall::new(name, params)]))
}

// ── Fixture ──────────────────────────────────────────────────────────────

struct Fixture {
    agent: Arc<AgentLoop>,
    backend: Arc<ScriptedBackend>,
    store: Arc<dyn ConversationStore>,
    breakers: Arc<BreakerManager>,
    bus: Arc<EventBus>,
    workspace: tempfile::TempDir,
}

impl Fixture {
    fn new(backend: ScriptedBackend) -> Self {
        Self::build(backend, Arc::new(InMemoryStore::new()), BreakerManager::default())
    }

    fn build(
        backend: ScriptedBackend,
        store: Arc<dyn ConversationStore>,
        breakers: BreakerManager,
    ) -> Self {
        let workspace = tempfile::tempdir().unwrap();
        for repo in ["api", "web"] {
            std::fs::create_dir_all(workspace.path().join(repo).join(".git")).unwrap();
            std::fs::write(
                workspace.path().join(repo).join(".git/HEAD"),
                "ref: refs/heads/main\n",
            )
            .unwrap();
        }
        std::fs::write(workspace.path().join("api/README.md"), "# API\nServes the v2 endpoints.\n")
            .unwrap();

        let bus = Arc::new(EventBus::default());
        let breakers = Arc::new(breakers.with_event_bus(bus.clone()));
        let backend = Arc::new(backend);
        let tools = Arc::new(default_registry(workspace.path()).unwrap());
        let agent = AgentLoop::new(backend.clone(), tools, store.clone(), breakers.clone(), bus.clone())
            .with_stream_settings(StreamSettings::immediate(7));

        Self {
            agent: Arc::new(agent),
            backend,
            store,
            breakers,
            bus,
            workspace,
        }
    }

    async fn conversation(&self) -> ConversationId {
        let conversation = Conversation::new(USER);
        let id = conversation.id.clone();
        self.store.create_conversation(conversation).await.unwrap();
        id
    }

    async fn run(&self, id: &ConversationId, message: &str) -> (TurnReport, Vec<StreamEvent>) {
        let (mut responder, mut rx) = StreamingResponder::channel(StreamSettings::immediate(7), 1024);
        let report = self
            .agent
            .run_turn(
                TurnRequest {
                    conversation_id: id.clone(),
                    user_id: USER.into(),
                    message: message.into(),
                },
                &mut responder,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        drop(responder);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (report, events)
    }

    async fn roles(&self, id: &ConversationId) -> Vec<Role> {
        self.store
            .messages(id)
            .await
            .unwrap()
            .iter()
            .map(|m| m.role)
            .collect()
    }
}

fn reassemble(events: &[StreamEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Chunk { content } => Some(content.as_str()),
            _ => None,
        })
        .collect()
}

fn terminal_count(events: &[StreamEvent]) -> (usize, usize, usize) {
    let count = |kind: &str| events.iter().filter(|e| e.event_type() == kind).count();
    (count("complete"), count("done"), count("error"))
}

// ── Scenario A: list then answer ─────────────────────────────────────────

#[tokio::test]
async fn e2e_list_repos_then_answer() {
    let fx = Fixture::new(ScriptedBackend::new(vec![
        tool("list_repos", serde_json::json!({})),
        text("You have two repositories: api and web."),
    ]));
    let id = fx.conversation().await;

    let (report, events) = fx.run(&id, "Which repositories do I have?").await;

    assert_eq!(report.outcome, TurnOutcome::Completed);
    assert_eq!(report.tools_used, vec!["list_repos"]);
    assert_eq!(report.metrics.tool_calls, 1);
    assert_eq!(fx.backend.calls(), 2);

    assert_eq!(fx.roles(&id).await, vec![Role::User, Role::Tool, Role::Assistant]);
    let messages = fx.store.messages(&id).await.unwrap();
    assert_eq!(messages[1].content, "list_repos: Found 2 repositories: api, web");

    // Both repositories mentioned: nothing selected
    let conversation = fx.store.get_conversation(&id).await.unwrap();
    assert!(conversation.working_context.is_empty());
    assert_eq!(conversation.title.as_deref(), Some("Which repositories do I have?"));

    assert_eq!(reassemble(&events), "You have two repositories: api and web.");
}

// ── Scenario B: unknown tool ─────────────────────────────────────────────

#[tokio::test]
async fn e2e_unregistered_tool_is_reported_and_loop_continues() {
    let fx = Fixture::new(ScriptedBackend::new(vec![
        tool("delete_repo", serde_json::json!({"repo_id": "web"})),
        text("I'm not able to delete repositories."),
    ]));
    let id = fx.conversation().await;

    let (report, _) = fx.run(&id, "Delete the web repository").await;

    assert_eq!(report.outcome, TurnOutcome::Completed);
    assert_eq!(fx.backend.calls(), 2);

    let messages = fx.store.messages(&id).await.unwrap();
    let failed = messages.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(failed.content.starts_with(TOOL_FAILURE_MARKER));
    assert!(failed.content.contains("delete_repo"));

    let note = messages.iter().find(|m| m.role == Role::System).unwrap();
    assert!(note.content.contains("list_repos, get_repo, read_file, write_file"));
    assert_eq!(messages.last().unwrap().role, Role::Assistant);

    // The workspace is untouched
    assert!(fx.workspace.path().join("web").is_dir());
}

// ── Scenario C: backend breaker trips ────────────────────────────────────

#[tokio::test]
async fn e2e_backend_breaker_trips_after_five_failures() {
    let breakers = BreakerManager::default().with_overrides(HashMap::from([(
        MODEL_BACKEND.to_string(),
        BreakerConfig {
            max_failures: 5,
            ..BreakerConfig::default()
        },
    )]));
    let fx = Fixture::build(
        ScriptedBackend::always_failing(),
        Arc::new(InMemoryStore::new()),
        breakers,
    );
    let id = fx.conversation().await;

    for attempt in 1..=5 {
        let (report, events) = fx.run(&id, &format!("attempt {attempt}")).await;
        assert_eq!(report.outcome, TurnOutcome::Aborted);
        assert_eq!(terminal_count(&events), (0, 0, 1));
    }
    assert_eq!(fx.backend.calls(), 5);
    assert_eq!(
        fx.breakers.get(MODEL_BACKEND).unwrap().state(),
        BreakerState::Open
    );

    let (report, events) = fx.run(&id, "attempt 6").await;
    assert_eq!(report.outcome, TurnOutcome::Aborted);
    assert_eq!(fx.backend.calls(), 5, "the sixth call must not reach the backend");

    let Some(StreamEvent::Error { message }) = events.last() else {
        panic!("expected an error event, got {events:?}");
    };
    assert!(message.contains("temporarily unavailable"));

    let roles = fx.roles(&id).await;
    assert!(!roles.contains(&Role::Assistant));
    assert_eq!(roles.iter().filter(|r| **r == Role::Error).count(), 6);

    let stats = fx.breakers.stats();
    let backend = stats.iter().find(|s| s.name == MODEL_BACKEND).unwrap();
    assert_eq!(backend.total_failures, 5);
    assert_eq!(backend.total_rejections, 1);
}

// ── Entity selection through real tools ──────────────────────────────────

#[tokio::test]
async fn e2e_get_repo_selects_current_repository() {
    let fx = Fixture::new(ScriptedBackend::new(vec![
        tool("get_repo", serde_json::json!({"repo_id": "api"})),
        text("The api repository is on branch main."),
    ]));
    let id = fx.conversation().await;

    fx.run(&id, "Tell me about the api repo").await;

    let conversation = fx.store.get_conversation(&id).await.unwrap();
    assert_eq!(
        conversation.working_context.get(CURRENT_REPO_KEY),
        Some(&serde_json::json!("api"))
    );
    let messages = fx.store.messages(&id).await.unwrap();
    let tool = messages.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool.content.contains("default branch: main"));
    assert!(tool.content.contains("README.md"));
}

#[tokio::test]
async fn e2e_read_file_result_reaches_the_next_request() {
    let fx = Fixture::new(ScriptedBackend::new(vec![
        tool("read_file", serde_json::json!({"repo_id": "api", "path": "README.md"})),
        text("The API serves the v2 endpoints."),
    ]));
    let id = fx.conversation().await;

    let (report, _) = fx.run(&id, "What does the api README say?").await;

    assert_eq!(report.outcome, TurnOutcome::Completed);
    let messages = fx.store.messages(&id).await.unwrap();
    let tool = messages.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool.content.starts_with("read_file: # API"));
}

#[tokio::test]
async fn e2e_path_escape_is_a_failed_result_not_a_breaker_failure() {
    let fx = Fixture::new(ScriptedBackend::new(vec![
        tool(
            "write_file",
            serde_json::json!({"repo_id": "api", "path": "../web/evil.sh", "content": "rm -rf /"}),
        ),
        text("I can't write outside the repository."),
    ]));
    let id = fx.conversation().await;

    fx.run(&id, "Write a script into web from api").await;

    assert!(!fx.workspace.path().join("web/evil.sh").exists());
    let messages = fx.store.messages(&id).await.unwrap();
    let tool = messages.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool.content.starts_with(TOOL_FAILURE_MARKER));
    // Rejected during validation, before the tool's breaker
    assert!(
        fx.breakers
            .get(&forgepilot_resilience::tool_breaker_name("write_file"))
            .is_none()
    );
}

// ── Streaming protocol ───────────────────────────────────────────────────

#[tokio::test]
async fn e2e_event_completeness_and_chunk_reconstruction() {
    let answer = "Both repositories track main; api has a README describing the v2 endpoints.";
    let fx = Fixture::new(ScriptedBackend::new(vec![
        tool("list_repos", serde_json::json!({})),
        text(answer),
    ]));
    let id = fx.conversation().await;

    let (_, events) = fx.run(&id, "Summarize my workspace").await;

    assert_eq!(terminal_count(&events), (1, 1, 0));
    assert_eq!(events.last(), Some(&StreamEvent::Done));

    let start = events.iter().position(|e| e.event_type() == "start").unwrap();
    let tool = events.iter().position(|e| e.event_type() == "tool").unwrap();
    assert!(tool < start, "tool progress precedes the answer");

    let chunks: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Chunk { content } => Some(content.chars().count()),
            _ => None,
        })
        .collect();
    assert!(chunks.iter().all(|&n| n <= 7));
    assert_eq!(reassemble(&events), answer);

    let Some(StreamEvent::Complete { answer: full, metrics }) =
        events.iter().find(|e| e.event_type() == "complete")
    else {
        panic!("missing complete event");
    };
    assert_eq!(full, answer);
    assert_eq!(metrics.tool_calls, 1);
    assert_eq!(metrics.usage.as_ref().map(|u| u.total_tokens), Some(15));
}

#[tokio::test]
async fn e2e_domain_events_cover_the_turn() {
    let fx = Fixture::new(ScriptedBackend::new(vec![
        tool("list_repos", serde_json::json!({})),
        text("Two repositories."),
    ]));
    let mut rx = fx.bus.subscribe();
    let id = fx.conversation().await;

    fx.run(&id, "count my repos").await;

    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push(match &*event {
            DomainEvent::ToolExecuted { .. } => "tool",
            DomainEvent::BreakerStateChanged { .. } => "breaker",
            DomainEvent::TurnCompleted { .. } => "completed",
            DomainEvent::TurnAborted { .. } => "aborted",
        });
    }
    assert_eq!(seen, vec!["tool", "completed"]);
}

// ── Persistence ──────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_file_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("conversations.json");

    let id = {
        let store: Arc<dyn ConversationStore> = Arc::new(FileStore::open(&path));
        let fx = Fixture::build(
            ScriptedBackend::new(vec![text("Hello again.")]),
            store,
            BreakerManager::default(),
        );
        let id = fx.conversation().await;
        fx.run(&id, "hello").await;
        id
    };

    let reopened = FileStore::open(&path);
    let messages = reopened.messages(&id).await.unwrap();
    let roles: Vec<_> = messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant]);
    let conversation = reopened.get_conversation(&id).await.unwrap();
    assert_eq!(conversation.last_message_summary.as_deref(), Some("Hello again."));
}

#[tokio::test]
async fn e2e_conversation_resumes_after_cancellation() {
    let fx = Fixture::new(ScriptedBackend::new(vec![text("Back online.")]));
    let id = fx.conversation().await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let (mut responder, _rx) = StreamingResponder::channel(StreamSettings::immediate(7), 64);
    let report = fx
        .agent
        .run_turn(
            TurnRequest {
                conversation_id: id.clone(),
                user_id: USER.into(),
                message: "never mind".into(),
            },
            &mut responder,
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(report.outcome, TurnOutcome::Cancelled);
    assert!(!fx.roles(&id).await.contains(&Role::Assistant));

    let (report, _) = fx.run(&id, "are you there?").await;
    assert_eq!(report.outcome, TurnOutcome::Completed);
    assert_eq!(report.answer.as_deref(), Some("Back online."));
}
