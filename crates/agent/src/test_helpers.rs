//! Shared test doubles for the loop tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use forgepilot_core::error::{BackendError, ToolError};
use forgepilot_core::event::EventBus;
use forgepilot_core::message::{Conversation, ConversationId};
use forgepilot_core::provider::{ChatRequest, ChatResponse, ModelBackend, Usage};
use forgepilot_core::store::ConversationStore;
use forgepilot_core::tool::{
    CallerIdentity, EntityCandidate, ParamSpec, ParamType, Tool, ToolCall, ToolDescriptor,
    ToolEffects, ToolParams, ToolRegistry, param_str,
};
use forgepilot_resilience::BreakerManager;
use forgepilot_store::InMemoryStore;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::loop_runner::{AgentLoop, TurnReport, TurnRequest};
use crate::responder::{StreamSettings, StreamingResponder};
use crate::stream_event::StreamEvent;

pub const USER: &str = "user-1";

/// One scripted backend reply.
pub enum Script {
    Respond(ChatResponse),
    Fail(BackendError),
    Slow(Duration, ChatResponse),
    /// Never answers
    Hang,
}

impl Script {
    pub fn respond(text: &str) -> Self {
        Self::Respond(metered(ChatResponse::text(text)))
    }

    pub fn calls(text: &str, calls: Vec<ToolCall>) -> Self {
        Self::Respond(metered(ChatResponse::with_calls(text, calls)))
    }

    pub fn slow(delay: Duration, text: &str) -> Self {
        Self::Slow(delay, metered(ChatResponse::text(text)))
    }
}

fn metered(mut response: ChatResponse) -> ChatResponse {
    response.usage = Some(Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    });
    response.model = "scripted-model".into();
    response
}

/// A backend that replays a script, then (optionally) repeats one reply.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Script>>,
    repeat: Option<ChatResponse>,
    calls: AtomicUsize,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Script>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            repeat: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer every call with `response`.
    pub fn repeating(response: ChatResponse) -> Self {
        Self {
            repeat: Some(metered(response)),
            ..Self::new(Vec::new())
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat_with_tools(&self, request: ChatRequest) -> Result<ChatResponse, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Script::Respond(response)) => Ok(response),
            Some(Script::Fail(error)) => Err(error),
            Some(Script::Slow(delay, response)) => {
                tokio::time::sleep(delay).await;
                Ok(response)
            }
            Some(Script::Hang) => std::future::pending().await,
            None => self
                .repeat
                .clone()
                .ok_or_else(|| BackendError::MalformedResponse("script exhausted".into())),
        }
    }
}

/// `list_repos`: two repositories, both reported as candidates.
pub struct ListReposTool;

#[async_trait]
impl Tool for ListReposTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("list_repos", "List the user's repositories")
    }

    async fn execute(&self, _: &ToolParams, _: &CallerIdentity) -> Result<String, ToolError> {
        Ok("Found 2 repositories: alpha, beta".into())
    }

    fn effects(&self, _: &ToolParams, _: &str) -> ToolEffects {
        ToolEffects {
            updates: Vec::new(),
            candidates: ["alpha", "beta"]
                .into_iter()
                .map(|name| EntityCandidate {
                    key: "current_repo_id".into(),
                    value: json!(name),
                    label: name.into(),
                })
                .collect(),
        }
    }
}

/// `get_repo`: selects the repository it was asked about.
pub struct GetRepoTool;

#[async_trait]
impl Tool for GetRepoTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("get_repo", "Show one repository").param(ParamSpec::required(
            "repo_id",
            ParamType::String,
            "Repository name",
        ))
    }

    async fn execute(&self, params: &ToolParams, _: &CallerIdentity) -> Result<String, ToolError> {
        let id = param_str(params, "repo_id").unwrap_or_default();
        Ok(format!("Repository {id}: default branch main"))
    }

    fn effects(&self, params: &ToolParams, _: &str) -> ToolEffects {
        ToolEffects {
            updates: param_str(params, "repo_id")
                .map(|id| vec![("current_repo_id".to_string(), json!(id))])
                .unwrap_or_default(),
            candidates: Vec::new(),
        }
    }
}

/// `deploy`: always fails as a dependency failure.
pub struct FailingTool {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for FailingTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("deploy", "Deploy the current repository")
    }

    async fn execute(&self, _: &ToolParams, _: &CallerIdentity) -> Result<String, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ToolError::ExecutionFailed {
            tool_name: "deploy".into(),
            reason: "deploy target unreachable".into(),
        })
    }
}

/// An agent wired to in-memory collaborators.
pub struct Harness {
    pub agent: Arc<AgentLoop>,
    pub store: Arc<InMemoryStore>,
    pub backend: Arc<ScriptedBackend>,
    pub breakers: Arc<BreakerManager>,
    pub bus: Arc<EventBus>,
    deploy_calls: Arc<AtomicUsize>,
}

impl Harness {
    pub fn new(backend: ScriptedBackend) -> Self {
        Self::with(backend, |agent| agent)
    }

    pub fn with(backend: ScriptedBackend, configure: impl FnOnce(AgentLoop) -> AgentLoop) -> Self {
        let deploy_calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(ListReposTool)).unwrap();
        registry.register(Box::new(GetRepoTool)).unwrap();
        registry
            .register(Box::new(FailingTool {
                calls: deploy_calls.clone(),
            }))
            .unwrap();

        let store = Arc::new(InMemoryStore::new());
        let bus = Arc::new(EventBus::default());
        let breakers = Arc::new(BreakerManager::default().with_event_bus(bus.clone()));
        let backend = Arc::new(backend);

        let agent = AgentLoop::new(
            backend.clone(),
            Arc::new(registry),
            store.clone(),
            breakers.clone(),
            bus.clone(),
        )
        .with_stream_settings(StreamSettings::immediate(16));

        Self {
            agent: Arc::new(configure(agent)),
            store,
            backend,
            breakers,
            bus,
            deploy_calls,
        }
    }

    /// A fresh conversation owned by [`USER`].
    pub async fn conversation(&self) -> ConversationId {
        let conversation = Conversation::new(USER);
        let id = conversation.id.clone();
        self.store.create_conversation(conversation).await.unwrap();
        id
    }

    pub async fn run(&self, id: &ConversationId, message: &str) -> (TurnReport, Vec<StreamEvent>) {
        self.run_with(id, message, &CancellationToken::new()).await
    }

    /// Run one turn and collect every event it emitted.
    pub async fn run_with(
        &self,
        id: &ConversationId,
        message: &str,
        cancel: &CancellationToken,
    ) -> (TurnReport, Vec<StreamEvent>) {
        let (mut responder, mut rx) = StreamingResponder::channel(StreamSettings::immediate(16), 1024);
        let report = self
            .agent
            .run_turn(
                TurnRequest {
                    conversation_id: id.clone(),
                    user_id: USER.into(),
                    message: message.into(),
                },
                &mut responder,
                cancel,
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

    /// Times the `deploy` tool actually ran.
    pub fn failing_tool_calls(&self) -> usize {
        self.deploy_calls.load(Ordering::SeqCst)
    }
}

pub fn call(name: &str, args: serde_json::Value) -> ToolCall {
    ToolCall::new(name, args.as_object().cloned().unwrap_or_default())
}

/// The answer as a client would rebuild it from `chunk` events.
pub fn reassemble(events: &[StreamEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Chunk { content } => Some(content.as_str()),
            _ => None,
        })
        .collect()
}
