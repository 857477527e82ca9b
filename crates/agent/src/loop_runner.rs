//! The agentic loop implementation.
//!
//! One turn runs `AwaitingModel → HasToolCalls → ExecutingTools →
//! AwaitingFollowUp → …` until it completes or aborts. Every message the
//! turn produces is written to the store as soon as it exists, and every
//! backend and tool call is followed by a progress event.

use std::sync::Arc;
use std::time::Duration;

use forgepilot_config::{AppConfig, BreakersConfig};
use forgepilot_core::error::{Error, StoreError, ToolError};
use forgepilot_core::event::{DomainEvent, EventBus};
use forgepilot_core::message::{Conversation, ConversationId, Message, Role};
use forgepilot_core::provider::{ChatOptions, ChatRequest, ModelBackend, Usage};
use forgepilot_core::store::ConversationStore;
use forgepilot_core::tool::{CallerIdentity, EntityCandidate, ToolCall, ToolRegistry, ToolResult};
use forgepilot_resilience::{
    BreakerConfig, BreakerError, BreakerManager, MODEL_BACKEND, tool_breaker_name,
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::{ContextSettings, ContextWindowBuilder, DEFAULT_PREAMBLE};
use crate::parser::ToolCallParser;
use crate::policy::{
    ANALYZE_RESULTS_NOTE, CONTINUE_NOTE, LoopPolicy, cap_answer, fallback_summary,
    select_entity, single_tool_note, timeout_answer, unknown_tool_note,
};
use crate::responder::{StreamSettings, StreamingResponder};
use crate::stream_event::{StreamEvent, TurnMetrics};
use crate::turn_lock::ConversationLocks;

/// Characters of the first user message kept as the conversation title.
const TITLE_CHARS: usize = 60;

/// Characters kept in a conversation's last-message summary.
const SUMMARY_CHARS: usize = 120;

/// Events buffered between a spawned turn and its consumer.
const EVENT_BUFFER: usize = 64;

const BREAKER_OPEN_NOTICE: &str = "The assistant service is temporarily unavailable after \
repeated failures. Please try again in a minute.";

const TIMEOUT_NOTICE: &str = "This request took too long and was stopped. \
Anything found so far has been saved to the conversation.";

const CANCELLED_NOTICE: &str = "The request was cancelled.";

const INTERNAL_NOTICE: &str = "Something went wrong while handling this request.";

const MISSING_CONVERSATION_NOTICE: &str = "This conversation no longer exists.";

/// One inbound chat message.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub conversation_id: ConversationId,
    pub user_id: String,
    pub message: String,
}

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model produced a final answer
    Completed,
    /// The iteration cap ended the turn with a best-effort answer
    CapReached,
    /// The backend failed or its breaker is open
    Aborted,
    /// The wall-clock budget ran out
    TimedOut,
    /// The client went away or asked to stop
    Cancelled,
}

impl TurnOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::CapReached => "cap_reached",
            Self::Aborted => "aborted",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Summary of a finished turn.
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub outcome: TurnOutcome,
    /// Final (or partial) answer persisted as `assistant`, if any
    pub answer: Option<String>,
    pub iterations: u32,
    pub tools_used: Vec<String>,
    pub metrics: TurnMetrics,
}

/// What ended the iteration loop.
enum Conclusion {
    Answer(String),
    CapReached(String),
    BackendFailed(String),
    Cancelled,
    TimedOut,
}

enum Step {
    Continue,
    Conclude(Conclusion),
}

/// Transient per-turn state. Discarded when the turn ends.
struct TurnState {
    conversation: Conversation,
    caller: CallerIdentity,
    iteration: u32,
    /// Latest narration from the model, kept as the partial answer
    partial: String,
    /// `tool` messages persisted during this turn
    tool_messages: Vec<Message>,
    tools_used: Vec<String>,
    candidates: Vec<EntityCandidate>,
    after_tool: bool,
    empty_retry_used: bool,
    usage: Option<Usage>,
    model_time: Duration,
    tool_time: Duration,
    started: Instant,
}

impl TurnState {
    fn new(conversation: Conversation, user_id: String, started: Instant) -> Self {
        let caller = CallerIdentity {
            user_id,
            conversation_id: conversation.id.clone(),
        };
        Self {
            conversation,
            caller,
            iteration: 0,
            partial: String::new(),
            tool_messages: Vec::new(),
            tools_used: Vec::new(),
            candidates: Vec::new(),
            after_tool: false,
            empty_retry_used: false,
            usage: None,
            model_time: Duration::ZERO,
            tool_time: Duration::ZERO,
            started,
        }
    }

    fn id(&self) -> &ConversationId {
        &self.conversation.id
    }

    fn add_usage(&mut self, usage: Usage) {
        let total = self.usage.get_or_insert_with(Usage::default);
        total.prompt_tokens += usage.prompt_tokens;
        total.completion_tokens += usage.completion_tokens;
        total.total_tokens += usage.total_tokens;
    }

    fn metrics(&self) -> TurnMetrics {
        TurnMetrics {
            total_ms: millis(self.started.elapsed()),
            thinking_ms: millis(self.model_time),
            tool_ms: millis(self.tool_time),
            tool_calls: self.tools_used.len(),
            iterations: self.iteration,
            usage: self.usage,
        }
    }

    fn report(&self, outcome: TurnOutcome, answer: Option<String>) -> TurnReport {
        TurnReport {
            outcome,
            answer,
            iterations: self.iteration,
            tools_used: self.tools_used.clone(),
            metrics: self.metrics(),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// The core loop that orchestrates model calls and tool execution.
pub struct AgentLoop {
    backend: Arc<dyn ModelBackend>,
    tools: Arc<ToolRegistry>,
    store: Arc<dyn ConversationStore>,
    breakers: Arc<BreakerManager>,
    event_bus: Arc<EventBus>,
    parser: ToolCallParser,
    context: ContextWindowBuilder,
    policy: LoopPolicy,
    options: ChatOptions,
    stream: StreamSettings,
    locks: ConversationLocks,
}

impl AgentLoop {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        tools: Arc<ToolRegistry>,
        store: Arc<dyn ConversationStore>,
        breakers: Arc<BreakerManager>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let parser = ToolCallParser::from_registry(&tools);
        let context = ContextWindowBuilder::new(ContextSettings::default(), &tools);
        Self {
            backend,
            tools,
            store,
            breakers,
            event_bus,
            parser,
            context,
            policy: LoopPolicy::default(),
            options: ChatOptions::default(),
            stream: StreamSettings::default(),
            locks: ConversationLocks::new(),
        }
    }

    /// Wire a loop from the application config.
    pub fn from_config(
        config: &AppConfig,
        backend: Arc<dyn ModelBackend>,
        tools: Arc<ToolRegistry>,
        store: Arc<dyn ConversationStore>,
        breakers: Arc<BreakerManager>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let project_context = config.project_context();
        Self::new(backend, tools, store, breakers, event_bus)
            .with_policy(LoopPolicy::from_config(&config.agent))
            .with_context(
                ContextSettings::from_config(&config.context),
                project_context.as_deref(),
            )
            .with_options(ChatOptions {
                model: config.backend.model.clone(),
                temperature: config.backend.temperature,
                max_tokens: Some(config.backend.max_tokens),
            })
            .with_stream_settings(StreamSettings::from_config(&config.streaming))
    }

    pub fn with_policy(mut self, policy: LoopPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Reshape history handling and attach an optional project document to
    /// the system prompt.
    pub fn with_context(mut self, settings: ContextSettings, project_context: Option<&str>) -> Self {
        self.context =
            ContextWindowBuilder::with_prompt(settings, &self.tools, DEFAULT_PREAMBLE, project_context);
        self
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_stream_settings(mut self, settings: StreamSettings) -> Self {
        self.stream = settings;
        self
    }

    pub fn policy(&self) -> &LoopPolicy {
        &self.policy
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn breakers(&self) -> &Arc<BreakerManager> {
        &self.breakers
    }

    /// Whether a turn is currently running on `id`.
    pub async fn is_busy(&self, id: &ConversationId) -> bool {
        self.locks.is_busy(id).await
    }

    /// Delete a conversation unless a turn is running on it, in which case
    /// nothing happens and `Ok(false)` is returned.
    ///
    /// The conversation's turn lock is held across the delete, so no turn
    /// can start on it halfway through.
    pub async fn delete_conversation(&self, id: &ConversationId) -> Result<bool, StoreError> {
        let Some(_turn) = self.locks.try_acquire(id).await else {
            return Ok(false);
        };
        self.store.delete_conversation(id).await?;
        Ok(true)
    }

    /// Run a turn on its own task and return its event stream.
    ///
    /// Cancelling `cancel` (or dropping the receiver) stops the turn at its
    /// next suspension point.
    pub fn spawn_turn(
        self: &Arc<Self>,
        request: TurnRequest,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<StreamEvent> {
        let (mut responder, rx) = StreamingResponder::channel(self.stream, EVENT_BUFFER);
        let agent = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = agent.run_turn(request, &mut responder, &cancel).await {
                warn!(error = %e, "Turn failed");
            }
        });
        rx
    }

    /// Run one turn to completion, reporting progress through `responder`.
    ///
    /// Turns on the same conversation are serialized; the call waits for
    /// any running turn on it to finish first.
    pub async fn run_turn(
        &self,
        request: TurnRequest,
        responder: &mut StreamingResponder,
        cancel: &CancellationToken,
    ) -> Result<TurnReport, Error> {
        let _turn = self.locks.acquire(&request.conversation_id).await;
        let started = Instant::now();

        info!(
            conversation_id = %request.conversation_id,
            user_id = %request.user_id,
            "Turn started"
        );

        let result = self.run_locked(request, responder, cancel, started).await;
        match &result {
            Err(Error::Store(StoreError::ConversationNotFound(id))) => {
                info!(conversation_id = %id, "Turn found no conversation");
                if !responder.is_finished() {
                    responder.fail(MISSING_CONVERSATION_NOTICE).await;
                }
            }
            Err(e) => {
                warn!(error = %e, "Turn aborted by internal error");
                if !responder.is_finished() {
                    responder.fail(INTERNAL_NOTICE).await;
                }
            }
            Ok(_) => {}
        }
        result
    }

    async fn run_locked(
        &self,
        request: TurnRequest,
        responder: &mut StreamingResponder,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<TurnReport, Error> {
        let mut conversation = self.store.get_conversation(&request.conversation_id).await?;

        if is_cancelled(cancel, responder) {
            let state = TurnState::new(conversation, request.user_id, started);
            return self.conclude(Conclusion::Cancelled, state, responder).await;
        }

        self.store
            .append_message(Message::user(&conversation.id, &request.message))
            .await?;
        if conversation.title.is_none() {
            conversation.title = Some(Conversation::title_from(&request.message, TITLE_CHARS));
        }
        conversation.touch();
        self.store.update_conversation(&conversation).await?;

        let mut state = TurnState::new(conversation, request.user_id, started);
        let conclusion = match tokio::time::timeout(
            self.policy.turn_timeout,
            self.drive(&mut state, responder, cancel),
        )
        .await
        {
            Ok(conclusion) => conclusion?,
            Err(_) => Conclusion::TimedOut,
        };
        self.conclude(conclusion, state, responder).await
    }

    /// Iterate until a stop condition.
    async fn drive(
        &self,
        state: &mut TurnState,
        responder: &mut StreamingResponder,
        cancel: &CancellationToken,
    ) -> Result<Conclusion, Error> {
        loop {
            if state.iteration >= self.policy.max_iterations {
                warn!(
                    conversation_id = %state.id(),
                    iterations = state.iteration,
                    "Max iterations reached, ending turn"
                );
                return Ok(Conclusion::CapReached(cap_answer(
                    &state.partial,
                    &state.tool_messages,
                )));
            }
            if is_cancelled(cancel, responder) {
                return Ok(Conclusion::Cancelled);
            }

            state.iteration += 1;
            debug!(
                conversation_id = %state.id(),
                iteration = state.iteration,
                "Agent loop iteration"
            );
            responder.status(status_line(state)).await;

            match self.iterate(state, responder, cancel).await? {
                Step::Continue => continue,
                Step::Conclude(conclusion) => return Ok(conclusion),
            }
        }
    }

    /// One model call and whatever it asks for.
    async fn iterate(
        &self,
        state: &mut TurnState,
        responder: &mut StreamingResponder,
        cancel: &CancellationToken,
    ) -> Result<Step, Error> {
        let history = self.store.messages(state.id()).await?;
        let request = ChatRequest {
            messages: self.context.build(&history, &state.conversation.working_context),
            tools: self.tools.definitions(),
            options: self.options.clone(),
        };

        let breaker = self.breakers.get_or_create(MODEL_BACKEND);
        let model_started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Step::Conclude(Conclusion::Cancelled)),
            result = breaker.call(|| self.backend.chat_with_tools(request)) => result,
        };
        state.model_time += model_started.elapsed();

        let response = match result {
            Ok(response) => response,
            Err(BreakerError::Open { name }) => {
                warn!(conversation_id = %state.id(), breaker = %name, "Backend breaker open");
                return Ok(Step::Conclude(Conclusion::BackendFailed(
                    BREAKER_OPEN_NOTICE.to_string(),
                )));
            }
            Err(BreakerError::Inner(e)) => {
                warn!(
                    conversation_id = %state.id(),
                    backend = self.backend.name(),
                    error = %e,
                    "Backend call failed"
                );
                return Ok(Step::Conclude(Conclusion::BackendFailed(
                    e.kind().user_message().to_string(),
                )));
            }
        };
        if let Some(usage) = response.usage {
            state.add_usage(usage);
        }

        let (calls, narration) = self
            .parser
            .parse(&response.text, response.tool_calls)
            .into_parts();

        if calls.is_empty() {
            self.handle_text(narration.trim(), state, responder).await
        } else {
            self.handle_calls(calls, narration.trim(), state, responder, cancel)
                .await
        }
    }

    /// A response without tool calls: an answer, or a reason to go on.
    async fn handle_text(
        &self,
        text: &str,
        state: &mut TurnState,
        responder: &mut StreamingResponder,
    ) -> Result<Step, Error> {
        if text.is_empty() {
            if state.after_tool && self.policy.retry_empty_after_tool && !state.empty_retry_used {
                debug!(conversation_id = %state.id(), "Empty response after tool result, retrying");
                state.empty_retry_used = true;
                self.persist(Message::system(state.id(), ANALYZE_RESULTS_NOTE))
                    .await?;
                return Ok(Step::Continue);
            }
            // Never surface a blank turn
            return Ok(Step::Conclude(Conclusion::Answer(fallback_summary(
                &state.tool_messages,
            ))));
        }

        if state.iteration < self.policy.min_iterations && !self.policy.completion.is_complete(text)
        {
            debug!(
                conversation_id = %state.id(),
                iteration = state.iteration,
                "Stopped before minimum iterations, asking to continue"
            );
            self.narrate(text, state, responder).await?;
            self.persist(Message::system(state.id(), CONTINUE_NOTE))
                .await?;
            state.after_tool = false;
            return Ok(Step::Continue);
        }

        Ok(Step::Conclude(Conclusion::Answer(text.to_string())))
    }

    async fn handle_calls(
        &self,
        calls: Vec<ToolCall>,
        narration: &str,
        state: &mut TurnState,
        responder: &mut StreamingResponder,
        cancel: &CancellationToken,
    ) -> Result<Step, Error> {
        if !narration.is_empty() {
            self.narrate(narration, state, responder).await?;
        }

        let run = if self.policy.single_tool_per_step {
            &calls[..1]
        } else {
            &calls[..]
        };
        for call in run {
            if is_cancelled(cancel, responder) {
                return Ok(Step::Conclude(Conclusion::Cancelled));
            }
            self.execute_call(call, state, responder).await?;
        }

        if run.len() < calls.len() {
            let skipped: Vec<String> = calls[run.len()..].iter().map(|c| c.name.clone()).collect();
            debug!(
                conversation_id = %state.id(),
                executed = %calls[0].name,
                skipped = skipped.len(),
                "Skipping extra tool calls"
            );
            self.persist(Message::system(
                state.id(),
                single_tool_note(&calls[0].name, &skipped),
            ))
            .await?;
        }

        state.after_tool = true;
        Ok(Step::Continue)
    }

    /// Validate, run through the tool's breaker, persist, report.
    async fn execute_call(
        &self,
        call: &ToolCall,
        state: &mut TurnState,
        responder: &mut StreamingResponder,
    ) -> Result<(), Error> {
        let name = call.name.as_str();
        let started = Instant::now();

        // Invalid requests are the model's fault and never reach the breaker
        let outcome = match self.tools.validate_params(name, &call.params) {
            Err(e) => Err(e),
            Ok(()) => {
                let breaker = self.breakers.get_or_create(&tool_breaker_name(name));
                breaker
                    .call_classified(
                        || self.tools.execute(name, &call.params, &state.caller),
                        ToolError::is_dependency_failure,
                    )
                    .await
                    .map_err(|e| match e {
                        BreakerError::Open { .. } => ToolError::ExecutionFailed {
                            tool_name: name.to_string(),
                            reason: "temporarily unavailable after repeated failures".into(),
                        },
                        BreakerError::Inner(e) => e,
                    })
            }
        };
        let duration = started.elapsed();

        let result = match &outcome {
            Ok(output) => {
                debug!(conversation_id = %state.id(), tool = name, duration_ms = millis(duration), "Tool succeeded");
                ToolResult::success(name, output.as_str(), duration)
            }
            Err(e) => {
                warn!(conversation_id = %state.id(), tool = name, error = %e, "Tool call failed");
                ToolResult::failure(name, e.to_string(), duration)
            }
        };

        state.tool_time += duration;
        state.tools_used.push(name.to_string());
        let message = Message::tool_result(state.id(), name, result.to_message_content());
        self.persist(message.clone()).await?;
        state.tool_messages.push(message);

        responder
            .tool(name, state.tools_used.len(), result.success, &result.output)
            .await;
        self.event_bus.publish(DomainEvent::ToolExecuted {
            conversation_id: state.id().to_string(),
            tool_name: name.to_string(),
            success: result.success,
            duration_ms: millis(duration),
            timestamp: chrono::Utc::now(),
        });

        match outcome {
            Ok(output) => {
                let effects = self.tools.effects(name, &call.params, &output);
                if state.conversation.working_context.apply(effects.updates) > 0 {
                    debug!(
                        conversation_id = %state.id(),
                        tool = name,
                        "Working context updated"
                    );
                    state.conversation.touch();
                    self.store.update_conversation(&state.conversation).await?;
                }
                state.candidates.extend(effects.candidates);
            }
            Err(ToolError::NotFound(_)) => {
                let note = unknown_tool_note(name, &self.tools.names());
                self.persist(Message::system(state.id(), note)).await?;
            }
            Err(_) => {}
        }
        Ok(())
    }

    /// Persist and emit the model's intermediate text.
    async fn narrate(
        &self,
        text: &str,
        state: &mut TurnState,
        responder: &mut StreamingResponder,
    ) -> Result<(), Error> {
        state.partial = text.to_string();
        self.persist(Message::new(state.id(), Role::Thinking, text))
            .await?;
        responder.thinking(text).await;
        Ok(())
    }

    async fn conclude(
        &self,
        conclusion: Conclusion,
        mut state: TurnState,
        responder: &mut StreamingResponder,
    ) -> Result<TurnReport, Error> {
        match conclusion {
            Conclusion::Answer(answer) => {
                self.complete(answer, TurnOutcome::Completed, state, responder)
                    .await
            }
            Conclusion::CapReached(answer) => {
                self.complete(answer, TurnOutcome::CapReached, state, responder)
                    .await
            }
            Conclusion::BackendFailed(notice) => {
                let message = Message::new(state.id(), Role::Error, notice.as_str());
                state.conversation.last_message_summary = Some(message.summary(SUMMARY_CHARS));
                self.persist(message).await?;
                state.conversation.touch();
                self.store.update_conversation(&state.conversation).await?;
                responder.fail(notice).await;
                self.publish_aborted(&state, TurnOutcome::Aborted);
                Ok(state.report(TurnOutcome::Aborted, None))
            }
            Conclusion::Cancelled => {
                info!(
                    conversation_id = %state.id(),
                    iterations = state.iteration,
                    "Turn cancelled"
                );
                responder.fail(CANCELLED_NOTICE).await;
                self.publish_aborted(&state, TurnOutcome::Cancelled);
                Ok(state.report(TurnOutcome::Cancelled, None))
            }
            Conclusion::TimedOut => {
                warn!(
                    conversation_id = %state.id(),
                    iterations = state.iteration,
                    timeout_secs = self.policy.turn_timeout.as_secs(),
                    "Turn timed out"
                );
                let partial = timeout_answer(&state.partial, &state.tool_messages);
                if let Some(text) = &partial {
                    let message = Message::assistant(state.id(), text.as_str());
                    state.conversation.last_message_summary =
                        Some(message.summary(SUMMARY_CHARS));
                    self.persist(message).await?;
                    state.conversation.touch();
                    self.store.update_conversation(&state.conversation).await?;
                }
                responder.fail(TIMEOUT_NOTICE).await;
                self.publish_aborted(&state, TurnOutcome::TimedOut);
                Ok(state.report(TurnOutcome::TimedOut, partial))
            }
        }
    }

    /// Persist the final answer and stream it.
    async fn complete(
        &self,
        answer: String,
        outcome: TurnOutcome,
        mut state: TurnState,
        responder: &mut StreamingResponder,
    ) -> Result<TurnReport, Error> {
        let message = Message::assistant(state.id(), answer.as_str());
        state.conversation.last_message_summary = Some(message.summary(SUMMARY_CHARS));
        self.persist(message).await?;

        if let Some(entity) = select_entity(&answer, &state.candidates) {
            debug!(
                conversation_id = %state.id(),
                key = %entity.key,
                label = %entity.label,
                "Answer selected an entity"
            );
            state
                .conversation
                .working_context
                .set(entity.key.clone(), entity.value.clone());
        }
        state.conversation.touch();
        self.store.update_conversation(&state.conversation).await?;

        let report = state.report(outcome, Some(answer.clone()));
        responder.finish(&answer, report.metrics.clone()).await;

        self.event_bus.publish(DomainEvent::TurnCompleted {
            conversation_id: state.id().to_string(),
            iterations: state.iteration,
            tools_used: state.tools_used.clone(),
            duration_ms: report.metrics.total_ms,
            timestamp: chrono::Utc::now(),
        });
        info!(
            conversation_id = %state.id(),
            iterations = state.iteration,
            tool_calls = state.tools_used.len(),
            outcome = outcome.as_str(),
            "Turn completed"
        );
        Ok(report)
    }

    fn publish_aborted(&self, state: &TurnState, outcome: TurnOutcome) {
        self.event_bus.publish(DomainEvent::TurnAborted {
            conversation_id: state.id().to_string(),
            reason: outcome.as_str().to_string(),
            timestamp: chrono::Utc::now(),
        });
    }

    async fn persist(&self, message: Message) -> Result<(), Error> {
        self.store.append_message(message).await?;
        Ok(())
    }
}

fn is_cancelled(cancel: &CancellationToken, responder: &StreamingResponder) -> bool {
    cancel.is_cancelled() || !responder.is_connected()
}

fn status_line(state: &TurnState) -> String {
    match state.tools_used.last() {
        Some(tool) if state.after_tool => format!("Reviewing {tool} results…"),
        _ if state.iteration <= 1 => "Thinking…".to_string(),
        _ => format!("Working (step {})…", state.iteration),
    }
}

/// Build the shared breaker registry from the `[breakers]` config section.
pub fn breakers_from_config(config: &BreakersConfig, event_bus: Arc<EventBus>) -> BreakerManager {
    fn tuning(t: &forgepilot_config::BreakerTuning) -> BreakerConfig {
        BreakerConfig {
            max_failures: t.max_failures,
            reset_timeout: Duration::from_secs(t.reset_timeout_secs),
            half_open_max: t.half_open_max,
        }
    }
    let overrides = config
        .overrides
        .iter()
        .map(|(name, t)| (name.clone(), tuning(t)))
        .collect();
    BreakerManager::new(tuning(&config.defaults))
        .with_overrides(overrides)
        .with_event_bus(event_bus)
}
