//! `forgepilot chat`: interactive or single-message chat mode.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use forgepilot_agent::{AgentLoop, StreamEvent, TurnRequest};
use forgepilot_config::AppConfig;
use forgepilot_core::message::{Conversation, ConversationId};
use forgepilot_core::store::ConversationStore;
use forgepilot_gateway::Engine;
use forgepilot_store::FileStore;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

pub struct ChatArgs {
    pub message: Option<String>,
    pub conversation: Option<String>,
    pub user: String,
    pub ephemeral: bool,
    pub verbose: bool,
}

pub async fn run(config_path: Option<&Path>, args: ChatArgs) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;

    if !config.has_api_key() && config.backend.name != "ollama" {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    FORGEPILOT_API_KEY = 'sk-...'");
        eprintln!("    OPENAI_API_KEY     = 'sk-...'");
        eprintln!();
        eprintln!("  Or add `api_key` under [backend] in:");
        eprintln!("    {}", AppConfig::config_path().display());
        eprintln!();
        eprintln!("  For a local Ollama server set `name = \"ollama\"` instead.");
        eprintln!();
        bail!("No API key found. See above for setup instructions.");
    }

    let store = super::open_store(args.ephemeral, FileStore::default_path());
    let engine = Engine::from_config(&config, store.clone())?;
    let id = open_conversation(store.as_ref(), args.conversation.as_deref(), &args.user).await?;

    if let Some(message) = args.message {
        let ok = send(&engine.agent, &id, &args.user, message, args.verbose).await?;
        if !ok {
            bail!("The turn ended with an error");
        }
        eprintln!("  Conversation: {id}");
        return Ok(());
    }

    println!();
    println!("  Forgepilot: interactive mode");
    println!();
    println!("  Backend:       {} ({})", config.backend.name, config.backend.model);
    println!("  Tools:         {}", engine.agent.tools().names().join(", "));
    println!("  Conversation:  {id}");
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' to quit, Ctrl+C cancels a running turn.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }
        println!();
        send(&engine.agent, &id, &args.user, line.to_string(), args.verbose).await?;
        println!();
    }

    println!("  Goodbye!");
    Ok(())
}

/// Resume `existing` (checking ownership) or start a new conversation.
pub async fn open_conversation(
    store: &dyn ConversationStore,
    existing: Option<&str>,
    user: &str,
) -> anyhow::Result<ConversationId> {
    match existing {
        Some(raw) => {
            let id = ConversationId::from(raw);
            let conversation = store
                .get_conversation(&id)
                .await
                .with_context(|| format!("Cannot resume conversation {raw}"))?;
            if conversation.user_id != user {
                bail!("Conversation {raw} belongs to another user");
            }
            Ok(id)
        }
        None => {
            let conversation = Conversation::new(user);
            let id = conversation.id.clone();
            store.create_conversation(conversation).await?;
            Ok(id)
        }
    }
}

/// Run one turn, printing its events. `Ctrl+C` cancels it.
///
/// Returns `false` when the turn ended with an `error` event.
async fn send(
    agent: &Arc<AgentLoop>,
    id: &ConversationId,
    user: &str,
    message: String,
    verbose: bool,
) -> anyhow::Result<bool> {
    let cancel = CancellationToken::new();
    let mut rx = agent.spawn_turn(
        TurnRequest {
            conversation_id: id.clone(),
            user_id: user.to_string(),
            message,
        },
        cancel.clone(),
    );

    let mut printer = EventPrinter::new(verbose);
    let mut out = std::io::stdout();
    let mut err = std::io::stderr();
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => printer.print(&event, &mut out, &mut err)?,
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                tracing::info!(conversation_id = %id, "Cancelling turn");
                cancel.cancel();
            }
        }
    }
    Ok(!printer.failed())
}

/// Renders turn events for a terminal: the answer on `out`, progress on
/// `err`.
pub struct EventPrinter {
    verbose: bool,
    failed: bool,
}

impl EventPrinter {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            failed: false,
        }
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn print(
        &mut self,
        event: &StreamEvent,
        out: &mut impl Write,
        err: &mut impl Write,
    ) -> std::io::Result<()> {
        match event {
            StreamEvent::Status { message } => writeln!(err, "  . {message}")?,
            StreamEvent::Thinking { message } => writeln!(err, "  ~ {message}")?,
            StreamEvent::Tool(summary) => {
                let outcome = if summary.success { "ok" } else { "failed" };
                writeln!(err, "  [{}] {} {outcome}", summary.ordinal, summary.name)?;
                if self.verbose {
                    writeln!(err, "      {}", summary.output)?;
                }
            }
            StreamEvent::Start { .. } | StreamEvent::Done => {}
            StreamEvent::Chunk { content } => {
                write!(out, "{content}")?;
                out.flush()?;
            }
            StreamEvent::Complete { metrics, .. } => {
                writeln!(out)?;
                if self.verbose {
                    writeln!(
                        err,
                        "  ({} ms: model {} ms, tools {} ms, {} tool calls, {} iterations)",
                        metrics.total_ms,
                        metrics.thinking_ms,
                        metrics.tool_ms,
                        metrics.tool_calls,
                        metrics.iterations
                    )?;
                }
            }
            StreamEvent::Error { message } => {
                self.failed = true;
                writeln!(err, "  ! {message}")?;
            }
        }
        Ok(())
    }
}
