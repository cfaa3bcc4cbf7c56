//! The turn loop.
//!
//! One [`Orchestrator`] owns the conversation log and the usage ledger for a
//! session. [`Orchestrator::run_turn`] drives one user input to completion:
//!
//! ```text
//!   Idle ─► AwaitingModel ─► ToolCalls ──┐
//!              ▲   │                     │
//!              │   ├─► FinalAnswer ─► Idle
//!              │   └─► Error ───────► Idle
//!              └─────────────────────────┘
//! ```
//!
//! Cancellation is cooperative: the token is checked before each round trip,
//! after a reply arrives and before each tool call. Work already in flight is
//! never aborted.

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tern_core::{Content, Message, Result, Role, Tool, ToolCall};
use tern_llm::{LlmProvider, UsageSnapshot};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::CacheStrategy;
use crate::dispatch::{DENIAL_MESSAGE, ToolDispatcher};
use crate::ledger::{CacheRegression, UsageLedger};
use crate::undo::{GitWorkTree, UndoJournal, restore_files};

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a capable agentic assistant working in the user's terminal.
You can run bash commands, search for files and text, read and update files,
and, when those tools are offered, search the web and describe images.
Use the tools to carry out the user's request rather than describing what you would do.
Tool output is capped; when you see a truncation notice, narrow the command \
(grep, head, tail, a line range) to get what you need.
Read a file before changing it, prefer partial updates with old_content, \
and verify your changes afterwards.
When a task has several steps, take them one at a time and check each result.";

/// Default ceiling on round trips within one turn.
pub const DEFAULT_MAX_ROUND_TRIPS: usize = 100;

const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TurnState {
    Idle,
    AwaitingModel,
    ToolCalls,
    FinalAnswer,
    Error,
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    FinalAnswer(String),
    Interrupted,
    /// A round trip failed; the log is intact and the user may retry.
    Failed(String),
    /// The per-turn round-trip ceiling was reached.
    RoundTripLimit,
}

/// Progress reported to the front end while a turn runs.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    AssistantText(String),
    Reasoning(String),
    ToolCall { name: String, arguments: serde_json::Value },
    ToolResult { name: String, preview: String },
    Usage { usage: UsageSnapshot, total_cost: f64 },
    CacheRegression(CacheRegression),
    Error(String),
    Interrupted,
}

/// Session state and the loop that advances it.
pub struct Orchestrator {
    provider: Arc<dyn LlmProvider>,
    dispatcher: ToolDispatcher,
    tool_schemas: Vec<Tool>,
    cache: CacheStrategy,
    ledger: UsageLedger,
    log: Vec<Message>,
    state: TurnState,
    undo: Arc<Mutex<UndoJournal>>,
    git: Option<GitWorkTree>,
    events: Option<mpsc::UnboundedSender<TurnEvent>>,
    max_round_trips: usize,
}

impl Orchestrator {
    /// New session whose log starts with `system_prompt`.
    ///
    /// The cache strategy is picked from the provider's model id.
    pub fn new(
        system_prompt: impl Into<String>,
        provider: Arc<dyn LlmProvider>,
        dispatcher: ToolDispatcher,
    ) -> Self {
        let cache = CacheStrategy::for_model(provider.model());
        let tool_schemas = dispatcher.executor().tools();
        Self {
            provider,
            dispatcher,
            tool_schemas,
            cache,
            ledger: UsageLedger::new(5.0),
            log: vec![Message::system(system_prompt)],
            state: TurnState::Idle,
            undo: Arc::new(Mutex::new(UndoJournal::new())),
            git: None,
            events: None,
            max_round_trips: DEFAULT_MAX_ROUND_TRIPS,
        }
    }

    pub fn with_cache_strategy(mut self, cache: CacheStrategy) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_ledger(mut self, ledger: UsageLedger) -> Self {
        self.ledger = ledger;
        self
    }

    /// Share the journal the tools record file edits into.
    pub fn with_undo(mut self, undo: Arc<Mutex<UndoJournal>>) -> Self {
        self.undo = undo;
        self
    }

    /// Snapshot this work tree at the start of every turn so undo can
    /// restore it wholesale.
    pub fn with_git(mut self, git: GitWorkTree) -> Self {
        self.git = Some(git);
        self
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<TurnEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_max_round_trips(mut self, max: usize) -> Self {
        self.max_round_trips = max.max(1);
        self
    }

    pub fn log(&self) -> &[Message] {
        &self.log
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    pub fn cache_strategy(&self) -> CacheStrategy {
        self.cache
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    fn emit(&self, event: TurnEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn set_state(&mut self, state: TurnState) {
        debug!(from = ?self.state, to = ?state, "turn state");
        self.state = state;
    }

    /// Run one user input until a final answer, an interrupt, a failure or
    /// the round-trip ceiling.
    pub async fn run_turn(
        &mut self,
        input: impl Into<Content>,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        let tree = match &self.git {
            Some(git) => match git.snapshot().await {
                Ok(tree) => Some(tree),
                Err(e) => {
                    warn!(error = %e, "git snapshot failed, tracking edited files instead");
                    None
                }
            },
            None => None,
        };
        self.undo.lock().begin_turn_with_tree(&self.log, tree);
        let repaired = self.repair_dangling_calls();
        if repaired > 0 {
            info!(repaired, "answered tool calls left open by an earlier interrupt");
        }
        self.log.push(Message::user(input));

        let outcome = self.drive(cancel).await;
        match &outcome {
            TurnOutcome::Interrupted => self.emit(TurnEvent::Interrupted),
            TurnOutcome::RoundTripLimit => {
                warn!(max = self.max_round_trips, "round-trip ceiling reached");
                self.emit(TurnEvent::Error(format!(
                    "Stopped after {} round trips without a final answer.",
                    self.max_round_trips
                )));
            }
            _ => {}
        }
        self.set_state(TurnState::Idle);
        outcome
    }

    async fn drive(&mut self, cancel: &CancellationToken) -> TurnOutcome {
        for _ in 0..self.max_round_trips {
            if cancel.is_cancelled() {
                return TurnOutcome::Interrupted;
            }

            self.set_state(TurnState::AwaitingModel);
            let reply = match self.round_trip().await {
                Ok(reply) => reply,
                Err(e) => {
                    error!(error = %e, "round trip failed");
                    self.set_state(TurnState::Error);
                    self.emit(TurnEvent::Error(e.to_string()));
                    return TurnOutcome::Failed(e.to_string());
                }
            };

            let text = reply.text_content();
            if let Some(reasoning) = reply.reasoning.as_ref().filter(|r| !r.trim().is_empty()) {
                self.emit(TurnEvent::Reasoning(reasoning.clone()));
            }
            if !text.trim().is_empty() {
                self.emit(TurnEvent::AssistantText(text.clone()));
            }
            let calls = reply.tool_calls.clone();
            self.log.push(reply);

            if cancel.is_cancelled() {
                return TurnOutcome::Interrupted;
            }

            if calls.is_empty() {
                if text.trim().is_empty() {
                    debug!("empty reply without tool calls, asking again");
                    continue;
                }
                self.set_state(TurnState::FinalAnswer);
                return TurnOutcome::FinalAnswer(text);
            }

            self.set_state(TurnState::ToolCalls);
            for call in &calls {
                if cancel.is_cancelled() {
                    return TurnOutcome::Interrupted;
                }
                self.run_tool(call).await;
            }
        }
        TurnOutcome::RoundTripLimit
    }

    async fn round_trip(&mut self) -> Result<Message> {
        self.cache.annotate(&mut self.log);
        let elapsed = self.ledger.begin_request(Utc::now());

        let rt = self.provider.complete(&self.log, &self.tool_schemas).await?;

        if let Some(usage) = &rt.usage {
            let regression = self.ledger.record(usage, elapsed);
            self.emit(TurnEvent::Usage {
                usage: usage.clone(),
                total_cost: self.ledger.total_cost(),
            });
            if let Some(regression) = regression {
                self.emit(TurnEvent::CacheRegression(regression));
            }
        }
        Ok(rt.reply)
    }

    async fn run_tool(&mut self, call: &ToolCall) {
        self.emit(TurnEvent::ToolCall {
            name: call.tool_name.clone(),
            arguments: call.arguments.clone(),
        });
        let message = self.dispatcher.dispatch(call).await;
        self.emit(TurnEvent::ToolResult {
            name: call.tool_name.clone(),
            preview: preview(&message.text_content()),
        });
        self.log.push(message);
    }

    /// Answer calls from the last assistant message that never got a tool
    /// message, so the next request is well formed.
    fn repair_dangling_calls(&mut self) -> usize {
        let Some(pos) = self
            .log
            .iter()
            .rposition(|m| m.role == Role::Assistant)
        else {
            return 0;
        };

        let answered: HashSet<&str> = self.log[pos + 1..]
            .iter()
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        let missing: Vec<ToolCall> = self.log[pos]
            .tool_calls
            .iter()
            .filter(|c| !answered.contains(c.id.as_str()))
            .cloned()
            .collect();

        for call in &missing {
            self.log.push(Message::tool_result(call, DENIAL_MESSAGE));
        }
        missing.len()
    }

    /// Return to Idle after the front end dropped a running turn. Tool calls
    /// left unanswered are repaired when the next turn starts.
    pub fn abandon_turn(&mut self) {
        if self.state != TurnState::Idle {
            info!(state = ?self.state, "turn abandoned");
            self.set_state(TurnState::Idle);
        }
    }

    /// Revert the most recent turn: the log and any files it edited.
    ///
    /// Returns `false` when there is nothing to undo.
    pub async fn undo_last_turn(&mut self) -> bool {
        let Some(snapshot) = self.undo.lock().pop() else {
            return false;
        };
        match (&snapshot.tree, &self.git) {
            (Some(tree), Some(git)) => {
                if let Err(e) = git.restore(tree).await {
                    warn!(error = %e, "git restore failed, work tree may be inconsistent");
                }
            }
            _ => {
                let failures = restore_files(&snapshot.files).await;
                if !failures.is_empty() {
                    warn!(count = failures.len(), "some files could not be reverted");
                }
            }
        }
        self.log = snapshot.log;
        self.set_state(TurnState::Idle);
        true
    }
}

fn preview(text: &str) -> String {
    let first: String = text.chars().take(PREVIEW_CHARS).collect();
    if first.len() < text.len() {
        format!("{first}…")
    } else {
        first
    }
}
