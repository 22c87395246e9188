//! Per-turn reporting channel handed to agent executors.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::events::{EventKind, EventSink};
use crate::session::{AgentTurn, FinishReason, IdGenerator, ToolCall, ToolCallId, ToolCallSlot};
use crate::{Error, Result};

const UNRESOLVED_AT_TURN_END: &str = "tool call did not resolve before the turn ended";

/// A tool invocation an agent is about to make.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    /// Caller-supplied id, e.g. a model's tool-use id. Generated when absent.
    pub id: Option<String>,
    pub name: String,
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: None,
            name: name.into(),
            arguments,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Session-wide record of every tool call id handed out.
#[derive(Debug, Clone, Default)]
pub struct ToolCallLedger {
    ids: Arc<Mutex<HashSet<ToolCallId>>>,
}

impl ToolCallLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an id, failing if it was already used in this session.
    pub async fn claim(&self, id: &ToolCallId) -> Result<()> {
        if self.ids.lock().await.insert(id.clone()) {
            Ok(())
        } else {
            Err(Error::DuplicateToolCall(id.to_string()))
        }
    }

    pub async fn len(&self) -> usize {
        self.ids.lock().await.len()
    }
}

/// How an agent turn ended, as seen by the scheduler.
#[derive(Debug)]
pub(crate) enum TurnEnd {
    Completed(crate::agent::AgentOutcome),
    Failed(String),
    Cancelled,
}

/// Reports one agent turn's progress as events, in real time.
///
/// Enforces the tool call lifecycle: every call gets a session-unique id,
/// moves from requested to succeeded or failed exactly once, and the
/// number of calls stays within the step budget.
pub struct TurnSink {
    agent: String,
    round: u32,
    max_steps: u32,
    events: EventSink,
    ids: Arc<dyn IdGenerator>,
    ledger: ToolCallLedger,
    calls: Vec<ToolCall>,
    streamed: String,
    chunks: usize,
}

impl TurnSink {
    pub fn new(
        agent: impl Into<String>,
        round: u32,
        max_steps: u32,
        events: EventSink,
        ids: Arc<dyn IdGenerator>,
        ledger: ToolCallLedger,
    ) -> Self {
        Self {
            agent: agent.into(),
            round,
            max_steps,
            events,
            ids,
            ledger,
            calls: Vec::new(),
            streamed: String::new(),
            chunks: 0,
        }
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    /// Tool calls issued so far, in call order.
    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.calls
    }

    pub fn remaining_steps(&self) -> u32 {
        self.max_steps.saturating_sub(self.calls.len() as u32)
    }

    /// Record a new tool call and emit `agent_tool_call`.
    pub async fn request_tool(&mut self, request: ToolCallRequest) -> Result<ToolCallId> {
        if self.remaining_steps() == 0 {
            return Err(Error::StepLimitExceeded {
                max: self.max_steps,
            });
        }

        let step = self.calls.len() as u32 + 1;
        let id = match request.id {
            Some(id) => ToolCallId::new(id),
            None => self.ids.tool_call_id(ToolCallSlot {
                round: self.round,
                agent: &self.agent,
                step,
            }),
        };
        self.ledger.claim(&id).await?;

        let call = ToolCall::requested(id.clone(), request.name, request.arguments);
        self.calls.push(call.clone());

        tracing::debug!(agent = %self.agent, round = self.round, step, tool = %call.name, "tool call requested");
        self.events
            .emit(EventKind::AgentToolCall {
                agent: self.agent.clone(),
                round: self.round,
                step,
                tool_call: call,
            })
            .await?;
        Ok(id)
    }

    /// Resolve a pending call successfully and emit `agent_tool_result`.
    pub async fn tool_succeeded(&mut self, id: &ToolCallId, result: Value) -> Result<()> {
        let step = self.position(id)?;
        self.calls[step].succeed(result)?;
        self.emit_result(step).await
    }

    /// Resolve a pending call as failed and emit `agent_tool_result`.
    ///
    /// Tool failures are data: the agent decides what to do next.
    pub async fn tool_failed(&mut self, id: &ToolCallId, error: impl Into<String>) -> Result<()> {
        let step = self.position(id)?;
        self.calls[step].fail(error)?;
        self.emit_result(step).await
    }

    /// Emit a piece of the agent's response text.
    pub async fn response_chunk(&mut self, chunk: impl Into<String>) -> Result<()> {
        let chunk = chunk.into();
        self.streamed.push_str(&chunk);
        self.chunks += 1;
        self.events
            .emit(EventKind::AgentResponseChunk {
                agent: self.agent.clone(),
                round: self.round,
                chunk,
            })
            .await
    }

    fn position(&self, id: &ToolCallId) -> Result<usize> {
        self.calls
            .iter()
            .position(|c| &c.id == id)
            .ok_or_else(|| Error::UnknownToolCall(id.to_string()))
    }

    async fn emit_result(&self, index: usize) -> Result<()> {
        let call = &self.calls[index];
        tracing::debug!(agent = %self.agent, round = self.round, id = %call.id, "tool call resolved");
        self.events
            .emit(EventKind::AgentToolResult {
                agent: self.agent.clone(),
                round: self.round,
                step: index as u32 + 1,
                tool_call_id: call.id.clone(),
                result: call.state.clone(),
            })
            .await
    }

    /// Close the turn: resolve dangling calls, make sure the response was
    /// streamed at least once, and emit `agent_error` / `agent_complete`.
    pub(crate) async fn finish(mut self, end: TurnEnd) -> Result<AgentTurn> {
        let dangling_reason = match &end {
            TurnEnd::Cancelled => "cancelled",
            _ => UNRESOLVED_AT_TURN_END,
        };
        for index in 0..self.calls.len() {
            if !self.calls[index].state.is_resolved() {
                self.calls[index].fail(dangling_reason)?;
                self.emit_result(index).await?;
            }
        }

        let (response, steps, finish_reason) = match end {
            TurnEnd::Completed(outcome) => {
                let response = if outcome.response.is_empty() {
                    std::mem::take(&mut self.streamed)
                } else {
                    outcome.response
                };
                if self.chunks == 0 {
                    self.response_chunk(response.clone()).await?;
                }
                (response, outcome.steps, FinishReason::Completed)
            }
            TurnEnd::Failed(message) => {
                self.events
                    .emit(EventKind::AgentError {
                        agent: self.agent.clone(),
                        round: self.round,
                        message,
                    })
                    .await?;
                (String::new(), 0, FinishReason::Error)
            }
            TurnEnd::Cancelled => (std::mem::take(&mut self.streamed), 0, FinishReason::Cancelled),
        };

        let turn = AgentTurn {
            agent: self.agent.clone(),
            round: self.round,
            steps: steps.max(self.calls.len() as u32),
            tool_calls: std::mem::take(&mut self.calls),
            response,
            finish_reason,
        };
        self.events
            .emit(EventKind::AgentComplete {
                agent: turn.agent.clone(),
                round: turn.round,
                response: turn.response.clone(),
                tool_calls: turn.tool_calls.clone(),
                steps: turn.steps,
                finish_reason: turn.finish_reason,
            })
            .await?;
        Ok(turn)
    }
}
