//! Conversation session state: identity, rounds, agent turns and tool calls.
//!
//! This is internal orchestrator state. Callers only ever see events, but
//! every type here is serializable so the same shapes can be rebuilt from
//! the stream and persisted by whoever needs them.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Identifier of a tool call, unique within one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolCallId(pub String);

impl ToolCallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ToolCallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position of a generated tool call within a session.
///
/// Round, agent and step together are unique per session, and none of them
/// depend on when the agent got to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolCallSlot<'a> {
    pub round: u32,
    pub agent: &'a str,
    pub step: u32,
}

/// Source of session and tool call identifiers.
///
/// Injected into the orchestrator so runs can be made fully deterministic.
pub trait IdGenerator: Send + Sync {
    fn session_id(&self) -> SessionId;
    fn tool_call_id(&self, slot: ToolCallSlot<'_>) -> ToolCallId;
}

/// Random identifiers, the default for real conversations.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
    fn session_id(&self) -> SessionId {
        SessionId::new()
    }

    fn tool_call_id(&self, _slot: ToolCallSlot<'_>) -> ToolCallId {
        ToolCallId(format!("call_{}", Uuid::new_v4().simple()))
    }
}

/// Counter-based session ids and slot-derived tool call ids.
///
/// Two fresh generators produce identical ids, whatever order concurrent
/// agents reach their tool calls in.
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    sessions: AtomicU64,
}

impl SequentialIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn session_id(&self) -> SessionId {
        let n = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        SessionId(Uuid::from_u128(n as u128))
    }

    fn tool_call_id(&self, slot: ToolCallSlot<'_>) -> ToolCallId {
        ToolCallId(format!("call_{}_{}_{}", slot.round, slot.agent, slot.step))
    }
}

/// Lifecycle of a tool call: `requested -> succeeded | failed`, never backward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolCallState {
    Requested,
    Succeeded { result: serde_json::Value },
    Failed { error: String },
}

impl ToolCallState {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, ToolCallState::Requested)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub id: ToolCallId,
    pub name: String,
    pub arguments: serde_json::Value,
    pub state: ToolCallState,
}

impl ToolCall {
    pub fn requested(id: ToolCallId, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id,
            name: name.into(),
            arguments,
            state: ToolCallState::Requested,
        }
    }

    pub fn succeed(&mut self, result: serde_json::Value) -> Result<()> {
        self.resolve(ToolCallState::Succeeded { result })
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.resolve(ToolCallState::Failed {
            error: error.into(),
        })
    }

    fn resolve(&mut self, next: ToolCallState) -> Result<()> {
        if self.state.is_resolved() {
            return Err(Error::ToolCallResolved(self.id.to_string()));
        }
        self.state = next;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    Completed,
    Error,
    Cancelled,
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FinishReason::Completed => write!(f, "completed"),
            FinishReason::Error => write!(f, "error"),
            FinishReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The terminal result of one agent in one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTurn {
    pub agent: String,
    pub round: u32,
    pub tool_calls: Vec<ToolCall>,
    pub response: String,
    pub steps: u32,
    pub finish_reason: FinishReason,
}

impl AgentTurn {
    /// A turn that ended before the agent produced anything.
    pub fn empty(agent: impl Into<String>, round: u32, finish_reason: FinishReason) -> Self {
        Self {
            agent: agent.into(),
            round,
            tool_calls: Vec::new(),
            response: String::new(),
            steps: 0,
            finish_reason,
        }
    }
}

/// A sealed round: one turn per configured agent, in configured order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Round {
    pub number: u32,
    pub turns: Vec<AgentTurn>,
    pub completed_at: DateTime<Utc>,
}

impl Round {
    pub fn failed_agents(&self) -> impl Iterator<Item = &AgentTurn> {
        self.turns
            .iter()
            .filter(|t| t.finish_reason != FinishReason::Completed)
    }
}

/// State owned by a single conversation run.
///
/// Immutable after creation apart from the append-only round history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSession {
    pub id: SessionId,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub agents: Vec<String>,
    pub round_count: u32,
    history: Vec<Round>,
}

impl ConversationSession {
    pub fn new(id: SessionId, owner: impl Into<String>, agents: Vec<String>, round_count: u32) -> Self {
        Self {
            id,
            owner: owner.into(),
            created_at: Utc::now(),
            agents,
            round_count,
            history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[Round] {
        &self.history
    }

    /// Number of the next round to run (1-based).
    pub fn next_round(&self) -> u32 {
        self.history.len() as u32 + 1
    }

    pub fn is_complete(&self) -> bool {
        self.history.len() as u32 >= self.round_count
    }

    /// Append a finished round, enforcing contiguity and one turn per agent.
    pub fn seal_round(&mut self, round: Round) -> Result<()> {
        let expected = self.next_round();
        if round.number != expected {
            return Err(Error::Scheduler(format!(
                "round {} sealed out of order, expected {}",
                round.number, expected
            )));
        }
        if round.number > self.round_count {
            return Err(Error::Scheduler(format!(
                "round {} exceeds configured round count {}",
                round.number, self.round_count
            )));
        }
        let produced: Vec<&str> = round.turns.iter().map(|t| t.agent.as_str()).collect();
        let configured: Vec<&str> = self.agents.iter().map(String::as_str).collect();
        if produced != configured {
            return Err(Error::Scheduler(format!(
                "round {} produced turns for {:?}, expected {:?}",
                round.number, produced, configured
            )));
        }
        self.history.push(round);
        Ok(())
    }
}
