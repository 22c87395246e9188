//! Progress events yielded by a conversation.
//!
//! Events are the only thing a caller sees. On the wire each one is a flat
//! JSON object tagged by `type`, e.g.
//! `{"type":"agent_start","timestamp":"...","agent":"data-steward","round":1,"maxSteps":5}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::session::{AgentTurn, FinishReason, Round, SessionId, ToolCall, ToolCallId, ToolCallState};
use crate::{Error, Result};

/// A timestamped, immutable progress record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum EventKind {
    ConversationStart {
        session_id: SessionId,
        agents: Vec<String>,
        rounds: u32,
    },
    InitiatorStart {
        message_count: usize,
    },
    InitiatorComplete {
        goal: String,
        strategy: String,
        success_criteria: Vec<String>,
    },
    RoundStart {
        round: u32,
        agents: Vec<String>,
        goal: String,
    },
    AgentStart {
        agent: String,
        round: u32,
        max_steps: u32,
    },
    AgentToolCall {
        agent: String,
        round: u32,
        step: u32,
        tool_call: ToolCall,
    },
    AgentToolResult {
        agent: String,
        round: u32,
        step: u32,
        tool_call_id: ToolCallId,
        result: ToolCallState,
    },
    AgentResponseChunk {
        agent: String,
        round: u32,
        chunk: String,
    },
    AgentComplete {
        agent: String,
        round: u32,
        response: String,
        tool_calls: Vec<ToolCall>,
        steps: u32,
        finish_reason: FinishReason,
    },
    RoundComplete {
        round: u32,
        agent_results: Vec<AgentTurn>,
    },
    SummarizerStart,
    SummarizerChunk {
        chunk: String,
    },
    ConversationComplete {
        summary: String,
        total_rounds: u32,
        total_agents: usize,
        execution_time_ms: u64,
    },
    Error {
        message: String,
    },
    AgentError {
        agent: String,
        round: u32,
        message: String,
    },
}

impl EventKind {
    /// The wire tag of this event.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::ConversationStart { .. } => "conversation_start",
            EventKind::InitiatorStart { .. } => "initiator_start",
            EventKind::InitiatorComplete { .. } => "initiator_complete",
            EventKind::RoundStart { .. } => "round_start",
            EventKind::AgentStart { .. } => "agent_start",
            EventKind::AgentToolCall { .. } => "agent_tool_call",
            EventKind::AgentToolResult { .. } => "agent_tool_result",
            EventKind::AgentResponseChunk { .. } => "agent_response_chunk",
            EventKind::AgentComplete { .. } => "agent_complete",
            EventKind::RoundComplete { .. } => "round_complete",
            EventKind::SummarizerStart => "summarizer_start",
            EventKind::SummarizerChunk { .. } => "summarizer_chunk",
            EventKind::ConversationComplete { .. } => "conversation_complete",
            EventKind::Error { .. } => "error",
            EventKind::AgentError { .. } => "agent_error",
        }
    }

    /// The agent this event belongs to, if it is part of an agent turn.
    pub fn agent(&self) -> Option<&str> {
        match self {
            EventKind::AgentStart { agent, .. }
            | EventKind::AgentToolCall { agent, .. }
            | EventKind::AgentToolResult { agent, .. }
            | EventKind::AgentResponseChunk { agent, .. }
            | EventKind::AgentComplete { agent, .. }
            | EventKind::AgentError { agent, .. } => Some(agent),
            _ => None,
        }
    }

    /// The round this event belongs to, if any.
    pub fn round(&self) -> Option<u32> {
        match self {
            EventKind::RoundStart { round, .. }
            | EventKind::AgentStart { round, .. }
            | EventKind::AgentToolCall { round, .. }
            | EventKind::AgentToolResult { round, .. }
            | EventKind::AgentResponseChunk { round, .. }
            | EventKind::AgentComplete { round, .. }
            | EventKind::RoundComplete { round, .. }
            | EventKind::AgentError { round, .. } => Some(*round),
            _ => None,
        }
    }
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            EventKind::ConversationComplete { .. } | EventKind::Error { .. }
        )
    }
}

/// Sending half of an event channel.
///
/// A failed send means the consumer is gone, which is reported as
/// cancellation to whoever is producing.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<Event>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<Event>) -> Self {
        Self { tx }
    }

    pub async fn emit(&self, kind: EventKind) -> Result<()> {
        tracing::trace!(event = kind.name(), "emit");
        self.tx
            .send(Event::new(kind))
            .await
            .map_err(|_| Error::Cancelled)
    }

    /// Forward an already-stamped event, keeping its original timestamp.
    pub async fn forward(&self, event: Event) -> Result<()> {
        self.tx.send(event).await.map_err(|_| Error::Cancelled)
    }
}

/// Rebuilds conversation state by folding over an event sequence.
#[derive(Debug, Default, Clone)]
pub struct ConversationFold {
    pub session_id: Option<SessionId>,
    pub goal: Option<String>,
    pub rounds: Vec<Round>,
    pub summary: Option<String>,
    pub error: Option<String>,
    pub agent_errors: Vec<(String, u32, String)>,
}

impl ConversationFold {
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
        let mut fold = Self::default();
        for event in events {
            fold.apply(event);
        }
        fold
    }

    pub fn apply(&mut self, event: &Event) {
        match &event.kind {
            EventKind::ConversationStart { session_id, .. } => self.session_id = Some(*session_id),
            EventKind::InitiatorComplete { goal, .. } => self.goal = Some(goal.clone()),
            EventKind::RoundComplete {
                round,
                agent_results,
            } => self.rounds.push(Round {
                number: *round,
                turns: agent_results.clone(),
                completed_at: event.timestamp,
            }),
            EventKind::ConversationComplete { summary, .. } => self.summary = Some(summary.clone()),
            EventKind::Error { message } => self.error = Some(message.clone()),
            EventKind::AgentError {
                agent,
                round,
                message,
            } => self
                .agent_errors
                .push((agent.clone(), *round, message.clone())),
            _ => {}
        }
    }

    pub fn is_finished(&self) -> bool {
        self.summary.is_some() || self.error.is_some()
    }
}
