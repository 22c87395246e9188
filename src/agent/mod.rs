//! Agent executors and the registry that resolves them by identity.
//!
//! The orchestrator never knows what an agent actually does. It hands an
//! [`AgentRequest`] and a [`TurnSink`] to whatever [`AgentExecutor`] the
//! registry returns for the agent identity, and the executor reports tool
//! call transitions and response text through the sink as they happen.

mod command;
mod echo;
pub(crate) mod sink;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::request::Message;
use crate::session::{Round, SessionId};
use crate::Result;

pub use command::{CommandAgent, CommandResponse};
pub use echo::EchoAgent;
pub use sink::{ToolCallLedger, ToolCallRequest, TurnSink};

/// Everything an agent gets to see for one turn.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub session_id: SessionId,
    pub agent: String,
    pub round: u32,
    pub goal: String,
    pub strategy: String,
    pub max_steps: u32,
    /// Sealed rounds that completed before this one.
    pub history: Arc<Vec<Round>>,
    pub messages: Arc<Vec<Message>>,
    /// Cancelled when the conversation is abandoned or cancelled.
    pub cancel: CancellationToken,
}

/// What an executor returns when its turn ends normally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentOutcome {
    /// Final response. May be left empty when the text was streamed
    /// through [`TurnSink::response_chunk`].
    pub response: String,
    pub steps: u32,
}

impl AgentOutcome {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            steps: 1,
        }
    }

    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = steps;
        self
    }
}

/// Runs one agent's turn for one round.
///
/// Returning `Err` marks the turn as failed; the rest of the round and
/// the conversation carry on.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn run(&self, request: &AgentRequest, sink: &mut TurnSink) -> Result<AgentOutcome>;
}

/// Maps agent identities to executors.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    executors: HashMap<String, Arc<dyn AgentExecutor>>,
    fallback: Option<Arc<dyn AgentExecutor>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry where every identity without an explicit executor runs [`EchoAgent`].
    pub fn builtin() -> Self {
        Self::new().with_fallback(EchoAgent)
    }

    pub fn register<E>(&mut self, agent: impl Into<String>, executor: E)
    where
        E: AgentExecutor + 'static,
    {
        self.executors.insert(agent.into(), Arc::new(executor));
    }

    pub fn with_agent<E>(mut self, agent: impl Into<String>, executor: E) -> Self
    where
        E: AgentExecutor + 'static,
    {
        self.register(agent, executor);
        self
    }

    pub fn with_fallback<E>(mut self, executor: E) -> Self
    where
        E: AgentExecutor + 'static,
    {
        self.fallback = Some(Arc::new(executor));
        self
    }

    pub fn resolve(&self, agent: &str) -> Option<Arc<dyn AgentExecutor>> {
        self.executors
            .get(agent)
            .or(self.fallback.as_ref())
            .cloned()
    }

    pub fn contains(&self, agent: &str) -> bool {
        self.executors.contains_key(agent) || self.fallback.is_some()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut agents: Vec<_> = self.executors.keys().collect();
        agents.sort();
        f.debug_struct("AgentRegistry")
            .field("agents", &agents)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}
