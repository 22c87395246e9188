//! Round scheduling: one agent turn per configured agent, joined into a round.
//!
//! Whatever the degree of parallelism, the emitted events keep one shape:
//! all events of one agent turn are contiguous (`agent_start` first,
//! `agent_complete` last) and turns appear in configured agent order.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{FutureExt, StreamExt, TryStreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentRegistry, AgentRequest, ToolCallLedger, TurnSink};
use crate::agent::sink::TurnEnd;
use crate::events::{EventKind, EventSink};
use crate::request::Message;
use crate::session::{AgentTurn, IdGenerator, Round, SessionId};
use crate::{Error, Result};

/// Default per-agent event buffer for concurrent rounds.
pub const DEFAULT_AGENT_BUFFER: usize = 64;

/// Everything a scheduler needs to run one round.
#[derive(Clone)]
pub struct RoundContext {
    pub session_id: SessionId,
    pub round: u32,
    pub agents: Arc<Vec<String>>,
    pub goal: String,
    pub strategy: String,
    pub max_steps: u32,
    pub history: Arc<Vec<Round>>,
    pub messages: Arc<Vec<Message>>,
    pub registry: Arc<AgentRegistry>,
    pub ids: Arc<dyn IdGenerator>,
    pub ledger: ToolCallLedger,
    pub cancel: CancellationToken,
}

impl RoundContext {
    fn request(&self, agent: &str) -> AgentRequest {
        AgentRequest {
            session_id: self.session_id,
            agent: agent.to_string(),
            round: self.round,
            goal: self.goal.clone(),
            strategy: self.strategy.clone(),
            max_steps: self.max_steps,
            history: self.history.clone(),
            messages: self.messages.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

/// Runs every agent of a round and returns their turns in configured order.
///
/// `Err` is reserved for faults that stop the whole conversation; a
/// failing agent is reported as a turn with `finish_reason = error`.
#[async_trait]
pub trait RoundScheduler: Send + Sync {
    async fn run_round(&self, ctx: &RoundContext, events: &EventSink) -> Result<Vec<AgentTurn>>;
}

/// Runs one agent turn, emitting its events into `events`.
pub async fn run_turn(ctx: &RoundContext, agent: &str, events: EventSink) -> Result<AgentTurn> {
    let executor = ctx
        .registry
        .resolve(agent)
        .ok_or_else(|| Error::UnknownAgent(agent.to_string()))?;

    events
        .emit(EventKind::AgentStart {
            agent: agent.to_string(),
            round: ctx.round,
            max_steps: ctx.max_steps,
        })
        .await?;

    let mut sink = TurnSink::new(
        agent,
        ctx.round,
        ctx.max_steps,
        events,
        ctx.ids.clone(),
        ctx.ledger.clone(),
    );
    if ctx.cancel.is_cancelled() {
        return sink.finish(TurnEnd::Cancelled).await;
    }

    let request = ctx.request(agent);
    let end = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => TurnEnd::Cancelled,
        result = AssertUnwindSafe(executor.run(&request, &mut sink)).catch_unwind() => match result {
            Ok(Ok(outcome)) => TurnEnd::Completed(outcome),
            Ok(Err(Error::Cancelled)) if ctx.cancel.is_cancelled() => TurnEnd::Cancelled,
            Ok(Err(err)) => {
                tracing::warn!(agent, round = ctx.round, error = %err, "agent turn failed");
                TurnEnd::Failed(err.to_string())
            }
            Err(_) => {
                tracing::warn!(agent, round = ctx.round, "agent turn panicked");
                TurnEnd::Failed(format!("agent {} panicked", agent))
            }
        },
    };

    if matches!(end, TurnEnd::Cancelled) {
        tracing::info!(agent, round = ctx.round, "agent turn cancelled");
    }
    sink.finish(end).await
}

/// Runs agents one after another; agent i+1 starts after agent i completes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialScheduler;

#[async_trait]
impl RoundScheduler for SequentialScheduler {
    async fn run_round(&self, ctx: &RoundContext, events: &EventSink) -> Result<Vec<AgentTurn>> {
        let mut turns = Vec::with_capacity(ctx.agents.len());
        for agent in ctx.agents.iter() {
            turns.push(run_turn(ctx, agent, events.clone()).await?);
        }
        Ok(turns)
    }
}

/// Runs up to `max_concurrent` agents at once.
///
/// Each agent writes into its own bounded buffer; buffers are drained into
/// the conversation stream one agent at a time in configured order, so the
/// first agent streams live and later agents are replayed once reached.
/// The round returns only after every agent has completed.
#[derive(Debug, Clone, Copy)]
pub struct ConcurrentScheduler {
    max_concurrent: usize,
    agent_buffer: usize,
}

impl ConcurrentScheduler {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            agent_buffer: DEFAULT_AGENT_BUFFER,
        }
    }

    pub fn with_agent_buffer(mut self, agent_buffer: usize) -> Self {
        self.agent_buffer = agent_buffer.max(1);
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}

#[async_trait]
impl RoundScheduler for ConcurrentScheduler {
    async fn run_round(&self, ctx: &RoundContext, events: &EventSink) -> Result<Vec<AgentTurn>> {
        let mut buffers = Vec::with_capacity(ctx.agents.len());
        let mut runs = Vec::with_capacity(ctx.agents.len());
        for agent in ctx.agents.iter() {
            let (tx, rx) = mpsc::channel(self.agent_buffer);
            buffers.push(rx);
            runs.push(run_turn(ctx, agent, EventSink::new(tx)));
        }

        // One slot per agent, filled in configured order once all have joined.
        let turns = futures::stream::iter(runs)
            .buffered(self.max_concurrent)
            .try_collect::<Vec<_>>();

        let forward = async {
            for mut rx in buffers {
                while let Some(event) = rx.recv().await {
                    events.forward(event).await?;
                }
            }
            Ok::<(), Error>(())
        };

        let (turns, ()) = tokio::try_join!(turns, forward)?;
        Ok(turns)
    }
}
