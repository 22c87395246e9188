//! The top-level conversation driver.
//!
//! An [`Orchestrator`] is built for one conversation and consumed by
//! [`Orchestrator::execute_conversation`], which validates the input and
//! returns a lazy [`EventStream`]. Nothing runs until the stream is pulled.
//!
//! Phases, in strict order:
//!
//! ```text
//! conversation_start
//! initiator_start, initiator_complete
//! round 1..=N: round_start, <agent turns>, round_complete
//! summarizer_start, summarizer_chunk+, conversation_complete
//! ```
//!
//! A fatal fault at any point ends the stream with a single `error` event.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::initiator::{DefaultInitiator, Initiator, InitiatorContext, Plan};
use super::scheduler::{
    ConcurrentScheduler, RoundContext, RoundScheduler, SequentialScheduler, DEFAULT_AGENT_BUFFER,
};
use super::stream::EventStream;
use super::summarizer::{DefaultSummarizer, Summarizer, SummaryContext, SummarySink};
use crate::agent::{AgentRegistry, ToolCallLedger};
use crate::events::{EventKind, EventSink};
use crate::request::{validate_agents, validate_messages, validate_rounds, Message, MultiAgentRequest};
use crate::session::{ConversationSession, IdGenerator, Round, SessionId, UuidIdGenerator};
use crate::{Error, Result};

/// Default tool-call budget per agent turn.
pub const DEFAULT_MAX_STEPS: u32 = 5;

/// Default bound on agents running at once under concurrent scheduling.
pub const DEFAULT_MAX_CONCURRENT_AGENTS: usize = 5;

/// How agents within a round are run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheduling {
    #[default]
    Sequential,
    Concurrent,
}

impl std::fmt::Display for Scheduling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scheduling::Sequential => write!(f, "sequential"),
            Scheduling::Concurrent => write!(f, "concurrent"),
        }
    }
}

/// Tunables that usually come from the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorOptions {
    pub max_steps: u32,
    pub scheduling: Scheduling,
    pub max_concurrent_agents: usize,
    pub agent_buffer: usize,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            scheduling: Scheduling::Sequential,
            max_concurrent_agents: DEFAULT_MAX_CONCURRENT_AGENTS,
            agent_buffer: DEFAULT_AGENT_BUFFER,
        }
    }
}

impl OrchestratorOptions {
    fn scheduler(&self) -> Arc<dyn RoundScheduler> {
        match self.scheduling {
            Scheduling::Sequential => Arc::new(SequentialScheduler),
            Scheduling::Concurrent => Arc::new(
                ConcurrentScheduler::new(self.max_concurrent_agents)
                    .with_agent_buffer(self.agent_buffer),
            ),
        }
    }
}

/// Drives Initiator, N rounds, then Summarizer for one conversation.
pub struct Orchestrator {
    owner: String,
    agents: Vec<String>,
    rounds: u32,
    max_steps: u32,
    registry: Arc<AgentRegistry>,
    scheduler: Arc<dyn RoundScheduler>,
    initiator: Arc<dyn Initiator>,
    summarizer: Arc<dyn Summarizer>,
    ids: Arc<dyn IdGenerator>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Validate agents (1..=5, unique) and rounds (1..=10).
    ///
    /// Defaults: built-in registry, sequential scheduling, rule-based
    /// initiator and summarizer, UUID identities.
    pub fn new(owner: impl Into<String>, agents: Vec<String>, rounds: u32) -> Result<Self> {
        validate_agents(&agents)?;
        validate_rounds(rounds)?;
        Ok(Self {
            owner: owner.into(),
            agents,
            rounds,
            max_steps: DEFAULT_MAX_STEPS,
            registry: Arc::new(AgentRegistry::builtin()),
            scheduler: Arc::new(SequentialScheduler),
            initiator: Arc::new(DefaultInitiator),
            summarizer: Arc::new(DefaultSummarizer),
            ids: Arc::new(UuidIdGenerator),
            cancel: CancellationToken::new(),
        })
    }

    /// Build from a transport request, validating every field of it.
    pub fn from_request(owner: impl Into<String>, request: &MultiAgentRequest) -> Result<Self> {
        request.validate()?;
        Self::new(owner, request.agents.clone(), request.rounds)
    }

    pub fn with_registry(mut self, registry: AgentRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_scheduler<S>(mut self, scheduler: S) -> Self
    where
        S: RoundScheduler + 'static,
    {
        self.scheduler = Arc::new(scheduler);
        self
    }

    pub fn with_initiator<I>(mut self, initiator: I) -> Self
    where
        I: Initiator + 'static,
    {
        self.initiator = Arc::new(initiator);
        self
    }

    pub fn with_summarizer<S>(mut self, summarizer: S) -> Self
    where
        S: Summarizer + 'static,
    {
        self.summarizer = Arc::new(summarizer);
        self
    }

    pub fn with_id_generator<G>(mut self, ids: G) -> Self
    where
        G: IdGenerator + 'static,
    {
        self.ids = Arc::new(ids);
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn with_options(self, options: OrchestratorOptions) -> Self {
        let scheduler = options.scheduler();
        let mut this = self.with_max_steps(options.max_steps);
        this.scheduler = scheduler;
        this
    }

    /// Tie the conversation to an outer token; cancelling `parent` cancels
    /// the conversation but not the other way round.
    pub fn with_cancellation(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn agents(&self) -> &[String] {
        &self.agents
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    /// Start a conversation over `messages`.
    ///
    /// Input errors are returned here and never reach the stream. The
    /// returned stream does no work until it is polled.
    pub fn execute_conversation(self, messages: Vec<Message>) -> Result<EventStream> {
        validate_messages(&messages)?;
        if let Some(agent) = self.agents.iter().find(|a| !self.registry.contains(a)) {
            return Err(Error::Validation(format!(
                "no executor registered for agent: {}",
                agent
            )));
        }

        let session_id = self.ids.session_id();
        let cancel = self.cancel.clone();
        Ok(EventStream::new(session_id, cancel, move |events| {
            self.drive(session_id, messages, events)
        }))
    }

    async fn drive(self, session_id: SessionId, messages: Vec<Message>, events: EventSink) {
        let span = tracing::info_span!("conversation", session = %session_id.short(), owner = %self.owner);
        async move {
            tracing::info!(agents = ?self.agents, rounds = self.rounds, "conversation started");
            match self.run(session_id, messages, &events).await {
                Ok(()) => tracing::info!("conversation complete"),
                Err(err) => {
                    if matches!(err, Error::Cancelled) {
                        tracing::warn!("conversation cancelled");
                    } else {
                        tracing::error!(error = %err, "conversation failed");
                    }
                    let _ = events
                        .emit(EventKind::Error {
                            message: err.to_string(),
                        })
                        .await;
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(&self, session_id: SessionId, messages: Vec<Message>, events: &EventSink) -> Result<()> {
        let started = Instant::now();
        let mut session =
            ConversationSession::new(session_id, self.owner.clone(), self.agents.clone(), self.rounds);

        events
            .emit(EventKind::ConversationStart {
                session_id,
                agents: self.agents.clone(),
                rounds: self.rounds,
            })
            .await?;

        let plan = self.initiate(&messages, events).await?;

        let agents = Arc::new(self.agents.clone());
        let messages = Arc::new(messages);
        let ledger = ToolCallLedger::new();
        while !session.is_complete() {
            self.check_cancelled()?;
            let round = session.next_round();
            tracing::debug!(round, "round started");
            events
                .emit(EventKind::RoundStart {
                    round,
                    agents: self.agents.clone(),
                    goal: plan.goal.clone(),
                })
                .await?;

            let ctx = RoundContext {
                session_id,
                round,
                agents: agents.clone(),
                goal: plan.goal.clone(),
                strategy: plan.strategy.clone(),
                max_steps: self.max_steps,
                history: Arc::new(session.history().to_vec()),
                messages: messages.clone(),
                registry: self.registry.clone(),
                ids: self.ids.clone(),
                ledger: ledger.clone(),
                cancel: self.cancel.clone(),
            };
            let turns = self.scheduler.run_round(&ctx, events).await?;
            let agent_results = turns.clone();
            session.seal_round(Round {
                number: round,
                turns,
                completed_at: Utc::now(),
            })?;

            events
                .emit(EventKind::RoundComplete {
                    round,
                    agent_results,
                })
                .await?;
            tracing::debug!(round, "round sealed");
        }

        self.check_cancelled()?;
        let summary = self.summarize(&plan.goal, session.history(), events).await?;

        events
            .emit(EventKind::ConversationComplete {
                summary,
                total_rounds: session.history().len() as u32,
                total_agents: self.agents.len(),
                execution_time_ms: started.elapsed().as_millis() as u64,
            })
            .await
    }

    async fn initiate(&self, messages: &[Message], events: &EventSink) -> Result<Plan> {
        events
            .emit(EventKind::InitiatorStart {
                message_count: messages.len(),
            })
            .await?;

        let context = InitiatorContext {
            messages,
            agents: &self.agents,
            rounds: self.rounds,
        };
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            plan = self.initiator.initiate(context) => plan,
        };
        let plan = result.map_err(|err| stage_error(err, Error::Initiator))?;

        tracing::debug!(goal = %plan.goal, "plan ready");
        events
            .emit(EventKind::InitiatorComplete {
                goal: plan.goal.clone(),
                strategy: plan.strategy.clone(),
                success_criteria: plan.success_criteria.clone(),
            })
            .await?;
        Ok(plan)
    }

    /// Run the summarizer and return the concatenation of its chunks.
    async fn summarize(&self, goal: &str, rounds: &[Round], events: &EventSink) -> Result<String> {
        events.emit(EventKind::SummarizerStart).await?;

        let mut sink = SummarySink::new(events.clone());
        let context = SummaryContext { goal, rounds };
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = self.summarizer.summarize(context, &mut sink) => result,
        };
        result.map_err(|err| stage_error(err, Error::Summarizer))?;

        if sink.chunk_count() == 0 {
            sink.chunk("").await?;
        }
        Ok(sink.into_text())
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("owner", &self.owner)
            .field("agents", &self.agents)
            .field("rounds", &self.rounds)
            .field("max_steps", &self.max_steps)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Fold an initiator or summarizer failure into its fatal variant.
fn stage_error(err: Error, wrap: fn(String) -> Error) -> Error {
    match err {
        Error::Cancelled => Error::Cancelled,
        Error::Initiator(message) | Error::Summarizer(message) => wrap(message),
        other => wrap(other.to_string()),
    }
}
