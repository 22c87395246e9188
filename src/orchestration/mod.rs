//! Orchestration layer for multi-agent conversations.
//!
//! The [`Orchestrator`] runs the [`Initiator`], then every round through a
//! [`RoundScheduler`], then the [`Summarizer`], and hands the caller an
//! [`EventStream`] that advances only when pulled.

mod initiator;
mod orchestrator;
mod scheduler;
mod stream;
mod summarizer;

pub use initiator::{plan, DefaultInitiator, Initiator, InitiatorContext, Plan, NO_GOAL};
pub use orchestrator::{
    Orchestrator, OrchestratorOptions, Scheduling, DEFAULT_MAX_CONCURRENT_AGENTS, DEFAULT_MAX_STEPS,
};
pub use scheduler::{
    run_turn, ConcurrentScheduler, RoundContext, RoundScheduler, SequentialScheduler,
    DEFAULT_AGENT_BUFFER,
};
pub use stream::EventStream;
pub use summarizer::{DefaultSummarizer, Summarizer, SummaryContext, SummarySink};
