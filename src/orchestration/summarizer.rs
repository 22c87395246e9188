//! Summarizer: synthesizes the sealed round history into a final answer.

use async_trait::async_trait;

use crate::events::{EventKind, EventSink};
use crate::session::{FinishReason, Round};
use crate::Result;

#[derive(Debug, Clone, Copy)]
pub struct SummaryContext<'a> {
    pub goal: &'a str,
    pub rounds: &'a [Round],
}

/// Streams summary text as `summarizer_chunk` events and keeps the full text.
pub struct SummarySink {
    events: EventSink,
    text: String,
    chunks: usize,
}

impl SummarySink {
    pub fn new(events: EventSink) -> Self {
        Self {
            events,
            text: String::new(),
            chunks: 0,
        }
    }

    pub async fn chunk(&mut self, chunk: impl Into<String>) -> Result<()> {
        let chunk = chunk.into();
        self.text.push_str(&chunk);
        self.chunks += 1;
        self.events.emit(EventKind::SummarizerChunk { chunk }).await
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks
    }

    /// Concatenation of every chunk emitted so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub(crate) fn into_text(self) -> String {
        self.text
    }
}

/// Produces the final synthesis. Failure here ends the conversation.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, context: SummaryContext<'_>, sink: &mut SummarySink) -> Result<()>;
}

/// Lists every agent's response from every round, one chunk per round.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSummarizer;

#[async_trait]
impl Summarizer for DefaultSummarizer {
    async fn summarize(&self, context: SummaryContext<'_>, sink: &mut SummarySink) -> Result<()> {
        sink.chunk(format!(
            "Summary for \"{}\" ({} round(s)).\n",
            context.goal,
            context.rounds.len()
        ))
        .await?;

        if context.rounds.is_empty() {
            return sink.chunk("No rounds were executed.\n").await;
        }

        for round in context.rounds {
            sink.chunk(render_round(round)).await?;
        }

        let failures: Vec<String> = context
            .rounds
            .iter()
            .flat_map(|r| r.failed_agents())
            .map(|t| format!("{} (round {}, {})", t.agent, t.round, t.finish_reason))
            .collect();
        if failures.is_empty() {
            sink.chunk("\nAll agents completed every round.\n").await
        } else {
            sink.chunk(format!(
                "\nAgents with failed or cancelled turns: {}.\n",
                failures.join(", ")
            ))
            .await
        }
    }
}

fn render_round(round: &Round) -> String {
    let mut out = format!("\nRound {}:\n", round.number);
    for turn in &round.turns {
        let response = match (turn.finish_reason, turn.response.is_empty()) {
            (_, false) => turn.response.as_str(),
            (FinishReason::Completed, true) => "(empty response)",
            (_, true) => "(no response)",
        };
        out.push_str(&format!(
            "- {} [{}]: {}\n",
            turn.agent, turn.finish_reason, response
        ));
    }
    out
}
