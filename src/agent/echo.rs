//! Built-in deterministic agent.

use async_trait::async_trait;
use serde_json::json;

use super::{AgentExecutor, AgentOutcome, AgentRequest, ToolCallRequest, TurnSink};
use crate::Result;

/// Looks up what its peers said in earlier rounds and answers with a
/// short status line. Output depends only on the request, so two runs
/// with the same inputs produce the same events.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoAgent;

#[async_trait]
impl AgentExecutor for EchoAgent {
    async fn run(&self, request: &AgentRequest, sink: &mut TurnSink) -> Result<AgentOutcome> {
        let id = sink
            .request_tool(ToolCallRequest::new(
                "context_lookup",
                json!({ "goal": request.goal, "round": request.round }),
            ))
            .await?;

        let peer_responses = request
            .history
            .iter()
            .flat_map(|round| round.turns.iter())
            .filter(|turn| turn.agent != request.agent && !turn.response.is_empty())
            .count();
        sink.tool_succeeded(
            &id,
            json!({ "priorRounds": request.history.len(), "peerResponses": peer_responses }),
        )
        .await?;

        let response = if request.history.is_empty() {
            format!(
                "{} (round {}): starting on \"{}\".",
                request.agent, request.round, request.goal
            )
        } else {
            format!(
                "{} (round {}): building on {} peer responses toward \"{}\".",
                request.agent, request.round, peer_responses, request.goal
            )
        };
        Ok(AgentOutcome::new(response).with_steps(2))
    }
}
