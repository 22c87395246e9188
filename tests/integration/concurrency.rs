//! Concurrent rounds must look exactly like sequential ones from outside.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;

use roundtable::agent::{AgentExecutor, AgentOutcome, AgentRegistry, AgentRequest, ToolCallRequest, TurnSink};
use roundtable::config::Config;
use roundtable::orchestration::ConcurrentScheduler;
use roundtable::{ConversationFold, EventKind, FinishReason, Result, Scheduling};

use crate::fixtures::{names, orchestrator, run, without_timing, FailInRound, ToolCaller};

/// Responds after a delay; later agents finish first.
struct Delayed(u64);

#[async_trait]
impl AgentExecutor for Delayed {
    async fn run(&self, request: &AgentRequest, sink: &mut TurnSink) -> Result<AgentOutcome> {
        tokio::time::sleep(Duration::from_millis(self.0)).await;
        sink.response_chunk(format!("{} after {}ms", request.agent, self.0)).await?;
        Ok(AgentOutcome::default())
    }
}

/// Waits, then makes one tool call.
struct LateToolCall(u64);

#[async_trait]
impl AgentExecutor for LateToolCall {
    async fn run(&self, request: &AgentRequest, sink: &mut TurnSink) -> Result<AgentOutcome> {
        tokio::time::sleep(Duration::from_millis(self.0)).await;
        let id = sink
            .request_tool(ToolCallRequest::new("crm_query", json!({ "agent": request.agent })))
            .await?;
        sink.tool_succeeded(&id, json!({ "rows": 1 })).await?;
        Ok(AgentOutcome::new(format!("{} done", request.agent)))
    }
}

const AGENTS: [&str; 3] = ["data-steward", "prospect-finder", "account-manager"];

fn registry() -> AgentRegistry {
    AgentRegistry::new()
        .with_agent(
            "data-steward",
            ToolCaller {
                tools: vec![("crm_query", true), ("dedupe", true)],
            },
        )
        .with_agent("prospect-finder", FailInRound { round: 1 })
        .with_agent(
            "account-manager",
            ToolCaller {
                tools: vec![("enrich", false)],
            },
        )
}

fn concurrent_config() -> Config {
    Config {
        scheduling: Scheduling::Concurrent,
        max_concurrent_agents: 3,
        agent_buffer: 2,
        ..Config::default()
    }
}

#[tokio::test]
async fn test_concurrent_sequence_matches_sequential() {
    let sequential = run(orchestrator(&AGENTS, 2).with_registry(registry())).await;
    let concurrent = run(
        orchestrator(&AGENTS, 2)
            .with_registry(registry())
            .with_options(concurrent_config().orchestrator_options()),
    )
    .await;

    assert_eq!(names(&sequential), names(&concurrent));

    let agent_order = |events: &[roundtable::Event]| -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::AgentStart { agent, .. } => Some(agent.clone()),
                _ => None,
            })
            .collect()
    };
    assert_eq!(agent_order(&sequential), agent_order(&concurrent));

    let fold = ConversationFold::from_events(&concurrent);
    assert_eq!(fold.rounds.len(), 2);
    assert_eq!(fold.rounds[0].turns[1].finish_reason, FinishReason::Error);
    assert_eq!(fold.rounds[1].turns[1].finish_reason, FinishReason::Completed);
}

#[tokio::test]
async fn test_concurrent_round_waits_for_every_agent() {
    let registry = AgentRegistry::new()
        .with_agent("data-steward", Delayed(120))
        .with_agent("prospect-finder", Delayed(60))
        .with_agent("account-manager", Delayed(1));

    let started = Instant::now();
    let events = run(
        orchestrator(&AGENTS, 1)
            .with_registry(registry)
            .with_scheduler(ConcurrentScheduler::new(3)),
    )
    .await;
    // Sequential would need at least 181ms.
    assert!(started.elapsed() < Duration::from_millis(180));

    let fold = ConversationFold::from_events(&events);
    let responses: Vec<&str> = fold.rounds[0]
        .turns
        .iter()
        .map(|t| t.response.as_str())
        .collect();
    assert_eq!(
        responses,
        vec![
            "data-steward after 120ms",
            "prospect-finder after 60ms",
            "account-manager after 1ms",
        ]
    );

    let round_complete_at = events
        .iter()
        .position(|e| e.name() == "round_complete")
        .unwrap();
    let last_agent_complete_at = events
        .iter()
        .rposition(|e| e.name() == "agent_complete")
        .unwrap();
    assert!(last_agent_complete_at < round_complete_at);
}

#[tokio::test]
async fn test_bounded_concurrency_still_completes() {
    let events = run(
        orchestrator(&AGENTS, 2)
            .with_registry(registry())
            .with_scheduler(ConcurrentScheduler::new(1).with_agent_buffer(1)),
    )
    .await;
    assert_eq!(events.last().unwrap().name(), "conversation_complete");
    assert_eq!(
        events.iter().filter(|e| e.name() == "agent_complete").count(),
        6
    );
}

/// Generated tool call ids do not depend on which agent reaches its call first.
#[tokio::test]
async fn test_concurrent_tool_call_ids_match_sequential() {
    let registry = || {
        AgentRegistry::new()
            .with_agent("data-steward", LateToolCall(40))
            .with_agent("prospect-finder", LateToolCall(0))
    };
    let ids = ["data-steward", "prospect-finder"];
    let sequential = run(orchestrator(&ids, 2).with_registry(registry())).await;
    let concurrent = run(
        orchestrator(&ids, 2)
            .with_registry(registry())
            .with_scheduler(ConcurrentScheduler::new(2)),
    )
    .await;

    assert_eq!(without_timing(&sequential), without_timing(&concurrent));

    let calls: Vec<(String, String)> = concurrent
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::AgentToolCall { agent, tool_call, .. } => {
                Some((agent.clone(), tool_call.id.to_string()))
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        calls,
        vec![
            ("data-steward".to_string(), "call_1_data-steward_1".to_string()),
            ("prospect-finder".to_string(), "call_1_prospect-finder_1".to_string()),
            ("data-steward".to_string(), "call_2_data-steward_1".to_string()),
            ("prospect-finder".to_string(), "call_2_prospect-finder_1".to_string()),
        ]
    );
}
