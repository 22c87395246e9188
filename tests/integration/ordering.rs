//! Event ordering and tool call bookkeeping tests.

use std::collections::HashSet;

use roundtable::agent::AgentRegistry;
use roundtable::{Event, EventKind, FinishReason, ToolCallState};

use crate::fixtures::{
    count, names, orchestrator, run, without_timing, Dangling, FailInRound, FixedToolId, Greedy,
    ToolCaller,
};

fn tool_registry() -> AgentRegistry {
    AgentRegistry::builtin()
        .with_agent(
            "data-steward",
            ToolCaller {
                tools: vec![("crm_query", true), ("dedupe", false)],
            },
        )
        .with_agent(
            "prospect-finder",
            ToolCaller {
                tools: vec![("enrich", true)],
            },
        )
}

/// Round numbers are exactly 1..=rounds, each round closed before the next opens.
#[tokio::test]
async fn test_rounds_are_contiguous_and_barriered() {
    let events = run(orchestrator(&["data-steward", "prospect-finder", "account-manager"], 4)).await;

    let mut open: Option<u32> = None;
    let mut completed = Vec::new();
    for event in &events {
        match &event.kind {
            EventKind::RoundStart { round, .. } => {
                assert!(open.is_none(), "round {round} started inside another round");
                assert_eq!(*round, completed.len() as u32 + 1);
                open = Some(*round);
            }
            EventKind::RoundComplete { round, agent_results } => {
                assert_eq!(open.take(), Some(*round));
                assert_eq!(agent_results.len(), 3);
                completed.push(*round);
            }
            kind => {
                if let Some(round) = kind.round() {
                    assert_eq!(open, Some(round), "{} outside its round", kind.name());
                }
            }
        }
    }
    assert_eq!(completed, vec![1, 2, 3, 4]);
}

/// Within a round, each agent's events form one contiguous group in configured order.
#[tokio::test]
async fn test_agent_groups_are_contiguous_in_order() {
    let ids = ["data-steward", "prospect-finder"];
    let events = run(orchestrator(&ids, 2).with_registry(tool_registry())).await;

    let mut groups: Vec<(u32, String)> = Vec::new();
    let mut current: Option<String> = None;
    for event in &events {
        let Some(agent) = event.kind.agent() else {
            continue;
        };
        match &event.kind {
            EventKind::AgentStart { round, .. } => {
                assert!(current.is_none());
                current = Some(agent.to_string());
                groups.push((*round, agent.to_string()));
            }
            EventKind::AgentComplete { .. } => {
                assert_eq!(current.take().as_deref(), Some(agent));
            }
            _ => assert_eq!(current.as_deref(), Some(agent)),
        }
    }

    let expected: Vec<(u32, String)> = (1..=2)
        .flat_map(|r| ids.iter().map(move |a| (r, a.to_string())))
        .collect();
    assert_eq!(groups, expected);
}

/// Tool events are emitted as they happen: call, result, call, result, then text.
#[tokio::test]
async fn test_tool_events_interleave_in_real_time() {
    let events = run(orchestrator(&["data-steward"], 1).with_registry(tool_registry())).await;
    let turn: Vec<_> = names(&events)
        .into_iter()
        .skip_while(|n| *n != "agent_start")
        .take_while(|n| *n != "round_complete")
        .collect();
    assert_eq!(
        turn,
        vec![
            "agent_start",
            "agent_tool_call",
            "agent_tool_result",
            "agent_tool_call",
            "agent_tool_result",
            "agent_response_chunk",
            "agent_response_chunk",
            "agent_complete",
        ]
    );

    let complete = events
        .iter()
        .find_map(|e| match &e.kind {
            EventKind::AgentComplete {
                response,
                tool_calls,
                steps,
                finish_reason,
                ..
            } => Some((response.clone(), tool_calls.clone(), *steps, *finish_reason)),
            _ => None,
        })
        .unwrap();
    assert_eq!(complete.0, "data-steward: 12 duplicates");
    assert_eq!(complete.1.len(), 2);
    assert!(matches!(complete.1[0].state, ToolCallState::Succeeded { .. }));
    assert_eq!(
        complete.1[1].state,
        ToolCallState::Failed {
            error: "query timed out".to_string()
        }
    );
    assert_eq!(complete.2, 2);
    assert_eq!(complete.3, FinishReason::Completed);
}

/// Tool call ids are unique per session and every result refers to an earlier call.
#[tokio::test]
async fn test_tool_call_ids_are_unique_and_matched() {
    let events = run(orchestrator(&["data-steward", "prospect-finder"], 3).with_registry(tool_registry())).await;

    let mut issued = HashSet::new();
    let mut resolved = HashSet::new();
    for event in &events {
        match &event.kind {
            EventKind::AgentToolCall { tool_call, step, .. } => {
                assert!(*step >= 1);
                assert!(issued.insert(tool_call.id.clone()), "duplicate id {}", tool_call.id);
            }
            EventKind::AgentToolResult { tool_call_id, .. } => {
                assert!(issued.contains(tool_call_id), "result for unknown id {}", tool_call_id);
                assert!(resolved.insert(tool_call_id.clone()), "resolved twice {}", tool_call_id);
            }
            _ => {}
        }
    }
    // 3 rounds x (2 + 1) calls.
    assert_eq!(issued.len(), 9);
    assert_eq!(issued, resolved);
}

/// A caller-supplied id reused by a second agent is that agent's error only.
#[tokio::test]
async fn test_reused_tool_call_id_fails_only_that_turn() {
    let registry = AgentRegistry::new()
        .with_agent("data-steward", FixedToolId("toolu_01"))
        .with_agent("prospect-finder", FixedToolId("toolu_01"));
    let events = run(orchestrator(&["data-steward", "prospect-finder"], 1).with_registry(registry)).await;

    assert!(events.iter().any(|e| matches!(
        &e.kind,
        EventKind::AgentError { agent, message, .. }
            if agent == "prospect-finder" && message == "Duplicate tool call id: toolu_01"
    )));
    assert_eq!(count(&events, "agent_tool_call"), 1);
    assert_eq!(events.last().unwrap().name(), "conversation_complete");
}

/// Calls left open by the executor are failed before agent_complete.
#[tokio::test]
async fn test_dangling_tool_call_is_resolved_before_complete() {
    let registry = AgentRegistry::new().with_agent("data-steward", Dangling);
    let events = run(orchestrator(&["data-steward"], 1).with_registry(registry)).await;

    let result_at = events
        .iter()
        .position(|e| e.name() == "agent_tool_result")
        .unwrap();
    let complete_at = events
        .iter()
        .position(|e| e.name() == "agent_complete")
        .unwrap();
    assert!(result_at < complete_at);

    match &events[result_at].kind {
        EventKind::AgentToolResult { result, .. } => assert_eq!(
            *result,
            ToolCallState::Failed {
                error: "tool call did not resolve before the turn ended".to_string()
            }
        ),
        other => panic!("unexpected event {:?}", other),
    }
}

/// Exceeding the step budget is an agent-local error; the budget is announced in agent_start.
#[tokio::test]
async fn test_step_budget_is_enforced() {
    let registry = AgentRegistry::new().with_agent("data-steward", Greedy);
    let events = run(
        orchestrator(&["data-steward"], 1)
            .with_registry(registry)
            .with_max_steps(3),
    )
    .await;

    assert!(events.iter().any(|e| matches!(
        e.kind,
        EventKind::AgentStart { max_steps: 3, .. }
    )));
    assert_eq!(count(&events, "agent_tool_call"), 3);
    assert!(events.iter().any(|e| matches!(
        &e.kind,
        EventKind::AgentComplete { finish_reason: FinishReason::Error, steps: 3, .. }
    )));
    assert_eq!(events.last().unwrap().name(), "conversation_complete");
}

/// The final summary is the concatenation of the summarizer chunks.
#[tokio::test]
async fn test_summary_equals_chunk_concatenation() {
    let events = run(orchestrator(&["data-steward", "prospect-finder"], 2)).await;
    let chunks: String = events
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::SummarizerChunk { chunk } => Some(chunk.as_str()),
            _ => None,
        })
        .collect();
    match &events.last().unwrap().kind {
        EventKind::ConversationComplete { summary, .. } => assert_eq!(*summary, chunks),
        other => panic!("unexpected terminal event {:?}", other),
    }
}

/// Identical inputs and responses give identical sequences apart from timing.
#[tokio::test]
async fn test_runs_are_reproducible() {
    let registry = || {
        tool_registry().with_agent("account-manager", FailInRound { round: 2 })
    };
    let ids = ["data-steward", "prospect-finder", "account-manager"];
    let first = run(orchestrator(&ids, 3).with_registry(registry())).await;
    let second = run(orchestrator(&ids, 3).with_registry(registry())).await;
    assert_eq!(without_timing(&first), without_timing(&second));
}

/// Every event survives a JSON round trip on the wire.
#[tokio::test]
async fn test_events_serialize_as_json_lines() {
    let events = run(orchestrator(&["data-steward"], 1).with_registry(tool_registry())).await;
    for event in &events {
        let line = serde_json::to_string(event).unwrap();
        assert!(!line.contains('\n'));
        let parsed: Event = serde_json::from_str(&line).unwrap();
        assert_eq!(&parsed, event);
    }
}
