//! Lazy start, abandonment and cooperative cancellation tests.

use std::sync::atomic::Ordering;
use std::time::Duration;

use futures::StreamExt;
use tokio_test::assert_ready;
use tokio_util::sync::CancellationToken;

use roundtable::agent::{AgentRegistry, EchoAgent};
use roundtable::{Error, Event, EventKind, EventStream, FinishReason};

use crate::fixtures::{names, orchestrator, start, Blocking, Counting};

async fn pull_until(stream: &mut EventStream, name: &str) -> Vec<Event> {
    let mut seen = Vec::new();
    while let Some(event) = stream.next_event().await {
        let done = event.name() == name;
        seen.push(event);
        if done {
            return seen;
        }
    }
    panic!("stream ended before {name}");
}

async fn wait_for_cancel(blocking: &Blocking) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while blocking.saw_cancel.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("executor never saw its cancellation token fire");
}

/// No agent runs before the consumer pulls, and the first pull only
/// produces the first event.
#[tokio::test]
async fn test_nothing_runs_before_first_pull() {
    let counting = Counting::default();
    let registry = AgentRegistry::new().with_fallback(counting.clone());
    let stream = start(orchestrator(&["data-steward", "prospect-finder"], 2).with_registry(registry));
    let token = stream.cancel_token();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(counting.calls(), 0);

    let mut task = tokio_test::task::spawn(stream);
    let first = assert_ready!(task.poll_next()).unwrap();
    assert_eq!(first.name(), "conversation_start");
    assert_eq!(counting.calls(), 0);

    // Abandoning the stream cancels the session.
    drop(task);
    assert!(token.is_cancelled());
    assert_eq!(counting.calls(), 0);
}

#[tokio::test]
async fn test_agents_run_only_as_events_are_pulled() {
    let counting = Counting::default();
    let registry = AgentRegistry::new().with_fallback(counting.clone());
    let mut stream = start(orchestrator(&["data-steward", "prospect-finder"], 2).with_registry(registry));

    pull_until(&mut stream, "agent_complete").await;
    assert_eq!(counting.calls(), 1);

    let rest: Vec<Event> = stream.collect().await;
    assert_eq!(rest.last().unwrap().name(), "conversation_complete");
    assert_eq!(counting.calls(), 4);
}

/// Dropping the stream mid-turn drops the in-flight executor and fires its token.
#[tokio::test]
async fn test_abandoned_stream_cancels_in_flight_agent() {
    let blocking = Blocking::default();
    let registry = AgentRegistry::new().with_agent("data-steward", blocking.clone());
    let mut stream = start(orchestrator(&["data-steward"], 1).with_registry(registry));
    let token = stream.cancel_token();

    pull_until(&mut stream, "agent_tool_call").await;
    assert!(!token.is_cancelled());

    drop(stream);
    assert!(token.is_cancelled());
    wait_for_cancel(&blocking).await;
}

/// A caller-imposed deadline is just an abandoned stream.
#[tokio::test]
async fn test_caller_deadline_cancels_conversation() {
    let blocking = Blocking::default();
    let registry = AgentRegistry::new().with_agent("data-steward", blocking.clone());
    let stream = start(orchestrator(&["data-steward"], 1).with_registry(registry));

    let result = tokio::time::timeout(Duration::from_millis(50), stream.collect::<Vec<_>>()).await;
    assert!(result.is_err());
    wait_for_cancel(&blocking).await;
}

/// Cooperative cancellation closes the current round, then ends with an error.
#[tokio::test]
async fn test_cooperative_cancel_seals_round_then_errors() {
    let blocking = Blocking::default();
    let registry = AgentRegistry::new()
        .with_agent("data-steward", blocking.clone())
        .with_agent("prospect-finder", EchoAgent);
    let mut stream = start(orchestrator(&["data-steward", "prospect-finder"], 2).with_registry(registry));

    pull_until(&mut stream, "agent_tool_call").await;
    stream.cancel();
    let rest: Vec<Event> = (&mut stream).collect().await;

    assert_eq!(
        names(&rest),
        vec![
            "agent_tool_result",
            "agent_complete",
            "agent_start",
            "agent_complete",
            "round_complete",
            "error",
        ]
    );

    match &rest[0].kind {
        EventKind::AgentToolResult { result, .. } => {
            assert!(matches!(result, roundtable::ToolCallState::Failed { error } if error == "cancelled"))
        }
        other => panic!("unexpected event {:?}", other),
    }
    match &rest[4].kind {
        EventKind::RoundComplete { round, agent_results } => {
            assert_eq!(*round, 1);
            assert_eq!(agent_results.len(), 2);
            assert!(agent_results
                .iter()
                .all(|t| t.finish_reason == FinishReason::Cancelled));
        }
        other => panic!("unexpected event {:?}", other),
    }
    match &rest[5].kind {
        EventKind::Error { message } => assert_eq!(*message, Error::Cancelled.to_string()),
        other => panic!("unexpected event {:?}", other),
    }
    assert!(stream.next_event().await.is_none());
    wait_for_cancel(&blocking).await;
}

/// Cancelling an outer token cancels the conversation it was attached to.
#[tokio::test]
async fn test_parent_token_cancels_conversation() {
    let parent = CancellationToken::new();
    let blocking = Blocking::default();
    let registry = AgentRegistry::new().with_agent("data-steward", blocking.clone());
    let mut stream = start(
        orchestrator(&["data-steward"], 3)
            .with_registry(registry)
            .with_cancellation(&parent),
    );

    pull_until(&mut stream, "agent_tool_call").await;
    parent.cancel();
    let rest: Vec<Event> = (&mut stream).collect().await;

    assert_eq!(rest.last().unwrap().name(), "error");
    assert!(rest.iter().any(|e| matches!(
        e.kind,
        EventKind::AgentComplete { finish_reason: FinishReason::Cancelled, .. }
    )));
    assert!(!rest.iter().any(|e| matches!(e.kind, EventKind::RoundStart { .. })));
}

/// Cancelling the conversation does not touch the outer token.
#[tokio::test]
async fn test_conversation_cancel_leaves_parent_alone() {
    let parent = CancellationToken::new();
    let stream = start(orchestrator(&["data-steward"], 1).with_cancellation(&parent));
    stream.cancel();
    drop(stream);
    assert!(!parent.is_cancelled());
}
