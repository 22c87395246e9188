//! Initiator: turns the message history into a goal and a plan.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::request::Message;
use crate::Result;

/// Goal used when the history carries no usable text.
pub const NO_GOAL: &str = "no goal provided";

/// Bullet or numbered list items.
static LIST_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:[-*]|\d+[.)])\s+(.+?)\s*$").unwrap());

/// Sentence-sized fragments of prose.
static SENTENCE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^.!?\n]+[.!?]?").unwrap());

/// Words that mark a fragment as a requirement.
static REQUIREMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(must|should|needs?|ensure|required?)\b").unwrap());

/// Inputs the initiator plans from.
#[derive(Debug, Clone, Copy)]
pub struct InitiatorContext<'a> {
    pub messages: &'a [Message],
    pub agents: &'a [String],
    pub rounds: u32,
}

/// The initiator's output, announced in `initiator_complete`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub goal: String,
    pub strategy: String,
    pub success_criteria: Vec<String>,
}

/// Produces the plan before any round runs. Failure here ends the conversation.
#[async_trait]
pub trait Initiator: Send + Sync {
    async fn initiate(&self, context: InitiatorContext<'_>) -> Result<Plan>;
}

/// Rule-based initiator with no side effects.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultInitiator;

#[async_trait]
impl Initiator for DefaultInitiator {
    async fn initiate(&self, context: InitiatorContext<'_>) -> Result<Plan> {
        Ok(plan(context))
    }
}

/// Build the plan synchronously.
pub fn plan(context: InitiatorContext<'_>) -> Plan {
    let goal = goal_from(context.messages);
    let mut success_criteria = if goal == NO_GOAL {
        Vec::new()
    } else {
        requirements(&goal)
    };
    success_criteria.push(format!(
        "Every agent contributes a response in each of the {} round(s)",
        context.rounds
    ));

    Plan {
        strategy: strategy(context.agents, context.rounds),
        goal,
        success_criteria,
    }
}

fn goal_from(messages: &[Message]) -> String {
    match messages.last().map(|m| m.content.trim()) {
        Some(text) if !text.is_empty() => text.to_string(),
        _ => NO_GOAL.to_string(),
    }
}

fn strategy(agents: &[String], rounds: u32) -> String {
    format!(
        "{} agent(s) ({}) take turns in that order over {} round(s); \
         each round builds on the results of the rounds before it, \
         then the outcome is summarized.",
        agents.len(),
        agents.join(", "),
        rounds
    )
}

fn requirements(goal: &str) -> Vec<String> {
    let items: Vec<String> = LIST_ITEM_RE
        .captures_iter(goal)
        .map(|c| c[1].to_string())
        .collect();
    if !items.is_empty() {
        return items;
    }

    SENTENCE_RE
        .find_iter(goal)
        .map(|m| m.as_str().trim())
        .filter(|s| REQUIREMENT_RE.is_match(s))
        .map(String::from)
        .collect()
}
