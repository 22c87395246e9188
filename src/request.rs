//! Inbound request shape and its bounds.
//!
//! Requests that fail these checks are rejected before a conversation
//! stream is created, so they never surface as an `error` event.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Maximum number of agents that may take part in one conversation.
pub const MAX_AGENTS: usize = 5;
/// Maximum number of rounds in one conversation.
pub const MAX_ROUNDS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

/// One entry of the caller's message history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// A multi-agent conversation request as received from the transport layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiAgentRequest {
    pub agents: Vec<String>,
    pub rounds: u32,
    pub messages: Vec<Message>,
}

impl MultiAgentRequest {
    /// Check every bound of the request.
    pub fn validate(&self) -> Result<()> {
        validate_agents(&self.agents)?;
        validate_rounds(self.rounds)?;
        validate_messages(&self.messages)
    }
}

/// Agents must be 1..=5 unique, non-blank identities.
pub fn validate_agents(agents: &[String]) -> Result<()> {
    if agents.is_empty() {
        return Err(Error::Validation("at least one agent is required".to_string()));
    }
    if agents.len() > MAX_AGENTS {
        return Err(Error::Validation(format!(
            "at most {} agents are allowed, got {}",
            MAX_AGENTS,
            agents.len()
        )));
    }

    let mut seen = HashSet::new();
    for agent in agents {
        if agent.trim().is_empty() {
            return Err(Error::Validation("agent identity must not be blank".to_string()));
        }
        if !seen.insert(agent.as_str()) {
            return Err(Error::Validation(format!("duplicate agent: {}", agent)));
        }
    }
    Ok(())
}

pub fn validate_rounds(rounds: u32) -> Result<()> {
    if !(1..=MAX_ROUNDS).contains(&rounds) {
        return Err(Error::Validation(format!(
            "rounds must be between 1 and {}, got {}",
            MAX_ROUNDS, rounds
        )));
    }
    Ok(())
}

pub fn validate_messages(messages: &[Message]) -> Result<()> {
    if messages.is_empty() {
        return Err(Error::Validation("message history must not be empty".to_string()));
    }
    Ok(())
}
