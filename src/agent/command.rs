//! Agents backed by an external command-line program.
//!
//! The command is run once per turn in headless mode with the turn prompt
//! as its last argument, e.g. `claude -p <prompt> --output-format json`.
//! JSON output in the `{subtype, result, num_turns, error}` shape is
//! understood; anything else is taken as plain text.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use super::{AgentExecutor, AgentOutcome, AgentRequest, TurnSink};
use crate::{Error, Result};

/// Default timeout for one command turn (10 minutes).
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Parsed result of one command run.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResponse {
    Success { output: String, turns: Option<u32> },
    Error { message: String },
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    subtype: Option<String>,
    result: Option<String>,
    num_turns: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CommandAgent {
    binary: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandAgent {
    /// Build from a whitespace-separated command line, resolving the binary on `PATH`.
    pub fn from_command(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace().map(String::from);
        let program = parts
            .next()
            .ok_or_else(|| Error::Validation("agent command must not be empty".to_string()))?;
        let binary = which::which(&program).map_err(|_| Error::CommandNotFound(program))?;
        Ok(Self::with_binary(binary, parts.collect()))
    }

    /// Use a specific binary path without looking it up.
    pub fn with_binary(binary: PathBuf, args: Vec<String>) -> Self {
        Self {
            binary,
            args,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Full argument list for one turn.
    pub fn command_args(&self, prompt: &str) -> Vec<String> {
        let mut args = self.args.clone();
        args.push(prompt.to_string());
        args
    }

    /// Prompt text describing the turn to the external agent.
    pub fn prompt(request: &AgentRequest) -> String {
        let mut prompt = format!(
            "You are the \"{}\" agent in round {} of a multi-agent conversation.\n\
             Goal: {}\nStrategy: {}\n",
            request.agent, request.round, request.goal, request.strategy
        );
        for round in request.history.iter() {
            prompt.push_str(&format!("\nRound {} results:\n", round.number));
            for turn in &round.turns {
                prompt.push_str(&format!(
                    "- {} ({}): {}\n",
                    turn.agent, turn.finish_reason, turn.response
                ));
            }
        }
        prompt.push_str("\nRespond with your contribution for this round.");
        prompt
    }

    pub fn parse_output(stdout: &str, stderr: &str, success: bool) -> CommandResponse {
        if let Ok(raw) = serde_json::from_str::<RawResponse>(stdout.trim()) {
            return match raw.subtype.as_deref() {
                Some("success") => CommandResponse::Success {
                    output: raw.result.unwrap_or_default(),
                    turns: raw.num_turns,
                },
                Some("error") => CommandResponse::Error {
                    message: raw.error.or(raw.result).unwrap_or_default(),
                },
                _ => match (raw.error, raw.result) {
                    (Some(message), _) => CommandResponse::Error { message },
                    (None, Some(output)) => CommandResponse::Success {
                        output,
                        turns: raw.num_turns,
                    },
                    (None, None) => CommandResponse::Error {
                        message: "Unknown response format".to_string(),
                    },
                },
            };
        }

        if !success {
            let message = if stderr.trim().is_empty() {
                "agent command exited with a failure status".to_string()
            } else {
                stderr.trim().to_string()
            };
            return CommandResponse::Error { message };
        }

        CommandResponse::Success {
            output: stdout.trim().to_string(),
            turns: None,
        }
    }
}

#[async_trait]
impl AgentExecutor for CommandAgent {
    async fn run(&self, request: &AgentRequest, _sink: &mut TurnSink) -> Result<AgentOutcome> {
        let prompt = Self::prompt(request);
        tracing::debug!(agent = %request.agent, binary = %self.binary.display(), "running agent command");

        let child = Command::new(&self.binary)
            .args(self.command_args(&prompt))
            .kill_on_drop(true)
            .output();

        let output = tokio::select! {
            _ = request.cancel.cancelled() => return Err(Error::Cancelled),
            result = tokio::time::timeout(self.timeout, child) => {
                result.map_err(|_| Error::Timeout(self.timeout))??
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        match Self::parse_output(&stdout, &stderr, output.status.success()) {
            CommandResponse::Success { output, turns } => {
                Ok(AgentOutcome::new(output).with_steps(turns.unwrap_or(1)))
            }
            CommandResponse::Error { message } => Err(Error::agent(&request.agent, message)),
        }
    }
}
