use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Initiator failed: {0}")]
    Initiator(String),

    #[error("Summarizer failed: {0}")]
    Summarizer(String),

    #[error("Agent {agent} failed: {message}")]
    AgentFailed { agent: String, message: String },

    #[error("Agent command not found: {0}")]
    CommandNotFound(String),

    #[error("Duplicate tool call id: {0}")]
    DuplicateToolCall(String),

    #[error("Unknown tool call id: {0}")]
    UnknownToolCall(String),

    #[error("Tool call already resolved: {0}")]
    ToolCallResolved(String),

    #[error("Step limit exceeded (max: {max})")]
    StepLimitExceeded { max: u32 },

    #[error("Scheduler fault: {0}")]
    Scheduler(String),

    #[error("Conversation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand used by executors to report an agent-local failure.
    pub fn agent(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Error::AgentFailed {
            agent: agent.into(),
            message: message.into(),
        }
    }
}
