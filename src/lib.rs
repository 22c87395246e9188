pub mod agent;
pub mod config;
pub mod error;
pub mod events;
pub mod log;
pub mod orchestration;
pub mod request;
pub mod session;

pub use agent::{AgentExecutor, AgentOutcome, AgentRegistry, AgentRequest, ToolCallRequest, TurnSink};
pub use config::Config;
pub use error::{Error, Result};
pub use events::{ConversationFold, Event, EventKind};
pub use orchestration::{EventStream, Orchestrator, OrchestratorOptions, Scheduling};
pub use request::{Message, MultiAgentRequest, Role};
pub use session::{AgentTurn, FinishReason, Round, SessionId, ToolCall, ToolCallId, ToolCallSlot, ToolCallState};
