use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::agent::{AgentRegistry, CommandAgent};
use crate::orchestration::{
    OrchestratorOptions, Scheduling, DEFAULT_AGENT_BUFFER, DEFAULT_MAX_CONCURRENT_AGENTS,
    DEFAULT_MAX_STEPS,
};
use crate::{Error, Result};

/// Per-agent settings under `[agents.<identity>]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// External command that runs this agent, e.g. `claude -p --output-format json`.
    pub command: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub max_steps: u32,
    pub scheduling: Scheduling,
    pub max_concurrent_agents: usize,
    pub agent_buffer: usize,
    pub agents: BTreeMap<String, AgentConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            scheduling: Scheduling::default(),
            max_concurrent_agents: DEFAULT_MAX_CONCURRENT_AGENTS,
            agent_buffer: DEFAULT_AGENT_BUFFER,
            agents: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn roundtable_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".roundtable"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::roundtable_dir()?.join("roundtable.toml"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "loading config");
        if !path.exists() {
            tracing::debug!("config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        tracing::info!(
            max_steps = config.max_steps,
            scheduling = %config.scheduling,
            agents = config.agents.len(),
            "config loaded"
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                tracing::debug!(dir = %dir.display(), "creating config directory");
                fs::create_dir_all(dir)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        tracing::info!(path = %path.display(), "config saved");
        Ok(())
    }

    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            max_steps: self.max_steps,
            scheduling: self.scheduling,
            max_concurrent_agents: self.max_concurrent_agents,
            agent_buffer: self.agent_buffer,
        }
    }

    /// Built-in registry plus a [`CommandAgent`] for every agent with a command.
    ///
    /// Fails if a configured command cannot be found on `PATH`.
    pub fn registry(&self) -> Result<AgentRegistry> {
        let mut registry = AgentRegistry::builtin();
        for (agent, settings) in &self.agents {
            let Some(command) = settings.command.as_deref() else {
                continue;
            };
            let mut executor = CommandAgent::from_command(command)?;
            if let Some(secs) = settings.timeout_secs {
                executor = executor.with_timeout(Duration::from_secs(secs));
            }
            tracing::debug!(agent = %agent, binary = %executor.binary().display(), "registered command agent");
            registry.register(agent.clone(), executor);
        }
        Ok(registry)
    }
}
