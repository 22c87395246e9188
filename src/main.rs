use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use roundtable::config::Config;
use roundtable::{Message, MultiAgentRequest, Orchestrator, Result, Scheduling};

/// Roundtable - multi-agent conversation orchestrator
#[derive(Parser, Debug)]
#[command(name = "roundtable")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    ROUNDTABLE_DEBUG=1     Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.roundtable/roundtable.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run a conversation and print its events as JSON lines
    Run {
        /// Agent identity, in turn order (repeat for up to 5 agents)
        #[arg(short = 'a', long = "agent", required_unless_present = "request")]
        agents: Vec<String>,

        /// Number of rounds (1-10)
        #[arg(short = 'r', long, default_value_t = 1)]
        rounds: u32,

        /// Run the agents of a round concurrently
        #[arg(long)]
        concurrent: bool,

        /// Read a JSON request ({agents, rounds, messages}) instead of flags
        #[arg(long, conflicts_with_all = ["agents", "message"])]
        request: Option<PathBuf>,

        /// Owner recorded on the session
        #[arg(long, default_value = "cli")]
        owner: String,

        /// The user message
        #[arg(required_unless_present = "request")]
        message: Vec<String>,
    },

    /// Show the effective configuration
    Config {
        /// Write the default configuration file if none exists
        #[arg(long)]
        init: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    roundtable::log::init_with_debug(cli.debug);

    match cli.command {
        Command::Run {
            agents,
            rounds,
            concurrent,
            request,
            owner,
            message,
        } => {
            let request = match request {
                Some(path) => read_request(&path)?,
                None => request_from_args(agents, rounds, &message),
            };
            run_conversation(owner, request, concurrent)
        }
        Command::Config { init } => run_config(init),
    }
}

fn read_request(path: &Path) -> Result<MultiAgentRequest> {
    tracing::debug!(path = %path.display(), "reading request file");
    Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
}

fn request_from_args(agents: Vec<String>, rounds: u32, message: &[String]) -> MultiAgentRequest {
    MultiAgentRequest {
        agents,
        rounds,
        messages: vec![Message::user(message.join(" "))],
    }
}

fn run_conversation(owner: String, request: MultiAgentRequest, concurrent: bool) -> Result<()> {
    tracing::info!(
        owner = %owner,
        agents = ?request.agents,
        rounds = request.rounds,
        concurrent,
        "run command"
    );

    let config = Config::load()?;
    let mut options = config.orchestrator_options();
    if concurrent {
        options.scheduling = Scheduling::Concurrent;
    }

    let orchestrator = Orchestrator::from_request(owner, &request)?
        .with_registry(config.registry()?)
        .with_options(options);
    let stream = orchestrator.execute_conversation(request.messages)?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(write_events(stream, &mut io::stdout().lock(), tokio::signal::ctrl_c()))
}

/// Pull events until the stream ends, writing one JSON line per event.
/// The first `interrupt` cancels the conversation, which still ends the
/// stream with a terminal event.
async fn write_events<W, I>(mut stream: roundtable::EventStream, out: &mut W, interrupt: I) -> Result<()>
where
    W: Write,
    I: Future<Output = io::Result<()>>,
{
    let cancel = stream.cancel_token();
    tokio::pin!(interrupt);
    let mut interrupted = false;

    loop {
        let event = tokio::select! {
            biased;
            _ = &mut interrupt, if !interrupted => {
                tracing::warn!("interrupted, cancelling conversation");
                interrupted = true;
                cancel.cancel();
                continue;
            }
            event = stream.next_event() => event,
        };
        let Some(event) = event else {
            break;
        };
        serde_json::to_writer(&mut *out, &event)?;
        writeln!(out)?;
        out.flush()?;
    }
    Ok(())
}

fn run_config(init: bool) -> Result<()> {
    let path = Config::config_path()?;
    if init {
        if path.exists() {
            println!("Config already exists at {}", path.display());
        } else {
            Config::default().save_to(&path)?;
            println!("Wrote default config to {}", path.display());
        }
        return Ok(());
    }

    let config = Config::load_from(&path)?;
    println!("# {}", path.display());
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
