//! Structured logging for debugging roundtable.
//!
//! The library only emits `tracing` events; the binary decides where they
//! go. `init_with_debug` installs a file subscriber at
//! `~/.roundtable/roundtable.log`.
//!
//! Log levels:
//! - ERROR: Fatal conversation failures
//! - WARN: Agent-local failures and cancellations
//! - INFO: Conversation and round boundaries, config changes
//! - DEBUG: Agent turns and tool call lifecycle
//! - TRACE: Individual events as they are yielded
//!
//! Debug mode can be enabled with `--debug` flag or `ROUNDTABLE_DEBUG=1` env var.
//! `RUST_LOG` takes precedence over both when set.

use std::fs::File;
use std::sync::Mutex;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

const DEBUG_ENV: &str = "ROUNDTABLE_DEBUG";

/// Initialize logging with explicit debug mode setting.
pub fn init_with_debug(debug: bool) {
    let debug_enabled = debug || debug_from_env(std::env::var(DEBUG_ENV).ok().as_deref());

    let Some(dir) = dirs::home_dir().map(|h| h.join(".roundtable")) else {
        return;
    };
    if std::fs::create_dir_all(&dir).is_err() {
        return;
    }
    // Truncate file on startup
    let Ok(file) = File::create(dir.join("roundtable.log")) else {
        return;
    };

    let filter = EnvFilter::builder()
        .with_default_directive(default_level(debug_enabled).into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
        .try_init();
}

fn default_level(debug: bool) -> LevelFilter {
    if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    }
}

fn debug_from_env(value: Option<&str>) -> bool {
    value
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
