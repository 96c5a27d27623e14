//! Post-login command script.
//!
//! Each callback shell is typed into the remote shell after its delay. While
//! a command with an `error-pattern` runs, remote output is matched line by
//! line; a match stops the script before the next command is sent.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use regex::Regex;
use sshw_core::NodeCallbackShell;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Extra time given to a command whose output is being watched.
const PATTERN_GRACE: Duration = Duration::from_secs(1);

/// Longest unterminated line kept for matching.
const MAX_PENDING_LINE: usize = 4096;

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("invalid error-pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("`{cmd}` output matched {pattern:?}")]
    Matched { cmd: String, pattern: String },
}

struct Watch {
    cmd: String,
    pattern: Regex,
}

#[derive(Default)]
struct MatchState {
    watch: Option<Watch>,
    matched: Option<CallbackError>,
    line: String,
}

/// Remote output seen by the shell loop, matched against the pattern of the
/// command currently running.
#[derive(Clone, Default)]
pub struct OutputMatcher {
    state: Arc<Mutex<MatchState>>,
}

impl OutputMatcher {
    fn lock(&self) -> std::sync::MutexGuard<'_, MatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Feeds a chunk of remote output.
    pub fn feed(&self, data: &[u8]) {
        let mut guard = self.lock();
        let state = &mut *guard;
        let Some(watch) = &state.watch else {
            return;
        };
        if state.matched.is_some() {
            return;
        }
        state.line.push_str(&String::from_utf8_lossy(data));

        let complete = state.line.rfind('\n').map_or(0, |i| i + 1);
        let hit = state.line[..complete]
            .lines()
            .chain(std::iter::once(&state.line[complete..]))
            .any(|line| watch.pattern.is_match(line));
        if hit {
            state.matched = Some(CallbackError::Matched {
                cmd: watch.cmd.clone(),
                pattern: watch.pattern.as_str().to_string(),
            });
        }
        state.line.drain(..complete);
        if state.line.len() > MAX_PENDING_LINE {
            state.line.clear();
        }
    }

    fn watch(&self, watch: Option<Watch>) {
        let mut state = self.lock();
        state.watch = watch;
        state.line.clear();
    }

    fn take_match(&self) -> Option<CallbackError> {
        self.lock().matched.take()
    }
}

/// Sends each callback command through `commands`, stopping at the first
/// output match. Patterns are compiled before anything is sent.
pub async fn run_script(
    shells: Vec<NodeCallbackShell>,
    matcher: OutputMatcher,
    commands: mpsc::Sender<Vec<u8>>,
) -> Result<(), CallbackError> {
    let mut steps = Vec::with_capacity(shells.len());
    for shell in shells {
        let pattern = match shell.error_pattern.as_str() {
            "" => None,
            raw => Some(Regex::new(raw).map_err(|source| CallbackError::InvalidPattern {
                pattern: raw.to_string(),
                source,
            })?),
        };
        steps.push((shell, pattern));
    }

    for (shell, pattern) in steps {
        if let Some(err) = matcher.take_match() {
            return Err(err);
        }
        tokio::time::sleep(Duration::from_millis(shell.delay)).await;

        let watched = pattern.is_some();
        matcher.watch(pattern.map(|pattern| Watch {
            cmd: shell.cmd.clone(),
            pattern,
        }));
        debug!(cmd = %shell.cmd, "Sending callback shell");
        let mut line = shell.cmd.into_bytes();
        line.push(b'\r');
        if commands.send(line).await.is_err() {
            return Ok(());
        }

        tokio::time::sleep(Duration::from_millis(shell.wait)).await;
        if watched {
            tokio::time::sleep(PATTERN_GRACE).await;
        }
    }

    if let Some(err) = matcher.take_match() {
        return Err(err);
    }
    info!("Callback shells finished");
    Ok(())
}
