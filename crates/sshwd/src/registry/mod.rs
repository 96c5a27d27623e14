//! Connection registry using the Actor pattern.
//!
//! The registry caches established connections by identity
//! (`user@host:port`) so that later sessions for the same host skip the
//! dial. It receives commands via a tokio mpsc channel; a reaper task
//! periodically asks it to drop idle entries.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐  RegistryCommand  ┌─────────────────┐
//! │ MasterHandler   │──────────────────▶│  RegistryActor  │
//! │ (per session)   │   (mpsc channel)  │                 │
//! └─────────────────┘                   │ HashMap<String, │
//!                                       │   TimerEntry>   │
//! ┌─────────────────┐       Reap        │                 │
//! │  Reaper task    │──────────────────▶│  on_evict(v)    │
//! │ (interval tick) │                   └─────────────────┘
//! └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

mod actor;
mod commands;
mod handle;

pub use actor::{RegistryActor, TimerEntry};
pub use commands::{EvictFn, RegistryCommand, RegistryError};
pub use handle::RegistryHandle;

/// Channel buffer size
const COMMAND_BUFFER: usize = 100;

/// Default idle time before an unreferenced connection is closed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Default reaper tick.
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(1);

/// Timing parameters of the registry.
///
/// The reap interval must be much smaller than the idle timeout, otherwise
/// idle connections outlive their timeout by up to one interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    pub idle_timeout: Duration,
    pub reap_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            reap_interval: DEFAULT_REAP_INTERVAL,
        }
    }
}

/// Spawn the registry actor and return a handle for interaction.
///
/// This function:
/// 1. Creates the command channel
/// 2. Spawns the RegistryActor on a tokio task
/// 3. Spawns the reaper task
/// 4. Returns a RegistryHandle for client use
///
/// The reaper holds only a weak sender, so dropping every handle stops both
/// tasks and evicts whatever is still cached.
pub fn spawn_registry<V: Clone + Send + 'static>(config: RegistryConfig) -> RegistryHandle<V> {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);

    let actor = RegistryActor::new(cmd_rx, config.idle_timeout);
    tokio::spawn(actor.run());

    spawn_reaper_task(cmd_tx.downgrade(), config.reap_interval);

    RegistryHandle::new(cmd_tx)
}

/// Spawn a background task that triggers periodic idle eviction.
fn spawn_reaper_task<V: Send + 'static>(
    sender: mpsc::WeakSender<RegistryCommand<V>>,
    period: Duration,
) {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let Some(sender) = sender.upgrade() else {
                debug!("Reaper stopping: registry handles dropped");
                break;
            };

            // Fire-and-forget reap command
            if sender.send(RegistryCommand::Reap).await.is_err() {
                debug!("Reaper stopping: registry channel closed");
                break;
            }
        }
    });
}
