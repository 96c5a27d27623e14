//! Registry actor commands and errors.
//!
//! This module defines the message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur during registry operations
//!
//! The registry is generic over the cached value `V`. The daemon stores
//! shared client wrappers; tests store plain markers.

use std::fmt;

use thiserror::Error;
use tokio::sync::oneshot;

/// Callback run exactly once when an entry leaves the registry.
///
/// Receives the evicted value. Runs on the actor task after the entry has
/// been removed, so it must not block; spawn for anything slow.
pub type EvictFn<V> = Box<dyn FnOnce(V) + Send + 'static>;

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Each command uses a oneshot channel for the response, enabling
/// request-response patterns in async code without blocking.
pub enum RegistryCommand<V> {
    /// Look up an entry and refresh its expiration.
    Get {
        key: String,
        respond_to: oneshot::Sender<Option<V>>,
    },

    /// Insert or overwrite an entry.
    ///
    /// Overwriting evicts the previous value through its own callback and
    /// carries its reference count over to the new entry.
    Put {
        key: String,
        value: V,
        on_evict: EvictFn<V>,
        respond_to: oneshot::Sender<()>,
    },

    /// Increment the reference count.
    ///
    /// # Errors
    /// - `RegistryError::NotFound` if no entry exists for the key
    IncrRef {
        key: String,
        respond_to: oneshot::Sender<Result<i64, RegistryError>>,
    },

    /// Decrement the reference count and refresh the expiration.
    ///
    /// # Errors
    /// - `RegistryError::NotFound` if no entry exists for the key
    Done {
        key: String,
        respond_to: oneshot::Sender<Result<i64, RegistryError>>,
    },

    /// Remove an entry now, regardless of references, running its callback.
    ///
    /// Responds `true` if an entry was removed.
    Evict {
        key: String,
        respond_to: oneshot::Sender<bool>,
    },

    /// Number of live entries.
    Len { respond_to: oneshot::Sender<usize> },

    /// Scan for expired, unreferenced entries.
    ///
    /// This is a fire-and-forget command used by the reaper task.
    Reap,
}

impl<V> fmt::Debug for RegistryCommand<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get { key, .. } => f.debug_struct("Get").field("key", key).finish(),
            Self::Put { key, .. } => f.debug_struct("Put").field("key", key).finish(),
            Self::IncrRef { key, .. } => f.debug_struct("IncrRef").field("key", key).finish(),
            Self::Done { key, .. } => f.debug_struct("Done").field("key", key).finish(),
            Self::Evict { key, .. } => f.debug_struct("Evict").field("key", key).finish(),
            Self::Len { .. } => f.write_str("Len"),
            Self::Reap => f.write_str("Reap"),
        }
    }
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No entry exists for the key.
    #[error("no cached connection for {0}")]
    NotFound(String),

    /// The response channel was closed before receiving a response.
    ///
    /// This typically indicates the actor was shut down.
    #[error("response channel closed")]
    ChannelClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error_display() {
        let err = RegistryError::NotFound("u@example:22".to_string());
        assert_eq!(err.to_string(), "no cached connection for u@example:22");

        let err = RegistryError::ChannelClosed;
        assert_eq!(err.to_string(), "response channel closed");
    }

    #[test]
    fn test_command_debug_hides_values() {
        let (tx, _rx) = oneshot::channel();
        let cmd: RegistryCommand<u32> = RegistryCommand::Get {
            key: "k".to_string(),
            respond_to: tx,
        };
        assert_eq!(format!("{cmd:?}"), "Get { key: \"k\" }");
        assert_eq!(format!("{:?}", RegistryCommand::<u32>::Reap), "Reap");
    }

    #[tokio::test]
    async fn test_command_channel_closed_error() {
        let (tx, rx) = oneshot::channel::<Result<i64, RegistryError>>();
        drop(tx);
        assert!(rx.await.is_err());
    }
}
