//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` provides a cheap-to-clone interface for sending
//! commands to the registry actor.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `RegistryError::ChannelClosed`

use tokio::sync::{mpsc, oneshot};

use super::commands::{EvictFn, RegistryCommand, RegistryError};

// ============================================================================
// Registry Handle
// ============================================================================

/// Handle for interacting with the registry actor.
///
/// This is a cheap-to-clone handle that can be shared across tasks. The
/// actor stops once every handle has been dropped.
pub struct RegistryHandle<V> {
    sender: mpsc::Sender<RegistryCommand<V>>,
}

impl<V> Clone for RegistryHandle<V> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<V: Send + 'static> RegistryHandle<V> {
    pub fn new(sender: mpsc::Sender<RegistryCommand<V>>) -> Self {
        Self { sender }
    }

    /// Looks up `key`, refreshing its expiration on a hit.
    ///
    /// Returns `None` on a miss or if the actor has shut down.
    pub async fn get(&self, key: &str) -> Option<V> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Get {
                key: key.to_string(),
                respond_to: tx,
            })
            .await
            .ok()?;

        rx.await.ok()?
    }

    /// Inserts or replaces the value for `key`.
    ///
    /// `on_evict` runs exactly once when this value leaves the registry,
    /// whether by idle reaping, explicit eviction or replacement.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn put<F>(&self, key: &str, value: V, on_evict: F) -> Result<(), RegistryError>
    where
        F: FnOnce(V) + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let on_evict: EvictFn<V> = Box::new(on_evict);

        self.sender
            .send(RegistryCommand::Put {
                key: key.to_string(),
                value,
                on_evict,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    /// Marks the entry as in use; the reaper will not evict it.
    ///
    /// # Errors
    ///
    /// - `RegistryError::NotFound` if `key` is not cached
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn incr_ref(&self, key: &str) -> Result<i64, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::IncrRef {
                key: key.to_string(),
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Releases a reference taken with [`RegistryHandle::incr_ref`].
    ///
    /// # Errors
    ///
    /// - `RegistryError::NotFound` if `key` is not cached
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn done(&self, key: &str) -> Result<i64, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Done {
                key: key.to_string(),
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Removes `key` immediately, running its eviction callback.
    ///
    /// Returns `false` if nothing was cached or the actor has shut down.
    pub async fn evict(&self, key: &str) -> bool {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Evict {
                key: key.to_string(),
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return false;
        }

        rx.await.unwrap_or(false)
    }

    /// Number of cached entries (0 if the actor has shut down).
    pub async fn len(&self) -> usize {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Len { respond_to: tx })
            .await
            .is_err()
        {
            return 0;
        }

        rx.await.unwrap_or(0)
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
