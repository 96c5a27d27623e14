//! Registry actor - owns every cached connection and its timer state.
//!
//! The RegistryActor is the single owner of the identity map. Lookups,
//! reference counting and reaping all run sequentially on its task, so no
//! lock guards the map and eviction callbacks never stall a lookup that is
//! waiting behind a lock.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Response send failures are ignored (the caller went away)

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use super::commands::{EvictFn, RegistryCommand, RegistryError};

// ============================================================================
// Timer Entry
// ============================================================================

/// A cached value with its expiration and reference count.
pub struct TimerEntry<V> {
    value: V,
    expires_at: Instant,
    refs: i64,
    on_evict: EvictFn<V>,
}

impl<V> TimerEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }

    fn is_unreferenced(&self) -> bool {
        self.refs <= 0
    }

    fn evict(self) {
        (self.on_evict)(self.value);
    }
}

// ============================================================================
// Registry Actor
// ============================================================================

/// The registry actor.
///
/// # Eviction rules
///
/// - An entry is evicted by the reaper only when it is past its expiration
///   AND its reference count is `<= 0`.
/// - An expired entry that is still referenced gets its expiration pushed
///   to `now + timeout` instead.
/// - `Get`, `Put` and `Done` set the expiration to `now + timeout`.
/// - Every removed entry runs its callback exactly once.
pub struct RegistryActor<V> {
    receiver: mpsc::Receiver<RegistryCommand<V>>,
    entries: HashMap<String, TimerEntry<V>>,
    timeout: Duration,
}

impl<V: Clone + Send + 'static> RegistryActor<V> {
    pub fn new(receiver: mpsc::Receiver<RegistryCommand<V>>, timeout: Duration) -> Self {
        Self {
            receiver,
            entries: HashMap::new(),
            timeout,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until every handle is dropped. Remaining entries
    /// are evicted on the way out so their connections get closed.
    pub async fn run(mut self) {
        info!(timeout_secs = self.timeout.as_secs(), "Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        let remaining = self.entries.len();
        for (_, entry) in self.entries.drain() {
            entry.evict();
        }
        info!(evicted = remaining, "Registry actor stopped");
    }

    fn handle_command(&mut self, cmd: RegistryCommand<V>) {
        match cmd {
            RegistryCommand::Get { key, respond_to } => {
                let _ = respond_to.send(self.handle_get(&key));
            }
            RegistryCommand::Put {
                key,
                value,
                on_evict,
                respond_to,
            } => {
                self.handle_put(key, value, on_evict);
                let _ = respond_to.send(());
            }
            RegistryCommand::IncrRef { key, respond_to } => {
                let _ = respond_to.send(self.handle_adjust_ref(&key, 1));
            }
            RegistryCommand::Done { key, respond_to } => {
                let _ = respond_to.send(self.handle_adjust_ref(&key, -1));
            }
            RegistryCommand::Evict { key, respond_to } => {
                let _ = respond_to.send(self.handle_evict(&key));
            }
            RegistryCommand::Len { respond_to } => {
                let _ = respond_to.send(self.entries.len());
            }
            RegistryCommand::Reap => self.handle_reap(),
        }
    }

    fn handle_get(&mut self, key: &str) -> Option<V> {
        let deadline = Instant::now() + self.timeout;
        let entry = self.entries.get_mut(key)?;
        entry.expires_at = deadline;
        Some(entry.value.clone())
    }

    fn handle_put(&mut self, key: String, value: V, on_evict: EvictFn<V>) {
        let mut entry = TimerEntry {
            value,
            expires_at: Instant::now() + self.timeout,
            refs: 0,
            on_evict,
        };

        if let Some(previous) = self.entries.remove(&key) {
            entry.refs = previous.refs;
            debug!(key = %key, refs = entry.refs, "Replacing cached connection");
            previous.evict();
        } else {
            debug!(key = %key, "Caching connection");
        }

        self.entries.insert(key, entry);
    }

    fn handle_adjust_ref(&mut self, key: &str, delta: i64) -> Result<i64, RegistryError> {
        let deadline = Instant::now() + self.timeout;
        let entry = self
            .entries
            .get_mut(key)
            .ok_or_else(|| RegistryError::NotFound(key.to_string()))?;
        entry.refs += delta;
        if delta < 0 {
            entry.expires_at = deadline;
        }
        debug!(key = %key, refs = entry.refs, "Adjusted reference count");
        Ok(entry.refs)
    }

    fn handle_evict(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                debug!(key = %key, "Evicting cached connection on request");
                entry.evict();
                true
            }
            None => false,
        }
    }

    fn handle_reap(&mut self) {
        let now = Instant::now();
        let deadline = now + self.timeout;

        let mut expired = Vec::new();
        for (key, entry) in self.entries.iter_mut() {
            if !entry.is_expired(now) {
                continue;
            }
            if entry.is_unreferenced() {
                expired.push(key.clone());
            } else {
                entry.expires_at = deadline;
            }
        }

        // Callbacks run after the scan, never while iterating the map.
        let removed: Vec<(String, TimerEntry<V>)> = expired
            .into_iter()
            .filter_map(|key| self.entries.remove(&key).map(|entry| (key, entry)))
            .collect();

        for (key, entry) in removed {
            info!(key = %key, "Evicting idle connection");
            entry.evict();
        }
    }

    /// Returns the number of cached entries (for testing).
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
