//! Stream bundles: the three stdio sockets bound to one session number.

use std::collections::HashMap;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

use sshw_core::{NodeIo, SessionNum};
use sshw_protocol::StdRole;

use super::MasterError;

/// One bound `std*` connection.
///
/// `reader` keeps whatever the request reader had already buffered, so
/// stdin bytes sent right after the request are not lost.
#[derive(Debug)]
pub struct StdStream {
    pub reader: BufReader<OwnedReadHalf>,
    pub writer: OwnedWriteHalf,
}

/// Up to three sockets for one session number, filled in any order.
#[derive(Debug)]
struct StreamBundle {
    created_at: Instant,
    stdin: Option<StdStream>,
    stdout: Option<StdStream>,
    stderr: Option<StdStream>,
}

impl StreamBundle {
    fn new() -> Self {
        Self {
            created_at: Instant::now(),
            stdin: None,
            stdout: None,
            stderr: None,
        }
    }

    fn slot(&mut self, role: StdRole) -> &mut Option<StdStream> {
        match role {
            StdRole::Stdin => &mut self.stdin,
            StdRole::Stdout => &mut self.stdout,
            StdRole::Stderr => &mut self.stderr,
        }
    }

    fn is_complete(&self) -> bool {
        self.stdin.is_some() && self.stdout.is_some() && self.stderr.is_some()
    }

    /// Converts a complete bundle into client stdio.
    ///
    /// The unused halves are dropped here; the used ones close when the
    /// consuming client is dropped.
    fn into_io(self) -> Option<NodeIo> {
        let (stdin, stdout, stderr) = (self.stdin?, self.stdout?, self.stderr?);
        Some(NodeIo::new(
            Box::new(stdin.reader),
            Box::new(stdout.writer),
            Box::new(stderr.writer),
        ))
    }
}

/// Session-number keyed bundle table.
///
/// Entries are created by `createConn`, filled by `std*` connections and
/// removed exactly once: when a `session/*` request takes them, when that
/// take gives up waiting, or when they are pruned as abandoned.
pub struct BundleTable {
    bundles: Mutex<HashMap<SessionNum, StreamBundle>>,
    bound: Notify,
    ttl: Duration,
}

impl BundleTable {
    pub fn new(ttl: Duration) -> Self {
        Self {
            bundles: Mutex::new(HashMap::new()),
            bound: Notify::new(),
            ttl,
        }
    }

    /// Registers a freshly minted number, pruning abandoned bundles.
    pub async fn open(&self, num: SessionNum) {
        let mut bundles = self.bundles.lock().await;
        let ttl = self.ttl;
        let before = bundles.len();
        bundles.retain(|_, bundle| bundle.created_at.elapsed() < ttl);
        let pruned = before - bundles.len();
        if pruned > 0 {
            warn!(pruned, "Dropped abandoned stream bundles");
        }
        bundles.insert(num, StreamBundle::new());
    }

    /// Assigns a stream to its slot.
    ///
    /// # Errors
    ///
    /// - `MasterError::NoSuchNum` if the number was never minted or is gone
    /// - `MasterError::SlotTaken` if the slot is already bound
    pub async fn bind(
        &self,
        num: SessionNum,
        role: StdRole,
        stream: StdStream,
    ) -> Result<(), MasterError> {
        let mut bundles = self.bundles.lock().await;
        let bundle = bundles.get_mut(&num).ok_or(MasterError::NoSuchNum(num))?;
        let slot = bundle.slot(role);
        if slot.is_some() {
            return Err(MasterError::SlotTaken {
                num,
                role: role.path(),
            });
        }
        *slot = Some(stream);
        debug!(num = %num, role = role.path(), "Bound stream");
        drop(bundles);

        self.bound.notify_waiters();
        Ok(())
    }

    /// Removes the bundle for `num` once all three slots are bound.
    ///
    /// Waits up to `wait` for missing slots, since a client may send its
    /// session request before the daemon has processed every `std*`
    /// connection. The entry is removed on every outcome except an unknown
    /// number, so a number is consumed at most once.
    ///
    /// # Errors
    ///
    /// - `MasterError::NoSuchNum` if no bundle exists for `num`
    /// - `MasterError::IncompleteBundle` if slots are still missing after `wait`
    pub async fn take(&self, num: SessionNum, wait: Duration) -> Result<NodeIo, MasterError> {
        let deadline = Instant::now() + wait;

        loop {
            let notified = self.bound.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut bundles = self.bundles.lock().await;
                match bundles.get(&num) {
                    None => return Err(MasterError::NoSuchNum(num)),
                    Some(bundle) if bundle.is_complete() => {
                        return bundles
                            .remove(&num)
                            .and_then(StreamBundle::into_io)
                            .ok_or(MasterError::NoSuchNum(num));
                    }
                    Some(_) => {}
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                self.bundles.lock().await.remove(&num);
                return Err(MasterError::IncompleteBundle(num));
            }
        }
    }

    /// Number of bundles still waiting to be consumed.
    pub async fn len(&self) -> usize {
        self.bundles.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
