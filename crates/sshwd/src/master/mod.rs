//! Master request dispatcher.
//!
//! Routes each control connection by the path of its first request:
//!
//! ```text
//! createConn ─────────────▶ mint SessionNum, open bundle, reply, close
//! stdin/stdout/stderr ────▶ bind socket into the bundle, keep it open
//! session/terminal ───────▶ take bundle ─▶ obtain client ─▶ shell ─▶ reply
//! session/scp ────────────▶ take bundle ─▶ obtain client ─▶ scp   ─▶ reply
//! session/cancel ─────────▶ cancel the in-flight scp for Num, reply
//! ```
//!
//! Obtaining a client goes through the connection registry: a cached
//! connection for the node identity is reused when its keepalive ping
//! answers, otherwise a fresh one is dialed and cached. Session clients
//! never close the shared connection themselves; only the registry's
//! eviction callback does.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Every failure becomes a `Code = -1` response on its own connection

mod bundle;

pub use bundle::{BundleTable, StdStream};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sshw_core::{Client, ClientError, ClientFactory, Node, NodeIo, SessionNum};
use sshw_protocol::{
    ChangeWindowRequest, ClientRequest, ProtocolError, Request, Response, Route, SocketReader,
    SocketWriter, StdRole,
};

use crate::registry::{RegistryError, RegistryHandle};

/// Cached template client carrying a shared connection handle.
pub type SharedClient<C> = Arc<Mutex<C>>;

/// How long a `session/*` request waits for its three streams to bind.
pub const DEFAULT_BIND_WAIT: Duration = Duration::from_secs(3);

/// Bundles never claimed by a session request are dropped after this.
pub const DEFAULT_BUNDLE_TTL: Duration = Duration::from_secs(30);

// ============================================================================
// Errors
// ============================================================================

/// Errors produced while dispatching one control connection.
#[derive(Debug, Error)]
pub enum MasterError {
    /// Session number was never minted, already consumed or abandoned.
    #[error("no such num: {0}")]
    NoSuchNum(SessionNum),

    /// Not all stream sockets arrived in time.
    #[error("num {0}: stdio not bound")]
    IncompleteBundle(SessionNum),

    #[error("num {num}: {role} already bound")]
    SlotTaken { num: SessionNum, role: &'static str },

    #[error("session request without node")]
    MissingNode,

    #[error("unknown path: {0}")]
    UnknownPath(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

// ============================================================================
// Master Handler
// ============================================================================

/// Tunables of the dispatcher.
#[derive(Debug, Clone, Copy)]
pub struct MasterConfig {
    pub bind_wait: Duration,
    pub bundle_ttl: Duration,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            bind_wait: DEFAULT_BIND_WAIT,
            bundle_ttl: DEFAULT_BUNDLE_TTL,
        }
    }
}

/// Daemon-side state shared by all control connections.
pub struct MasterHandler<F: ClientFactory> {
    factory: F,
    registry: RegistryHandle<SharedClient<F::Client>>,
    config: MasterConfig,
    next_num: AtomicU64,
    bundles: BundleTable,
    cancels: Mutex<HashMap<SessionNum, CancellationToken>>,
    dial_locks: DialLocks,
}

impl<F: ClientFactory> MasterHandler<F> {
    pub fn new(
        factory: F,
        registry: RegistryHandle<SharedClient<F::Client>>,
        config: MasterConfig,
    ) -> Self {
        Self {
            factory,
            registry,
            config,
            next_num: AtomicU64::new(0),
            bundles: BundleTable::new(config.bundle_ttl),
            cancels: Mutex::new(HashMap::new()),
            dial_locks: DialLocks::default(),
        }
    }

    pub fn registry(&self) -> &RegistryHandle<SharedClient<F::Client>> {
        &self.registry
    }

    /// Number of bundles waiting to be consumed.
    pub async fn pending_bundles(&self) -> usize {
        self.bundles.len().await
    }

    /// Identities with a dial in progress or waiting on one.
    pub fn pending_dials(&self) -> usize {
        self.dial_locks.len()
    }

    /// Serves one control connection whose first request has been read.
    ///
    /// Consumes the connection; it is closed on return unless it was bound
    /// into a stream bundle.
    pub async fn dispatch(&self, request: Request, reader: SocketReader, mut writer: SocketWriter) {
        let route = request.route();
        debug!(path = %request.path, "Dispatching request");

        let result = match route {
            Route::CreateConn => self.create_conn().await,
            Route::Std(role) => {
                if let Err(e) = self.bind_std(&request, role, reader, writer).await {
                    warn!(path = %request.path, error = %e, "Rejected stream binding");
                }
                return;
            }
            Route::Terminal => self.terminal(&request, reader).await,
            Route::Scp => self.scp(&request).await,
            Route::Cancel => self.cancel(&request).await,
            Route::Unknown(path) => Err(MasterError::UnknownPath(path)),
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(path = %request.path, error = %e, "Request failed");
                Response::fail(e.to_string())
            }
        };

        if let Err(e) = writer.write(&response).await {
            debug!(path = %request.path, error = %e, "Failed to send response");
        }
    }

    async fn create_conn(&self) -> Result<Response, MasterError> {
        let num = SessionNum::new(self.next_num.fetch_add(1, Ordering::SeqCst) + 1);
        self.bundles.open(num).await;
        debug!(num = %num, "Minted session number");
        Ok(Response::success(&num)?)
    }

    async fn bind_std(
        &self,
        request: &Request,
        role: StdRole,
        reader: SocketReader,
        writer: SocketWriter,
    ) -> Result<(), MasterError> {
        let num: SessionNum = request.decode_body()?;
        let stream = StdStream {
            reader: reader.into_inner(),
            writer: writer.into_inner(),
        };
        self.bundles.bind(num, role, stream).await
    }

    async fn terminal(
        &self,
        request: &Request,
        mut reader: SocketReader,
    ) -> Result<Response, MasterError> {
        let (num, node) = decode_session(request)?;
        let identity = node.identity();
        let io = self.bundles.take(num, self.config.bind_wait).await?;
        let mut client = self.obtain_client(node, io).await?;

        if let Err(e) = self.registry.incr_ref(&identity).await {
            warn!(identity = %identity, error = %e, "Failed to reference cached connection");
        }

        let resizer = client.resizer();
        let resize_task = tokio::spawn(async move {
            while let Ok(change) = reader.read::<ChangeWindowRequest>().await {
                if resizer.send(change.into()).is_err() {
                    break;
                }
            }
        });

        info!(num = %num, identity = %identity, "Terminal session started");
        let result = client.shell().await;

        if let Err(e) = self.registry.done(&identity).await {
            debug!(identity = %identity, error = %e, "Cached connection gone before release");
        }
        resize_task.abort();
        // Closes the bound streams before the reply goes out.
        drop(client);

        info!(num = %num, ok = result.is_ok(), "Terminal session finished");
        result?;
        Ok(Response::success(&"ok")?)
    }

    async fn scp(&self, request: &Request) -> Result<Response, MasterError> {
        let (num, node) = decode_session(request)?;
        let identity = node.identity();
        let io = self.bundles.take(num, self.config.bind_wait).await?;
        let mut client = self.obtain_client(node, io).await?;

        if let Err(e) = self.registry.incr_ref(&identity).await {
            warn!(identity = %identity, error = %e, "Failed to reference cached connection");
        }

        let token = CancellationToken::new();
        self.cancels.lock().await.insert(num, token.clone());

        info!(num = %num, identity = %identity, "Copy session started");
        let result = client.scp(token).await;

        self.cancels.lock().await.remove(&num);
        if let Err(e) = self.registry.done(&identity).await {
            debug!(identity = %identity, error = %e, "Cached connection gone before release");
        }
        drop(client);

        info!(num = %num, ok = result.is_ok(), "Copy session finished");
        result?;
        Ok(Response::success(&"ok")?)
    }

    async fn cancel(&self, request: &Request) -> Result<Response, MasterError> {
        let body: ClientRequest = request.decode_body()?;
        let cancels = self.cancels.lock().await;
        let token = cancels.get(&body.num).ok_or(MasterError::NoSuchNum(body.num))?;
        token.cancel();
        info!(num = %body.num, "Copy cancelled by client");
        Ok(Response::success(&"ok")?)
    }

    /// Builds a client for `node`, reusing a healthy cached connection.
    async fn obtain_client(&self, node: Node, io: NodeIo) -> Result<F::Client, MasterError> {
        let identity = node.identity();
        let mut client = self.factory.new_client(node.clone(), io);
        if !client.can_connect() {
            return Err(ClientError::ShouldRunLocal.into());
        }

        let lease = self.dial_locks.lease(&identity);
        let _guard = lease.lock().await;

        if let Some(cached) = self.registry.get(&identity).await {
            let (alive, handle) = {
                let mut cached = cached.lock().await;
                (cached.ping().await, cached.get_client())
            };
            match (alive, handle) {
                (Ok(()), Some(handle)) => {
                    debug!(identity = %identity, "Reusing cached connection");
                    client.set_client(handle);
                    return Ok(client);
                }
                (Err(e), _) => {
                    warn!(identity = %identity, error = %e, "Cached connection failed keepalive");
                    self.registry.evict(&identity).await;
                }
                (Ok(()), None) => {
                    self.registry.evict(&identity).await;
                }
            }
        }

        info!(identity = %identity, "Dialing");
        client.connect().await?;
        let handle = client
            .get_client()
            .ok_or(ClientError::NotConnected { op: "connect" })?;

        let mut template = self.factory.new_client(node, NodeIo::detached());
        template.set_client(handle);
        self.registry
            .put(&identity, Arc::new(Mutex::new(template)), move |cached| {
                tokio::spawn(async move {
                    if let Err(e) = cached.lock().await.close().await {
                        debug!(error = %e, "Error closing evicted connection");
                    }
                });
            })
            .await?;

        Ok(client)
    }

}

// ============================================================================
// Dial Locks
// ============================================================================

/// One async lock per identity being dialed, so concurrent sessions for the
/// same identity share a single connection. Entries live only while some
/// lease for them is held.
#[derive(Default)]
struct DialLocks {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DialLocks {
    fn lease(&self, identity: &str) -> DialLease<'_> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let lock = Arc::clone(locks.entry(identity.to_string()).or_default());
        DialLease {
            owner: self,
            identity: identity.to_string(),
            entry: lock,
        }
    }

    fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Shared handle on one identity's dial lock. Dropping the last lease
/// removes the entry, also when the owning request is abandoned mid-dial.
struct DialLease<'a> {
    owner: &'a DialLocks,
    identity: String,
    entry: Arc<Mutex<()>>,
}

impl DialLease<'_> {
    async fn lock(&self) -> MutexGuard<'_, ()> {
        self.entry.lock().await
    }
}

impl Drop for DialLease<'_> {
    fn drop(&mut self) {
        let mut locks = self
            .owner
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // The map's reference plus this lease.
        if Arc::strong_count(&self.entry) == 2 {
            locks.remove(&self.identity);
        }
    }
}

fn decode_session(request: &Request) -> Result<(SessionNum, Node), MasterError> {
    let body: ClientRequest = request.decode_body()?;
    let node = body.node.ok_or(MasterError::MissingNode)?;
    Ok((body.num, node))
}
