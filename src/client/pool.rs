//! The connection pool: bounded admission, idle reuse, and reclamation.
//!
//! Admission is a semaphore sized to the configured pool size, widened
//! once at first use if the server's `suggested_pool_concurrency` is
//! larger. Connections carry only their slot id as a back-reference;
//! the pool owns the slot map and a reaper task removes slots whose
//! read loop has died, so there is no Pool ↔ Connection ownership
//! cycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};

use crate::codec::{CodecRegistry, FromValue, Value};
use crate::config::ConnectConfig;
use crate::error::{Error, Result};

use super::connection::Connection;
use super::query::QueryRequest;

struct PoolState {
    idle: Vec<Arc<Connection>>,
    all: HashMap<u64, Arc<Connection>>,
}

pub(crate) struct PoolInner {
    config: ConnectConfig,
    registry: CodecRegistry,
    semaphore: Arc<Semaphore>,
    state: Mutex<PoolState>,
    disconnect_tx: mpsc::UnboundedSender<u64>,
    init: tokio::sync::OnceCell<()>,
    next_slot: AtomicU64,
    effective_size: AtomicUsize,
    closed: AtomicBool,
}

/// A pooled client for one database.
///
/// Cheap to clone; all clones share the same connections, admission
/// semaphore, and codec registry.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

/// A borrowed connection. Dereferences to [`Connection`]; dropping it
/// returns the connection to the idle list (or discards it if the wire
/// is no longer trustworthy) and releases the admission slot.
pub struct PoolHandle {
    inner: Arc<PoolInner>,
    conn: Option<Arc<Connection>>,
    _permit: OwnedSemaphorePermit,
}

impl Pool {
    /// Create a pool with its own isolated codec registry. No
    /// connection is opened until first use.
    pub fn new(config: ConnectConfig) -> Pool {
        Pool::with_registry(config, CodecRegistry::new())
    }

    /// Create a pool over an explicit codec registry.
    pub fn with_registry(config: ConnectConfig, registry: CodecRegistry) -> Pool {
        let (disconnect_tx, mut disconnect_rx) = mpsc::unbounded_channel();
        let configured = config.pool_size.max(1);
        let inner = Arc::new(PoolInner {
            config,
            registry,
            semaphore: Arc::new(Semaphore::new(configured)),
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                all: HashMap::new(),
            }),
            disconnect_tx,
            init: tokio::sync::OnceCell::new(),
            next_slot: AtomicU64::new(0),
            effective_size: AtomicUsize::new(configured),
            closed: AtomicBool::new(false),
        });

        // Reaper: connections whose read loop died report their slot
        // here and are dropped from the maps.
        let reaper = Arc::downgrade(&inner);
        tokio::spawn(async move {
            while let Some(slot) = disconnect_rx.recv().await {
                let Some(inner) = reaper.upgrade() else { break };
                inner.remove_slot(slot);
                tracing::debug!(slot, "reclaimed disconnected connection");
            }
        });

        Pool { inner }
    }

    /// Current admission bound: the configured size, or the server's
    /// suggestion if it was larger at first use.
    pub fn effective_size(&self) -> usize {
        self.inner.effective_size.load(Ordering::SeqCst)
    }

    /// Number of live connections (idle and borrowed).
    pub fn connection_count(&self) -> usize {
        self.inner.state.lock().expect("pool state poisoned").all.len()
    }

    /// Borrow a connection, waiting for admission if the pool is at its
    /// bound. Dropping the returned handle releases the slot, so a
    /// caller that goes away mid-wait or mid-query never leaks
    /// admission.
    pub async fn acquire(&self) -> Result<PoolHandle> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::InvalidState("pool is closed".into()));
        }

        self.inner
            .init
            .get_or_try_init(|| self.first_use())
            .await?;

        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::InvalidState("pool is closed".into()))?;

        // Idle selection happens under the lookup lock; creation (which
        // awaits) does not hold it. Admission bounds total borrowers, so
        // the pool can never oversubscribe the server.
        loop {
            let candidate = {
                let mut state = self.inner.state.lock().expect("pool state poisoned");
                state.idle.pop()
            };
            match candidate {
                Some(conn) if conn.is_closed() || conn.is_poisoned() => {
                    self.inner.discard(conn);
                }
                Some(conn) => {
                    return Ok(PoolHandle {
                        inner: self.inner.clone(),
                        conn: Some(conn),
                        _permit: permit,
                    });
                }
                None => break,
            }
        }

        let conn = self.inner.open_connection().await?;
        Ok(PoolHandle {
            inner: self.inner.clone(),
            conn: Some(conn),
            _permit: permit,
        })
    }

    /// First-use initialization: open one connection and widen the
    /// admission bound if the server suggests more concurrency than
    /// configured.
    async fn first_use(&self) -> Result<()> {
        let conn = self.inner.open_connection().await?;

        if let Some(suggested) = conn.settings().suggested_pool_concurrency {
            let configured = self.inner.config.pool_size.max(1);
            if suggested > configured {
                self.inner.semaphore.add_permits(suggested - configured);
                self.inner
                    .effective_size
                    .store(suggested, Ordering::SeqCst);
                tracing::debug!(configured, suggested, "widened pool to server suggestion");
            }
        }

        let mut state = self.inner.state.lock().expect("pool state poisoned");
        state.idle.push(conn);
        Ok(())
    }

    /// Run one request on a pooled connection.
    pub async fn query(&self, request: &QueryRequest) -> Result<Vec<Value>> {
        let conn = self.acquire().await?;
        conn.query(request).await
    }

    /// Query and convert each row.
    pub async fn query_as<T: FromValue>(&self, request: &QueryRequest) -> Result<Vec<T>> {
        let conn = self.acquire().await?;
        conn.query_as(request).await
    }

    /// At most one row.
    pub async fn query_single(&self, request: &QueryRequest) -> Result<Option<Value>> {
        let conn = self.acquire().await?;
        conn.query_single(request).await
    }

    /// Exactly one row, converted.
    pub async fn query_required_single<T: FromValue>(&self, request: &QueryRequest) -> Result<T> {
        let conn = self.acquire().await?;
        let value = conn.query_required_single(request).await?;
        T::from_value(value)
    }

    /// Run a statement for its side effects.
    pub async fn execute(&self, request: &QueryRequest) -> Result<()> {
        let conn = self.acquire().await?;
        conn.execute(request).await
    }

    /// Close every connection and refuse further use.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.semaphore.close();
        let conns: Vec<Arc<Connection>> = {
            let mut state = self.inner.state.lock().expect("pool state poisoned");
            state.idle.clear();
            state.all.drain().map(|(_, c)| c).collect()
        };
        for conn in conns {
            conn.close().await;
        }
    }

    pub(crate) fn config(&self) -> &ConnectConfig {
        &self.inner.config
    }
}

impl PoolInner {
    async fn open_connection(&self) -> Result<Arc<Connection>> {
        let slot = self.next_slot.fetch_add(1, Ordering::SeqCst);
        let conn = Connection::connect(
            &self.config,
            self.registry.clone(),
            slot,
            self.disconnect_tx.clone(),
        )
        .await?;
        let conn = Arc::new(conn);
        self.state
            .lock()
            .expect("pool state poisoned")
            .all
            .insert(slot, conn.clone());
        tracing::debug!(slot, "opened pooled connection");
        Ok(conn)
    }

    fn remove_slot(&self, slot: u64) {
        let mut state = self.state.lock().expect("pool state poisoned");
        state.all.remove(&slot);
        state.idle.retain(|c| c.slot() != slot);
    }

    fn discard(&self, conn: Arc<Connection>) {
        self.remove_slot(conn.slot());
        tokio::spawn(async move { conn.close().await });
    }

    fn release(&self, conn: Arc<Connection>) {
        // A connection handed back mid-transaction has an abandoned
        // transaction block on the wire; close it rather than hand the
        // block to the next borrower.
        if self.closed.load(Ordering::SeqCst)
            || conn.is_closed()
            || conn.is_poisoned()
            || conn.in_transaction()
        {
            self.discard(conn);
            return;
        }
        let mut state = self.state.lock().expect("pool state poisoned");
        state.idle.push(conn);
    }
}

impl std::ops::Deref for PoolHandle {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl Drop for PoolHandle {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.inner.release(conn);
        }
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("effective_size", &self.effective_size())
            .field("connections", &self.connection_count())
            .finish()
    }
}
