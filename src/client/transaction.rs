//! The transaction envelope: BEGIN/COMMIT/ROLLBACK around a callback,
//! with retry for serialization conflicts and transient connection
//! loss.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::codec::{FromValue, Value};
use crate::error::{Error, Result};
use crate::proto::Capabilities;

use super::pool::{Pool, PoolHandle};
use super::query::QueryRequest;

/// Transaction isolation level. The server supports serializable only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    #[default]
    Serializable,
}

#[derive(Debug, Clone)]
pub struct TransactionOptions {
    pub isolation: IsolationLevel,
    pub read_only: bool,
    pub deferrable: bool,
    /// Total attempts for retryable failures (1 = no retry).
    pub retry_attempts: u32,
    /// Base backoff between attempts; doubles per attempt.
    pub retry_backoff: Duration,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            isolation: IsolationLevel::Serializable,
            read_only: false,
            deferrable: false,
            retry_attempts: 3,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

impl TransactionOptions {
    fn start_statement(&self) -> String {
        let access = if self.read_only {
            "read only"
        } else {
            "read write"
        };
        let deferrable = if self.deferrable {
            "deferrable"
        } else {
            "not deferrable"
        };
        format!("start transaction isolation serializable, {access}, {deferrable}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    NotStarted,
    InTransaction,
    Committed,
    RolledBack,
}

/// A transaction pinned to one pooled connection.
///
/// Handed to the callback of [`Pool::transaction`]; clones share the
/// same underlying transaction. Queries are only valid while the
/// transaction is open.
#[derive(Clone)]
pub struct Transaction {
    handle: Arc<PoolHandle>,
    state: Arc<Mutex<TxState>>,
}

impl Transaction {
    async fn begin(handle: PoolHandle, options: &TransactionOptions) -> Result<Transaction> {
        if handle.in_transaction() {
            return Err(Error::InvalidState(
                "nested transactions are not supported".into(),
            ));
        }
        let tx = Transaction {
            handle: Arc::new(handle),
            state: Arc::new(Mutex::new(TxState::NotStarted)),
        };
        tx.handle.execute(&tx.statement(&options.start_statement())).await?;
        tx.set_state(TxState::InTransaction);
        Ok(tx)
    }

    fn statement(&self, text: &str) -> QueryRequest {
        QueryRequest::new(text).capabilities(Capabilities::TRANSACTION)
    }

    fn state(&self) -> TxState {
        *self.state.lock().expect("transaction state poisoned")
    }

    fn set_state(&self, state: TxState) {
        *self.state.lock().expect("transaction state poisoned") = state;
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state() {
            TxState::InTransaction => Ok(()),
            other => Err(Error::InvalidState(format!(
                "transaction is not open: {other:?}"
            ))),
        }
    }

    pub async fn query(&self, request: &QueryRequest) -> Result<Vec<Value>> {
        self.ensure_open()?;
        self.handle.query(request).await
    }

    pub async fn query_as<T: FromValue>(&self, request: &QueryRequest) -> Result<Vec<T>> {
        self.ensure_open()?;
        self.handle.query_as(request).await
    }

    pub async fn query_single(&self, request: &QueryRequest) -> Result<Option<Value>> {
        self.ensure_open()?;
        self.handle.query_single(request).await
    }

    pub async fn query_required_single<T: FromValue>(&self, request: &QueryRequest) -> Result<T> {
        self.ensure_open()?;
        let value = self.handle.query_required_single(request).await?;
        T::from_value(value)
    }

    pub async fn execute(&self, request: &QueryRequest) -> Result<()> {
        self.ensure_open()?;
        self.handle.execute(request).await
    }

    async fn commit(&self) -> Result<()> {
        self.ensure_open()?;
        self.handle.execute(&self.statement("commit")).await?;
        self.set_state(TxState::Committed);
        Ok(())
    }

    /// Best-effort rollback. Protocol faults surface; anything else is
    /// logged and swallowed so the original callback error wins.
    async fn rollback_quietly(&self) -> Result<()> {
        if self.state() != TxState::InTransaction {
            return Ok(());
        }
        match self.handle.execute(&self.statement("rollback")).await {
            Ok(()) => {
                self.set_state(TxState::RolledBack);
                Ok(())
            }
            Err(e) if e.is_protocol() => Err(e),
            Err(e) => {
                tracing::debug!(error = %e, "rollback failed; discarding connection");
                self.set_state(TxState::RolledBack);
                Ok(())
            }
        }
    }
}

impl Pool {
    /// Run `body` inside a transaction, retrying retryable failures
    /// (serialization conflicts, transient connection loss) up to
    /// `options.retry_attempts` total attempts with doubling backoff.
    ///
    /// The callback may run several times; it must be idempotent apart
    /// from its transactional effects.
    pub async fn transaction_with<T, B, Fut>(
        &self,
        options: &TransactionOptions,
        body: B,
    ) -> Result<T>
    where
        B: Fn(Transaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = options.retry_attempts.max(1);
        let mut backoff = options.retry_backoff;

        for attempt in 1..=attempts {
            let outcome = self.run_attempt(options, &body).await;
            match outcome {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    tracing::debug!(attempt, error = %e, "retrying transaction");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => return Err(e),
            }
        }
        unreachable!("loop returns on the final attempt")
    }

    /// [`Pool::transaction_with`] with default options, using the
    /// pool's configured retry settings.
    pub async fn transaction<T, B, Fut>(&self, body: B) -> Result<T>
    where
        B: Fn(Transaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let config = self.config();
        let options = TransactionOptions {
            retry_attempts: config.retry_attempts,
            retry_backoff: config.retry_backoff,
            ..TransactionOptions::default()
        };
        self.transaction_with(&options, body).await
    }

    async fn run_attempt<T, B, Fut>(&self, options: &TransactionOptions, body: &B) -> Result<T>
    where
        B: Fn(Transaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let handle = self.acquire().await?;
        let tx = Transaction::begin(handle, options).await?;

        match body(tx.clone()).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                tx.rollback_quietly().await?;
                Err(e)
            }
        }
    }
}
