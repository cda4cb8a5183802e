//! A single authenticated connection and its query pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use tokio::io::WriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::client::TlsStream;

use crate::codec::{build_codec, CodecRegistry, FromValue, Value};
use crate::config::ConnectConfig;
use crate::error::{Error, Result};
use crate::proto::messages::{encode_describe_statement, encode_execute, encode_prepare};
use crate::proto::{Cardinality, ServerMessage, TransactionStatus};
use crate::tls;

use super::duplex::Duplexer;
use super::handshake::{self, ServerSettings};
use super::query::{check_cardinality, encode_arguments, QueryRequest};

/// Connection lifecycle phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
    InTransaction,
    Closed,
}

type TlsWrite = WriteHalf<TlsStream<TcpStream>>;

/// One long-lived server connection.
///
/// A connection runs at most one Prepare/Execute/Sync pipeline at a
/// time (the command lock); the pool multiplexes callers across many
/// connections.
pub struct Connection {
    pub(crate) duplex: Duplexer<TlsWrite>,
    pub(crate) registry: CodecRegistry,
    pub(crate) command_lock: tokio::sync::Mutex<()>,
    state: Mutex<SessionState>,
    server_key: [u8; 32],
    settings: ServerSettings,
    slot: u64,
    poisoned: AtomicBool,
}

impl Connection {
    /// Open, authenticate, and start the read loop. `slot` is the
    /// pool's identifier for this connection; it is reported on
    /// `disconnect_tx` when the read loop dies.
    pub(crate) async fn connect(
        config: &ConnectConfig,
        registry: CodecRegistry,
        slot: u64,
        disconnect_tx: mpsc::UnboundedSender<u64>,
    ) -> Result<Connection> {
        let mut stream = tls::connect(&config.host, config.port, &config.tls).await?;
        let outcome = handshake::authenticate(&mut stream, config, &registry).await?;

        let (reader, writer) = tokio::io::split(stream);
        let duplex = Duplexer::start(reader, writer, slot, disconnect_tx);

        Ok(Connection {
            duplex,
            registry,
            command_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(SessionState::Ready),
            server_key: outcome.server_key,
            settings: outcome.settings,
            slot,
            poisoned: AtomicBool::new(false),
        })
    }

    pub fn slot(&self) -> u64 {
        self.slot
    }

    /// The 32-byte key the server issued for this connection.
    pub fn server_key(&self) -> &[u8; 32] {
        &self.server_key
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    pub fn state(&self) -> SessionState {
        if self.duplex.is_closed() {
            return SessionState::Closed;
        }
        *self.state.lock().expect("state lock poisoned")
    }

    pub fn in_transaction(&self) -> bool {
        self.state() == SessionState::InTransaction
    }

    /// True when a cancelled operation left the wire mid-pipeline. Such
    /// a connection must be closed, not reused.
    pub(crate) fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }

    /// Mark the wire as mid-pipeline; cleared by
    /// [`Self::mark_pipeline_clean`] once the server is back at
    /// ReadyForCommand. Anything that returns (or is dropped) in
    /// between leaves the connection unusable for the pool.
    pub(crate) fn mark_pipeline_start(&self) {
        self.poisoned.store(true, Ordering::SeqCst);
    }

    pub(crate) fn mark_pipeline_clean(&self) {
        self.poisoned.store(false, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.duplex.is_closed()
    }

    /// Graceful close: Terminate, then stream shutdown. The read loop
    /// reports the disconnect to the pool.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            *state = SessionState::Closed;
        }
        self.duplex.close().await;
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.is_poisoned() {
            return Err(Error::InvalidState(
                "connection was cancelled mid-pipeline and cannot be reused".into(),
            ));
        }
        match self.state() {
            SessionState::Ready | SessionState::InTransaction => Ok(()),
            SessionState::Closed => Err(Error::ConnectionLost("connection is closed".into())),
            other => Err(Error::InvalidState(format!(
                "connection is not ready: {other:?}"
            ))),
        }
    }

    fn note_transaction_status(&self, status: TransactionStatus) {
        let mut state = self.state.lock().expect("state lock poisoned");
        *state = match status {
            TransactionStatus::Idle => SessionState::Ready,
            TransactionStatus::InTransaction | TransactionStatus::InFailedTransaction => {
                SessionState::InTransaction
            }
        };
    }

    /// One duplexed request/Sync pair. The waiter is registered before
    /// the bytes leave; the stage only finishes once the server's
    /// ReadyForCommand has returned the connection to a known state, so
    /// a future dropped in between leaves the connection marked
    /// poisoned.
    async fn stage<P>(&self, messages: &[(u8, Bytes)], predicate: P) -> Result<ServerMessage>
    where
        P: Fn(&ServerMessage) -> bool + Send + 'static,
    {
        let mark = self.duplex.ready_mark();
        self.mark_pipeline_start();
        let outcome = self.duplex.duplex_and_sync(messages, predicate).await;
        match self.duplex.wait_ready(mark).await {
            Ok(status) => {
                self.mark_pipeline_clean();
                self.note_transaction_status(status);
                outcome
            }
            Err(lost) => Err(match outcome {
                Err(e) if !matches!(e, Error::ConnectionLost(_)) => e,
                _ => lost,
            }),
        }
    }

    /// Run one query through Prepare / (Describe) / Execute, holding the
    /// command lock for the whole pipeline.
    pub async fn query(&self, request: &QueryRequest) -> Result<Vec<Value>> {
        let _command = self.command_lock.lock().await;
        self.ensure_usable()?;

        // Prepare
        let prepared = self
            .stage(
                &[encode_prepare(
                    request.capabilities,
                    request.io_format,
                    request.expected_cardinality,
                    &request.command,
                )],
                |m| matches!(m, ServerMessage::PrepareComplete { .. }),
            )
            .await?;
        let (input_id, output_id) = match prepared {
            ServerMessage::PrepareComplete {
                input_typedesc_id,
                output_typedesc_id,
                ..
            } => (input_typedesc_id, output_typedesc_id),
            other => {
                return Err(Error::UnexpectedMessage {
                    expected: crate::proto::server_tag::PREPARE_COMPLETE,
                    got: other.tag(),
                })
            }
        };

        // Describe, if either descriptor is unknown.
        let (input_codec, output_codec) = if self.registry.contains(&input_id)
            && self.registry.contains(&output_id)
        {
            (
                self.registry.get(&input_id).expect("checked above"),
                self.registry.get(&output_id).expect("checked above"),
            )
        } else {
            let described = self
                .stage(&[encode_describe_statement()], |m| {
                    matches!(m, ServerMessage::CommandDataDescription { .. })
                })
                .await?;
            match described {
                ServerMessage::CommandDataDescription {
                    input_typedesc_id,
                    input_typedesc,
                    output_typedesc_id,
                    output_typedesc,
                    ..
                } => (
                    build_codec(&self.registry, input_typedesc_id, input_typedesc)?,
                    build_codec(&self.registry, output_typedesc_id, output_typedesc)?,
                ),
                other => {
                    return Err(Error::UnexpectedMessage {
                        expected: crate::proto::server_tag::COMMAND_DATA_DESCRIPTION,
                        got: other.tag(),
                    })
                }
            }
        };

        // Execute, collecting Data through a temporary subscriber.
        let arguments = encode_arguments(&input_codec, &request.arguments)?;
        let mut data_sub = self.duplex.subscribe();
        self.stage(
            &[encode_execute(request.capabilities, &arguments)],
            |m| matches!(m, ServerMessage::CommandComplete { .. }),
        )
        .await?;

        let mut rows: Vec<Bytes> = Vec::new();
        for msg in data_sub.drain() {
            if let ServerMessage::Data { chunks } = msg {
                rows.extend(chunks);
            }
        }
        drop(data_sub);

        check_cardinality(request.expected_cardinality, rows.len())?;

        rows.into_iter()
            .map(|payload| output_codec.decode_payload(payload))
            .collect()
    }

    /// Query and convert each row.
    pub async fn query_as<T: FromValue>(&self, request: &QueryRequest) -> Result<Vec<T>> {
        self.query(request)
            .await?
            .into_iter()
            .map(T::from_value)
            .collect()
    }

    /// At most one row.
    pub async fn query_single(&self, request: &QueryRequest) -> Result<Option<Value>> {
        let request = request.clone().cardinality(Cardinality::AtMostOne);
        Ok(self.query(&request).await?.into_iter().next())
    }

    /// Exactly one row.
    pub async fn query_required_single(&self, request: &QueryRequest) -> Result<Value> {
        let request = request.clone().cardinality(Cardinality::One);
        let mut rows = self.query(&request).await?;
        rows.pop().ok_or(Error::CardinalityMismatch {
            expected: Cardinality::One,
            actual: Cardinality::NoResult,
        })
    }

    /// Run a statement for its side effects.
    pub async fn execute(&self, request: &QueryRequest) -> Result<()> {
        self.query(request).await.map(|_| ())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("slot", &self.slot)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
