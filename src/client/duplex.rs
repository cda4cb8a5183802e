//! The wire duplexer: one background read loop per connection, routing
//! inbound messages to persistent subscribers and a FIFO of one-shot
//! predicate waiters, with a mutex serializing outbound frames.
//!
//! Ordering guarantees: messages are dispatched in arrival order;
//! subscribers see every message in registration order before the
//! waiter queue is consulted; `duplex_and_sync` registers its waiter
//! before the request bytes leave, so the reply cannot be missed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::{Error, Result};
use crate::proto::framing::{read_frame, write_frame};
use crate::proto::messages::parse_server_message;
use crate::proto::{ServerMessage, TransactionStatus};

type Predicate = Box<dyn Fn(&ServerMessage) -> bool + Send>;

struct Waiter {
    predicate: Predicate,
    tx: oneshot::Sender<Result<ServerMessage>>,
}

struct Shared {
    waiters: Mutex<VecDeque<Waiter>>,
    subscribers: Mutex<Vec<(u64, mpsc::UnboundedSender<ServerMessage>)>>,
    next_subscriber: AtomicU64,
    closed: AtomicBool,
    /// Bumped on every ReadyForCommand; carries the transaction status.
    ready: watch::Sender<(u64, TransactionStatus)>,
}

/// Handle to one connection's wire loop.
pub(crate) struct Duplexer<W> {
    shared: Arc<Shared>,
    writer: tokio::sync::Mutex<W>,
    ready_rx: watch::Receiver<(u64, TransactionStatus)>,
}

/// A registered persistent subscriber; deregisters on drop.
pub(crate) struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<ServerMessage>,
    shared: Arc<Shared>,
}

impl Subscription {
    /// Drain messages delivered so far without waiting.
    pub(crate) fn drain(&mut self) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            out.push(msg);
        }
        out
    }

    /// Wait for the next delivered message; `None` when the read loop
    /// is gone.
    pub(crate) async fn recv(&mut self) -> Option<ServerMessage> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut subs = self.shared.subscribers.lock().expect("subscriber list poisoned");
        subs.retain(|(id, _)| *id != self.id);
    }
}

impl<W: AsyncWrite + Unpin + Send> Duplexer<W> {
    /// Create the duplexer and spawn its read loop. `slot` is reported
    /// on `disconnect_tx` when the loop exits, however it exits.
    pub(crate) fn start<R>(
        reader: R,
        writer: W,
        slot: u64,
        disconnect_tx: mpsc::UnboundedSender<u64>,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (ready_tx, ready_rx) = watch::channel((0, TransactionStatus::Idle));
        let shared = Arc::new(Shared {
            waiters: Mutex::new(VecDeque::new()),
            subscribers: Mutex::new(Vec::new()),
            next_subscriber: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            ready: ready_tx,
        });

        let loop_shared = shared.clone();
        tokio::spawn(async move {
            let reason = read_loop(reader, &loop_shared).await;
            loop_shared.closed.store(true, Ordering::SeqCst);
            fail_pending(&loop_shared, &reason);
            tracing::debug!(slot, %reason, "connection read loop exited");
            let _ = disconnect_tx.send(slot);
        });

        Self {
            shared,
            writer: tokio::sync::Mutex::new(writer),
            ready_rx,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Snapshot of the ReadyForCommand counter, for [`Self::wait_ready`].
    pub(crate) fn ready_mark(&self) -> u64 {
        self.ready_rx.borrow().0
    }

    /// Wait until the server has sent a ReadyForCommand after `mark`.
    pub(crate) async fn wait_ready(&self, mark: u64) -> Result<TransactionStatus> {
        let mut rx = self.ready_rx.clone();
        loop {
            {
                let seen = rx.borrow_and_update();
                if seen.0 > mark {
                    return Ok(seen.1);
                }
            }
            if rx.changed().await.is_err() {
                return Err(Error::ConnectionLost("read loop gone".into()));
            }
        }
    }

    /// Register a persistent subscriber. It receives every subsequent
    /// inbound message until dropped.
    pub(crate) fn subscribe(&self) -> Subscription {
        let id = self.shared.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared
            .subscribers
            .lock()
            .expect("subscriber list poisoned")
            .push((id, tx));
        Subscription {
            id,
            rx,
            shared: self.shared.clone(),
        }
    }

    /// Write frames back-to-back under the send mutex.
    pub(crate) async fn send(&self, messages: &[(u8, Bytes)]) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionLost("connection is closed".into()));
        }
        let mut wr = self.writer.lock().await;
        for (tag, payload) in messages {
            write_frame(&mut *wr, *tag, payload).await?;
        }
        Ok(())
    }

    /// Register a one-shot waiter for the next message matching
    /// `predicate` (or the next ErrorResponse, which completes it with
    /// the server error), then send `messages` followed by Sync, then
    /// await the outcome.
    pub(crate) async fn duplex_and_sync<P>(
        &self,
        messages: &[(u8, Bytes)],
        predicate: P,
    ) -> Result<ServerMessage>
    where
        P: Fn(&ServerMessage) -> bool + Send + 'static,
    {
        if self.is_closed() {
            return Err(Error::ConnectionLost("connection is closed".into()));
        }

        let rx = self.register_waiter(predicate);

        let mut with_sync = messages.to_vec();
        with_sync.push(crate::proto::messages::encode_sync());
        self.send(&with_sync).await?;

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::ConnectionLost("read loop gone".into())),
        }
    }

    /// Await a message matching `predicate` without sending anything.
    pub(crate) async fn wait_for<P>(&self, predicate: P) -> Result<ServerMessage>
    where
        P: Fn(&ServerMessage) -> bool + Send + 'static,
    {
        if self.is_closed() {
            return Err(Error::ConnectionLost("connection is closed".into()));
        }
        let rx = self.register_waiter(predicate);
        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::ConnectionLost("read loop gone".into())),
        }
    }

    fn register_waiter<P>(&self, predicate: P) -> oneshot::Receiver<Result<ServerMessage>>
    where
        P: Fn(&ServerMessage) -> bool + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.shared
            .waiters
            .lock()
            .expect("waiter queue poisoned")
            .push_back(Waiter {
                predicate: Box::new(predicate),
                tx,
            });
        // The read loop may have drained the queue and exited between
        // the caller's closed check and the push; sweep again so the
        // waiter cannot hang.
        if self.is_closed() {
            fail_pending(&self.shared, &Error::ConnectionLost("read loop gone".into()));
        }
        rx
    }

    /// Graceful close: best-effort Terminate, then shut the stream down.
    /// The read loop notices EOF and reports the disconnect.
    pub(crate) async fn close(&self) {
        let mut wr = self.writer.lock().await;
        let (tag, payload) = crate::proto::messages::encode_terminate();
        let _ = write_frame(&mut *wr, tag, &payload).await;
        let _ = wr.shutdown().await;
    }
}

async fn read_loop<R>(mut reader: R, shared: &Shared) -> Error
where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = match read_frame(&mut reader).await {
            Ok(frame) => frame,
            Err(e) => return Error::ConnectionLost(e.to_string()),
        };

        let msg = match parse_server_message(frame.tag, frame.payload) {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                tracing::error!(
                    tag = format!("{:#04x}", frame.tag),
                    "skipping message with unknown type tag"
                );
                continue;
            }
            Err(e) => return e,
        };

        if let ServerMessage::LogMessage {
            severity,
            code,
            ref text,
        } = msg
        {
            // 0x14 debug, 0x28 info, 0x3C notice, 0x50 warning
            if severity >= 0x50 {
                tracing::warn!(code, "server: {text}");
            } else {
                tracing::info!(code, "server: {text}");
            }
            continue;
        }

        dispatch(shared, msg);
    }
}

fn dispatch(shared: &Shared, msg: ServerMessage) {
    // Subscribers first, in registration order; a subscriber error never
    // propagates into the loop, the dead entry is just pruned.
    {
        let mut subs = shared.subscribers.lock().expect("subscriber list poisoned");
        subs.retain(|(_, tx)| tx.send(msg.clone()).is_ok());
    }

    // ReadyForCommand feeds the ready watch, never a waiter: it marks
    // the end of a pipeline even when an error already completed the
    // waiter that was in flight.
    if let ServerMessage::ReadyForCommand { transaction_status } = msg {
        shared.ready.send_modify(|(seq, status)| {
            *seq += 1;
            *status = transaction_status;
        });
        return;
    }

    let mut waiters = shared.waiters.lock().expect("waiter queue poisoned");

    if let ServerMessage::ErrorResponse(err) = msg {
        match waiters.pop_front() {
            Some(waiter) => {
                let _ = waiter.tx.send(Err(err.into()));
            }
            None => {
                let e: Error = err.into();
                tracing::warn!(error = %e, "server error with no waiter pending");
            }
        }
        return;
    }

    let matched = waiters.iter().position(|w| (w.predicate)(&msg));
    match matched {
        Some(idx) => {
            let waiter = waiters.remove(idx).expect("index in range");
            if waiter.tx.send(Ok(msg)).is_err() {
                tracing::debug!("waiter dropped before completion");
            }
        }
        None => {
            tracing::debug!(tag = format!("{:#04x}", msg.tag()), "unclaimed message");
        }
    }
}

fn fail_pending(shared: &Shared, reason: &Error) {
    let mut waiters = shared.waiters.lock().expect("waiter queue poisoned");
    for waiter in waiters.drain(..) {
        let _ = waiter
            .tx
            .send(Err(Error::ConnectionLost(reason.to_string())));
    }
    drop(waiters);
    // Dropping the senders wakes subscribers blocked in recv().
    shared
        .subscribers
        .lock()
        .expect("subscriber list poisoned")
        .clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::framing::encode_frame;
    use crate::proto::{server_tag, PacketWriter};
    use bytes::BytesMut;
    use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

    type TestDuplexer = Duplexer<WriteHalf<DuplexStream>>;

    fn start_pair(slot: u64) -> (TestDuplexer, DuplexStream, mpsc::UnboundedReceiver<u64>) {
        let (server, client) = tokio::io::duplex(16 * 1024);
        let (r, w): (ReadHalf<DuplexStream>, WriteHalf<DuplexStream>) = tokio::io::split(client);
        let (disc_tx, disc_rx) = mpsc::unbounded_channel();
        (Duplexer::start(r, w, slot, disc_tx), server, disc_rx)
    }

    fn ready_frame() -> BytesMut {
        let mut w = PacketWriter::new();
        w.put_u16(0);
        w.put_u8(b'I');
        let mut buf = BytesMut::new();
        encode_frame(&mut buf, server_tag::READY_FOR_COMMAND, &w.finish());
        buf
    }

    fn command_complete_frame() -> BytesMut {
        let mut w = PacketWriter::new();
        w.put_u16(0);
        w.put_str("SELECT");
        let mut buf = BytesMut::new();
        encode_frame(&mut buf, server_tag::COMMAND_COMPLETE, &w.finish());
        buf
    }

    #[tokio::test]
    async fn waiter_matches_and_ready_watch_advances() {
        let (duplex, mut server, _disc) = start_pair(0);
        let mark = duplex.ready_mark();

        let mut inbound = command_complete_frame();
        inbound.extend_from_slice(&ready_frame());
        server.write_all(&inbound).await.unwrap();

        let msg = duplex
            .wait_for(|m| matches!(m, ServerMessage::CommandComplete { .. }))
            .await
            .unwrap();
        assert!(matches!(msg, ServerMessage::CommandComplete { .. }));
        let status = duplex.wait_ready(mark).await.unwrap();
        assert_eq!(status, TransactionStatus::Idle);
    }

    #[tokio::test]
    async fn error_response_completes_front_waiter() {
        let (duplex, mut server, _disc) = start_pair(0);

        let mut w = PacketWriter::new();
        w.put_u8(120);
        w.put_u32(0x0400_0000);
        w.put_str("boom");
        w.put_headers(&[]);
        let mut inbound = BytesMut::new();
        encode_frame(&mut inbound, server_tag::ERROR_RESPONSE, &w.finish());
        server.write_all(&inbound).await.unwrap();

        let err = duplex
            .wait_for(|m| matches!(m, ServerMessage::CommandComplete { .. }))
            .await
            .unwrap_err();
        assert!(err.is_server());
    }

    #[tokio::test]
    async fn eof_fails_pending_waiters_and_reports_slot() {
        let (duplex, server, mut disc_rx) = start_pair(7);
        drop(server); // immediate EOF

        let err = duplex
            .wait_for(|m| matches!(m, ServerMessage::CommandComplete { .. }))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionLost(_)));
        assert_eq!(disc_rx.recv().await, Some(7));
        assert!(duplex.is_closed());
    }

    #[tokio::test]
    async fn subscribers_see_messages_delivered_before_the_waiter() {
        let (duplex, mut server, _disc) = start_pair(0);
        let mut sub = duplex.subscribe();
        let mark = duplex.ready_mark();

        let mut data = PacketWriter::new();
        data.put_u16(1);
        data.put_len_bytes(b"row");
        let mut inbound = BytesMut::new();
        encode_frame(&mut inbound, server_tag::DATA, &data.finish());
        inbound.extend_from_slice(&command_complete_frame());
        inbound.extend_from_slice(&ready_frame());
        server.write_all(&inbound).await.unwrap();

        duplex
            .wait_for(|m| matches!(m, ServerMessage::CommandComplete { .. }))
            .await
            .unwrap();
        duplex.wait_ready(mark).await.unwrap();

        let seen = sub.drain();
        assert!(seen
            .iter()
            .any(|m| matches!(m, ServerMessage::Data { .. })));
    }

    #[tokio::test]
    async fn unknown_tags_are_skipped() {
        let (duplex, mut server, _disc) = start_pair(0);

        let mut inbound = BytesMut::new();
        encode_frame(&mut inbound, 0x7E, b"future extension");
        inbound.extend_from_slice(&command_complete_frame());
        server.write_all(&inbound).await.unwrap();

        let msg = duplex
            .wait_for(|m| matches!(m, ServerMessage::CommandComplete { .. }))
            .await
            .unwrap();
        assert!(matches!(msg, ServerMessage::CommandComplete { .. }));
    }
}
