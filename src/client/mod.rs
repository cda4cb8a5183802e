//! Pooled client for the binary protocol.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐   acquire/release   ┌──────────────────┐
//! │                 │◄───────────────────│                  │
//! │  Your App       │     PoolHandle      │  Pool            │
//! │                 │────────────────────►│  (semaphore +    │
//! └─────────────────┘                     │   slot map)      │
//!                                         └────────┬─────────┘
//!                                                  │ per connection
//!                                                  ▼
//!                                         ┌──────────────────┐
//!                                         │ Connection       │
//!                                         │  read-loop task  │
//!                                         │  waiter FIFO     │
//!                                         │  send mutex      │
//!                                         └────────┬─────────┘
//!                                                  │ TLS (ALPN
//!                                                  │ edgedb-binary)
//!                                                  ▼
//!                                         ┌──────────────────┐
//!                                         │     Server       │
//!                                         └──────────────────┘
//! ```
//!
//! Each connection runs one background read loop that routes inbound
//! messages to a FIFO of one-shot waiters (the active pipeline step)
//! and to temporary subscribers (row collection, dump streaming). The
//! pool bounds concurrent borrowers with a semaphore sized to
//! `max(configured, server-suggested)` and reclaims connections whose
//! read loop has died.

mod connection;
mod dump;
mod duplex;
mod handshake;
mod pool;
mod query;
mod transaction;

pub use connection::{Connection, SessionState};
pub use handshake::ServerSettings;
pub use pool::{Pool, PoolHandle};
pub use query::QueryRequest;
pub use transaction::{IsolationLevel, Transaction, TransactionOptions};
