//! # edgewire
//!
//! A Tokio-based client for the EdgeDB binary protocol: pooled
//! connections over TLS, SCRAM-SHA-256 authentication, a
//! descriptor-driven codec engine, and streaming dump/restore.
//!
//! ## Features
//!
//! - **Async/await** - Built on Tokio for high-performance async I/O
//! - **TLS always** - rustls with ALPN `edgedb-binary` and configurable
//!   certificate verification
//! - **SCRAM-SHA-256** - Secure password authentication
//! - **Typed results** - Server type descriptors drive a cached codec
//!   tree; rows decode to [`Value`] or your own types via [`FromValue`]
//! - **Pooling** - Bounded connection pool with transaction retry
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgewire::{ConnectConfig, Pool, QueryRequest};
//!
//! # async fn example() -> edgewire::Result<()> {
//! let config = ConnectConfig {
//!     host: "localhost".into(),
//!     port: 5656,
//!     user: "edgedb".into(),
//!     password: "secret".into(),
//!     database: "main".into(),
//!     ..Default::default()
//! };
//!
//! let pool = Pool::new(config);
//!
//! let greeting: String = pool
//!     .query_required_single(&QueryRequest::new("select 'hello'"))
//!     .await?;
//! println!("{greeting}");
//!
//! let sum: Vec<i64> = pool
//!     .query_as(
//!         &QueryRequest::new("select <int64>$x + <int64>$y")
//!             .argument("x", 2i64)
//!             .argument("y", 3i64),
//!     )
//!     .await?;
//! assert_eq!(sum, vec![5]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Transactions
//!
//! ```rust,no_run
//! # use edgewire::{Pool, QueryRequest};
//! # async fn example(pool: Pool) -> edgewire::Result<()> {
//! let n: i64 = pool
//!     .transaction(|tx| async move {
//!         tx.query_required_single(&QueryRequest::new("select count(Ticket)"))
//!             .await
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! Serialization conflicts and transient connection loss retry the
//! callback automatically, so it must be idempotent apart from its
//! transactional effects.

#![warn(
    clippy::all,
    clippy::cargo,
    clippy::perf,
    clippy::style,
    clippy::correctness,
    clippy::suspicious
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::multiple_crate_versions
)]

pub mod auth;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod proto;
pub mod tls;

pub use client::{
    Connection, IsolationLevel, Pool, PoolHandle, QueryRequest, ServerSettings, SessionState,
    Transaction, TransactionOptions,
};
pub use codec::{CodecRegistry, FromValue, Value};
pub use config::{ConnectConfig, TlsConfig, TlsSecurity};
pub use error::{Error, Result};
pub use proto::{Capabilities, Cardinality, IoFormat};
