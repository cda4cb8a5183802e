//! Authentication for server connections.
//!
//! The protocol authenticates passwords exclusively through
//! **SCRAM-SHA-256** (RFC 5802 / RFC 7677): a salted challenge/response
//! exchange that never transmits the password and authenticates the
//! server back to the client via its signature over the exchange
//! transcript.
//!
//! # Example
//!
//! ```ignore
//! use edgewire::auth::ScramExchange;
//!
//! let scram = ScramExchange::new("edgedb");
//!
//! // Send scram.client_first() inside AuthenticationSASLInitialResponse.
//! // After AuthenticationSASLContinue arrives with server-first:
//! let (client_final, check) = scram.finalize("secret", &server_first)?;
//!
//! // Send client_final inside AuthenticationSASLResponse.
//! // After AuthenticationSASLFinal arrives with server-final:
//! check.verify(&server_final)?;
//! ```
//!
//! Other SASL mechanisms the server might list (e.g.
//! `SCRAM-SHA-256-PLUS`) are not supported; the handshake requires
//! plain `SCRAM-SHA-256` to be offered first.

pub mod scram;

pub use scram::{ScramExchange, ServerCheck};
