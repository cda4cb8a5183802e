//! EdgeDB binary wire protocol implementation.
//!
//! This module provides low-level primitives for:
//! - Reading and writing protocol frames ([`framing`])
//! - Big-endian typed packet access ([`packet`])
//! - Parsing server messages and encoding client messages ([`messages`])
//!
//! # Wire Protocol Overview
//!
//! The protocol is message-based; each message consists of:
//! - 1 byte: message type tag
//! - 4 bytes: message length (including these 4 bytes, excluding the tag)
//! - N bytes: message payload
//!
//! All integers are big-endian. Strings and byte fields are u32
//! length-prefixed; UUIDs are 16 bytes in network order.

pub mod framing;
pub mod messages;
pub mod packet;

pub use framing::Frame;
pub use messages::{AuthenticationStatus, ServerMessage};
pub use packet::{PacketReader, PacketWriter};

/// Server-to-client message tags.
pub mod server_tag {
    pub const AUTHENTICATION: u8 = 0x52; // 'R'
    pub const SERVER_KEY_DATA: u8 = 0x4B; // 'K'
    pub const PARAMETER_STATUS: u8 = 0x53; // 'S'
    pub const READY_FOR_COMMAND: u8 = 0x5A; // 'Z'
    pub const COMMAND_COMPLETE: u8 = 0x43; // 'C'
    pub const DATA: u8 = 0x44; // 'D'
    pub const PREPARE_COMPLETE: u8 = 0x31; // '1'
    pub const COMMAND_DATA_DESCRIPTION: u8 = 0x54; // 'T'
    pub const ERROR_RESPONSE: u8 = 0x45; // 'E'
    pub const LOG_MESSAGE: u8 = 0x4C; // 'L'
    pub const DUMP_HEADER: u8 = 0x40; // '@'
    pub const DUMP_BLOCK: u8 = 0x3D; // '='
    pub const RESTORE_READY: u8 = 0x2B; // '+'
}

/// Client-to-server message tags.
pub mod client_tag {
    pub const CLIENT_HANDSHAKE: u8 = 0x56; // 'V'
    pub const SASL_INITIAL_RESPONSE: u8 = 0x70; // 'p'
    pub const SASL_RESPONSE: u8 = 0x72; // 'r'
    pub const PREPARE: u8 = 0x50; // 'P'
    pub const DESCRIBE_STATEMENT: u8 = 0x44; // 'D'
    pub const EXECUTE: u8 = 0x45; // 'E'
    pub const SYNC: u8 = 0x53; // 'S'
    pub const TERMINATE: u8 = 0x58; // 'X'
    pub const DUMP: u8 = 0x3E; // '>'
    pub const RESTORE: u8 = 0x3C; // '<'
    pub const RESTORE_BLOCK: u8 = 0x3D; // '='
    pub const RESTORE_EOF: u8 = 0x2E; // '.'
}

/// Header code carrying the allowed-capabilities bitmask on
/// Prepare/Execute messages.
pub const HEADER_ALLOW_CAPABILITIES: u16 = 0xFF04;

/// Declared bound on a query's result row count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cardinality {
    NoResult = 0x6E,
    AtMostOne = 0x6F,
    One = 0x41,
    Many = 0x6D,
}

impl Cardinality {
    pub fn from_u8(v: u8) -> Option<Cardinality> {
        match v {
            0x6E => Some(Cardinality::NoResult),
            0x6F => Some(Cardinality::AtMostOne),
            0x41 => Some(Cardinality::One),
            0x6D => Some(Cardinality::Many),
            _ => None,
        }
    }
}

/// Requested result encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IoFormat {
    Binary = 0x62,
    Json = 0x6A,
    JsonElements = 0x4A,
}

/// Capability bitmask a query is allowed to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities(pub u64);

impl Capabilities {
    pub const MODIFICATIONS: Capabilities = Capabilities(1 << 0);
    pub const SESSION_CONFIG: Capabilities = Capabilities(1 << 1);
    pub const TRANSACTION: Capabilities = Capabilities(1 << 2);
    pub const DDL: Capabilities = Capabilities(1 << 3);
    pub const PERSISTENT_CONFIG: Capabilities = Capabilities(1 << 4);
    pub const ALL: Capabilities = Capabilities(u64::MAX);

    #[inline]
    pub fn bits(self) -> u64 {
        self.0
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Capabilities::ALL
    }
}

impl std::ops::BitOr for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Capabilities) -> Capabilities {
        Capabilities(self.0 | rhs.0)
    }
}

/// Connection transaction status reported by `ReadyForCommand`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Not inside a transaction block.
    Idle,
    /// Inside a transaction block.
    InTransaction,
    /// Inside a failed transaction block; only ROLLBACK will be accepted.
    InFailedTransaction,
}

impl TransactionStatus {
    pub fn from_u8(v: u8) -> Option<TransactionStatus> {
        match v {
            b'I' => Some(TransactionStatus::Idle),
            b'T' => Some(TransactionStatus::InTransaction),
            b'E' => Some(TransactionStatus::InFailedTransaction),
            _ => None,
        }
    }
}
