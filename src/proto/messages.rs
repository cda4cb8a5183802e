//! Typed views of protocol messages.
//!
//! Server frames parse into [`ServerMessage`]; client messages are built
//! as payload buffers by the `encode_*` functions and framed by
//! [`framing`](super::framing). Dump header and block payloads stay
//! opaque - the client only moves them between the wire and the dump
//! container.

use bytes::Bytes;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::proto::{
    client_tag, server_tag, Capabilities, Cardinality, IoFormat, PacketReader, PacketWriter,
    TransactionStatus, HEADER_ALLOW_CAPABILITIES,
};

/// The authentication phase the server advertises in an 'R' message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationStatus {
    Ok,
    SaslRequired { methods: Vec<String> },
    SaslContinue { data: Bytes },
    SaslFinal { data: Bytes },
}

/// Server error response body.
#[derive(Debug, Clone)]
pub struct ServerError {
    pub severity: u8,
    pub code: u32,
    pub message: String,
    pub attributes: Vec<(u16, Bytes)>,
}

impl From<ServerError> for Error {
    fn from(e: ServerError) -> Error {
        Error::Server {
            severity: e.severity,
            code: e.code,
            message: e.message,
            attributes: e.attributes,
        }
    }
}

/// A parsed server-to-client message.
#[derive(Debug, Clone)]
pub enum ServerMessage {
    Authentication(AuthenticationStatus),
    ServerKeyData {
        key: [u8; 32],
    },
    ParameterStatus {
        name: String,
        value: Bytes,
    },
    ReadyForCommand {
        transaction_status: TransactionStatus,
    },
    CommandComplete {
        status: String,
    },
    Data {
        chunks: Vec<Bytes>,
    },
    PrepareComplete {
        cardinality: Cardinality,
        input_typedesc_id: Uuid,
        output_typedesc_id: Uuid,
    },
    CommandDataDescription {
        result_cardinality: Cardinality,
        input_typedesc_id: Uuid,
        input_typedesc: Bytes,
        output_typedesc_id: Uuid,
        output_typedesc: Bytes,
    },
    ErrorResponse(ServerError),
    LogMessage {
        severity: u8,
        code: u32,
        text: String,
    },
    DumpHeader {
        raw: Bytes,
    },
    DumpBlock {
        raw: Bytes,
    },
    RestoreReady {
        jobs: u16,
    },
}

impl ServerMessage {
    pub fn tag(&self) -> u8 {
        match self {
            ServerMessage::Authentication(_) => server_tag::AUTHENTICATION,
            ServerMessage::ServerKeyData { .. } => server_tag::SERVER_KEY_DATA,
            ServerMessage::ParameterStatus { .. } => server_tag::PARAMETER_STATUS,
            ServerMessage::ReadyForCommand { .. } => server_tag::READY_FOR_COMMAND,
            ServerMessage::CommandComplete { .. } => server_tag::COMMAND_COMPLETE,
            ServerMessage::Data { .. } => server_tag::DATA,
            ServerMessage::PrepareComplete { .. } => server_tag::PREPARE_COMPLETE,
            ServerMessage::CommandDataDescription { .. } => server_tag::COMMAND_DATA_DESCRIPTION,
            ServerMessage::ErrorResponse(_) => server_tag::ERROR_RESPONSE,
            ServerMessage::LogMessage { .. } => server_tag::LOG_MESSAGE,
            ServerMessage::DumpHeader { .. } => server_tag::DUMP_HEADER,
            ServerMessage::DumpBlock { .. } => server_tag::DUMP_BLOCK,
            ServerMessage::RestoreReady { .. } => server_tag::RESTORE_READY,
        }
    }
}

fn cardinality(v: u8) -> Result<Cardinality> {
    Cardinality::from_u8(v).ok_or_else(|| Error::Protocol(format!("unknown cardinality: {v:#04x}")))
}

/// Parse one server frame. Returns `Ok(None)` for tags this client does
/// not know, which the caller logs and skips (protocol extension
/// tolerance). After a successful parse any unconsumed payload bytes are
/// reported at warning level; that signals a decoder bug, not a fatal
/// condition.
pub fn parse_server_message(tag: u8, payload: Bytes) -> Result<Option<ServerMessage>> {
    let mut r = PacketReader::new(payload);
    let msg = match tag {
        server_tag::AUTHENTICATION => {
            let status = match r.get_u32()? {
                0 => AuthenticationStatus::Ok,
                10 => {
                    let n = r.get_u32()? as usize;
                    let mut methods = Vec::with_capacity(n);
                    for _ in 0..n {
                        methods.push(r.get_str()?);
                    }
                    AuthenticationStatus::SaslRequired { methods }
                }
                11 => AuthenticationStatus::SaslContinue {
                    data: r.get_len_bytes()?,
                },
                12 => AuthenticationStatus::SaslFinal {
                    data: r.get_len_bytes()?,
                },
                other => {
                    return Err(Error::Protocol(format!(
                        "unknown authentication status: {other}"
                    )))
                }
            };
            ServerMessage::Authentication(status)
        }
        server_tag::SERVER_KEY_DATA => {
            let raw = r.get_bytes(32)?;
            let mut key = [0u8; 32];
            key.copy_from_slice(&raw);
            ServerMessage::ServerKeyData { key }
        }
        server_tag::PARAMETER_STATUS => ServerMessage::ParameterStatus {
            name: r.get_str()?,
            value: r.get_len_bytes()?,
        },
        server_tag::READY_FOR_COMMAND => {
            let _headers = r.get_headers()?;
            let status = r.get_u8()?;
            let transaction_status = TransactionStatus::from_u8(status).ok_or_else(|| {
                Error::Protocol(format!("unknown transaction status: {status:#04x}"))
            })?;
            ServerMessage::ReadyForCommand { transaction_status }
        }
        server_tag::COMMAND_COMPLETE => {
            let _headers = r.get_headers()?;
            ServerMessage::CommandComplete {
                status: r.get_str()?,
            }
        }
        server_tag::DATA => {
            let n = r.get_u16()? as usize;
            let mut chunks = Vec::with_capacity(n);
            for _ in 0..n {
                chunks.push(r.get_len_bytes()?);
            }
            ServerMessage::Data { chunks }
        }
        server_tag::PREPARE_COMPLETE => {
            let _headers = r.get_headers()?;
            ServerMessage::PrepareComplete {
                cardinality: cardinality(r.get_u8()?)?,
                input_typedesc_id: r.get_uuid()?,
                output_typedesc_id: r.get_uuid()?,
            }
        }
        server_tag::COMMAND_DATA_DESCRIPTION => {
            let _headers = r.get_headers()?;
            ServerMessage::CommandDataDescription {
                result_cardinality: cardinality(r.get_u8()?)?,
                input_typedesc_id: r.get_uuid()?,
                input_typedesc: r.get_len_bytes()?,
                output_typedesc_id: r.get_uuid()?,
                output_typedesc: r.get_len_bytes()?,
            }
        }
        server_tag::ERROR_RESPONSE => {
            let severity = r.get_u8()?;
            let code = r.get_u32()?;
            let message = r.get_str()?;
            let attributes = r.get_headers()?;
            ServerMessage::ErrorResponse(ServerError {
                severity,
                code,
                message,
                attributes,
            })
        }
        server_tag::LOG_MESSAGE => {
            let severity = r.get_u8()?;
            let code = r.get_u32()?;
            let text = r.get_str()?;
            let _attributes = r.get_headers()?;
            ServerMessage::LogMessage {
                severity,
                code,
                text,
            }
        }
        server_tag::DUMP_HEADER => ServerMessage::DumpHeader { raw: r.rest() },
        server_tag::DUMP_BLOCK => ServerMessage::DumpBlock { raw: r.rest() },
        server_tag::RESTORE_READY => {
            let _headers = r.get_headers()?;
            ServerMessage::RestoreReady { jobs: r.get_u16()? }
        }
        _ => return Ok(None),
    };

    if r.remaining() > 0 {
        tracing::warn!(
            tag = format!("{tag:#04x}"),
            trailing = r.remaining(),
            "message decoded with trailing bytes"
        );
    }
    Ok(Some(msg))
}

/// ClientHandshake: protocol 1.0 with `user` and `database` params.
pub fn encode_client_handshake(user: &str, database: &str) -> (u8, Bytes) {
    let mut w = PacketWriter::new();
    w.put_u16(1); // major
    w.put_u16(0); // minor
    w.put_u16(2); // params
    w.put_str("user");
    w.put_str(user);
    w.put_str("database");
    w.put_str(database);
    w.put_u16(0); // extensions
    (client_tag::CLIENT_HANDSHAKE, w.finish())
}

/// AuthenticationSASLInitialResponse: method name plus client-first data.
pub fn encode_sasl_initial_response(method: &str, data: &[u8]) -> (u8, Bytes) {
    let mut w = PacketWriter::new();
    w.put_str(method);
    w.put_len_bytes(data);
    (client_tag::SASL_INITIAL_RESPONSE, w.finish())
}

/// AuthenticationSASLResponse: client-final data.
pub fn encode_sasl_response(data: &[u8]) -> (u8, Bytes) {
    let mut w = PacketWriter::new();
    w.put_len_bytes(data);
    (client_tag::SASL_RESPONSE, w.finish())
}

/// Prepare: capabilities header, io format, expected cardinality,
/// unnamed statement, command text.
pub fn encode_prepare(
    capabilities: Capabilities,
    io_format: IoFormat,
    expected_cardinality: Cardinality,
    command: &str,
) -> (u8, Bytes) {
    let mut w = PacketWriter::new();
    let caps = capabilities.bits().to_be_bytes();
    w.put_headers(&[(HEADER_ALLOW_CAPABILITIES, &caps)]);
    w.put_u8(io_format as u8);
    w.put_u8(expected_cardinality as u8);
    w.put_len_bytes(b""); // statement name
    w.put_str(command);
    (client_tag::PREPARE, w.finish())
}

/// DescribeStatement with the DataDescription aspect.
pub fn encode_describe_statement() -> (u8, Bytes) {
    let mut w = PacketWriter::new();
    w.put_headers(&[]);
    w.put_u8(0x54); // aspect: DataDescription
    w.put_len_bytes(b""); // statement name
    (client_tag::DESCRIBE_STATEMENT, w.finish())
}

/// Execute the prepared (unnamed) statement with an encoded argument
/// blob.
pub fn encode_execute(capabilities: Capabilities, arguments: &[u8]) -> (u8, Bytes) {
    let mut w = PacketWriter::new();
    let caps = capabilities.bits().to_be_bytes();
    w.put_headers(&[(HEADER_ALLOW_CAPABILITIES, &caps)]);
    w.put_len_bytes(b""); // statement name
    w.put_len_bytes(arguments);
    (client_tag::EXECUTE, w.finish())
}

pub fn encode_sync() -> (u8, Bytes) {
    (client_tag::SYNC, Bytes::new())
}

pub fn encode_terminate() -> (u8, Bytes) {
    (client_tag::TERMINATE, Bytes::new())
}

pub fn encode_dump() -> (u8, Bytes) {
    let mut w = PacketWriter::new();
    w.put_headers(&[]);
    (client_tag::DUMP, w.finish())
}

/// Restore: single-job restore carrying the dump header blob.
pub fn encode_restore(header: &[u8]) -> (u8, Bytes) {
    let mut w = PacketWriter::new();
    w.put_headers(&[]);
    w.put_u16(1); // jobs
    w.put_raw(header);
    (client_tag::RESTORE, w.finish())
}

pub fn encode_restore_block(block: &[u8]) -> (u8, Bytes) {
    let mut w = PacketWriter::new();
    w.put_raw(block);
    (client_tag::RESTORE_BLOCK, w.finish())
}

pub fn encode_restore_eof() -> (u8, Bytes) {
    (client_tag::RESTORE_EOF, Bytes::new())
}
