//! Connection handshake: protocol hello, SCRAM-SHA-256, and absorption
//! of the server's key and parameters.
//!
//! The handshake runs sequentially on the fresh TLS stream, before the
//! read loop is spawned; once `ReadyForCommand` arrives the stream is
//! handed to the duplexer.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::auth::ScramExchange;
use crate::codec::{build_codec_blob, CodecRegistry, Value};
use crate::config::ConnectConfig;
use crate::error::{Error, Result};
use crate::proto::framing::{read_frame, write_frame};
use crate::proto::messages::{
    encode_client_handshake, encode_sasl_initial_response, encode_sasl_response,
    parse_server_message,
};
use crate::proto::{AuthenticationStatus, PacketReader, ServerMessage};

const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

/// Parameters the server reported during the handshake.
#[derive(Debug, Clone, Default)]
pub struct ServerSettings {
    /// `suggested_pool_concurrency`, as an ASCII decimal.
    pub suggested_pool_concurrency: Option<usize>,
    /// `system_config`, decoded through the codec engine.
    pub system_config: Option<Value>,
    raw: HashMap<String, Bytes>,
}

impl ServerSettings {
    pub fn raw(&self, name: &str) -> Option<&Bytes> {
        self.raw.get(name)
    }

    fn absorb(&mut self, name: String, value: Bytes, registry: &CodecRegistry) {
        match name.as_str() {
            "suggested_pool_concurrency" => {
                match std::str::from_utf8(&value).ok().and_then(|s| s.trim().parse().ok()) {
                    Some(n) => self.suggested_pool_concurrency = Some(n),
                    None => tracing::warn!("unparsable suggested_pool_concurrency"),
                }
            }
            "system_config" => match decode_system_config(&value, registry) {
                Ok(config) => self.system_config = Some(config),
                Err(e) => tracing::warn!(error = %e, "failed to decode system_config"),
            },
            _ => {}
        }
        self.raw.insert(name, value);
    }
}

/// `system_config` is a descriptor-prefixed value: a length-prefixed
/// descriptor blob followed by a length-prefixed encoded value.
fn decode_system_config(value: &Bytes, registry: &CodecRegistry) -> Result<Value> {
    let mut r = PacketReader::new(value.clone());
    let descriptors = r.get_len_bytes()?;
    let data = r.get_len_bytes()?;
    let codec = build_codec_blob(registry, descriptors)?;
    codec.decode_payload(data)
}

pub(crate) struct HandshakeOutcome {
    pub server_key: [u8; 32],
    pub settings: ServerSettings,
}

/// Drive the handshake to `ReadyForCommand`.
pub(crate) async fn authenticate<S>(
    stream: &mut S,
    config: &ConnectConfig,
    registry: &CodecRegistry,
) -> Result<HandshakeOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (tag, payload) = encode_client_handshake(&config.user, &config.database);
    write_frame(stream, tag, &payload).await?;

    let mut server_key: Option<[u8; 32]> = None;
    let mut settings = ServerSettings::default();
    let mut authenticated = false;

    loop {
        match next_message(stream, config).await? {
            ServerMessage::Authentication(AuthenticationStatus::SaslRequired { methods }) => {
                if methods.first().map(String::as_str) != Some(SCRAM_SHA_256) {
                    return Err(Error::Auth(format!(
                        "unsupported auth methods offered: {methods:?}"
                    )));
                }
                sasl_exchange(stream, config).await?;
            }
            ServerMessage::Authentication(AuthenticationStatus::Ok) => {
                authenticated = true;
            }
            ServerMessage::Authentication(other) => {
                return Err(Error::Auth(format!(
                    "unexpected authentication message: {other:?}"
                )));
            }
            ServerMessage::ServerKeyData { key } => server_key = Some(key),
            ServerMessage::ParameterStatus { name, value } => {
                settings.absorb(name, value, registry);
            }
            ServerMessage::LogMessage { code, text, .. } => {
                tracing::info!(code, "server: {text}");
            }
            ServerMessage::ErrorResponse(err) => {
                return Err(Error::Auth(format!(
                    "server rejected handshake: {}",
                    err.message
                )));
            }
            ServerMessage::ReadyForCommand { .. } => {
                if !authenticated {
                    return Err(Error::Auth(
                        "server became ready without authenticating us".into(),
                    ));
                }
                let server_key = server_key.ok_or_else(|| {
                    Error::Protocol("handshake completed without ServerKeyData".into())
                })?;
                return Ok(HandshakeOutcome {
                    server_key,
                    settings,
                });
            }
            other => {
                tracing::debug!(
                    tag = format!("{:#04x}", other.tag()),
                    "ignoring message during handshake"
                );
            }
        }
    }
}

/// Client-driven SCRAM-SHA-256: initial response, server-first,
/// client-final, server-final.
async fn sasl_exchange<S>(stream: &mut S, config: &ConnectConfig) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let scram = ScramExchange::new(&config.user);

    let (tag, payload) =
        encode_sasl_initial_response(SCRAM_SHA_256, scram.client_first().as_bytes());
    write_frame(stream, tag, &payload).await?;

    let server_first = match expect_sasl(stream, config).await? {
        AuthenticationStatus::SaslContinue { data } => utf8(&data, "server-first")?,
        other => {
            return Err(Error::Auth(format!(
                "expected SASLContinue, got {other:?}"
            )))
        }
    };

    let (client_final, check) = scram.finalize(&config.password, &server_first)?;
    let (tag, payload) = encode_sasl_response(client_final.as_bytes());
    write_frame(stream, tag, &payload).await?;

    let server_final = match expect_sasl(stream, config).await? {
        AuthenticationStatus::SaslFinal { data } => utf8(&data, "server-final")?,
        other => return Err(Error::Auth(format!("expected SASLFinal, got {other:?}"))),
    };
    check.verify(&server_final)
}

async fn expect_sasl<S>(stream: &mut S, config: &ConnectConfig) -> Result<AuthenticationStatus>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        match next_message(stream, config).await? {
            ServerMessage::Authentication(status) => return Ok(status),
            ServerMessage::ErrorResponse(err) => {
                return Err(Error::Auth(format!("SASL rejected: {}", err.message)))
            }
            other => {
                tracing::debug!(
                    tag = format!("{:#04x}", other.tag()),
                    "ignoring message during SASL"
                );
            }
        }
    }
}

/// Read and parse the next known message, under the SASL step timeout.
async fn next_message<S>(stream: &mut S, config: &ConnectConfig) -> Result<ServerMessage>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::time::timeout(config.sasl_timeout, read_frame(stream))
            .await
            .map_err(|_| Error::Timeout("handshake step exceeded deadline".into()))??;
        match parse_server_message(frame.tag, frame.payload)? {
            Some(msg) => return Ok(msg),
            None => {
                tracing::debug!(
                    tag = format!("{:#04x}", frame.tag),
                    "skipping unknown message during handshake"
                );
            }
        }
    }
}

fn utf8(data: &Bytes, what: &str) -> Result<String> {
    std::str::from_utf8(data)
        .map(str::to_owned)
        .map_err(|e| Error::Auth(format!("{what} message is not utf-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::PacketWriter;

    #[test]
    fn absorbs_pool_concurrency_parameter() {
        let registry = CodecRegistry::new();
        let mut settings = ServerSettings::default();
        settings.absorb(
            "suggested_pool_concurrency".into(),
            Bytes::from_static(b"12"),
            &registry,
        );
        assert_eq!(settings.suggested_pool_concurrency, Some(12));
        assert!(settings.raw("suggested_pool_concurrency").is_some());

        settings.absorb(
            "suggested_pool_concurrency".into(),
            Bytes::from_static(b"not a number"),
            &registry,
        );
        // Unparsable update keeps the previous value.
        assert_eq!(settings.suggested_pool_concurrency, Some(12));
    }

    #[test]
    fn decodes_system_config_value() {
        use crate::codec::ScalarKind;

        let registry = CodecRegistry::new();

        // Descriptor blob: single base scalar (str).
        let mut desc = PacketWriter::new();
        desc.put_u8(2);
        desc.put_uuid(ScalarKind::Str.well_known_id());

        let mut blob = PacketWriter::new();
        blob.put_len_bytes(&desc.finish());
        blob.put_len_bytes(b"default");

        let mut settings = ServerSettings::default();
        settings.absorb("system_config".into(), blob.finish(), &registry);
        assert_eq!(settings.system_config, Some(Value::Str("default".into())));
    }
}
