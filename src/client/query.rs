//! Query requests and argument encoding.

use bytes::Bytes;

use crate::codec::{Codec, Value};
use crate::error::{Error, Result};
use crate::proto::{Capabilities, Cardinality, IoFormat, PacketWriter};

/// One parametric query: text, named arguments, declared cardinality,
/// capability mask, and result encoding.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub command: String,
    pub arguments: Vec<(String, Value)>,
    pub expected_cardinality: Cardinality,
    pub capabilities: Capabilities,
    pub io_format: IoFormat,
}

impl QueryRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            arguments: Vec::new(),
            expected_cardinality: Cardinality::Many,
            capabilities: Capabilities::ALL,
            io_format: IoFormat::Binary,
        }
    }

    pub fn argument(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.push((name.into(), value.into()));
        self
    }

    pub fn cardinality(mut self, expected: Cardinality) -> Self {
        self.expected_cardinality = expected;
        self
    }

    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn io_format(mut self, io_format: IoFormat) -> Self {
        self.io_format = io_format;
        self
    }
}

/// Encode the argument map through the query's input codec.
///
/// The input codec is a named tuple (or the null codec for argument-free
/// queries); the codec enforces that every field is supplied by name and
/// nothing extra is.
pub(crate) fn encode_arguments(input: &Codec, arguments: &[(String, Value)]) -> Result<Bytes> {
    match input {
        Codec::Null => {
            if !arguments.is_empty() {
                return Err(Error::InvalidArgument(format!(
                    "query takes no arguments, {} given",
                    arguments.len()
                )));
            }
            Ok(Bytes::new())
        }
        Codec::NamedTuple { .. } => {
            let value = Value::NamedTuple(arguments.to_vec());
            let mut w = PacketWriter::new();
            input.encode(&mut w, &value)?;
            Ok(w.finish())
        }
        other => Err(Error::Protocol(format!(
            "input descriptor is not a named tuple: {}",
            other.id()
        ))),
    }
}

/// Check a result row count against the declared cardinality.
pub(crate) fn check_cardinality(expected: Cardinality, rows: usize) -> Result<()> {
    let actual = match rows {
        0 => Cardinality::NoResult,
        1 => Cardinality::One,
        _ => Cardinality::Many,
    };
    let ok = match expected {
        Cardinality::Many => true,
        Cardinality::NoResult => rows == 0,
        Cardinality::AtMostOne => rows <= 1,
        Cardinality::One => rows == 1,
    };
    if ok {
        Ok(())
    } else {
        Err(Error::CardinalityMismatch { expected, actual })
    }
}
