//! Descriptor-driven codecs for the binary data format.
//!
//! Every query result and argument blob is decoded or encoded through a
//! [`Codec`] tree. The tree is built from server-sent type descriptors
//! ([`build`]) and cached per descriptor UUID in a [`CodecRegistry`]
//! ([`registry`]). Container codecs slice their element payloads with
//! i32 length prefixes (-1 marking NULL); scalar codecs own the whole
//! slice handed to them.

pub mod build;
pub mod registry;
pub mod value;

use std::sync::Arc;

use bytes::Bytes;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::proto::{PacketReader, PacketWriter};

pub use build::{build_codec, build_codec_blob};
pub use registry::CodecRegistry;
pub use value::{
    BigInt, Datetime, Decimal, Duration, FromValue, LocalDate, LocalDatetime, LocalTime, Value,
};

/// Shape field flags on object codecs.
pub const SHAPE_FLAG_IMPLICIT: u8 = 1 << 0;
pub const SHAPE_FLAG_LINK_PROPERTY: u8 = 1 << 1;
pub const SHAPE_FLAG_LINK: u8 = 1 << 2;

/// The base scalar types with well-known descriptor UUIDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Uuid,
    Str,
    Bytes,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Decimal,
    Bool,
    Datetime,
    LocalDatetime,
    LocalDate,
    LocalTime,
    Duration,
    Json,
    BigInt,
}

impl ScalarKind {
    /// The server's stable UUID for this base scalar.
    pub fn well_known_id(self) -> Uuid {
        let low: u128 = match self {
            ScalarKind::Uuid => 0x100,
            ScalarKind::Str => 0x101,
            ScalarKind::Bytes => 0x102,
            ScalarKind::Int16 => 0x103,
            ScalarKind::Int32 => 0x104,
            ScalarKind::Int64 => 0x105,
            ScalarKind::Float32 => 0x106,
            ScalarKind::Float64 => 0x107,
            ScalarKind::Decimal => 0x108,
            ScalarKind::Bool => 0x109,
            ScalarKind::Datetime => 0x10A,
            ScalarKind::LocalDatetime => 0x10B,
            ScalarKind::LocalDate => 0x10C,
            ScalarKind::LocalTime => 0x10D,
            ScalarKind::Duration => 0x10E,
            ScalarKind::Json => 0x10F,
            ScalarKind::BigInt => 0x110,
        };
        Uuid::from_u128(low)
    }

    pub const ALL: [ScalarKind; 17] = [
        ScalarKind::Uuid,
        ScalarKind::Str,
        ScalarKind::Bytes,
        ScalarKind::Int16,
        ScalarKind::Int32,
        ScalarKind::Int64,
        ScalarKind::Float32,
        ScalarKind::Float64,
        ScalarKind::Decimal,
        ScalarKind::Bool,
        ScalarKind::Datetime,
        ScalarKind::LocalDatetime,
        ScalarKind::LocalDate,
        ScalarKind::LocalTime,
        ScalarKind::Duration,
        ScalarKind::Json,
        ScalarKind::BigInt,
    ];
}

/// One field of an object shape.
#[derive(Debug, Clone)]
pub struct ShapeField {
    pub name: String,
    pub flags: u8,
    pub codec: Arc<Codec>,
}

/// A bidirectional encoder/decoder for one descriptor id.
///
/// Invariant: once a codec is registered under its id, it decodes
/// identical wire bytes to equivalent values for the life of the
/// process.
#[derive(Debug, Clone)]
pub enum Codec {
    /// The nil-UUID codec: decodes nothing, encodes nothing.
    Null,
    Scalar { id: Uuid, kind: ScalarKind },
    Array { id: Uuid, element: Arc<Codec> },
    Set { id: Uuid, element: Arc<Codec> },
    Tuple { id: Uuid, fields: Vec<Arc<Codec>> },
    NamedTuple {
        id: Uuid,
        fields: Vec<(String, Arc<Codec>)>,
    },
    Object { id: Uuid, fields: Vec<ShapeField> },
    Enum { id: Uuid, members: Vec<String> },
}

impl Codec {
    /// The descriptor id this codec was built for.
    pub fn id(&self) -> Uuid {
        match self {
            Codec::Null => Uuid::nil(),
            Codec::Scalar { id, .. }
            | Codec::Array { id, .. }
            | Codec::Set { id, .. }
            | Codec::Tuple { id, .. }
            | Codec::NamedTuple { id, .. }
            | Codec::Object { id, .. }
            | Codec::Enum { id, .. } => *id,
        }
    }

    /// Decode one value from a reader positioned over exactly this
    /// value's bytes.
    pub fn decode(&self, r: &mut PacketReader) -> Result<Value> {
        match self {
            Codec::Null => Ok(Value::Nothing),
            Codec::Scalar { kind, .. } => decode_scalar(*kind, r),
            Codec::Array { element, .. } => Ok(Value::Array(decode_elements(element, r)?)),
            Codec::Set { element, .. } => Ok(Value::Set(decode_elements(element, r)?)),
            Codec::Tuple { fields, .. } => {
                let n = r.get_u32()? as usize;
                if n != fields.len() {
                    return Err(Error::Protocol(format!(
                        "tuple arity mismatch: descriptor has {} fields, payload has {n}",
                        fields.len()
                    )));
                }
                let mut out = Vec::with_capacity(n);
                for codec in fields {
                    out.push(decode_field(codec, r)?);
                }
                Ok(Value::Tuple(out))
            }
            Codec::NamedTuple { fields, .. } => {
                let n = r.get_u32()? as usize;
                if n != fields.len() {
                    return Err(Error::Protocol(format!(
                        "named tuple arity mismatch: descriptor has {} fields, payload has {n}",
                        fields.len()
                    )));
                }
                let mut out = Vec::with_capacity(n);
                for (name, codec) in fields {
                    out.push((name.clone(), decode_field(codec, r)?));
                }
                Ok(Value::NamedTuple(out))
            }
            Codec::Object { fields, .. } => {
                let n = r.get_u32()? as usize;
                if n != fields.len() {
                    return Err(Error::Protocol(format!(
                        "object arity mismatch: shape has {} fields, payload has {n}",
                        fields.len()
                    )));
                }
                let mut out = Vec::with_capacity(n);
                for field in fields {
                    out.push((field.name.clone(), decode_field(&field.codec, r)?));
                }
                Ok(Value::Object(out))
            }
            Codec::Enum { members, .. } => {
                let raw = r.rest();
                let label = String::from_utf8(raw.to_vec())
                    .map_err(|e| Error::Protocol(format!("enum label is not utf-8: {e}")))?;
                if !members.iter().any(|m| m == &label) {
                    return Err(Error::Protocol(format!(
                        "enum label {label:?} is not a member"
                    )));
                }
                Ok(Value::Enum(label))
            }
        }
    }

    /// Encode one value into the writer, without an outer length prefix.
    pub fn encode(&self, w: &mut PacketWriter, value: &Value) -> Result<()> {
        match self {
            Codec::Null => Err(Error::InvalidArgument(
                "cannot encode through the null codec".into(),
            )),
            Codec::Scalar { kind, .. } => encode_scalar(*kind, w, value),
            Codec::Array { element, .. } => match value {
                Value::Array(items) => encode_elements(element, w, items),
                other => Err(type_mismatch("array", other)),
            },
            Codec::Set { element, .. } => match value {
                Value::Set(items) | Value::Array(items) => encode_elements(element, w, items),
                other => Err(type_mismatch("set", other)),
            },
            Codec::Tuple { fields, .. } => {
                let items = match value {
                    Value::Tuple(items) => items,
                    other => return Err(type_mismatch("tuple", other)),
                };
                if items.len() != fields.len() {
                    return Err(Error::InvalidArgument(format!(
                        "tuple arity mismatch: expected {}, got {}",
                        fields.len(),
                        items.len()
                    )));
                }
                w.put_u32(items.len() as u32);
                for (codec, item) in fields.iter().zip(items) {
                    encode_field(codec, w, item)?;
                }
                Ok(())
            }
            Codec::NamedTuple { fields, .. } => {
                // Argument maps arrive as named tuples; every field must
                // be present by name and no extra names are allowed.
                let items = match value {
                    Value::NamedTuple(items) => items,
                    other => return Err(type_mismatch("named tuple", other)),
                };
                for (name, _) in items {
                    if !fields.iter().any(|(n, _)| n == name) {
                        return Err(Error::InvalidArgument(format!(
                            "unexpected argument ${name}"
                        )));
                    }
                }
                w.put_u32(fields.len() as u32);
                for (name, codec) in fields {
                    let item = items
                        .iter()
                        .find(|(n, _)| n == name)
                        .map(|(_, v)| v)
                        .ok_or_else(|| {
                            Error::InvalidArgument(format!("missing argument ${name}"))
                        })?;
                    encode_field(codec, w, item)?;
                }
                Ok(())
            }
            Codec::Object { fields, .. } => {
                let items = match value {
                    Value::Object(items) => items,
                    other => return Err(type_mismatch("object", other)),
                };
                if items.len() != fields.len() {
                    return Err(Error::InvalidArgument(format!(
                        "object arity mismatch: expected {}, got {}",
                        fields.len(),
                        items.len()
                    )));
                }
                w.put_u32(fields.len() as u32);
                for (field, (_, item)) in fields.iter().zip(items) {
                    encode_field(&field.codec, w, item)?;
                }
                Ok(())
            }
            Codec::Enum { members, .. } => {
                let label = match value {
                    Value::Enum(label) | Value::Str(label) => label,
                    other => return Err(type_mismatch("enum", other)),
                };
                if !members.iter().any(|m| m == label) {
                    return Err(Error::InvalidArgument(format!(
                        "{label:?} is not a member of the enum"
                    )));
                }
                w.put_raw(label.as_bytes());
                Ok(())
            }
        }
    }

    /// Decode a standalone payload (one `Data` chunk), verifying full
    /// consumption. Leftover bytes signal a decoder bug and are logged
    /// at warning level.
    pub fn decode_payload(&self, payload: Bytes) -> Result<Value> {
        let mut r = PacketReader::new(payload);
        let value = self.decode(&mut r)?;
        if r.remaining() > 0 {
            tracing::warn!(
                codec = self.id().to_string(),
                trailing = r.remaining(),
                "payload decoded with trailing bytes"
            );
        }
        Ok(value)
    }
}

fn type_mismatch(expected: &str, got: &Value) -> Error {
    Error::InvalidArgument(format!("expected {expected}, got {}", got.kind_name()))
}

/// One i32-length-prefixed element; -1 marks NULL.
fn decode_field(codec: &Codec, r: &mut PacketReader) -> Result<Value> {
    let _reserved = r.get_i32()?;
    let len = r.get_i32()?;
    if len < 0 {
        return Ok(Value::Nothing);
    }
    let raw = r.get_bytes(len as usize)?;
    codec.decode_payload(raw)
}

fn encode_field(codec: &Codec, w: &mut PacketWriter, value: &Value) -> Result<()> {
    w.put_i32(0); // reserved
    if matches!(value, Value::Nothing) {
        w.put_i32(-1);
        return Ok(());
    }
    let mut sub = PacketWriter::new();
    codec.encode(&mut sub, value)?;
    let raw = sub.finish();
    w.put_i32(raw.len() as i32);
    w.put_raw(&raw);
    Ok(())
}

/// Array/set wire shape: ndims (0 or 1), two reserved words, then the
/// single dimension's bounds and the elements.
fn decode_elements(element: &Codec, r: &mut PacketReader) -> Result<Vec<Value>> {
    let ndims = r.get_u32()?;
    let _reserved0 = r.get_u32()?;
    let _reserved1 = r.get_u32()?;
    if ndims == 0 {
        return Ok(Vec::new());
    }
    if ndims != 1 {
        return Err(Error::Protocol(format!(
            "multidimensional collection ({ndims} dims) is not supported"
        )));
    }
    let upper = r.get_i32()?;
    let lower = r.get_i32()?;
    let count = (upper - lower + 1).max(0) as usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let len = r.get_i32()?;
        if len < 0 {
            out.push(Value::Nothing);
            continue;
        }
        let raw = r.get_bytes(len as usize)?;
        out.push(element.decode_payload(raw)?);
    }
    Ok(out)
}

fn encode_elements(element: &Codec, w: &mut PacketWriter, items: &[Value]) -> Result<()> {
    if items.is_empty() {
        w.put_u32(0);
        w.put_u32(0);
        w.put_u32(0);
        return Ok(());
    }
    w.put_u32(1);
    w.put_u32(0);
    w.put_u32(0);
    w.put_i32(items.len() as i32); // upper
    w.put_i32(1); // lower
    for item in items {
        if matches!(item, Value::Nothing) {
            w.put_i32(-1);
            continue;
        }
        let mut sub = PacketWriter::new();
        element.encode(&mut sub, item)?;
        let raw = sub.finish();
        w.put_i32(raw.len() as i32);
        w.put_raw(&raw);
    }
    Ok(())
}

fn decode_scalar(kind: ScalarKind, r: &mut PacketReader) -> Result<Value> {
    Ok(match kind {
        ScalarKind::Uuid => Value::Uuid(r.get_uuid()?),
        ScalarKind::Str => {
            let raw = r.rest();
            Value::Str(
                String::from_utf8(raw.to_vec())
                    .map_err(|e| Error::Protocol(format!("str payload is not utf-8: {e}")))?,
            )
        }
        ScalarKind::Bytes => Value::Bytes(r.rest()),
        ScalarKind::Int16 => Value::Int16(r.get_i16()?),
        ScalarKind::Int32 => Value::Int32(r.get_i32()?),
        ScalarKind::Int64 => Value::Int64(r.get_i64()?),
        ScalarKind::Float32 => Value::Float32(r.get_f32()?),
        ScalarKind::Float64 => Value::Float64(r.get_f64()?),
        ScalarKind::Bool => match r.get_u8()? {
            0 => Value::Bool(false),
            1 => Value::Bool(true),
            other => return Err(Error::Protocol(format!("invalid bool byte: {other}"))),
        },
        ScalarKind::Datetime => Value::Datetime(Datetime(r.get_i64()?)),
        ScalarKind::LocalDatetime => Value::LocalDatetime(LocalDatetime(r.get_i64()?)),
        ScalarKind::LocalDate => Value::LocalDate(LocalDate(r.get_i32()?)),
        ScalarKind::LocalTime => Value::LocalTime(LocalTime(r.get_i64()?)),
        ScalarKind::Duration => {
            let micros = r.get_i64()?;
            let days = r.get_i32()?;
            let months = r.get_i32()?;
            if days != 0 || months != 0 {
                return Err(Error::Protocol(format!(
                    "duration with non-zero days ({days}) or months ({months})"
                )));
            }
            Value::Duration(Duration(micros))
        }
        ScalarKind::Json => {
            let format = r.get_u8()?;
            if format != 1 {
                return Err(Error::Protocol(format!("unknown json format: {format}")));
            }
            let raw = r.rest();
            Value::Json(
                String::from_utf8(raw.to_vec())
                    .map_err(|e| Error::Protocol(format!("json payload is not utf-8: {e}")))?,
            )
        }
        ScalarKind::Decimal => {
            let ndigits = r.get_u16()? as usize;
            let weight = r.get_i16()?;
            let sign = r.get_u16()?;
            let scale = r.get_u16()?;
            let mut digits = Vec::with_capacity(ndigits);
            for _ in 0..ndigits {
                digits.push(r.get_u16()?);
            }
            Value::Decimal(Decimal {
                negative: decode_numeric_sign(sign)?,
                weight,
                scale,
                digits,
            })
        }
        ScalarKind::BigInt => {
            let ndigits = r.get_u16()? as usize;
            let weight = r.get_i16()?;
            let sign = r.get_u16()?;
            let scale = r.get_u16()?;
            if scale != 0 {
                return Err(Error::Protocol(format!(
                    "bigint with non-zero scale: {scale}"
                )));
            }
            let mut digits = Vec::with_capacity(ndigits);
            for _ in 0..ndigits {
                digits.push(r.get_u16()?);
            }
            Value::BigInt(BigInt {
                negative: decode_numeric_sign(sign)?,
                weight,
                digits,
            })
        }
    })
}

fn decode_numeric_sign(sign: u16) -> Result<bool> {
    match sign {
        0x0000 => Ok(false),
        0x4000 => Ok(true),
        other => Err(Error::Protocol(format!(
            "invalid numeric sign: {other:#06x}"
        ))),
    }
}

fn encode_scalar(kind: ScalarKind, w: &mut PacketWriter, value: &Value) -> Result<()> {
    match (kind, value) {
        (ScalarKind::Uuid, Value::Uuid(v)) => w.put_uuid(*v),
        (ScalarKind::Str, Value::Str(v)) => w.put_raw(v.as_bytes()),
        (ScalarKind::Bytes, Value::Bytes(v)) => w.put_raw(v),
        (ScalarKind::Int16, Value::Int16(v)) => w.put_i16(*v),
        (ScalarKind::Int32, Value::Int32(v)) => w.put_i32(*v),
        (ScalarKind::Int64, Value::Int64(v)) => w.put_i64(*v),
        (ScalarKind::Float32, Value::Float32(v)) => w.put_f32(*v),
        (ScalarKind::Float64, Value::Float64(v)) => w.put_f64(*v),
        (ScalarKind::Bool, Value::Bool(v)) => w.put_u8(u8::from(*v)),
        (ScalarKind::Datetime, Value::Datetime(v)) => w.put_i64(v.0),
        (ScalarKind::LocalDatetime, Value::LocalDatetime(v)) => w.put_i64(v.0),
        (ScalarKind::LocalDate, Value::LocalDate(v)) => w.put_i32(v.0),
        (ScalarKind::LocalTime, Value::LocalTime(v)) => w.put_i64(v.0),
        (ScalarKind::Duration, Value::Duration(v)) => {
            w.put_i64(v.0);
            w.put_i32(0);
            w.put_i32(0);
        }
        (ScalarKind::Json, Value::Json(v)) => {
            w.put_u8(1);
            w.put_raw(v.as_bytes());
        }
        (ScalarKind::Decimal, Value::Decimal(v)) => {
            w.put_u16(v.digits.len() as u16);
            w.put_i16(v.weight);
            w.put_u16(if v.negative { 0x4000 } else { 0x0000 });
            w.put_u16(v.scale);
            for d in &v.digits {
                w.put_u16(*d);
            }
        }
        (ScalarKind::BigInt, Value::BigInt(v)) => {
            w.put_u16(v.digits.len() as u16);
            w.put_i16(v.weight);
            w.put_u16(if v.negative { 0x4000 } else { 0x0000 });
            w.put_u16(0);
            for d in &v.digits {
                w.put_u16(*d);
            }
        }
        (kind, other) => {
            return Err(Error::InvalidArgument(format!(
                "cannot encode {} as {kind:?}",
                other.kind_name()
            )))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(kind: ScalarKind) -> Codec {
        Codec::Scalar {
            id: kind.well_known_id(),
            kind,
        }
    }

    fn round_trip(codec: &Codec, value: Value) {
        let mut w = PacketWriter::new();
        codec.encode(&mut w, &value).unwrap();
        let decoded = codec.decode_payload(w.finish()).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn scalar_round_trips() {
        round_trip(&scalar(ScalarKind::Str), Value::Str("héllo".into()));
        round_trip(&scalar(ScalarKind::Int16), Value::Int16(-7));
        round_trip(&scalar(ScalarKind::Int32), Value::Int32(1 << 30));
        round_trip(&scalar(ScalarKind::Int64), Value::Int64(i64::MIN));
        round_trip(&scalar(ScalarKind::Float32), Value::Float32(2.5));
        round_trip(&scalar(ScalarKind::Float64), Value::Float64(-0.125));
        round_trip(&scalar(ScalarKind::Bool), Value::Bool(true));
        round_trip(
            &scalar(ScalarKind::Uuid),
            Value::Uuid(Uuid::from_u128(0xABCD)),
        );
        round_trip(
            &scalar(ScalarKind::Bytes),
            Value::Bytes(Bytes::from_static(b"\x00\x01\x02")),
        );
        round_trip(
            &scalar(ScalarKind::Datetime),
            Value::Datetime(Datetime(694224000000000)),
        );
        round_trip(
            &scalar(ScalarKind::LocalDate),
            Value::LocalDate(LocalDate(8035)),
        );
        round_trip(
            &scalar(ScalarKind::Duration),
            Value::Duration(Duration(3_600_000_000)),
        );
        round_trip(
            &scalar(ScalarKind::Json),
            Value::Json("{\"a\": [1, 2]}".into()),
        );
        round_trip(
            &scalar(ScalarKind::Decimal),
            Value::Decimal(Decimal {
                negative: true,
                weight: 1,
                scale: 2,
                digits: vec![12, 3456, 7800],
            }),
        );
        round_trip(
            &scalar(ScalarKind::BigInt),
            Value::BigInt(BigInt {
                negative: false,
                weight: 2,
                digits: vec![1, 0, 42],
            }),
        );
    }

    #[test]
    fn array_round_trips() {
        let codec = Codec::Array {
            id: Uuid::from_u128(0xA1),
            element: Arc::new(scalar(ScalarKind::Int64)),
        };
        round_trip(
            &codec,
            Value::Array(vec![Value::Int64(1), Value::Int64(2), Value::Int64(3)]),
        );
        round_trip(&codec, Value::Array(vec![]));
    }

    #[test]
    fn set_of_strings_round_trips() {
        let codec = Codec::Set {
            id: Uuid::from_u128(0xA2),
            element: Arc::new(scalar(ScalarKind::Str)),
        };
        round_trip(
            &codec,
            Value::Set(vec![Value::Str("a".into()), Value::Str("bb".into())]),
        );
    }

    #[test]
    fn tuple_and_named_tuple_round_trip() {
        let tuple = Codec::Tuple {
            id: Uuid::from_u128(0xB1),
            fields: vec![
                Arc::new(scalar(ScalarKind::Int64)),
                Arc::new(scalar(ScalarKind::Str)),
            ],
        };
        round_trip(
            &tuple,
            Value::Tuple(vec![Value::Int64(5), Value::Str("five".into())]),
        );

        let named = Codec::NamedTuple {
            id: Uuid::from_u128(0xB2),
            fields: vec![
                ("x".into(), Arc::new(scalar(ScalarKind::Int64))),
                ("y".into(), Arc::new(scalar(ScalarKind::Int64))),
            ],
        };
        round_trip(
            &named,
            Value::NamedTuple(vec![
                ("x".into(), Value::Int64(2)),
                ("y".into(), Value::Int64(3)),
            ]),
        );
    }

    #[test]
    fn named_tuple_encode_reorders_and_rejects_bad_names() {
        let named = Codec::NamedTuple {
            id: Uuid::from_u128(0xB3),
            fields: vec![
                ("x".into(), Arc::new(scalar(ScalarKind::Int64))),
                ("y".into(), Arc::new(scalar(ScalarKind::Int64))),
            ],
        };

        // Out-of-order input encodes in descriptor order.
        let mut w = PacketWriter::new();
        named
            .encode(
                &mut w,
                &Value::NamedTuple(vec![
                    ("y".into(), Value::Int64(3)),
                    ("x".into(), Value::Int64(2)),
                ]),
            )
            .unwrap();
        let decoded = named.decode_payload(w.finish()).unwrap();
        assert_eq!(
            decoded,
            Value::NamedTuple(vec![
                ("x".into(), Value::Int64(2)),
                ("y".into(), Value::Int64(3)),
            ])
        );

        // Missing argument.
        let mut w = PacketWriter::new();
        let err = named
            .encode(
                &mut w,
                &Value::NamedTuple(vec![("x".into(), Value::Int64(2))]),
            )
            .unwrap_err();
        assert!(err.to_string().contains("missing argument $y"));

        // Extra argument.
        let mut w = PacketWriter::new();
        let err = named
            .encode(
                &mut w,
                &Value::NamedTuple(vec![
                    ("x".into(), Value::Int64(1)),
                    ("y".into(), Value::Int64(2)),
                    ("z".into(), Value::Int64(3)),
                ]),
            )
            .unwrap_err();
        assert!(err.to_string().contains("unexpected argument $z"));
    }

    #[test]
    fn object_decodes_null_fields() {
        let object = Codec::Object {
            id: Uuid::from_u128(0xC1),
            fields: vec![
                ShapeField {
                    name: "id".into(),
                    flags: SHAPE_FLAG_IMPLICIT,
                    codec: Arc::new(scalar(ScalarKind::Uuid)),
                },
                ShapeField {
                    name: "nickname".into(),
                    flags: 0,
                    codec: Arc::new(scalar(ScalarKind::Str)),
                },
            ],
        };

        let mut w = PacketWriter::new();
        w.put_u32(2);
        w.put_i32(0);
        w.put_i32(16);
        w.put_uuid(Uuid::from_u128(9));
        w.put_i32(0);
        w.put_i32(-1); // NULL nickname

        let decoded = object.decode_payload(w.finish()).unwrap();
        assert_eq!(
            decoded,
            Value::Object(vec![
                ("id".into(), Value::Uuid(Uuid::from_u128(9))),
                ("nickname".into(), Value::Nothing),
            ])
        );
    }

    #[test]
    fn enum_validates_members() {
        let codec = Codec::Enum {
            id: Uuid::from_u128(0xD1),
            members: vec!["red".into(), "green".into()],
        };
        round_trip(&codec, Value::Enum("green".into()));

        let mut w = PacketWriter::new();
        assert!(codec.encode(&mut w, &Value::Enum("blue".into())).is_err());

        let bad = Bytes::from_static(b"blue");
        assert!(codec.decode_payload(bad).is_err());
    }

    #[test]
    fn duration_rejects_day_and_month_components() {
        let codec = scalar(ScalarKind::Duration);
        let mut w = PacketWriter::new();
        w.put_i64(1);
        w.put_i32(2);
        w.put_i32(0);
        assert!(codec.decode_payload(w.finish()).is_err());
    }

    #[test]
    fn bool_rejects_garbage() {
        let codec = scalar(ScalarKind::Bool);
        assert!(codec.decode_payload(Bytes::from_static(&[2])).is_err());
    }
}
