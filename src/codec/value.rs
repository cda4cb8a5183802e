//! Dynamic values decoded from (or encoded into) the binary result
//! format.
//!
//! Temporal scalars are thin newtypes over their wire representation:
//! microseconds (or days) relative to the server epoch, 2000-01-01 UTC.
//! Arbitrary-precision numbers keep the wire's base-10000 digit form.

use std::fmt;

use bytes::Bytes;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Microseconds since 2000-01-01T00:00:00 UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Datetime(pub i64);

impl Datetime {
    #[inline]
    pub fn micros(self) -> i64 {
        self.0
    }
}

/// Microseconds since 2000-01-01T00:00:00, no timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LocalDatetime(pub i64);

impl LocalDatetime {
    #[inline]
    pub fn micros(self) -> i64 {
        self.0
    }
}

/// Days since 2000-01-01.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LocalDate(pub i32);

impl LocalDate {
    #[inline]
    pub fn days(self) -> i32 {
        self.0
    }
}

/// Microseconds since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LocalTime(pub i64);

impl LocalTime {
    #[inline]
    pub fn micros(self) -> i64 {
        self.0
    }
}

/// A span of time in microseconds. The wire format reserves day and
/// month components; the server requires them to be zero for
/// `std::duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration(pub i64);

impl Duration {
    #[inline]
    pub fn micros(self) -> i64 {
        self.0
    }
}

/// Arbitrary-precision decimal in the wire's base-10000 form.
///
/// `digits` are base-10000 groups, most significant first; `weight` is
/// the position of the first group relative to the decimal point;
/// `scale` is the count of decimal fraction digits.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Decimal {
    pub negative: bool,
    pub weight: i16,
    pub scale: u16,
    pub digits: Vec<u16>,
}

/// Arbitrary-precision integer; the decimal layout with no fraction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BigInt {
    pub negative: bool,
    pub weight: i16,
    pub digits: Vec<u16>,
}

impl fmt::Display for BigInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            write!(f, "-")?;
        }
        if self.digits.is_empty() {
            return write!(f, "0");
        }
        write!(f, "{}", self.digits[0])?;
        for i in 1..=self.weight as usize {
            match self.digits.get(i) {
                Some(d) => write!(f, "{d:04}")?,
                None => write!(f, "0000")?,
            }
        }
        Ok(())
    }
}

/// A value decoded from, or encodable into, the binary format.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// An absent value (NULL element).
    Nothing,
    Uuid(Uuid),
    Str(String),
    Bytes(Bytes),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Bool(bool),
    Decimal(Decimal),
    BigInt(BigInt),
    Datetime(Datetime),
    LocalDatetime(LocalDatetime),
    LocalDate(LocalDate),
    LocalTime(LocalTime),
    Duration(Duration),
    Json(String),
    Array(Vec<Value>),
    Set(Vec<Value>),
    Tuple(Vec<Value>),
    NamedTuple(Vec<(String, Value)>),
    Object(Vec<(String, Value)>),
    Enum(String),
}

impl Value {
    /// Name of the variant, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Nothing => "nothing",
            Value::Uuid(_) => "uuid",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::Int16(_) => "int16",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::Float32(_) => "float32",
            Value::Float64(_) => "float64",
            Value::Bool(_) => "bool",
            Value::Decimal(_) => "decimal",
            Value::BigInt(_) => "bigint",
            Value::Datetime(_) => "datetime",
            Value::LocalDatetime(_) => "local_datetime",
            Value::LocalDate(_) => "local_date",
            Value::LocalTime(_) => "local_time",
            Value::Duration(_) => "duration",
            Value::Json(_) => "json",
            Value::Array(_) => "array",
            Value::Set(_) => "set",
            Value::Tuple(_) => "tuple",
            Value::NamedTuple(_) => "named_tuple",
            Value::Object(_) => "object",
            Value::Enum(_) => "enum",
        }
    }

    /// Field lookup on objects and named tuples.
    pub fn field(&self, name: &str) -> Option<&Value> {
        let fields = match self {
            Value::NamedTuple(fields) | Value::Object(fields) => fields,
            _ => return None,
        };
        fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Value {
                    Value::$variant(v)
                }
            }
        )*
    };
}

value_from! {
    Uuid => Uuid,
    String => Str,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
    bool => Bool,
    Datetime => Datetime,
    LocalDate => LocalDate,
    LocalTime => LocalTime,
    Duration => Duration,
}

impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::Str(v.to_owned())
    }
}

/// Conversion out of a decoded [`Value`] into an application type.
///
/// This is the deserialization seam for higher layers (object mappers,
/// derive macros); the core ships impls for the primitives its own API
/// and tests need.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self>;
}

macro_rules! from_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: Value) -> Result<Self> {
                    match value {
                        Value::$variant(v) => Ok(v),
                        other => Err(Error::InvalidArgument(format!(
                            concat!("expected ", stringify!($variant), ", got {}"),
                            other.kind_name()
                        ))),
                    }
                }
            }
        )*
    };
}

from_value! {
    Uuid => Uuid,
    String => Str,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
    bool => Bool,
    Datetime => Datetime,
    LocalDate => LocalDate,
    LocalTime => LocalTime,
    Duration => Duration,
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Nothing => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Array(items) | Value::Set(items) => {
                items.into_iter().map(T::from_value).collect()
            }
            other => Err(Error::InvalidArgument(format!(
                "expected array or set, got {}",
                other.kind_name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bigint_displays_base_10000_groups() {
        // 1_0000_0042 = digits [1, 0, 42], weight 2
        let v = BigInt {
            negative: false,
            weight: 2,
            digits: vec![1, 0, 42],
        };
        assert_eq!(v.to_string(), "100000042");

        let neg = BigInt {
            negative: true,
            weight: 0,
            digits: vec![7],
        };
        assert_eq!(neg.to_string(), "-7");

        assert_eq!(BigInt::default().to_string(), "0");
    }

    #[test]
    fn field_lookup_on_shapes() {
        let obj = Value::Object(vec![
            ("id".into(), Value::Int64(1)),
            ("name".into(), Value::Str("ada".into())),
        ]);
        assert_eq!(obj.field("name"), Some(&Value::Str("ada".into())));
        assert_eq!(obj.field("missing"), None);
        assert_eq!(Value::Int64(1).field("x"), None);
    }

    #[test]
    fn from_value_primitives() {
        assert_eq!(String::from_value(Value::Str("x".into())).unwrap(), "x");
        assert_eq!(i64::from_value(Value::Int64(9)).unwrap(), 9);
        assert_eq!(
            Option::<i64>::from_value(Value::Nothing).unwrap(),
            None::<i64>
        );
        assert_eq!(
            Vec::<i32>::from_value(Value::Set(vec![Value::Int32(1), Value::Int32(2)])).unwrap(),
            vec![1, 2]
        );
        assert!(i64::from_value(Value::Str("x".into())).is_err());
    }
}
