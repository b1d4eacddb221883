//! Conversions between `Value` and plain Rust types
//!
//! Native entry closures receive their arguments as already-marshalled
//! `Value`s; these traits unpack them into ordinary Rust types and build
//! result `Value`s without spelling the tags out at every call site.

use crate::error::ReflectError;
use crate::value::{Scalar, Value};

/// Extract a Rust value out of a marshalled `Value`.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self, ReflectError>;
}

/// Wrap a Rust value into a marshalled `Value`.
pub trait IntoValue {
    fn into_value(self) -> Value;
}

fn mismatch<T>(expected: &'static str, value: &Value) -> Result<T, ReflectError> {
    Err(ReflectError::TypeMismatch {
        expected,
        got: value.tag_name(),
    })
}

macro_rules! scalar_conversions {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: &Value) -> Result<Self, ReflectError> {
                    match value {
                        Value::Number(s) => Ok(s.as_f64() as $ty),
                        _ => mismatch("number", value),
                    }
                }
            }

            impl IntoValue for $ty {
                fn into_value(self) -> Value {
                    Value::Number(Scalar::$variant(self))
                }
            }
        )*
    };
}

scalar_conversions! {
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, ReflectError> {
        match value {
            Value::Bool(b) => Ok(*b),
            _ => mismatch("bool", value),
        }
    }
}

impl IntoValue for bool {
    fn into_value(self) -> Value {
        Value::Bool(self)
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, ReflectError> {
        match value {
            Value::String(s) => Ok(s.clone()),
            _ => mismatch("string", value),
        }
    }
}

impl IntoValue for String {
    fn into_value(self) -> Value {
        Value::String(self)
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::String(self.to_owned())
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Result<Self, ReflectError> {
        match value {
            Value::Sequence { items, .. } => items.iter().map(T::from_value).collect(),
            _ => mismatch("sequence", value),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, ReflectError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self) -> Value {
        match self {
            Some(v) => v.into_value(),
            None => Value::Null,
        }
    }
}
