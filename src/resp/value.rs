//! The RESP value type.
//!
//! Generalizes the `DatoRedis` enum (which only spoke a custom encrypted
//! RESP2 dialect) into a full RESP2/RESP3 value, since the routing and
//! error-classification logic in the dispatcher needs to see simple
//! errors, maps and pushes as distinct shapes rather than all being folded
//! into bulk strings.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use crate::error::ClientError;

/// A single decoded RESP2/RESP3 reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `+OK\r\n`
    SimpleString(String),
    /// `$<len>\r\n...\r\n`
    BulkString(Vec<u8>),
    /// `:<n>\r\n`
    Integer(i64),
    /// `*<n>\r\n...`
    Array(Vec<Value>),
    /// `_\r\n` (RESP3) or `$-1\r\n` / `*-1\r\n` (RESP2)
    Nil,
    /// `-<kind> <message>\r\n`
    Error { kind: String, message: String },
    /// `%<n>\r\n` (RESP3 map; folded to an array of pairs on RESP2)
    Map(Vec<(Value, Value)>),
    /// `~<n>\r\n` (RESP3 set)
    Set(Vec<Value>),
    /// `#t\r\n` / `#f\r\n`
    Boolean(bool),
    /// `,<float>\r\n`
    Double(f64),
    /// `=<len>\r\n<3-byte type>:...\r\n`
    Verbatim { format: String, text: String },
    /// `(<big number>\r\n`
    BigNumber(String),
    /// `><n>\r\n...` — out-of-band push message (pub/sub, invalidation).
    Push(Vec<Value>),
}

impl Value {
    pub fn okay() -> Self {
        Value::SimpleString("OK".to_string())
    }

    /// If this value is a server error, turn it into a `ClientError::Request`
    /// (or a more specific variant for the kinds the dispatcher treats
    /// specially). Otherwise returns `Ok(self)` unchanged.
    pub fn into_result(self) -> Result<Value, ClientError> {
        match self {
            Value::Error { kind, message } => Err(ClientError::request(kind, message)),
            other => Ok(other),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error { .. })
    }
}

/// Converts a decoded [`Value`] into a typed Rust value, mirroring the
/// `FromRedis` trait (`redis_client/src/driver/traits.rs`).
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, ClientError>;
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, ClientError> {
        Ok(value)
    }
}

impl FromValue for () {
    fn from_value(value: Value) -> Result<Self, ClientError> {
        match value {
            Value::SimpleString(_) | Value::Nil => Ok(()),
            other => Err(wrong_type("()", &other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, ClientError> {
        match value {
            Value::BulkString(bytes) => Ok(String::from_utf8(bytes)?),
            Value::SimpleString(s) => Ok(s),
            Value::Verbatim { text, .. } => Ok(text),
            other => Err(wrong_type("String", &other)),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self, ClientError> {
        match value {
            Value::Integer(n) => Ok(n),
            Value::BulkString(bytes) => Ok(String::from_utf8(bytes)?.parse()?),
            other => Err(wrong_type("i64", &other)),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, ClientError> {
        match value {
            Value::Double(f) => Ok(f),
            Value::BulkString(bytes) => String::from_utf8(bytes)?
                .parse()
                .map_err(|_| ClientError::connection("malformed float in reply")),
            other => Err(wrong_type("f64", &other)),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, ClientError> {
        match value {
            Value::Boolean(b) => Ok(b),
            Value::Integer(n) => Ok(n != 0),
            other => Err(wrong_type("bool", &other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, ClientError> {
        match value {
            Value::Nil => Ok(None),
            other => Ok(Some(T::from_value(other)?)),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self, ClientError> {
        match value {
            Value::Array(items) | Value::Set(items) | Value::Push(items) => {
                items.into_iter().map(T::from_value).collect()
            }
            other => Err(wrong_type("Vec<T>", &other)),
        }
    }
}

impl<T: FromValue + Eq + Hash> FromValue for HashSet<T> {
    fn from_value(value: Value) -> Result<Self, ClientError> {
        match value {
            Value::Set(items) | Value::Array(items) => {
                items.into_iter().map(T::from_value).collect()
            }
            other => Err(wrong_type("HashSet<T>", &other)),
        }
    }
}

impl<K: FromValue + Eq + Hash, V: FromValue> FromValue for HashMap<K, V> {
    fn from_value(value: Value) -> Result<Self, ClientError> {
        match value {
            Value::Map(pairs) => pairs
                .into_iter()
                .map(|(k, v)| Ok((K::from_value(k)?, V::from_value(v)?)))
                .collect(),
            Value::Array(items) => {
                let mut map = HashMap::with_capacity(items.len() / 2);
                let mut iter = items.into_iter();
                while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                    map.insert(K::from_value(k)?, V::from_value(v)?);
                }
                Ok(map)
            }
            other => Err(wrong_type("HashMap<K, V>", &other)),
        }
    }
}

fn wrong_type(target: &str, value: &Value) -> ClientError {
    ClientError::connection(format!("cannot convert reply {value:?} to {target}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulk_string_converts_to_string() {
        let v = Value::BulkString(b"hello".to_vec());
        assert_eq!(String::from_value(v).unwrap(), "hello");
    }

    #[test]
    fn nil_converts_to_none() {
        assert_eq!(Option::<String>::from_value(Value::Nil).unwrap(), None);
    }

    #[test]
    fn error_value_turns_into_request_error() {
        let v = Value::Error {
            kind: "WRONGTYPE".to_string(),
            message: "Operation against a key holding the wrong kind of value".to_string(),
        };
        let err = v.into_result().unwrap_err();
        assert!(matches!(err, ClientError::Request { kind, .. } if kind == "WRONGTYPE"));
    }

    #[test]
    fn array_converts_to_vec() {
        let v = Value::Array(vec![Value::Integer(1), Value::Integer(2)]);
        assert_eq!(Vec::<i64>::from_value(v).unwrap(), vec![1, 2]);
    }
}
