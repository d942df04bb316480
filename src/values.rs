// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Scalar and slot values.
//!
//! A [`SimpleValue`] is a typed scalar payload. A [`Simple`] pairs it with an
//! optional formatted label (the human-readable rendering a formatting layer
//! attached, e.g. `"1,234.5"` for `1234.5`). A [`Value`] is what container
//! slots hold: either a simple, or the [`Uid`] of another container — slots
//! never own containers directly, which is what keeps cyclic model graphs
//! representable.
//!
//! Every value has a `key`, a stable string used for equality and membership
//! tests: list removal by element, and domain membership during validation.

use crate::store::Uid;
use std::fmt;

/// The scalar payload kinds a [`Simple`] can hold.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub enum SimpleValue {
    Bool(bool),
    I64(i64),
    U64(u64),
    Double(f64),
    String(String),
}

impl SimpleValue {
    /// The name of this payload's base simple type, as registered by
    /// [`TypeRegistry::new`](crate::types::TypeRegistry::new).
    pub const fn type_name(&self) -> &'static str {
        match self {
            SimpleValue::Bool(_) => "boolean",
            SimpleValue::I64(_) | SimpleValue::U64(_) => "integer",
            SimpleValue::Double(_) => "number",
            SimpleValue::String(_) => "string",
        }
    }

    /// The discriminating key used for equality and membership tests.
    pub fn key(&self) -> String {
        match self {
            SimpleValue::Bool(v) => v.to_string(),
            SimpleValue::I64(v) => v.to_string(),
            SimpleValue::U64(v) => v.to_string(),
            SimpleValue::Double(v) => v.to_string(),
            SimpleValue::String(v) => v.clone(),
        }
    }
}

impl fmt::Display for SimpleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

macro_rules! impl_from {
    (
        $(
            $source:ty => $target:ident $(with $conv:ident)?
        ),* $(,)?
    ) => {
        $(
            impl From<$source> for SimpleValue {
                fn from(v: $source) -> Self {
                    SimpleValue::$target(v $(.$conv())?)
                }
            }

            impl From<$source> for Simple {
                fn from(v: $source) -> Self {
                    Simple::new(SimpleValue::from(v))
                }
            }

            impl From<$source> for Value {
                fn from(v: $source) -> Self {
                    Value::Simple(Simple::from(v))
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i64 => I64,
    u64 => U64,
    f64 => Double,
    String => String,
    &str => String with to_string,
}

macro_rules! impl_partial_eq {
    ({$($t:ty),+}) => {
        $(impl_partial_eq!($t);)+
    };

    ($t:ty) => {
        impl PartialEq<$t> for SimpleValue {
            fn eq(&self, other: &$t) -> bool {
                SimpleValue::from(other.clone()) == *self
            }
        }

        impl PartialEq<$t> for Simple {
            fn eq(&self, other: &$t) -> bool {
                self.value == *other
            }
        }
    };
}
impl_partial_eq!({bool, i64, u64, f64, &str});

/// A simple value: a scalar payload plus an optional formatted label.
///
/// The formatted label travels with the value through changesets and
/// serialization, but does not participate in equality: two simples are
/// interchangeable when their payloads are.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct Simple {
    value: SimpleValue,
    formatted: Option<String>,
}

impl Simple {
    pub fn new(value: impl Into<SimpleValue>) -> Self {
        Self {
            value: value.into(),
            formatted: None,
        }
    }

    pub fn with_formatted(value: impl Into<SimpleValue>, formatted: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            formatted: Some(formatted.into()),
        }
    }

    pub fn value(&self) -> &SimpleValue {
        &self.value
    }

    /// The formatted label, if a formatting layer attached one.
    pub fn formatted(&self) -> Option<&str> {
        self.formatted.as_deref()
    }

    pub fn key(&self) -> String {
        self.value.key()
    }

    pub fn type_name(&self) -> &'static str {
        self.value.type_name()
    }
}

impl PartialEq for Simple {
    fn eq(&self, other: &Self) -> bool {
        // the formatted label is presentation, not identity
        self.value == other.value
    }
}

impl From<SimpleValue> for Simple {
    fn from(value: SimpleValue) -> Self {
        Simple::new(value)
    }
}

impl fmt::Display for Simple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.formatted {
            Some(label) => f.write_str(label),
            None => self.value.fmt(f),
        }
    }
}

/// What a container slot (a complex property or a list position) holds.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub enum Value {
    /// A scalar with optional formatting.
    Simple(Simple),
    /// A non-owning reference to another container in the same store.
    Container(Uid),
}

impl Value {
    /// The discriminating key used for equality and membership tests.
    /// Containers key on their uid, which is unique for the process.
    pub fn key(&self) -> String {
        match self {
            Value::Simple(s) => s.key(),
            Value::Container(uid) => format!("~{uid}"),
        }
    }

    pub fn as_simple(&self) -> Option<&Simple> {
        match self {
            Value::Simple(s) => Some(s),
            Value::Container(_) => None,
        }
    }

    pub fn as_container(&self) -> Option<Uid> {
        match self {
            Value::Simple(_) => None,
            Value::Container(uid) => Some(*uid),
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Value::Container(_))
    }
}

impl From<Simple> for Value {
    fn from(s: Simple) -> Self {
        Value::Simple(s)
    }
}

impl From<SimpleValue> for Value {
    fn from(v: SimpleValue) -> Self {
        Value::Simple(Simple::new(v))
    }
}

impl From<Uid> for Value {
    fn from(uid: Uid) -> Self {
        Value::Container(uid)
    }
}
