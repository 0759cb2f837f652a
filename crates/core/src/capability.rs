//! The `Describe` capability and its implementations for standard types.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::Hash;

use crate::{ResourceIdentity, ScalarKind, TypeModel, Value, ValueError};

/// A type that can state its own shape and move to/from a dynamic `Value`.
///
/// Structs get an implementation from [`describe!`](crate::describe); leaf types,
/// options, sequences and string-keyed maps are covered here.
pub trait Describe: Sized {
    fn type_model() -> TypeModel;

    /// Resource identity of a top-level resource type, `None` for plain types.
    fn identity() -> Option<ResourceIdentity> {
        None
    }

    fn to_value(&self) -> Value;

    fn from_value(value: Value) -> Result<Self, ValueError>;
}

/// Byte sequence. `Vec<u8>` describes a sequence of integers; this one is a binary scalar.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Bytes(pub Vec<u8>);

impl From<Vec<u8>> for Bytes {
    fn from(v: Vec<u8>) -> Self {
        Bytes(v)
    }
}

impl std::ops::Deref for Bytes {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl Describe for Bytes {
    fn type_model() -> TypeModel {
        TypeModel::Scalar(ScalarKind::Binary)
    }
    fn to_value(&self) -> Value {
        Value::Binary(self.0.clone())
    }
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Binary(b) => Ok(Bytes(b)),
            other => Err(ValueError::mismatch("binary", &other)),
        }
    }
}

impl Describe for String {
    fn type_model() -> TypeModel {
        TypeModel::Scalar(ScalarKind::String)
    }
    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(ValueError::mismatch("string", &other)),
        }
    }
}

impl Describe for bool {
    fn type_model() -> TypeModel {
        TypeModel::Scalar(ScalarKind::Boolean)
    }
    fn to_value(&self) -> Value {
        Value::Boolean(*self)
    }
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Boolean(b) => Ok(b),
            other => Err(ValueError::mismatch("boolean", &other)),
        }
    }
}

macro_rules! describe_integer {
    ($($t:ty),*) => {$(
        impl Describe for $t {
            fn type_model() -> TypeModel {
                TypeModel::Scalar(ScalarKind::Integer)
            }
            fn to_value(&self) -> Value {
                Value::Integer(i64::from(*self))
            }
            fn from_value(value: Value) -> Result<Self, ValueError> {
                match value {
                    Value::Integer(n) => <$t>::try_from(n).map_err(|_| ValueError::OutOfRange {
                        target: stringify!($t),
                        value: n.to_string(),
                    }),
                    other => Err(ValueError::mismatch("integer", &other)),
                }
            }
        }
    )*};
}

describe_integer!(i8, i16, i32, i64, u8, u16, u32);

macro_rules! describe_float {
    ($($t:ty),*) => {$(
        impl Describe for $t {
            fn type_model() -> TypeModel {
                TypeModel::Scalar(ScalarKind::Float)
            }
            fn to_value(&self) -> Value {
                Value::Float(f64::from(*self))
            }
            fn from_value(value: Value) -> Result<Self, ValueError> {
                match value {
                    Value::Float(f) => Ok(f as $t),
                    Value::Integer(n) => Ok(n as $t),
                    other => Err(ValueError::mismatch("float", &other)),
                }
            }
        }
    )*};
}

describe_float!(f32, f64);

impl Describe for u64 {
    fn type_model() -> TypeModel {
        TypeModel::Scalar(ScalarKind::BigNumber)
    }
    fn to_value(&self) -> Value {
        Value::BigNumber(serde_json::Number::from(*self))
    }
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::BigNumber(n) => n
                .as_u64()
                .ok_or(ValueError::OutOfRange { target: "u64", value: n.to_string() }),
            Value::Integer(n) => u64::try_from(n)
                .map_err(|_| ValueError::OutOfRange { target: "u64", value: n.to_string() }),
            other => Err(ValueError::mismatch("big-number", &other)),
        }
    }
}

impl Describe for serde_json::Number {
    fn type_model() -> TypeModel {
        TypeModel::Scalar(ScalarKind::BigNumber)
    }
    fn to_value(&self) -> Value {
        Value::BigNumber(self.clone())
    }
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::BigNumber(n) => Ok(n),
            Value::Integer(n) => Ok(serde_json::Number::from(n)),
            other => Err(ValueError::mismatch("big-number", &other)),
        }
    }
}

impl<T: Describe> Describe for Option<T> {
    fn type_model() -> TypeModel {
        TypeModel::optional(T::type_model())
    }
    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Null => Ok(None),
            v => T::from_value(v).map(Some),
        }
    }
}

impl<T: Describe> Describe for Box<T> {
    fn type_model() -> TypeModel {
        T::type_model()
    }
    fn identity() -> Option<ResourceIdentity> {
        T::identity()
    }
    fn to_value(&self) -> Value {
        (**self).to_value()
    }
    fn from_value(value: Value) -> Result<Self, ValueError> {
        T::from_value(value).map(Box::new)
    }
}

fn sequence_items(value: Value) -> Result<Vec<Value>, ValueError> {
    match value {
        Value::Sequence(items) => Ok(items),
        other => Err(ValueError::mismatch("sequence", &other)),
    }
}

macro_rules! describe_sequence {
    ($ordered:expr, $coll:ident <T $(: $bound:ident $(+ $more:ident)*)?>) => {
        impl<T: Describe $(+ $bound $(+ $more)*)?> Describe for $coll<T> {
            fn type_model() -> TypeModel {
                TypeModel::sequence(T::type_model(), $ordered)
            }
            fn to_value(&self) -> Value {
                Value::Sequence(self.iter().map(Describe::to_value).collect())
            }
            fn from_value(value: Value) -> Result<Self, ValueError> {
                sequence_items(value)?.into_iter().map(T::from_value).collect()
            }
        }
    };
}

describe_sequence!(true, Vec<T>);
describe_sequence!(true, VecDeque<T>);
describe_sequence!(false, BTreeSet<T: Ord>);
describe_sequence!(false, HashSet<T: Eq + Hash>);

/// Key types a mapping can be declared with. Only `String` keys pass classification.
pub trait MapKey: Sized {
    const KIND: ScalarKind;
    fn to_key(&self) -> String;
    fn from_key(key: &str) -> Result<Self, ValueError>;
}

impl MapKey for String {
    const KIND: ScalarKind = ScalarKind::String;
    fn to_key(&self) -> String {
        self.clone()
    }
    fn from_key(key: &str) -> Result<Self, ValueError> {
        Ok(key.to_string())
    }
}

macro_rules! map_key_integer {
    ($($t:ty),*) => {$(
        impl MapKey for $t {
            const KIND: ScalarKind = ScalarKind::Integer;
            fn to_key(&self) -> String {
                self.to_string()
            }
            fn from_key(key: &str) -> Result<Self, ValueError> {
                key.parse().map_err(|_| ValueError::Key { target: stringify!($t), key: key.to_string() })
            }
        }
    )*};
}

map_key_integer!(i32, i64, u32);

fn mapping_entries(value: Value) -> Result<Vec<(String, Value)>, ValueError> {
    match value {
        Value::Mapping(entries) => Ok(entries),
        other => Err(ValueError::mismatch("mapping", &other)),
    }
}

impl<K: MapKey + Ord, V: Describe> Describe for BTreeMap<K, V> {
    fn type_model() -> TypeModel {
        TypeModel::mapping(K::KIND, V::type_model())
    }
    fn to_value(&self) -> Value {
        Value::Mapping(self.iter().map(|(k, v)| (k.to_key(), v.to_value())).collect())
    }
    fn from_value(value: Value) -> Result<Self, ValueError> {
        mapping_entries(value)?
            .into_iter()
            .map(|(k, v)| Ok((K::from_key(&k)?, V::from_value(v)?)))
            .collect()
    }
}

impl<K: MapKey + Eq + Hash, V: Describe> Describe for HashMap<K, V> {
    fn type_model() -> TypeModel {
        TypeModel::mapping(K::KIND, V::type_model())
    }
    fn to_value(&self) -> Value {
        let mut entries: Vec<(String, Value)> = self.iter().map(|(k, v)| (k.to_key(), v.to_value())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Value::Mapping(entries)
    }
    fn from_value(value: Value) -> Result<Self, ValueError> {
        mapping_entries(value)?
            .into_iter()
            .map(|(k, v)| Ok((K::from_key(&k)?, V::from_value(v)?)))
            .collect()
    }
}
