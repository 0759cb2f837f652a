//! Dynamic value trees produced and consumed by described types.

use thiserror::Error;

use crate::Describe;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Binary(Vec<u8>),
    BigNumber(serde_json::Number),
    Sequence(Vec<Value>),
    Mapping(Vec<(String, Value)>),
    /// Field values keyed by their declared (not wire) names.
    Composite(Vec<(&'static str, Value)>),
}

impl Value {
    pub fn variant(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::String(_) => "string",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Boolean(_) => "boolean",
            Value::Binary(_) => "binary",
            Value::BigNumber(_) => "big-number",
            Value::Sequence(_) => "sequence",
            Value::Mapping(_) => "mapping",
            Value::Composite(_) => "composite",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// Conversion failure between a `Value` and a concrete type.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValueError {
    #[error("expected {expected}, found {found}")]
    Type { expected: &'static str, found: &'static str },
    #[error("{value} is out of range for {target}")]
    OutOfRange { target: &'static str, value: String },
    #[error("{type_name} has no value for field `{field}`")]
    MissingField { type_name: &'static str, field: &'static str },
    #[error("invalid key `{key}` for {target}")]
    Key { target: &'static str, key: String },
    #[error("field `{field}`: {source}")]
    Field {
        field: &'static str,
        #[source]
        source: Box<ValueError>,
    },
}

impl ValueError {
    pub fn mismatch(expected: &'static str, found: &Value) -> Self {
        ValueError::Type { expected, found: found.variant() }
    }
}

/// Resolved field values of one composite, consumed while constructing it.
pub struct FieldValues {
    type_name: &'static str,
    values: Vec<(&'static str, Value)>,
}

impl FieldValues {
    pub fn from_value(type_name: &'static str, value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Composite(values) => Ok(Self { type_name, values }),
            other => Err(ValueError::mismatch("composite", &other)),
        }
    }

    pub fn take<T: Describe>(&mut self, field: &'static str) -> Result<T, ValueError> {
        let pos = self
            .values
            .iter()
            .position(|(name, _)| *name == field)
            .ok_or(ValueError::MissingField { type_name: self.type_name, field })?;
        let (_, value) = self.values.swap_remove(pos);
        T::from_value(value).map_err(|e| ValueError::Field { field, source: Box::new(e) })
    }
}
