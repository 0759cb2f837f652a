use kope_core::{SchemaError, ValueError};
use thiserror::Error;

/// Marshal and unmarshal failures. Every variant names the composite type and JSON-pointer path.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarshalError {
    #[error("{type_name} at `{path}`: expected {expected}, found {found}")]
    Type { type_name: String, path: String, expected: String, found: String },
    #[error("{type_name} at `{path}`: expected {expected}, found {found}")]
    ShapeMismatch { type_name: String, path: String, expected: String, found: String },
    #[error("{type_name} at `{path}`: required field `{field}` is missing")]
    MissingField { type_name: String, path: String, field: String },
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl MarshalError {
    pub fn path(&self) -> Option<&str> {
        match self {
            MarshalError::Type { path, .. }
            | MarshalError::ShapeMismatch { path, .. }
            | MarshalError::MissingField { path, .. } => Some(path),
            MarshalError::Schema(_) => None,
        }
    }

    /// Conversion errors raised while building the typed value from a decoded tree.
    pub(crate) fn from_value_error(type_name: &'static str, err: ValueError) -> Self {
        let mut path = String::new();
        let mut err = err;
        loop {
            match err {
                ValueError::Field { field, source } => {
                    path.push('/');
                    path.push_str(field);
                    err = *source;
                }
                ValueError::Type { expected, found } => {
                    return MarshalError::Type {
                        type_name: type_name.into(),
                        path: or_root(path),
                        expected: expected.into(),
                        found: found.into(),
                    }
                }
                ValueError::OutOfRange { target, value } => {
                    return MarshalError::Type {
                        type_name: type_name.into(),
                        path: or_root(path),
                        expected: format!("a value in range of {}", target),
                        found: value,
                    }
                }
                ValueError::Key { target, key } => {
                    return MarshalError::Type {
                        type_name: type_name.into(),
                        path: or_root(path),
                        expected: format!("a {} key", target),
                        found: key,
                    }
                }
                ValueError::MissingField { type_name, field } => {
                    path.push('/');
                    path.push_str(field);
                    return MarshalError::MissingField { type_name: type_name.into(), path, field: field.into() };
                }
            }
        }
    }
}

/// Position in the walk: enclosing composite and JSON-pointer path.
#[derive(Debug, Clone)]
pub(crate) struct Location {
    type_name: &'static str,
    path: String,
}

impl Location {
    pub(crate) fn root(type_name: &'static str) -> Self {
        Self { type_name, path: String::new() }
    }

    pub(crate) fn child(&self, segment: &str) -> Self {
        let escaped = segment.replace('~', "~0").replace('/', "~1");
        Self { type_name: self.type_name, path: format!("{}/{}", self.path, escaped) }
    }

    pub(crate) fn index(&self, i: usize) -> Self {
        Self { type_name: self.type_name, path: format!("{}/{}", self.path, i) }
    }

    pub(crate) fn within(&self, type_name: &'static str) -> Self {
        Self { type_name, path: self.path.clone() }
    }

    pub(crate) fn type_error(&self, expected: impl Into<String>, found: impl Into<String>) -> MarshalError {
        MarshalError::Type {
            type_name: self.type_name.into(),
            path: or_root(self.path.clone()),
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub(crate) fn shape_error(&self, expected: &str, found: &str) -> MarshalError {
        MarshalError::ShapeMismatch {
            type_name: self.type_name.into(),
            path: or_root(self.path.clone()),
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub(crate) fn missing(&self, field: &str) -> MarshalError {
        MarshalError::MissingField { type_name: self.type_name.into(), path: self.path.clone(), field: field.into() }
    }
}

fn or_root(path: String) -> String {
    if path.is_empty() {
        "/".into()
    } else {
        path
    }
}
