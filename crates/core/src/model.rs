//! Type models: the static shape of a described type.

use serde::{Deserialize, Serialize};

/// Leaf kinds a scalar field can carry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    String,
    Integer,
    Float,
    Boolean,
    /// Byte sequence, carried on the wire as a base64 string.
    Binary,
    /// Numbers outside the signed 64-bit range (`u64`, raw `serde_json::Number`).
    BigNumber,
}

impl ScalarKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarKind::String => "string",
            ScalarKind::Integer => "integer",
            ScalarKind::Float => "float",
            ScalarKind::Boolean => "boolean",
            ScalarKind::Binary => "binary",
            ScalarKind::BigNumber => "big-number",
        }
    }
}

impl std::fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a type. Exactly one shape applies.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeModel {
    Scalar(ScalarKind),
    Optional(Box<TypeModel>),
    Sequence { elem: Box<TypeModel>, ordered: bool },
    Mapping { key: ScalarKind, value: Box<TypeModel> },
    Composite(Composite),
}

impl TypeModel {
    pub fn optional(inner: TypeModel) -> Self {
        TypeModel::Optional(Box::new(inner))
    }

    pub fn sequence(elem: TypeModel, ordered: bool) -> Self {
        TypeModel::Sequence { elem: Box::new(elem), ordered }
    }

    pub fn mapping(key: ScalarKind, value: TypeModel) -> Self {
        TypeModel::Mapping { key, value: Box::new(value) }
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, TypeModel::Optional(_))
    }

    /// Short shape label used in error messages.
    pub fn shape(&self) -> &'static str {
        match self {
            TypeModel::Scalar(_) => "scalar",
            TypeModel::Optional(_) => "optional",
            TypeModel::Sequence { .. } => "sequence",
            TypeModel::Mapping { .. } => "mapping",
            TypeModel::Composite(_) => "composite",
        }
    }

    pub fn as_composite(&self) -> Option<&Composite> {
        match self {
            TypeModel::Composite(c) => Some(c),
            _ => None,
        }
    }
}

/// A fixed, statically known list of named fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Composite {
    pub type_name: &'static str,
    pub fields: Vec<Field>,
    /// Schema renders as a bare `object`; values still marshal field-wise.
    pub opaque: bool,
}

impl Composite {
    pub fn new(type_name: &'static str) -> Self {
        Self { type_name, fields: Vec::new(), opaque: false }
    }

    pub fn field(mut self, name: &'static str, model: TypeModel, meta: FieldMeta) -> Self {
        self.fields.push(Field { name, model, meta });
        self
    }

    pub fn opaque(mut self) -> Self {
        self.opaque = true;
        self
    }

    /// Fields taking part in schema and marshaling (not ignored).
    pub fn visible_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| !f.meta.ignored)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: &'static str,
    pub model: TypeModel,
    pub meta: FieldMeta,
}

impl Field {
    /// Name used in schemas and documents: the override when present, else the field name.
    pub fn wire_name(&self) -> &str {
        self.meta.wire.as_deref().unwrap_or(self.name)
    }
}

/// Per-field annotation data. Unset entries emit nothing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FieldMeta {
    pub wire: Option<String>,
    pub description: Option<String>,
    pub ignored: bool,
    pub format: Option<String>,
    pub pattern: Option<String>,
    pub min_length: Option<i64>,
    pub max_length: Option<i64>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub min_items: Option<i64>,
    pub max_items: Option<i64>,
}

impl FieldMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wire(mut self, name: impl Into<String>) -> Self {
        self.wire = Some(name.into());
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn ignore(mut self) -> Self {
        self.ignored = true;
        self
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn min_length(mut self, n: impl Into<i64>) -> Self {
        self.min_length = Some(n.into());
        self
    }

    pub fn max_length(mut self, n: impl Into<i64>) -> Self {
        self.max_length = Some(n.into());
        self
    }

    pub fn minimum(mut self, v: impl Into<f64>) -> Self {
        self.minimum = Some(v.into());
        self
    }

    pub fn maximum(mut self, v: impl Into<f64>) -> Self {
        self.maximum = Some(v.into());
        self
    }

    pub fn min_items(mut self, n: impl Into<i64>) -> Self {
        self.min_items = Some(n.into());
        self
    }

    pub fn max_items(mut self, n: impl Into<i64>) -> Self {
        self.max_items = Some(n.into());
        self
    }
}
