use thiserror::Error;

/// Schema-generation failures. Always fatal to the generating call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("unsupported shape in {type_name} at `{path}`: {reason}")]
    UnsupportedShape { type_name: String, path: String, reason: String },
    #[error("{type_name} exposes no schema fields (all fields ignored or none declared)")]
    EmptySchema { type_name: String },
    #[error("{type_name} has no resource identity; declare one with #[resource(...)]")]
    MissingIdentity { type_name: String },
    #[error("invalid resource identity for kind `{kind}`: {reason}")]
    InvalidIdentity { kind: String, reason: String },
    #[error("rendering definition `{name}` failed: {reason}")]
    Render { name: String, reason: String },
}
