//! Kope marshal: move described instances to and from tree-structured wire documents.
//!
//! The walk is driven by the classified [`TypeModel`](kope_core::TypeModel) of the type,
//! never by the document, so unknown keys in incoming documents are ignored and
//! outgoing documents only ever contain declared fields.

#![forbid(unsafe_code)]

mod decode;
mod encode;
mod error;

use kope_core::{classify, Describe, SchemaError, TypeModel};
use serde_json::Value as Json;

pub use error::MarshalError;
use error::Location;

/// Encode any described value. `None` fields are omitted.
pub fn to_wire<T: Describe + 'static>(value: &T) -> Result<Json, MarshalError> {
    let model = classify::<T>()?;
    encode::encode(&model, value.to_value(), &Location::root(root_name::<T>(&model)))
}

/// Encode a resource instance, attaching `apiVersion` and `kind` from its identity.
pub fn marshal<T: Describe + 'static>(value: &T) -> Result<Json, MarshalError> {
    let identity = T::identity().ok_or_else(|| SchemaError::MissingIdentity {
        type_name: std::any::type_name::<T>().to_string(),
    })?;
    let model = classify::<T>()?;
    if model.as_composite().is_none() {
        return Err(MarshalError::ShapeMismatch {
            type_name: root_name::<T>(&model).to_string(),
            path: "/".into(),
            expected: "composite resource root".into(),
            found: model.shape().into(),
        });
    }
    let mut doc = to_wire(value)?;
    if let Json::Object(map) = &mut doc {
        map.insert("apiVersion".into(), Json::String(identity.api_version()));
        map.insert("kind".into(), Json::String(identity.kind));
    }
    Ok(doc)
}

/// Decode a document into `T`. The value is built only after every field resolved.
pub fn unmarshal<T: Describe + 'static>(doc: &Json) -> Result<T, MarshalError> {
    let model = classify::<T>()?;
    let type_name = root_name::<T>(&model);
    let value = decode::decode(&model, doc, &Location::root(type_name))?;
    T::from_value(value).map_err(|e| MarshalError::from_value_error(type_name, e))
}

fn root_name<T>(model: &TypeModel) -> &'static str {
    match model {
        TypeModel::Composite(c) => c.type_name,
        _ => std::any::type_name::<T>(),
    }
}
