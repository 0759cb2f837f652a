//! Schema compiler: `TypeModel` + field metadata -> `openAPIV3Schema` node.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    JSONSchemaProps, JSONSchemaPropsOrArray, JSONSchemaPropsOrBool,
};
use kope_core::{classify, Composite, Describe, FieldMeta, ScalarKind, SchemaError, TypeCache, TypeModel};
use once_cell::sync::Lazy;

/// Compiled schema tree. The root is always an object.
pub type SchemaNode = JSONSchemaProps;

static ROOTS: Lazy<TypeCache<SchemaNode>> = Lazy::new(TypeCache::new);

/// Compile the schema of a top-level type. Cached per type.
pub fn compile_root<T: Describe + 'static>() -> Result<Arc<SchemaNode>, SchemaError> {
    ROOTS.get_or_try_insert::<T, _, _>(|| {
        let model = classify::<T>()?;
        match model.as_ref() {
            TypeModel::Composite(_) => compile(&model, None),
            other => Err(SchemaError::UnsupportedShape {
                type_name: std::any::type_name::<T>().to_string(),
                path: "/".into(),
                reason: format!("resource root must be a composite, found {}", other.shape()),
            }),
        }
    })
}

/// Compile one node. `meta` is the metadata of the field holding this type, if any.
pub fn compile(model: &TypeModel, meta: Option<&FieldMeta>) -> Result<SchemaNode, SchemaError> {
    let mut node = match model {
        TypeModel::Scalar(kind) => scalar(*kind, meta),
        TypeModel::Optional(inner) => {
            let mut node = compile(inner, meta)?;
            node.nullable = Some(true);
            return Ok(node);
        }
        TypeModel::Sequence { elem, .. } => SchemaNode {
            type_: Some("array".into()),
            items: Some(JSONSchemaPropsOrArray::Schema(Box::new(compile(elem, None)?))),
            min_items: meta.and_then(|m| m.min_items),
            max_items: meta.and_then(|m| m.max_items),
            ..Default::default()
        },
        TypeModel::Mapping { value, .. } => SchemaNode {
            type_: Some("object".into()),
            additional_properties: Some(JSONSchemaPropsOrBool::Schema(Box::new(compile(value, None)?))),
            ..Default::default()
        },
        TypeModel::Composite(c) => composite(c)?,
    };
    if let Some(description) = meta.and_then(|m| m.description.as_ref()) {
        node.description = Some(description.clone());
    }
    Ok(node)
}

fn scalar(kind: ScalarKind, meta: Option<&FieldMeta>) -> SchemaNode {
    let mut node = SchemaNode::default();
    match kind {
        ScalarKind::String => {
            node.type_ = Some("string".into());
            if let Some(m) = meta {
                node.format = m.format.clone();
                node.pattern = m.pattern.clone();
                node.min_length = m.min_length;
                node.max_length = m.max_length;
            }
        }
        ScalarKind::Binary => {
            node.type_ = Some("string".into());
            node.format = Some("byte".into());
        }
        ScalarKind::Boolean => node.type_ = Some("boolean".into()),
        ScalarKind::Integer | ScalarKind::Float | ScalarKind::BigNumber => {
            node.type_ = Some(if kind == ScalarKind::Integer { "integer" } else { "number" }.into());
            if let Some(m) = meta {
                node.minimum = m.minimum;
                node.maximum = m.maximum;
            }
        }
    }
    node
}

fn composite(c: &Composite) -> Result<SchemaNode, SchemaError> {
    let mut node = SchemaNode { type_: Some("object".into()), ..Default::default() };
    if c.opaque {
        return Ok(node);
    }
    let mut properties = BTreeMap::new();
    for field in c.visible_fields() {
        properties.insert(field.wire_name().to_string(), compile(&field.model, Some(&field.meta))?);
    }
    if properties.is_empty() {
        return Err(SchemaError::EmptySchema { type_name: c.type_name.to_string() });
    }
    node.properties = Some(properties);
    Ok(node)
}
