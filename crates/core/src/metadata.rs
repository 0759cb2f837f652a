//! Object metadata carried by every resource instance.

use std::collections::BTreeMap;

use crate::{Composite, Describe, FieldMeta, FieldValues, TypeModel, Value, ValueError};

/// The `metadata` block of an instance. The server owns most of it, so its schema is a bare object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub name: String,
    pub namespace: Option<String>,
    pub uid: Option<String>,
    /// Concurrency token returned by the store.
    pub resource_version: Option<String>,
    pub generation: Option<i64>,
    pub labels: Option<BTreeMap<String, String>>,
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Metadata {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.get_or_insert_with(BTreeMap::new).insert(key.into(), value.into());
        self
    }

    /// Copy without the fields the store assigns (uid, token, generation).
    pub fn without_server_fields(&self) -> Self {
        Self { uid: None, resource_version: None, generation: None, ..self.clone() }
    }
}

impl Describe for Metadata {
    fn type_model() -> TypeModel {
        TypeModel::Composite(
            Composite::new("Metadata")
                .opaque()
                .field("name", String::type_model(), FieldMeta::new())
                .field("namespace", Option::<String>::type_model(), FieldMeta::new())
                .field("uid", Option::<String>::type_model(), FieldMeta::new())
                .field("resource_version", Option::<String>::type_model(), FieldMeta::new().wire("resourceVersion"))
                .field("generation", Option::<i64>::type_model(), FieldMeta::new())
                .field("labels", Option::<BTreeMap<String, String>>::type_model(), FieldMeta::new())
                .field("annotations", Option::<BTreeMap<String, String>>::type_model(), FieldMeta::new()),
        )
    }

    fn to_value(&self) -> Value {
        Value::Composite(vec![
            ("name", self.name.to_value()),
            ("namespace", self.namespace.to_value()),
            ("uid", self.uid.to_value()),
            ("resource_version", self.resource_version.to_value()),
            ("generation", self.generation.to_value()),
            ("labels", self.labels.to_value()),
            ("annotations", self.annotations.to_value()),
        ])
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        let mut fields = FieldValues::from_value("Metadata", value)?;
        Ok(Self {
            name: fields.take("name")?,
            namespace: fields.take("namespace")?,
            uid: fields.take("uid")?,
            resource_version: fields.take("resource_version")?,
            generation: fields.take("generation")?,
            labels: fields.take("labels")?,
            annotations: fields.take("annotations")?,
        })
    }
}
