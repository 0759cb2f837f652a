//! Definition builder: identity + compiled schema -> `CustomResourceDefinition` document.

use std::sync::Arc;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceDefinition, CustomResourceDefinitionNames, CustomResourceDefinitionSpec,
    CustomResourceDefinitionVersion, CustomResourceValidation,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kope_core::{ApiStyle, Describe, ResourceIdentity, SchemaError, TypeCache};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value as Json};
use tracing::debug;

use crate::compile::{compile_root, SchemaNode};

static DEFINITIONS: Lazy<TypeCache<DefinitionDocument>> = Lazy::new(TypeCache::new);

static DNS_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap());
static DNS_SUBDOMAIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").unwrap()
});
static KIND: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z][A-Za-z0-9]*$").unwrap());
static VERSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^v[0-9]+((alpha|beta)[0-9]*)?$").unwrap());

/// A rendered resource definition. Pure data; rendering never touches the store.
#[derive(Debug, Clone, PartialEq)]
pub struct DefinitionDocument {
    identity: ResourceIdentity,
    schema: SchemaNode,
    tree: Json,
}

/// Build (once per type) the definition document of `T`.
pub fn definition<T: Describe + 'static>() -> Result<Arc<DefinitionDocument>, SchemaError> {
    DEFINITIONS.get_or_try_insert::<T, _, _>(|| {
        let identity = T::identity().ok_or_else(|| SchemaError::MissingIdentity {
            type_name: std::any::type_name::<T>().to_string(),
        })?;
        let schema = compile_root::<T>()?;
        let doc = DefinitionDocument::from_identity(identity, schema.as_ref().clone())?;
        debug!(name = %doc.name(), style = ?doc.identity.api_style, "definition built");
        Ok(doc)
    })
}

impl DefinitionDocument {
    pub fn from_identity(identity: ResourceIdentity, schema: SchemaNode) -> Result<Self, SchemaError> {
        validate_identity(&identity)?;
        let crd = typed_definition(&identity, schema.clone());
        let mut tree = serde_json::to_value(&crd)
            .map_err(|e| SchemaError::Render { name: identity.name.clone(), reason: e.to_string() })?;
        if identity.api_style == ApiStyle::V1Beta1 {
            to_v1beta1(&mut tree, &identity);
        }
        Ok(Self { identity, schema, tree })
    }

    /// `metadata.name` of the definition, `<plural>.<group>` unless overridden.
    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn identity(&self) -> &ResourceIdentity {
        &self.identity
    }

    pub fn schema(&self) -> &SchemaNode {
        &self.schema
    }

    /// The document as sent to the store.
    pub fn tree(&self) -> &Json {
        &self.tree
    }

    pub fn to_yaml(&self) -> Result<String, SchemaError> {
        serde_yaml::to_string(&self.tree).map_err(|e| self.render_error(e))
    }

    pub fn to_json_pretty(&self) -> Result<String, SchemaError> {
        serde_json::to_string_pretty(&self.tree).map_err(|e| self.render_error(e))
    }

    /// Typed view; only the `apiextensions.k8s.io/v1` layout has one.
    pub fn as_crd(&self) -> Option<CustomResourceDefinition> {
        match self.identity.api_style {
            ApiStyle::V1 => Some(typed_definition(&self.identity, self.schema.clone())),
            ApiStyle::V1Beta1 => None,
        }
    }

    fn render_error(&self, e: impl std::fmt::Display) -> SchemaError {
        SchemaError::Render { name: self.identity.name.clone(), reason: e.to_string() }
    }
}

fn typed_definition(identity: &ResourceIdentity, schema: SchemaNode) -> CustomResourceDefinition {
    CustomResourceDefinition {
        metadata: ObjectMeta { name: Some(identity.name.clone()), ..Default::default() },
        spec: CustomResourceDefinitionSpec {
            group: identity.group.clone(),
            scope: identity.scope.as_str().to_string(),
            preserve_unknown_fields: Some(identity.preserve_unknown_fields),
            names: CustomResourceDefinitionNames {
                kind: identity.kind.clone(),
                plural: identity.plural.clone(),
                singular: Some(identity.singular.clone()),
                short_names: (!identity.short_names.is_empty()).then(|| identity.short_names.clone()),
                ..Default::default()
            },
            versions: vec![CustomResourceDefinitionVersion {
                name: identity.version.clone(),
                served: true,
                storage: true,
                schema: Some(CustomResourceValidation { open_api_v3_schema: Some(schema) }),
                ..Default::default()
            }],
            ..Default::default()
        },
        status: None,
    }
}

// v1beta1 keeps one schema under spec.validation and names the version at spec level.
fn to_v1beta1(tree: &mut Json, identity: &ResourceIdentity) {
    tree["apiVersion"] = json!(identity.api_style.api_version());
    let schema = tree
        .pointer_mut("/spec/versions/0")
        .and_then(|v| v.as_object_mut())
        .and_then(|v| v.remove("schema"))
        .and_then(|mut s| s.get_mut("openAPIV3Schema").map(Json::take));
    if let Some(spec) = tree.get_mut("spec").and_then(|s| s.as_object_mut()) {
        spec.insert("version".into(), json!(identity.version));
        if let Some(schema) = schema {
            spec.insert("validation".into(), json!({ "openAPIV3Schema": schema }));
        }
    }
}

fn validate_identity(identity: &ResourceIdentity) -> Result<(), SchemaError> {
    let invalid = |reason: String| SchemaError::InvalidIdentity { kind: identity.kind.clone(), reason };
    if !KIND.is_match(&identity.kind) {
        return Err(invalid(format!("kind `{}` must be an upper camel case identifier", identity.kind)));
    }
    if identity.group.is_empty() || identity.group.len() > 253 || !DNS_SUBDOMAIN.is_match(&identity.group) {
        return Err(invalid(format!("group `{}` must be a lowercase DNS subdomain", identity.group)));
    }
    if !VERSION.is_match(&identity.version) {
        return Err(invalid(format!("version `{}` must look like v1, v1beta1 or v2alpha3", identity.version)));
    }
    for (what, value) in [("plural", &identity.plural), ("singular", &identity.singular)] {
        if value.len() > 63 || !DNS_LABEL.is_match(value) {
            return Err(invalid(format!("{} name `{}` must be a lowercase DNS label", what, value)));
        }
    }
    for short in &identity.short_names {
        if !DNS_LABEL.is_match(short) {
            return Err(invalid(format!("short name `{}` must be a lowercase DNS label", short)));
        }
    }
    if identity.name.len() > 253 || !DNS_SUBDOMAIN.is_match(&identity.name) {
        return Err(invalid(format!("definition name `{}` must be a lowercase DNS subdomain", identity.name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kope_core::{describe, Metadata, Scope};

    describe! {
        #[resource(
            name = "krd.model",
            kind = "TestModel",
            singular = "simpletest",
            plural = "simpletests",
            group = "krd",
            version = "v1",
            preserve_unknown_fields = true
        )]
        #[derive(Debug, Clone, PartialEq)]
        struct TestSimple {
            metadata: Metadata,
            integer: i32,
            string: String,
            #[field(ignore)]
            ignore: String,
        }
    }

    describe! {
        #[resource(
            kind = "Legacy",
            group = "example.com",
            version = "v1beta1",
            scope = Scope::Cluster,
            short_names = ["lg"],
            api_style = ApiStyle::V1Beta1
        )]
        #[derive(Debug)]
        struct Legacy {
            metadata: Metadata,
            #[field(minimum = 1, maximum = 10)]
            integer: i32,
        }
    }

    describe! {
        #[derive(Debug)]
        struct Anonymous {
            metadata: Metadata,
            value: String,
        }
    }

    describe! {
        #[resource(kind = "badKind", group = "example.com", version = "v1")]
        #[derive(Debug)]
        struct BadKind {
            value: String,
        }
    }

    describe! {
        #[resource(kind = "Upper", group = "Example.COM", version = "v1")]
        #[derive(Debug)]
        struct BadGroup {
            value: String,
        }
    }

    #[test]
    fn v1_document_basics() {
        let doc = definition::<TestSimple>().expect("definition");
        let tree = doc.tree();
        assert_eq!(tree["apiVersion"], "apiextensions.k8s.io/v1");
        assert_eq!(tree["kind"], "CustomResourceDefinition");
        assert_eq!(tree["metadata"]["name"], "krd.model");
        assert_eq!(tree["spec"]["group"], "krd");
        assert_eq!(tree["spec"]["preserveUnknownFields"], true);
        assert_eq!(tree["spec"]["scope"], "Namespaced");
        assert_eq!(tree["spec"]["names"]["kind"], "TestModel");
        assert_eq!(tree["spec"]["names"]["plural"], "simpletests");
        assert_eq!(tree["spec"]["names"]["singular"], "simpletest");
        assert!(tree["spec"]["names"].get("shortNames").is_none());
        let version = &tree["spec"]["versions"][0];
        assert_eq!(version["name"], "v1");
        assert_eq!(version["served"], true);
        assert_eq!(version["storage"], true);
        let schema = &version["schema"]["openAPIV3Schema"];
        assert_eq!(schema["type"], "object");
        assert!(schema.get("nullable").is_none());
        assert_eq!(schema["properties"]["integer"]["type"], "integer");
        assert!(schema["properties"].get("ignore").is_none());
        assert!(tree["spec"].get("validation").is_none());
    }

    #[test]
    fn v1beta1_places_schema_under_validation() {
        let doc = definition::<Legacy>().expect("definition");
        let tree = doc.tree();
        assert_eq!(tree["apiVersion"], "apiextensions.k8s.io/v1beta1");
        assert_eq!(tree["metadata"]["name"], "legacys.example.com");
        assert_eq!(tree["spec"]["scope"], "Cluster");
        assert_eq!(tree["spec"]["version"], "v1beta1");
        assert_eq!(tree["spec"]["names"]["shortNames"], json!(["lg"]));
        assert!(tree.pointer("/spec/versions/0/schema").is_none());
        let integer = &tree["spec"]["validation"]["openAPIV3Schema"]["properties"]["integer"];
        assert_eq!(integer["minimum"], 1.0);
        assert_eq!(integer["maximum"], 10.0);
        assert!(doc.as_crd().is_none());
    }

    #[test]
    fn typed_view_matches_tree() {
        let doc = definition::<TestSimple>().expect("definition");
        let crd = doc.as_crd().expect("v1 has a typed view");
        assert_eq!(serde_json::to_value(&crd).expect("serialize"), *doc.tree());
    }

    #[test]
    fn renders_yaml_and_json() {
        let doc = definition::<TestSimple>().expect("definition");
        let yaml = doc.to_yaml().expect("yaml");
        let back: Json = serde_yaml::from_str(&yaml).expect("parse yaml");
        assert_eq!(back, *doc.tree());
        let json = doc.to_json_pretty().expect("json");
        assert!(json.contains("\"openAPIV3Schema\""));
    }

    #[test]
    fn definitions_are_cached() {
        let a = definition::<TestSimple>().expect("first");
        let b = definition::<TestSimple>().expect("second");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn missing_identity_is_reported() {
        let err = definition::<Anonymous>().unwrap_err();
        match err {
            SchemaError::MissingIdentity { type_name } => assert!(type_name.ends_with("Anonymous"), "{}", type_name),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn invalid_names_are_rejected() {
        assert!(matches!(definition::<BadKind>().unwrap_err(), SchemaError::InvalidIdentity { .. }));
        let err = definition::<BadGroup>().unwrap_err();
        assert!(err.to_string().contains("group `Example.COM`"), "{}", err);
    }
}
