use kope_core::{ApiStyle, ResourceIdentity};
use serde_json::Value as Json;

/// Addresses one kind in the store, optionally bound to a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceTarget {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
    pub namespaced: bool,
    /// `None` on a namespaced kind means all namespaces.
    pub namespace: Option<String>,
}

impl ResourceTarget {
    pub fn from_identity(identity: &ResourceIdentity) -> Self {
        Self {
            group: identity.group.clone(),
            version: identity.version.clone(),
            kind: identity.kind.clone(),
            plural: identity.plural.clone(),
            namespaced: identity.scope.is_namespaced(),
            namespace: None,
        }
    }

    /// The resource-definition kind itself (`apiextensions.k8s.io/v1`).
    pub fn definitions() -> Self {
        Self::definitions_for(ApiStyle::V1)
    }

    pub fn definitions_for(style: ApiStyle) -> Self {
        let version = match style {
            ApiStyle::V1 => "v1",
            ApiStyle::V1Beta1 => "v1beta1",
        };
        Self {
            group: "apiextensions.k8s.io".into(),
            version: version.into(),
            kind: "CustomResourceDefinition".into(),
            plural: "customresourcedefinitions".into(),
            namespaced: false,
            namespace: None,
        }
    }

    /// Target of the instances a definition document declares (storage version, all namespaces).
    pub fn from_definition_doc(doc: &Json) -> Option<Self> {
        let spec = doc.get("spec")?;
        let group = spec.get("group")?.as_str()?;
        let names = spec.get("names")?;
        let version = spec
            .get("versions")
            .and_then(|v| v.as_array())
            .and_then(|versions| {
                versions
                    .iter()
                    .find(|v| v.get("storage").and_then(|b| b.as_bool()).unwrap_or(false))
                    .or_else(|| versions.first())
            })
            .and_then(|v| v.get("name"))
            .or_else(|| spec.get("version"))?
            .as_str()?;
        Some(Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: names.get("kind")?.as_str()?.to_string(),
            plural: names.get("plural")?.as_str()?.to_string(),
            namespaced: spec.get("scope").and_then(|s| s.as_str()) != Some("Cluster"),
            namespace: None,
        })
    }

    pub fn with_namespace(mut self, namespace: Option<&str>) -> Self {
        self.namespace = if self.namespaced { namespace.map(str::to_string) } else { None };
        self
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// `group/version/Kind` (or `version/Kind` for core kinds), for logs and errors.
    pub fn gvk_key(&self) -> String {
        format!("{}/{}", self.api_version(), self.kind)
    }
}
