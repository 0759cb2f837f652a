//! Resource identity: names, group/version and scope of a custom resource kind.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum Scope {
    #[default]
    Namespaced,
    Cluster,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Namespaced => "Namespaced",
            Scope::Cluster => "Cluster",
        }
    }

    pub fn is_namespaced(&self) -> bool {
        matches!(self, Scope::Namespaced)
    }
}

/// Which resource-definition API the definition document targets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum ApiStyle {
    /// `apiextensions.k8s.io/v1`: schema lives under each version.
    #[default]
    V1,
    /// `apiextensions.k8s.io/v1beta1`: schema lives under `spec.validation`.
    V1Beta1,
}

impl ApiStyle {
    pub fn api_version(&self) -> &'static str {
        match self {
            ApiStyle::V1 => "apiextensions.k8s.io/v1",
            ApiStyle::V1Beta1 => "apiextensions.k8s.io/v1beta1",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceIdentity {
    /// Definition name, `<plural>.<group>`.
    pub name: String,
    pub kind: String,
    pub group: String,
    pub version: String,
    pub singular: String,
    pub plural: String,
    pub short_names: Vec<String>,
    pub scope: Scope,
    pub preserve_unknown_fields: bool,
    pub api_style: ApiStyle,
}

impl ResourceIdentity {
    pub fn builder() -> IdentityBuilder {
        IdentityBuilder::default()
    }

    /// `apiVersion` carried by every instance document.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IdentityBuilder {
    name: Option<String>,
    kind: String,
    group: String,
    version: String,
    singular: Option<String>,
    plural: Option<String>,
    short_names: Vec<String>,
    scope: Scope,
    preserve_unknown_fields: bool,
    api_style: ApiStyle,
}

impl IdentityBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn singular(mut self, singular: impl Into<String>) -> Self {
        self.singular = Some(singular.into());
        self
    }

    pub fn plural(mut self, plural: impl Into<String>) -> Self {
        self.plural = Some(plural.into());
        self
    }

    pub fn short_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.short_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn preserve_unknown_fields(mut self, on: bool) -> Self {
        self.preserve_unknown_fields = on;
        self
    }

    pub fn api_style(mut self, style: ApiStyle) -> Self {
        self.api_style = style;
        self
    }

    /// Singular defaults to the lowercased kind, plural to `<singular>s`,
    /// name to `<plural>.<group>`.
    pub fn build(self) -> ResourceIdentity {
        let singular = self.singular.unwrap_or_else(|| self.kind.to_lowercase());
        let plural = self.plural.unwrap_or_else(|| format!("{}s", singular));
        let name = self.name.unwrap_or_else(|| format!("{}.{}", plural, self.group));
        ResourceIdentity {
            name,
            kind: self.kind,
            group: self.group,
            version: self.version,
            singular,
            plural,
            short_names: self.short_names,
            scope: self.scope,
            preserve_unknown_fields: self.preserve_unknown_fields,
            api_style: self.api_style,
        }
    }
}
